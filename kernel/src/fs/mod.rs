//! The virtual filesystem: core contracts, the mount/dentry/path
//! machinery, the buffer cache, and the concrete filesystems.

pub mod buffer;
pub mod device;
pub mod devpts;
pub mod ext2;
pub mod file_handle;
pub mod file_table;
pub mod fs_resolver;
pub mod inode_handle;
pub mod isofs;
pub mod minix;
pub mod named_pipe;
pub mod path;
pub mod pipe;
pub mod procfs;
pub mod ramfs;
pub mod rootfs;
pub mod utils;

use crate::prelude::*;

use self::{device::DeviceId, utils::FileSystem};

/// What a filesystem is mounted from.
#[derive(Debug, Clone, Copy)]
pub enum FsSource {
    None,
    Block(DeviceId),
}

type FsMaker = fn(FsSource) -> Result<Arc<dyn FileSystem>>;

lazy_static! {
    static ref FS_TYPES: SpinLock<BTreeMap<String, FsMaker>> = SpinLock::new(BTreeMap::new());
}

pub fn register_fs_type(name: &str, maker: FsMaker) {
    FS_TYPES.lock().insert(String::from(name), maker);
}

pub fn make_fs(name: &str, source: FsSource) -> Result<Arc<dyn FileSystem>> {
    let maker = FS_TYPES
        .lock()
        .get(name)
        .copied()
        .ok_or(Error::with_message(Errno::ENODEV, "unknown filesystem type"))?;
    maker(source)
}

pub fn registered_fs_types() -> Vec<String> {
    FS_TYPES.lock().keys().cloned().collect()
}

#[cfg(test)]
mod tests;

/// Register the built-in filesystem types.
pub fn init() {
    register_fs_type("tmpfs", |_| Ok(ramfs::RamFS::new()));
    register_fs_type("proc", |_| Ok(procfs::ProcFS::new()));
    register_fs_type("devpts", |_| Ok(devpts::DevPtsFS::new()));
    register_fs_type("ext2", |source| match source {
        FsSource::Block(dev) => Ok(ext2::Ext2::open(dev)?),
        FsSource::None => Err(Error::new(Errno::ENODEV)),
    });
    register_fs_type("minix", |source| match source {
        FsSource::Block(dev) => Ok(minix::MinixFS::open(dev)?),
        FsSource::None => Err(Error::new(Errno::ENODEV)),
    });
    register_fs_type("iso9660", |source| match source {
        FsSource::Block(dev) => Ok(isofs::IsoFS::open(dev)?),
        FsSource::None => Err(Error::new(Errno::ENODEV)),
    });
}
