//! Locations in the VFS namespace: a dentry plus the mount it is
//! reached through, with mountpoint crossing on both descent and
//! ascent.

mod dentry;
mod mount;

pub use dentry::Dentry;
pub use mount::MountNode;

use crate::{
    fs::{
        device::DeviceId,
        utils::{Inode, InodeMode, InodeType},
    },
    prelude::*,
};

#[derive(Clone)]
pub struct Path {
    mount: Arc<MountNode>,
    dentry: Arc<Dentry>,
}

impl Path {
    pub fn new(mount: Arc<MountNode>, dentry: Arc<Dentry>) -> Self {
        Self { mount, dentry }
    }

    pub fn new_fs_root(mount: Arc<MountNode>) -> Self {
        let dentry = mount.root_dentry().clone();
        Self { mount, dentry }
    }

    pub fn mount_node(&self) -> &Arc<MountNode> {
        &self.mount
    }

    pub fn dentry(&self) -> &Arc<Dentry> {
        &self.dentry
    }

    pub fn inode(&self) -> &Arc<dyn Inode> {
        self.dentry.inode()
    }

    pub fn type_(&self) -> InodeType {
        self.dentry.inode().type_()
    }

    /// Resolve one component, crossing mountpoints in both directions.
    pub fn lookup_child(&self, name: &str) -> Result<Path> {
        match name {
            "" | "." => Ok(self.clone()),
            ".." => self.lookup_parent(),
            _ => {
                let child = self.dentry.lookup(name)?;
                if child.is_mountpoint() {
                    if let Some(mount) = self.mount.child_mount_of(&child) {
                        return Ok(Path::new_fs_root(mount));
                    }
                }
                Ok(Path::new(self.mount.clone(), child))
            }
        }
    }

    fn lookup_parent(&self) -> Result<Path> {
        if let Some(parent) = self.dentry.parent() {
            return Ok(Path::new(self.mount.clone(), parent));
        }
        // At the root of this mount: climb to the mountpoint and take
        // its parent there.
        match self.mount.parent() {
            Some((parent_mount, covered)) => Path::new(parent_mount, covered).lookup_parent(),
            // The absolute root is its own parent.
            None => Ok(self.clone()),
        }
    }

    pub fn create(&self, name: &str, type_: InodeType, mode: InodeMode) -> Result<Path> {
        let child = self.dentry.create(name, type_, mode)?;
        Ok(Path::new(self.mount.clone(), child))
    }

    pub fn mknod(
        &self,
        name: &str,
        type_: InodeType,
        mode: InodeMode,
        dev: DeviceId,
    ) -> Result<Path> {
        let child = self.dentry.mknod(name, type_, mode, dev)?;
        Ok(Path::new(self.mount.clone(), child))
    }

    pub fn symlink(&self, name: &str, target: &str) -> Result<Path> {
        let child = self
            .dentry
            .symlink(name, target, InodeMode::from_bits_truncate(0o777))?;
        Ok(Path::new(self.mount.clone(), child))
    }

    /// Mount `fs` over this location.
    pub fn mount(&self, fs: Arc<dyn crate::fs::utils::FileSystem>) -> Result<Arc<MountNode>> {
        self.mount.mount(fs, &self.dentry)
    }

    /// Unmount the filesystem rooted here.
    pub fn umount(&self) -> Result<()> {
        let (parent_mount, covered) = self
            .mount
            .parent()
            .ok_or(Error::with_message(Errno::EINVAL, "cannot umount root"))?;
        if !self.dentry.is_root_of_fs() {
            return_errno_with_message!(Errno::EINVAL, "not a mount root");
        }
        parent_mount.umount(&covered)?;
        Ok(())
    }

    /// Absolute path, stitching filesystem paths across mountpoints.
    pub fn abs_path(&self) -> String {
        let local = self.dentry.abs_path();
        match self.mount.parent() {
            None => local,
            Some((parent_mount, covered)) => {
                let prefix = Path::new(parent_mount, covered).abs_path();
                if local == "/" {
                    prefix
                } else if prefix == "/" {
                    local
                } else {
                    let mut joined = prefix;
                    joined.push_str(&local);
                    joined
                }
            }
        }
    }
}

impl Debug for Path {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Path")
            .field("path", &self.abs_path())
            .finish_non_exhaustive()
    }
}
