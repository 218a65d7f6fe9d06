//! The root mount and the standard early mounts.

use spin::Once;

use super::{
    path::{MountNode, Path},
    utils::{FileSystem, InodeMode, InodeType},
};
use crate::prelude::*;

static ROOT_MOUNT: Once<Arc<MountNode>> = Once::new();

/// Install the root filesystem. Called once at boot, before the first
/// user task exists.
pub fn init(root_fs: Arc<dyn FileSystem>) {
    ROOT_MOUNT.call_once(|| MountNode::new_root(root_fs));
}

pub fn root_mount() -> &'static Arc<MountNode> {
    ROOT_MOUNT.get().expect("root filesystem is not initialized")
}

pub fn root_path() -> Path {
    Path::new_fs_root(root_mount().clone())
}

/// Create `/dev`, `/tmp` and `/proc` on the root and mount the
/// standard filesystems there.
pub fn mount_std_trees() -> Result<()> {
    let root = root_path();
    for (name, fstype) in [("dev", "tmpfs"), ("tmp", "tmpfs"), ("proc", "proc")] {
        let dir = match root.lookup_child(name) {
            Ok(existing) => existing,
            Err(_) => root.create(
                name,
                InodeType::Dir,
                InodeMode::from_bits_truncate(0o755),
            )?,
        };
        let fs = super::make_fs(fstype, super::FsSource::None)?;
        dir.mount(fs)?;
    }
    // The pty slave tree hangs below /dev.
    let dev = root.lookup_child("dev")?;
    let pts = dev.create("pts", InodeType::Dir, InodeMode::from_bits_truncate(0o755))?;
    pts.mount(super::make_fs("devpts", super::FsSource::None)?)?;
    Ok(())
}
