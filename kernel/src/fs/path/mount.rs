//! The mount tree.

use super::dentry::Dentry;
use crate::{
    fs::utils::{FileSystem, InodeType},
    prelude::*,
};

/// One mounted filesystem instance and its place in the tree.
pub struct MountNode {
    fs: Arc<dyn FileSystem>,
    root: Arc<Dentry>,
    /// The parent mount and the dentry this mount covers; `None` for
    /// the root mount.
    parent: RwLock<Option<(Weak<MountNode>, Arc<Dentry>)>>,
    /// Child mounts keyed by the address of the covered dentry.
    children: SpinLock<BTreeMap<usize, Arc<MountNode>>>,
    this: Weak<MountNode>,
}

impl MountNode {
    pub fn new_root(fs: Arc<dyn FileSystem>) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            root: Dentry::new_root(fs.root_inode()),
            fs,
            parent: RwLock::new(None),
            children: SpinLock::new(BTreeMap::new()),
            this: this.clone(),
        })
    }

    pub fn fs(&self) -> &Arc<dyn FileSystem> {
        &self.fs
    }

    pub fn root_dentry(&self) -> &Arc<Dentry> {
        &self.root
    }

    pub fn parent(&self) -> Option<(Arc<MountNode>, Arc<Dentry>)> {
        self.parent
            .read()
            .as_ref()
            .and_then(|(mount, dentry)| Some((mount.upgrade()?, dentry.clone())))
    }

    /// Mount `fs` over `mountpoint`, a directory dentry resolved in
    /// this mount.
    pub fn mount(&self, fs: Arc<dyn FileSystem>, mountpoint: &Arc<Dentry>) -> Result<Arc<MountNode>> {
        if mountpoint.inode().type_() != InodeType::Dir {
            return_errno!(Errno::ENOTDIR);
        }
        if mountpoint.is_mountpoint() {
            return_errno_with_message!(Errno::EBUSY, "already a mountpoint");
        }
        let child = Arc::new_cyclic(|this| Self {
            root: Dentry::new_root(fs.root_inode()),
            fs,
            parent: RwLock::new(Some((self.this.clone(), mountpoint.clone()))),
            children: SpinLock::new(BTreeMap::new()),
            this: this.clone(),
        });
        self.children
            .lock()
            .insert(Arc::as_ptr(mountpoint) as usize, child.clone());
        mountpoint.set_mountpoint();
        Ok(child)
    }

    /// Detach the mount covering `mountpoint`, syncing it first.
    pub fn umount(&self, mountpoint: &Arc<Dentry>) -> Result<Arc<MountNode>> {
        let key = Arc::as_ptr(mountpoint) as usize;
        let child = {
            let children = self.children.lock();
            children
                .get(&key)
                .cloned()
                .ok_or(Error::with_message(Errno::EINVAL, "not a mountpoint"))?
        };
        if !child.children.lock().is_empty() {
            return_errno_with_message!(Errno::EBUSY, "mount has submounts");
        }
        child.fs.sync()?;
        self.children.lock().remove(&key);
        mountpoint.clear_mountpoint();
        Ok(child)
    }

    /// The mount covering `dentry`, if any.
    pub fn child_mount_of(&self, dentry: &Arc<Dentry>) -> Option<Arc<MountNode>> {
        self.children
            .lock()
            .get(&(Arc::as_ptr(dentry) as usize))
            .cloned()
    }

    /// Sync this mount and every mount below it.
    pub fn sync_all(&self) -> Result<()> {
        let children: Vec<Arc<MountNode>> = self.children.lock().values().cloned().collect();
        for child in children {
            child.sync_all()?;
        }
        self.fs.sync()
    }
}

impl Debug for MountNode {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("MountNode")
            .field("fs", &self.fs.stats().magic)
            .finish_non_exhaustive()
    }
}
