//! The dentry cache: name-to-inode edges forming the lookup tree.

use core::sync::atomic::{AtomicU32, Ordering};

use crate::{
    fs::{
        device::DeviceId,
        utils::{Inode, InodeMode, InodeType, NAME_MAX},
    },
    prelude::*,
};

bitflags! {
    struct DentryFlags: u32 {
        const MOUNTED = 1 << 0;
    }
}

/// A cached name→inode binding. Children hold strong references to
/// their parent, so a live subtree keeps its ancestors cached.
pub struct Dentry {
    inode: Arc<dyn Inode>,
    name_and_parent: RwLock<Option<(String, Arc<Dentry>)>>,
    children: SpinLock<BTreeMap<String, Arc<Dentry>>>,
    flags: AtomicU32,
    this: Weak<Dentry>,
}

impl Dentry {
    /// The root dentry of a filesystem; it has no name or parent.
    pub fn new_root(inode: Arc<dyn Inode>) -> Arc<Self> {
        Self::new(inode, None)
    }

    fn new(inode: Arc<dyn Inode>, name_and_parent: Option<(String, Arc<Dentry>)>) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            inode,
            name_and_parent: RwLock::new(name_and_parent),
            children: SpinLock::new(BTreeMap::new()),
            flags: AtomicU32::new(0),
            this: this.clone(),
        })
    }

    fn this(&self) -> Arc<Dentry> {
        self.this.upgrade().unwrap()
    }

    pub fn inode(&self) -> &Arc<dyn Inode> {
        &self.inode
    }

    /// "/" for a filesystem root.
    pub fn name(&self) -> String {
        match self.name_and_parent.read().as_ref() {
            Some((name, _)) => name.clone(),
            None => String::from("/"),
        }
    }

    pub fn parent(&self) -> Option<Arc<Dentry>> {
        self.name_and_parent
            .read()
            .as_ref()
            .map(|(_, parent)| parent.clone())
    }

    pub fn is_root_of_fs(&self) -> bool {
        self.name_and_parent.read().is_none()
    }

    pub fn is_mountpoint(&self) -> bool {
        DentryFlags::from_bits_truncate(self.flags.load(Ordering::Acquire))
            .contains(DentryFlags::MOUNTED)
    }

    pub(super) fn set_mountpoint(&self) {
        self.flags
            .fetch_or(DentryFlags::MOUNTED.bits(), Ordering::AcqRel);
    }

    pub(super) fn clear_mountpoint(&self) {
        self.flags
            .fetch_and(!DentryFlags::MOUNTED.bits(), Ordering::AcqRel);
    }

    /// Resolve one child, serving from the cache when possible.
    pub fn lookup(&self, name: &str) -> Result<Arc<Dentry>> {
        if self.inode.type_() != InodeType::Dir {
            return_errno!(Errno::ENOTDIR);
        }
        if name.len() > NAME_MAX {
            return_errno!(Errno::ENAMETOOLONG);
        }
        if let Some(child) = self.children.lock().get(name) {
            return Ok(child.clone());
        }
        let inode = self.inode.lookup(name)?;
        let child = Self::new(inode, Some((String::from(name), self.this())));
        self.children
            .lock()
            .insert(String::from(name), child.clone());
        Ok(child)
    }

    pub fn create(&self, name: &str, type_: InodeType, mode: InodeMode) -> Result<Arc<Dentry>> {
        if self.inode.type_() != InodeType::Dir {
            return_errno!(Errno::ENOTDIR);
        }
        let mut children = self.children.lock();
        if children.contains_key(name) {
            return_errno!(Errno::EEXIST);
        }
        let inode = self.inode.create(name, type_, mode)?;
        let child = Self::new(inode, Some((String::from(name), self.this())));
        children.insert(String::from(name), child.clone());
        Ok(child)
    }

    pub fn mknod(
        &self,
        name: &str,
        type_: InodeType,
        mode: InodeMode,
        dev: DeviceId,
    ) -> Result<Arc<Dentry>> {
        if self.inode.type_() != InodeType::Dir {
            return_errno!(Errno::ENOTDIR);
        }
        let mut children = self.children.lock();
        if children.contains_key(name) {
            return_errno!(Errno::EEXIST);
        }
        let inode = self.inode.mknod(name, type_, mode, dev)?;
        let child = Self::new(inode, Some((String::from(name), self.this())));
        children.insert(String::from(name), child.clone());
        Ok(child)
    }

    pub fn symlink(&self, name: &str, target: &str, mode: InodeMode) -> Result<Arc<Dentry>> {
        let child = self.create(name, InodeType::SymLink, mode)?;
        if let Err(err) = child.inode().write_link(target) {
            let _ = self.unlink(name);
            return Err(err);
        }
        Ok(child)
    }

    pub fn link(&self, old: &Arc<Dentry>, name: &str) -> Result<()> {
        if self.inode.type_() != InodeType::Dir {
            return_errno!(Errno::ENOTDIR);
        }
        let mut children = self.children.lock();
        if children.contains_key(name) {
            return_errno!(Errno::EEXIST);
        }
        self.inode.link(old.inode(), name)?;
        let child = Self::new(old.inode().clone(), Some((String::from(name), self.this())));
        children.insert(String::from(name), child.clone());
        Ok(())
    }

    pub fn unlink(&self, name: &str) -> Result<()> {
        let mut children = self.children.lock();
        if let Some(child) = children.get(name) {
            if child.is_mountpoint() {
                return_errno!(Errno::EBUSY);
            }
        }
        self.inode.unlink(name)?;
        children.remove(name);
        Ok(())
    }

    pub fn rmdir(&self, name: &str) -> Result<()> {
        let mut children = self.children.lock();
        if let Some(child) = children.get(name) {
            if child.is_mountpoint() {
                return_errno!(Errno::EBUSY);
            }
        }
        self.inode.rmdir(name)?;
        children.remove(name);
        Ok(())
    }

    /// Rename within one filesystem; `new_dir` may equal `self`.
    pub fn rename(&self, old_name: &str, new_dir: &Arc<Dentry>, new_name: &str) -> Result<()> {
        if !Arc::ptr_eq(&self.inode.fs(), &new_dir.inode().fs()) {
            return_errno!(Errno::EXDEV);
        }
        {
            let children = self.children.lock();
            if children.get(old_name).is_some_and(|c| c.is_mountpoint()) {
                return_errno!(Errno::EBUSY);
            }
        }
        self.inode.rename(old_name, new_dir.inode(), new_name)?;
        // Drop both cached edges; lookups rebuild them lazily.
        self.children.lock().remove(old_name);
        new_dir.children.lock().remove(new_name);
        Ok(())
    }

    /// The absolute path of this dentry within its own filesystem.
    pub fn abs_path(&self) -> String {
        let mut segments: Vec<String> = Vec::new();
        let mut cur = self.this();
        loop {
            let parent = {
                let guard = cur.name_and_parent.read();
                match guard.as_ref() {
                    Some((name, parent)) => {
                        segments.push(name.clone());
                        parent.clone()
                    }
                    None => break,
                }
            };
            cur = parent;
        }
        if segments.is_empty() {
            return String::from("/");
        }
        let mut path = String::new();
        for segment in segments.iter().rev() {
            path.push('/');
            path.push_str(segment);
        }
        path
    }

    /// Drop a cached child edge (used by concrete FS revalidation and
    /// devpts teardown).
    pub fn evict_child(&self, name: &str) {
        self.children.lock().remove(name);
    }
}

impl Debug for Dentry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Dentry")
            .field("name", &self.name())
            .field("ino", &self.inode.ino())
            .finish_non_exhaustive()
    }
}
