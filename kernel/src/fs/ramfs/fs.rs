//! A volatile filesystem whose data and metadata exist only in memory.
//! Mounted as `/tmp`, `/dev` and the boot-time root.

use core::{
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use super::{BLOCK_SIZE, RAMFS_MAGIC, ROOT_INO};
use crate::{
    fs::{
        device::DeviceId,
        utils::{
            DirentVisitor, FileSystem, FsFlags, FsStats, Inode, InodeMode, InodeType,
            Metadata, NAME_MAX,
        },
    },
    prelude::*,
};

pub struct RamFS {
    root: Arc<RamInode>,
    inode_allocator: AtomicU64,
}

impl RamFS {
    pub fn new() -> Arc<Self> {
        Arc::new_cyclic(|weak_fs| Self {
            root: Arc::new_cyclic(|weak_root| RamInode {
                ino: ROOT_INO,
                typ: InodeType::Dir,
                this: weak_root.clone(),
                fs: weak_fs.clone(),
                node: RwLock::new(Node::new_dir(
                    InodeMode::from_bits_truncate(0o755),
                    weak_root.clone(),
                )),
            }),
            inode_allocator: AtomicU64::new(ROOT_INO + 1),
        })
    }

    fn alloc_id(&self) -> u64 {
        self.inode_allocator.fetch_add(1, Ordering::SeqCst)
    }
}

impl FileSystem for RamFS {
    fn root_inode(&self) -> Arc<dyn Inode> {
        self.root.clone()
    }

    fn stats(&self) -> FsStats {
        FsStats::new(RAMFS_MAGIC, BLOCK_SIZE, NAME_MAX)
    }

    fn flags(&self) -> FsFlags {
        FsFlags::DENTRY_UNEVICTABLE
    }
}

struct RamInode {
    ino: u64,
    typ: InodeType,
    this: Weak<RamInode>,
    fs: Weak<RamFS>,
    node: RwLock<Node>,
}

struct Node {
    inner: Inner,
    mode: InodeMode,
    uid: u32,
    gid: u32,
    nlinks: usize,
    atime: Duration,
    mtime: Duration,
    ctime: Duration,
}

enum Inner {
    Dir(BTreeMap<String, Arc<RamInode>>),
    File(Vec<u8>),
    SymLink(String),
    Device(DeviceId),
    Socket,
    Fifo,
}

fn now() -> Duration {
    let (secs, nanos) = crate::time::wall_clock();
    Duration::new(secs, nanos)
}

impl Node {
    fn new_dir(mode: InodeMode, _this: Weak<RamInode>) -> Self {
        Self {
            inner: Inner::Dir(BTreeMap::new()),
            mode,
            uid: 0,
            gid: 0,
            nlinks: 2,
            atime: now(),
            mtime: now(),
            ctime: now(),
        }
    }

    fn new_leaf(inner: Inner, mode: InodeMode) -> Self {
        Self {
            inner,
            mode,
            uid: 0,
            gid: 0,
            nlinks: 1,
            atime: now(),
            mtime: now(),
            ctime: now(),
        }
    }

    fn dir(&self) -> Result<&BTreeMap<String, Arc<RamInode>>> {
        match &self.inner {
            Inner::Dir(entries) => Ok(entries),
            _ => Err(Error::new(Errno::ENOTDIR)),
        }
    }

    fn dir_mut(&mut self) -> Result<&mut BTreeMap<String, Arc<RamInode>>> {
        match &mut self.inner {
            Inner::Dir(entries) => Ok(entries),
            _ => Err(Error::new(Errno::ENOTDIR)),
        }
    }
}

impl RamInode {
    fn new(fs: &Arc<RamFS>, typ: InodeType, node: Node) -> Arc<Self> {
        Arc::new_cyclic(|this| RamInode {
            ino: fs.alloc_id(),
            typ,
            this: this.clone(),
            fs: Arc::downgrade(fs),
            node: RwLock::new(node),
        })
    }

    fn fs_arc(&self) -> Arc<RamFS> {
        self.fs.upgrade().unwrap()
    }

    fn data_size(&self) -> usize {
        match &self.node.read().inner {
            Inner::File(data) => data.len(),
            Inner::SymLink(target) => target.len(),
            Inner::Dir(entries) => entries.len() + 2,
            _ => 0,
        }
    }
}

impl Inode for RamInode {
    fn ino(&self) -> u64 {
        self.ino
    }

    fn type_(&self) -> InodeType {
        self.typ
    }

    fn size(&self) -> usize {
        self.data_size()
    }

    fn fs(&self) -> Arc<dyn FileSystem> {
        self.fs_arc()
    }

    fn metadata(&self) -> Metadata {
        let node = self.node.read();
        let rdev = match &node.inner {
            Inner::Device(id) => id.as_encoded(),
            _ => 0,
        };
        Metadata {
            dev: 0,
            ino: self.ino,
            size: self.data_size(),
            blk_size: BLOCK_SIZE,
            blocks: self.data_size().div_ceil(BLOCK_SIZE),
            atime: node.atime,
            mtime: node.mtime,
            ctime: node.ctime,
            type_: self.typ,
            mode: node.mode,
            nlinks: node.nlinks,
            uid: node.uid,
            gid: node.gid,
            rdev,
        }
    }

    fn resize(&self, new_size: usize) -> Result<()> {
        let mut node = self.node.write();
        match &mut node.inner {
            Inner::File(data) => {
                data.resize(new_size, 0);
                node.mtime = now();
                Ok(())
            }
            _ => return_errno!(Errno::EISDIR),
        }
    }

    fn set_mode(&self, mode: InodeMode) -> Result<()> {
        self.node.write().mode = mode;
        Ok(())
    }

    fn set_owner(&self, uid: u32, gid: u32) -> Result<()> {
        let mut node = self.node.write();
        node.uid = uid;
        node.gid = gid;
        Ok(())
    }

    fn atime(&self) -> Duration {
        self.node.read().atime
    }

    fn set_atime(&self, time: Duration) {
        self.node.write().atime = time;
    }

    fn mtime(&self) -> Duration {
        self.node.read().mtime
    }

    fn set_mtime(&self, time: Duration) {
        self.node.write().mtime = time;
    }

    fn read_at(&self, offset: usize, buf: &mut [u8]) -> Result<usize> {
        let node = self.node.read();
        match &node.inner {
            Inner::File(data) => {
                if offset >= data.len() {
                    return Ok(0);
                }
                let len = buf.len().min(data.len() - offset);
                buf[..len].copy_from_slice(&data[offset..offset + len]);
                Ok(len)
            }
            _ => return_errno!(Errno::EISDIR),
        }
    }

    fn write_at(&self, offset: usize, buf: &[u8]) -> Result<usize> {
        let mut node = self.node.write();
        match &mut node.inner {
            Inner::File(data) => {
                if offset + buf.len() > data.len() {
                    data.resize(offset + buf.len(), 0);
                }
                data[offset..offset + buf.len()].copy_from_slice(buf);
                node.mtime = now();
                Ok(buf.len())
            }
            _ => return_errno!(Errno::EISDIR),
        }
    }

    fn create(&self, name: &str, type_: InodeType, mode: InodeMode) -> Result<Arc<dyn Inode>> {
        if name.len() > NAME_MAX {
            return_errno!(Errno::ENAMETOOLONG);
        }
        let fs = self.fs_arc();
        let mut node = self.node.write();
        let entries = node.dir_mut()?;
        if entries.contains_key(name) {
            return_errno!(Errno::EEXIST);
        }
        let inner = match type_ {
            InodeType::Dir => Inner::Dir(BTreeMap::new()),
            InodeType::File => Inner::File(Vec::new()),
            InodeType::SymLink => Inner::SymLink(String::new()),
            InodeType::Socket => Inner::Socket,
            InodeType::NamedPipe => Inner::Fifo,
            _ => return_errno!(Errno::EINVAL),
        };
        let new = RamInode::new(&fs, type_, Node::new_leaf(inner, mode));
        entries.insert(String::from(name), new.clone());
        if type_ == InodeType::Dir {
            node.nlinks += 1;
        }
        node.mtime = now();
        Ok(new)
    }

    fn mknod(
        &self,
        name: &str,
        type_: InodeType,
        mode: InodeMode,
        dev: DeviceId,
    ) -> Result<Arc<dyn Inode>> {
        if !type_.is_device() {
            return_errno!(Errno::EINVAL);
        }
        let fs = self.fs_arc();
        let mut node = self.node.write();
        let entries = node.dir_mut()?;
        if entries.contains_key(name) {
            return_errno!(Errno::EEXIST);
        }
        let new = RamInode::new(&fs, type_, Node::new_leaf(Inner::Device(dev), mode));
        entries.insert(String::from(name), new.clone());
        node.mtime = now();
        Ok(new)
    }

    fn lookup(&self, name: &str) -> Result<Arc<dyn Inode>> {
        let node = self.node.read();
        let entries = node.dir()?;
        entries
            .get(name)
            .map(|inode| inode.clone() as Arc<dyn Inode>)
            .ok_or(Error::new(Errno::ENOENT))
    }

    fn readdir_at(&self, offset: usize, visitor: &mut dyn DirentVisitor) -> Result<usize> {
        let node = self.node.read();
        let entries = node.dir()?;
        let mut cur = 0;
        let mut next = offset;
        if offset == 0 {
            visitor.visit(".", self.ino, InodeType::Dir, 1)?;
            next = 1;
        }
        cur += 1;
        if offset <= 1 {
            visitor.visit("..", self.ino, InodeType::Dir, 2)?;
            next = 2;
        }
        cur += 1;
        for (name, child) in entries.iter() {
            cur += 1;
            if cur <= offset {
                continue;
            }
            visitor.visit(name, child.ino, child.typ, cur)?;
            next = cur;
        }
        Ok(next)
    }

    fn link(&self, old: &Arc<dyn Inode>, name: &str) -> Result<()> {
        let old = old
            .downcast_ref::<RamInode>()
            .ok_or(Error::new(Errno::EXDEV))?
            .this
            .upgrade()
            .unwrap();
        if old.typ == InodeType::Dir {
            return_errno!(Errno::EPERM);
        }
        let mut node = self.node.write();
        let entries = node.dir_mut()?;
        if entries.contains_key(name) {
            return_errno!(Errno::EEXIST);
        }
        entries.insert(String::from(name), old.clone());
        drop(node);
        old.node.write().nlinks += 1;
        Ok(())
    }

    fn unlink(&self, name: &str) -> Result<()> {
        let mut node = self.node.write();
        let entries = node.dir_mut()?;
        let target = entries
            .get(name)
            .cloned()
            .ok_or(Error::new(Errno::ENOENT))?;
        if target.typ == InodeType::Dir {
            return_errno!(Errno::EISDIR);
        }
        entries.remove(name);
        node.mtime = now();
        drop(node);
        target.node.write().nlinks -= 1;
        Ok(())
    }

    fn rmdir(&self, name: &str) -> Result<()> {
        let mut node = self.node.write();
        let entries = node.dir_mut()?;
        let target = entries
            .get(name)
            .cloned()
            .ok_or(Error::new(Errno::ENOENT))?;
        if target.typ != InodeType::Dir {
            return_errno!(Errno::ENOTDIR);
        }
        if !target.node.read().dir()?.is_empty() {
            return_errno!(Errno::ENOTEMPTY);
        }
        entries.remove(name);
        node.nlinks -= 1;
        node.mtime = now();
        Ok(())
    }

    fn rename(&self, old_name: &str, target: &Arc<dyn Inode>, new_name: &str) -> Result<()> {
        let target_dir = target
            .downcast_ref::<RamInode>()
            .ok_or(Error::new(Errno::EXDEV))?
            .this
            .upgrade()
            .unwrap();
        let moved = {
            let mut node = self.node.write();
            let entries = node.dir_mut()?;
            entries
                .remove(old_name)
                .ok_or(Error::new(Errno::ENOENT))?
        };
        let mut dst = if core::ptr::eq(self, &*target_dir) {
            // Same-directory rename reuses our own lock.
            self.node.write()
        } else {
            target_dir.node.write()
        };
        let entries = dst.dir_mut()?;
        // An existing destination is replaced.
        entries.insert(String::from(new_name), moved);
        dst.mtime = now();
        Ok(())
    }

    fn read_link(&self) -> Result<String> {
        match &self.node.read().inner {
            Inner::SymLink(target) => Ok(target.clone()),
            _ => return_errno!(Errno::EINVAL),
        }
    }

    fn write_link(&self, target: &str) -> Result<()> {
        let mut node = self.node.write();
        match &mut node.inner {
            Inner::SymLink(slot) => {
                *slot = String::from(target);
                Ok(())
            }
            _ => return_errno!(Errno::EINVAL),
        }
    }

    fn device_id(&self) -> Option<DeviceId> {
        match &self.node.read().inner {
            Inner::Device(id) => Some(*id),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn root(fs: &Arc<RamFS>) -> Arc<dyn Inode> {
        fs.root_inode()
    }

    #[test]
    fn create_write_read_unlink() {
        let fs = RamFS::new();
        let root = root(&fs);
        let file = root
            .create("hello", InodeType::File, InodeMode::from_bits_truncate(0o644))
            .unwrap();
        assert_eq!(file.write_at(0, b"hello\n").unwrap(), 6);
        let mut buf = [0u8; 6];
        assert_eq!(file.read_at(0, &mut buf).unwrap(), 6);
        assert_eq!(&buf, b"hello\n");
        assert_eq!(file.size(), 6);
        root.unlink("hello").unwrap();
        assert_eq!(root.lookup("hello").unwrap_err().error(), Errno::ENOENT);
    }

    #[test]
    fn sparse_write_zero_fills() {
        let fs = RamFS::new();
        let file = root(&fs)
            .create("sparse", InodeType::File, InodeMode::from_bits_truncate(0o644))
            .unwrap();
        file.write_at(10, b"end").unwrap();
        let mut buf = [0xffu8; 13];
        assert_eq!(file.read_at(0, &mut buf).unwrap(), 13);
        assert_eq!(&buf[..10], &[0u8; 10]);
        assert_eq!(&buf[10..], b"end");
    }

    #[test]
    fn rmdir_refuses_nonempty() {
        let fs = RamFS::new();
        let root = root(&fs);
        let dir = root
            .create("d", InodeType::Dir, InodeMode::from_bits_truncate(0o755))
            .unwrap();
        dir.create("f", InodeType::File, InodeMode::from_bits_truncate(0o644))
            .unwrap();
        assert_eq!(root.rmdir("d").unwrap_err().error(), Errno::ENOTEMPTY);
        dir.unlink("f").unwrap();
        root.rmdir("d").unwrap();
    }

    #[test]
    fn hard_link_shares_inode() {
        let fs = RamFS::new();
        let root = root(&fs);
        let file = root
            .create("a", InodeType::File, InodeMode::from_bits_truncate(0o644))
            .unwrap();
        root.link(&file, "b").unwrap();
        assert_eq!(file.metadata().nlinks, 2);
        file.write_at(0, b"shared").unwrap();
        let via_b = root.lookup("b").unwrap();
        let mut buf = [0u8; 6];
        via_b.read_at(0, &mut buf).unwrap();
        assert_eq!(&buf, b"shared");
        root.unlink("a").unwrap();
        assert_eq!(via_b.metadata().nlinks, 1);
    }

    #[test]
    fn symlink_roundtrip() {
        let fs = RamFS::new();
        let root = root(&fs);
        let link = root
            .create("l", InodeType::SymLink, InodeMode::from_bits_truncate(0o777))
            .unwrap();
        link.write_link("/target/path").unwrap();
        assert_eq!(link.read_link().unwrap(), "/target/path");
    }

    #[test]
    fn readdir_lists_dot_entries_then_children() {
        let fs = RamFS::new();
        let root = root(&fs);
        root.create("x", InodeType::File, InodeMode::from_bits_truncate(0o644))
            .unwrap();
        let mut entries: Vec<(String, u64, InodeType)> = Vec::new();
        root.readdir_at(0, &mut entries).unwrap();
        let names: Vec<&str> = entries.iter().map(|(n, _, _)| n.as_str()).collect();
        assert_eq!(names, [".", "..", "x"]);
    }
}
