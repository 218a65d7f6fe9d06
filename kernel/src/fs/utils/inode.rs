use core::time::Duration;

use super::{DirentVisitor, FileSystem};
use crate::{
    events::{IoEvents, Poller},
    fs::device::DeviceId,
    prelude::*,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InodeType {
    NamedPipe,
    CharDevice,
    Dir,
    BlockDevice,
    File,
    SymLink,
    Socket,
}

impl InodeType {
    /// The S_IFMT nibble of a `mode_t`.
    pub fn as_mode_bits(&self) -> u16 {
        match self {
            InodeType::NamedPipe => 0o010000,
            InodeType::CharDevice => 0o020000,
            InodeType::Dir => 0o040000,
            InodeType::BlockDevice => 0o060000,
            InodeType::File => 0o100000,
            InodeType::SymLink => 0o120000,
            InodeType::Socket => 0o140000,
        }
    }

    pub fn from_mode_bits(mode: u16) -> Result<Self> {
        match mode & 0o170000 {
            0o010000 => Ok(InodeType::NamedPipe),
            0o020000 => Ok(InodeType::CharDevice),
            0o040000 => Ok(InodeType::Dir),
            0o060000 => Ok(InodeType::BlockDevice),
            0o100000 => Ok(InodeType::File),
            0o120000 => Ok(InodeType::SymLink),
            0o140000 => Ok(InodeType::Socket),
            _ => return_errno_with_message!(Errno::EINVAL, "invalid file type bits"),
        }
    }

    pub fn is_regular_file(&self) -> bool {
        *self == InodeType::File
    }

    pub fn is_directory(&self) -> bool {
        *self == InodeType::Dir
    }

    pub fn is_device(&self) -> bool {
        matches!(self, InodeType::CharDevice | InodeType::BlockDevice)
    }
}

bitflags! {
    /// Permission and attribute bits of a `mode_t` (the low 12 bits).
    pub struct InodeMode: u16 {
        const S_ISUID = 0o4000;
        const S_ISGID = 0o2000;
        const S_ISVTX = 0o1000;
        const S_IRUSR = 0o0400;
        const S_IWUSR = 0o0200;
        const S_IXUSR = 0o0100;
        const S_IRGRP = 0o0040;
        const S_IWGRP = 0o0020;
        const S_IXGRP = 0o0010;
        const S_IROTH = 0o0004;
        const S_IWOTH = 0o0002;
        const S_IXOTH = 0o0001;
    }
}

impl InodeMode {
    pub fn is_readable(&self) -> bool {
        self.contains(InodeMode::S_IRUSR)
    }

    pub fn is_writable(&self) -> bool {
        self.contains(InodeMode::S_IWUSR)
    }

    pub fn is_executable(&self) -> bool {
        self.contains(InodeMode::S_IXUSR)
    }
}

/// The stat-shaped snapshot of an inode.
#[derive(Debug, Clone, Copy)]
pub struct Metadata {
    pub dev: u64,
    pub ino: u64,
    pub size: usize,
    pub blk_size: usize,
    pub blocks: usize,
    pub atime: Duration,
    pub mtime: Duration,
    pub ctime: Duration,
    pub type_: InodeType,
    pub mode: InodeMode,
    pub nlinks: usize,
    pub uid: u32,
    pub gid: u32,
    pub rdev: u64,
}

impl Metadata {
    pub fn new_dir(ino: u64, mode: InodeMode, blk_size: usize) -> Self {
        Self {
            dev: 0,
            ino,
            size: 2,
            blk_size,
            blocks: 1,
            atime: Duration::ZERO,
            mtime: Duration::ZERO,
            ctime: Duration::ZERO,
            type_: InodeType::Dir,
            mode,
            nlinks: 2,
            uid: 0,
            gid: 0,
            rdev: 0,
        }
    }

    pub fn new_file(ino: u64, mode: InodeMode, blk_size: usize) -> Self {
        Self {
            dev: 0,
            ino,
            size: 0,
            blk_size,
            blocks: 0,
            atime: Duration::ZERO,
            mtime: Duration::ZERO,
            ctime: Duration::ZERO,
            type_: InodeType::File,
            mode,
            nlinks: 1,
            uid: 0,
            gid: 0,
            rdev: 0,
        }
    }

    pub fn new_symlink(ino: u64, blk_size: usize) -> Self {
        Self {
            type_: InodeType::SymLink,
            mode: InodeMode::from_bits_truncate(0o777),
            ..Self::new_file(ino, InodeMode::from_bits_truncate(0o777), blk_size)
        }
    }

    pub fn new_device(ino: u64, type_: InodeType, mode: InodeMode, rdev: u64) -> Self {
        Self {
            rdev,
            type_,
            ..Self::new_file(ino, mode, 512)
        }
    }
}

/// The per-object operations every filesystem implements. Defaults
/// return the error a file of the wrong kind would: callers need not
/// pre-check types.
pub trait Inode: Any + Send + Sync {
    fn ino(&self) -> u64;

    fn type_(&self) -> InodeType;

    fn metadata(&self) -> Metadata;

    fn size(&self) -> usize;

    fn fs(&self) -> Arc<dyn FileSystem>;

    fn resize(&self, _new_size: usize) -> Result<()> {
        return_errno!(Errno::EISDIR)
    }

    fn mode(&self) -> InodeMode {
        self.metadata().mode
    }

    fn set_mode(&self, _mode: InodeMode) -> Result<()> {
        return_errno!(Errno::EPERM)
    }

    fn set_owner(&self, _uid: u32, _gid: u32) -> Result<()> {
        return_errno!(Errno::EPERM)
    }

    fn atime(&self) -> Duration {
        self.metadata().atime
    }

    fn set_atime(&self, _time: Duration) {}

    fn mtime(&self) -> Duration {
        self.metadata().mtime
    }

    fn set_mtime(&self, _time: Duration) {}

    fn read_at(&self, _offset: usize, _buf: &mut [u8]) -> Result<usize> {
        return_errno!(Errno::EISDIR)
    }

    fn write_at(&self, _offset: usize, _buf: &[u8]) -> Result<usize> {
        return_errno!(Errno::EISDIR)
    }

    fn create(&self, _name: &str, _type_: InodeType, _mode: InodeMode) -> Result<Arc<dyn Inode>> {
        return_errno!(Errno::ENOTDIR)
    }

    fn mknod(
        &self,
        _name: &str,
        _type_: InodeType,
        _mode: InodeMode,
        _dev: DeviceId,
    ) -> Result<Arc<dyn Inode>> {
        return_errno!(Errno::ENOTDIR)
    }

    fn lookup(&self, _name: &str) -> Result<Arc<dyn Inode>> {
        return_errno!(Errno::ENOTDIR)
    }

    fn readdir_at(&self, _offset: usize, _visitor: &mut dyn DirentVisitor) -> Result<usize> {
        return_errno!(Errno::ENOTDIR)
    }

    fn link(&self, _old: &Arc<dyn Inode>, _name: &str) -> Result<()> {
        return_errno!(Errno::ENOTDIR)
    }

    fn unlink(&self, _name: &str) -> Result<()> {
        return_errno!(Errno::ENOTDIR)
    }

    fn rmdir(&self, _name: &str) -> Result<()> {
        return_errno!(Errno::ENOTDIR)
    }

    fn rename(&self, _old_name: &str, _target: &Arc<dyn Inode>, _new_name: &str) -> Result<()> {
        return_errno!(Errno::ENOTDIR)
    }

    fn read_link(&self) -> Result<String> {
        return_errno!(Errno::EINVAL)
    }

    fn write_link(&self, _target: &str) -> Result<()> {
        return_errno!(Errno::EINVAL)
    }

    fn ioctl(&self, _cmd: u32, _arg: usize) -> Result<i32> {
        return_errno!(Errno::ENOIOCTLCMD)
    }

    fn sync(&self) -> Result<()> {
        Ok(())
    }

    fn poll(&self, mask: IoEvents, _poller: Option<&Poller>) -> IoEvents {
        (IoEvents::IN | IoEvents::OUT) & mask
    }

    /// File-block to device-block translation (the loop device's view
    /// of a backing file).
    fn bmap(&self, _block: u32) -> Result<u32> {
        return_errno!(Errno::EINVAL)
    }

    /// The registered device behind a device node.
    fn device_id(&self) -> Option<DeviceId> {
        None
    }
}

impl dyn Inode {
    pub fn downcast_ref<T: Inode>(&self) -> Option<&T> {
        (self as &dyn Any).downcast_ref::<T>()
    }
}

impl Debug for dyn Inode {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        f.debug_struct("Inode")
            .field("ino", &self.ino())
            .field("type", &self.type_())
            .finish_non_exhaustive()
    }
}
