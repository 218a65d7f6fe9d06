//! The VFS contract: inode and filesystem traits plus the common
//! attribute types every concrete filesystem shares.

mod flags;
mod fs;
mod inode;

pub use flags::{AccessMode, CreationFlags, SeekFrom, StatusFlags};
pub use fs::{FileSystem, FsFlags, FsStats};
pub use inode::{Inode, InodeMode, InodeType, Metadata};

/// Longest permitted file name component.
pub const NAME_MAX: usize = 255;
/// Longest permitted path.
pub const PATH_MAX: usize = 4096;
/// Symbolic links followed before `ELOOP`.
pub const SYMLINK_MAX: usize = 40;

/// Callback used by `readdir_at` to hand directory entries out one at
/// a time; `offset` is the cookie to resume iteration after the entry.
pub trait DirentVisitor {
    fn visit(&mut self, name: &str, ino: u64, type_: InodeType, offset: usize) -> crate::prelude::Result<()>;
}

/// Collects entries into a vector, for in-kernel directory scans.
impl DirentVisitor for alloc::vec::Vec<(alloc::string::String, u64, InodeType)> {
    fn visit(&mut self, name: &str, ino: u64, type_: InodeType, _offset: usize) -> crate::prelude::Result<()> {
        self.push((alloc::string::String::from(name), ino, type_));
        Ok(())
    }
}
