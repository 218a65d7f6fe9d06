//! `/dev/pts`: pseudo-terminal slave nodes appear here as they are
//! allocated through `/dev/ptmx` and vanish when the pair dies.

use core::time::Duration;

use crate::{
    device::pty,
    fs::{
        device::{DeviceId, PTY_SLAVE_MAJOR},
        utils::{
            DirentVisitor, FileSystem, FsFlags, FsStats, Inode, InodeMode, InodeType,
            Metadata, NAME_MAX,
        },
    },
    prelude::*,
};

pub const DEVPTS_MAGIC: u64 = 0x1cd1;
const BLOCK_SIZE: usize = 1024;

pub struct DevPtsFS {
    this: Weak<DevPtsFS>,
}

impl DevPtsFS {
    pub fn new() -> Arc<Self> {
        Arc::new_cyclic(|this| Self { this: this.clone() })
    }
}

impl FileSystem for DevPtsFS {
    fn root_inode(&self) -> Arc<dyn Inode> {
        Arc::new(PtsNode {
            fs: self.this.clone(),
            index: None,
        })
    }

    fn stats(&self) -> FsStats {
        FsStats::new(DEVPTS_MAGIC, BLOCK_SIZE, NAME_MAX)
    }

    fn flags(&self) -> FsFlags {
        FsFlags::DENTRY_UNEVICTABLE
    }
}

/// Either the root directory (`index == None`) or one slave node.
struct PtsNode {
    fs: Weak<DevPtsFS>,
    index: Option<u32>,
}

impl Inode for PtsNode {
    fn ino(&self) -> u64 {
        match self.index {
            None => 1,
            Some(index) => 2 + index as u64,
        }
    }

    fn type_(&self) -> InodeType {
        match self.index {
            None => InodeType::Dir,
            Some(_) => InodeType::CharDevice,
        }
    }

    fn size(&self) -> usize {
        0
    }

    fn fs(&self) -> Arc<dyn FileSystem> {
        self.fs.upgrade().unwrap()
    }

    fn metadata(&self) -> Metadata {
        let (secs, nanos) = crate::time::wall_clock();
        let now = Duration::new(secs, nanos);
        let (type_, mode, rdev) = match self.index {
            None => (InodeType::Dir, 0o755, 0),
            Some(index) => (
                InodeType::CharDevice,
                0o620,
                DeviceId::new(PTY_SLAVE_MAJOR, index).as_encoded(),
            ),
        };
        Metadata {
            dev: 0,
            ino: self.ino(),
            size: 0,
            blk_size: BLOCK_SIZE,
            blocks: 0,
            atime: now,
            mtime: now,
            ctime: now,
            type_,
            mode: InodeMode::from_bits_truncate(mode),
            nlinks: 1,
            uid: 0,
            gid: 0,
            rdev,
        }
    }

    fn lookup(&self, name: &str) -> Result<Arc<dyn Inode>> {
        if self.index.is_some() {
            return_errno!(Errno::ENOTDIR);
        }
        let index: u32 = name.parse().map_err(|_| Error::new(Errno::ENOENT))?;
        if !pty::slave_exists(index) {
            return_errno!(Errno::ENOENT);
        }
        Ok(Arc::new(PtsNode {
            fs: self.fs.clone(),
            index: Some(index),
        }))
    }

    fn readdir_at(&self, offset: usize, visitor: &mut dyn DirentVisitor) -> Result<usize> {
        if self.index.is_some() {
            return_errno!(Errno::ENOTDIR);
        }
        let slaves = pty::registered_slaves();
        let mut next = offset;
        for (idx, slave) in slaves.iter().enumerate() {
            if idx < offset {
                continue;
            }
            visitor.visit(
                &alloc::format!("{}", slave),
                2 + *slave as u64,
                InodeType::CharDevice,
                idx + 1,
            )?;
            next = idx + 1;
        }
        Ok(next)
    }

    fn device_id(&self) -> Option<DeviceId> {
        self.index.map(|index| DeviceId::new(PTY_SLAVE_MAJOR, index))
    }
}
