//! The per-mount filesystem contract.
//!
//! Ferrite filesystems come in two shapes: block-backed ones (minix,
//! ext2, iso9660) whose durability runs through the buffer cache, and
//! memory-only trees (ramfs, procfs, devpts) with nothing to flush.
//! The trait encodes that split directly: a filesystem names its
//! backing device and inherits a sync that pushes that device's dirty
//! buffers out.

use super::Inode;
use crate::{fs::device::DeviceId, prelude::*};

/// Capacity and naming limits a mounted filesystem reports, the raw
/// material for statfs and `/proc/mounts`. Memory-only filesystems
/// leave the block and inode counts at zero.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsStats {
    pub magic: u64,
    pub block_size: usize,
    pub name_max: usize,
    pub total_blocks: usize,
    pub free_blocks: usize,
    pub total_inodes: usize,
    pub free_inodes: usize,
}

impl FsStats {
    pub fn new(magic: u64, block_size: usize, name_max: usize) -> Self {
        Self {
            magic,
            block_size,
            name_max,
            ..Self::default()
        }
    }
}

bitflags! {
    pub struct FsFlags: u32 {
        /// Dentries are the only thing keeping these inodes alive;
        /// the cache must never evict them.
        const DENTRY_UNEVICTABLE = 1 << 0;
        /// No write ever reaches this filesystem.
        const READ_ONLY = 1 << 1;
    }
}

pub trait FileSystem: Any + Sync + Send {
    fn root_inode(&self) -> Arc<dyn Inode>;

    fn stats(&self) -> FsStats;

    fn flags(&self) -> FsFlags {
        FsFlags::empty()
    }

    /// The block device this filesystem lives on, when it has one.
    fn block_device(&self) -> Option<DeviceId> {
        None
    }

    /// Push everything dirty to stable storage. The default covers
    /// block-backed filesystems by draining their device's dirty
    /// buffers; memory-only trees have nothing to do.
    fn sync(&self) -> Result<()> {
        match self.block_device() {
            Some(dev) => crate::fs::buffer::bsync_dev(dev),
            None => Ok(()),
        }
    }
}

impl Debug for dyn FileSystem {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        f.debug_struct("FileSystem")
            .field("magic", &self.stats().magic)
            .field("dev", &self.block_device())
            .field("flags", &self.flags())
            .finish()
    }
}
