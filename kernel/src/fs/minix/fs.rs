//! Superblock handling, bitmap allocation and the inode cache.

use super::{inode::MinixInode, *};
use crate::{
    fs::{
        buffer::{self, BufferHead},
        device::DeviceId,
        utils::{FileSystem, FsStats, Inode, InodeMode, InodeType},
    },
    prelude::*,
};

/// Parsed superblock, block 1 on disk.
#[derive(Debug, Clone, Copy)]
pub(super) struct RawSuper {
    pub ninodes: u16,
    pub nzones: u16,
    pub imap_blocks: u16,
    pub zmap_blocks: u16,
    pub firstdatazone: u16,
    pub log_zone_size: u16,
    pub max_size: u32,
    pub magic: u16,
}

impl RawSuper {
    fn parse(buf: &[u8]) -> Result<Self> {
        let sb = Self {
            ninodes: get_u16(buf, 0),
            nzones: get_u16(buf, 2),
            imap_blocks: get_u16(buf, 4),
            zmap_blocks: get_u16(buf, 6),
            firstdatazone: get_u16(buf, 8),
            log_zone_size: get_u16(buf, 10),
            max_size: get_u32(buf, 12),
            magic: get_u16(buf, 16),
        };
        if sb.magic != MINIX_MAGIC {
            return_errno_with_message!(Errno::EINVAL, "bad minix magic");
        }
        if sb.log_zone_size != 0 {
            return_errno_with_message!(Errno::EINVAL, "unsupported zone size");
        }
        Ok(sb)
    }

    fn write(&self, buf: &mut [u8]) {
        put_u16(buf, 0, self.ninodes);
        put_u16(buf, 2, self.nzones);
        put_u16(buf, 4, self.imap_blocks);
        put_u16(buf, 6, self.zmap_blocks);
        put_u16(buf, 8, self.firstdatazone);
        put_u16(buf, 10, self.log_zone_size);
        put_u32(buf, 12, self.max_size);
        put_u16(buf, 16, self.magic);
    }

    /// First block of the inode table.
    pub fn inode_table_start(&self) -> u32 {
        2 + self.imap_blocks as u32 + self.zmap_blocks as u32
    }
}

pub struct MinixFS {
    dev: DeviceId,
    sb: SpinLock<RawSuper>,
    inode_cache: SpinLock<BTreeMap<u32, Weak<MinixInode>>>,
    this: Weak<MinixFS>,
}

impl MinixFS {
    pub fn open(dev: DeviceId) -> Result<Arc<Self>> {
        let bh = buffer::bread(dev, 1, BLOCK_SIZE)?;
        let raw = bh.with_data(|data| RawSuper::parse(data))?;
        Ok(Arc::new_cyclic(|this| Self {
            dev,
            sb: SpinLock::new(raw),
            inode_cache: SpinLock::new(BTreeMap::new()),
            this: this.clone(),
        }))
    }

    /// Lay a fresh filesystem onto `dev` (the install tool's mkfs,
    /// also what the tests format their ram disks with).
    pub fn format(dev: DeviceId, nblocks: u32, ninodes: u16) -> Result<()> {
        let imap_blocks = (ninodes as u32 + 1).div_ceil(BLOCK_SIZE as u32 * 8) as u16;
        let itable_blocks = (ninodes as u32).div_ceil(INODES_PER_BLOCK as u32);
        let zmap_blocks = nblocks.div_ceil(BLOCK_SIZE as u32 * 8) as u16;
        let firstdatazone = 2 + imap_blocks as u32 + zmap_blocks as u32 + itable_blocks;
        let raw = RawSuper {
            ninodes,
            nzones: nblocks as u16,
            imap_blocks,
            zmap_blocks,
            firstdatazone: firstdatazone as u16,
            log_zone_size: 0,
            max_size: (NR_DIRECT + PTRS_PER_BLOCK + PTRS_PER_BLOCK * PTRS_PER_BLOCK) as u32
                * BLOCK_SIZE as u32,
            magic: MINIX_MAGIC,
        };
        let sb_bh = buffer::getblk(dev, 1, BLOCK_SIZE)?;
        sb_bh.with_data(|data| {
            data.fill(0);
            raw.write(data);
        });
        sb_bh.mark_dirty();
        // Zero both bitmaps, then reserve slot 0 of each (never valid)
        // and inode 1 plus the root directory zone.
        for i in 0..(imap_blocks + zmap_blocks) as u32 {
            let bh = buffer::getblk(dev, 2 + i, BLOCK_SIZE)?;
            bh.with_data(|data| data.fill(0));
            bh.mark_dirty();
        }
        let imap = buffer::getblk(dev, 2, BLOCK_SIZE)?;
        imap.with_data(|data| data[0] |= 0b11); // slot 0 + root inode
        imap.mark_dirty();
        let zmap = buffer::getblk(dev, 2 + imap_blocks as u32, BLOCK_SIZE)?;
        zmap.with_data(|data| data[0] |= 0b11); // slot 0 + root dir zone
        zmap.mark_dirty();
        // Root inode: a directory with "." and "..".
        let itable = raw.inode_table_start();
        let root_bh = buffer::getblk(dev, itable, BLOCK_SIZE)?;
        root_bh.with_data(|data| {
            data.fill(0);
            let off = 0; // inode 1 is the first slot
            put_u16(data, off, 0o040755);
            put_u32(data, off + 4, (2 * DIRENT_SIZE) as u32);
            data[off + 13] = 2; // nlinks
            put_u16(data, off + 14, firstdatazone as u16);
        });
        root_bh.mark_dirty();
        let root_zone = buffer::getblk(dev, firstdatazone, BLOCK_SIZE)?;
        root_zone.with_data(|data| {
            data.fill(0);
            put_u16(data, 0, ROOT_INO as u16);
            data[2..3].copy_from_slice(b".");
            put_u16(data, DIRENT_SIZE, ROOT_INO as u16);
            data[DIRENT_SIZE + 2..DIRENT_SIZE + 4].copy_from_slice(b"..");
        });
        root_zone.mark_dirty();
        buffer::bsync_dev(dev)
    }

    pub(super) fn dev(&self) -> DeviceId {
        self.dev
    }

    pub(super) fn this(&self) -> Arc<MinixFS> {
        self.this.upgrade().unwrap()
    }

    /// `iget`: one in-memory inode per on-disk inode number.
    pub(super) fn get_inode(&self, ino: u32) -> Result<Arc<MinixInode>> {
        let mut cache = self.inode_cache.lock();
        if let Some(inode) = cache.get(&ino).and_then(|weak| weak.upgrade()) {
            return Ok(inode);
        }
        let inode = MinixInode::load(&self.this(), ino)?;
        cache.insert(ino, Arc::downgrade(&inode));
        Ok(inode)
    }

    pub(super) fn drop_cached(&self, ino: u32) {
        self.inode_cache.lock().remove(&ino);
    }

    /// The buffer and byte offset holding on-disk inode `ino`.
    pub(super) fn inode_block(&self, ino: u32) -> Result<(Arc<BufferHead>, usize)> {
        let sb = self.sb.lock();
        if ino == 0 || ino > sb.ninodes as u32 {
            return_errno!(Errno::EINVAL);
        }
        let index = (ino - 1) as usize;
        let block = sb.inode_table_start() + (index / INODES_PER_BLOCK) as u32;
        drop(sb);
        let bh = buffer::bread(self.dev, block, BLOCK_SIZE)?;
        Ok((bh, (index % INODES_PER_BLOCK) * INODE_SIZE))
    }

    fn bitmap_alloc(&self, map_start: u32, map_blocks: u16, limit: u32) -> Result<u32> {
        for map_block in 0..map_blocks as u32 {
            let bh = buffer::bread(self.dev, map_start + map_block, BLOCK_SIZE)?;
            let found = bh.with_data(|data| {
                for (byte_idx, byte) in data.iter_mut().enumerate() {
                    if *byte == 0xff {
                        continue;
                    }
                    let bit = byte.trailing_ones() as usize;
                    let index = map_block as usize * BLOCK_SIZE * 8 + byte_idx * 8 + bit;
                    if index as u32 >= limit {
                        return None;
                    }
                    *byte |= 1 << bit;
                    return Some(index as u32);
                }
                None
            });
            if let Some(index) = found {
                bh.mark_dirty();
                return Ok(index);
            }
        }
        return_errno_with_message!(Errno::ENOSPC, "minix bitmap exhausted")
    }

    fn bitmap_free(&self, map_start: u32, index: u32) -> Result<()> {
        let block = map_start + index / (BLOCK_SIZE as u32 * 8);
        let bh = buffer::bread(self.dev, block, BLOCK_SIZE)?;
        let in_block = (index % (BLOCK_SIZE as u32 * 8)) as usize;
        bh.with_data(|data| {
            let mask = 1u8 << (in_block % 8);
            assert!(data[in_block / 8] & mask != 0, "minix double free");
            data[in_block / 8] &= !mask;
        });
        bh.mark_dirty();
        Ok(())
    }

    pub(super) fn alloc_inode(&self) -> Result<u32> {
        let limit = self.sb.lock().ninodes as u32 + 1;
        self.bitmap_alloc(2, self.sb.lock().imap_blocks, limit)
    }

    pub(super) fn free_inode(&self, ino: u32) -> Result<()> {
        self.bitmap_free(2, ino)
    }

    /// Allocate a data zone, preferring the neighbourhood of `goal`.
    /// The simple scan starts over when the goal area is full.
    pub(super) fn alloc_zone(&self, _goal: u32) -> Result<u32> {
        let (zmap_start, zmap_blocks, firstdatazone, nzones) = {
            let sb = self.sb.lock();
            (
                2 + sb.imap_blocks as u32,
                sb.zmap_blocks,
                sb.firstdatazone as u32,
                sb.nzones as u32,
            )
        };
        let index = self.bitmap_alloc(zmap_start, zmap_blocks, nzones - firstdatazone + 1)?;
        let zone = firstdatazone + index - 1;
        // Fresh zones read back as zeroes.
        let bh = buffer::getblk(self.dev, zone, BLOCK_SIZE)?;
        bh.with_data(|data| data.fill(0));
        bh.mark_dirty();
        Ok(zone)
    }

    pub(super) fn free_zone(&self, zone: u32) -> Result<()> {
        let (zmap_start, firstdatazone) = {
            let sb = self.sb.lock();
            (2 + sb.imap_blocks as u32, sb.firstdatazone as u32)
        };
        self.bitmap_free(zmap_start, zone - firstdatazone + 1)
    }
}

impl FileSystem for MinixFS {
    fn root_inode(&self) -> Arc<dyn Inode> {
        self.get_inode(ROOT_INO).expect("minix root inode unreadable")
    }

    fn stats(&self) -> FsStats {
        let raw = self.sb.lock();
        let mut stats = FsStats::new(MINIX_MAGIC as u64, BLOCK_SIZE, NAME_LEN);
        stats.total_blocks = raw.nzones as usize;
        stats.total_inodes = raw.ninodes as usize;
        stats
    }

    fn block_device(&self) -> Option<DeviceId> {
        Some(self.dev)
    }
}

impl Debug for MinixFS {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("MinixFS").field("dev", &self.dev).finish()
    }
}

// InodeMode/InodeType conversions shared with the inode module.
pub(super) fn split_mode(raw: u16) -> Result<(InodeType, InodeMode)> {
    Ok((
        InodeType::from_mode_bits(raw)?,
        InodeMode::from_bits_truncate(raw),
    ))
}

pub(super) fn join_mode(type_: InodeType, mode: InodeMode) -> u16 {
    type_.as_mode_bits() | (mode.bits() & 0o7777)
}
