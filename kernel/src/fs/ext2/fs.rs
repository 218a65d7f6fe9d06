//! Mount state, block-group allocation and the inode cache.

use super::{
    inode::Ext2Inode,
    super_block::{GroupDesc, RawSuper},
    *,
};
use crate::{
    fs::{
        buffer::{self, BufferHead},
        device::DeviceId,
        utils::{FileSystem, FsStats, Inode, NAME_MAX},
    },
    prelude::*,
};

pub struct Ext2 {
    dev: DeviceId,
    sb: SpinLock<RawSuper>,
    inode_cache: SpinLock<BTreeMap<u32, Weak<Ext2Inode>>>,
    this: Weak<Ext2>,
}

impl Ext2 {
    pub fn open(dev: DeviceId) -> Result<Arc<Self>> {
        // Superblock lives at byte 1024, which is block 1 here.
        let bh = buffer::bread(dev, (SUPERBLOCK_OFFSET / BLOCK_SIZE) as u32, BLOCK_SIZE)?;
        let raw = bh.with_data(|data| RawSuper::parse(data))?;
        Ok(Arc::new_cyclic(|this| Self {
            dev,
            sb: SpinLock::new(raw),
            inode_cache: SpinLock::new(BTreeMap::new()),
            this: this.clone(),
        }))
    }

    /// mkfs: one block group laid out as
    /// `boot | super | group desc | block bitmap | inode bitmap |
    ///  inode table | data...`.
    pub fn format(dev: DeviceId, nblocks: u32, ninodes: u32) -> Result<()> {
        assert!(nblocks as usize <= BLOCK_SIZE * 8, "single group only");
        let itable_blocks = ninodes.div_ceil((BLOCK_SIZE / INODE_SIZE) as u32);
        let block_bitmap = 3u32;
        let inode_bitmap = 4u32;
        let inode_table = 5u32;
        let first_free = inode_table + itable_blocks;

        let raw = RawSuper {
            inodes_count: ninodes,
            blocks_count: nblocks,
            free_blocks_count: nblocks - first_free,
            free_inodes_count: ninodes - FIRST_FREE_INO + 1,
            first_data_block: 1,
            log_block_size: 0,
            blocks_per_group: (BLOCK_SIZE * 8) as u32,
            inodes_per_group: ninodes,
            magic: EXT2_MAGIC,
        };
        let sb_bh = buffer::getblk(dev, 1, BLOCK_SIZE)?;
        sb_bh.with_data(|data| {
            data.fill(0);
            raw.write(data);
        });
        sb_bh.mark_dirty();

        let group = GroupDesc {
            block_bitmap,
            inode_bitmap,
            inode_table,
            free_blocks_count: (nblocks - first_free) as u16,
            free_inodes_count: (ninodes - FIRST_FREE_INO + 1) as u16,
            used_dirs_count: 1,
        };
        let gd_bh = buffer::getblk(dev, 2, BLOCK_SIZE)?;
        gd_bh.with_data(|data| {
            data.fill(0);
            group.write(data, 0);
        });
        gd_bh.mark_dirty();

        // Block bitmap: metadata and the root-dir block busy, the
        // tail beyond the device marked busy too.
        let root_block = first_free;
        let bb_bh = buffer::getblk(dev, block_bitmap, BLOCK_SIZE)?;
        bb_bh.with_data(|data| {
            data.fill(0);
            // Bit b stands for block b + first_data_block.
            for block in 1..=root_block {
                let bit = block - 1;
                data[(bit / 8) as usize] |= 1 << (bit % 8);
            }
            for bit in (nblocks - 1)..(BLOCK_SIZE * 8) as u32 {
                data[(bit / 8) as usize] |= 1 << (bit % 8);
            }
        });
        bb_bh.mark_dirty();

        // Inode bitmap: reserved inodes 1..=10 busy.
        let ib_bh = buffer::getblk(dev, inode_bitmap, BLOCK_SIZE)?;
        ib_bh.with_data(|data| {
            data.fill(0);
            for ino in 0..FIRST_FREE_INO - 1 {
                data[(ino / 8) as usize] |= 1 << (ino % 8);
            }
            for ino in ninodes..(BLOCK_SIZE * 8) as u32 {
                data[(ino / 8) as usize] |= 1 << (ino % 8);
            }
        });
        ib_bh.mark_dirty();

        for block in inode_table..first_free {
            let bh = buffer::getblk(dev, block, BLOCK_SIZE)?;
            bh.with_data(|data| data.fill(0));
            bh.mark_dirty();
        }

        // Root inode (2): directory with "." and "..".
        let root_off = (ROOT_INO - 1) as usize * INODE_SIZE;
        let it_bh = buffer::getblk(dev, inode_table, BLOCK_SIZE)?;
        it_bh.with_data(|data| {
            put_u16(data, root_off, 0o040755);
            put_u32(data, root_off + 4, BLOCK_SIZE as u32);
            put_u16(data, root_off + 26, 2); // "." and ".."
            put_u32(data, root_off + 28, (BLOCK_SIZE / 512) as u32);
            put_u32(data, root_off + 40, root_block);
        });
        it_bh.mark_dirty();

        let rd_bh = buffer::getblk(dev, root_block, BLOCK_SIZE)?;
        rd_bh.with_data(|data| {
            data.fill(0);
            // ".": inode 2, rec_len 12.
            put_u32(data, 0, ROOT_INO);
            put_u16(data, 4, 12);
            data[6] = 1;
            data[7] = DirFileType::Dir as u8;
            data[8] = b'.';
            // "..": inode 2, rec_len spans the rest of the block.
            put_u32(data, 12, ROOT_INO);
            put_u16(data, 16, (BLOCK_SIZE - 12) as u16);
            data[18] = 2;
            data[19] = DirFileType::Dir as u8;
            data[20] = b'.';
            data[21] = b'.';
        });
        rd_bh.mark_dirty();
        buffer::bsync_dev(dev)
    }

    pub(super) fn dev(&self) -> DeviceId {
        self.dev
    }

    pub(super) fn this(&self) -> Arc<Ext2> {
        self.this.upgrade().unwrap()
    }

    pub(super) fn get_inode(&self, ino: u32) -> Result<Arc<Ext2Inode>> {
        let mut cache = self.inode_cache.lock();
        if let Some(inode) = cache.get(&ino).and_then(|weak| weak.upgrade()) {
            return Ok(inode);
        }
        let inode = Ext2Inode::load(&self.this(), ino)?;
        cache.insert(ino, Arc::downgrade(&inode));
        Ok(inode)
    }

    pub(super) fn drop_cached(&self, ino: u32) {
        self.inode_cache.lock().remove(&ino);
    }

    fn group_desc(&self, group: usize) -> Result<GroupDesc> {
        let block = self.sb.lock().group_desc_block();
        let bh = buffer::bread(self.dev, block, BLOCK_SIZE)?;
        Ok(bh.with_data(|data| GroupDesc::parse(data, group)))
    }

    fn update_group_desc(&self, group: usize, desc: &GroupDesc) -> Result<()> {
        let block = self.sb.lock().group_desc_block();
        let bh = buffer::bread(self.dev, block, BLOCK_SIZE)?;
        bh.with_data(|data| desc.write(data, group));
        bh.mark_dirty();
        Ok(())
    }

    fn flush_super(&self) -> Result<()> {
        let raw = *self.sb.lock();
        let bh = buffer::bread(self.dev, 1, BLOCK_SIZE)?;
        bh.with_data(|data| raw.write(data));
        bh.mark_dirty();
        Ok(())
    }

    /// The buffer and offset holding on-disk inode `ino`.
    pub(super) fn inode_slot(&self, ino: u32) -> Result<(Arc<BufferHead>, usize)> {
        let sb = self.sb.lock();
        if ino == 0 || ino > sb.inodes_count {
            return_errno!(Errno::EINVAL);
        }
        let per_group = sb.inodes_per_group;
        drop(sb);
        let group = ((ino - 1) / per_group) as usize;
        let index = ((ino - 1) % per_group) as usize;
        let desc = self.group_desc(group)?;
        let per_block = BLOCK_SIZE / INODE_SIZE;
        let block = desc.inode_table + (index / per_block) as u32;
        let bh = buffer::bread(self.dev, block, BLOCK_SIZE)?;
        Ok((bh, (index % per_block) * INODE_SIZE))
    }

    fn bitmap_find_and_set(&self, bitmap_block: u32, prefer: Option<u32>) -> Result<u32> {
        let bh = buffer::bread(self.dev, bitmap_block, BLOCK_SIZE)?;
        let found = bh.with_data(|data| {
            // Try right after the preferred bit first.
            if let Some(goal) = prefer {
                let byte = (goal / 8) as usize;
                for (idx, b) in data.iter_mut().enumerate().skip(byte) {
                    if *b != 0xff {
                        let bit = b.trailing_ones() as usize;
                        *b |= 1 << bit;
                        return Some((idx * 8 + bit) as u32);
                    }
                }
            }
            for (idx, b) in data.iter_mut().enumerate() {
                if *b != 0xff {
                    let bit = b.trailing_ones() as usize;
                    *b |= 1 << bit;
                    return Some((idx * 8 + bit) as u32);
                }
            }
            None
        });
        match found {
            Some(index) => {
                bh.mark_dirty();
                Ok(index)
            }
            None => return_errno_with_message!(Errno::ENOSPC, "ext2 bitmap exhausted"),
        }
    }

    fn bitmap_clear(&self, bitmap_block: u32, index: u32) -> Result<()> {
        let bh = buffer::bread(self.dev, bitmap_block, BLOCK_SIZE)?;
        bh.with_data(|data| {
            let mask = 1u8 << (index % 8);
            assert!(data[(index / 8) as usize] & mask != 0, "ext2 double free");
            data[(index / 8) as usize] &= !mask;
        });
        bh.mark_dirty();
        Ok(())
    }

    /// Allocate one data block, preferring the group and neighbourhood
    /// of `goal` (the inode's last mapped block).
    pub(super) fn alloc_block(&self, goal: u32) -> Result<u32> {
        let (first_data, per_group, groups) = {
            let sb = self.sb.lock();
            (
                sb.first_data_block,
                sb.blocks_per_group,
                sb.group_count(),
            )
        };
        let goal_group = if goal >= first_data {
            (((goal - first_data) / per_group) as usize).min(groups - 1)
        } else {
            0
        };
        for offset in 0..groups {
            let group = (goal_group + offset) % groups;
            let mut desc = self.group_desc(group)?;
            if desc.free_blocks_count == 0 {
                continue;
            }
            let prefer = if offset == 0 && goal >= first_data {
                Some((goal - first_data) % per_group)
            } else {
                None
            };
            let Ok(index) = self.bitmap_find_and_set(desc.block_bitmap, prefer) else {
                continue;
            };
            desc.free_blocks_count -= 1;
            self.update_group_desc(group, &desc)?;
            {
                let mut sb = self.sb.lock();
                sb.free_blocks_count -= 1;
            }
            self.flush_super()?;
            let block = first_data + group as u32 * per_group + index;
            let bh = buffer::getblk(self.dev, block, BLOCK_SIZE)?;
            bh.with_data(|data| data.fill(0));
            bh.mark_dirty();
            return Ok(block);
        }
        return_errno_with_message!(Errno::ENOSPC, "ext2: no free blocks")
    }

    pub(super) fn free_block(&self, block: u32) -> Result<()> {
        let (first_data, per_group) = {
            let sb = self.sb.lock();
            (sb.first_data_block, sb.blocks_per_group)
        };
        let group = ((block - first_data) / per_group) as usize;
        let index = (block - first_data) % per_group;
        let mut desc = self.group_desc(group)?;
        self.bitmap_clear(desc.block_bitmap, index)?;
        desc.free_blocks_count += 1;
        self.update_group_desc(group, &desc)?;
        let mut sb = self.sb.lock();
        sb.free_blocks_count += 1;
        drop(sb);
        self.flush_super()
    }

    pub(super) fn alloc_inode(&self, is_dir: bool) -> Result<u32> {
        let (per_group, groups) = {
            let sb = self.sb.lock();
            (sb.inodes_per_group, sb.group_count())
        };
        for group in 0..groups {
            let mut desc = self.group_desc(group)?;
            if desc.free_inodes_count == 0 {
                continue;
            }
            let Ok(index) = self.bitmap_find_and_set(desc.inode_bitmap, None) else {
                continue;
            };
            desc.free_inodes_count -= 1;
            if is_dir {
                desc.used_dirs_count += 1;
            }
            self.update_group_desc(group, &desc)?;
            {
                let mut sb = self.sb.lock();
                sb.free_inodes_count -= 1;
            }
            self.flush_super()?;
            return Ok(group as u32 * per_group + index + 1);
        }
        return_errno_with_message!(Errno::ENOSPC, "ext2: no free inodes")
    }

    pub(super) fn free_inode(&self, ino: u32, was_dir: bool) -> Result<()> {
        let per_group = self.sb.lock().inodes_per_group;
        let group = ((ino - 1) / per_group) as usize;
        let index = (ino - 1) % per_group;
        let mut desc = self.group_desc(group)?;
        self.bitmap_clear(desc.inode_bitmap, index)?;
        desc.free_inodes_count += 1;
        if was_dir {
            desc.used_dirs_count -= 1;
        }
        self.update_group_desc(group, &desc)?;
        let mut sb = self.sb.lock();
        sb.free_inodes_count += 1;
        drop(sb);
        self.flush_super()
    }
}

impl FileSystem for Ext2 {
    fn root_inode(&self) -> Arc<dyn Inode> {
        self.get_inode(ROOT_INO).expect("ext2 root inode unreadable")
    }

    fn stats(&self) -> FsStats {
        let raw = self.sb.lock();
        FsStats {
            total_blocks: raw.blocks_count as usize,
            free_blocks: raw.free_blocks_count as usize,
            total_inodes: raw.inodes_count as usize,
            free_inodes: raw.free_inodes_count as usize,
            ..FsStats::new(EXT2_MAGIC as u64, BLOCK_SIZE, NAME_MAX)
        }
    }

    fn block_device(&self) -> Option<DeviceId> {
        Some(self.dev)
    }

    /// The in-memory superblock counters go out with the data.
    fn sync(&self) -> Result<()> {
        self.flush_super()?;
        buffer::bsync_dev(self.dev)
    }
}

impl Debug for Ext2 {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Ext2").field("dev", &self.dev).finish()
    }
}
