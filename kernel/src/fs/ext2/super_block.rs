//! Superblock and block-group descriptors.

use super::*;
use crate::prelude::*;

#[derive(Debug, Clone, Copy)]
pub(super) struct RawSuper {
    pub inodes_count: u32,
    pub blocks_count: u32,
    pub free_blocks_count: u32,
    pub free_inodes_count: u32,
    pub first_data_block: u32,
    pub log_block_size: u32,
    pub blocks_per_group: u32,
    pub inodes_per_group: u32,
    pub magic: u16,
}

impl RawSuper {
    pub fn parse(buf: &[u8]) -> Result<Self> {
        let sb = Self {
            inodes_count: get_u32(buf, 0),
            blocks_count: get_u32(buf, 4),
            free_blocks_count: get_u32(buf, 12),
            free_inodes_count: get_u32(buf, 16),
            first_data_block: get_u32(buf, 20),
            log_block_size: get_u32(buf, 24),
            blocks_per_group: get_u32(buf, 32),
            inodes_per_group: get_u32(buf, 40),
            magic: get_u16(buf, 56),
        };
        if sb.magic != EXT2_MAGIC {
            return_errno_with_message!(Errno::EINVAL, "bad ext2 magic");
        }
        if sb.log_block_size != 0 {
            return_errno_with_message!(Errno::EINVAL, "only 1 KiB ext2 blocks supported");
        }
        Ok(sb)
    }

    pub fn write(&self, buf: &mut [u8]) {
        put_u32(buf, 0, self.inodes_count);
        put_u32(buf, 4, self.blocks_count);
        put_u32(buf, 12, self.free_blocks_count);
        put_u32(buf, 16, self.free_inodes_count);
        put_u32(buf, 20, self.first_data_block);
        put_u32(buf, 24, self.log_block_size);
        put_u32(buf, 32, self.blocks_per_group);
        put_u32(buf, 36, self.blocks_per_group); // frags per group
        put_u32(buf, 40, self.inodes_per_group);
        put_u16(buf, 56, self.magic);
        // rev 0, clean state
        put_u16(buf, 58, 1);
    }

    pub fn group_count(&self) -> usize {
        ((self.blocks_count - self.first_data_block) as usize)
            .div_ceil(self.blocks_per_group as usize)
    }

    /// The block holding the group descriptor table.
    pub fn group_desc_block(&self) -> u32 {
        self.first_data_block + 1
    }
}

#[derive(Debug, Clone, Copy)]
pub(super) struct GroupDesc {
    pub block_bitmap: u32,
    pub inode_bitmap: u32,
    pub inode_table: u32,
    pub free_blocks_count: u16,
    pub free_inodes_count: u16,
    pub used_dirs_count: u16,
}

impl GroupDesc {
    pub fn parse(buf: &[u8], index: usize) -> Self {
        let off = index * GROUP_DESC_SIZE;
        Self {
            block_bitmap: get_u32(buf, off),
            inode_bitmap: get_u32(buf, off + 4),
            inode_table: get_u32(buf, off + 8),
            free_blocks_count: get_u16(buf, off + 12),
            free_inodes_count: get_u16(buf, off + 14),
            used_dirs_count: get_u16(buf, off + 16),
        }
    }

    pub fn write(&self, buf: &mut [u8], index: usize) {
        let off = index * GROUP_DESC_SIZE;
        put_u32(buf, off, self.block_bitmap);
        put_u32(buf, off + 4, self.inode_bitmap);
        put_u32(buf, off + 8, self.inode_table);
        put_u16(buf, off + 12, self.free_blocks_count);
        put_u16(buf, off + 14, self.free_inodes_count);
        put_u16(buf, off + 16, self.used_dirs_count);
    }
}
