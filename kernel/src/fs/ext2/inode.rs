//! Ext2 inodes: the 12+3 block-pointer tree, file I/O and symlinks.

use core::time::Duration;

use super::{dir, fs::Ext2, *};
use crate::{
    fs::{
        buffer,
        device::DeviceId,
        utils::{DirentVisitor, FileSystem, Inode, InodeMode, InodeType, Metadata},
    },
    prelude::*,
};

/// In-memory copy of the 128-byte on-disk inode.
#[derive(Debug, Clone, Copy)]
pub(super) struct DiskInode {
    pub mode_raw: u16,
    pub uid: u16,
    pub size: u32,
    pub atime: u32,
    pub ctime: u32,
    pub mtime: u32,
    pub gid: u16,
    pub links_count: u16,
    pub sectors: u32,
    pub block: [u32; NR_BLOCK_PTRS],
}

impl DiskInode {
    fn parse(buf: &[u8], off: usize) -> Self {
        let mut block = [0u32; NR_BLOCK_PTRS];
        for (i, ptr) in block.iter_mut().enumerate() {
            *ptr = get_u32(buf, off + 40 + i * 4);
        }
        Self {
            mode_raw: get_u16(buf, off),
            uid: get_u16(buf, off + 2),
            size: get_u32(buf, off + 4),
            atime: get_u32(buf, off + 8),
            ctime: get_u32(buf, off + 12),
            mtime: get_u32(buf, off + 16),
            gid: get_u16(buf, off + 24),
            links_count: get_u16(buf, off + 26),
            sectors: get_u32(buf, off + 28),
            block,
        }
    }

    fn write(&self, buf: &mut [u8], off: usize) {
        put_u16(buf, off, self.mode_raw);
        put_u16(buf, off + 2, self.uid);
        put_u32(buf, off + 4, self.size);
        put_u32(buf, off + 8, self.atime);
        put_u32(buf, off + 12, self.ctime);
        put_u32(buf, off + 16, self.mtime);
        put_u16(buf, off + 24, self.gid);
        put_u16(buf, off + 26, self.links_count);
        put_u32(buf, off + 28, self.sectors);
        for (i, ptr) in self.block.iter().enumerate() {
            put_u32(buf, off + 40 + i * 4, *ptr);
        }
    }
}

pub struct Ext2Inode {
    fs: Weak<Ext2>,
    ino: u32,
    typ: InodeType,
    pub(super) disk: SpinLock<DiskInode>,
    this: Weak<Ext2Inode>,
}

impl Ext2Inode {
    pub(super) fn load(fs: &Arc<Ext2>, ino: u32) -> Result<Arc<Self>> {
        let (bh, off) = fs.inode_slot(ino)?;
        let disk = bh.with_data(|data| DiskInode::parse(data, off));
        let typ = InodeType::from_mode_bits(disk.mode_raw)?;
        Ok(Arc::new_cyclic(|this| Self {
            fs: Arc::downgrade(fs),
            ino,
            typ,
            disk: SpinLock::new(disk),
            this: this.clone(),
        }))
    }

    pub(super) fn new_on_disk(
        fs: &Arc<Ext2>,
        type_: InodeType,
        mode: InodeMode,
        rdev: DeviceId,
    ) -> Result<Arc<Self>> {
        let ino = fs.alloc_inode(type_ == InodeType::Dir)?;
        let now = crate::time::wall_clock().0 as u32;
        let mut disk = DiskInode {
            mode_raw: type_.as_mode_bits() | (mode.bits() & 0o7777),
            uid: 0,
            size: 0,
            atime: now,
            ctime: now,
            mtime: now,
            gid: 0,
            links_count: 1,
            sectors: 0,
            block: [0; NR_BLOCK_PTRS],
        };
        if type_.is_device() {
            disk.block[0] = rdev.as_encoded() as u32;
        }
        let inode = Arc::new_cyclic(|this| Self {
            fs: Arc::downgrade(fs),
            ino,
            typ: type_,
            disk: SpinLock::new(disk),
            this: this.clone(),
        });
        inode.flush()?;
        Ok(inode)
    }

    pub(super) fn ino_raw(&self) -> u32 {
        self.ino
    }

    pub(super) fn typ(&self) -> InodeType {
        self.typ
    }

    pub(super) fn fs_arc(&self) -> Arc<Ext2> {
        self.fs.upgrade().unwrap()
    }

    pub(super) fn flush(&self) -> Result<()> {
        let fs = self.fs_arc();
        let (bh, off) = fs.inode_slot(self.ino)?;
        let disk = *self.disk.lock();
        bh.with_data(|data| disk.write(data, off));
        bh.mark_dirty();
        Ok(())
    }

    /// File-block to device-block translation; 0 is a hole.
    pub(super) fn map_block(&self, file_block: u32, create: bool) -> Result<u32> {
        let fs = self.fs_arc();
        let mut index = file_block as usize;
        let goal = {
            let disk = self.disk.lock();
            disk.block[..NR_DIRECT]
                .iter()
                .rev()
                .find(|&&b| b != 0)
                .copied()
                .unwrap_or(0)
        };

        if index < NR_DIRECT {
            let mut disk = self.disk.lock();
            let mut block = disk.block[index];
            if block == 0 && create {
                block = fs.alloc_block(goal)?;
                disk.block[index] = block;
                disk.sectors += (BLOCK_SIZE / 512) as u32;
                drop(disk);
                self.flush()?;
            }
            return Ok(block);
        }
        index -= NR_DIRECT;

        // Depth 1..=3 through the indirect slots.
        let (slot, depth) = if index < PTRS_PER_BLOCK {
            (IND_SLOT, 1)
        } else if {
            index -= PTRS_PER_BLOCK;
            index < PTRS_PER_BLOCK * PTRS_PER_BLOCK
        } {
            (DIND_SLOT, 2)
        } else {
            index -= PTRS_PER_BLOCK * PTRS_PER_BLOCK;
            if index >= PTRS_PER_BLOCK * PTRS_PER_BLOCK * PTRS_PER_BLOCK {
                return_errno_with_message!(Errno::EFBIG, "file exceeds ext2 limits");
            }
            (TIND_SLOT, 3)
        };

        let mut table = {
            let mut disk = self.disk.lock();
            let mut top = disk.block[slot];
            if top == 0 {
                if !create {
                    return Ok(0);
                }
                top = fs.alloc_block(goal)?;
                disk.block[slot] = top;
                drop(disk);
                self.flush()?;
            }
            top
        };
        for level in (0..depth).rev() {
            let stride = PTRS_PER_BLOCK.pow(level as u32);
            let table_index = index / stride;
            index %= stride;
            let bh = buffer::bread(fs.dev(), table, BLOCK_SIZE)?;
            let mut next = bh.with_data(|data| get_u32(data, table_index * 4));
            if next == 0 {
                if !create {
                    return Ok(0);
                }
                next = fs.alloc_block(goal)?;
                bh.with_data(|data| put_u32(data, table_index * 4, next));
                bh.mark_dirty();
            }
            table = next;
        }
        Ok(table)
    }

    pub(super) fn do_read(&self, offset: usize, buf: &mut [u8]) -> Result<usize> {
        let size = self.disk.lock().size as usize;
        if offset >= size {
            return Ok(0);
        }
        let end = (offset + buf.len()).min(size);
        let fs = self.fs_arc();
        let mut done = 0;
        while offset + done < end {
            let pos = offset + done;
            let file_block = (pos / BLOCK_SIZE) as u32;
            let in_block = pos % BLOCK_SIZE;
            let chunk = (BLOCK_SIZE - in_block).min(end - pos);
            let block = self.map_block(file_block, false)?;
            if block == 0 {
                buf[done..done + chunk].fill(0);
            } else {
                let bh = buffer::bread(fs.dev(), block, BLOCK_SIZE)?;
                bh.read_at(in_block, &mut buf[done..done + chunk]);
            }
            done += chunk;
        }
        Ok(done)
    }

    pub(super) fn do_write(&self, offset: usize, buf: &[u8]) -> Result<usize> {
        let fs = self.fs_arc();
        let mut done = 0;
        while done < buf.len() {
            let pos = offset + done;
            let file_block = (pos / BLOCK_SIZE) as u32;
            let in_block = pos % BLOCK_SIZE;
            let chunk = (BLOCK_SIZE - in_block).min(buf.len() - done);
            let block = self.map_block(file_block, true)?;
            let bh = if chunk == BLOCK_SIZE {
                buffer::getblk(fs.dev(), block, BLOCK_SIZE)?
            } else {
                buffer::bread(fs.dev(), block, BLOCK_SIZE)?
            };
            bh.write_at(in_block, &buf[done..done + chunk]);
            done += chunk;
        }
        let mut disk = self.disk.lock();
        if (offset + done) as u32 > disk.size {
            disk.size = (offset + done) as u32;
            disk.mtime = crate::time::wall_clock().0 as u32;
            drop(disk);
            self.flush()?;
        }
        Ok(done)
    }

    /// Whether the pointer array holds symlink text, not block
    /// numbers.
    fn is_fast_symlink(&self) -> bool {
        self.typ == InodeType::SymLink && (self.disk.lock().size as usize) < FAST_SYMLINK_MAX
    }

    /// Release every data block (truncate-to-zero, last unlink).
    pub(super) fn free_blocks(&self) -> Result<()> {
        let fs = self.fs_arc();
        let block = self.disk.lock().block;
        if !self.typ.is_device() && !self.is_fast_symlink() {
            for ptr in &block[..NR_DIRECT] {
                if *ptr != 0 {
                    fs.free_block(*ptr)?;
                }
            }
            for (slot, depth) in [(IND_SLOT, 1), (DIND_SLOT, 2), (TIND_SLOT, 3)] {
                if block[slot] != 0 {
                    free_tree(&fs, block[slot], depth)?;
                }
            }
        }
        let mut disk = self.disk.lock();
        disk.block = [0; NR_BLOCK_PTRS];
        disk.size = 0;
        disk.sectors = 0;
        drop(disk);
        self.flush()
    }

    pub(super) fn dec_links(&self) -> Result<()> {
        let mut disk = self.disk.lock();
        disk.links_count = disk.links_count.saturating_sub(1);
        drop(disk);
        self.flush()
    }

    pub(super) fn inc_links(&self) -> Result<()> {
        let mut disk = self.disk.lock();
        disk.links_count += 1;
        drop(disk);
        self.flush()
    }
}

fn free_tree(fs: &Arc<Ext2>, table: u32, depth: usize) -> Result<()> {
    let bh = buffer::bread(fs.dev(), table, BLOCK_SIZE)?;
    let ptrs: Vec<u32> = bh.with_data(|data| {
        (0..PTRS_PER_BLOCK)
            .map(|i| get_u32(data, i * 4))
            .filter(|&p| p != 0)
            .collect()
    });
    for ptr in ptrs {
        if depth > 1 {
            free_tree(fs, ptr, depth - 1)?;
        } else {
            fs.free_block(ptr)?;
        }
    }
    fs.free_block(table)
}

impl Inode for Ext2Inode {
    fn ino(&self) -> u64 {
        self.ino as u64
    }

    fn type_(&self) -> InodeType {
        self.typ
    }

    fn size(&self) -> usize {
        self.disk.lock().size as usize
    }

    fn fs(&self) -> Arc<dyn FileSystem> {
        self.fs_arc()
    }

    fn metadata(&self) -> Metadata {
        let disk = *self.disk.lock();
        let rdev = if self.typ.is_device() {
            disk.block[0] as u64
        } else {
            0
        };
        Metadata {
            dev: self.fs_arc().dev().as_encoded(),
            ino: self.ino as u64,
            size: disk.size as usize,
            blk_size: BLOCK_SIZE,
            blocks: disk.sectors as usize,
            atime: Duration::from_secs(disk.atime as u64),
            mtime: Duration::from_secs(disk.mtime as u64),
            ctime: Duration::from_secs(disk.ctime as u64),
            type_: self.typ,
            mode: InodeMode::from_bits_truncate(disk.mode_raw),
            nlinks: disk.links_count as usize,
            uid: disk.uid as u32,
            gid: disk.gid as u32,
            rdev,
        }
    }

    fn resize(&self, new_size: usize) -> Result<()> {
        if self.typ != InodeType::File {
            return_errno!(Errno::EISDIR);
        }
        if new_size == 0 {
            return self.free_blocks();
        }
        let mut disk = self.disk.lock();
        disk.size = new_size as u32;
        drop(disk);
        self.flush()
    }

    fn set_mode(&self, mode: InodeMode) -> Result<()> {
        let mut disk = self.disk.lock();
        disk.mode_raw = self.typ.as_mode_bits() | (mode.bits() & 0o7777);
        drop(disk);
        self.flush()
    }

    fn set_owner(&self, uid: u32, gid: u32) -> Result<()> {
        let mut disk = self.disk.lock();
        disk.uid = uid as u16;
        disk.gid = gid as u16;
        drop(disk);
        self.flush()
    }

    fn atime(&self) -> Duration {
        Duration::from_secs(self.disk.lock().atime as u64)
    }

    fn set_atime(&self, time: Duration) {
        self.disk.lock().atime = time.as_secs() as u32;
        let _ = self.flush();
    }

    fn mtime(&self) -> Duration {
        Duration::from_secs(self.disk.lock().mtime as u64)
    }

    fn set_mtime(&self, time: Duration) {
        self.disk.lock().mtime = time.as_secs() as u32;
        let _ = self.flush();
    }

    fn read_at(&self, offset: usize, buf: &mut [u8]) -> Result<usize> {
        match self.typ {
            InodeType::File => self.do_read(offset, buf),
            InodeType::Dir => return_errno!(Errno::EISDIR),
            _ => return_errno!(Errno::EINVAL),
        }
    }

    fn write_at(&self, offset: usize, buf: &[u8]) -> Result<usize> {
        match self.typ {
            InodeType::File => self.do_write(offset, buf),
            InodeType::Dir => return_errno!(Errno::EISDIR),
            _ => return_errno!(Errno::EINVAL),
        }
    }

    fn create(&self, name: &str, type_: InodeType, mode: InodeMode) -> Result<Arc<dyn Inode>> {
        dir::create(self, name, type_, mode, DeviceId::default())
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
        dir::create(self, name, type_, mode, dev)
    }

    fn lookup(&self, name: &str) -> Result<Arc<dyn Inode>> {
        dir::lookup(self, name)
    }

    fn readdir_at(&self, offset: usize, visitor: &mut dyn DirentVisitor) -> Result<usize> {
        dir::readdir_at(self, offset, visitor)
    }

    fn link(&self, old: &Arc<dyn Inode>, name: &str) -> Result<()> {
        dir::link(self, old, name)
    }

    fn unlink(&self, name: &str) -> Result<()> {
        dir::unlink(self, name)
    }

    fn rmdir(&self, name: &str) -> Result<()> {
        dir::rmdir(self, name)
    }

    fn rename(&self, old_name: &str, target: &Arc<dyn Inode>, new_name: &str) -> Result<()> {
        dir::rename(self, old_name, target, new_name)
    }

    fn read_link(&self) -> Result<String> {
        if self.typ != InodeType::SymLink {
            return_errno!(Errno::EINVAL);
        }
        let disk = *self.disk.lock();
        let len = disk.size as usize;
        if len < FAST_SYMLINK_MAX {
            // Fast symlink: the target lives in the pointer array.
            let mut bytes = Vec::with_capacity(len);
            for i in 0..len {
                let word = disk.block[i / 4];
                bytes.push((word >> ((i % 4) * 8)) as u8);
            }
            return Ok(String::from_utf8(bytes)?);
        }
        let mut buf = vec![0u8; len];
        self.do_read(0, &mut buf)?;
        Ok(String::from_utf8(buf)?)
    }

    fn write_link(&self, target: &str) -> Result<()> {
        if self.typ != InodeType::SymLink {
            return_errno!(Errno::EINVAL);
        }
        if target.len() < FAST_SYMLINK_MAX {
            let mut disk = self.disk.lock();
            disk.block = [0; NR_BLOCK_PTRS];
            for (i, byte) in target.bytes().enumerate() {
                disk.block[i / 4] |= (byte as u32) << ((i % 4) * 8);
            }
            disk.size = target.len() as u32;
            drop(disk);
            return self.flush();
        }
        self.do_write(0, target.as_bytes())?;
        Ok(())
    }

    fn sync(&self) -> Result<()> {
        self.flush()
    }

    fn bmap(&self, block: u32) -> Result<u32> {
        self.map_block(block, false)
    }

    fn device_id(&self) -> Option<DeviceId> {
        if self.typ.is_device() {
            Some(DeviceId::from_encoded(self.disk.lock().block[0] as u64))
        } else {
            None
        }
    }
}

impl Drop for Ext2Inode {
    fn drop(&mut self) {
        if let Some(fs) = self.fs.upgrade() {
            fs.drop_cached(self.ino);
            if self.disk.lock().links_count == 0 {
                let was_dir = self.typ == InodeType::Dir;
                let _ = self.free_blocks();
                let _ = fs.free_inode(self.ino, was_dir);
            }
        }
    }
}
