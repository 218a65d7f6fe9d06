//! Minix inodes: zone mapping, directory entries and the VFS contract.

use core::time::Duration;

use super::{
    fs::{join_mode, split_mode, MinixFS},
    *,
};
use crate::{
    fs::{
        buffer,
        device::DeviceId,
        utils::{DirentVisitor, FileSystem, Inode, InodeMode, InodeType, Metadata},
    },
    prelude::*,
};

/// In-memory copy of the 32-byte on-disk inode.
#[derive(Debug, Clone, Copy)]
struct DiskInode {
    mode_raw: u16,
    uid: u16,
    size: u32,
    time: u32,
    gid: u8,
    nlinks: u8,
    zones: [u16; NR_ZONES],
}

impl DiskInode {
    fn parse(buf: &[u8], off: usize) -> Self {
        let mut zones = [0u16; NR_ZONES];
        for (i, zone) in zones.iter_mut().enumerate() {
            *zone = get_u16(buf, off + 14 + i * 2);
        }
        Self {
            mode_raw: get_u16(buf, off),
            uid: get_u16(buf, off + 2),
            size: get_u32(buf, off + 4),
            time: get_u32(buf, off + 8),
            gid: buf[off + 12],
            nlinks: buf[off + 13],
            zones,
        }
    }

    fn write(&self, buf: &mut [u8], off: usize) {
        put_u16(buf, off, self.mode_raw);
        put_u16(buf, off + 2, self.uid);
        put_u32(buf, off + 4, self.size);
        put_u32(buf, off + 8, self.time);
        buf[off + 12] = self.gid;
        buf[off + 13] = self.nlinks;
        for (i, zone) in self.zones.iter().enumerate() {
            put_u16(buf, off + 14 + i * 2, *zone);
        }
    }
}

pub struct MinixInode {
    fs: Weak<MinixFS>,
    ino: u32,
    typ: InodeType,
    disk: SpinLock<DiskInode>,
    this: Weak<MinixInode>,
}

impl MinixInode {
    pub(super) fn load(fs: &Arc<MinixFS>, ino: u32) -> Result<Arc<Self>> {
        let (bh, off) = fs.inode_block(ino)?;
        let disk = bh.with_data(|data| DiskInode::parse(data, off));
        let (typ, _) = split_mode(disk.mode_raw)?;
        Ok(Arc::new_cyclic(|this| Self {
            fs: Arc::downgrade(fs),
            ino,
            typ,
            disk: SpinLock::new(disk),
            this: this.clone(),
        }))
    }

    fn new_on_disk(
        fs: &Arc<MinixFS>,
        type_: InodeType,
        mode: InodeMode,
        rdev: DeviceId,
    ) -> Result<Arc<Self>> {
        let ino = fs.alloc_inode()?;
        let mut disk = DiskInode {
            mode_raw: join_mode(type_, mode),
            uid: 0,
            size: 0,
            time: crate::time::wall_clock().0 as u32,
            gid: 0,
            nlinks: 1,
            zones: [0; NR_ZONES],
        };
        if type_.is_device() {
            // Device inodes stash the device number in the first zone
            // slot, old-UNIX style.
            disk.zones[0] = rdev.as_encoded() as u16;
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

    fn fs_arc(&self) -> Arc<MinixFS> {
        self.fs.upgrade().unwrap()
    }

    /// Write the in-memory inode back to its table block.
    fn flush(&self) -> Result<()> {
        let fs = self.fs_arc();
        let (bh, off) = fs.inode_block(self.ino)?;
        let disk = *self.disk.lock();
        bh.with_data(|data| disk.write(data, off));
        bh.mark_dirty();
        Ok(())
    }

    /// File-block to zone translation; 0 is a hole.
    fn map_block(&self, file_block: u32, create: bool) -> Result<u32> {
        let fs = self.fs_arc();
        let dev = fs.dev();
        let block = file_block as usize;
        let mut disk = self.disk.lock();
        let goal = disk.zones[0] as u32;

        if block < NR_DIRECT {
            let mut zone = disk.zones[block] as u32;
            if zone == 0 && create {
                zone = fs.alloc_zone(goal)?;
                disk.zones[block] = zone as u16;
                drop(disk);
                self.flush()?;
            }
            return Ok(zone);
        }

        let block = block - NR_DIRECT;
        if block < PTRS_PER_BLOCK {
            let mut ind = disk.zones[ZONE_IND] as u32;
            if ind == 0 {
                if !create {
                    return Ok(0);
                }
                ind = fs.alloc_zone(goal)?;
                disk.zones[ZONE_IND] = ind as u16;
                drop(disk);
                self.flush()?;
            } else {
                drop(disk);
            }
            return lookup_ptr(dev, ind, block, create, &fs, goal);
        }

        let block = block - PTRS_PER_BLOCK;
        if block < PTRS_PER_BLOCK * PTRS_PER_BLOCK {
            let mut dind = disk.zones[ZONE_DIND] as u32;
            if dind == 0 {
                if !create {
                    return Ok(0);
                }
                dind = fs.alloc_zone(goal)?;
                disk.zones[ZONE_DIND] = dind as u16;
                drop(disk);
                self.flush()?;
            } else {
                drop(disk);
            }
            let ind = lookup_ptr(dev, dind, block / PTRS_PER_BLOCK, create, &fs, goal)?;
            if ind == 0 {
                return Ok(0);
            }
            return lookup_ptr(dev, ind, block % PTRS_PER_BLOCK, create, &fs, goal);
        }
        return_errno_with_message!(Errno::EFBIG, "file exceeds minix limits")
    }

    fn do_read(&self, offset: usize, buf: &mut [u8]) -> Result<usize> {
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
            let zone = self.map_block(file_block, false)?;
            if zone == 0 {
                buf[done..done + chunk].fill(0);
            } else {
                let bh = buffer::bread(fs.dev(), zone, BLOCK_SIZE)?;
                bh.read_at(in_block, &mut buf[done..done + chunk]);
            }
            done += chunk;
        }
        Ok(done)
    }

    fn do_write(&self, offset: usize, buf: &[u8]) -> Result<usize> {
        let fs = self.fs_arc();
        let mut done = 0;
        while done < buf.len() {
            let pos = offset + done;
            let file_block = (pos / BLOCK_SIZE) as u32;
            let in_block = pos % BLOCK_SIZE;
            let chunk = (BLOCK_SIZE - in_block).min(buf.len() - done);
            let zone = self.map_block(file_block, true)?;
            let bh = if chunk == BLOCK_SIZE {
                buffer::getblk(fs.dev(), zone, BLOCK_SIZE)?
            } else {
                buffer::bread(fs.dev(), zone, BLOCK_SIZE)?
            };
            bh.write_at(in_block, &buf[done..done + chunk]);
            done += chunk;
        }
        let mut disk = self.disk.lock();
        if (offset + done) as u32 > disk.size {
            disk.size = (offset + done) as u32;
            drop(disk);
            self.flush()?;
        }
        Ok(done)
    }

    /// Free every zone and reset the size (truncate-to-zero and the
    /// last-unlink path). Device inodes keep no zones; their first
    /// slot is the device number.
    fn free_blocks(&self) -> Result<()> {
        let fs = self.fs_arc();
        let zones = self.disk.lock().zones;
        if !self.typ.is_device() {
            for zone in &zones[..NR_DIRECT] {
                if *zone != 0 {
                    fs.free_zone(*zone as u32)?;
                }
            }
            if zones[ZONE_IND] != 0 {
                free_indirect(&fs, zones[ZONE_IND] as u32, 1)?;
            }
            if zones[ZONE_DIND] != 0 {
                free_indirect(&fs, zones[ZONE_DIND] as u32, 2)?;
            }
        }
        let mut disk = self.disk.lock();
        disk.zones = [0; NR_ZONES];
        disk.size = 0;
        drop(disk);
        self.flush()
    }

    // ----- directory entries -----

    fn entries(&self) -> Result<Vec<(u32, String)>> {
        let size = self.disk.lock().size as usize;
        let mut raw = vec![0u8; size];
        self.do_read(0, &mut raw)?;
        let mut entries = Vec::new();
        for slot in raw.chunks_exact(DIRENT_SIZE) {
            let ino = get_u16(slot, 0) as u32;
            if ino == 0 {
                entries.push((0, String::new()));
                continue;
            }
            let name_end = slot[2..2 + NAME_LEN]
                .iter()
                .position(|&b| b == 0)
                .unwrap_or(NAME_LEN);
            let name = String::from_utf8_lossy(&slot[2..2 + name_end]).into_owned();
            entries.push((ino, name));
        }
        Ok(entries)
    }

    fn find_entry(&self, name: &str) -> Result<Option<(usize, u32)>> {
        Ok(self
            .entries()?
            .into_iter()
            .enumerate()
            .find(|(_, (ino, entry_name))| *ino != 0 && entry_name == name)
            .map(|(slot, (ino, _))| (slot, ino)))
    }

    fn write_entry(&self, slot: usize, ino: u32, name: &str) -> Result<()> {
        let mut raw = [0u8; DIRENT_SIZE];
        put_u16(&mut raw, 0, ino as u16);
        raw[2..2 + name.len()].copy_from_slice(name.as_bytes());
        self.do_write(slot * DIRENT_SIZE, &raw)?;
        Ok(())
    }

    fn add_entry(&self, name: &str, ino: u32) -> Result<()> {
        if name.len() > NAME_LEN {
            return_errno!(Errno::ENAMETOOLONG);
        }
        let entries = self.entries()?;
        let slot = entries
            .iter()
            .position(|(ino, _)| *ino == 0)
            .unwrap_or(entries.len());
        self.write_entry(slot, ino, name)
    }

    fn remove_entry(&self, name: &str) -> Result<u32> {
        let (slot, ino) = self
            .find_entry(name)?
            .ok_or(Error::new(Errno::ENOENT))?;
        self.write_entry(slot, 0, "")?;
        Ok(ino)
    }

    fn is_empty_dir(&self) -> Result<bool> {
        Ok(self
            .entries()?
            .iter()
            .filter(|(ino, name)| *ino != 0 && name != "." && name != "..")
            .count()
            == 0)
    }

    fn dec_nlinks(&self) -> Result<()> {
        let mut disk = self.disk.lock();
        disk.nlinks = disk.nlinks.saturating_sub(1);
        drop(disk);
        self.flush()
    }
}

fn lookup_ptr(
    dev: DeviceId,
    table_zone: u32,
    index: usize,
    create: bool,
    fs: &Arc<MinixFS>,
    goal: u32,
) -> Result<u32> {
    let bh = buffer::bread(dev, table_zone, BLOCK_SIZE)?;
    let mut zone = bh.with_data(|data| get_u16(data, index * 2)) as u32;
    if zone == 0 && create {
        zone = fs.alloc_zone(goal)?;
        bh.with_data(|data| put_u16(data, index * 2, zone as u16));
        bh.mark_dirty();
    }
    Ok(zone)
}

fn free_indirect(fs: &Arc<MinixFS>, table_zone: u32, depth: usize) -> Result<()> {
    let bh = buffer::bread(fs.dev(), table_zone, BLOCK_SIZE)?;
    let zones: Vec<u32> = bh.with_data(|data| {
        (0..PTRS_PER_BLOCK)
            .map(|i| get_u16(data, i * 2) as u32)
            .filter(|&z| z != 0)
            .collect()
    });
    for zone in zones {
        if depth > 1 {
            free_indirect(fs, zone, depth - 1)?;
        } else {
            fs.free_zone(zone)?;
        }
    }
    fs.free_zone(table_zone)
}

impl Inode for MinixInode {
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
        let time = Duration::from_secs(disk.time as u64);
        let rdev = if self.typ.is_device() {
            disk.zones[0] as u64
        } else {
            0
        };
        Metadata {
            dev: self.fs_arc().dev().as_encoded(),
            ino: self.ino as u64,
            size: disk.size as usize,
            blk_size: BLOCK_SIZE,
            blocks: (disk.size as usize).div_ceil(BLOCK_SIZE),
            atime: time,
            mtime: time,
            ctime: time,
            type_: self.typ,
            mode: InodeMode::from_bits_truncate(disk.mode_raw),
            nlinks: disk.nlinks as usize,
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
        disk.mode_raw = join_mode(self.typ, mode);
        drop(disk);
        self.flush()
    }

    fn set_owner(&self, uid: u32, gid: u32) -> Result<()> {
        let mut disk = self.disk.lock();
        disk.uid = uid as u16;
        disk.gid = gid as u8;
        drop(disk);
        self.flush()
    }

    fn read_at(&self, offset: usize, buf: &mut [u8]) -> Result<usize> {
        match self.typ {
            InodeType::File | InodeType::SymLink => self.do_read(offset, buf),
            InodeType::Dir => return_errno!(Errno::EISDIR),
            _ => return_errno!(Errno::EINVAL),
        }
    }

    fn write_at(&self, offset: usize, buf: &[u8]) -> Result<usize> {
        match self.typ {
            InodeType::File | InodeType::SymLink => self.do_write(offset, buf),
            InodeType::Dir => return_errno!(Errno::EISDIR),
            _ => return_errno!(Errno::EINVAL),
        }
    }

    fn create(&self, name: &str, type_: InodeType, mode: InodeMode) -> Result<Arc<dyn Inode>> {
        if self.typ != InodeType::Dir {
            return_errno!(Errno::ENOTDIR);
        }
        if self.find_entry(name)?.is_some() {
            return_errno!(Errno::EEXIST);
        }
        let fs = self.fs_arc();
        let inode = MinixInode::new_on_disk(&fs, type_, mode, DeviceId::default())?;
        if type_ == InodeType::Dir {
            inode.add_entry(".", inode.ino)?;
            inode.add_entry("..", self.ino)?;
            {
                let mut disk = inode.disk.lock();
                disk.nlinks = 2;
            }
            inode.flush()?;
            let mut disk = self.disk.lock();
            disk.nlinks += 1;
            drop(disk);
            self.flush()?;
        }
        self.add_entry(name, inode.ino)?;
        Ok(inode)
    }

    fn mknod(
        &self,
        name: &str,
        type_: InodeType,
        mode: InodeMode,
        dev: DeviceId,
    ) -> Result<Arc<dyn Inode>> {
        if self.typ != InodeType::Dir {
            return_errno!(Errno::ENOTDIR);
        }
        if self.find_entry(name)?.is_some() {
            return_errno!(Errno::EEXIST);
        }
        let fs = self.fs_arc();
        let inode = MinixInode::new_on_disk(&fs, type_, mode, dev)?;
        self.add_entry(name, inode.ino)?;
        Ok(inode)
    }

    fn lookup(&self, name: &str) -> Result<Arc<dyn Inode>> {
        if self.typ != InodeType::Dir {
            return_errno!(Errno::ENOTDIR);
        }
        let (_, ino) = self
            .find_entry(name)?
            .ok_or(Error::new(Errno::ENOENT))?;
        Ok(self.fs_arc().get_inode(ino)?)
    }

    fn readdir_at(&self, offset: usize, visitor: &mut dyn DirentVisitor) -> Result<usize> {
        if self.typ != InodeType::Dir {
            return_errno!(Errno::ENOTDIR);
        }
        let fs = self.fs_arc();
        let mut next = offset;
        for (slot, (ino, name)) in self.entries()?.into_iter().enumerate() {
            if slot < offset || ino == 0 {
                continue;
            }
            let type_ = fs.get_inode(ino).map(|i| i.typ).unwrap_or(InodeType::File);
            visitor.visit(&name, ino as u64, type_, slot + 1)?;
            next = slot + 1;
        }
        Ok(next)
    }

    fn link(&self, old: &Arc<dyn Inode>, name: &str) -> Result<()> {
        let old = old
            .downcast_ref::<MinixInode>()
            .ok_or(Error::new(Errno::EXDEV))?;
        if old.typ == InodeType::Dir {
            return_errno!(Errno::EPERM);
        }
        if self.find_entry(name)?.is_some() {
            return_errno!(Errno::EEXIST);
        }
        self.add_entry(name, old.ino)?;
        let mut disk = old.disk.lock();
        disk.nlinks += 1;
        drop(disk);
        old.flush()
    }

    fn unlink(&self, name: &str) -> Result<()> {
        if name == "." || name == ".." {
            return_errno!(Errno::EISDIR);
        }
        let fs = self.fs_arc();
        let (_, ino) = self
            .find_entry(name)?
            .ok_or(Error::new(Errno::ENOENT))?;
        let target = fs.get_inode(ino)?;
        if target.typ == InodeType::Dir {
            return_errno!(Errno::EISDIR);
        }
        self.remove_entry(name)?;
        target.dec_nlinks()
    }

    fn rmdir(&self, name: &str) -> Result<()> {
        let fs = self.fs_arc();
        let (_, ino) = self
            .find_entry(name)?
            .ok_or(Error::new(Errno::ENOENT))?;
        let target = fs.get_inode(ino)?;
        if target.typ != InodeType::Dir {
            return_errno!(Errno::ENOTDIR);
        }
        if !target.is_empty_dir()? {
            return_errno!(Errno::ENOTEMPTY);
        }
        self.remove_entry(name)?;
        target.dec_nlinks()?; // ".."
        target.dec_nlinks()?; // "."
        let mut disk = self.disk.lock();
        disk.nlinks -= 1;
        drop(disk);
        self.flush()
    }

    fn rename(&self, old_name: &str, target: &Arc<dyn Inode>, new_name: &str) -> Result<()> {
        let target_dir = target
            .downcast_ref::<MinixInode>()
            .ok_or(Error::new(Errno::EXDEV))?;
        let ino = self
            .find_entry(old_name)?
            .map(|(_, ino)| ino)
            .ok_or(Error::new(Errno::ENOENT))?;
        if let Some((_, existing)) = target_dir.find_entry(new_name)? {
            let fs = self.fs_arc();
            let displaced = fs.get_inode(existing)?;
            target_dir.remove_entry(new_name)?;
            displaced.dec_nlinks()?;
        }
        self.remove_entry(old_name)?;
        target_dir.add_entry(new_name, ino)?;
        let moved = self.fs_arc().get_inode(ino)?;
        if moved.typ == InodeType::Dir && !core::ptr::eq(self, target_dir) {
            // Repoint "..".
            moved.remove_entry("..")?;
            moved.add_entry("..", target_dir.ino)?;
            self.disk.lock().nlinks -= 1;
            self.flush()?;
            target_dir.disk.lock().nlinks += 1;
            target_dir.flush()?;
        }
        Ok(())
    }

    fn read_link(&self) -> Result<String> {
        if self.typ != InodeType::SymLink {
            return_errno!(Errno::EINVAL);
        }
        let size = self.size();
        let mut buf = vec![0u8; size];
        self.do_read(0, &mut buf)?;
        Ok(String::from_utf8(buf)?)
    }

    fn write_link(&self, target: &str) -> Result<()> {
        if self.typ != InodeType::SymLink {
            return_errno!(Errno::EINVAL);
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
            Some(DeviceId::from_encoded(self.disk.lock().zones[0] as u64))
        } else {
            None
        }
    }
}

impl Drop for MinixInode {
    fn drop(&mut self) {
        if let Some(fs) = self.fs.upgrade() {
            fs.drop_cached(self.ino);
            // Last in-memory reference to an unlinked inode: give the
            // zones and the inode slot back.
            if self.disk.lock().nlinks == 0 {
                let _ = self.free_blocks();
                let _ = fs.free_inode(self.ino);
            }
        }
    }
}
