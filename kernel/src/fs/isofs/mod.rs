//! Read-only ISO9660 with Rock Ridge POSIX extensions.

mod rock;

use core::time::Duration;

use crate::{
    fs::{
        buffer,
        device::DeviceId,
        utils::{
            DirentVisitor, FileSystem, FsFlags, FsStats, Inode, InodeMode, InodeType,
            Metadata, NAME_MAX,
        },
    },
    prelude::*,
};

pub use rock::RockRidge;

pub const ISOFS_MAGIC: u64 = 0x9660;
pub const BLOCK_SIZE: usize = 2048;
/// The primary volume descriptor sits at this logical block.
const PVD_BLOCK: u32 = 16;

fn get_u32_le(buf: &[u8], off: usize) -> u32 {
    u32::from_le_bytes([buf[off], buf[off + 1], buf[off + 2], buf[off + 3]])
}

/// One parsed directory record plus its Rock Ridge payload.
#[derive(Debug, Clone)]
pub(self) struct DirRecord {
    pub extent: u32,
    pub size: u32,
    pub is_dir: bool,
    pub name: String,
    pub rr: RockRidge,
}

impl DirRecord {
    /// Parse the record at `buf[off..]`; returns the record and its
    /// length, or `None` at a block's zero padding.
    fn parse(fs: &IsoFS, buf: &[u8], off: usize) -> Result<Option<(DirRecord, usize)>> {
        let len = buf[off] as usize;
        if len == 0 {
            return Ok(None);
        }
        let extent = get_u32_le(buf, off + 2);
        let size = get_u32_le(buf, off + 10);
        let flags = buf[off + 25];
        let name_len = buf[off + 32] as usize;
        let raw_name = &buf[off + 33..off + 33 + name_len];

        // System use area starts after the (even-padded) name.
        let mut su_off = off + 33 + name_len;
        if name_len % 2 == 0 {
            su_off += 1;
        }
        let su_area = &buf[su_off..off + len];
        let rr = rock::parse(fs, su_area)?;

        let name = match (&rr.name, raw_name) {
            (Some(rr_name), _) => rr_name.clone(),
            (None, [0]) => String::from("."),
            (None, [1]) => String::from(".."),
            (None, bytes) => {
                // Plain ISO name: drop the ";1" version, lowercase.
                let mut name = String::from_utf8_lossy(bytes).into_owned();
                if let Some(pos) = name.find(';') {
                    name.truncate(pos);
                }
                name.make_ascii_lowercase();
                name
            }
        };
        Ok(Some((
            DirRecord {
                extent,
                size,
                is_dir: flags & 0x02 != 0,
                name,
                rr,
            },
            len,
        )))
    }
}

pub struct IsoFS {
    dev: DeviceId,
    root: SpinLock<Option<Arc<IsoInode>>>,
    this: Weak<IsoFS>,
}

impl IsoFS {
    pub fn open(dev: DeviceId) -> Result<Arc<Self>> {
        let bh = buffer::bread(dev, PVD_BLOCK, BLOCK_SIZE)?;
        let fs = Arc::new_cyclic(|this| Self {
            dev,
            root: SpinLock::new(None),
            this: this.clone(),
        });
        let root_record = bh.with_data(|data| -> Result<DirRecord> {
            if data[0] != 1 || &data[1..6] != b"CD001" {
                return_errno_with_message!(Errno::EINVAL, "not an iso9660 volume");
            }
            let (record, _) = DirRecord::parse(&fs, data, 156)?
                .ok_or(Error::with_message(Errno::EIO, "empty root record"))?;
            Ok(record)
        })?;
        let root = Arc::new(IsoInode {
            fs: fs.this.clone(),
            record: root_record,
        });
        *fs.root.lock() = Some(root);
        Ok(fs)
    }

    pub(self) fn dev(&self) -> DeviceId {
        self.dev
    }

    /// Read `size` bytes starting at logical block `extent`.
    pub(self) fn read_extent(&self, extent: u32, offset: usize, buf: &mut [u8]) -> Result<usize> {
        let mut done = 0;
        while done < buf.len() {
            let pos = offset + done;
            let block = extent + (pos / BLOCK_SIZE) as u32;
            let in_block = pos % BLOCK_SIZE;
            let chunk = (BLOCK_SIZE - in_block).min(buf.len() - done);
            let bh = buffer::bread(self.dev, block, BLOCK_SIZE)?;
            bh.read_at(in_block, &mut buf[done..done + chunk]);
            done += chunk;
        }
        Ok(done)
    }
}

impl FileSystem for IsoFS {
    fn root_inode(&self) -> Arc<dyn Inode> {
        self.root.lock().clone().expect("isofs root missing")
    }

    fn stats(&self) -> FsStats {
        FsStats::new(ISOFS_MAGIC, BLOCK_SIZE, NAME_MAX)
    }

    fn flags(&self) -> FsFlags {
        FsFlags::READ_ONLY
    }

    fn block_device(&self) -> Option<DeviceId> {
        Some(self.dev)
    }
}

impl Debug for IsoFS {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("IsoFS").field("dev", &self.dev).finish()
    }
}

struct IsoInode {
    fs: Weak<IsoFS>,
    record: DirRecord,
}

impl IsoInode {
    fn fs_arc(&self) -> Arc<IsoFS> {
        self.fs.upgrade().unwrap()
    }

    fn iso_type(&self) -> InodeType {
        if let Some(mode) = self.record.rr.mode {
            if let Ok(type_) = InodeType::from_mode_bits(mode as u16) {
                return type_;
            }
        }
        if self.record.is_dir {
            InodeType::Dir
        } else {
            InodeType::File
        }
    }

    fn records(&self) -> Result<Vec<DirRecord>> {
        if !self.record.is_dir {
            return_errno!(Errno::ENOTDIR);
        }
        let fs = self.fs_arc();
        let mut raw = vec![0u8; self.record.size as usize];
        fs.read_extent(self.record.extent, 0, &mut raw)?;
        let mut records = Vec::new();
        let mut off = 0;
        while off < raw.len() {
            match DirRecord::parse(&fs, &raw, off)? {
                Some((record, len)) => {
                    records.push(record);
                    off += len;
                }
                None => {
                    // Records never straddle blocks; skip the padding.
                    off = (off / BLOCK_SIZE + 1) * BLOCK_SIZE;
                }
            }
        }
        Ok(records)
    }
}

impl Inode for IsoInode {
    fn ino(&self) -> u64 {
        self.record.extent as u64
    }

    fn type_(&self) -> InodeType {
        self.iso_type()
    }

    fn size(&self) -> usize {
        self.record.size as usize
    }

    fn fs(&self) -> Arc<dyn FileSystem> {
        self.fs_arc()
    }

    fn metadata(&self) -> Metadata {
        let rr = &self.record.rr;
        let mode = rr
            .mode
            .map(|m| InodeMode::from_bits_truncate(m as u16))
            .unwrap_or(InodeMode::from_bits_truncate(if self.record.is_dir {
                0o555
            } else {
                0o444
            }));
        let mtime = Duration::from_secs(rr.mtime.unwrap_or(0));
        Metadata {
            dev: self.fs_arc().dev().as_encoded(),
            ino: self.ino(),
            size: self.record.size as usize,
            blk_size: BLOCK_SIZE,
            blocks: (self.record.size as usize).div_ceil(BLOCK_SIZE),
            atime: Duration::from_secs(rr.atime.unwrap_or(0)),
            mtime,
            ctime: mtime,
            type_: self.iso_type(),
            mode,
            nlinks: rr.nlink.unwrap_or(1) as usize,
            uid: rr.uid.unwrap_or(0),
            gid: rr.gid.unwrap_or(0),
            rdev: rr.rdev.unwrap_or(0),
        }
    }

    fn read_at(&self, offset: usize, buf: &mut [u8]) -> Result<usize> {
        if self.iso_type() == InodeType::Dir {
            return_errno!(Errno::EISDIR);
        }
        let size = self.record.size as usize;
        if offset >= size {
            return Ok(0);
        }
        let len = buf.len().min(size - offset);
        self.fs_arc()
            .read_extent(self.record.extent, offset, &mut buf[..len])
    }

    fn write_at(&self, _offset: usize, _buf: &[u8]) -> Result<usize> {
        return_errno!(Errno::EROFS)
    }

    fn lookup(&self, name: &str) -> Result<Arc<dyn Inode>> {
        let record = self
            .records()?
            .into_iter()
            .find(|r| r.name == name)
            .ok_or(Error::new(Errno::ENOENT))?;
        Ok(Arc::new(IsoInode {
            fs: self.fs.clone(),
            record,
        }))
    }

    fn readdir_at(&self, offset: usize, visitor: &mut dyn DirentVisitor) -> Result<usize> {
        let records = self.records()?;
        let mut next = offset;
        for (idx, record) in records.iter().enumerate() {
            if idx < offset {
                continue;
            }
            let type_ = if record.is_dir {
                InodeType::Dir
            } else {
                InodeType::File
            };
            visitor.visit(&record.name, record.extent as u64, type_, idx + 1)?;
            next = idx + 1;
        }
        Ok(next)
    }

    fn read_link(&self) -> Result<String> {
        self.record
            .rr
            .symlink
            .clone()
            .ok_or(Error::new(Errno::EINVAL))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{device::ramdisk::RamDisk, fs::device};

    /// Hand-build a tiny volume: a root directory holding `file.txt`
    /// ("ISO!") with a Rock Ridge NM and PX, and a subdirectory.
    fn build_test_image(dev: DeviceId) {
        let disk = RamDisk::new(dev, 64 * BLOCK_SIZE);
        let mut pvd = vec![0u8; BLOCK_SIZE];
        pvd[0] = 1;
        pvd[1..6].copy_from_slice(b"CD001");
        // Root record at 156: extent 20, one block.
        write_dir_record(&mut pvd, 156, 20, BLOCK_SIZE as u32, true, &[0], &[]);

        let mut root = vec![0u8; BLOCK_SIZE];
        let mut off = 0;
        off += write_dir_record(&mut root, off, 20, BLOCK_SIZE as u32, true, &[0], &[]);
        off += write_dir_record(&mut root, off, 20, BLOCK_SIZE as u32, true, &[1], &[]);
        // file.txt with Rock Ridge NM + PX.
        let mut su = Vec::new();
        su.extend_from_slice(&nm_entry("file.txt"));
        su.extend_from_slice(&px_entry(0o100644, 1, 7, 8));
        off += write_dir_record(&mut root, off, 21, 4, false, b"FILE.TXT;1", &su);
        let _ = off;

        let mut data = vec![0u8; BLOCK_SIZE];
        data[..4].copy_from_slice(b"ISO!");

        use crate::fs::device::{BlockDevice, BlockRequest};
        disk.queue_request(BlockRequest::Write {
            block: PVD_BLOCK,
            buf: &pvd,
        })
        .unwrap();
        disk.queue_request(BlockRequest::Write { block: 20, buf: &root })
            .unwrap();
        disk.queue_request(BlockRequest::Write { block: 21, buf: &data })
            .unwrap();
        device::register_block(Arc::new(disk));
    }

    fn write_dir_record(
        buf: &mut [u8],
        off: usize,
        extent: u32,
        size: u32,
        is_dir: bool,
        name: &[u8],
        su: &[u8],
    ) -> usize {
        let name_len = name.len();
        let mut len = 33 + name_len;
        if name_len % 2 == 0 {
            len += 1;
        }
        len += su.len();
        buf[off] = len as u8;
        buf[off + 2..off + 6].copy_from_slice(&extent.to_le_bytes());
        buf[off + 10..off + 14].copy_from_slice(&size.to_le_bytes());
        buf[off + 25] = if is_dir { 0x02 } else { 0 };
        buf[off + 32] = name_len as u8;
        buf[off + 33..off + 33 + name_len].copy_from_slice(name);
        let su_off = off + len - su.len();
        buf[su_off..su_off + su.len()].copy_from_slice(su);
        len
    }

    fn nm_entry(name: &str) -> Vec<u8> {
        let mut entry = vec![b'N', b'M', (5 + name.len()) as u8, 1, 0];
        entry.extend_from_slice(name.as_bytes());
        entry
    }

    fn px_entry(mode: u32, nlink: u32, uid: u32, gid: u32) -> Vec<u8> {
        let mut entry = vec![b'P', b'X', 36, 1];
        for val in [mode, nlink, uid, gid] {
            entry.extend_from_slice(&val.to_le_bytes());
            entry.extend_from_slice(&val.to_be_bytes());
        }
        entry
    }

    #[test]
    fn rock_ridge_names_and_modes() {
        let _guard = crate::mm::test_util::serialize_test();
        let dev = DeviceId::new(device::ATA_MAJOR, 70);
        build_test_image(dev);
        let fs = IsoFS::open(dev).unwrap();
        let root = fs.root_inode();
        assert_eq!(root.type_(), InodeType::Dir);

        let file = root.lookup("file.txt").unwrap();
        let meta = file.metadata();
        assert_eq!(meta.mode.bits() & 0o777, 0o644);
        assert_eq!(meta.uid, 7);
        assert_eq!(meta.gid, 8);

        let mut buf = [0u8; 4];
        assert_eq!(file.read_at(0, &mut buf).unwrap(), 4);
        assert_eq!(&buf, b"ISO!");

        // Writes are refused wholesale.
        assert_eq!(file.write_at(0, b"x").unwrap_err().error(), Errno::EROFS);
    }

    #[test]
    fn plain_iso_names_are_lowercased() {
        let _guard = crate::mm::test_util::serialize_test();
        let dev = DeviceId::new(device::ATA_MAJOR, 71);
        build_test_image(dev);
        let fs = IsoFS::open(dev).unwrap();
        let mut entries: Vec<(String, u64, InodeType)> = Vec::new();
        fs.root_inode().readdir_at(0, &mut entries).unwrap();
        let names: Vec<&str> = entries.iter().map(|(n, _, _)| n.as_str()).collect();
        assert_eq!(names, [".", "..", "file.txt"]);
    }
}
