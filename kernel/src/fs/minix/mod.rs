//! The Minix (v1, 14-character names) filesystem.

mod fs;
mod inode;

pub use fs::MinixFS;

pub const MINIX_MAGIC: u16 = 0x137f;
pub const BLOCK_SIZE: usize = 1024;
pub const ROOT_INO: u32 = 1;

pub const INODE_SIZE: usize = 32;
pub const INODES_PER_BLOCK: usize = BLOCK_SIZE / INODE_SIZE;

pub const DIRENT_SIZE: usize = 16;
pub const NAME_LEN: usize = 14;

/// Zone slots in the on-disk inode: 7 direct, 1 indirect, 1 double
/// indirect.
pub const NR_ZONES: usize = 9;
pub const NR_DIRECT: usize = 7;
pub const ZONE_IND: usize = 7;
pub const ZONE_DIND: usize = 8;
pub const PTRS_PER_BLOCK: usize = BLOCK_SIZE / 2;

pub(self) fn get_u16(buf: &[u8], off: usize) -> u16 {
    u16::from_le_bytes([buf[off], buf[off + 1]])
}

pub(self) fn put_u16(buf: &mut [u8], off: usize, val: u16) {
    buf[off..off + 2].copy_from_slice(&val.to_le_bytes());
}

pub(self) fn get_u32(buf: &[u8], off: usize) -> u32 {
    u32::from_le_bytes([buf[off], buf[off + 1], buf[off + 2], buf[off + 3]])
}

pub(self) fn put_u32(buf: &mut [u8], off: usize, val: u32) {
    buf[off..off + 4].copy_from_slice(&val.to_le_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        device::ramdisk::RamDisk,
        fs::{
            device::{self, DeviceId},
            utils::{FileSystem, InodeMode, InodeType},
        },
        prelude::*,
    };

    fn fresh_fs(minor: u32) -> Arc<MinixFS> {
        let dev = DeviceId::new(device::RAMDISK_MAJOR, minor);
        device::register_block(Arc::new(RamDisk::new(dev, 512 * 1024)));
        MinixFS::format(dev, 512, 64).unwrap();
        MinixFS::open(dev).unwrap()
    }

    #[test]
    fn root_directory_has_dot_entries() {
        let _guard = crate::mm::test_util::serialize_test();
        let fs = fresh_fs(50);
        let root = fs.root_inode();
        assert_eq!(root.type_(), InodeType::Dir);
        let mut entries: Vec<(String, u64, InodeType)> = Vec::new();
        root.readdir_at(0, &mut entries).unwrap();
        let names: Vec<&str> = entries.iter().map(|(n, _, _)| n.as_str()).collect();
        assert_eq!(names, [".", ".."]);
    }

    #[test]
    fn file_roundtrip_survives_remount() {
        let _guard = crate::mm::test_util::serialize_test();
        let dev = DeviceId::new(device::RAMDISK_MAJOR, 51);
        device::register_block(Arc::new(RamDisk::new(dev, 512 * 1024)));
        MinixFS::format(dev, 512, 64).unwrap();
        {
            let fs = MinixFS::open(dev).unwrap();
            let root = fs.root_inode();
            let file = root
                .create("hello", InodeType::File, InodeMode::from_bits_truncate(0o644))
                .unwrap();
            file.write_at(0, b"hello\n").unwrap();
            fs.sync().unwrap();
        }
        crate::fs::buffer::invalidate_dev(dev).unwrap();
        let fs = MinixFS::open(dev).unwrap();
        let file = fs.root_inode().lookup("hello").unwrap();
        assert_eq!(file.size(), 6);
        let mut buf = [0u8; 6];
        assert_eq!(file.read_at(0, &mut buf).unwrap(), 6);
        assert_eq!(&buf, b"hello\n");
    }

    #[test]
    fn indirect_blocks_extend_files() {
        let _guard = crate::mm::test_util::serialize_test();
        let fs = fresh_fs(52);
        let root = fs.root_inode();
        let file = root
            .create("big", InodeType::File, InodeMode::from_bits_truncate(0o644))
            .unwrap();
        // Spans the direct zones into the indirect table.
        let offset = (NR_DIRECT + 3) * BLOCK_SIZE;
        file.write_at(offset, b"far out").unwrap();
        let mut buf = [0u8; 7];
        assert_eq!(file.read_at(offset, &mut buf).unwrap(), 7);
        assert_eq!(&buf, b"far out");
        // The hole before it reads as zeroes.
        let mut hole = [0xffu8; 16];
        file.read_at(BLOCK_SIZE * 2, &mut hole).unwrap();
        assert!(hole.iter().all(|&b| b == 0));
    }

    #[test]
    fn unlink_frees_and_forgets() {
        let _guard = crate::mm::test_util::serialize_test();
        let fs = fresh_fs(53);
        let root = fs.root_inode();
        let file = root
            .create("doomed", InodeType::File, InodeMode::from_bits_truncate(0o644))
            .unwrap();
        file.write_at(0, &[7u8; 2048]).unwrap();
        drop(file);
        root.unlink("doomed").unwrap();
        assert_eq!(root.lookup("doomed").unwrap_err().error(), Errno::ENOENT);
    }

    #[test]
    fn mkdir_rmdir_maintains_link_counts() {
        let _guard = crate::mm::test_util::serialize_test();
        let fs = fresh_fs(54);
        let root = fs.root_inode();
        let before = root.metadata().nlinks;
        let dir = root
            .create("sub", InodeType::Dir, InodeMode::from_bits_truncate(0o755))
            .unwrap();
        assert_eq!(dir.metadata().nlinks, 2);
        assert_eq!(root.metadata().nlinks, before + 1);
        root.rmdir("sub").unwrap();
        assert_eq!(root.metadata().nlinks, before);
    }
}
