//! The second extended filesystem (rev 0, 1 KiB blocks).

mod dir;
mod fs;
mod inode;
mod super_block;

pub use fs::Ext2;

pub const EXT2_MAGIC: u16 = 0xef53;
pub const BLOCK_SIZE: usize = 1024;
/// Byte offset of the superblock on disk.
pub const SUPERBLOCK_OFFSET: usize = 1024;

pub const ROOT_INO: u32 = 2;
/// Inodes 1..=10 are reserved; the first allocatable is 11.
pub const FIRST_FREE_INO: u32 = 11;

pub const INODE_SIZE: usize = 128;
pub const GROUP_DESC_SIZE: usize = 32;

/// Block pointer slots: 12 direct, then single, double and triple
/// indirect.
pub const NR_BLOCK_PTRS: usize = 15;
pub const NR_DIRECT: usize = 12;
pub const IND_SLOT: usize = 12;
pub const DIND_SLOT: usize = 13;
pub const TIND_SLOT: usize = 14;
pub const PTRS_PER_BLOCK: usize = BLOCK_SIZE / 4;

/// Fast symlinks keep targets shorter than this inside the inode.
pub const FAST_SYMLINK_MAX: usize = 60;

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

/// On-disk directory-entry file types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(self) enum DirFileType {
    Unknown = 0,
    File = 1,
    Dir = 2,
    Char = 3,
    Block = 4,
    Fifo = 5,
    Socket = 6,
    Symlink = 7,
}

impl DirFileType {
    pub fn from_inode_type(type_: crate::fs::utils::InodeType) -> Self {
        use crate::fs::utils::InodeType;
        match type_ {
            InodeType::File => DirFileType::File,
            InodeType::Dir => DirFileType::Dir,
            InodeType::CharDevice => DirFileType::Char,
            InodeType::BlockDevice => DirFileType::Block,
            InodeType::NamedPipe => DirFileType::Fifo,
            InodeType::Socket => DirFileType::Socket,
            InodeType::SymLink => DirFileType::Symlink,
        }
    }

    pub fn to_inode_type(raw: u8) -> crate::fs::utils::InodeType {
        use crate::fs::utils::InodeType;
        match raw {
            2 => InodeType::Dir,
            3 => InodeType::CharDevice,
            4 => InodeType::BlockDevice,
            5 => InodeType::NamedPipe,
            6 => InodeType::Socket,
            7 => InodeType::SymLink,
            _ => InodeType::File,
        }
    }
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

    fn fresh_fs(minor: u32) -> Arc<Ext2> {
        let dev = DeviceId::new(device::RAMDISK_MAJOR, minor);
        device::register_block(Arc::new(RamDisk::new(dev, 2048 * 1024)));
        Ext2::format(dev, 2048, 128).unwrap();
        Ext2::open(dev).unwrap()
    }

    #[test]
    fn root_lists_dot_entries() {
        let _guard = crate::mm::test_util::serialize_test();
        let fs = fresh_fs(60);
        let root = fs.root_inode();
        let mut entries: Vec<(String, u64, InodeType)> = Vec::new();
        root.readdir_at(0, &mut entries).unwrap();
        let names: Vec<&str> = entries.iter().map(|(n, _, _)| n.as_str()).collect();
        assert_eq!(names, [".", ".."]);
    }

    #[test]
    fn create_write_remount_read() {
        let _guard = crate::mm::test_util::serialize_test();
        let dev = DeviceId::new(device::RAMDISK_MAJOR, 61);
        device::register_block(Arc::new(RamDisk::new(dev, 2048 * 1024)));
        Ext2::format(dev, 2048, 128).unwrap();
        {
            let fs = Ext2::open(dev).unwrap();
            let root = fs.root_inode();
            let file = root
                .create("a.txt", InodeType::File, InodeMode::from_bits_truncate(0o644))
                .unwrap();
            file.write_at(0, b"persistent data").unwrap();
            fs.sync().unwrap();
        }
        crate::fs::buffer::invalidate_dev(dev).unwrap();
        let fs = Ext2::open(dev).unwrap();
        let file = fs.root_inode().lookup("a.txt").unwrap();
        let mut buf = [0u8; 15];
        assert_eq!(file.read_at(0, &mut buf).unwrap(), 15);
        assert_eq!(&buf, b"persistent data");
    }

    #[test]
    fn many_names_spill_into_second_block() {
        let _guard = crate::mm::test_util::serialize_test();
        let fs = fresh_fs(62);
        let root = fs.root_inode();
        for i in 0..80 {
            let name = alloc::format!("file-with-a-longish-name-{i:03}");
            root.create(&name, InodeType::File, InodeMode::from_bits_truncate(0o644))
                .unwrap();
        }
        // Every one of them resolves afterwards.
        for i in 0..80 {
            let name = alloc::format!("file-with-a-longish-name-{i:03}");
            assert!(root.lookup(&name).is_ok(), "{name} lost");
        }
        assert!(root.size() > BLOCK_SIZE);
    }

    #[test]
    fn indirect_mapping_reaches_past_direct_blocks() {
        let _guard = crate::mm::test_util::serialize_test();
        let fs = fresh_fs(63);
        let file = fs
            .root_inode()
            .create("big", InodeType::File, InodeMode::from_bits_truncate(0o644))
            .unwrap();
        let offset = (NR_DIRECT + 5) * BLOCK_SIZE;
        file.write_at(offset, b"deep").unwrap();
        let mut buf = [0u8; 4];
        assert_eq!(file.read_at(offset, &mut buf).unwrap(), 4);
        assert_eq!(&buf, b"deep");
    }

    #[test]
    fn unlink_and_rename_update_directory() {
        let _guard = crate::mm::test_util::serialize_test();
        let fs = fresh_fs(64);
        let root = fs.root_inode();
        root.create("old", InodeType::File, InodeMode::from_bits_truncate(0o644))
            .unwrap();
        let root_dyn = fs.root_inode();
        root.rename("old", &root_dyn, "new").unwrap();
        assert_eq!(root.lookup("old").unwrap_err().error(), Errno::ENOENT);
        assert!(root.lookup("new").is_ok());
        root.unlink("new").unwrap();
        assert_eq!(root.lookup("new").unwrap_err().error(), Errno::ENOENT);
    }

    #[test]
    fn fast_symlink_lives_in_inode() {
        let _guard = crate::mm::test_util::serialize_test();
        let fs = fresh_fs(65);
        let root = fs.root_inode();
        let link = root
            .create("l", InodeType::SymLink, InodeMode::from_bits_truncate(0o777))
            .unwrap();
        link.write_link("/bin/sh").unwrap();
        assert_eq!(link.read_link().unwrap(), "/bin/sh");
        assert_eq!(link.size(), 7);
    }
}
