mod fs;

pub use fs::RamFS;

pub const RAMFS_MAGIC: u64 = 0x0102_1994;
pub const BLOCK_SIZE: usize = 4096;
pub const ROOT_INO: u64 = 1;
