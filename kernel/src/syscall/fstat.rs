use super::SyscallReturn;
use crate::{
    fs::{
        fs_resolver::{FsPath, AT_FDCWD},
        utils::Metadata,
    },
    prelude::*,
    util::user::{read_cstring_from_user, write_val_to_user},
};

/// `struct stat64` on i386.
#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
struct stat64_t {
    st_dev: u64,
    _pad0: u32,
    _st_ino32: u32,
    st_mode: u32,
    st_nlink: u32,
    st_uid: u32,
    st_gid: u32,
    st_rdev: u64,
    _pad1: u32,
    st_size: i64,
    st_blksize: u32,
    st_blocks: u64,
    st_atime: u32,
    st_atime_nsec: u32,
    st_mtime: u32,
    st_mtime_nsec: u32,
    st_ctime: u32,
    st_ctime_nsec: u32,
    st_ino: u64,
}

impl From<Metadata> for stat64_t {
    fn from(meta: Metadata) -> Self {
        stat64_t {
            st_dev: meta.dev,
            st_mode: meta.type_.as_mode_bits() as u32 | meta.mode.bits() as u32,
            st_nlink: meta.nlinks as u32,
            st_uid: meta.uid,
            st_gid: meta.gid,
            st_rdev: meta.rdev,
            st_size: meta.size as i64,
            st_blksize: meta.blk_size as u32,
            st_blocks: meta.blocks as u64,
            st_atime: meta.atime.as_secs() as u32,
            st_mtime: meta.mtime.as_secs() as u32,
            st_ctime: meta.ctime.as_secs() as u32,
            st_ino: meta.ino,
            _st_ino32: meta.ino as u32,
            ..Default::default()
        }
    }
}

fn stat_path(path_addr: Vaddr, stat_addr: Vaddr, follow: bool) -> Result<SyscallReturn> {
    let path = read_cstring_from_user(path_addr, crate::fs::utils::PATH_MAX)?;
    let current = current!();
    let fs = current.fs();
    let resolver = fs.read();
    let fs_path = FsPath::new(AT_FDCWD, path.to_str()?)?;
    let location = if follow {
        resolver.lookup(&fs_path)?
    } else {
        resolver.lookup_no_follow(&fs_path)?
    };
    let stat = stat64_t::from(location.inode().metadata());
    write_val_to_user(stat_addr, &stat)?;
    Ok(SyscallReturn::Return(0))
}

pub(super) fn sys_stat64(path_addr: Vaddr, stat_addr: Vaddr) -> Result<SyscallReturn> {
    stat_path(path_addr, stat_addr, true)
}

pub(super) fn sys_lstat64(path_addr: Vaddr, stat_addr: Vaddr) -> Result<SyscallReturn> {
    stat_path(path_addr, stat_addr, false)
}

pub(super) fn sys_fstat64(fd: i32, stat_addr: Vaddr) -> Result<SyscallReturn> {
    let file = current!().file_table().lock().get(fd)?;
    let stat = stat64_t::from(file.metadata());
    write_val_to_user(stat_addr, &stat)?;
    Ok(SyscallReturn::Return(0))
}

const AT_SYMLINK_NOFOLLOW: u32 = 0x100;

pub(super) fn sys_fstatat64(
    dirfd: i32,
    path_addr: Vaddr,
    stat_addr: Vaddr,
    flags: u32,
) -> Result<SyscallReturn> {
    let path = read_cstring_from_user(path_addr, crate::fs::utils::PATH_MAX)?;
    let current = current!();
    let fs = current.fs();
    let resolver = fs.read();
    let fs_path = FsPath::new(dirfd, path.to_str()?)?;
    let location = if flags & AT_SYMLINK_NOFOLLOW != 0 {
        resolver.lookup_no_follow(&fs_path)?
    } else {
        resolver.lookup(&fs_path)?
    };
    let stat = stat64_t::from(location.inode().metadata());
    write_val_to_user(stat_addr, &stat)?;
    Ok(SyscallReturn::Return(0))
}
