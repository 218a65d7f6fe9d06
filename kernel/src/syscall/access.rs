use super::SyscallReturn;
use crate::{
    fs::fs_resolver::{may_access, FsPath, AT_FDCWD},
    prelude::*,
    util::user::read_cstring_from_user,
};

fn access_at(dirfd: i32, path_addr: Vaddr, mode: u32) -> Result<SyscallReturn> {
    let path = read_cstring_from_user(path_addr, crate::fs::utils::PATH_MAX)?;
    let current = current!();
    let fs = current.fs();
    let location = fs.read().lookup(&FsPath::new(dirfd, path.to_str()?)?)?;
    // F_OK is satisfied by the lookup itself.
    may_access(
        &location.inode().metadata(),
        mode & 4 != 0,
        mode & 2 != 0,
        mode & 1 != 0,
    )?;
    Ok(SyscallReturn::Return(0))
}

pub(super) fn sys_access(path_addr: Vaddr, mode: u32) -> Result<SyscallReturn> {
    access_at(AT_FDCWD, path_addr, mode)
}

pub(super) fn sys_faccessat(dirfd: i32, path_addr: Vaddr, mode: u32) -> Result<SyscallReturn> {
    access_at(dirfd, path_addr, mode)
}
