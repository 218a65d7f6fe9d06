use super::SyscallReturn;
use crate::{
    fs::fs_resolver::{FsPath, AT_FDCWD},
    prelude::*,
    util::user::read_cstring_from_user,
};

fn chown_at(dirfd: i32, path_addr: Vaddr, uid: u32, gid: u32) -> Result<SyscallReturn> {
    let path = read_cstring_from_user(path_addr, crate::fs::utils::PATH_MAX)?;
    let current = current!();
    if !current.creds().is_superuser() {
        return_errno!(Errno::EPERM);
    }
    let fs = current.fs();
    let location = fs.read().lookup(&FsPath::new(dirfd, path.to_str()?)?)?;
    location.inode().set_owner(uid, gid)?;
    Ok(SyscallReturn::Return(0))
}

pub(super) fn sys_chown(path_addr: Vaddr, uid: u32, gid: u32) -> Result<SyscallReturn> {
    chown_at(AT_FDCWD, path_addr, uid, gid)
}

pub(super) fn sys_fchownat(
    dirfd: i32,
    path_addr: Vaddr,
    uid: u32,
    gid: u32,
    _flags: u32,
) -> Result<SyscallReturn> {
    chown_at(dirfd, path_addr, uid, gid)
}
