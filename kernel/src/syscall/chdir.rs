use super::SyscallReturn;
use crate::{
    fs::{
        fs_resolver::{FsPath, AT_FDCWD},
        inode_handle::InodeHandle,
        utils::InodeType,
    },
    prelude::*,
    util::user::read_cstring_from_user,
};

pub(super) fn sys_chdir(path_addr: Vaddr) -> Result<SyscallReturn> {
    let path = read_cstring_from_user(path_addr, crate::fs::utils::PATH_MAX)?;
    let current = current!();
    let fs = current.fs();
    let location = fs.read().lookup(&FsPath::new(AT_FDCWD, path.to_str()?)?)?;
    if location.type_() != InodeType::Dir {
        return_errno!(Errno::ENOTDIR);
    }
    fs.write().set_cwd(location);
    Ok(SyscallReturn::Return(0))
}

pub(super) fn sys_chroot(path_addr: Vaddr) -> Result<SyscallReturn> {
    let path = read_cstring_from_user(path_addr, crate::fs::utils::PATH_MAX)?;
    let current = current!();
    if !current.creds().is_superuser() {
        return_errno!(Errno::EPERM);
    }
    let fs = current.fs();
    let location = fs.read().lookup(&FsPath::new(AT_FDCWD, path.to_str()?)?)?;
    if location.type_() != InodeType::Dir {
        return_errno!(Errno::ENOTDIR);
    }
    fs.write().set_root(location);
    Ok(SyscallReturn::Return(0))
}

pub(super) fn sys_fchdir(fd: i32) -> Result<SyscallReturn> {
    let current = current!();
    let file = current.file_table().lock().get(fd)?;
    let handle = file
        .downcast_ref::<InodeHandle>()
        .ok_or(Error::new(Errno::ENOTDIR))?;
    if handle.path().type_() != InodeType::Dir {
        return_errno!(Errno::ENOTDIR);
    }
    current.fs().write().set_cwd(handle.path().clone());
    Ok(SyscallReturn::Return(0))
}
