use super::SyscallReturn;
use crate::{
    fs::{
        fs_resolver::{FsPath, AT_FDCWD},
        utils::InodeMode,
    },
    prelude::*,
    util::user::read_cstring_from_user,
};

pub(super) fn sys_chmod(path_addr: Vaddr, mode: u16) -> Result<SyscallReturn> {
    let path = read_cstring_from_user(path_addr, crate::fs::utils::PATH_MAX)?;
    let current = current!();
    let fs = current.fs();
    let location = fs.read().lookup(&FsPath::new(AT_FDCWD, path.to_str()?)?)?;
    let meta = location.inode().metadata();
    if !current.creds().is_superuser() && current.creds().euid() != meta.uid {
        return_errno!(Errno::EPERM);
    }
    location
        .inode()
        .set_mode(InodeMode::from_bits_truncate(mode))?;
    Ok(SyscallReturn::Return(0))
}
