use super::SyscallReturn;
use crate::{
    fs::fs_resolver::{FsPath, AT_FDCWD},
    prelude::*,
    util::user::read_cstring_from_user,
};

pub(super) fn sys_rmdir(path_addr: Vaddr) -> Result<SyscallReturn> {
    let path = read_cstring_from_user(path_addr, crate::fs::utils::PATH_MAX)?;
    let current = current!();
    let fs = current.fs();
    let resolver = fs.read();
    let (dir, name) = resolver.lookup_dir_and_base(&FsPath::new(AT_FDCWD, path.to_str()?)?)?;
    dir.dentry().rmdir(name)?;
    Ok(SyscallReturn::Return(0))
}
