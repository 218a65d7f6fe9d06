use super::SyscallReturn;
use crate::{
    fs::fs_resolver::{FsPath, AT_FDCWD},
    prelude::*,
    util::user::read_cstring_from_user,
};

pub(super) fn sys_symlink(target_addr: Vaddr, link_addr: Vaddr) -> Result<SyscallReturn> {
    let target = read_cstring_from_user(target_addr, crate::fs::utils::PATH_MAX)?;
    let link = read_cstring_from_user(link_addr, crate::fs::utils::PATH_MAX)?;
    let current = current!();
    let fs = current.fs();
    let resolver = fs.read();
    let (dir, name) = resolver.lookup_dir_and_base(&FsPath::new(AT_FDCWD, link.to_str()?)?)?;
    dir.symlink(name, target.to_str()?)?;
    Ok(SyscallReturn::Return(0))
}
