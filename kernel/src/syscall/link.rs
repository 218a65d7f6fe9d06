use super::SyscallReturn;
use crate::{
    fs::fs_resolver::{FsPath, AT_FDCWD},
    prelude::*,
    util::user::read_cstring_from_user,
};

pub(super) fn sys_link(old_addr: Vaddr, new_addr: Vaddr) -> Result<SyscallReturn> {
    let old = read_cstring_from_user(old_addr, crate::fs::utils::PATH_MAX)?;
    let new = read_cstring_from_user(new_addr, crate::fs::utils::PATH_MAX)?;
    let current = current!();
    let fs = current.fs();
    let resolver = fs.read();
    let target = resolver.lookup_no_follow(&FsPath::new(AT_FDCWD, old.to_str()?)?)?;
    let (dir, name) = resolver.lookup_dir_and_base(&FsPath::new(AT_FDCWD, new.to_str()?)?)?;
    dir.dentry().link(target.dentry(), name)?;
    Ok(SyscallReturn::Return(0))
}
