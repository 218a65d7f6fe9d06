use super::SyscallReturn;
use crate::{
    fs::{
        fs_resolver::{FsPath, AT_FDCWD},
        utils::InodeType,
    },
    prelude::*,
    util::user::{read_cstring_from_user, write_bytes_to_user},
};

pub(super) fn sys_readlink(
    path_addr: Vaddr,
    buf_addr: Vaddr,
    size: usize,
) -> Result<SyscallReturn> {
    let path = read_cstring_from_user(path_addr, crate::fs::utils::PATH_MAX)?;
    let current = current!();
    let fs = current.fs();
    let location = fs
        .read()
        .lookup_no_follow(&FsPath::new(AT_FDCWD, path.to_str()?)?)?;
    if location.type_() != InodeType::SymLink {
        return_errno!(Errno::EINVAL);
    }
    let target = location.inode().read_link()?;
    let len = size.min(target.len());
    write_bytes_to_user(buf_addr, &target.as_bytes()[..len])?;
    Ok(SyscallReturn::Return(len as i32))
}
