use super::SyscallReturn;
use crate::{
    fs::{
        fs_resolver::{FsPath, AT_FDCWD},
        utils::{InodeMode, InodeType},
    },
    prelude::*,
    util::user::read_cstring_from_user,
};

pub(super) fn sys_mkdir(path_addr: Vaddr, mode: u16) -> Result<SyscallReturn> {
    let path = read_cstring_from_user(path_addr, crate::fs::utils::PATH_MAX)?;
    let current = current!();
    let fs = current.fs();
    let resolver = fs.read();
    let (dir, name) = resolver.lookup_dir_and_base(&FsPath::new(AT_FDCWD, path.to_str()?)?)?;
    let masked = InodeMode::from_bits_truncate(mode & !resolver.umask() & 0o777);
    dir.create(name, InodeType::Dir, masked)?;
    Ok(SyscallReturn::Return(0))
}
