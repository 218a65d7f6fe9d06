use super::SyscallReturn;
use crate::{
    fs::{
        device::DeviceId,
        fs_resolver::{FsPath, AT_FDCWD},
        utils::{InodeMode, InodeType},
    },
    prelude::*,
    util::user::read_cstring_from_user,
};

pub(super) fn sys_mknod(path_addr: Vaddr, mode: u32, dev: u32) -> Result<SyscallReturn> {
    let path = read_cstring_from_user(path_addr, crate::fs::utils::PATH_MAX)?;
    let current = current!();
    if !current.creds().is_superuser() {
        return_errno!(Errno::EPERM);
    }
    let fs = current.fs();
    let resolver = fs.read();
    let (dir, name) = resolver.lookup_dir_and_base(&FsPath::new(AT_FDCWD, path.to_str()?)?)?;
    let type_ = InodeType::from_mode_bits(mode as u16)?;
    let perm = InodeMode::from_bits_truncate(mode as u16 & !resolver.umask() & 0o777);
    match type_ {
        InodeType::CharDevice | InodeType::BlockDevice => {
            dir.mknod(name, type_, perm, DeviceId::from_encoded(dev as u64))?;
        }
        InodeType::File | InodeType::NamedPipe | InodeType::Socket => {
            dir.create(name, type_, perm)?;
        }
        _ => return_errno!(Errno::EINVAL),
    }
    Ok(SyscallReturn::Return(0))
}
