use super::SyscallReturn;
use crate::{
    fs::{
        self,
        fs_resolver::{FsPath, AT_FDCWD},
        utils::InodeType,
        FsSource,
    },
    prelude::*,
    util::user::read_cstring_from_user,
};

pub(super) fn sys_mount(
    source_addr: Vaddr,
    target_addr: Vaddr,
    fstype_addr: Vaddr,
    _flags: u32,
    _data_addr: Vaddr,
) -> Result<SyscallReturn> {
    let current = current!();
    if !current.creds().is_superuser() {
        return_errno!(Errno::EPERM);
    }
    let target = read_cstring_from_user(target_addr, crate::fs::utils::PATH_MAX)?;
    let fstype = read_cstring_from_user(fstype_addr, 64)?;
    let fs_ctx = current.fs();
    let resolver = fs_ctx.read();
    let mountpoint = resolver.lookup(&FsPath::new(AT_FDCWD, target.to_str()?)?)?;

    // A block-backed filesystem resolves its source to a device node.
    let source = if source_addr != 0 {
        let source = read_cstring_from_user(source_addr, crate::fs::utils::PATH_MAX)?;
        match resolver.lookup(&FsPath::new(AT_FDCWD, source.to_str()?)?) {
            Ok(node) if node.type_() == InodeType::BlockDevice => {
                let id = node
                    .inode()
                    .device_id()
                    .unwrap_or(crate::fs::device::DeviceId::from_encoded(
                        node.inode().metadata().rdev,
                    ));
                FsSource::Block(id)
            }
            _ => FsSource::None,
        }
    } else {
        FsSource::None
    };

    let new_fs = fs::make_fs(fstype.to_str()?, source)?;
    mountpoint.mount(new_fs)?;
    Ok(SyscallReturn::Return(0))
}

pub(super) fn sys_umount(target_addr: Vaddr) -> Result<SyscallReturn> {
    let current = current!();
    if !current.creds().is_superuser() {
        return_errno!(Errno::EPERM);
    }
    let target = read_cstring_from_user(target_addr, crate::fs::utils::PATH_MAX)?;
    let fs_ctx = current.fs();
    let mount_root = fs_ctx
        .read()
        .lookup(&FsPath::new(AT_FDCWD, target.to_str()?)?)?;
    mount_root.umount()?;
    Ok(SyscallReturn::Return(0))
}
