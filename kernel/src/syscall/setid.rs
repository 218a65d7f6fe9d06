use super::SyscallReturn;
use crate::{prelude::*, util::user::read_val_from_user};

pub(super) fn sys_setuid(uid: u32) -> Result<SyscallReturn> {
    current!().creds().set_uid(uid)?;
    Ok(SyscallReturn::Return(0))
}

pub(super) fn sys_setgid(gid: u32) -> Result<SyscallReturn> {
    current!().creds().set_gid(gid)?;
    Ok(SyscallReturn::Return(0))
}

pub(super) fn sys_setgroups(count: usize, list_addr: Vaddr) -> Result<SyscallReturn> {
    if count > 32 {
        return_errno!(Errno::EINVAL);
    }
    let mut groups = Vec::with_capacity(count);
    for index in 0..count {
        let gid: u32 = read_val_from_user(list_addr + index * 4)?;
        groups.push(gid);
    }
    current!().creds().set_groups(groups)?;
    Ok(SyscallReturn::Return(0))
}
