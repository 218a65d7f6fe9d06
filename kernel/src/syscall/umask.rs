use super::SyscallReturn;
use crate::prelude::*;

pub(super) fn sys_umask(mask: u16) -> Result<SyscallReturn> {
    let current = current!();
    let fs = current.fs();
    let old = fs.write().set_umask(mask);
    Ok(SyscallReturn::Return(old as i32))
}
