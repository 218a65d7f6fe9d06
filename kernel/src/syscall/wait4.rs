use super::SyscallReturn;
use crate::{
    prelude::*,
    process::{wait_child_exit, ProcessFilter, WaitOptions},
    util::user::write_val_to_user,
};

pub(super) fn sys_wait4(
    wait_pid: i32,
    status_addr: Vaddr,
    options: u32,
    _rusage_addr: Vaddr,
) -> Result<SyscallReturn> {
    let options = WaitOptions::from_bits(options)
        .ok_or(Error::with_message(Errno::EINVAL, "unknown wait option"))?;
    let filter = ProcessFilter::from_wait_id(wait_pid);
    let Some((pid, status)) = wait_child_exit(filter, options)? else {
        return Ok(SyscallReturn::Return(0));
    };
    if status_addr != 0 {
        write_val_to_user(status_addr, &status)?;
    }
    Ok(SyscallReturn::Return(pid as i32))
}

pub(super) fn sys_waitpid(
    wait_pid: i32,
    status_addr: Vaddr,
    options: u32,
) -> Result<SyscallReturn> {
    sys_wait4(wait_pid, status_addr, options, 0)
}
