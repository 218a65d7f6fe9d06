use super::SyscallReturn;
use crate::{prelude::*, process::ptrace::do_ptrace};

pub(super) fn sys_ptrace(
    request: u32,
    pid: u32,
    addr: usize,
    data: usize,
) -> Result<SyscallReturn> {
    let val = do_ptrace(request, pid, addr, data)?;
    Ok(SyscallReturn::Return(val))
}
