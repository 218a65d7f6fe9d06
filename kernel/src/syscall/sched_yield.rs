use super::SyscallReturn;
use crate::{prelude::*, sched};

pub(super) fn sys_sched_yield() -> Result<SyscallReturn> {
    current!().set_counter(0);
    sched::schedule();
    Ok(SyscallReturn::Return(0))
}
