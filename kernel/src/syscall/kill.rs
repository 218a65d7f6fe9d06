use super::SyscallReturn;
use crate::{
    prelude::*,
    process::{
        signal::{sig_num::SigNum, signals::user::UserSignal, do_kill},
        ProcessFilter,
    },
};

pub(super) fn sys_kill(pid: i32, signum: u32) -> Result<SyscallReturn> {
    let current = current!();
    let filter = ProcessFilter::from_wait_id(pid);
    let sender = (current.pid(), current.creds().uid());
    if signum == 0 {
        // Existence probe.
        do_kill(filter, None::<fn() -> Box<dyn crate::process::signal::signals::Signal>>)?;
        return Ok(SyscallReturn::Return(0));
    }
    let num = SigNum::try_from(signum as u8)?;
    do_kill(
        filter,
        Some(move || {
            Box::new(UserSignal::new(num, sender.0, sender.1))
                as Box<dyn crate::process::signal::signals::Signal>
        }),
    )?;
    Ok(SyscallReturn::Return(0))
}

pub(super) fn sys_tkill(tid: i32, signum: u32) -> Result<SyscallReturn> {
    if tid <= 0 {
        return_errno!(Errno::EINVAL);
    }
    sys_kill(tid, signum)
}
