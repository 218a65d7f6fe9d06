use super::SyscallReturn;
use crate::{
    prelude::*,
    process::signal::sig_mask::SigMask,
    sched,
    util::user::read_val_from_user,
};

pub(super) fn sys_rt_sigsuspend(set_addr: Vaddr, sigset_size: usize) -> Result<SyscallReturn> {
    if sigset_size != 8 {
        return_errno!(Errno::EINVAL);
    }
    let raw: u64 = read_val_from_user(set_addr)?;
    let current = current!();
    // The original mask comes back after the interrupting handler.
    *current.saved_sigmask().lock() = Some(current.sig_mask());
    current.set_sig_mask(SigMask::from(raw));
    loop {
        if current.has_pending_signal() {
            return_errno!(Errno::EINTR);
        }
        current.set_state(crate::process::TaskState::Sleeping);
        sched::schedule();
        #[cfg(test)]
        return_errno!(Errno::EINTR);
    }
}
