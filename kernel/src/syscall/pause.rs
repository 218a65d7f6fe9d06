use super::SyscallReturn;
use crate::{prelude::*, sched};

pub(super) fn sys_pause() -> Result<SyscallReturn> {
    let current = current!();
    loop {
        if current.has_pending_signal() {
            // Always interrupted; the signal path decides delivery.
            return_errno!(Errno::EINTR);
        }
        current.set_state(crate::process::TaskState::Sleeping);
        sched::schedule();
        #[cfg(test)]
        return_errno!(Errno::EINTR);
    }
}
