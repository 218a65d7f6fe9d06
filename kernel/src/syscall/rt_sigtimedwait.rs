use super::SyscallReturn;
use crate::{
    prelude::*,
    process::signal::sig_mask::SigMask,
    sched,
    util::user::{read_val_from_user, write_val_to_user},
};

pub(super) fn sys_rt_sigtimedwait(
    set_addr: Vaddr,
    info_addr: Vaddr,
    timeout_addr: Vaddr,
    sigset_size: usize,
) -> Result<SyscallReturn> {
    if sigset_size != 8 {
        return_errno!(Errno::EINVAL);
    }
    let raw: u64 = read_val_from_user(set_addr)?;
    let wanted = SigMask::from(raw);
    let current = current!();
    let deadline = if timeout_addr != 0 {
        let secs: u32 = read_val_from_user(timeout_addr)?;
        let nanos: u32 = read_val_from_user(timeout_addr + 4)?;
        let ticks = secs as u64 * crate::time::HZ + nanos as u64 / crate::time::NANOS_PER_TICK;
        Some(crate::time::jiffies() + ticks)
    } else {
        None
    };
    loop {
        // Temporarily treat the wanted set as unblocked so dequeue
        // sees it.
        let saved = current.sig_mask();
        current.set_sig_mask(saved - wanted);
        let taken = current.dequeue_signal();
        current.set_sig_mask(saved);
        if let Some(signal) = taken {
            if info_addr != 0 {
                write_val_to_user(info_addr, &signal.to_info())?;
            }
            return Ok(SyscallReturn::Return(signal.num().as_u8() as i32));
        }
        if let Some(deadline) = deadline {
            if crate::time::jiffies() >= deadline {
                return_errno!(Errno::EAGAIN);
            }
            sched::schedule_timeout(deadline - crate::time::jiffies());
        } else {
            current.set_state(crate::process::TaskState::Sleeping);
            sched::schedule();
        }
        if current.has_pending_signal() {
            return_errno!(Errno::EINTR);
        }
        #[cfg(test)]
        return_errno!(Errno::EAGAIN);
    }
}
