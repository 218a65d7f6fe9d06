use super::SyscallReturn;
use crate::{
    prelude::*,
    sched,
    time::{HZ, NANOS_PER_TICK},
    util::user::{read_val_from_user, write_val_to_user},
};

pub(super) fn sys_nanosleep(req_addr: Vaddr, rem_addr: Vaddr) -> Result<SyscallReturn> {
    let secs: u32 = read_val_from_user(req_addr)?;
    let nanos: u32 = read_val_from_user(req_addr + 4)?;
    if nanos >= 1_000_000_000 {
        return_errno!(Errno::EINVAL);
    }
    let ticks = secs as u64 * HZ + (nanos as u64).div_ceil(NANOS_PER_TICK);
    if ticks == 0 {
        return Ok(SyscallReturn::Return(0));
    }
    let remaining = sched::schedule_timeout(ticks);
    if remaining > 0 {
        // Woken early, almost surely by a signal.
        if rem_addr != 0 {
            let rem_secs = (remaining / HZ) as u32;
            let rem_nanos = ((remaining % HZ) * NANOS_PER_TICK) as u32;
            write_val_to_user(rem_addr, &rem_secs)?;
            write_val_to_user(rem_addr + 4, &rem_nanos)?;
        }
        if current!().has_pending_signal() {
            return_errno!(Errno::EINTR);
        }
    }
    Ok(SyscallReturn::Return(0))
}
