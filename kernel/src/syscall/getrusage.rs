use super::SyscallReturn;
use crate::{prelude::*, time::HZ, util::user::write_val_to_user};

const RUSAGE_SELF: i32 = 0;
const RUSAGE_CHILDREN: i32 = -1;

pub(super) fn sys_getrusage(who: i32, usage_addr: Vaddr) -> Result<SyscallReturn> {
    if who != RUSAGE_SELF && who != RUSAGE_CHILDREN {
        return_errno!(Errno::EINVAL);
    }
    let current = current!();
    let (utime, stime) = if who == RUSAGE_SELF {
        (
            current.rusage().utime_ticks(),
            current.rusage().stime_ticks(),
        )
    } else {
        // Children accounting is not accumulated.
        (0, 0)
    };
    // struct rusage opens with two timevals; the rest stays zero.
    let mut raw = [0u32; 36];
    raw[0] = (utime / HZ) as u32;
    raw[1] = ((utime % HZ) * 1_000_000 / HZ) as u32;
    raw[2] = (stime / HZ) as u32;
    raw[3] = ((stime % HZ) * 1_000_000 / HZ) as u32;
    raw[8] = current.rusage().min_flt.load(core::sync::atomic::Ordering::Relaxed) as u32;
    raw[9] = current.rusage().maj_flt.load(core::sync::atomic::Ordering::Relaxed) as u32;
    write_val_to_user(usage_addr, &raw)?;
    Ok(SyscallReturn::Return(0))
}
