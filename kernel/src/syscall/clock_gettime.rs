use super::SyscallReturn;
use crate::{prelude::*, time, util::user::write_val_to_user};

const CLOCK_REALTIME: u32 = 0;
const CLOCK_MONOTONIC: u32 = 1;

pub(super) fn sys_clock_gettime64(clock_id: u32, ts_addr: Vaddr) -> Result<SyscallReturn> {
    let (secs, nanos) = match clock_id {
        CLOCK_REALTIME => time::wall_clock(),
        CLOCK_MONOTONIC => time::monotonic_clock(),
        _ => return_errno_with_message!(Errno::EINVAL, "unknown clock"),
    };
    // struct __kernel_timespec: i64 seconds, i64 nanoseconds.
    write_val_to_user(ts_addr, &(secs as i64))?;
    write_val_to_user(ts_addr + 8, &(nanos as i64))?;
    Ok(SyscallReturn::Return(0))
}

pub(super) fn sys_time(time_addr: Vaddr) -> Result<SyscallReturn> {
    let (secs, _) = time::wall_clock();
    if time_addr != 0 {
        write_val_to_user(time_addr, &(secs as u32))?;
    }
    Ok(SyscallReturn::Return(secs as i32))
}
