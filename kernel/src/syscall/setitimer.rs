use super::SyscallReturn;
use crate::{
    prelude::*,
    process::signal::{constants::SIGALRM, signals::kernel::KernelSignal},
    time::{self, timer, HZ},
    util::user::{read_val_from_user, write_val_to_user},
};

const ITIMER_REAL: u32 = 0;

fn ticks_of(addr: Vaddr) -> Result<(u64, u64)> {
    // struct itimerval: interval then value, each (sec, usec) as u32.
    let int_sec: u32 = read_val_from_user(addr)?;
    let int_usec: u32 = read_val_from_user(addr + 4)?;
    let val_sec: u32 = read_val_from_user(addr + 8)?;
    let val_usec: u32 = read_val_from_user(addr + 12)?;
    let interval = int_sec as u64 * HZ + (int_usec as u64 * HZ).div_ceil(1_000_000);
    let value = val_sec as u64 * HZ + (val_usec as u64 * HZ).div_ceil(1_000_000);
    Ok((interval, value))
}

pub(super) fn sys_setitimer(
    which: u32,
    new_addr: Vaddr,
    old_addr: Vaddr,
) -> Result<SyscallReturn> {
    if which != ITIMER_REAL {
        return_errno_with_message!(Errno::EINVAL, "only ITIMER_REAL is supported");
    }
    let current = current!();
    let now = time::jiffies();

    // Report what was pending.
    if old_addr != 0 {
        let itimer = current.itimer.lock();
        let remaining = itimer.expires.saturating_sub(now);
        let int_sec = (itimer.interval_ticks / HZ) as u32;
        let val_sec = (remaining / HZ) as u32;
        drop(itimer);
        write_val_to_user(old_addr, &int_sec)?;
        write_val_to_user(old_addr + 4, &0u32)?;
        write_val_to_user(old_addr + 8, &val_sec)?;
        write_val_to_user(old_addr + 12, &0u32)?;
    }

    if new_addr == 0 {
        return Ok(SyscallReturn::Return(0));
    }
    let (interval, value) = ticks_of(new_addr)?;

    let mut itimer = current.itimer.lock();
    if let Some(handle) = itimer.handle.take() {
        timer::cancel(handle);
    }
    itimer.interval_ticks = interval;
    if value == 0 {
        itimer.expires = 0;
        return Ok(SyscallReturn::Return(0));
    }
    itimer.expires = now + value;
    let target = Arc::downgrade(&current);
    itimer.handle = Some(timer::schedule_after(value, move || {
        fire(target.clone(), interval);
    }));
    Ok(SyscallReturn::Return(0))
}

fn fire(target: Weak<crate::process::Process>, interval: u64) {
    let Some(task) = target.upgrade() else { return };
    task.enqueue_signal(Box::new(KernelSignal::new(SIGALRM)));
    let mut itimer = task.itimer.lock();
    if interval > 0 {
        itimer.expires = time::jiffies() + interval;
        let rearm = target.clone();
        itimer.handle = Some(timer::schedule_after(interval, move || {
            fire(rearm.clone(), interval);
        }));
    } else {
        itimer.handle = None;
        itimer.expires = 0;
    }
}
