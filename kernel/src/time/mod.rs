//! Timekeeping: the jiffies tick counter, the wall clock and one-shot
//! kernel timers.
//!
//! The PIT fires [`tick`] once per `1/HZ` second; the RTC glue seeds
//! the wall clock once at boot via [`set_wall_clock`].

pub mod timer;

use core::sync::atomic::{AtomicU64, Ordering};

pub const HZ: u64 = 100;
pub const NANOS_PER_TICK: u64 = 1_000_000_000 / HZ;

static JIFFIES: AtomicU64 = AtomicU64::new(0);
static BOOT_EPOCH_SECS: AtomicU64 = AtomicU64::new(0);

/// Ticks since boot.
pub fn jiffies() -> u64 {
    JIFFIES.load(Ordering::Relaxed)
}

/// Seconds since boot, rounded down.
pub fn uptime_secs() -> u64 {
    jiffies() / HZ
}

/// Seed the wall clock with the RTC reading taken at boot.
pub fn set_wall_clock(epoch_secs: u64) {
    BOOT_EPOCH_SECS.store(epoch_secs, Ordering::Relaxed);
}

/// Wall-clock time as `(secs, nanos)` since the Unix epoch.
pub fn wall_clock() -> (u64, u32) {
    let ticks = jiffies();
    let secs = BOOT_EPOCH_SECS.load(Ordering::Relaxed) + ticks / HZ;
    let nanos = ((ticks % HZ) * NANOS_PER_TICK) as u32;
    (secs, nanos)
}

/// Monotonic time as `(secs, nanos)` since boot.
pub fn monotonic_clock() -> (u64, u32) {
    let ticks = jiffies();
    (ticks / HZ, ((ticks % HZ) * NANOS_PER_TICK) as u32)
}

/// Timer-interrupt bottom half: advance time, expire timers, charge
/// the running task's slice.
pub fn tick() {
    let now = JIFFIES.fetch_add(1, Ordering::Relaxed) + 1;
    timer::run_expired(now);
    crate::sched::timer_tick();
}

#[cfg(test)]
pub(crate) fn advance_jiffies(ticks: u64) {
    for _ in 0..ticks {
        let now = JIFFIES.fetch_add(1, Ordering::Relaxed) + 1;
        timer::run_expired(now);
    }
}
