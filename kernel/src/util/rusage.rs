use core::sync::atomic::{AtomicU64, Ordering};

/// Per-task resource accounting, in ticks and counts.
#[derive(Debug, Default)]
pub struct Rusage {
    pub utime: AtomicU64,
    pub stime: AtomicU64,
    pub min_flt: AtomicU64,
    pub maj_flt: AtomicU64,
}

impl Rusage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn charge_user_tick(&self) {
        self.utime.fetch_add(1, Ordering::Relaxed);
    }

    pub fn charge_sys_tick(&self) {
        self.stime.fetch_add(1, Ordering::Relaxed);
    }

    pub fn count_minor_fault(&self) {
        self.min_flt.fetch_add(1, Ordering::Relaxed);
    }

    pub fn count_major_fault(&self) {
        self.maj_flt.fetch_add(1, Ordering::Relaxed);
    }

    pub fn utime_ticks(&self) -> u64 {
        self.utime.load(Ordering::Relaxed)
    }

    pub fn stime_ticks(&self) -> u64 {
        self.stime.load(Ordering::Relaxed)
    }
}
