//! One-shot kernel timers, ordered by expiry tick.
//!
//! Callbacks run from the timer-interrupt bottom half and must not
//! block; they typically wake a task or re-arm themselves.

use alloc::{boxed::Box, collections::BTreeMap, vec::Vec};
use core::sync::atomic::{AtomicU64, Ordering};

use crate::sync::SpinLock;

type TimerFn = Box<dyn FnMut() + Send>;

static NEXT_SEQ: AtomicU64 = AtomicU64::new(0);

lazy_static::lazy_static! {
    static ref TIMERS: SpinLock<BTreeMap<(u64, u64), TimerFn>> = SpinLock::new(BTreeMap::new());
}

/// Handle for cancelling a pending timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerHandle {
    key: (u64, u64),
}

/// Run `callback` once jiffies reach `expires`.
pub fn schedule_at(expires: u64, callback: impl FnMut() + Send + 'static) -> TimerHandle {
    let key = (expires, NEXT_SEQ.fetch_add(1, Ordering::Relaxed));
    TIMERS.lock_irq_disabled().insert(key, Box::new(callback));
    TimerHandle { key }
}

/// Run `callback` after `ticks` more jiffies.
pub fn schedule_after(ticks: u64, callback: impl FnMut() + Send + 'static) -> TimerHandle {
    schedule_at(super::jiffies() + ticks, callback)
}

/// Cancel a pending timer; returns false when it already fired.
pub fn cancel(handle: TimerHandle) -> bool {
    TIMERS.lock_irq_disabled().remove(&handle.key).is_some()
}

/// Fire every timer whose expiry is at or before `now`.
pub(super) fn run_expired(now: u64) {
    let expired: Vec<TimerFn> = {
        let mut timers = TIMERS.lock_irq_disabled();
        let still_pending = timers.split_off(&(now + 1, 0));
        let expired = core::mem::replace(&mut *timers, still_pending);
        expired.into_values().collect()
    };
    for mut callback in expired {
        callback();
    }
}

#[cfg(test)]
mod tests {
    use alloc::sync::Arc;
    use core::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::time::advance_jiffies;

    #[test]
    fn fires_in_expiry_order() {
        let _guard = crate::mm::test_util::serialize_test();
        let fired = Arc::new(AtomicUsize::new(0));
        let base = crate::time::jiffies();
        let early = fired.clone();
        schedule_at(base + 2, move || {
            early.fetch_add(1, Ordering::Relaxed);
        });
        let late = fired.clone();
        schedule_at(base + 4, move || {
            late.fetch_add(10, Ordering::Relaxed);
        });
        advance_jiffies(2);
        assert_eq!(fired.load(Ordering::Relaxed), 1);
        advance_jiffies(2);
        assert_eq!(fired.load(Ordering::Relaxed), 11);
    }

    #[test]
    fn cancelled_timer_does_not_fire() {
        let _guard = crate::mm::test_util::serialize_test();
        let fired = Arc::new(AtomicUsize::new(0));
        let hit = fired.clone();
        let handle = schedule_after(3, move || {
            hit.fetch_add(1, Ordering::Relaxed);
        });
        assert!(cancel(handle));
        advance_jiffies(4);
        assert_eq!(fired.load(Ordering::Relaxed), 0);
        assert!(!cancel(handle));
    }
}
