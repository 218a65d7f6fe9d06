//! Scoped local-interrupt masking.
//!
//! The kernel's only synchronization against asynchronous context is
//! "disable local interrupts for the critical section". The guard
//! restores the previous state on drop, so regions nest.

use core::sync::atomic::{AtomicBool, Ordering};

// Mirrors the EFLAGS.IF state so nesting works without reading the
// flags register on every drop. Off-target it is the whole model.
static LOCAL_ENABLED: AtomicBool = AtomicBool::new(true);

#[inline]
fn raw_disable() {
    #[cfg(target_arch = "x86")]
    // SAFETY: masking interrupts has no memory effect.
    unsafe {
        core::arch::asm!("cli", options(nomem, nostack));
    }
}

#[inline]
fn raw_enable() {
    #[cfg(target_arch = "x86")]
    // SAFETY: see raw_disable.
    unsafe {
        core::arch::asm!("sti", options(nomem, nostack));
    }
}

/// Disable local interrupts, returning a guard that restores the
/// previous state when dropped.
#[must_use]
pub fn disable_local() -> DisabledLocalIrqGuard {
    let was_enabled = LOCAL_ENABLED.swap(false, Ordering::Acquire);
    if was_enabled {
        raw_disable();
    }
    DisabledLocalIrqGuard { was_enabled }
}

/// Whether local interrupts are currently enabled.
pub fn is_local_enabled() -> bool {
    LOCAL_ENABLED.load(Ordering::Relaxed)
}

#[derive(Debug)]
pub struct DisabledLocalIrqGuard {
    was_enabled: bool,
}

impl Drop for DisabledLocalIrqGuard {
    fn drop(&mut self) {
        if self.was_enabled {
            LOCAL_ENABLED.store(true, Ordering::Release);
            raw_enable();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_nests_and_restores() {
        assert!(is_local_enabled());
        let outer = disable_local();
        assert!(!is_local_enabled());
        {
            let _inner = disable_local();
            assert!(!is_local_enabled());
        }
        // Inner drop must not re-enable while the outer region is live.
        assert!(!is_local_enabled());
        drop(outer);
        assert!(is_local_enabled());
    }
}
