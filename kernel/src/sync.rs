//! Locking primitives.
//!
//! The kernel is single-CPU and non-preemptive: a lock is only ever
//! contended against interrupt context. `SpinLock::lock_irq_disabled`
//! is therefore the discipline for any state an IRQ handler touches;
//! plain `lock` suffices for task-only state.

use core::{
    fmt,
    ops::{Deref, DerefMut},
};

pub use spin::{Mutex, MutexGuard, Once, RwLock};

use crate::arch::irq::{self, DisabledLocalIrqGuard};

pub struct SpinLock<T: ?Sized> {
    inner: Mutex<T>,
}

impl<T> SpinLock<T> {
    pub const fn new(value: T) -> Self {
        Self {
            inner: Mutex::new(value),
        }
    }
}

impl<T: ?Sized> SpinLock<T> {
    pub fn lock(&self) -> SpinLockGuard<'_, T> {
        SpinLockGuard {
            guard: self.inner.lock(),
            irq_guard: None,
        }
    }

    /// Acquire the lock with local interrupts masked for the guard's
    /// lifetime.
    pub fn lock_irq_disabled(&self) -> SpinLockGuard<'_, T> {
        let irq_guard = irq::disable_local();
        SpinLockGuard {
            guard: self.inner.lock(),
            irq_guard: Some(irq_guard),
        }
    }
}

impl<T: ?Sized + fmt::Debug> fmt::Debug for SpinLock<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.inner.fmt(f)
    }
}

// The lock is dropped before the IRQ guard (field order), so interrupts
// stay masked until the protected state is consistent again.
pub struct SpinLockGuard<'a, T: ?Sized> {
    guard: MutexGuard<'a, T>,
    irq_guard: Option<DisabledLocalIrqGuard>,
}

impl<T: ?Sized> Deref for SpinLockGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T: ?Sized> DerefMut for SpinLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}
