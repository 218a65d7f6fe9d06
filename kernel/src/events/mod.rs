//! I/O readiness events and the poll plumbing.
//!
//! Every pollable object owns a [`Pollee`] describing its current
//! readiness; a [`Poller`] subscribes to any number of pollees and
//! sleeps until one of them changes. This is the backing for the
//! `select`/`poll` syscalls and for blocking reads and writes.

use core::sync::atomic::{AtomicBool, Ordering};

use crate::{prelude::*, sched::wait::WaitQueue};

bitflags! {
    pub struct IoEvents: u32 {
        const IN    = 0x0001;
        const PRI   = 0x0002;
        const OUT   = 0x0004;
        const ERR   = 0x0008;
        const HUP   = 0x0010;
        const NVAL  = 0x0020;
        const RDHUP = 0x2000;
    }
}

struct PollerInner {
    triggered: AtomicBool,
    queue: WaitQueue,
}

/// One wait for readiness across any number of pollees.
pub struct Poller {
    inner: Arc<PollerInner>,
}

impl Default for Poller {
    fn default() -> Self {
        Self::new()
    }
}

impl Poller {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(PollerInner {
                triggered: AtomicBool::new(false),
                queue: WaitQueue::new(),
            }),
        }
    }

    /// Sleep until any subscribed pollee fires. `EINTR` on signal.
    pub fn wait(&self) -> Result<()> {
        self.inner.queue.wait_until(|| {
            self.inner
                .triggered
                .swap(false, Ordering::Acquire)
                .then_some(())
        })
    }

    /// Consume a pending notification without sleeping.
    pub fn consume_event(&self) -> bool {
        self.inner.triggered.swap(false, Ordering::Acquire)
    }
}

/// The readiness state of one I/O object.
pub struct Pollee {
    inner: SpinLock<PolleeState>,
}

struct PolleeState {
    events: IoEvents,
    observers: Vec<Weak<PollerInner>>,
}

impl Pollee {
    pub fn new(init: IoEvents) -> Self {
        Self {
            inner: SpinLock::new(PolleeState {
                events: init,
                observers: Vec::new(),
            }),
        }
    }

    /// Current events intersected with `mask`; registering `poller`
    /// first so no wake-up between check and sleep is lost.
    pub fn poll(&self, mask: IoEvents, poller: Option<&Poller>) -> IoEvents {
        let mut state = self.inner.lock_irq_disabled();
        if let Some(poller) = poller {
            state.observers.retain(|weak| weak.strong_count() > 0);
            state.observers.push(Arc::downgrade(&poller.inner));
        }
        state.events & mask
    }

    pub fn add_events(&self, events: IoEvents) {
        let observers = {
            let mut state = self.inner.lock_irq_disabled();
            state.events |= events;
            core::mem::take(&mut state.observers)
        };
        for weak in observers {
            if let Some(observer) = weak.upgrade() {
                observer.triggered.store(true, Ordering::Release);
                observer.queue.wake_all();
            }
        }
    }

    pub fn del_events(&self, events: IoEvents) {
        self.inner.lock_irq_disabled().events -= events;
    }

    pub fn events(&self) -> IoEvents {
        self.inner.lock_irq_disabled().events
    }
}

impl Debug for Pollee {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Pollee")
            .field("events", &self.events())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn poll_masks_events() {
        let pollee = Pollee::new(IoEvents::OUT);
        assert_eq!(pollee.poll(IoEvents::IN, None), IoEvents::empty());
        assert_eq!(pollee.poll(IoEvents::OUT, None), IoEvents::OUT);
        pollee.add_events(IoEvents::IN);
        assert_eq!(
            pollee.poll(IoEvents::IN | IoEvents::OUT, None),
            IoEvents::IN | IoEvents::OUT
        );
        pollee.del_events(IoEvents::OUT);
        assert_eq!(pollee.poll(IoEvents::OUT, None), IoEvents::empty());
    }

    #[test]
    fn registered_poller_sees_trigger() {
        let pollee = Pollee::new(IoEvents::empty());
        let poller = Poller::new();
        assert_eq!(pollee.poll(IoEvents::IN, Some(&poller)), IoEvents::empty());
        assert!(!poller.consume_event());
        pollee.add_events(IoEvents::IN);
        assert!(poller.consume_event());
        // One-shot: registration was consumed by the notification.
        pollee.add_events(IoEvents::OUT);
        assert!(!poller.consume_event());
    }
}
