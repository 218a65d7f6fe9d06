use super::{
    constants::{MAX_RT_QUEUED, MAX_STD_SIG_NUM},
    sig_mask::{SigMask, SigSet},
    sig_num::SigNum,
    signals::Signal,
};
use crate::prelude::*;

type QueuedSignal = Box<dyn Signal>;

/// Per-task pending signals.
///
/// Standard signals (< 32) keep at most one queued instance; real-time
/// signals queue every instance up to a bound. Delivery order is
/// lowest signal number first.
pub struct SigQueues {
    pending: SigSet,
    std: [Option<QueuedSignal>; MAX_STD_SIG_NUM as usize],
    rt: BTreeMap<u8, VecDeque<QueuedSignal>>,
    rt_count: usize,
}

impl Default for SigQueues {
    fn default() -> Self {
        Self::new()
    }
}

impl SigQueues {
    pub fn new() -> Self {
        Self {
            pending: SigSet::new_empty(),
            std: [const { None }; MAX_STD_SIG_NUM as usize],
            rt: BTreeMap::new(),
            rt_count: 0,
        }
    }

    pub fn pending(&self) -> SigSet {
        self.pending
    }

    /// True if any signal outside `blocked` is deliverable.
    pub fn has_deliverable(&self, blocked: &SigMask) -> bool {
        !(self.pending - *blocked).is_empty()
    }

    /// Queue one instance; duplicate standard signals collapse.
    pub fn enqueue(&mut self, signal: QueuedSignal) {
        let num = signal.num();
        if num.is_real_time() {
            if self.rt_count >= MAX_RT_QUEUED {
                return;
            }
            self.rt.entry(num.as_u8()).or_default().push_back(signal);
            self.rt_count += 1;
        } else {
            let slot = &mut self.std[(num.as_u8() - 1) as usize];
            if slot.is_none() {
                *slot = Some(signal);
            }
        }
        self.pending.add_signal(num);
    }

    /// Take the lowest-numbered deliverable signal.
    pub fn dequeue(&mut self, blocked: &SigMask) -> Option<QueuedSignal> {
        let num = (self.pending - *blocked).lowest()?;
        if num.is_real_time() {
            let queue = self.rt.get_mut(&num.as_u8())?;
            let signal = queue.pop_front();
            self.rt_count -= 1;
            if queue.is_empty() {
                self.rt.remove(&num.as_u8());
                self.pending.remove_signal(num);
            }
            signal
        } else {
            let signal = self.std[(num.as_u8() - 1) as usize].take();
            self.pending.remove_signal(num);
            signal
        }
    }

    /// Drop a pending standard signal without delivering it (used when
    /// a disposition becomes ignore, and by SIGCONT/stop interplay).
    pub fn discard(&mut self, num: SigNum) {
        if num.is_real_time() {
            if let Some(queue) = self.rt.remove(&num.as_u8()) {
                self.rt_count -= queue.len();
            }
        } else {
            self.std[(num.as_u8() - 1) as usize] = None;
        }
        self.pending.remove_signal(num);
    }
}

impl Debug for SigQueues {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SigQueues")
            .field("pending", &self.pending)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::signal::{
        constants::{SIGINT, SIGTERM},
        signals::kernel::KernelSignal,
    };

    #[test]
    fn std_signals_collapse() {
        let mut queues = SigQueues::new();
        queues.enqueue(Box::new(KernelSignal::new(SIGINT)));
        queues.enqueue(Box::new(KernelSignal::new(SIGINT)));
        let blocked = SigMask::new_empty();
        assert!(queues.dequeue(&blocked).is_some());
        assert!(queues.dequeue(&blocked).is_none());
    }

    #[test]
    fn rt_signals_queue_every_instance() {
        let mut queues = SigQueues::new();
        let rt = SigNum::from_u8(40);
        queues.enqueue(Box::new(KernelSignal::new(rt)));
        queues.enqueue(Box::new(KernelSignal::new(rt)));
        let blocked = SigMask::new_empty();
        assert!(queues.dequeue(&blocked).is_some());
        assert!(queues.dequeue(&blocked).is_some());
        assert!(queues.dequeue(&blocked).is_none());
    }

    #[test]
    fn blocked_signals_stay_pending() {
        let mut queues = SigQueues::new();
        queues.enqueue(Box::new(KernelSignal::new(SIGTERM)));
        let mut blocked = SigMask::new_empty();
        blocked.add_signal(SIGTERM);
        assert!(queues.dequeue(&blocked).is_none());
        assert!(queues.pending().contains(SIGTERM));
        let unblocked = SigMask::new_empty();
        assert_eq!(queues.dequeue(&unblocked).unwrap().num(), SIGTERM);
    }

    #[test]
    fn lowest_number_delivered_first() {
        let mut queues = SigQueues::new();
        queues.enqueue(Box::new(KernelSignal::new(SIGTERM)));
        queues.enqueue(Box::new(KernelSignal::new(SIGINT)));
        let blocked = SigMask::new_empty();
        assert_eq!(queues.dequeue(&blocked).unwrap().num(), SIGINT);
        assert_eq!(queues.dequeue(&blocked).unwrap().num(), SIGTERM);
    }
}
