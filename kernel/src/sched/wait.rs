//! FIFO wait queues.
//!
//! A task sleeps by linking itself onto a queue and yielding; wakers
//! move queued tasks back to the run queue. `wake_all` releases every
//! waiter, `wake_one` the longest-waiting. Enqueue and wake never
//! allocate, so IRQ handlers may wake freely.

use intrusive_collections::LinkedList;

use super::{schedule, wake_up_process};
use crate::{
    prelude::*,
    process::{Process, TaskState, WaitQueueAdapter},
};

pub struct WaitQueue {
    queue: SpinLock<LinkedList<WaitQueueAdapter>>,
}

impl Default for WaitQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl WaitQueue {
    pub fn new() -> Self {
        Self {
            queue: SpinLock::new(LinkedList::new(WaitQueueAdapter::new())),
        }
    }

    /// Sleep until `cond` yields a value; a pending unblocked signal
    /// interrupts the sleep with `EINTR`.
    pub fn wait_until<F, R>(&self, mut cond: F) -> Result<R>
    where
        F: FnMut() -> Option<R>,
    {
        #[cfg(test)]
        let mut spins = 0usize;
        loop {
            if let Some(res) = cond() {
                return Ok(res);
            }
            let current = current!();
            if current.has_pending_signal() {
                return_errno_with_message!(Errno::EINTR, "sleep interrupted by signal");
            }
            self.enqueue(&current);
            current.set_state(TaskState::Sleeping);
            schedule();
            self.remove(&current);
            current.set_state(TaskState::Running);
            #[cfg(test)]
            {
                // Host tests have no context switch; a sleep that would
                // block forever is a test bug, not a wait.
                spins += 1;
                if spins > 64 {
                    panic!("wait_until would block forever in host test");
                }
            }
        }
    }

    /// One interruptible sleep iteration (classic `sleep_on`): the
    /// caller re-checks its condition after this returns.
    pub fn sleep_on(&self) {
        let current = current!();
        self.enqueue(&current);
        current.set_state(TaskState::Sleeping);
        schedule();
        self.remove(&current);
        current.set_state(TaskState::Running);
    }

    /// Wake every waiter, FIFO order.
    pub fn wake_all(&self) {
        loop {
            let task = self.queue.lock_irq_disabled().pop_front();
            match task {
                Some(task) => wake_up_process(&task),
                None => break,
            }
        }
    }

    /// Wake exactly the longest-waiting task; returns whether one
    /// was woken.
    pub fn wake_one(&self) -> bool {
        let task = self.queue.lock_irq_disabled().pop_front();
        match task {
            Some(task) => {
                wake_up_process(&task);
                true
            }
            None => false,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.queue.lock_irq_disabled().is_empty()
    }

    fn enqueue(&self, task: &Arc<Process>) {
        let mut queue = self.queue.lock_irq_disabled();
        if !task.is_on_wait_queue() {
            queue.push_back(task.clone());
        }
    }

    fn remove(&self, task: &Arc<Process>) {
        let mut queue = self.queue.lock_irq_disabled();
        let mut cursor = queue.front_mut();
        while let Some(queued) = cursor.get() {
            if core::ptr::eq(queued, Arc::as_ptr(task)) {
                cursor.remove();
                return;
            }
            cursor.move_next();
        }
    }
}

impl Debug for WaitQueue {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("WaitQueue").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::ProcessBuilder;

    #[test]
    fn wake_one_is_fifo() {
        let _guard = crate::mm::test_util::serialize_test();
        let queue = WaitQueue::new();
        let first = ProcessBuilder::new_kernel_stub().build().unwrap();
        let second = ProcessBuilder::new_kernel_stub().build().unwrap();
        queue.enqueue(&first);
        queue.enqueue(&second);
        first.set_state(TaskState::Sleeping);
        second.set_state(TaskState::Sleeping);

        assert!(queue.wake_one());
        assert_eq!(first.state(), TaskState::Running);
        assert_eq!(second.state(), TaskState::Sleeping);
        assert!(queue.wake_one());
        assert_eq!(second.state(), TaskState::Running);
        assert!(!queue.wake_one());

        crate::sched::remove_from_run_queue(&first);
        crate::sched::remove_from_run_queue(&second);
        crate::process::table::remove(first.pid());
        crate::process::table::remove(second.pid());
    }

    #[test]
    fn wake_all_releases_everyone() {
        let _guard = crate::mm::test_util::serialize_test();
        let queue = WaitQueue::new();
        let tasks: alloc::vec::Vec<_> = (0..3)
            .map(|_| ProcessBuilder::new_kernel_stub().build().unwrap())
            .collect();
        for task in &tasks {
            queue.enqueue(task);
            task.set_state(TaskState::Sleeping);
        }
        queue.wake_all();
        assert!(queue.is_empty());
        for task in &tasks {
            assert_eq!(task.state(), TaskState::Running);
            crate::sched::remove_from_run_queue(task);
            crate::process::table::remove(task.pid());
        }
    }
}
