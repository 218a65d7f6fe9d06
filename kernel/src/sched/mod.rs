//! The round-robin scheduler.
//!
//! One run queue of `Running` tasks (the current task is not on it).
//! `schedule` picks the queued task with the largest remaining
//! timeslice, ties broken by insertion order; when every runnable task
//! has exhausted its slice, all tasks (sleepers included) are
//! recharged with `new = old / 2 + priority` so sleepers accumulate a
//! boost. The actual stack switch is the boot glue's context-switch
//! primitive, registered through [`set_switch_hook`].

pub mod wait;

use core::sync::atomic::{AtomicBool, Ordering};

use intrusive_collections::LinkedList;
use spin::Once;

use crate::{
    prelude::*,
    process::{self, Process, RunQueueAdapter, TaskState},
    time::{self, timer},
};

static NEED_RESCHED: AtomicBool = AtomicBool::new(false);
static SWITCH_HOOK: Once<fn(Option<&Arc<Process>>, &Arc<Process>)> = Once::new();

lazy_static! {
    static ref RUN_QUEUE: SpinLock<LinkedList<RunQueueAdapter>> =
        SpinLock::new(LinkedList::new(RunQueueAdapter::new()));
}

/// Register the context-switch primitive. Without one (host tests),
/// `schedule` only performs the bookkeeping.
pub fn set_switch_hook(hook: fn(Option<&Arc<Process>>, &Arc<Process>)) {
    SWITCH_HOOK.call_once(|| hook);
}

/// Put a `Running` task on the run queue. Harmless if it is already
/// queued; never allocates, so IRQ handlers may call it via
/// [`wake_up_process`].
pub fn enqueue(task: &Arc<Process>) {
    let mut rq = RUN_QUEUE.lock_irq_disabled();
    if !task.is_on_run_queue() {
        rq.push_back(task.clone());
    }
}

fn dequeue(task: &Arc<Process>) {
    let mut rq = RUN_QUEUE.lock_irq_disabled();
    let mut cursor = rq.front_mut();
    while let Some(queued) = cursor.get() {
        if core::ptr::eq(queued, Arc::as_ptr(task)) {
            cursor.remove();
            return;
        }
        cursor.move_next();
    }
}

/// Make a sleeping task runnable again.
pub fn wake_up_process(task: &Arc<Process>) {
    if task.state() == TaskState::Sleeping {
        task.set_state(TaskState::Running);
    }
    if task.state() == TaskState::Running && !process::is_current(task) {
        enqueue(task);
    }
}

/// Take a stopped or queued task off the scheduler entirely
/// (SIGSTOP, zombie reaping).
pub fn remove_from_run_queue(task: &Arc<Process>) {
    if task.is_on_run_queue() {
        dequeue(task);
    }
}

/// Timer-tick accounting: charge the current task one tick.
pub fn timer_tick() {
    if let Some(current) = process::current_opt() {
        if current.dec_counter() <= 0 {
            NEED_RESCHED.store(true, Ordering::Relaxed);
        }
    }
}

/// Whether the return-to-user path should reschedule.
pub fn need_resched() -> bool {
    NEED_RESCHED.load(Ordering::Relaxed)
}

fn best_queued() -> Option<(*const Process, i32)> {
    let rq = RUN_QUEUE.lock_irq_disabled();
    let mut best: Option<(*const Process, i32)> = None;
    let mut cursor = rq.front();
    while let Some(task) = cursor.get() {
        let counter = task.counter();
        // Strict comparison keeps the earliest-inserted maximum.
        if best.map_or(true, |(_, c)| counter > c) {
            best = Some((task as *const Process, counter));
        }
        cursor.move_next();
    }
    best
}

fn take_by_ptr(ptr: *const Process) -> Option<Arc<Process>> {
    let mut rq = RUN_QUEUE.lock_irq_disabled();
    let mut cursor = rq.front_mut();
    while let Some(task) = cursor.get() {
        if core::ptr::eq(task, ptr) {
            return cursor.remove();
        }
        cursor.move_next();
    }
    None
}

fn pick_next() -> Option<Arc<Process>> {
    let (ptr, counter) = best_queued()?;
    if counter > 0 {
        return take_by_ptr(ptr);
    }
    // Every runnable task has run dry: recharge the whole task list.
    process::table::for_each(|task| {
        task.set_counter(task.counter() / 2 + task.priority());
    });
    let (ptr, _) = best_queued()?;
    take_by_ptr(ptr)
}

/// Yield the CPU to the best runnable task.
pub fn schedule() {
    NEED_RESCHED.store(false, Ordering::Relaxed);
    let prev = process::current_opt();
    let Some(next) = pick_next() else {
        // Nothing else is runnable; stay on the current task (the
        // boot glue idles when even that is gone).
        return;
    };
    if let Some(prev) = &prev {
        if Arc::ptr_eq(prev, &next) {
            return;
        }
        if prev.state() == TaskState::Running {
            enqueue(prev);
        }
    }
    process::set_current(Some(next.clone()));
    if let Some(hook) = SWITCH_HOOK.get() {
        hook(prev.as_ref(), &next);
    }
}

/// Sleep until woken or until `ticks` jiffies elapse; returns the
/// ticks left on the timer (0 means it expired).
pub fn schedule_timeout(ticks: u64) -> u64 {
    let current = current!();
    let deadline = time::jiffies() + ticks;
    let target = Arc::downgrade(&current);
    let handle = timer::schedule_at(deadline, move || {
        if let Some(task) = target.upgrade() {
            wake_up_process(&task);
        }
    });
    current.set_state(TaskState::Sleeping);
    schedule();
    timer::cancel(handle);
    deadline.saturating_sub(time::jiffies())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::ProcessBuilder;

    fn spawn(priority: i32, counter: i32) -> Arc<Process> {
        let task = ProcessBuilder::new_kernel_stub().build().unwrap();
        task.set_priority(priority);
        task.set_counter(counter);
        task
    }

    #[test]
    fn picks_largest_counter_then_fifo() {
        let _guard = crate::mm::test_util::serialize_test();
        let a = spawn(10, 5);
        let b = spawn(10, 9);
        let c = spawn(10, 9);
        enqueue(&a);
        enqueue(&b);
        enqueue(&c);
        // b and c tie; b was inserted first.
        assert_eq!(pick_next().unwrap().pid(), b.pid());
        assert_eq!(pick_next().unwrap().pid(), c.pid());
        assert_eq!(pick_next().unwrap().pid(), a.pid());
        for task in [a, b, c] {
            process::table::remove(task.pid());
        }
    }

    #[test]
    fn recharge_boosts_sleepers() {
        let _guard = crate::mm::test_util::serialize_test();
        let runner = spawn(5, 0);
        let sleeper = spawn(5, 8);
        sleeper.set_state(TaskState::Sleeping);
        enqueue(&runner);
        // Runner is dry, so the pick recharges everyone first.
        let picked = pick_next().unwrap();
        assert_eq!(picked.pid(), runner.pid());
        assert_eq!(runner.counter(), 5);
        // The sleeper kept half its slice on top of its priority.
        assert_eq!(sleeper.counter(), 8 / 2 + 5);
        process::table::remove(runner.pid());
        process::table::remove(sleeper.pid());
    }

    #[test]
    fn wake_up_requeues_sleeping_task() {
        let _guard = crate::mm::test_util::serialize_test();
        let task = spawn(5, 5);
        task.set_state(TaskState::Sleeping);
        wake_up_process(&task);
        assert_eq!(task.state(), TaskState::Running);
        assert!(task.is_on_run_queue());
        remove_from_run_queue(&task);
        process::table::remove(task.pid());
    }
}
