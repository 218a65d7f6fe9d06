use super::{table, Process, TaskState, TermStatus};
use crate::{
    prelude::*,
    process::signal::{constants::SIGCHLD, signals::kernel::KernelSignal},
    sched,
    time::timer,
};

/// Terminate the current process: release its resources, hand the
/// children to init, tell the parent, and become a zombie awaiting
/// `wait`. On real hardware the final `schedule` never returns.
pub fn do_exit(term_status: TermStatus) {
    let current = current!();
    if current.is_zombie() {
        return;
    }
    current.set_exit_status(term_status);

    if let Some(handle) = current.itimer.lock().handle.take() {
        timer::cancel(handle);
    }

    current.release_resources();
    reparent_children_to_init(&current);

    current.set_state(TaskState::Zombie);
    sched::remove_from_run_queue(&current);

    if let Some(parent) = current.parent() {
        parent.enqueue_signal(Box::new(KernelSignal::new(SIGCHLD)));
        parent.children_wait.wake_all();
    }

    sched::schedule();
}

fn reparent_children_to_init(exiting: &Arc<Process>) {
    let mut children = exiting.children().lock();
    if children.is_empty() {
        return;
    }
    let Some(init) = table::init_process() else {
        children.clear();
        return;
    };
    if init.pid() == exiting.pid() {
        panic!("init exited with children");
    }
    let orphans: Vec<_> = core::mem::take(&mut *children).into_values().collect();
    drop(children);
    for orphan in orphans {
        orphan.set_parent(Arc::downgrade(&init));
        let was_zombie = orphan.is_zombie();
        init.add_child(orphan);
        // A zombie orphan must still get reaped.
        if was_zombie {
            init.enqueue_signal(Box::new(KernelSignal::new(SIGCHLD)));
            init.children_wait.wake_all();
        }
    }
}

impl Process {
    /// Drop this task's grip on its address space, open files and
    /// filesystem context. Shared parts survive for their other users.
    pub(crate) fn release_resources(&self) {
        use crate::fs::{file_table::FileTable, fs_resolver::FsResolver};

        *self.vm.lock() = None;

        let file_table = self.file_table();
        if Arc::strong_count(&file_table) <= 2 {
            // This task was the last real user (one count here, one in
            // the field); close every descriptor now so device release
            // hooks run.
            file_table.lock().close_all();
        }
        *self.file_table.lock() = Arc::new(Mutex::new(FileTable::new()));
        *self.fs.lock() = Arc::new(RwLock::new(FsResolver::unrooted()));
        *self.tty.lock() = None;
    }
}
