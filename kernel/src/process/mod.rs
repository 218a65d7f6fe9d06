//! The process model: task descriptors, fork/exec/exit/wait, signals.

mod builder;
mod clone;
pub mod credentials;
mod exit;
pub mod process_filter;
pub mod program_loader;
pub mod ptrace;
pub mod rlimit;
pub mod signal;
mod status;
pub mod table;
mod wait;

use core::sync::atomic::{AtomicI32, AtomicU32, AtomicU8, AtomicUsize, Ordering};

use intrusive_collections::{intrusive_adapter, LinkedListAtomicLink};

pub use builder::ProcessBuilder;
pub use clone::{clone_process, CloneArgs, CloneFlags};
pub use credentials::Credentials;
pub use exit::do_exit;
pub use process_filter::ProcessFilter;
pub use rlimit::ResourceLimits;
pub use status::{stopped_wait_status, TaskState, TermStatus};
pub use wait::{wait_child_exit, WaitOptions};

use crate::{
    arch::UserContext,
    device::tty::Tty,
    fs::{file_table::FileTable, fs_resolver::FsResolver},
    mm::Vm,
    prelude::*,
    sched::{self, wait::WaitQueue},
    time::timer::TimerHandle,
    util::rusage::Rusage,
};

use self::signal::{
    constants::{SIGCONT, SIGKILL, SIGSTOP},
    sig_disposition::SigDispositions,
    sig_mask::SigMask,
    sig_num::SigNum,
    sig_queues::SigQueues,
    signals::Signal,
};

/// Process id.
pub type Pid = u32;
/// Process group id.
pub type Pgid = u32;
/// Session id.
pub type Sid = u32;

pub type ExitCode = i32;

/// Default timeslice (ticks) and priority for new tasks.
pub const DEFAULT_PRIORITY: i32 = 10;

#[derive(Debug, Default)]
pub struct ItimerState {
    pub handle: Option<TimerHandle>,
    pub interval_ticks: u64,
    pub expires: u64,
}

/// The process control block.
pub struct Process {
    pid: Pid,
    this: Weak<Process>,

    // Scheduling
    pub(crate) run_link: LinkedListAtomicLink,
    pub(crate) wait_link: LinkedListAtomicLink,
    state: AtomicU8,
    counter: AtomicI32,
    priority: AtomicI32,

    // Saved user-mode frame and the opaque kernel stack pointer the
    // context-switch primitive juggles.
    user_ctx: SpinLock<UserContext>,
    kstack: AtomicUsize,

    comm: SpinLock<String>,
    executable_path: RwLock<String>,

    // Hierarchy
    parent: SpinLock<Weak<Process>>,
    children: SpinLock<BTreeMap<Pid, Arc<Process>>>,

    // Shareable parts; each is independently shared or copied by
    // `clone` according to its flag.
    vm: SpinLock<Option<Arc<Vm>>>,
    file_table: SpinLock<Arc<Mutex<FileTable>>>,
    fs: SpinLock<Arc<RwLock<FsResolver>>>,
    sig_dispositions: SpinLock<Arc<Mutex<SigDispositions>>>,

    // Per-task signal state
    sig_mask: SpinLock<SigMask>,
    sig_queues: SpinLock<SigQueues>,
    saved_sigmask: SpinLock<Option<SigMask>>,
    sig_frames: SpinLock<Vec<Vaddr>>,

    // Job control
    pgid: AtomicU32,
    sid: AtomicU32,
    tty: SpinLock<Option<Arc<Tty>>>,

    // Exit / stop bookkeeping
    exit_status: SpinLock<Option<TermStatus>>,
    stop_status: SpinLock<Option<(SigNum, bool)>>,
    pub(crate) children_wait: WaitQueue,

    pub(crate) itimer: SpinLock<ItimerState>,
    rusage: Rusage,
    rlimits: SpinLock<ResourceLimits>,
    creds: Credentials,
    pub(crate) ptrace: SpinLock<ptrace::PtraceState>,
}

intrusive_adapter!(pub RunQueueAdapter = Arc<Process>: Process { run_link: LinkedListAtomicLink });
intrusive_adapter!(pub WaitQueueAdapter = Arc<Process>: Process { wait_link: LinkedListAtomicLink });

impl Process {
    pub fn pid(&self) -> Pid {
        self.pid
    }

    fn this(&self) -> Arc<Process> {
        self.this.upgrade().unwrap()
    }

    // ----- scheduling state -----

    pub fn state(&self) -> TaskState {
        TaskState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn set_state(&self, state: TaskState) {
        self.state.store(state as u8, Ordering::Release);
    }

    pub fn is_zombie(&self) -> bool {
        self.state() == TaskState::Zombie
    }

    pub fn counter(&self) -> i32 {
        self.counter.load(Ordering::Relaxed)
    }

    pub fn set_counter(&self, counter: i32) {
        self.counter.store(counter, Ordering::Relaxed);
    }

    pub fn dec_counter(&self) -> i32 {
        self.counter.fetch_sub(1, Ordering::Relaxed) - 1
    }

    pub fn priority(&self) -> i32 {
        self.priority.load(Ordering::Relaxed)
    }

    pub fn set_priority(&self, priority: i32) {
        self.priority.store(priority, Ordering::Relaxed);
    }

    pub fn is_on_run_queue(&self) -> bool {
        self.run_link.is_linked()
    }

    pub fn is_on_wait_queue(&self) -> bool {
        self.wait_link.is_linked()
    }

    pub fn user_ctx(&self) -> crate::sync::SpinLockGuard<'_, UserContext> {
        self.user_ctx.lock()
    }

    pub fn kstack(&self) -> usize {
        self.kstack.load(Ordering::Relaxed)
    }

    pub fn set_kstack(&self, sp: usize) {
        self.kstack.store(sp, Ordering::Relaxed);
    }

    // ----- naming -----

    pub fn comm(&self) -> String {
        self.comm.lock().clone()
    }

    pub fn set_comm(&self, comm: &str) {
        *self.comm.lock() = comm.to_string();
    }

    pub fn executable_path(&self) -> String {
        self.executable_path.read().clone()
    }

    pub fn set_executable_path(&self, path: &str) {
        *self.executable_path.write() = path.to_string();
    }

    // ----- hierarchy -----

    pub fn parent(&self) -> Option<Arc<Process>> {
        self.parent.lock().upgrade()
    }

    pub(crate) fn set_parent(&self, parent: Weak<Process>) {
        *self.parent.lock() = parent;
    }

    pub fn children(&self) -> &SpinLock<BTreeMap<Pid, Arc<Process>>> {
        &self.children
    }

    pub fn add_child(&self, child: Arc<Process>) {
        self.children.lock().insert(child.pid(), child);
    }

    // ----- shareable parts -----

    pub fn vm(&self) -> Option<Arc<Vm>> {
        self.vm.lock().clone()
    }

    /// Install a new address space, releasing the old one (the exec
    /// "build new, swap, release old" rule).
    pub fn swap_vm(&self, new: Arc<Vm>) {
        *self.vm.lock() = Some(new);
    }

    pub fn file_table(&self) -> Arc<Mutex<FileTable>> {
        self.file_table.lock().clone()
    }

    pub fn fs(&self) -> Arc<RwLock<FsResolver>> {
        self.fs.lock().clone()
    }

    pub fn sig_dispositions(&self) -> Arc<Mutex<SigDispositions>> {
        self.sig_dispositions.lock().clone()
    }

    pub fn rlimits(&self) -> &SpinLock<ResourceLimits> {
        &self.rlimits
    }

    pub fn creds(&self) -> &Credentials {
        &self.creds
    }

    pub fn rusage(&self) -> &Rusage {
        &self.rusage
    }

    // ----- job control -----

    pub fn pgid(&self) -> Pgid {
        self.pgid.load(Ordering::Relaxed)
    }

    pub fn set_pgid(&self, pgid: Pgid) {
        self.pgid.store(pgid, Ordering::Relaxed);
    }

    pub fn sid(&self) -> Sid {
        self.sid.load(Ordering::Relaxed)
    }

    pub fn set_sid(&self, sid: Sid) {
        self.sid.store(sid, Ordering::Relaxed);
    }

    pub fn tty(&self) -> Option<Arc<Tty>> {
        self.tty.lock().clone()
    }

    pub fn set_tty(&self, tty: Option<Arc<Tty>>) {
        *self.tty.lock() = tty;
    }

    // ----- signals -----

    pub fn sig_mask(&self) -> SigMask {
        *self.sig_mask.lock()
    }

    /// Replace the blocked mask. SIGKILL and SIGSTOP are silently kept
    /// unblockable.
    pub fn set_sig_mask(&self, mask: SigMask) {
        let mut sanitized = mask;
        sanitized.remove_signal(SIGKILL);
        sanitized.remove_signal(SIGSTOP);
        *self.sig_mask.lock() = sanitized;
    }

    pub fn saved_sigmask(&self) -> &SpinLock<Option<SigMask>> {
        &self.saved_sigmask
    }

    pub(crate) fn sig_frames(&self) -> &SpinLock<Vec<Vaddr>> {
        &self.sig_frames
    }

    pub fn pending_signals(&self) -> SigMask {
        self.sig_queues.lock().pending()
    }

    pub fn has_pending_signal(&self) -> bool {
        let blocked = *self.sig_mask.lock();
        self.sig_queues.lock().has_deliverable(&blocked)
    }

    pub fn dequeue_signal(&self) -> Option<Box<dyn Signal>> {
        let blocked = *self.sig_mask.lock();
        self.sig_queues.lock().dequeue(&blocked)
    }

    pub(crate) fn discard_pending(&self, num: SigNum) {
        self.sig_queues.lock().discard(num);
    }

    /// Post a signal to this task, waking it as required. SIGKILL
    /// yanks even stopped tasks back onto the run queue so the fatal
    /// default runs promptly; SIGCONT resumes a stopped task by
    /// itself.
    pub fn enqueue_signal(&self, signal: Box<dyn Signal>) {
        if self.is_zombie() {
            return;
        }
        let num = signal.num();
        if num == SIGCONT {
            self.sig_queues.lock().discard(SIGSTOP);
            if self.state() == TaskState::Stopped {
                self.clear_stop();
                self.set_state(TaskState::Running);
                sched::enqueue(&self.this());
            }
        }
        self.sig_queues.lock().enqueue(signal);
        match self.state() {
            TaskState::Sleeping if self.has_pending_signal() => {
                sched::wake_up_process(&self.this());
            }
            TaskState::Stopped if num == SIGKILL => {
                self.clear_stop();
                self.set_state(TaskState::Running);
                sched::enqueue(&self.this());
            }
            _ => {}
        }
    }

    // ----- exit / stop -----

    pub fn exit_status(&self) -> Option<TermStatus> {
        *self.exit_status.lock()
    }

    pub(crate) fn set_exit_status(&self, status: TermStatus) {
        *self.exit_status.lock() = Some(status);
    }

    /// Park the task as `Stopped` and remember the stopping signal for
    /// a `WUNTRACED` wait.
    pub(crate) fn mark_stopped(&self, num: SigNum) {
        *self.stop_status.lock() = Some((num, false));
        self.set_state(TaskState::Stopped);
        sched::remove_from_run_queue(&self.this());
    }

    pub(crate) fn clear_stop(&self) {
        *self.stop_status.lock() = None;
    }

    /// An unreported stop, consumed by `waitpid(WUNTRACED)`.
    pub(crate) fn take_unreported_stop(&self) -> Option<SigNum> {
        let mut stop = self.stop_status.lock();
        match *stop {
            Some((num, false)) => {
                *stop = Some((num, true));
                Some(num)
            }
            _ => None,
        }
    }
}

impl Debug for Process {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Process")
            .field("pid", &self.pid)
            .field("comm", &self.comm())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

// ----- the current task -----

static CURRENT: SpinLock<Option<Arc<Process>>> = SpinLock::new(None);

/// The task executing in kernel mode right now. Panics before the
/// first task is installed.
pub fn current() -> Arc<Process> {
    current_opt().expect("no current task")
}

pub fn current_opt() -> Option<Arc<Process>> {
    CURRENT.lock_irq_disabled().clone()
}

pub fn set_current(task: Option<Arc<Process>>) {
    *CURRENT.lock_irq_disabled() = task;
}

pub fn is_current(task: &Arc<Process>) -> bool {
    CURRENT
        .lock_irq_disabled()
        .as_ref()
        .is_some_and(|current| Arc::ptr_eq(current, task))
}
