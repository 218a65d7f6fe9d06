use core::sync::atomic::{AtomicI32, AtomicU32, AtomicU8, AtomicUsize, Ordering};

use intrusive_collections::LinkedListAtomicLink;

use super::{
    credentials::Credentials,
    ptrace::PtraceState,
    rlimit::ResourceLimits,
    signal::{sig_disposition::SigDispositions, sig_mask::SigMask, sig_queues::SigQueues},
    table, ItimerState, Pgid, Pid, Process, Sid, TaskState, DEFAULT_PRIORITY,
};
use crate::{
    arch::UserContext,
    device::tty::Tty,
    fs::{file_table::FileTable, fs_resolver::FsResolver},
    mm::Vm,
    prelude::*,
    sched::wait::WaitQueue,
    util::rusage::Rusage,
};

static NEXT_PID: AtomicU32 = AtomicU32::new(1);

fn allocate_pid() -> Pid {
    NEXT_PID.fetch_add(1, Ordering::Relaxed)
}

/// Assembles a new task and registers it in the task table.
pub struct ProcessBuilder {
    parent: Weak<Process>,
    comm: String,
    executable_path: String,
    vm: Option<Arc<Vm>>,
    file_table: Option<Arc<Mutex<FileTable>>>,
    fs: Option<Arc<RwLock<FsResolver>>>,
    sig_dispositions: Option<Arc<Mutex<SigDispositions>>>,
    sig_mask: SigMask,
    creds: Option<Credentials>,
    rlimits: ResourceLimits,
    pgid: Pgid,
    sid: Sid,
    tty: Option<Arc<Tty>>,
    user_ctx: UserContext,
}

impl ProcessBuilder {
    pub fn new(comm: &str) -> Self {
        Self {
            parent: Weak::new(),
            comm: comm.to_string(),
            executable_path: String::new(),
            vm: None,
            file_table: None,
            fs: None,
            sig_dispositions: None,
            sig_mask: SigMask::new_empty(),
            creds: None,
            rlimits: ResourceLimits::default(),
            pgid: 0,
            sid: 0,
            tty: None,
            user_ctx: UserContext::default(),
        }
    }

    /// A bare task with no user address space; the boot idle task and
    /// scheduler tests use these.
    pub fn new_kernel_stub() -> Self {
        Self::new("kthread")
    }

    pub fn parent(mut self, parent: Weak<Process>) -> Self {
        self.parent = parent;
        self
    }

    pub fn executable_path(mut self, path: &str) -> Self {
        self.executable_path = path.to_string();
        self
    }

    pub fn vm(mut self, vm: Arc<Vm>) -> Self {
        self.vm = Some(vm);
        self
    }

    pub fn file_table(mut self, file_table: Arc<Mutex<FileTable>>) -> Self {
        self.file_table = Some(file_table);
        self
    }

    pub fn fs(mut self, fs: Arc<RwLock<FsResolver>>) -> Self {
        self.fs = Some(fs);
        self
    }

    pub fn sig_dispositions(mut self, dispositions: Arc<Mutex<SigDispositions>>) -> Self {
        self.sig_dispositions = Some(dispositions);
        self
    }

    pub fn sig_mask(mut self, mask: SigMask) -> Self {
        self.sig_mask = mask;
        self
    }

    pub fn credentials(mut self, creds: Credentials) -> Self {
        self.creds = Some(creds);
        self
    }

    pub fn rlimits(mut self, rlimits: ResourceLimits) -> Self {
        self.rlimits = rlimits;
        self
    }

    pub fn job_control(mut self, pgid: Pgid, sid: Sid) -> Self {
        self.pgid = pgid;
        self.sid = sid;
        self
    }

    pub fn tty(mut self, tty: Option<Arc<Tty>>) -> Self {
        self.tty = tty;
        self
    }

    pub fn user_ctx(mut self, ctx: UserContext) -> Self {
        self.user_ctx = ctx;
        self
    }

    pub fn build(self) -> Result<Arc<Process>> {
        let pid = allocate_pid();
        let pgid = if self.pgid == 0 { pid } else { self.pgid };
        let sid = if self.sid == 0 { pid } else { self.sid };
        let parent = self.parent.clone();
        let process = Arc::new_cyclic(|this| Process {
            pid,
            this: this.clone(),
            run_link: LinkedListAtomicLink::new(),
            wait_link: LinkedListAtomicLink::new(),
            state: AtomicU8::new(TaskState::Running as u8),
            counter: AtomicI32::new(DEFAULT_PRIORITY),
            priority: AtomicI32::new(DEFAULT_PRIORITY),
            user_ctx: SpinLock::new(self.user_ctx),
            kstack: AtomicUsize::new(0),
            comm: SpinLock::new(self.comm),
            executable_path: RwLock::new(self.executable_path),
            parent: SpinLock::new(self.parent),
            children: SpinLock::new(BTreeMap::new()),
            vm: SpinLock::new(self.vm),
            file_table: SpinLock::new(
                self.file_table
                    .unwrap_or_else(|| Arc::new(Mutex::new(FileTable::new()))),
            ),
            fs: SpinLock::new(
                self.fs
                    .unwrap_or_else(|| Arc::new(RwLock::new(FsResolver::unrooted()))),
            ),
            sig_dispositions: SpinLock::new(
                self.sig_dispositions
                    .unwrap_or_else(|| Arc::new(Mutex::new(SigDispositions::new()))),
            ),
            sig_mask: SpinLock::new(self.sig_mask),
            sig_queues: SpinLock::new(SigQueues::new()),
            saved_sigmask: SpinLock::new(None),
            sig_frames: SpinLock::new(Vec::new()),
            pgid: AtomicU32::new(pgid),
            sid: AtomicU32::new(sid),
            tty: SpinLock::new(self.tty),
            exit_status: SpinLock::new(None),
            stop_status: SpinLock::new(None),
            children_wait: WaitQueue::new(),
            itimer: SpinLock::new(ItimerState::default()),
            rusage: Rusage::new(),
            rlimits: SpinLock::new(self.rlimits),
            creds: self.creds.unwrap_or_else(Credentials::new_root),
            ptrace: SpinLock::new(PtraceState::default()),
        });
        if let Some(parent) = parent.upgrade() {
            parent.add_child(process.clone());
        }
        table::insert(process.clone());
        Ok(process)
    }
}
