//! Minimal ptrace: attach/detach, register and memory peeks, and
//! resumption. Stop parking reuses the job-control stop machinery.

use super::{
    signal::{constants::SIGSTOP, signals::user::UserSignal},
    table, Pid, Process, TaskState,
};
use crate::{arch::UserContext, prelude::*, sched};

pub const PTRACE_TRACEME: u32 = 0;
pub const PTRACE_PEEKTEXT: u32 = 1;
pub const PTRACE_PEEKDATA: u32 = 2;
pub const PTRACE_POKETEXT: u32 = 4;
pub const PTRACE_POKEDATA: u32 = 5;
pub const PTRACE_CONT: u32 = 7;
pub const PTRACE_KILL: u32 = 8;
pub const PTRACE_GETREGS: u32 = 12;
pub const PTRACE_ATTACH: u32 = 16;
pub const PTRACE_DETACH: u32 = 17;

#[derive(Debug, Default)]
pub struct PtraceState {
    pub traced: bool,
    pub tracer: Option<Pid>,
}

fn tracee(pid: Pid) -> Result<Arc<Process>> {
    let current = current!();
    let target = table::get(pid).ok_or(Error::new(Errno::ESRCH))?;
    let state = target.ptrace.lock();
    if !state.traced || state.tracer != Some(current.pid()) {
        return_errno!(Errno::EPERM);
    }
    drop(state);
    Ok(target)
}

pub fn do_ptrace(request: u32, pid: Pid, addr: usize, data: usize) -> Result<i32> {
    let current = current!();
    match request {
        PTRACE_TRACEME => {
            let mut state = current.ptrace.lock();
            if state.traced {
                return_errno!(Errno::EPERM);
            }
            state.traced = true;
            state.tracer = current.parent().map(|p| p.pid());
            Ok(0)
        }
        PTRACE_ATTACH => {
            let target = table::get(pid).ok_or(Error::new(Errno::ESRCH))?;
            if target.pid() == current.pid() {
                return_errno!(Errno::EPERM);
            }
            {
                let mut state = target.ptrace.lock();
                if state.traced {
                    return_errno!(Errno::EPERM);
                }
                state.traced = true;
                state.tracer = Some(current.pid());
            }
            target.enqueue_signal(Box::new(UserSignal::new(
                SIGSTOP,
                current.pid(),
                current.creds().uid(),
            )));
            Ok(0)
        }
        PTRACE_DETACH => {
            let target = tracee(pid)?;
            {
                let mut state = target.ptrace.lock();
                state.traced = false;
                state.tracer = None;
            }
            resume(&target);
            Ok(0)
        }
        PTRACE_PEEKTEXT | PTRACE_PEEKDATA => {
            let target = tracee(pid)?;
            let vm = target.vm().ok_or(Error::new(Errno::ESRCH))?;
            let word: u32 = vm.read_val(addr)?;
            Ok(word as i32)
        }
        PTRACE_POKETEXT | PTRACE_POKEDATA => {
            let target = tracee(pid)?;
            let vm = target.vm().ok_or(Error::new(Errno::ESRCH))?;
            vm.write_val(addr, &(data as u32))?;
            Ok(0)
        }
        PTRACE_GETREGS => {
            let target = tracee(pid)?;
            let regs: UserContext = *target.user_ctx();
            let vm = current.vm().ok_or(Error::new(Errno::EFAULT))?;
            vm.write_val(data, &regs)?;
            Ok(0)
        }
        PTRACE_CONT => {
            let target = tracee(pid)?;
            resume(&target);
            Ok(0)
        }
        PTRACE_KILL => {
            let target = tracee(pid)?;
            target.enqueue_signal(Box::new(UserSignal::new(
                super::signal::constants::SIGKILL,
                current.pid(),
                current.creds().uid(),
            )));
            Ok(0)
        }
        _ => return_errno_with_message!(Errno::EINVAL, "unsupported ptrace request"),
    }
}

fn resume(target: &Arc<Process>) {
    if target.state() == TaskState::Stopped {
        target.clear_stop();
        target.set_state(TaskState::Running);
        sched::enqueue(target);
    }
}
