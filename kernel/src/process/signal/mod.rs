//! Signal delivery.
//!
//! Signals are posted to a task's queues at any time; they take effect
//! at the last kernel-to-user transition, where the lowest-numbered
//! deliverable signal is dequeued and its disposition applied. User
//! handlers run on a rewritten user stack; `sigreturn` undoes the
//! rewrite.

pub mod c_types;
pub mod constants;
pub mod sig_action;
pub mod sig_disposition;
pub mod sig_mask;
pub mod sig_num;
pub mod sig_queues;
pub mod signals;

use core::mem;

use c_types::{sigcontext_t, siginfo_t};
use constants::*;
use sig_action::{SigAction, SigActionFlags, SigDefaultAction};
use sig_mask::SigMask;
use sig_num::SigNum;
use signals::{kernel::KernelSignal, Signal};

use super::{do_exit, Pgid, Pid, Process, ProcessFilter, TermStatus};
use crate::{arch::UserContext, prelude::*, sched};

/// The `sigreturn` trampoline placed on the user stack when the
/// handler did not register a restorer: `mov eax, SIGRETURN; int 0x80`.
const TRAMPOLINE: [u8; 8] = [0xb8, 0x77, 0x00, 0x00, 0x00, 0xcd, 0x80, 0x90];

/// Process every deliverable signal of the current task. Called on
/// each return to user space with the frame about to be restored.
///
/// `restart` carries the syscall number when the interrupted call
/// asked to be restarted: without a handler (or with `SA_RESTART`) the
/// frame is rewound so the syscall re-executes; a non-restarting
/// handler leaves `EINTR` in place.
pub fn handle_pending_signal(ctx: &mut UserContext, restart: Option<u32>) -> Result<()> {
    let current = current!();
    loop {
        let Some(signal) = current.dequeue_signal() else {
            if let Some(num) = restart {
                ctx.set_syscall_ret(num as i32);
                ctx.rewind_syscall();
            }
            return Ok(());
        };
        let num = signal.num();
        let action = current.sig_dispositions().lock().get(num);
        match action {
            SigAction::Ign => {
                // SIGKILL and SIGSTOP cannot be ignored.
                if num == SIGKILL || num == SIGSTOP {
                    apply_default(&current, num);
                }
            }
            SigAction::Dfl => apply_default(&current, num),
            SigAction::User {
                handler_addr,
                flags,
                restorer_addr,
                mask,
            } => {
                if num == SIGKILL || num == SIGSTOP {
                    apply_default(&current, num);
                    continue;
                }
                if flags.contains(SigActionFlags::SA_RESETHAND) {
                    current.sig_dispositions().lock().set_default(num);
                }
                if let Some(sys_num) = restart {
                    if flags.contains(SigActionFlags::SA_RESTART) {
                        // Re-execute the syscall once the handler
                        // returns.
                        ctx.set_syscall_ret(sys_num as i32);
                        ctx.rewind_syscall();
                    }
                }
                handle_user_signal(
                    ctx,
                    &current,
                    signal.to_info(),
                    num,
                    handler_addr,
                    flags,
                    restorer_addr,
                    mask,
                )?;
                return Ok(());
            }
        }
    }
}

fn apply_default(current: &Arc<Process>, num: SigNum) {
    match SigDefaultAction::from_signum(num) {
        SigDefaultAction::Ign => {}
        SigDefaultAction::Term => do_exit(TermStatus::Killed(num)),
        SigDefaultAction::Core => do_exit(TermStatus::Dumped(num)),
        SigDefaultAction::Stop => stop_current(current, num),
        SigDefaultAction::Cont => {
            // Resumption already happened when SIGCONT was posted.
        }
    }
}

/// Park the current task as stopped and tell the parent.
fn stop_current(current: &Arc<Process>, num: SigNum) {
    current.mark_stopped(num);
    if let Some(parent) = current.parent() {
        parent.enqueue_signal(Box::new(KernelSignal::new(SIGCHLD)));
        parent.children_wait.wake_all();
    }
    sched::schedule();
}

/// Rewrite the user stack and registers to enter a user handler:
///
/// ```text
///   [trampoline code]              <- executed on handler return
///   [sigcontext: mask + regs]      <- consumed by sigreturn
///   [siginfo]
///   [ucontext ptr][siginfo ptr][signo][return addr]  <- handler args
/// ```
#[allow(clippy::too_many_arguments)]
fn handle_user_signal(
    ctx: &mut UserContext,
    current: &Arc<Process>,
    info: siginfo_t,
    num: SigNum,
    handler_addr: usize,
    flags: SigActionFlags,
    restorer_addr: usize,
    mask: SigMask,
) -> Result<()> {
    let vm = current
        .vm()
        .ok_or(Error::with_message(Errno::EFAULT, "no user address space"))?;

    let old_mask = current.sig_mask();
    let mut new_mask = old_mask | mask;
    if !flags.contains(SigActionFlags::SA_NODEFER) {
        new_mask.add_signal(num);
    }
    current.set_sig_mask(new_mask);

    let mut sp = (ctx.stack_pointer() as usize).saturating_sub(128);

    sp -= TRAMPOLINE.len();
    let trampoline_addr = sp;
    vm.write_bytes(sp, &TRAMPOLINE)?;

    sp -= mem::size_of::<siginfo_t>();
    let siginfo_addr = sp;
    vm.write_val(sp, &info)?;

    sp -= mem::size_of::<sigcontext_t>();
    sp &= !0xf;
    let sigctx_addr = sp;
    let sigctx = sigcontext_t {
        mask: old_mask.as_u64(),
        regs: *ctx,
    };
    vm.write_val(sp, &sigctx)?;

    let ret_addr = if flags.contains(SigActionFlags::SA_RESTORER) {
        restorer_addr as u32
    } else {
        trampoline_addr as u32
    };
    for word in [
        sigctx_addr as u32,
        siginfo_addr as u32,
        num.as_u8() as u32,
        ret_addr,
    ] {
        sp -= 4;
        vm.write_val(sp, &word)?;
    }

    current.sig_frames().lock().push(sigctx_addr);
    ctx.set_stack_pointer(sp as u32);
    ctx.set_instruction_pointer(handler_addr as u32);
    Ok(())
}

/// `sigreturn`: restore the frame and mask saved at handler dispatch.
pub fn restore_sigframe(ctx: &mut UserContext) -> Result<()> {
    let current = current!();
    let sigctx_addr = current
        .sig_frames()
        .lock()
        .pop()
        .ok_or(Error::with_message(Errno::EINVAL, "sigreturn without frame"))?;
    let vm = current
        .vm()
        .ok_or(Error::with_message(Errno::EFAULT, "no user address space"))?;
    let saved: sigcontext_t = vm.read_val(sigctx_addr)?;
    current.set_sig_mask(SigMask::from(saved.mask));
    *ctx = saved.regs;
    Ok(())
}

/// Post `signal` to every process selected by `filter`. A `None`
/// signal (kill with sig 0) only probes for existence.
pub fn do_kill(
    filter: ProcessFilter,
    signal: Option<impl Fn() -> Box<dyn Signal>>,
) -> Result<()> {
    let targets: Vec<Arc<Process>> = match filter {
        ProcessFilter::WithPid(pid) => super::table::get(pid).into_iter().collect(),
        ProcessFilter::WithPgid(pgid) => super::table::process_group(pgid),
        ProcessFilter::Any => {
            let mut all = Vec::new();
            super::table::for_each(|p| {
                if p.pid() != 1 {
                    all.push(p.clone());
                }
            });
            all
        }
    };
    if targets.is_empty() {
        return_errno!(Errno::ESRCH);
    }
    if let Some(make_signal) = signal {
        for target in targets {
            target.enqueue_signal(make_signal());
        }
    }
    Ok(())
}

/// Send `num` to the foreground process group of a terminal.
pub fn send_signal_to_group(pgid: Pgid, num: SigNum) {
    for process in super::table::process_group(pgid) {
        process.enqueue_signal(Box::new(KernelSignal::new(num)));
    }
}

/// Probe-or-send helper for the kill syscall.
pub fn kill_process(pid: Pid, num: Option<SigNum>, sender: (Pid, u32)) -> Result<()> {
    use signals::user::UserSignal;
    let filter = ProcessFilter::WithPid(pid);
    match num {
        Some(num) => do_kill(
            filter,
            Some(move || {
                Box::new(UserSignal::new(num, sender.0, sender.1)) as Box<dyn Signal>
            }),
        ),
        None => do_kill(filter, None::<fn() -> Box<dyn Signal>>),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        mm::{Vm, VmPerms, VmaBacking, VmaFlags, PAGE_SIZE},
        process::{self, ProcessBuilder, TaskState},
    };

    fn user_task_with_stack() -> (Arc<Process>, usize) {
        let vm = Vm::new().unwrap();
        let stack_top = 0xb000_0000;
        vm.map_region(
            stack_top - 4 * PAGE_SIZE,
            4 * PAGE_SIZE,
            VmPerms::READ | VmPerms::WRITE,
            VmaFlags::GROWS_DOWN,
            VmaBacking::Anonymous,
            true,
        )
        .unwrap();
        let task = ProcessBuilder::new("sigtest").vm(vm).build().unwrap();
        (task, stack_top)
    }

    #[test]
    fn handler_dispatch_and_sigreturn_roundtrip() {
        let _guard = crate::mm::test_util::serialize_test();
        let (task, stack_top) = user_task_with_stack();
        process::set_current(Some(task.clone()));

        task.sig_dispositions().lock().set(
            SIGUSR1,
            SigAction::User {
                handler_addr: 0x1234_5678,
                flags: SigActionFlags::empty(),
                restorer_addr: 0,
                mask: SigMask::new_empty(),
            },
        );
        task.enqueue_signal(Box::new(KernelSignal::new(SIGUSR1)));

        let mut ctx = UserContext::default();
        ctx.eip = 0x0804_8000;
        ctx.esp = stack_top as u32 - 64;
        ctx.eax = 42;
        let saved = ctx;

        handle_pending_signal(&mut ctx, None).unwrap();
        assert_eq!(ctx.eip, 0x1234_5678);
        assert!(ctx.esp < saved.esp);
        // The handler's own signal is now blocked.
        assert!(task.sig_mask().contains(SIGUSR1));

        // First argument on the stack is the signal number.
        let vm = task.vm().unwrap();
        let signo: u32 = vm.read_val(ctx.esp as usize + 4).unwrap();
        assert_eq!(signo, SIGUSR1.as_u8() as u32);

        restore_sigframe(&mut ctx).unwrap();
        assert_eq!(ctx, saved);
        assert!(!task.sig_mask().contains(SIGUSR1));

        process::set_current(None);
        process::table::remove(task.pid());
    }

    #[test]
    fn ignored_signal_is_discarded() {
        let _guard = crate::mm::test_util::serialize_test();
        let (task, _) = user_task_with_stack();
        process::set_current(Some(task.clone()));
        task.sig_dispositions().lock().set(SIGUSR2, SigAction::Ign);
        task.enqueue_signal(Box::new(KernelSignal::new(SIGUSR2)));
        let mut ctx = UserContext::default();
        handle_pending_signal(&mut ctx, None).unwrap();
        assert_eq!(ctx, UserContext::default());
        assert!(!task.has_pending_signal());
        process::set_current(None);
        process::table::remove(task.pid());
    }

    #[test]
    fn sigkill_cannot_be_blocked() {
        let _guard = crate::mm::test_util::serialize_test();
        let (task, _) = user_task_with_stack();
        task.set_sig_mask(SigMask::new_full());
        task.set_state(TaskState::Sleeping);
        task.enqueue_signal(Box::new(KernelSignal::new(SIGKILL)));
        // The mask never contains SIGKILL, so it is deliverable and
        // the sleeper is woken immediately.
        assert!(task.has_pending_signal());
        assert_eq!(task.state(), TaskState::Running);
        crate::sched::remove_from_run_queue(&task);
        process::table::remove(task.pid());
    }

    #[test]
    fn sigcont_resumes_stopped_task() {
        let _guard = crate::mm::test_util::serialize_test();
        let (task, _) = user_task_with_stack();
        task.mark_stopped(SIGSTOP);
        assert_eq!(task.state(), TaskState::Stopped);
        task.enqueue_signal(Box::new(KernelSignal::new(SIGCONT)));
        assert_eq!(task.state(), TaskState::Running);
        crate::sched::remove_from_run_queue(&task);
        process::table::remove(task.pid());
    }
}
