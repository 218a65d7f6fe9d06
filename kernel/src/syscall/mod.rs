//! Syscall entry: decode the trapped frame, dispatch by number, fold
//! the result into the return register, then run signal delivery and
//! rescheduling on the way back to user space.

use crate::{arch::UserContext, prelude::*};

mod access;
mod brk;
mod chdir;
mod chmod;
mod chown;
mod clock_gettime;
mod clone;
mod close;
mod dup;
mod execve;
mod exit;
mod fcntl;
mod fork;
mod fstat;
mod fsync;
mod getcwd;
mod getdents;
mod getid;
mod getrandom;
mod getrusage;
mod ioctl;
mod ipc;
mod kill;
mod link;
mod lseek;
mod mkdir;
mod mknod;
mod mmap;
mod mount;
mod nanosleep;
mod open;
mod pause;
mod pipe;
mod poll;
mod prlimit64;
mod ptrace;
mod read;
mod readlink;
mod reboot;
mod rename;
mod rmdir;
mod rt_sigaction;
mod rt_sigpending;
mod rt_sigprocmask;
mod rt_sigreturn;
mod rt_sigsuspend;
mod rt_sigtimedwait;
mod sched_yield;
mod select;
mod sendfile;
mod setid;
mod setitimer;
mod setpgid;
mod setsid;
mod socketcall;
mod symlink;
mod sync;
mod sysinfo;
mod umask;
mod uname;
mod unlink;
mod wait4;
mod write;

pub mod arch;

/// What a handler asks the return path to do.
#[derive(Debug, Clone, Copy)]
pub enum SyscallReturn {
    /// Plain value for the result register.
    Return(i32),
    /// The handler wrote the whole frame itself (sigreturn, execve).
    NoReturn,
}

/// The complete kernel-entry sequence for `int 0x80`.
pub fn handle_syscall(ctx: &mut UserContext) {
    let num = ctx.syscall_num();
    let args = ctx.syscall_args();
    let mut restart = None;
    match arch::syscall_dispatch(num, args, ctx) {
        Ok(SyscallReturn::Return(val)) => ctx.set_syscall_ret(val),
        Ok(SyscallReturn::NoReturn) => {}
        Err(err) => {
            let errno = match err.error() {
                Errno::ERESTARTSYS => {
                    // The signal path decides between restart and
                    // EINTR based on the handler's SA_RESTART.
                    restart = Some(num);
                    Errno::EINTR
                }
                other => other,
            };
            ctx.set_syscall_ret(-(errno as i32));
        }
    }
    let _ = crate::process::signal::handle_pending_signal(ctx, restart);
    if crate::sched::need_resched() {
        crate::sched::schedule();
    }
}

/// Charge the syscall to system time.
pub fn account_syscall() {
    if let Some(current) = crate::process::current_opt() {
        current.rusage().charge_sys_tick();
    }
}
