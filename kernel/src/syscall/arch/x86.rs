//! The i386 syscall-number table and the generated dispatcher.

use crate::{arch::UserContext, prelude::*};

use super::super::SyscallReturn;

macro_rules! syscall_handler {
    (0, $fn_name: ident, $args: ident) => { $fn_name() };
    (0, $fn_name: ident, $args: ident, $context: expr) => { $fn_name($context) };
    (1, $fn_name: ident, $args: ident) => { $fn_name($args[0] as _) };
    (1, $fn_name: ident, $args: ident, $context: expr) => { $fn_name($args[0] as _, $context) };
    (2, $fn_name: ident, $args: ident) => { $fn_name($args[0] as _, $args[1] as _) };
    (2, $fn_name: ident, $args: ident, $context: expr) => { $fn_name($args[0] as _, $args[1] as _, $context) };
    (3, $fn_name: ident, $args: ident) => { $fn_name($args[0] as _, $args[1] as _, $args[2] as _) };
    (3, $fn_name: ident, $args: ident, $context: expr) => { $fn_name($args[0] as _, $args[1] as _, $args[2] as _, $context) };
    (4, $fn_name: ident, $args: ident) => { $fn_name($args[0] as _, $args[1] as _, $args[2] as _, $args[3] as _) };
    (4, $fn_name: ident, $args: ident, $context: expr) => { $fn_name($args[0] as _, $args[1] as _, $args[2] as _, $args[3] as _, $context) };
    (5, $fn_name: ident, $args: ident) => { $fn_name($args[0] as _, $args[1] as _, $args[2] as _, $args[3] as _, $args[4] as _) };
    (6, $fn_name: ident, $args: ident) => { $fn_name($args[0] as _, $args[1] as _, $args[2] as _, $args[3] as _, $args[4] as _, $args[5] as _) };
}

macro_rules! dispatch_fn_inner {
    ( $args: ident, $context: ident, $handler: ident ( args[ .. $cnt: tt ] ) ) => {
        syscall_handler!($cnt, $handler, $args)
    };
    ( $args: ident, $context: ident, $handler: ident ( args[ .. $cnt: tt ] , &mut context ) ) => {
        syscall_handler!($cnt, $handler, $args, $context)
    };
}

macro_rules! impl_syscall_nums_and_dispatch_fn {
    ( $( $name: ident = $num: literal => $handler: ident $args: tt );* $(;)? ) => {
        $(
            pub const $name: u32 = $num;
        )*

        pub fn syscall_dispatch(
            syscall_number: u32,
            args: [u32; 6],
            context: &mut UserContext,
        ) -> Result<SyscallReturn> {
            match syscall_number {
                $(
                    $num => dispatch_fn_inner!(args, context, $handler $args),
                )*
                _ => {
                    warn!("unimplemented syscall number: {}", syscall_number);
                    return_errno_with_message!(Errno::ENOSYS, "syscall was unimplemented")
                }
            }
        }
    }
}

use super::super::{
    access::{sys_access, sys_faccessat},
    brk::sys_brk,
    chdir::{sys_chdir, sys_chroot, sys_fchdir},
    chmod::sys_chmod,
    chown::{sys_chown, sys_fchownat},
    clock_gettime::{sys_clock_gettime64, sys_time},
    clone::sys_clone,
    close::sys_close,
    dup::{sys_dup, sys_dup2},
    execve::sys_execve,
    exit::{sys_exit, sys_exit_group},
    fcntl::sys_fcntl,
    fork::{sys_fork, sys_vfork},
    fstat::{sys_fstat64, sys_fstatat64, sys_lstat64, sys_stat64},
    fsync::sys_fsync,
    getcwd::sys_getcwd,
    getdents::sys_getdents64,
    getid::{
        sys_getegid, sys_geteuid, sys_getgid, sys_getpgid, sys_getpgrp, sys_getpid,
        sys_getppid, sys_getsid, sys_gettid, sys_getuid,
    },
    getrandom::sys_getrandom,
    getrusage::sys_getrusage,
    ioctl::sys_ioctl,
    ipc::sys_ipc,
    kill::{sys_kill, sys_tkill},
    link::sys_link,
    lseek::{sys_llseek, sys_lseek},
    mkdir::sys_mkdir,
    mknod::sys_mknod,
    mmap::{sys_madvise, sys_mmap2, sys_mprotect, sys_mremap, sys_munmap, sys_old_mmap},
    mount::{sys_mount, sys_umount},
    nanosleep::sys_nanosleep,
    pause::sys_pause,
    pipe::{sys_pipe, sys_pipe2},
    poll::sys_poll,
    prlimit64::sys_prlimit64,
    ptrace::sys_ptrace,
    read::{sys_pread64, sys_read, sys_readv},
    readlink::sys_readlink,
    reboot::sys_reboot,
    rename::sys_rename,
    rmdir::sys_rmdir,
    rt_sigaction::sys_rt_sigaction,
    rt_sigpending::sys_rt_sigpending,
    rt_sigprocmask::sys_rt_sigprocmask,
    rt_sigreturn::sys_rt_sigreturn,
    rt_sigsuspend::sys_rt_sigsuspend,
    rt_sigtimedwait::sys_rt_sigtimedwait,
    sched_yield::sys_sched_yield,
    select::sys_select,
    sendfile::sys_sendfile64,
    setid::{sys_setgid, sys_setgroups, sys_setuid},
    setitimer::sys_setitimer,
    setpgid::sys_setpgid,
    setsid::sys_setsid,
    socketcall::sys_socketcall,
    symlink::sys_symlink,
    sync::sys_sync,
    sysinfo::sys_sysinfo,
    open::sys_open,
    umask::sys_umask,
    uname::sys_uname,
    unlink::sys_unlink,
    wait4::{sys_wait4, sys_waitpid},
    write::{sys_write, sys_writev},
};

impl_syscall_nums_and_dispatch_fn! {
    SYS_EXIT            = 1   => sys_exit(args[..1]);
    SYS_FORK            = 2   => sys_fork(args[..0], &mut context);
    SYS_READ            = 3   => sys_read(args[..3]);
    SYS_WRITE           = 4   => sys_write(args[..3]);
    SYS_OPEN            = 5   => sys_open(args[..3]);
    SYS_CLOSE           = 6   => sys_close(args[..1]);
    SYS_WAITPID         = 7   => sys_waitpid(args[..3]);
    SYS_LINK            = 9   => sys_link(args[..2]);
    SYS_UNLINK          = 10  => sys_unlink(args[..1]);
    SYS_EXECVE          = 11  => sys_execve(args[..3], &mut context);
    SYS_CHDIR           = 12  => sys_chdir(args[..1]);
    SYS_TIME            = 13  => sys_time(args[..1]);
    SYS_MKNOD           = 14  => sys_mknod(args[..3]);
    SYS_CHMOD           = 15  => sys_chmod(args[..2]);
    SYS_LSEEK           = 19  => sys_lseek(args[..3]);
    SYS_GETPID          = 20  => sys_getpid(args[..0]);
    SYS_MOUNT           = 21  => sys_mount(args[..5]);
    SYS_UMOUNT          = 22  => sys_umount(args[..1]);
    SYS_SETUID          = 23  => sys_setuid(args[..1]);
    SYS_GETUID          = 24  => sys_getuid(args[..0]);
    SYS_PTRACE          = 26  => sys_ptrace(args[..4]);
    SYS_PAUSE           = 29  => sys_pause(args[..0]);
    SYS_ACCESS          = 33  => sys_access(args[..2]);
    SYS_SYNC            = 36  => sys_sync(args[..0]);
    SYS_KILL            = 37  => sys_kill(args[..2]);
    SYS_RENAME          = 38  => sys_rename(args[..2]);
    SYS_MKDIR           = 39  => sys_mkdir(args[..2]);
    SYS_RMDIR           = 40  => sys_rmdir(args[..1]);
    SYS_DUP             = 41  => sys_dup(args[..1]);
    SYS_PIPE            = 42  => sys_pipe(args[..1]);
    SYS_BRK             = 45  => sys_brk(args[..1]);
    SYS_SETGID          = 46  => sys_setgid(args[..1]);
    SYS_GETGID          = 47  => sys_getgid(args[..0]);
    SYS_GETEUID         = 49  => sys_geteuid(args[..0]);
    SYS_GETEGID         = 50  => sys_getegid(args[..0]);
    SYS_IOCTL           = 54  => sys_ioctl(args[..3]);
    SYS_FCNTL           = 55  => sys_fcntl(args[..3]);
    SYS_SETPGID         = 57  => sys_setpgid(args[..2]);
    SYS_UMASK           = 60  => sys_umask(args[..1]);
    SYS_CHROOT          = 61  => sys_chroot(args[..1]);
    SYS_DUP2            = 63  => sys_dup2(args[..2]);
    SYS_GETPPID         = 64  => sys_getppid(args[..0]);
    SYS_GETPGRP         = 65  => sys_getpgrp(args[..0]);
    SYS_SETSID          = 66  => sys_setsid(args[..0]);
    SYS_GETRUSAGE       = 77  => sys_getrusage(args[..2]);
    SYS_SYMLINK         = 83  => sys_symlink(args[..2]);
    SYS_READLINK        = 85  => sys_readlink(args[..3]);
    SYS_REBOOT          = 88  => sys_reboot(args[..4]);
    SYS_MMAP            = 90  => sys_old_mmap(args[..1]);
    SYS_MUNMAP          = 91  => sys_munmap(args[..2]);
    SYS_SOCKETCALL      = 102 => sys_socketcall(args[..2]);
    SYS_SETITIMER       = 104 => sys_setitimer(args[..3]);
    SYS_WAIT4           = 114 => sys_wait4(args[..4]);
    SYS_SYSINFO         = 116 => sys_sysinfo(args[..1]);
    SYS_IPC             = 117 => sys_ipc(args[..6]);
    SYS_FSYNC           = 118 => sys_fsync(args[..1]);
    SYS_SIGRETURN       = 119 => sys_rt_sigreturn(args[..0], &mut context);
    SYS_CLONE           = 120 => sys_clone(args[..2], &mut context);
    SYS_UNAME           = 122 => sys_uname(args[..1]);
    SYS_MPROTECT        = 125 => sys_mprotect(args[..3]);
    SYS_GETPGID         = 132 => sys_getpgid(args[..1]);
    SYS_FCHDIR          = 133 => sys_fchdir(args[..1]);
    SYS_SELECT          = 142 => sys_select(args[..5]);
    SYS_READV           = 145 => sys_readv(args[..3]);
    SYS_WRITEV          = 146 => sys_writev(args[..3]);
    SYS_GETSID          = 147 => sys_getsid(args[..1]);
    SYS_SCHED_YIELD     = 158 => sys_sched_yield(args[..0]);
    SYS_NANOSLEEP       = 162 => sys_nanosleep(args[..2]);
    SYS_MREMAP          = 163 => sys_mremap(args[..4]);
    SYS_POLL            = 168 => sys_poll(args[..3]);
    SYS_RT_SIGRETURN    = 173 => sys_rt_sigreturn(args[..0], &mut context);
    SYS_RT_SIGACTION    = 174 => sys_rt_sigaction(args[..4]);
    SYS_RT_SIGPROCMASK  = 175 => sys_rt_sigprocmask(args[..4]);
    SYS_RT_SIGPENDING   = 176 => sys_rt_sigpending(args[..2]);
    SYS_RT_SIGTIMEDWAIT = 177 => sys_rt_sigtimedwait(args[..4]);
    SYS_RT_SIGSUSPEND   = 179 => sys_rt_sigsuspend(args[..2]);
    SYS_PREAD64         = 180 => sys_pread64(args[..4]);
    SYS_GETCWD          = 183 => sys_getcwd(args[..2]);
    SYS_VFORK           = 190 => sys_vfork(args[..0], &mut context);
    SYS_MMAP2           = 192 => sys_mmap2(args[..6]);
    SYS_STAT64          = 195 => sys_stat64(args[..2]);
    SYS_LSTAT64         = 196 => sys_lstat64(args[..2]);
    SYS_FSTAT64         = 197 => sys_fstat64(args[..2]);
    SYS_GETDENTS64      = 220 => sys_getdents64(args[..3]);
    SYS_FCNTL64         = 221 => sys_fcntl(args[..3]);
    SYS_GETTID          = 224 => sys_gettid(args[..0]);
    SYS_SETGROUPS32     = 206 => sys_setgroups(args[..2]);
    SYS_TKILL           = 238 => sys_tkill(args[..2]);
    SYS_SENDFILE64      = 239 => sys_sendfile64(args[..4]);
    SYS_EXIT_GROUP      = 252 => sys_exit_group(args[..1]);
    SYS_LLSEEK          = 140 => sys_llseek(args[..5]);
    SYS_MADVISE         = 219 => sys_madvise(args[..3]);
    SYS_CLOCK_GETTIME64 = 403 => sys_clock_gettime64(args[..2]);
    SYS_FSTATAT64       = 300 => sys_fstatat64(args[..4]);
    SYS_FCHOWNAT        = 298 => sys_fchownat(args[..5]);
    SYS_CHOWN32         = 212 => sys_chown(args[..3]);
    SYS_FACCESSAT       = 307 => sys_faccessat(args[..3]);
    SYS_PIPE2           = 331 => sys_pipe2(args[..2]);
    SYS_PRLIMIT64       = 340 => sys_prlimit64(args[..4]);
    SYS_GETRANDOM       = 355 => sys_getrandom(args[..3]);
}
