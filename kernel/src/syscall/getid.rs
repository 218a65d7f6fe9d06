use super::SyscallReturn;
use crate::{prelude::*, process::table};

pub(super) fn sys_getpid() -> Result<SyscallReturn> {
    Ok(SyscallReturn::Return(current!().pid() as i32))
}

pub(super) fn sys_gettid() -> Result<SyscallReturn> {
    sys_getpid()
}

pub(super) fn sys_getppid() -> Result<SyscallReturn> {
    let ppid = current!().parent().map(|p| p.pid()).unwrap_or(0);
    Ok(SyscallReturn::Return(ppid as i32))
}

pub(super) fn sys_getpgrp() -> Result<SyscallReturn> {
    Ok(SyscallReturn::Return(current!().pgid() as i32))
}

pub(super) fn sys_getpgid(pid: u32) -> Result<SyscallReturn> {
    let target = if pid == 0 {
        current!()
    } else {
        table::get(pid).ok_or(Error::new(Errno::ESRCH))?
    };
    Ok(SyscallReturn::Return(target.pgid() as i32))
}

pub(super) fn sys_getsid(pid: u32) -> Result<SyscallReturn> {
    let target = if pid == 0 {
        current!()
    } else {
        table::get(pid).ok_or(Error::new(Errno::ESRCH))?
    };
    Ok(SyscallReturn::Return(target.sid() as i32))
}

pub(super) fn sys_getuid() -> Result<SyscallReturn> {
    Ok(SyscallReturn::Return(current!().creds().uid() as i32))
}

pub(super) fn sys_geteuid() -> Result<SyscallReturn> {
    Ok(SyscallReturn::Return(current!().creds().euid() as i32))
}

pub(super) fn sys_getgid() -> Result<SyscallReturn> {
    Ok(SyscallReturn::Return(current!().creds().gid() as i32))
}

pub(super) fn sys_getegid() -> Result<SyscallReturn> {
    Ok(SyscallReturn::Return(current!().creds().egid() as i32))
}
