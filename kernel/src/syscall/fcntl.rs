use super::SyscallReturn;
use crate::{
    fs::{file_table::FdFlags, utils::StatusFlags},
    prelude::*,
};

const F_DUPFD: u32 = 0;
const F_GETFD: u32 = 1;
const F_SETFD: u32 = 2;
const F_GETFL: u32 = 3;
const F_SETFL: u32 = 4;
const F_DUPFD_CLOEXEC: u32 = 1030;

pub(super) fn sys_fcntl(fd: i32, cmd: u32, arg: u32) -> Result<SyscallReturn> {
    let current = current!();
    let table = current.file_table();
    match cmd {
        F_DUPFD => {
            let new = table.lock().dup(fd, arg as i32, FdFlags::empty())?;
            Ok(SyscallReturn::Return(new))
        }
        F_DUPFD_CLOEXEC => {
            let new = table.lock().dup(fd, arg as i32, FdFlags::CLOEXEC)?;
            Ok(SyscallReturn::Return(new))
        }
        F_GETFD => {
            let flags = table.lock().fd_flags(fd)?;
            Ok(SyscallReturn::Return(flags.bits() as i32))
        }
        F_SETFD => {
            table
                .lock()
                .set_fd_flags(fd, FdFlags::from_bits_truncate(arg))?;
            Ok(SyscallReturn::Return(0))
        }
        F_GETFL => {
            let file = table.lock().get(fd)?;
            let bits = file.status_flags().bits() | file.access_mode() as u32;
            Ok(SyscallReturn::Return(bits as i32))
        }
        F_SETFL => {
            let file = table.lock().get(fd)?;
            file.set_status_flags(StatusFlags::from_bits_truncate(arg))?;
            Ok(SyscallReturn::Return(0))
        }
        _ => return_errno_with_message!(Errno::EINVAL, "unsupported fcntl command"),
    }
}
