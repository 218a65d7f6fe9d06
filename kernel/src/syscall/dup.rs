use super::SyscallReturn;
use crate::{fs::file_table::FdFlags, prelude::*};

pub(super) fn sys_dup(fd: i32) -> Result<SyscallReturn> {
    let new_fd = current!().file_table().lock().dup(fd, 0, FdFlags::empty())?;
    Ok(SyscallReturn::Return(new_fd))
}

pub(super) fn sys_dup2(old_fd: i32, new_fd: i32) -> Result<SyscallReturn> {
    let current = current!();
    let table = current.file_table();
    let mut table = table.lock();
    let file = table.get(old_fd)?;
    if old_fd == new_fd {
        return Ok(SyscallReturn::Return(new_fd));
    }
    table.insert_at(new_fd, file, FdFlags::empty())?;
    Ok(SyscallReturn::Return(new_fd))
}
