use super::SyscallReturn;
use crate::{
    fs::{file_table::FdFlags, pipe::new_pipe_pair, utils::CreationFlags},
    prelude::*,
    util::user::write_val_to_user,
};

pub(super) fn sys_pipe2(fds_addr: Vaddr, flags: u32) -> Result<SyscallReturn> {
    let creation = CreationFlags::from_bits_truncate(flags);
    let fd_flags = if creation.contains(CreationFlags::O_CLOEXEC) {
        FdFlags::CLOEXEC
    } else {
        FdFlags::empty()
    };
    let (reader, writer) = new_pipe_pair();
    let current = current!();
    let table = current.file_table();
    let mut table = table.lock();
    let read_fd = table.insert(reader, fd_flags)?;
    let write_fd = match table.insert(writer, fd_flags) {
        Ok(fd) => fd,
        Err(err) => {
            let _ = table.close(read_fd);
            return Err(err);
        }
    };
    write_val_to_user(fds_addr, &read_fd)?;
    write_val_to_user(fds_addr + 4, &write_fd)?;
    Ok(SyscallReturn::Return(0))
}

pub(super) fn sys_pipe(fds_addr: Vaddr) -> Result<SyscallReturn> {
    sys_pipe2(fds_addr, 0)
}
