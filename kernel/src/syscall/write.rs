use super::SyscallReturn;
use crate::{
    prelude::*,
    util::user::{read_bytes_from_user, read_iovecs},
};

pub(super) fn sys_write(fd: i32, buf_addr: Vaddr, count: usize) -> Result<SyscallReturn> {
    let file = current!().file_table().lock().get(fd)?;
    let mut buf = vec![0u8; count.min(0x7fff_f000)];
    read_bytes_from_user(buf_addr, &mut buf)?;
    let written = file.write(&buf)?;
    Ok(SyscallReturn::Return(written as i32))
}

pub(super) fn sys_writev(fd: i32, iov_addr: Vaddr, iov_count: usize) -> Result<SyscallReturn> {
    let file = current!().file_table().lock().get(fd)?;
    let mut total = 0;
    for (base, len) in read_iovecs(iov_addr, iov_count)? {
        if len == 0 {
            continue;
        }
        let mut buf = vec![0u8; len];
        read_bytes_from_user(base, &mut buf)?;
        let written = file.write(&buf)?;
        total += written;
        if written < len {
            break;
        }
    }
    Ok(SyscallReturn::Return(total as i32))
}
