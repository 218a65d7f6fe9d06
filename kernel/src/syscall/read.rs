use super::SyscallReturn;
use crate::{
    prelude::*,
    util::user::{read_iovecs, write_bytes_to_user},
};

const IO_MAX: usize = 0x7fff_f000;

pub(super) fn sys_read(fd: i32, buf_addr: Vaddr, count: usize) -> Result<SyscallReturn> {
    let file = current!().file_table().lock().get(fd)?;
    let count = count.min(IO_MAX);
    let mut buf = vec![0u8; count];
    let read = file.read(&mut buf)?;
    write_bytes_to_user(buf_addr, &buf[..read])?;
    Ok(SyscallReturn::Return(read as i32))
}

pub(super) fn sys_pread64(
    fd: i32,
    buf_addr: Vaddr,
    count: usize,
    offset: u32,
) -> Result<SyscallReturn> {
    let file = current!().file_table().lock().get(fd)?;
    let mut buf = vec![0u8; count.min(IO_MAX)];
    let read = file.read_at(offset as usize, &mut buf)?;
    write_bytes_to_user(buf_addr, &buf[..read])?;
    Ok(SyscallReturn::Return(read as i32))
}

pub(super) fn sys_readv(fd: i32, iov_addr: Vaddr, iov_count: usize) -> Result<SyscallReturn> {
    let file = current!().file_table().lock().get(fd)?;
    let mut total = 0;
    for (base, len) in read_iovecs(iov_addr, iov_count)? {
        if len == 0 {
            continue;
        }
        let mut buf = vec![0u8; len];
        let read = file.read(&mut buf)?;
        write_bytes_to_user(base, &buf[..read])?;
        total += read;
        if read < len {
            break;
        }
    }
    Ok(SyscallReturn::Return(total as i32))
}
