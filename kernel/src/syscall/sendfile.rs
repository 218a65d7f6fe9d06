use super::SyscallReturn;
use crate::{
    prelude::*,
    util::user::{read_val_from_user, write_val_to_user},
};

pub(super) fn sys_sendfile64(
    out_fd: i32,
    in_fd: i32,
    offset_addr: Vaddr,
    count: usize,
) -> Result<SyscallReturn> {
    let current = current!();
    let (out_file, in_file) = {
        let table = current.file_table();
        let table = table.lock();
        (table.get(out_fd)?, table.get(in_fd)?)
    };
    let mut offset = if offset_addr != 0 {
        Some(read_val_from_user::<u64>(offset_addr)? as usize)
    } else {
        None
    };
    let mut remaining = count.min(0x7fff_f000);
    let mut total = 0;
    let mut chunk = vec![0u8; 16 * 1024];
    while remaining > 0 {
        let want = remaining.min(chunk.len());
        let read = match offset {
            Some(off) => in_file.read_at(off, &mut chunk[..want])?,
            None => in_file.read(&mut chunk[..want])?,
        };
        if read == 0 {
            break;
        }
        let written = out_file.write(&chunk[..read])?;
        total += written;
        remaining -= written;
        if let Some(off) = offset.as_mut() {
            *off += written;
        }
        if written < read {
            break;
        }
    }
    if let Some(off) = offset {
        write_val_to_user(offset_addr, &(off as u64))?;
    }
    Ok(SyscallReturn::Return(total as i32))
}
