use super::SyscallReturn;
use crate::{prelude::*, util::user::write_bytes_to_user};

pub(super) fn sys_getrandom(buf_addr: Vaddr, len: usize, _flags: u32) -> Result<SyscallReturn> {
    let len = len.min(256);
    let mut buf = vec![0u8; len];
    crate::util::random::getrandom(&mut buf);
    write_bytes_to_user(buf_addr, &buf)?;
    Ok(SyscallReturn::Return(len as i32))
}
