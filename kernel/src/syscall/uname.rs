use super::SyscallReturn;
use crate::{prelude::*, util::user::write_bytes_to_user};

const FIELD: usize = 65;

fn put(buf: &mut [u8], index: usize, value: &str) {
    let start = index * FIELD;
    let bytes = value.as_bytes();
    buf[start..start + bytes.len()].copy_from_slice(bytes);
}

pub(super) fn sys_uname(addr: Vaddr) -> Result<SyscallReturn> {
    let mut buf = [0u8; FIELD * 6];
    put(&mut buf, 0, "Ferrite");
    put(&mut buf, 1, "ferrite");
    put(&mut buf, 2, "0.1.0");
    put(&mut buf, 3, "Ferrite 0.1.0");
    put(&mut buf, 4, "i586");
    put(&mut buf, 5, "(none)");
    write_bytes_to_user(addr, &buf)?;
    Ok(SyscallReturn::Return(0))
}
