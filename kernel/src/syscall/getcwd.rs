use super::SyscallReturn;
use crate::{prelude::*, util::user::write_bytes_to_user};

pub(super) fn sys_getcwd(buf_addr: Vaddr, size: usize) -> Result<SyscallReturn> {
    let current = current!();
    let fs = current.fs();
    let cwd = fs.read().cwd()?;
    let mut path = cwd.abs_path();
    path.push('\0');
    if path.len() > size {
        return_errno!(Errno::ERANGE);
    }
    write_bytes_to_user(buf_addr, path.as_bytes())?;
    Ok(SyscallReturn::Return(path.len() as i32))
}
