use super::SyscallReturn;
use crate::prelude::*;

pub(super) fn sys_fsync(fd: i32) -> Result<SyscallReturn> {
    let file = current!().file_table().lock().get(fd)?;
    file.flush()?;
    Ok(SyscallReturn::Return(0))
}
