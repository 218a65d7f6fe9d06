use super::SyscallReturn;
use crate::prelude::*;

pub(super) fn sys_close(fd: i32) -> Result<SyscallReturn> {
    let file = current!().file_table().lock().close(fd)?;
    let _ = file.flush();
    Ok(SyscallReturn::Return(0))
}
