use super::SyscallReturn;
use crate::prelude::*;

pub(super) fn sys_ioctl(fd: i32, cmd: u32, arg: usize) -> Result<SyscallReturn> {
    let file = current!().file_table().lock().get(fd)?;
    match file.ioctl(cmd, arg) {
        Ok(val) => Ok(SyscallReturn::Return(val)),
        // Drivers without a handler surface ENOTTY at the boundary.
        Err(err) if err.error() == Errno::ENOIOCTLCMD => {
            return_errno_with_message!(Errno::ENOTTY, "no such ioctl")
        }
        Err(err) => Err(err),
    }
}
