use super::SyscallReturn;
use crate::{fs::buffer, prelude::*};

pub(super) fn sys_sync() -> Result<SyscallReturn> {
    crate::fs::rootfs::root_mount().sync_all()?;
    buffer::bsync_all()?;
    Ok(SyscallReturn::Return(0))
}
