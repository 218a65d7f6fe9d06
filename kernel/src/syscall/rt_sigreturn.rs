use super::SyscallReturn;
use crate::{arch::UserContext, prelude::*, process::signal::restore_sigframe};

pub(super) fn sys_rt_sigreturn(ctx: &mut UserContext) -> Result<SyscallReturn> {
    restore_sigframe(ctx)?;
    // The whole frame, including eax, is the restored one.
    Ok(SyscallReturn::NoReturn)
}
