use super::SyscallReturn;
use crate::{
    arch::UserContext,
    prelude::*,
    process::{clone_process, CloneArgs},
};

pub(super) fn sys_fork(ctx: &mut UserContext) -> Result<SyscallReturn> {
    let current = current!();
    // The parent's frame must already carry its own return value when
    // the child copies it.
    let mut parent_ctx = *ctx;
    parent_ctx.set_syscall_ret(0);
    let child = clone_process(&current, &parent_ctx, CloneArgs::for_fork())?;
    Ok(SyscallReturn::Return(child.pid() as i32))
}

/// vfork behaves as fork; the parent is not suspended (the eager page
/// copy makes the sharing optimization moot).
pub(super) fn sys_vfork(ctx: &mut UserContext) -> Result<SyscallReturn> {
    sys_fork(ctx)
}
