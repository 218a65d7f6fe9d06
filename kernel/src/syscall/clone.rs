use super::SyscallReturn;
use crate::{
    arch::UserContext,
    prelude::*,
    process::{clone_process, CloneArgs, CloneFlags},
};

pub(super) fn sys_clone(
    raw_flags: u32,
    child_stack: u32,
    ctx: &mut UserContext,
) -> Result<SyscallReturn> {
    let flags = CloneFlags::from_bits_truncate(raw_flags);
    let current = current!();
    let mut parent_ctx = *ctx;
    parent_ctx.set_syscall_ret(0);
    let child = clone_process(&current, &parent_ctx, CloneArgs::new(flags, child_stack))?;
    Ok(SyscallReturn::Return(child.pid() as i32))
}
