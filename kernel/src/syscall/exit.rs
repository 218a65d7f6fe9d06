use super::SyscallReturn;
use crate::{
    prelude::*,
    process::{do_exit, TermStatus},
};

pub(super) fn sys_exit(code: i32) -> Result<SyscallReturn> {
    do_exit(TermStatus::Exited(code & 0xff));
    Ok(SyscallReturn::Return(0))
}

pub(super) fn sys_exit_group(code: i32) -> Result<SyscallReturn> {
    sys_exit(code)
}
