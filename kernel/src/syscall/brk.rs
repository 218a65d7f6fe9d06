use super::SyscallReturn;
use crate::{prelude::*, util::user::current_vm};

pub(super) fn sys_brk(new_brk: usize) -> Result<SyscallReturn> {
    let vm = current_vm()?;
    let brk = vm.brk(new_brk).unwrap_or_else(|_| vm.layout().brk);
    Ok(SyscallReturn::Return(brk as i32))
}
