use super::SyscallReturn;
use crate::{
    prelude::*,
    process::{rlimit::RLimit64, table},
    util::user::{read_val_from_user, write_val_to_user},
};

pub(super) fn sys_prlimit64(
    pid: u32,
    resource: u32,
    new_addr: Vaddr,
    old_addr: Vaddr,
) -> Result<SyscallReturn> {
    let target = if pid == 0 {
        current!()
    } else {
        table::get(pid).ok_or(Error::new(Errno::ESRCH))?
    };
    if old_addr != 0 {
        let old = target.rlimits().lock().get(resource)?;
        write_val_to_user(old_addr, &old)?;
    }
    if new_addr != 0 {
        let new: RLimit64 = read_val_from_user(new_addr)?;
        target.rlimits().lock().set(resource, new)?;
    }
    Ok(SyscallReturn::Return(0))
}
