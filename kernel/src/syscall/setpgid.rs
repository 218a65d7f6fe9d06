use super::SyscallReturn;
use crate::{prelude::*, process::table};

pub(super) fn sys_setpgid(pid: u32, pgid: u32) -> Result<SyscallReturn> {
    let current = current!();
    let target = if pid == 0 {
        current.clone()
    } else {
        table::get(pid).ok_or(Error::new(Errno::ESRCH))?
    };
    // Only self or a child; a session leader keeps its group.
    let is_child = target
        .parent()
        .is_some_and(|parent| parent.pid() == current.pid());
    if target.pid() != current.pid() && !is_child {
        return_errno!(Errno::ESRCH);
    }
    if target.sid() == target.pid() {
        return_errno!(Errno::EPERM);
    }
    let new_pgid = if pgid == 0 { target.pid() } else { pgid };
    target.set_pgid(new_pgid);
    Ok(SyscallReturn::Return(0))
}
