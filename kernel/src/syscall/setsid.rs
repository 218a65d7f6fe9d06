use super::SyscallReturn;
use crate::{prelude::*, process::table};

pub(super) fn sys_setsid() -> Result<SyscallReturn> {
    let current = current!();
    // A process-group leader may not start a session, nor may anyone
    // whose pid already names a group.
    if current.pgid() == current.pid() || !table::process_group(current.pid()).is_empty() {
        return_errno!(Errno::EPERM);
    }
    current.set_sid(current.pid());
    current.set_pgid(current.pid());
    current.set_tty(None);
    Ok(SyscallReturn::Return(current.pid() as i32))
}
