use super::SyscallReturn;
use crate::{prelude::*, util::user::write_val_to_user};

pub(super) fn sys_rt_sigpending(set_addr: Vaddr, sigset_size: usize) -> Result<SyscallReturn> {
    if sigset_size != 8 {
        return_errno!(Errno::EINVAL);
    }
    let pending = current!().pending_signals().as_u64();
    write_val_to_user(set_addr, &pending)?;
    Ok(SyscallReturn::Return(0))
}
