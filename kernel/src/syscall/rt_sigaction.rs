use super::SyscallReturn;
use crate::{
    prelude::*,
    process::signal::{
        c_types::sigaction_t,
        constants::{SIGKILL, SIGSTOP},
        sig_action::SigAction,
        sig_num::SigNum,
    },
    util::user::{read_val_from_user, write_val_to_user},
};

pub(super) fn sys_rt_sigaction(
    signum: u32,
    act_addr: Vaddr,
    old_act_addr: Vaddr,
    sigset_size: usize,
) -> Result<SyscallReturn> {
    if sigset_size != 8 {
        return_errno_with_message!(Errno::EINVAL, "invalid sigset size");
    }
    let num = SigNum::try_from(signum as u8)?;
    let current = current!();
    let dispositions = current.sig_dispositions();
    let mut dispositions = dispositions.lock();
    let old = dispositions.get(num);
    if act_addr != 0 {
        if num == SIGKILL || num == SIGSTOP {
            return_errno!(Errno::EINVAL);
        }
        let raw: sigaction_t = read_val_from_user(act_addr)?;
        dispositions.set(num, SigAction::try_from(raw)?);
    }
    if old_act_addr != 0 {
        write_val_to_user(old_act_addr, &old.as_c_type())?;
    }
    Ok(SyscallReturn::Return(0))
}
