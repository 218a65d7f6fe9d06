use super::SyscallReturn;
use crate::{
    prelude::*,
    process::signal::sig_mask::SigMask,
    util::user::{read_val_from_user, write_val_to_user},
};

const SIG_BLOCK: u32 = 0;
const SIG_UNBLOCK: u32 = 1;
const SIG_SETMASK: u32 = 2;

pub(super) fn sys_rt_sigprocmask(
    how: u32,
    set_addr: Vaddr,
    old_set_addr: Vaddr,
    sigset_size: usize,
) -> Result<SyscallReturn> {
    if sigset_size != 8 {
        return_errno!(Errno::EINVAL);
    }
    let current = current!();
    let old = current.sig_mask();
    if old_set_addr != 0 {
        write_val_to_user(old_set_addr, &old.as_u64())?;
    }
    if set_addr != 0 {
        let raw: u64 = read_val_from_user(set_addr)?;
        let set = SigMask::from(raw);
        let new = match how {
            SIG_BLOCK => old | set,
            SIG_UNBLOCK => old - set,
            SIG_SETMASK => set,
            _ => return_errno_with_message!(Errno::EINVAL, "invalid sigprocmask how"),
        };
        current.set_sig_mask(new);
    }
    Ok(SyscallReturn::Return(0))
}
