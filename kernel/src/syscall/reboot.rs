use super::SyscallReturn;
use crate::prelude::*;

const MAGIC1: u32 = 0xfee1_dead;
const MAGIC2: u32 = 0x2812_1969;

pub(super) fn sys_reboot(
    magic1: u32,
    magic2: u32,
    _cmd: u32,
    _arg: Vaddr,
) -> Result<SyscallReturn> {
    if magic1 != MAGIC1 || magic2 != MAGIC2 {
        return_errno!(Errno::EINVAL);
    }
    if !current!().creds().is_superuser() {
        return_errno!(Errno::EPERM);
    }
    crate::fs::buffer::bsync_all()?;
    warn!("reboot requested; halting");
    // The reset sequence itself (keyboard-controller pulse or triple
    // fault) is the boot glue's job.
    loop {
        crate::arch::x86::halt();
        #[cfg(test)]
        break;
    }
    #[cfg(test)]
    Ok(SyscallReturn::Return(0))
}
