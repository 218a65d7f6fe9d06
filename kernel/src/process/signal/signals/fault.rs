use super::{
    super::{c_types::siginfo_t, sig_num::SigNum},
    Signal,
};
use crate::mm::Vaddr;

/// A synchronous fault (SIGSEGV, SIGBUS, SIGFPE) carrying the faulting
/// address.
#[derive(Debug, Clone, Copy)]
pub struct FaultSignal {
    num: SigNum,
    addr: Vaddr,
}

impl FaultSignal {
    pub fn new(num: SigNum, addr: Vaddr) -> Self {
        Self { num, addr }
    }
}

impl Signal for FaultSignal {
    fn num(&self) -> SigNum {
        self.num
    }

    fn to_info(&self) -> siginfo_t {
        siginfo_t {
            si_signo: self.num.as_u8() as i32,
            si_addr: self.addr as u32,
            ..Default::default()
        }
    }
}
