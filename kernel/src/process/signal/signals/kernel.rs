use super::{
    super::{
        c_types::{siginfo_t, SI_KERNEL},
        sig_num::SigNum,
    },
    Signal,
};

/// A signal originated inside the kernel (SIGCHLD, SIGALRM, SIGPIPE).
#[derive(Debug, Clone, Copy)]
pub struct KernelSignal {
    num: SigNum,
}

impl KernelSignal {
    pub const fn new(num: SigNum) -> Self {
        Self { num }
    }
}

impl Signal for KernelSignal {
    fn num(&self) -> SigNum {
        self.num
    }

    fn to_info(&self) -> siginfo_t {
        siginfo_t {
            si_signo: self.num.as_u8() as i32,
            si_code: SI_KERNEL,
            ..Default::default()
        }
    }
}
