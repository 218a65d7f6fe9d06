use super::{
    super::{
        c_types::{siginfo_t, SI_USER},
        sig_num::SigNum,
    },
    Signal,
};
use crate::process::Pid;

/// A signal sent by another process (`kill`, `tkill`, TTY job control).
#[derive(Debug, Clone, Copy)]
pub struct UserSignal {
    num: SigNum,
    pid: Pid,
    uid: u32,
}

impl UserSignal {
    pub fn new(num: SigNum, pid: Pid, uid: u32) -> Self {
        Self { num, pid, uid }
    }
}

impl Signal for UserSignal {
    fn num(&self) -> SigNum {
        self.num
    }

    fn to_info(&self) -> siginfo_t {
        siginfo_t {
            si_signo: self.num.as_u8() as i32,
            si_code: SI_USER,
            si_pid: self.pid as i32,
            si_uid: self.uid,
            ..Default::default()
        }
    }
}
