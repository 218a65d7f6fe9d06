pub mod fault;
pub mod kernel;
pub mod user;

use core::fmt::Debug;

use super::{c_types::siginfo_t, sig_num::SigNum};

/// One queued signal instance with enough context to build its
/// `siginfo`.
pub trait Signal: Send + Sync + Debug {
    fn num(&self) -> SigNum;
    fn to_info(&self) -> siginfo_t;
}
