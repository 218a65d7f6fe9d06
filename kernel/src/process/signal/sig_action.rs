use super::{c_types::sigaction_t, constants::*, sig_mask::SigMask, sig_num::SigNum};
use crate::prelude::*;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum SigAction {
    #[default]
    Dfl,
    Ign,
    User {
        handler_addr: usize,
        flags: SigActionFlags,
        restorer_addr: usize,
        mask: SigMask,
    },
}

impl TryFrom<sigaction_t> for SigAction {
    type Error = Error;

    fn try_from(input: sigaction_t) -> Result<Self> {
        let action = match input.handler_ptr as usize {
            SIG_DFL => SigAction::Dfl,
            SIG_IGN => SigAction::Ign,
            _ => SigAction::User {
                handler_addr: input.handler_ptr as usize,
                flags: SigActionFlags::from_bits_truncate(input.flags),
                restorer_addr: input.restorer_ptr as usize,
                mask: input.mask.into(),
            },
        };
        Ok(action)
    }
}

impl SigAction {
    pub fn as_c_type(&self) -> sigaction_t {
        match self {
            SigAction::Dfl => sigaction_t {
                handler_ptr: SIG_DFL as u32,
                ..Default::default()
            },
            SigAction::Ign => sigaction_t {
                handler_ptr: SIG_IGN as u32,
                ..Default::default()
            },
            SigAction::User {
                handler_addr,
                flags,
                restorer_addr,
                mask,
            } => sigaction_t {
                handler_ptr: *handler_addr as u32,
                flags: flags.bits(),
                restorer_ptr: *restorer_addr as u32,
                mask: (*mask).into(),
            },
        }
    }
}

bitflags! {
    #[derive(Default)]
    pub struct SigActionFlags: u32 {
        const SA_NOCLDSTOP  = 1;
        const SA_NOCLDWAIT  = 2;
        const SA_SIGINFO    = 4;
        const SA_ONSTACK    = 0x08000000;
        const SA_RESTART    = 0x10000000;
        const SA_NODEFER    = 0x40000000;
        const SA_RESETHAND  = 0x80000000;
        const SA_RESTORER   = 0x04000000;
    }
}

/// What `SIG_DFL` does for a given signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SigDefaultAction {
    Term,
    Ign,
    Core,
    Stop,
    Cont,
}

impl SigDefaultAction {
    pub fn from_signum(num: SigNum) -> SigDefaultAction {
        match num {
            SIGABRT | SIGBUS | SIGFPE | SIGILL | SIGQUIT | SIGSEGV | SIGSYS | SIGTRAP
            | SIGXCPU | SIGXFSZ => SigDefaultAction::Core,
            SIGCHLD | SIGURG | SIGWINCH => SigDefaultAction::Ign,
            SIGCONT => SigDefaultAction::Cont,
            SIGSTOP | SIGTSTP | SIGTTIN | SIGTTOU => SigDefaultAction::Stop,
            _ => SigDefaultAction::Term,
        }
    }
}
