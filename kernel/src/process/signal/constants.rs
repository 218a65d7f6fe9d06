use super::sig_num::SigNum;

pub const MIN_STD_SIG_NUM: u8 = 1;
pub const MAX_STD_SIG_NUM: u8 = 31;
pub const MIN_RT_SIG_NUM: u8 = 32;
pub const MAX_RT_SIG_NUM: u8 = 64;
pub const COUNT_ALL_SIGS: usize = 64;

/// Upper bound on queued real-time signal instances per task.
pub const MAX_RT_QUEUED: usize = 1024;

pub const SIGHUP: SigNum = SigNum::from_u8(1);
pub const SIGINT: SigNum = SigNum::from_u8(2);
pub const SIGQUIT: SigNum = SigNum::from_u8(3);
pub const SIGILL: SigNum = SigNum::from_u8(4);
pub const SIGTRAP: SigNum = SigNum::from_u8(5);
pub const SIGABRT: SigNum = SigNum::from_u8(6);
pub const SIGBUS: SigNum = SigNum::from_u8(7);
pub const SIGFPE: SigNum = SigNum::from_u8(8);
pub const SIGKILL: SigNum = SigNum::from_u8(9);
pub const SIGUSR1: SigNum = SigNum::from_u8(10);
pub const SIGSEGV: SigNum = SigNum::from_u8(11);
pub const SIGUSR2: SigNum = SigNum::from_u8(12);
pub const SIGPIPE: SigNum = SigNum::from_u8(13);
pub const SIGALRM: SigNum = SigNum::from_u8(14);
pub const SIGTERM: SigNum = SigNum::from_u8(15);
pub const SIGSTKFLT: SigNum = SigNum::from_u8(16);
pub const SIGCHLD: SigNum = SigNum::from_u8(17);
pub const SIGCONT: SigNum = SigNum::from_u8(18);
pub const SIGSTOP: SigNum = SigNum::from_u8(19);
pub const SIGTSTP: SigNum = SigNum::from_u8(20);
pub const SIGTTIN: SigNum = SigNum::from_u8(21);
pub const SIGTTOU: SigNum = SigNum::from_u8(22);
pub const SIGURG: SigNum = SigNum::from_u8(23);
pub const SIGXCPU: SigNum = SigNum::from_u8(24);
pub const SIGXFSZ: SigNum = SigNum::from_u8(25);
pub const SIGVTALRM: SigNum = SigNum::from_u8(26);
pub const SIGPROF: SigNum = SigNum::from_u8(27);
pub const SIGWINCH: SigNum = SigNum::from_u8(28);
pub const SIGIO: SigNum = SigNum::from_u8(29);
pub const SIGPWR: SigNum = SigNum::from_u8(30);
pub const SIGSYS: SigNum = SigNum::from_u8(31);

pub const SIG_DFL: usize = 0;
pub const SIG_IGN: usize = 1;
