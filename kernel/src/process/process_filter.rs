use super::{Pgid, Pid, Process};
use crate::prelude::*;

/// The pid selector of `waitpid`/`kill`: a specific process, a process
/// group, or anyone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessFilter {
    Any,
    WithPid(Pid),
    WithPgid(Pgid),
}

impl ProcessFilter {
    /// Decode the `waitpid` convention: `< -1` a group, `-1` anyone,
    /// `0` the caller's group, `> 0` one pid.
    pub fn from_wait_id(id: i32) -> Self {
        if id < -1 {
            ProcessFilter::WithPgid((-id) as Pgid)
        } else if id == -1 {
            ProcessFilter::Any
        } else if id == 0 {
            ProcessFilter::WithPgid(current!().pgid())
        } else {
            ProcessFilter::WithPid(id as Pid)
        }
    }

    pub fn matches(&self, process: &Arc<Process>) -> bool {
        match self {
            ProcessFilter::Any => true,
            ProcessFilter::WithPid(pid) => process.pid() == *pid,
            ProcessFilter::WithPgid(pgid) => process.pgid() == *pgid,
        }
    }
}
