//! The global task table, keyed by pid. Zombies stay in the table
//! until their parent reaps them.

use super::{Pgid, Pid, Process, Sid};
use crate::prelude::*;

lazy_static! {
    static ref PROCESS_TABLE: SpinLock<BTreeMap<Pid, Arc<Process>>> =
        SpinLock::new(BTreeMap::new());
}

pub fn insert(process: Arc<Process>) {
    PROCESS_TABLE
        .lock_irq_disabled()
        .insert(process.pid(), process);
}

pub fn remove(pid: Pid) -> Option<Arc<Process>> {
    PROCESS_TABLE.lock_irq_disabled().remove(&pid)
}

pub fn get(pid: Pid) -> Option<Arc<Process>> {
    PROCESS_TABLE.lock_irq_disabled().get(&pid).cloned()
}

pub fn init_process() -> Option<Arc<Process>> {
    get(1)
}

pub fn for_each(mut f: impl FnMut(&Arc<Process>)) {
    for process in PROCESS_TABLE.lock_irq_disabled().values() {
        f(process);
    }
}

/// Every member of process group `pgid`.
pub fn process_group(pgid: Pgid) -> Vec<Arc<Process>> {
    PROCESS_TABLE
        .lock_irq_disabled()
        .values()
        .filter(|p| p.pgid() == pgid)
        .cloned()
        .collect()
}

/// Every member of session `sid`.
pub fn session(sid: Sid) -> Vec<Arc<Process>> {
    PROCESS_TABLE
        .lock_irq_disabled()
        .values()
        .filter(|p| p.sid() == sid)
        .cloned()
        .collect()
}

pub fn len() -> usize {
    PROCESS_TABLE.lock_irq_disabled().len()
}
