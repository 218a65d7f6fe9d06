//! Semaphore sets.

use core::sync::atomic::{AtomicI32, Ordering};

use super::{IPC_CREAT, IPC_EXCL, IPC_NOWAIT, IPC_PRIVATE, IPC_RMID};
use crate::{prelude::*, sched::wait::WaitQueue};

pub const GETVAL: i32 = 12;
pub const SETVAL: i32 = 16;

pub const SEM_UNDO: i16 = 0x1000;

/// One operation of `semop`: semaphore index, delta, flags.
#[derive(Debug, Clone, Copy)]
pub struct SemBuf {
    pub num: u16,
    pub op: i16,
    pub flags: i16,
}

struct SemSet {
    values: SpinLock<Vec<i32>>,
    wait: WaitQueue,
}

static NEXT_ID: AtomicI32 = AtomicI32::new(1);

lazy_static! {
    static ref SETS: SpinLock<BTreeMap<i32, Arc<SemSet>>> = SpinLock::new(BTreeMap::new());
    static ref KEYS: SpinLock<BTreeMap<i32, i32>> = SpinLock::new(BTreeMap::new());
}

fn set_of(id: i32) -> Result<Arc<SemSet>> {
    SETS.lock().get(&id).cloned().ok_or(Error::new(Errno::EIDRM))
}

pub fn semget(key: i32, nsems: usize, flags: i32) -> Result<i32> {
    if nsems == 0 || nsems > 64 {
        return_errno!(Errno::EINVAL);
    }
    if key != IPC_PRIVATE {
        if let Some(&id) = KEYS.lock().get(&key) {
            if flags & IPC_CREAT != 0 && flags & IPC_EXCL != 0 {
                return_errno!(Errno::EEXIST);
            }
            return Ok(id);
        }
        if flags & IPC_CREAT == 0 {
            return_errno!(Errno::ENOENT);
        }
    }
    let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
    SETS.lock().insert(
        id,
        Arc::new(SemSet {
            values: SpinLock::new(vec![0; nsems]),
            wait: WaitQueue::new(),
        }),
    );
    if key != IPC_PRIVATE {
        KEYS.lock().insert(key, id);
    }
    Ok(id)
}

/// Apply every op atomically: either all go through or the caller
/// sleeps (or gets `EAGAIN` with `IPC_NOWAIT`). SEM_UNDO bookkeeping
/// is not carried.
pub fn semop(id: i32, ops: &[SemBuf]) -> Result<()> {
    let set = set_of(id)?;
    loop {
        {
            let mut values = set.values.lock_irq_disabled();
            if ops.iter().any(|op| op.num as usize >= values.len()) {
                return_errno!(Errno::EFBIG);
            }
            let applies = ops.iter().all(|op| {
                let value = values[op.num as usize];
                // Decrements must not drive below zero; an op of zero
                // waits for zero.
                if op.op < 0 {
                    value + op.op as i32 >= 0
                } else if op.op == 0 {
                    value == 0
                } else {
                    true
                }
            });
            if applies {
                for op in ops {
                    values[op.num as usize] += op.op as i32;
                }
                drop(values);
                set.wait.wake_all();
                return Ok(());
            }
        }
        if ops.iter().any(|op| op.flags & IPC_NOWAIT as i16 != 0) {
            return_errno!(Errno::EAGAIN);
        }
        set.wait.sleep_on();
        if current!().has_pending_signal() {
            return_errno!(Errno::EINTR);
        }
        set_of(id)?;
    }
}

pub fn semctl(id: i32, num: usize, cmd: i32, arg: i32) -> Result<i32> {
    match cmd {
        IPC_RMID => {
            let set = SETS.lock().remove(&id).ok_or(Error::new(Errno::EIDRM))?;
            KEYS.lock().retain(|_, v| *v != id);
            set.wait.wake_all();
            Ok(0)
        }
        GETVAL => {
            let set = set_of(id)?;
            let values = set.values.lock_irq_disabled();
            values
                .get(num)
                .copied()
                .ok_or(Error::new(Errno::EINVAL))
        }
        SETVAL => {
            let set = set_of(id)?;
            {
                let mut values = set.values.lock_irq_disabled();
                let slot = values.get_mut(num).ok_or(Error::new(Errno::EINVAL))?;
                *slot = arg;
            }
            set.wait.wake_all();
            Ok(0)
        }
        _ => return_errno!(Errno::EINVAL),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn atomic_multi_op_and_nowait() {
        let _guard = crate::mm::test_util::serialize_test();
        let id = semget(IPC_PRIVATE, 2, IPC_CREAT).unwrap();
        semctl(id, 0, SETVAL, 1).unwrap();

        // Taking both: one succeeds, the second would block.
        semop(
            id,
            &[SemBuf {
                num: 0,
                op: -1,
                flags: 0,
            }],
        )
        .unwrap();
        let err = semop(
            id,
            &[SemBuf {
                num: 0,
                op: -1,
                flags: IPC_NOWAIT as i16,
            }],
        )
        .unwrap_err();
        assert_eq!(err.error(), Errno::EAGAIN);

        // An all-or-nothing pair: the failing member blocks the whole
        // set, so semaphore 1 stays untouched.
        let err = semop(
            id,
            &[
                SemBuf {
                    num: 1,
                    op: 1,
                    flags: IPC_NOWAIT as i16,
                },
                SemBuf {
                    num: 0,
                    op: -1,
                    flags: IPC_NOWAIT as i16,
                },
            ],
        )
        .unwrap_err();
        assert_eq!(err.error(), Errno::EAGAIN);
        assert_eq!(semctl(id, 1, GETVAL, 0).unwrap(), 0);
        semctl(id, 0, IPC_RMID, 0).unwrap();
    }
}
