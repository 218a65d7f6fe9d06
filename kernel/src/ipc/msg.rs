//! Message queues.

use core::sync::atomic::{AtomicI32, Ordering};

use super::{IPC_CREAT, IPC_EXCL, IPC_NOWAIT, IPC_PRIVATE, IPC_RMID};
use crate::{prelude::*, sched::wait::WaitQueue};

const MSGMNB: usize = 16384;
const MSGMAX: usize = 8192;

struct MsgQueue {
    messages: SpinLock<VecDeque<(i64, Vec<u8>)>>,
    bytes: AtomicI32,
    read_wait: WaitQueue,
    write_wait: WaitQueue,
}

impl MsgQueue {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            messages: SpinLock::new(VecDeque::new()),
            bytes: AtomicI32::new(0),
            read_wait: WaitQueue::new(),
            write_wait: WaitQueue::new(),
        })
    }
}

static NEXT_ID: AtomicI32 = AtomicI32::new(1);

lazy_static! {
    static ref QUEUES: SpinLock<BTreeMap<i32, Arc<MsgQueue>>> = SpinLock::new(BTreeMap::new());
    static ref KEYS: SpinLock<BTreeMap<i32, i32>> = SpinLock::new(BTreeMap::new());
}

fn queue_of(id: i32) -> Result<Arc<MsgQueue>> {
    QUEUES
        .lock()
        .get(&id)
        .cloned()
        .ok_or(Error::new(Errno::EIDRM))
}

pub fn msgget(key: i32, flags: i32) -> Result<i32> {
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
    QUEUES.lock().insert(id, MsgQueue::new());
    if key != IPC_PRIVATE {
        KEYS.lock().insert(key, id);
    }
    Ok(id)
}

pub fn msgsnd(id: i32, mtype: i64, data: &[u8], flags: i32) -> Result<()> {
    if mtype <= 0 {
        return_errno!(Errno::EINVAL);
    }
    if data.len() > MSGMAX {
        return_errno!(Errno::EINVAL);
    }
    let queue = queue_of(id)?;
    loop {
        {
            if (queue.bytes.load(Ordering::Relaxed) as usize) + data.len() <= MSGMNB {
                queue
                    .messages
                    .lock_irq_disabled()
                    .push_back((mtype, data.to_vec()));
                queue.bytes.fetch_add(data.len() as i32, Ordering::Relaxed);
                queue.read_wait.wake_all();
                return Ok(());
            }
        }
        if flags & IPC_NOWAIT != 0 {
            return_errno!(Errno::EAGAIN);
        }
        queue.write_wait.sleep_on();
        if current!().has_pending_signal() {
            return_errno!(Errno::EINTR);
        }
        // Re-check liveness after sleeping.
        queue_of(id)?;
    }
}

/// `mtype == 0`: first message; `> 0`: first of that type; `< 0`:
/// lowest type not exceeding `-mtype`.
pub fn msgrcv(id: i32, mtype: i64, max_len: usize, flags: i32) -> Result<(i64, Vec<u8>)> {
    let queue = queue_of(id)?;
    loop {
        {
            let mut messages = queue.messages.lock_irq_disabled();
            let pos = if mtype == 0 {
                if messages.is_empty() {
                    None
                } else {
                    Some(0)
                }
            } else if mtype > 0 {
                messages.iter().position(|(t, _)| *t == mtype)
            } else {
                messages
                    .iter()
                    .enumerate()
                    .filter(|(_, (t, _))| *t <= -mtype)
                    .min_by_key(|(_, (t, _))| *t)
                    .map(|(idx, _)| idx)
            };
            if let Some(pos) = pos {
                let (found_type, payload) = messages.remove(pos).unwrap();
                drop(messages);
                if payload.len() > max_len {
                    // E2BIG semantics: without MSG_NOERROR the message
                    // stays gone, truncated result returned.
                    let mut truncated = payload;
                    truncated.truncate(max_len);
                    queue.bytes.fetch_sub(truncated.len() as i32, Ordering::Relaxed);
                    queue.write_wait.wake_all();
                    return Ok((found_type, truncated));
                }
                queue.bytes.fetch_sub(payload.len() as i32, Ordering::Relaxed);
                queue.write_wait.wake_all();
                return Ok((found_type, payload));
            }
        }
        if flags & IPC_NOWAIT != 0 {
            return_errno!(Errno::ENOMSG);
        }
        queue.read_wait.sleep_on();
        if current!().has_pending_signal() {
            return_errno!(Errno::EINTR);
        }
        queue_of(id)?;
    }
}

pub fn msgctl(id: i32, cmd: i32) -> Result<i32> {
    match cmd {
        IPC_RMID => {
            let queue = QUEUES
                .lock()
                .remove(&id)
                .ok_or(Error::new(Errno::EIDRM))?;
            KEYS.lock().retain(|_, v| *v != id);
            queue.read_wait.wake_all();
            queue.write_wait.wake_all();
            Ok(0)
        }
        _ => return_errno!(Errno::EINVAL),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fifo_and_type_selection() {
        let _guard = crate::mm::test_util::serialize_test();
        let id = msgget(IPC_PRIVATE, IPC_CREAT).unwrap();
        msgsnd(id, 2, b"second-type", 0).unwrap();
        msgsnd(id, 1, b"first-type", 0).unwrap();

        // Type 0 takes FIFO order.
        let (t, data) = msgrcv(id, 0, 64, 0).unwrap();
        assert_eq!((t, data.as_slice()), (2, b"second-type".as_slice()));
        // Exact-type selection digs out the match.
        msgsnd(id, 5, b"five", 0).unwrap();
        let (t, data) = msgrcv(id, 5, 64, 0).unwrap();
        assert_eq!((t, data.as_slice()), (5, b"five".as_slice()));
        // Negative selector: lowest type <= 9.
        let (t, _) = msgrcv(id, -9, 64, 0).unwrap();
        assert_eq!(t, 1);
        msgctl(id, IPC_RMID).unwrap();
    }

    #[test]
    fn nowait_on_empty_queue() {
        let _guard = crate::mm::test_util::serialize_test();
        let id = msgget(IPC_PRIVATE, IPC_CREAT).unwrap();
        let err = msgrcv(id, 0, 16, IPC_NOWAIT).unwrap_err();
        assert_eq!(err.error(), Errno::ENOMSG);
        msgctl(id, IPC_RMID).unwrap();
        assert_eq!(msgsnd(id, 1, b"x", 0).unwrap_err().error(), Errno::EIDRM);
    }
}
