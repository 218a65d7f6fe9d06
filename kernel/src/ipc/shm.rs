//! Shared memory: segments are frame runs mapped shared into any
//! number of address spaces.

use core::sync::atomic::{AtomicI32, AtomicUsize, Ordering};

use super::{IPC_CREAT, IPC_EXCL, IPC_PRIVATE, IPC_RMID};
use crate::{
    mm::{Frame, VmPerms, VmaBacking, VmaFlags, ZoneId, PAGE_SIZE},
    prelude::*,
    process::Pid,
};

const SHMMAX: usize = 16 * 1024 * 1024;

struct ShmSegment {
    frames: Arc<Vec<Frame>>,
    size: usize,
    nattch: AtomicUsize,
    removed: SpinLock<bool>,
}

static NEXT_ID: AtomicI32 = AtomicI32::new(1);

lazy_static! {
    static ref SEGMENTS: SpinLock<BTreeMap<i32, Arc<ShmSegment>>> =
        SpinLock::new(BTreeMap::new());
    static ref KEYS: SpinLock<BTreeMap<i32, i32>> = SpinLock::new(BTreeMap::new());
    /// `(pid, addr)` of every attach, for shmdt.
    static ref ATTACHES: SpinLock<BTreeMap<(Pid, Vaddr), i32>> = SpinLock::new(BTreeMap::new());
}

fn segment_of(id: i32) -> Result<Arc<ShmSegment>> {
    SEGMENTS
        .lock()
        .get(&id)
        .cloned()
        .ok_or(Error::new(Errno::EIDRM))
}

pub fn shmget(key: i32, size: usize, flags: i32) -> Result<i32> {
    if size == 0 || size > SHMMAX {
        return_errno!(Errno::EINVAL);
    }
    if key != IPC_PRIVATE {
        if let Some(&id) = KEYS.lock().get(&key) {
            if flags & IPC_CREAT != 0 && flags & IPC_EXCL != 0 {
                return_errno!(Errno::EEXIST);
            }
            let existing = segment_of(id)?;
            if existing.size < size {
                return_errno!(Errno::EINVAL);
            }
            return Ok(id);
        }
        if flags & IPC_CREAT == 0 {
            return_errno!(Errno::ENOENT);
        }
    }
    let npages = size.div_ceil(PAGE_SIZE);
    let mut frames = Vec::with_capacity(npages);
    for _ in 0..npages {
        frames.push(Frame::alloc_zeroed(ZoneId::High)?);
    }
    let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
    SEGMENTS.lock().insert(
        id,
        Arc::new(ShmSegment {
            frames: Arc::new(frames),
            size,
            nattch: AtomicUsize::new(0),
            removed: SpinLock::new(false),
        }),
    );
    if key != IPC_PRIVATE {
        KEYS.lock().insert(key, id);
    }
    Ok(id)
}

/// Map the segment into the current address space.
pub fn shmat(id: i32, addr_hint: Vaddr) -> Result<Vaddr> {
    let segment = segment_of(id)?;
    let current = current!();
    let vm = current.vm().ok_or(Error::new(Errno::EINVAL))?;
    let len = segment.frames.len() * PAGE_SIZE;
    let addr = vm.map_region(
        addr_hint,
        len,
        VmPerms::READ | VmPerms::WRITE,
        VmaFlags::SHARED,
        VmaBacking::Frames(segment.frames.clone()),
        addr_hint != 0,
    )?;
    segment.nattch.fetch_add(1, Ordering::Relaxed);
    ATTACHES.lock().insert((current.pid(), addr), id);
    Ok(addr)
}

/// Unmap a previous attach.
pub fn shmdt(addr: Vaddr) -> Result<()> {
    let current = current!();
    let id = ATTACHES
        .lock()
        .remove(&(current.pid(), addr))
        .ok_or(Error::new(Errno::EINVAL))?;
    let segment = segment_of(id)?;
    let len = segment.frames.len() * PAGE_SIZE;
    let vm = current.vm().ok_or(Error::new(Errno::EINVAL))?;
    vm.unmap_region(addr, len)?;
    if segment.nattch.fetch_sub(1, Ordering::Relaxed) == 1 && *segment.removed.lock() {
        SEGMENTS.lock().remove(&id);
    }
    Ok(())
}

pub fn shmctl(id: i32, cmd: i32) -> Result<i32> {
    match cmd {
        IPC_RMID => {
            let segment = segment_of(id)?;
            *segment.removed.lock() = true;
            KEYS.lock().retain(|_, v| *v != id);
            // The pages live on until the last detach.
            if segment.nattch.load(Ordering::Relaxed) == 0 {
                SEGMENTS.lock().remove(&id);
            }
            Ok(0)
        }
        _ => return_errno!(Errno::EINVAL),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        mm::Vm,
        process::{self, ProcessBuilder},
    };

    #[test]
    fn segment_shared_between_address_spaces() {
        let _guard = crate::mm::test_util::serialize_test();
        let task_a = ProcessBuilder::new("shm-a")
            .vm(Vm::new().unwrap())
            .build()
            .unwrap();
        let task_b = ProcessBuilder::new("shm-b")
            .vm(Vm::new().unwrap())
            .build()
            .unwrap();
        let id = shmget(IPC_PRIVATE, 2 * PAGE_SIZE, IPC_CREAT).unwrap();

        process::set_current(Some(task_a.clone()));
        let addr_a = shmat(id, 0).unwrap();
        task_a.vm().unwrap().write_bytes(addr_a + 100, b"across").unwrap();

        process::set_current(Some(task_b.clone()));
        let addr_b = shmat(id, 0).unwrap();
        let mut buf = [0u8; 6];
        task_b.vm().unwrap().read_bytes(addr_b + 100, &mut buf).unwrap();
        assert_eq!(&buf, b"across");

        shmdt(addr_b).unwrap();
        process::set_current(Some(task_a.clone()));
        shmdt(addr_a).unwrap();
        shmctl(id, IPC_RMID).unwrap();
        assert_eq!(shmat(id, 0).unwrap_err().error(), Errno::EIDRM);

        process::set_current(None);
        process::table::remove(task_a.pid());
        process::table::remove(task_b.pid());
    }
}
