//! The unified buffer cache.
//!
//! One [`BufferHead`] per live `(device, block, size)` triple, hashed
//! globally and kept on a per-size-class LRU for reuse. Reads go
//! through `bread`, which issues a driver request only when the buffer
//! is not up to date; writes dirty the buffer and reach the device on
//! `bsync`. Dropping the last reference to a clean buffer leaves it
//! cached; dirty buffers are pinned until written back.

use core::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use hashbrown::HashMap;

use super::device::{self, BlockRequest, DeviceId};
use crate::{prelude::*, sched::wait::WaitQueue};

pub const BLOCK_SIZES: [usize; 4] = [512, 1024, 2048, 4096];

/// Cached buffers kept per size class before clean ones are recycled.
const CACHE_CAPACITY_PER_CLASS: usize = 256;

type Key = (u64, u32, u32);

fn key_of(dev: DeviceId, block: u32, size: usize) -> Key {
    (dev.as_encoded(), block, size as u32)
}

pub struct BufferHead {
    dev: DeviceId,
    block: u32,
    size: usize,
    this: Weak<BufferHead>,
    data: SpinLock<Box<[u8]>>,
    uptodate: AtomicBool,
    dirty: AtomicBool,
    locked: AtomicBool,
    stamp: AtomicU64,
    wait: WaitQueue,
}

impl BufferHead {
    pub fn dev(&self) -> DeviceId {
        self.dev
    }

    pub fn block(&self) -> u32 {
        self.block
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn is_uptodate(&self) -> bool {
        self.uptodate.load(Ordering::Acquire)
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    /// Copy out of the buffer.
    pub fn read_at(&self, offset: usize, out: &mut [u8]) {
        let data = self.data.lock();
        out.copy_from_slice(&data[offset..offset + out.len()]);
    }

    /// Copy into the buffer and mark it dirty.
    pub fn write_at(&self, offset: usize, src: &[u8]) {
        {
            let mut data = self.data.lock();
            data[offset..offset + src.len()].copy_from_slice(src);
        }
        self.uptodate.store(true, Ordering::Release);
        self.mark_dirty();
    }

    /// Run `f` over the buffer contents.
    pub fn with_data<R>(&self, f: impl FnOnce(&mut [u8]) -> R) -> R {
        let mut data = self.data.lock();
        f(&mut data)
    }

    pub fn mark_dirty(&self) {
        if !self.dirty.swap(true, Ordering::AcqRel) {
            let this = self.this.upgrade().unwrap();
            DIRTY.lock_irq_disabled().insert(
                key_of(this.dev, this.block, this.size),
                this.clone(),
            );
        }
    }

    fn clear_dirty(&self) {
        if self.dirty.swap(false, Ordering::AcqRel) {
            DIRTY
                .lock_irq_disabled()
                .remove(&key_of(self.dev, self.block, self.size));
        }
    }

    fn touch(&self) {
        self.stamp
            .store(NEXT_STAMP.fetch_add(1, Ordering::Relaxed), Ordering::Relaxed);
    }
}

impl Debug for BufferHead {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("BufferHead")
            .field("dev", &self.dev)
            .field("block", &self.block)
            .field("size", &self.size)
            .field("uptodate", &self.is_uptodate())
            .field("dirty", &self.is_dirty())
            .finish()
    }
}

static NEXT_STAMP: AtomicU64 = AtomicU64::new(1);

lazy_static! {
    static ref CACHE: SpinLock<HashMap<Key, Arc<BufferHead>>> = SpinLock::new(HashMap::new());
    static ref DIRTY: SpinLock<BTreeMap<Key, Arc<BufferHead>>> = SpinLock::new(BTreeMap::new());
}

/// Find-or-create the buffer for `(dev, block, size)`. The returned
/// buffer may not be up to date; `bread` is the reading interface.
pub fn getblk(dev: DeviceId, block: u32, size: usize) -> Result<Arc<BufferHead>> {
    if !BLOCK_SIZES.contains(&size) {
        return_errno_with_message!(Errno::EINVAL, "bad buffer size class");
    }
    let key = key_of(dev, block, size);
    let mut cache = CACHE.lock_irq_disabled();
    if let Some(bh) = cache.get(&key) {
        bh.touch();
        return Ok(bh.clone());
    }
    evict_if_crowded(&mut cache, size);
    let bh = Arc::new_cyclic(|this| BufferHead {
        dev,
        block,
        size,
        this: this.clone(),
        data: SpinLock::new(vec![0u8; size].into_boxed_slice()),
        uptodate: AtomicBool::new(false),
        dirty: AtomicBool::new(false),
        locked: AtomicBool::new(false),
        stamp: AtomicU64::new(0),
        wait: WaitQueue::new(),
    });
    bh.touch();
    cache.insert(key, bh.clone());
    Ok(bh)
}

/// Recycle the least-recently-used clean, unreferenced buffer of this
/// size class once the class is over capacity.
fn evict_if_crowded(cache: &mut HashMap<Key, Arc<BufferHead>>, size: usize) {
    let in_class = cache.keys().filter(|k| k.2 == size as u32).count();
    if in_class < CACHE_CAPACITY_PER_CLASS {
        return;
    }
    let victim = cache
        .iter()
        .filter(|(k, bh)| {
            k.2 == size as u32 && !bh.is_dirty() && Arc::strong_count(bh) == 1
        })
        .min_by_key(|(_, bh)| bh.stamp.load(Ordering::Relaxed))
        .map(|(k, _)| *k);
    if let Some(key) = victim {
        cache.remove(&key);
    }
}

/// The buffer for `(dev, block, size)`, guaranteed up to date; issues
/// a blocking read through the driver when it is not.
pub fn bread(dev: DeviceId, block: u32, size: usize) -> Result<Arc<BufferHead>> {
    let bh = getblk(dev, block, size)?;
    if !bh.is_uptodate() {
        ll_rw_block(false, &bh)?;
        bh.uptodate.store(true, Ordering::Release);
    }
    Ok(bh)
}

/// Write the buffer through to the device immediately.
pub fn bwrite(bh: &Arc<BufferHead>) -> Result<()> {
    ll_rw_block(true, bh)?;
    bh.clear_dirty();
    Ok(())
}

/// Write back every dirty buffer belonging to `dev`; blocks until the
/// device has them all.
pub fn bsync_dev(dev: DeviceId) -> Result<()> {
    let dirty: Vec<Arc<BufferHead>> = DIRTY
        .lock_irq_disabled()
        .values()
        .filter(|bh| bh.dev == dev)
        .cloned()
        .collect();
    for bh in dirty {
        bwrite(&bh)?;
    }
    Ok(())
}

/// Write back every dirty buffer in the system.
pub fn bsync_all() -> Result<()> {
    let dirty: Vec<Arc<BufferHead>> = DIRTY.lock_irq_disabled().values().cloned().collect();
    for bh in dirty {
        bwrite(&bh)?;
    }
    Ok(())
}

/// Drop every cached buffer of `dev`, syncing dirty ones first (used
/// at umount and by the loop driver teardown).
pub fn invalidate_dev(dev: DeviceId) -> Result<()> {
    bsync_dev(dev)?;
    CACHE
        .lock_irq_disabled()
        .retain(|key, _| key.0 != dev.as_encoded());
    Ok(())
}

/// The low-level request path: lock the buffer, hand it to the
/// driver's request queue, and wake waiters on completion.
fn ll_rw_block(write: bool, bh: &Arc<BufferHead>) -> Result<()> {
    let driver = device::lookup_block(bh.dev)?;
    while bh.locked.swap(true, Ordering::Acquire) {
        bh.wait.sleep_on();
    }
    let res = {
        let mut data = bh.data.lock();
        if write {
            driver.queue_request(BlockRequest::Write {
                block: bh.block,
                buf: &data,
            })
        } else {
            driver.queue_request(BlockRequest::Read {
                block: bh.block,
                buf: &mut data,
            })
        }
    };
    bh.locked.store(false, Ordering::Release);
    bh.wait.wake_all();
    res
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::ramdisk::RamDisk;

    fn test_disk(minor: u32) -> DeviceId {
        let id = DeviceId::new(device::RAMDISK_MAJOR, minor);
        device::register_block(Arc::new(RamDisk::new(id, 64 * 1024)));
        id
    }

    #[test]
    fn getblk_returns_same_identity() {
        let _guard = crate::mm::test_util::serialize_test();
        let dev = test_disk(40);
        let a = getblk(dev, 3, 1024).unwrap();
        let b = getblk(dev, 3, 1024).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        // A different size class is a different buffer.
        let c = getblk(dev, 3, 512).unwrap();
        assert!(!Arc::ptr_eq(&a, &c));
    }

    #[test]
    fn write_read_back_through_fresh_buffer() {
        let _guard = crate::mm::test_util::serialize_test();
        let dev = test_disk(41);
        let bh = bread(dev, 5, 1024).unwrap();
        bh.write_at(10, b"durable");
        bwrite(&bh).unwrap();
        drop(bh);
        // Invalidate so the next read really hits the device.
        invalidate_dev(dev).unwrap();
        let fresh = bread(dev, 5, 1024).unwrap();
        let mut buf = [0u8; 7];
        fresh.read_at(10, &mut buf);
        assert_eq!(&buf, b"durable");
    }

    #[test]
    fn bsync_writes_dirty_buffers() {
        let _guard = crate::mm::test_util::serialize_test();
        let dev = test_disk(42);
        let bh = bread(dev, 1, 512).unwrap();
        bh.write_at(0, b"x");
        assert!(bh.is_dirty());
        bsync_dev(dev).unwrap();
        assert!(!bh.is_dirty());
        drop(bh);
        invalidate_dev(dev).unwrap();
        let fresh = bread(dev, 1, 512).unwrap();
        let mut buf = [0u8; 1];
        fresh.read_at(0, &mut buf);
        assert_eq!(&buf, b"x");
    }

    #[test]
    fn bad_size_class_rejected() {
        let _guard = crate::mm::test_util::serialize_test();
        let dev = test_disk(43);
        assert_eq!(getblk(dev, 0, 777).unwrap_err().error(), Errno::EINVAL);
    }
}
