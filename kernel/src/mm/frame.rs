//! Physical page-frame allocator.
//!
//! One bit per 4 KiB frame, split into two zones: `Normal` frames live
//! inside the kernel direct map, `High` frames must be temporarily
//! mapped before access. Frames are handed out as refcounted [`Frame`]
//! handles; the last handle dropping returns the frame to its zone.

use alloc::{boxed::Box, vec::Vec};
use core::sync::atomic::{AtomicU32, Ordering};

use bitvec::prelude::*;
use spin::Once;

use crate::{
    prelude::*,
    sync::SpinLock,
};

use super::{Paddr, Vaddr, PAGE_SIZE};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZoneId {
    Normal,
    High,
}

struct Zone {
    start_pfn: usize,
    /// One bit per frame; set = in use.
    bitmap: BitVec,
    free: usize,
}

impl Zone {
    fn new(start_pfn: usize, nframes: usize) -> Self {
        Self {
            start_pfn,
            bitmap: bitvec![0; nframes],
            free: nframes,
        }
    }

    fn contains(&self, pfn: usize) -> bool {
        pfn >= self.start_pfn && pfn < self.start_pfn + self.bitmap.len()
    }

    fn alloc_one(&mut self) -> Option<usize> {
        let idx = self.bitmap.iter_zeros().next()?;
        self.bitmap.set(idx, true);
        self.free -= 1;
        Some(self.start_pfn + idx)
    }

    /// First-fit scan for `count` contiguous frames.
    fn alloc_run(&mut self, count: usize) -> Option<usize> {
        let n = self.bitmap.len();
        let mut run = 0;
        for idx in 0..n {
            if self.bitmap[idx] {
                run = 0;
                continue;
            }
            run += 1;
            if run == count {
                let first = idx + 1 - count;
                for i in first..=idx {
                    self.bitmap.set(i, true);
                }
                self.free -= count;
                return Some(self.start_pfn + first);
            }
        }
        None
    }

    fn free_one(&mut self, pfn: usize) {
        let idx = pfn - self.start_pfn;
        assert!(self.bitmap[idx], "double free of frame {:#x}", pfn);
        self.bitmap.set(idx, false);
        self.free += 1;
    }
}

struct Zones {
    normal: Zone,
    high: Zone,
}

struct FrameMeta {
    refcount: AtomicU32,
    /// Slab size-class this frame backs, if any (used by the heap to
    /// classify pointers on deallocation).
    slab_class: AtomicU32,
}

static ZONES: Once<SpinLock<Zones>> = Once::new();
static META: Once<Box<[FrameMeta]>> = Once::new();
static DIRECT_MAP_BASE: Once<Vaddr> = Once::new();
static RECLAIM_HOOK: Once<fn() -> usize> = Once::new();

pub(super) fn init(direct_map_base: Vaddr, nframes: usize, high_start_pfn: usize) {
    assert!(high_start_pfn <= nframes);
    DIRECT_MAP_BASE.call_once(|| direct_map_base);
    META.call_once(|| {
        (0..nframes)
            .map(|_| FrameMeta {
                refcount: AtomicU32::new(0),
                slab_class: AtomicU32::new(u32::MAX),
            })
            .collect::<Vec<_>>()
            .into_boxed_slice()
    });
    ZONES.call_once(|| {
        SpinLock::new(Zones {
            normal: Zone::new(0, high_start_pfn),
            high: Zone::new(high_start_pfn, nframes - high_start_pfn),
        })
    });
}

pub(super) fn set_reclaim_hook(hook: fn() -> usize) {
    RECLAIM_HOOK.call_once(|| hook);
}

fn meta(pfn: usize) -> &'static FrameMeta {
    &META.get().expect("frame allocator not initialized")[pfn]
}

pub(crate) fn direct_map_base() -> Vaddr {
    *DIRECT_MAP_BASE.get().expect("frame allocator not initialized")
}

/// Count of free frames across both zones.
pub fn free_frames() -> usize {
    let zones = ZONES.get().unwrap().lock_irq_disabled();
    zones.normal.free + zones.high.free
}

/// Total managed frames.
pub fn total_frames() -> usize {
    META.get().map_or(0, |m| m.len())
}

/// A refcounted handle to one physical 4 KiB frame.
///
/// Handles clone by bumping the per-frame reference count; the frame
/// returns to its zone's free pool when the count reaches zero. A frame
/// with outstanding handles is never handed out again.
#[derive(Debug)]
pub struct Frame {
    pfn: usize,
}

impl Frame {
    pub fn alloc(zone: ZoneId) -> Result<Frame> {
        Self::alloc_inner(zone, false)
    }

    pub fn alloc_zeroed(zone: ZoneId) -> Result<Frame> {
        Self::alloc_inner(zone, true)
    }

    fn alloc_inner(zone: ZoneId, zeroed: bool) -> Result<Frame> {
        let pfn = match try_alloc_pfn(zone) {
            Some(pfn) => pfn,
            None => {
                // One best-effort page-cache trim before giving up.
                if let Some(hook) = RECLAIM_HOOK.get() {
                    hook();
                }
                try_alloc_pfn(zone)
                    .ok_or(Error::with_message(Errno::ENOMEM, "out of physical memory"))?
            }
        };
        let old = meta(pfn).refcount.swap(1, Ordering::Relaxed);
        debug_assert_eq!(old, 0);
        let frame = Frame { pfn };
        if zeroed {
            frame.fill_zero();
        }
        Ok(frame)
    }

    /// Allocate `1 << order` physically contiguous normal-zone frames.
    pub fn alloc_contiguous(order: usize) -> Result<Vec<Frame>> {
        let count = 1usize << order;
        let first = {
            let mut zones = ZONES.get().unwrap().lock_irq_disabled();
            zones.normal.alloc_run(count)
        }
        .ok_or(Error::with_message(
            Errno::ENOMEM,
            "no contiguous frame run",
        ))?;
        let mut frames = Vec::with_capacity(count);
        for pfn in first..first + count {
            meta(pfn).refcount.store(1, Ordering::Relaxed);
            frames.push(Frame { pfn });
        }
        Ok(frames)
    }

    pub fn pfn(&self) -> usize {
        self.pfn
    }

    pub fn paddr(&self) -> Paddr {
        self.pfn * PAGE_SIZE
    }

    pub fn zone(&self) -> ZoneId {
        let zones = ZONES.get().unwrap().lock_irq_disabled();
        if zones.normal.contains(self.pfn) {
            ZoneId::Normal
        } else {
            ZoneId::High
        }
    }

    pub fn ref_count(&self) -> u32 {
        meta(self.pfn).refcount.load(Ordering::Relaxed)
    }

    pub fn as_ptr(&self) -> *mut u8 {
        (direct_map_base() + self.paddr()) as *mut u8
    }

    pub fn read_bytes(&self, offset: usize, buf: &mut [u8]) {
        assert!(offset + buf.len() <= PAGE_SIZE);
        // SAFETY: the range stays inside this frame.
        unsafe {
            core::ptr::copy_nonoverlapping(self.as_ptr().add(offset), buf.as_mut_ptr(), buf.len());
        }
    }

    pub fn write_bytes(&self, offset: usize, buf: &[u8]) {
        assert!(offset + buf.len() <= PAGE_SIZE);
        // SAFETY: the range stays inside this frame.
        unsafe {
            core::ptr::copy_nonoverlapping(buf.as_ptr(), self.as_ptr().add(offset), buf.len());
        }
    }

    pub fn fill_zero(&self) {
        // SAFETY: writes exactly one whole frame.
        unsafe {
            core::ptr::write_bytes(self.as_ptr(), 0, PAGE_SIZE);
        }
    }

    /// Physical-to-physical copy of a whole frame.
    pub fn copy_from(&self, src: &Frame) {
        // SAFETY: distinct frames, both fully owned by the callers.
        unsafe {
            core::ptr::copy_nonoverlapping(src.as_ptr(), self.as_ptr(), PAGE_SIZE);
        }
    }

    pub(super) fn set_slab_class(&self, class: u32) {
        meta(self.pfn).slab_class.store(class, Ordering::Relaxed);
    }

    pub(super) fn slab_class_of(pfn: usize) -> u32 {
        meta(pfn).slab_class.load(Ordering::Relaxed)
    }

    /// Leak this handle's reference, returning the bare pfn. Paired
    /// with [`Frame::from_raw_pfn`]; used by the page tables, which
    /// keep frame ownership inside hardware entries.
    pub fn into_raw_pfn(self) -> usize {
        let pfn = self.pfn;
        core::mem::forget(self);
        pfn
    }

    /// Reconstruct a handle from a pfn previously produced by
    /// [`Frame::into_raw_pfn`]. Does not change the reference count.
    ///
    /// # Safety
    ///
    /// The pfn must carry a leaked reference.
    pub unsafe fn from_raw_pfn(pfn: usize) -> Frame {
        debug_assert!(meta(pfn).refcount.load(Ordering::Relaxed) > 0);
        Frame { pfn }
    }
}

fn try_alloc_pfn(zone: ZoneId) -> Option<usize> {
    let mut zones = ZONES.get().unwrap().lock_irq_disabled();
    match zone {
        ZoneId::Normal => zones.normal.alloc_one(),
        // High requests fall back to the normal zone when exhausted.
        ZoneId::High => zones.high.alloc_one().or_else(|| zones.normal.alloc_one()),
    }
}

impl Clone for Frame {
    fn clone(&self) -> Self {
        let old = meta(self.pfn).refcount.fetch_add(1, Ordering::Relaxed);
        debug_assert!(old > 0);
        Frame { pfn: self.pfn }
    }
}

impl Drop for Frame {
    fn drop(&mut self) {
        if meta(self.pfn).refcount.fetch_sub(1, Ordering::Release) != 1 {
            return;
        }
        meta(self.pfn).slab_class.store(u32::MAX, Ordering::Relaxed);
        let mut zones = ZONES.get().unwrap().lock_irq_disabled();
        if zones.normal.contains(self.pfn) {
            zones.normal.free_one(self.pfn);
        } else {
            zones.high.free_one(self.pfn);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mm::test_util::ensure_mm_init;

    #[test]
    fn alloc_free_roundtrip() {
        let _guard = crate::mm::test_util::serialize_test();
        let before = free_frames();
        let frame = Frame::alloc(ZoneId::Normal).unwrap();
        assert_eq!(frame.ref_count(), 1);
        assert_eq!(free_frames(), before - 1);
        drop(frame);
        assert_eq!(free_frames(), before);
    }

    #[test]
    fn clone_tracks_refcount() {
        ensure_mm_init();
        let frame = Frame::alloc(ZoneId::Normal).unwrap();
        let dup = frame.clone();
        assert_eq!(frame.ref_count(), 2);
        drop(dup);
        assert_eq!(frame.ref_count(), 1);
    }

    #[test]
    fn zeroed_frames_are_zero() {
        ensure_mm_init();
        let frame = Frame::alloc_zeroed(ZoneId::Normal).unwrap();
        let mut buf = [0xffu8; 64];
        frame.read_bytes(1000, &mut buf);
        assert!(buf.iter().all(|&b| b == 0));
    }

    #[test]
    fn contiguous_run_is_contiguous() {
        ensure_mm_init();
        let frames = Frame::alloc_contiguous(2).unwrap();
        assert_eq!(frames.len(), 4);
        for pair in frames.windows(2) {
            assert_eq!(pair[0].pfn() + 1, pair[1].pfn());
        }
    }

    #[test]
    fn frame_data_roundtrip() {
        ensure_mm_init();
        let frame = Frame::alloc(ZoneId::Normal).unwrap();
        frame.write_bytes(12, b"ferrite");
        let mut buf = [0u8; 7];
        frame.read_bytes(12, &mut buf);
        assert_eq!(&buf, b"ferrite");
    }
}
