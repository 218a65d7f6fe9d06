//! Kernel slab heap.
//!
//! Small objects come from per-size-class free lists threaded through
//! the free chunks themselves; each class grows one frame at a time.
//! Allocations above the largest class take whole contiguous frames.
//! The boot crate registers [`SlabAllocator`] as the global allocator.

use core::{
    alloc::{GlobalAlloc, Layout},
    ptr,
};

use super::{
    frame::{Frame, ZoneId},
    PAGE_SHIFT, PAGE_SIZE,
};
use crate::sync::SpinLock;

const CLASS_SIZES: [usize; 8] = [16, 32, 64, 128, 256, 512, 1024, 2048];

struct FreeList {
    head: *mut usize,
    /// Frames carved for this class; kept only for accounting.
    frames: usize,
}

// Raw pointers guarded by the class lock.
unsafe impl Send for FreeList {}

pub struct SlabAllocator {
    classes: [SpinLock<FreeList>; CLASS_SIZES.len()],
}

impl SlabAllocator {
    pub const fn new() -> Self {
        #[allow(clippy::declare_interior_mutable_const)]
        const EMPTY: SpinLock<FreeList> = SpinLock::new(FreeList {
            head: ptr::null_mut(),
            frames: 0,
        });
        Self {
            classes: [EMPTY; CLASS_SIZES.len()],
        }
    }

    fn class_of(layout: Layout) -> Option<usize> {
        let need = layout.size().max(layout.align());
        CLASS_SIZES.iter().position(|&size| size >= need)
    }

    pub fn allocate(&self, layout: Layout) -> *mut u8 {
        let Some(class) = Self::class_of(layout) else {
            return self.allocate_large(layout);
        };
        let chunk = CLASS_SIZES[class];
        let mut list = self.classes[class].lock_irq_disabled();
        if list.head.is_null() {
            let Ok(frame) = Frame::alloc(ZoneId::Normal) else {
                return ptr::null_mut();
            };
            frame.set_slab_class(class as u32);
            let base = frame.as_ptr();
            // Thread every chunk of the new frame onto the free list.
            for offset in (0..PAGE_SIZE).step_by(chunk).rev() {
                // SAFETY: chunk-aligned slots inside the fresh frame.
                unsafe {
                    let slot = base.add(offset) as *mut usize;
                    *slot = list.head as usize;
                    list.head = slot;
                }
            }
            list.frames += 1;
            // The frame now lives forever inside the slab.
            let _ = frame.into_raw_pfn();
        }
        let slot = list.head;
        // SAFETY: slot is a live free chunk; its first word links onward.
        unsafe {
            list.head = (*slot) as *mut usize;
        }
        slot as *mut u8
    }

    pub fn deallocate(&self, ptr_in: *mut u8, layout: Layout) {
        let Some(class) = Self::class_of(layout) else {
            self.deallocate_large(ptr_in, layout);
            return;
        };
        let mut list = self.classes[class].lock_irq_disabled();
        // SAFETY: the chunk returns to its class's free list.
        unsafe {
            let slot = ptr_in as *mut usize;
            *slot = list.head as usize;
            list.head = slot;
        }
    }

    fn allocate_large(&self, layout: Layout) -> *mut u8 {
        let pages = layout.size().div_ceil(PAGE_SIZE);
        let order = pages.next_power_of_two().trailing_zeros() as usize;
        match Frame::alloc_contiguous(order) {
            Ok(frames) => {
                let base = frames[0].as_ptr();
                for frame in frames {
                    let _ = frame.into_raw_pfn();
                }
                base
            }
            Err(_) => ptr::null_mut(),
        }
    }

    fn deallocate_large(&self, ptr_in: *mut u8, layout: Layout) {
        let pages = layout.size().div_ceil(PAGE_SIZE);
        let count = pages.next_power_of_two();
        let base_pfn = self.pfn_of(ptr_in);
        for pfn in base_pfn..base_pfn + count {
            // SAFETY: allocate_large leaked one reference per frame.
            drop(unsafe { Frame::from_raw_pfn(pfn) });
        }
    }

    fn pfn_of(&self, ptr_in: *mut u8) -> usize {
        (ptr_in as usize - super::frame::direct_map_base()) >> PAGE_SHIFT
    }
}

unsafe impl GlobalAlloc for SlabAllocator {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        self.allocate(layout)
    }

    unsafe fn dealloc(&self, ptr_in: *mut u8, layout: Layout) {
        self.deallocate(ptr_in, layout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mm::test_util::ensure_mm_init;

    #[test]
    fn small_allocations_recycle() {
        ensure_mm_init();
        let slab = SlabAllocator::new();
        let layout = Layout::from_size_align(48, 8).unwrap();
        let a = slab.allocate(layout);
        assert!(!a.is_null());
        slab.deallocate(a, layout);
        let b = slab.allocate(layout);
        // LIFO free list hands the same chunk back.
        assert_eq!(a, b);
        slab.deallocate(b, layout);
    }

    #[test]
    fn distinct_chunks_do_not_alias() {
        ensure_mm_init();
        let slab = SlabAllocator::new();
        let layout = Layout::from_size_align(64, 8).unwrap();
        let a = slab.allocate(layout);
        let b = slab.allocate(layout);
        assert_ne!(a, b);
        // SAFETY: both chunks are live and 64 bytes long.
        unsafe {
            core::ptr::write_bytes(a, 0xaa, 64);
            core::ptr::write_bytes(b, 0x55, 64);
            assert_eq!(*a, 0xaa);
            assert_eq!(*b, 0x55);
        }
        slab.deallocate(a, layout);
        slab.deallocate(b, layout);
    }

    #[test]
    fn large_allocation_takes_whole_frames() {
        let _guard = crate::mm::test_util::serialize_test();
        let slab = SlabAllocator::new();
        let layout = Layout::from_size_align(3 * PAGE_SIZE, PAGE_SIZE).unwrap();
        let before = crate::mm::frame::free_frames();
        let p = slab.allocate(layout);
        assert!(!p.is_null());
        assert_eq!(p as usize & (PAGE_SIZE - 1), 0);
        slab.deallocate(p, layout);
        assert_eq!(crate::mm::frame::free_frames(), before);
    }
}
