//! Memory management: physical frames, kernel slab heap, two-level
//! page tables, per-process address spaces and the file page cache.

pub mod frame;
pub mod heap;
pub mod page_cache;
pub mod page_table;
pub mod vm;

pub use frame::{Frame, ZoneId};
pub use page_table::{PageTable, PtFlags};
pub use vm::{Vm, VmPerms, Vma, VmaBacking, VmaFlags};

pub type Vaddr = usize;
pub type Paddr = usize;

pub const PAGE_SIZE: usize = 4096;
pub const PAGE_SHIFT: usize = 12;

/// Start of the kernel half of every address space.
pub const KERNEL_BASE: Vaddr = 0xc000_0000;
/// Exclusive upper bound of user addresses; the user stack grows down
/// from here.
pub const USER_TOP: Vaddr = KERNEL_BASE;
/// Default base for address-hintless `mmap`.
pub const MMAP_BASE: Vaddr = 0x4000_0000;
/// Hard cap on the main stack VMA.
pub const USER_STACK_LIMIT: usize = 8 * 1024 * 1024;

pub const fn page_align_down(addr: usize) -> usize {
    addr & !(PAGE_SIZE - 1)
}

pub const fn page_align_up(addr: usize) -> usize {
    (addr + PAGE_SIZE - 1) & !(PAGE_SIZE - 1)
}

pub const fn is_page_aligned(addr: usize) -> bool {
    addr & (PAGE_SIZE - 1) == 0
}

/// Bring up the memory subsystem over one physical region.
///
/// `direct_map_base` is the virtual address at which physical page 0 is
/// (or is modeled as) mapped; frames at `high_start_pfn` and above form
/// the high zone, which must be mapped before access on real hardware.
pub fn init(direct_map_base: Vaddr, nframes: usize, high_start_pfn: usize) {
    frame::init(direct_map_base, nframes, high_start_pfn);
    frame::set_reclaim_hook(page_cache::shrink_caches);
    page_table::init_kernel_pgd();
}

#[cfg(test)]
pub(crate) mod test_util {
    use alloc::{boxed::Box, vec};

    use spin::{Mutex, MutexGuard, Once};

    /// 16 MiB of fake RAM shared by the whole test process; the last
    /// quarter is the high zone.
    const TEST_FRAMES: usize = 4096;

    static TEST_MEM: Once<()> = Once::new();
    static SERIAL: Mutex<()> = Mutex::new(());

    /// Initialize the shared test memory exactly once.
    pub(crate) fn ensure_mm_init() {
        TEST_MEM.call_once(|| {
            let region = Box::leak(vec![0u8; TEST_FRAMES * super::PAGE_SIZE].into_boxed_slice());
            super::init(
                region.as_mut_ptr() as usize,
                TEST_FRAMES,
                TEST_FRAMES - TEST_FRAMES / 4,
            );
        });
    }

    /// Serialize tests that poke process-wide singletons (current task,
    /// device registries, network stack).
    pub(crate) fn serialize_test() -> MutexGuard<'static, ()> {
        ensure_mm_init();
        SERIAL.lock()
    }
}
