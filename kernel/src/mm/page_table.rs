//! Two-level x86 page tables.
//!
//! Every address space shares the kernel half by aliasing the kernel
//! page directory's second-level tables; the user half is private.
//! Entries own one reference on the frame they map: `map` consumes the
//! handle, `unmap` gives it back.

use spin::Once;

use super::{
    frame::{Frame, ZoneId},
    Paddr, Vaddr, KERNEL_BASE, PAGE_SHIFT, PAGE_SIZE,
};
use crate::prelude::*;

const ENTRIES: usize = 1024;
const PDE_SHIFT: usize = 22;
/// First page-directory slot of the kernel half.
pub const KERNEL_PDE_INDEX: usize = KERNEL_BASE >> PDE_SHIFT;

bitflags! {
    pub struct PtFlags: u32 {
        const PRESENT  = 1 << 0;
        const WRITABLE = 1 << 1;
        const USER     = 1 << 2;
        const ACCESSED = 1 << 5;
        const DIRTY    = 1 << 6;
        const GLOBAL   = 1 << 8;
    }
}

const FLAGS_MASK: u32 = 0xfff;

static KERNEL_PGD: Once<Frame> = Once::new();

/// Allocate the kernel page directory. The boot glue fills in the
/// direct-map and kernel-image entries before the first user address
/// space is created; user directories alias whatever is there.
pub(super) fn init_kernel_pgd() {
    KERNEL_PGD.call_once(|| {
        Frame::alloc_zeroed(ZoneId::Normal).expect("no memory for kernel page directory")
    });
}

pub fn kernel_pgd_paddr() -> Paddr {
    KERNEL_PGD.get().expect("kernel pgd not initialized").paddr()
}

fn entry_ptr(table: &Frame, index: usize) -> *mut u32 {
    debug_assert!(index < ENTRIES);
    // SAFETY: stays within the 4 KiB table frame.
    unsafe { (table.as_ptr() as *mut u32).add(index) }
}

fn read_entry(table: &Frame, index: usize) -> u32 {
    // SAFETY: aligned in-frame read.
    unsafe { entry_ptr(table, index).read_volatile() }
}

fn write_entry(table: &Frame, index: usize, value: u32) {
    // SAFETY: aligned in-frame write.
    unsafe { entry_ptr(table, index).write_volatile(value) }
}

const fn pde_index(va: Vaddr) -> usize {
    (va >> PDE_SHIFT) & (ENTRIES - 1)
}

const fn pte_index(va: Vaddr) -> usize {
    (va >> PAGE_SHIFT) & (ENTRIES - 1)
}

/// One process's page directory plus its privately owned second-level
/// tables for the user half.
#[derive(Debug)]
pub struct PageTable {
    pgd: Frame,
}

impl PageTable {
    /// A fresh user directory: user half empty, kernel half aliased
    /// from the kernel directory.
    pub fn new_user() -> Result<Self> {
        let pgd = Frame::alloc_zeroed(ZoneId::Normal)?;
        if let Some(kernel_pgd) = KERNEL_PGD.get() {
            for index in KERNEL_PDE_INDEX..ENTRIES {
                write_entry(&pgd, index, read_entry(kernel_pgd, index));
            }
        }
        Ok(Self { pgd })
    }

    pub fn pgd_paddr(&self) -> Paddr {
        self.pgd.paddr()
    }

    /// The second-level table covering `va`, optionally creating it.
    fn page_table_of(&self, va: Vaddr, create: bool) -> Result<Option<Frame>> {
        debug_assert!(va < KERNEL_BASE, "user walk into kernel range");
        let index = pde_index(va);
        let pde = read_entry(&self.pgd, index);
        if pde & PtFlags::PRESENT.bits() != 0 {
            let pfn = (pde >> PAGE_SHIFT) as usize;
            // SAFETY: the PDE owns a leaked reference on the table frame.
            let table = unsafe { Frame::from_raw_pfn(pfn) };
            let clone = table.clone();
            let _ = table.into_raw_pfn();
            return Ok(Some(clone));
        }
        if !create {
            return Ok(None);
        }
        let table = Frame::alloc_zeroed(ZoneId::Normal)?;
        let clone = table.clone();
        let pfn = table.into_raw_pfn();
        let flags = PtFlags::PRESENT | PtFlags::WRITABLE | PtFlags::USER;
        write_entry(&self.pgd, index, ((pfn as u32) << PAGE_SHIFT) | flags.bits());
        Ok(Some(clone))
    }

    /// Install a mapping, consuming the frame handle. Any previous
    /// mapping at `va` is dropped.
    pub fn map(&self, va: Vaddr, frame: Frame, flags: PtFlags) -> Result<()> {
        debug_assert!(super::is_page_aligned(va));
        let table = self.page_table_of(va, true)?.unwrap();
        let index = pte_index(va);
        let old = read_entry(&table, index);
        if old & PtFlags::PRESENT.bits() != 0 {
            // SAFETY: the old PTE owned a reference.
            drop(unsafe { Frame::from_raw_pfn((old >> PAGE_SHIFT) as usize) });
        }
        let pfn = frame.into_raw_pfn();
        write_entry(
            &table,
            index,
            ((pfn as u32) << PAGE_SHIFT) | (flags | PtFlags::PRESENT).bits(),
        );
        crate::arch::flush_tlb_addr(va);
        Ok(())
    }

    /// Remove the mapping at `va`, returning the frame handle that the
    /// entry owned.
    pub fn unmap(&self, va: Vaddr) -> Option<Frame> {
        let table = self.page_table_of(va, false).ok().flatten()?;
        let index = pte_index(va);
        let pte = read_entry(&table, index);
        if pte & PtFlags::PRESENT.bits() == 0 {
            return None;
        }
        write_entry(&table, index, 0);
        crate::arch::flush_tlb_addr(va);
        // SAFETY: the PTE owned a reference.
        Some(unsafe { Frame::from_raw_pfn((pte >> PAGE_SHIFT) as usize) })
    }

    /// Rewrite the protection bits of an existing mapping.
    pub fn protect(&self, va: Vaddr, flags: PtFlags) -> bool {
        let Some(table) = self.page_table_of(va, false).ok().flatten() else {
            return false;
        };
        let index = pte_index(va);
        let pte = read_entry(&table, index);
        if pte & PtFlags::PRESENT.bits() == 0 {
            return false;
        }
        write_entry(
            &table,
            index,
            (pte & !FLAGS_MASK) | (flags | PtFlags::PRESENT).bits(),
        );
        crate::arch::flush_tlb_addr(va);
        true
    }

    /// The mapping at `va`, if present.
    pub fn query(&self, va: Vaddr) -> Option<(Paddr, PtFlags)> {
        let table = self.page_table_of(va, false).ok().flatten()?;
        let pte = read_entry(&table, pte_index(va));
        if pte & PtFlags::PRESENT.bits() == 0 {
            return None;
        }
        Some((
            ((pte >> PAGE_SHIFT) as usize) * PAGE_SIZE,
            PtFlags::from_bits_truncate(pte & FLAGS_MASK),
        ))
    }

    /// A borrowed handle on the frame mapped at `va`.
    pub fn frame_at(&self, va: Vaddr) -> Option<Frame> {
        let (paddr, _) = self.query(va)?;
        // SAFETY: the PTE holds a reference; clone under it.
        let frame = unsafe { Frame::from_raw_pfn(paddr / PAGE_SIZE) };
        let clone = frame.clone();
        let _ = frame.into_raw_pfn();
        Some(clone)
    }
}

impl Drop for PageTable {
    fn drop(&mut self) {
        // Free the private user half; the kernel half aliases tables
        // owned by the kernel directory.
        for index in 0..KERNEL_PDE_INDEX {
            let pde = read_entry(&self.pgd, index);
            if pde & PtFlags::PRESENT.bits() == 0 {
                continue;
            }
            // SAFETY: the PDE owns a reference on the table frame.
            let table = unsafe { Frame::from_raw_pfn((pde >> PAGE_SHIFT) as usize) };
            for pti in 0..ENTRIES {
                let pte = read_entry(&table, pti);
                if pte & PtFlags::PRESENT.bits() != 0 {
                    // SAFETY: the PTE owns a reference.
                    drop(unsafe { Frame::from_raw_pfn((pte >> PAGE_SHIFT) as usize) });
                }
            }
            drop(table);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mm::test_util::ensure_mm_init;

    #[test]
    fn map_query_unmap() {
        ensure_mm_init();
        let pt = PageTable::new_user().unwrap();
        let frame = Frame::alloc_zeroed(ZoneId::Normal).unwrap();
        let paddr = frame.paddr();
        pt.map(0x1000, frame, PtFlags::WRITABLE | PtFlags::USER)
            .unwrap();
        let (got, flags) = pt.query(0x1000).unwrap();
        assert_eq!(got, paddr);
        assert!(flags.contains(PtFlags::WRITABLE));
        let frame = pt.unmap(0x1000).unwrap();
        assert_eq!(frame.paddr(), paddr);
        assert!(pt.query(0x1000).is_none());
    }

    #[test]
    fn protect_clears_writable() {
        ensure_mm_init();
        let pt = PageTable::new_user().unwrap();
        let frame = Frame::alloc_zeroed(ZoneId::Normal).unwrap();
        pt.map(0x2000, frame, PtFlags::WRITABLE | PtFlags::USER)
            .unwrap();
        assert!(pt.protect(0x2000, PtFlags::USER));
        let (_, flags) = pt.query(0x2000).unwrap();
        assert!(!flags.contains(PtFlags::WRITABLE));
        assert!(flags.contains(PtFlags::USER));
    }

    #[test]
    fn drop_releases_mapped_frames() {
        ensure_mm_init();
        let frame = Frame::alloc_zeroed(ZoneId::Normal).unwrap();
        let held = frame.clone();
        let pt = PageTable::new_user().unwrap();
        pt.map(0x3000, frame, PtFlags::USER).unwrap();
        assert_eq!(held.ref_count(), 2);
        drop(pt);
        assert_eq!(held.ref_count(), 1);
    }
}
