//! Architecture facade.
//!
//! The real mode-switch and chipset glue (GDT/IDT/TSS setup, interrupt
//! entry stubs, the context-switch primitive, port I/O) lives outside
//! this crate; everything here is either plain data shared with that
//! glue or a hook with a portable fallback so the core stays
//! host-buildable.

pub mod irq;
pub mod x86;

pub use x86::context::UserContext;

/// Flush the TLB entry for one page.
#[inline]
pub fn flush_tlb_addr(vaddr: crate::mm::Vaddr) {
    cfg_if::cfg_if! {
        if #[cfg(target_arch = "x86")] {
            // SAFETY: invlpg has no side effect beyond dropping a TLB
            // entry.
            unsafe {
                core::arch::asm!(
                    "invlpg [{}]",
                    in(reg) vaddr,
                    options(nostack, preserves_flags)
                );
            }
        } else {
            let _ = vaddr;
        }
    }
}

/// Flush the whole TLB (page directory switch does this implicitly on
/// real hardware; explicit hook for bulk unmaps).
#[inline]
pub fn flush_tlb_all() {
    #[cfg(target_arch = "x86")]
    // SAFETY: reloading cr3 only flushes non-global TLB entries.
    unsafe {
        core::arch::asm!(
            "mov {tmp}, cr3",
            "mov cr3, {tmp}",
            tmp = out(reg) _,
            options(nostack, preserves_flags)
        );
    }
}

/// Spin-hint for busy waits.
#[inline]
pub fn cpu_relax() {
    core::hint::spin_loop();
}
