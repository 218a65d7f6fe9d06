pub mod context;

/// Halt the CPU until the next interrupt. Fallback spins so the core
/// builds off-target.
#[inline]
pub fn halt() {
    #[cfg(target_arch = "x86")]
    // SAFETY: hlt waits for an interrupt, nothing else.
    unsafe {
        core::arch::asm!("hlt", options(nomem, nostack, preserves_flags));
    }
    #[cfg(not(target_arch = "x86"))]
    core::hint::spin_loop();
}
