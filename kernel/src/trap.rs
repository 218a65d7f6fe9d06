//! Entry points the interrupt stubs call after saving state.

use crate::{
    arch::UserContext,
    prelude::*,
    process::signal::{constants::SIGSEGV, signals::fault::FaultSignal},
};

/// `int 0x80` from user mode.
pub fn syscall_entry(ctx: &mut UserContext) {
    crate::syscall::account_syscall();
    crate::syscall::handle_syscall(ctx);
}

/// Page fault with a user-mode saved frame. Demand paging first;
/// a bad access raises SIGSEGV on the current task.
pub fn page_fault_entry(ctx: &mut UserContext, fault_addr: Vaddr, is_write: bool) {
    let current = current!();
    let handled = current
        .vm()
        .map(|vm| vm.handle_page_fault(fault_addr, is_write))
        .unwrap_or(Err(Error::new(Errno::EFAULT)));
    match handled {
        Ok(()) => current.rusage().count_minor_fault(),
        Err(_) => {
            current.enqueue_signal(Box::new(FaultSignal::new(SIGSEGV, fault_addr)));
        }
    }
    let _ = crate::process::signal::handle_pending_signal(ctx, None);
}

/// Timer interrupt (PIT), also the retransmit/itimer heartbeat.
pub fn timer_interrupt() {
    crate::time::tick();
    if let Some(current) = crate::process::current_opt() {
        current.rusage().charge_user_tick();
    }
}

/// Keyboard interrupt: the controller glue passes the raw scan code.
pub fn keyboard_interrupt(scancode: u8) {
    crate::device::keyboard::handle_scancode(scancode);
}
