//! The Ferrite kernel: a small self-hosted UNIX-like core for 32-bit
//! x86.
//!
//! The crate is the machine-independent runtime: memory management,
//! processes and signals, the VFS and its filesystems, TTY/console,
//! and the TCP/IP stack. The boot path, interrupt stubs, the context
//! switch and chipset drivers live outside and talk to this crate
//! through `arch` hooks and driver registrations.

#![no_std]
#![allow(clippy::too_many_arguments)]

extern crate alloc;
#[cfg(test)]
#[macro_use]
extern crate std;

#[macro_use]
pub mod error;
#[macro_use]
pub mod prelude;

pub mod arch;
pub mod device;
pub mod events;
pub mod fs;
pub mod ipc;
pub mod kcmdline;
pub mod logger;
pub mod mm;
pub mod net;
pub mod process;
pub mod sched;
pub mod sync;
pub mod syscall;
pub mod time;
pub mod trap;
pub mod util;

use prelude::*;

/// Bring up the machine-independent subsystems. The boot glue has
/// already initialized memory (`mm::init`), seeded the wall clock and
/// attached a display; the first user task follows via
/// [`spawn_init_process`].
pub fn init(cmdline: &str) {
    let args = kcmdline::KCmdlineArg::parse(cmdline);
    logger::init(args.loglevel());
    util::random::seed(time::jiffies() ^ 0x5fe7_15e1);
    fs::init();
    net::init();
    info!("ferrite core initialized");
}

/// Mount the boot filesystems: the supplied root plus the standard
/// `/dev`, `/tmp`, `/proc` and `/dev/pts` trees, then register the
/// built-in devices.
pub fn init_rootfs(root_fs: Arc<dyn fs::utils::FileSystem>) -> Result<()> {
    fs::rootfs::init(root_fs);
    fs::rootfs::mount_std_trees()?;
    let resolver = fs::fs_resolver::FsResolver::new_with_root(fs::rootfs::root_path());
    device::init(&resolver)?;
    Ok(())
}

/// Create pid 1 from an on-disk executable and make it runnable.
pub fn spawn_init_process(path: &str) -> Result<Arc<process::Process>> {
    use alloc::ffi::CString;

    let resolver = fs::fs_resolver::FsResolver::new_with_root(fs::rootfs::root_path());
    let argv = vec![CString::new(path)?];
    let envp = vec![CString::new("HOME=/")?, CString::new("TERM=linux")?];
    let loaded = process::program_loader::load_program(&resolver, path, argv, envp)?;

    let mut ctx = arch::UserContext::default();
    ctx.set_instruction_pointer(loaded.entry as u32);
    ctx.set_stack_pointer(loaded.user_sp as u32);

    let init = process::ProcessBuilder::new("init")
        .executable_path(path)
        .vm(loaded.vm)
        .fs(Arc::new(sync::RwLock::new(resolver)))
        .user_ctx(ctx)
        .build()?;
    sched::enqueue(&init);
    Ok(init)
}
