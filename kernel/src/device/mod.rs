//! Drivers and device-node wiring.

pub mod console;
pub mod keyboard;
pub mod loopdev;
pub mod mem;
pub mod pty;
pub mod ramdisk;
pub mod tty;

use crate::{
    fs::{
        device::{self, DeviceId, LOOP_MAJOR, MEM_MAJOR, RAMDISK_MAJOR, TTYAUX_MAJOR, TTY_MAJOR},
        fs_resolver::{FsPath, FsResolver},
        utils::{InodeMode, InodeType},
    },
    prelude::*,
};

/// Register the built-in devices and populate `/dev`. Runs after the
/// root filesystem is mounted; the VT layer must already be up so the
/// console nodes resolve.
pub fn init(resolver: &FsResolver) -> Result<()> {
    device::register_char(Arc::new(mem::Null));
    device::register_char(Arc::new(mem::Zero));
    device::register_char(Arc::new(mem::Random));
    device::register_char(Arc::new(pty::Ptmx));

    let dev_dir = resolver.lookup(&FsPath::new(crate::fs::fs_resolver::AT_FDCWD, "/dev")?)?;
    let chr = |name: &str, id: DeviceId, mode: u16| -> Result<()> {
        match dev_dir.mknod(
            name,
            InodeType::CharDevice,
            InodeMode::from_bits_truncate(mode),
            id,
        ) {
            Ok(_) => Ok(()),
            Err(err) if err.error() == Errno::EEXIST => Ok(()),
            Err(err) => Err(err),
        }
    };
    chr("null", DeviceId::new(MEM_MAJOR, 3), 0o666)?;
    chr("zero", DeviceId::new(MEM_MAJOR, 5), 0o666)?;
    chr("random", DeviceId::new(MEM_MAJOR, 8), 0o666)?;
    chr("urandom", DeviceId::new(MEM_MAJOR, 8), 0o666)?;
    chr("ptmx", DeviceId::new(TTYAUX_MAJOR, 2), 0o666)?;
    for index in 1..=console::vt::NR_CONSOLES as u32 {
        chr(
            &alloc::format!("tty{}", index),
            DeviceId::new(TTY_MAJOR, index),
            0o620,
        )?;
    }
    // The console alias points at the first VT.
    chr("console", DeviceId::new(TTY_MAJOR, 1), 0o600)?;

    let blk = |name: &str, id: DeviceId, mode: u16| -> Result<()> {
        match dev_dir.mknod(
            name,
            InodeType::BlockDevice,
            InodeMode::from_bits_truncate(mode),
            id,
        ) {
            Ok(_) => Ok(()),
            Err(err) if err.error() == Errno::EEXIST => Ok(()),
            Err(err) => Err(err),
        }
    };
    for minor in 0..2u32 {
        let id = DeviceId::new(LOOP_MAJOR, minor);
        device::register_block(Arc::new(loopdev::LoopDevice::new(id)));
        blk(&alloc::format!("loop{}", minor), id, 0o660)?;
    }
    blk("ram0", DeviceId::new(RAMDISK_MAJOR, 0), 0o660)?;
    Ok(())
}
