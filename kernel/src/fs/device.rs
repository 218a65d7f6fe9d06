//! Device numbering and the major/minor driver registries.

use crate::{
    events::{IoEvents, Poller},
    fs::file_handle::FileLike,
    prelude::*,
};

// Character majors.
pub const MEM_MAJOR: u32 = 1;
pub const TTY_MAJOR: u32 = 4;
pub const TTYAUX_MAJOR: u32 = 5;
pub const PTY_MASTER_MAJOR: u32 = 128;
pub const PTY_SLAVE_MAJOR: u32 = 136;

// Block majors.
pub const RAMDISK_MAJOR: u32 = 1;
pub const ATA_MAJOR: u32 = 3;
pub const LOOP_MAJOR: u32 = 7;

/// Packed major:minor device number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct DeviceId {
    major: u32,
    minor: u32,
}

impl DeviceId {
    pub const fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }

    pub const fn major(&self) -> u32 {
        self.major
    }

    pub const fn minor(&self) -> u32 {
        self.minor
    }

    /// The classic 8:8 encoding stored in on-disk inodes.
    pub const fn as_encoded(&self) -> u64 {
        ((self.major as u64) << 8) | (self.minor as u64 & 0xff)
    }

    pub const fn from_encoded(raw: u64) -> Self {
        Self {
            major: ((raw >> 8) & 0xfff) as u32,
            minor: (raw & 0xff) as u32,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceType {
    CharDevice,
    BlockDevice,
}

/// A character device behind a `/dev` node.
pub trait Device: Send + Sync {
    fn type_(&self) -> DeviceType;

    fn id(&self) -> DeviceId;

    fn read(&self, buf: &mut [u8]) -> Result<usize>;

    fn write(&self, buf: &[u8]) -> Result<usize>;

    fn poll(&self, mask: IoEvents, _poller: Option<&Poller>) -> IoEvents {
        (IoEvents::IN | IoEvents::OUT) & mask
    }

    fn ioctl(&self, _cmd: u32, _arg: usize) -> Result<i32> {
        return_errno!(Errno::ENOIOCTLCMD)
    }

    /// Drivers returning `Some` substitute their own file description
    /// for the plain inode handle (the TTY does, for job control).
    fn open(&self) -> Result<Option<Arc<dyn FileLike>>> {
        Ok(None)
    }

    /// Called when the last file description drops.
    fn release(&self) {}
}

/// One I/O request against a block device; `block` is in units of
/// the buffer's own size.
pub enum BlockRequest<'a> {
    Read {
        block: u32,
        buf: &'a mut [u8],
    },
    Write {
        block: u32,
        buf: &'a [u8],
    },
}

/// A block device driver. Requests complete synchronously from the
/// driver's point of view (PIO-style); the buffer cache layers the
/// waiting on top.
pub trait BlockDevice: Send + Sync {
    fn id(&self) -> DeviceId;

    /// Device capacity in bytes.
    fn capacity(&self) -> usize;

    fn queue_request(&self, req: BlockRequest) -> Result<()>;
}

lazy_static! {
    static ref CHAR_DEVICES: SpinLock<BTreeMap<(u32, u32), Arc<dyn Device>>> =
        SpinLock::new(BTreeMap::new());
    static ref BLOCK_DEVICES: SpinLock<BTreeMap<(u32, u32), Arc<dyn BlockDevice>>> =
        SpinLock::new(BTreeMap::new());
}

pub fn register_char(device: Arc<dyn Device>) {
    let id = device.id();
    CHAR_DEVICES
        .lock_irq_disabled()
        .insert((id.major(), id.minor()), device);
}

pub fn unregister_char(id: DeviceId) {
    CHAR_DEVICES
        .lock_irq_disabled()
        .remove(&(id.major(), id.minor()));
}

pub fn lookup_char(id: DeviceId) -> Result<Arc<dyn Device>> {
    CHAR_DEVICES
        .lock_irq_disabled()
        .get(&(id.major(), id.minor()))
        .cloned()
        .ok_or(Error::with_message(Errno::ENXIO, "no such character device"))
}

pub fn register_block(device: Arc<dyn BlockDevice>) {
    let id = device.id();
    BLOCK_DEVICES
        .lock_irq_disabled()
        .insert((id.major(), id.minor()), device);
}

pub fn unregister_block(id: DeviceId) {
    BLOCK_DEVICES
        .lock_irq_disabled()
        .remove(&(id.major(), id.minor()));
}

pub fn lookup_block(id: DeviceId) -> Result<Arc<dyn BlockDevice>> {
    BLOCK_DEVICES
        .lock_irq_disabled()
        .get(&(id.major(), id.minor()))
        .cloned()
        .ok_or(Error::with_message(Errno::ENXIO, "no such block device"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_id_encoding_roundtrip() {
        let id = DeviceId::new(4, 64);
        assert_eq!(id.as_encoded(), (4 << 8) | 64);
        assert_eq!(DeviceId::from_encoded(id.as_encoded()), id);
    }
}
