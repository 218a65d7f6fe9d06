//! Pseudo-terminal pairs.
//!
//! Opening `/dev/ptmx` creates a master/slave pair with their `link`
//! fields cross-referenced. Bytes written to the master land directly
//! in the slave's cooked queue (the slave's line discipline is not
//! consulted); everything the slave outputs, echo included, shows
//! up on the master's read side. The slave registers as
//! `/dev/pts/<n>` until the master closes.

use core::sync::atomic::{AtomicU32, Ordering};

use crate::{
    device::tty::{Tty, TtyDriver},
    events::{IoEvents, Pollee, Poller},
    fs::{
        device::{self, Device, DeviceId, DeviceType, PTY_SLAVE_MAJOR, TTYAUX_MAJOR},
        file_handle::FileLike,
        utils::{AccessMode, InodeMode, InodeType, Metadata, StatusFlags},
    },
    prelude::*,
    util::ring_buffer::RingBuffer,
};

const MASTER_BUFFER: usize = 4096;
pub const TIOCGPTN: u32 = 0x8004_5430;

static NEXT_PTS: AtomicU32 = AtomicU32::new(0);

lazy_static! {
    static ref SLAVES: SpinLock<BTreeMap<u32, Arc<Tty>>> = SpinLock::new(BTreeMap::new());
}

pub fn slave_exists(index: u32) -> bool {
    SLAVES.lock().contains_key(&index)
}

pub fn registered_slaves() -> Vec<u32> {
    SLAVES.lock().keys().copied().collect()
}

pub fn slave_tty(index: u32) -> Option<Arc<Tty>> {
    SLAVES.lock().get(&index).cloned()
}

/// Allocate a connected pair; the slave is registered under
/// `/dev/pts/<index>` until the master drops.
pub fn new_pair() -> Result<(Arc<PtyMaster>, Arc<Tty>)> {
    let index = NEXT_PTS.fetch_add(1, Ordering::Relaxed);
    let slave = Tty::new(
        index,
        &alloc::format!("pts/{}", index),
        DeviceId::new(PTY_SLAVE_MAJOR, index),
    );
    let master = Arc::new_cyclic(|this| PtyMaster {
        index,
        slave: slave.clone(),
        buffer: SpinLock::new(RingBuffer::new(MASTER_BUFFER)),
        pollee: Pollee::new(IoEvents::OUT),
        status_flags: AtomicU32::new(0),
        this: this.clone(),
    });
    slave.set_driver(Arc::new(SlaveDriver {
        master: Arc::downgrade(&master),
    }));
    SLAVES.lock().insert(index, slave.clone());
    device::register_char(slave.clone() as Arc<dyn Device>);
    Ok((master, slave))
}

/// Slave output lands in the master's read buffer.
struct SlaveDriver {
    master: Weak<PtyMaster>,
}

impl TtyDriver for SlaveDriver {
    fn output(&self, buf: &[u8]) -> Result<usize> {
        let Some(master) = self.master.upgrade() else {
            return_errno_with_message!(Errno::EIO, "pty master is gone");
        };
        master.push_from_slave(buf);
        Ok(buf.len())
    }
}

pub struct PtyMaster {
    index: u32,
    slave: Arc<Tty>,
    buffer: SpinLock<RingBuffer<u8>>,
    pollee: Pollee,
    status_flags: AtomicU32,
    this: Weak<PtyMaster>,
}

impl PtyMaster {
    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn slave(&self) -> &Arc<Tty> {
        &self.slave
    }

    fn push_from_slave(&self, buf: &[u8]) {
        let mut ring = self.buffer.lock_irq_disabled();
        for &b in buf {
            ring.push_overwrite(b);
        }
        drop(ring);
        self.pollee.add_events(IoEvents::IN);
    }
}

impl FileLike for PtyMaster {
    fn read(&self, buf: &mut [u8]) -> Result<usize> {
        loop {
            {
                let mut ring = self.buffer.lock_irq_disabled();
                if !ring.is_empty() {
                    let read = ring.pop_slice(buf);
                    drop(ring);
                    if self.buffer.lock_irq_disabled().is_empty() {
                        self.pollee.del_events(IoEvents::IN);
                    }
                    return Ok(read);
                }
            }
            if self.status_flags().contains(StatusFlags::O_NONBLOCK) {
                return_errno!(Errno::EAGAIN);
            }
            let poller = Poller::new();
            if self.pollee.poll(IoEvents::IN, Some(&poller)).is_empty() {
                poller.wait()?;
            }
        }
    }

    fn write(&self, buf: &[u8]) -> Result<usize> {
        // Straight into the slave's cooked queue; its line discipline
        // is bypassed on this path.
        self.slave.ldisc().push_cooked(buf);
        Ok(buf.len())
    }

    fn ioctl(&self, cmd: u32, arg: usize) -> Result<i32> {
        if cmd == TIOCGPTN {
            let vm = current!().vm().ok_or(Error::new(Errno::EFAULT))?;
            vm.write_val(arg, &self.index)?;
            return Ok(0);
        }
        // Everything termios-shaped acts on the slave.
        self.slave.ioctl(cmd, arg)
    }

    fn metadata(&self) -> Metadata {
        Metadata::new_device(
            0,
            InodeType::CharDevice,
            InodeMode::from_bits_truncate(0o666),
            DeviceId::new(TTYAUX_MAJOR, 2).as_encoded(),
        )
    }

    fn poll(&self, mask: IoEvents, poller: Option<&Poller>) -> IoEvents {
        self.pollee.poll(mask, poller)
    }

    fn status_flags(&self) -> StatusFlags {
        StatusFlags::from_bits_truncate(self.status_flags.load(Ordering::Relaxed))
    }

    fn set_status_flags(&self, new_flags: StatusFlags) -> Result<()> {
        self.status_flags.store(new_flags.bits(), Ordering::Relaxed);
        Ok(())
    }

    fn access_mode(&self) -> AccessMode {
        AccessMode::O_RDWR
    }
}

impl Drop for PtyMaster {
    fn drop(&mut self) {
        SLAVES.lock().remove(&self.index);
        device::unregister_char(DeviceId::new(PTY_SLAVE_MAJOR, self.index));
        // Readers of the dead slave see hangup.
        self.slave.ldisc().pollee().add_events(IoEvents::HUP);
    }
}

/// `/dev/ptmx`: every open mints a fresh pair and hands back the
/// master.
pub struct Ptmx;

impl Device for Ptmx {
    fn type_(&self) -> DeviceType {
        DeviceType::CharDevice
    }

    fn id(&self) -> DeviceId {
        DeviceId::new(TTYAUX_MAJOR, 2)
    }

    fn read(&self, _buf: &mut [u8]) -> Result<usize> {
        return_errno!(Errno::EIO)
    }

    fn write(&self, _buf: &[u8]) -> Result<usize> {
        return_errno!(Errno::EIO)
    }

    fn open(&self) -> Result<Option<Arc<dyn FileLike>>> {
        let (master, _slave) = new_pair()?;
        Ok(Some(master as Arc<dyn FileLike>))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn master_write_reaches_slave_read_uncooked() {
        let _guard = crate::mm::test_util::serialize_test();
        let (master, slave) = new_pair().unwrap();
        // Bypasses the slave ldisc: readable at once, no echo back.
        master.write(b"raw bytes\n").unwrap();
        let mut buf = [0u8; 16];
        let n = slave.ldisc().try_read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"raw bytes\n");
        master.set_status_flags(StatusFlags::O_NONBLOCK).unwrap();
        assert_eq!(master.read(&mut buf).unwrap_err().error(), Errno::EAGAIN);
    }

    #[test]
    fn slave_output_reaches_master() {
        let _guard = crate::mm::test_util::serialize_test();
        let (master, slave) = new_pair().unwrap();
        slave.push_output(b"hello from slave").unwrap();
        let mut buf = [0u8; 32];
        let n = master.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"hello from slave");
    }

    #[test]
    fn slave_registers_and_unregisters() {
        let _guard = crate::mm::test_util::serialize_test();
        let (master, slave) = new_pair().unwrap();
        let index = master.index();
        assert!(slave_exists(index));
        assert!(Arc::ptr_eq(&slave_tty(index).unwrap(), &slave));
        drop(master);
        assert!(!slave_exists(index));
    }
}
