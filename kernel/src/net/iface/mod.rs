//! Network devices and the interface table.

mod loopback;

pub use loopback::Loopback;

use core::net::Ipv4Addr;

use crate::{net::skb::SkBuff, prelude::*};

pub type MacAddr = [u8; 6];

/// A network device. Transmit takes a finished layer-3 packet; for
/// Ethernet devices the link layer prepends its own header using the
/// resolved destination MAC.
pub trait NetDevice: Send + Sync {
    fn name(&self) -> &str;

    fn mtu(&self) -> usize;

    fn hwaddr(&self) -> MacAddr;

    /// The interface's own IP address and prefix length.
    fn ip_config(&self) -> (Ipv4Addr, u8);

    fn transmit(&self, skb: SkBuff, next_hop_mac: Option<MacAddr>) -> Result<()>;
}

impl core::fmt::Debug for dyn NetDevice {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("NetDevice").field("name", &self.name()).finish()
    }
}

lazy_static! {
    static ref DEVICES: SpinLock<Vec<Arc<dyn NetDevice>>> = SpinLock::new(Vec::new());
}

pub fn register(device: Arc<dyn NetDevice>) {
    DEVICES.lock_irq_disabled().push(device);
}

pub fn by_name(name: &str) -> Option<Arc<dyn NetDevice>> {
    DEVICES
        .lock_irq_disabled()
        .iter()
        .find(|d| d.name() == name)
        .cloned()
}

pub fn all() -> Vec<Arc<dyn NetDevice>> {
    DEVICES.lock_irq_disabled().clone()
}

/// The device owning `addr`, if any (used to loop locally-addressed
/// packets back without a route).
pub fn device_for_local_addr(addr: Ipv4Addr) -> Option<Arc<dyn NetDevice>> {
    DEVICES
        .lock_irq_disabled()
        .iter()
        .find(|d| d.ip_config().0 == addr)
        .cloned()
}
