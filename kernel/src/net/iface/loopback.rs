//! The loopback device.
//!
//! Transmit feeds straight back into IP receive. A queue plus a pump
//! flag keeps the path iterative: a handler that transmits while we
//! are delivering only grows the queue.

use core::{net::Ipv4Addr, sync::atomic::{AtomicBool, Ordering}};

use super::{MacAddr, NetDevice};
use crate::{net::skb::SkBuff, prelude::*};

pub struct Loopback {
    queue: SpinLock<VecDeque<SkBuff>>,
    pumping: AtomicBool,
}

impl Loopback {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            queue: SpinLock::new(VecDeque::new()),
            pumping: AtomicBool::new(false),
        })
    }

    fn pump(&self) {
        if self.pumping.swap(true, Ordering::Acquire) {
            return;
        }
        loop {
            let skb = self.queue.lock_irq_disabled().pop_front();
            match skb {
                Some(skb) => crate::net::ip::receive(skb),
                None => break,
            }
        }
        self.pumping.store(false, Ordering::Release);
    }
}

impl Default for Loopback {
    fn default() -> Self {
        Self {
            queue: SpinLock::new(VecDeque::new()),
            pumping: AtomicBool::new(false),
        }
    }
}

impl NetDevice for Loopback {
    fn name(&self) -> &str {
        "lo"
    }

    fn mtu(&self) -> usize {
        65535
    }

    fn hwaddr(&self) -> MacAddr {
        [0; 6]
    }

    fn ip_config(&self) -> (Ipv4Addr, u8) {
        (Ipv4Addr::new(127, 0, 0, 1), 8)
    }

    fn transmit(&self, skb: SkBuff, _next_hop_mac: Option<MacAddr>) -> Result<()> {
        self.queue.lock_irq_disabled().push_back(skb);
        self.pump();
        Ok(())
    }
}
