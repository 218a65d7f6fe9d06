//! ARP: resolve on-link IPv4 next hops to MAC addresses.
//!
//! The loopback path never consults this; Ethernet devices do before
//! transmit. Requests for unresolved hops are sent and the packet is
//! dropped (the retransmit layers above recover), which is the classic
//! minimal behavior.

use core::net::Ipv4Addr;

use super::{
    iface::{MacAddr, NetDevice},
    skb::{SkBuff, MAX_HEADER},
};
use crate::prelude::*;

pub const HW_ETHER: u16 = 1;
pub const OP_REQUEST: u16 = 1;
pub const OP_REPLY: u16 = 2;
pub const ETH_P_ARP: u16 = 0x0806;

lazy_static! {
    static ref CACHE: SpinLock<BTreeMap<u32, MacAddr>> = SpinLock::new(BTreeMap::new());
}

pub fn cache_insert(ip: Ipv4Addr, mac: MacAddr) {
    CACHE.lock_irq_disabled().insert(u32::from(ip), mac);
}

pub fn cache_lookup(ip: Ipv4Addr) -> Option<MacAddr> {
    CACHE.lock_irq_disabled().get(&u32::from(ip)).copied()
}

/// Resolve `next_hop`; on a miss, broadcast a request and report
/// `EAGAIN` so the caller drops this packet.
pub fn resolve(device: &Arc<dyn NetDevice>, next_hop: Ipv4Addr) -> Result<MacAddr> {
    if let Some(mac) = cache_lookup(next_hop) {
        return Ok(mac);
    }
    send_request(device, next_hop)?;
    return_errno_with_message!(Errno::EAGAIN, "arp resolution in progress")
}

fn send_request(device: &Arc<dyn NetDevice>, target: Ipv4Addr) -> Result<()> {
    let (our_ip, _) = device.ip_config();
    let mut skb = SkBuff::with_capacity(MAX_HEADER + 28);
    skb.reserve(MAX_HEADER);
    let body = skb.put(28);
    body[0..2].copy_from_slice(&HW_ETHER.to_be_bytes());
    body[2..4].copy_from_slice(&0x0800u16.to_be_bytes());
    body[4] = 6;
    body[5] = 4;
    body[6..8].copy_from_slice(&OP_REQUEST.to_be_bytes());
    body[8..14].copy_from_slice(&device.hwaddr());
    body[14..18].copy_from_slice(&our_ip.octets());
    // Target MAC unknown, that is the question.
    body[18..24].fill(0);
    body[24..28].copy_from_slice(&target.octets());
    device.transmit(skb, Some([0xff; 6]))
}

/// Handle a received ARP packet: learn the sender, answer requests
/// for our own address.
pub fn receive(device: &Arc<dyn NetDevice>, skb: &SkBuff) {
    let body = skb.data();
    if body.len() < 28 {
        return;
    }
    let op = u16::from_be_bytes([body[6], body[7]]);
    let sender_mac: MacAddr = body[8..14].try_into().unwrap();
    let sender_ip = Ipv4Addr::new(body[14], body[15], body[16], body[17]);
    let target_ip = Ipv4Addr::new(body[24], body[25], body[26], body[27]);
    cache_insert(sender_ip, sender_mac);

    let (our_ip, _) = device.ip_config();
    if op == OP_REQUEST && target_ip == our_ip {
        let mut reply = SkBuff::with_capacity(MAX_HEADER + 28);
        reply.reserve(MAX_HEADER);
        let out = reply.put(28);
        out[0..2].copy_from_slice(&HW_ETHER.to_be_bytes());
        out[2..4].copy_from_slice(&0x0800u16.to_be_bytes());
        out[4] = 6;
        out[5] = 4;
        out[6..8].copy_from_slice(&OP_REPLY.to_be_bytes());
        out[8..14].copy_from_slice(&device.hwaddr());
        out[14..18].copy_from_slice(&our_ip.octets());
        out[18..24].copy_from_slice(&sender_mac);
        out[24..28].copy_from_slice(&sender_ip.octets());
        let _ = device.transmit(reply, Some(sender_mac));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_learns_and_answers() {
        let ip = Ipv4Addr::new(10, 0, 0, 9);
        assert!(cache_lookup(ip).is_none());
        cache_insert(ip, [1, 2, 3, 4, 5, 6]);
        assert_eq!(cache_lookup(ip), Some([1, 2, 3, 4, 5, 6]));
    }
}
