//! UDP: pseudo-header checksums on send, port demux on receive.

use core::net::Ipv4Addr;

use super::{
    ip::{self, IpHeader, IPPROTO_UDP},
    skb::{SkBuff, MAX_HEADER},
};
use crate::prelude::*;

pub const UDP_HEADER_LEN: usize = 8;

/// Receive-side hook per bound socket.
pub trait UdpReceiver: Send + Sync {
    fn deliver(&self, src: (Ipv4Addr, u16), dst: (Ipv4Addr, u16), payload: &[u8]);
}

lazy_static! {
    static ref PORTS: SpinLock<BTreeMap<u16, Weak<dyn UdpReceiver>>> =
        SpinLock::new(BTreeMap::new());
}

pub fn bind_port(port: u16, receiver: Weak<dyn UdpReceiver>) -> Result<()> {
    let mut ports = PORTS.lock_irq_disabled();
    if let Some(existing) = ports.get(&port) {
        if existing.strong_count() > 0 {
            return_errno_with_message!(Errno::EADDRINUSE, "udp port in use");
        }
    }
    ports.insert(port, receiver);
    Ok(())
}

pub fn unbind_port(port: u16) {
    PORTS.lock_irq_disabled().remove(&port);
}

/// A free ephemeral port.
pub fn alloc_ephemeral() -> Result<u16> {
    let ports = PORTS.lock_irq_disabled();
    for port in 49152..u16::MAX {
        match ports.get(&port) {
            Some(existing) if existing.strong_count() > 0 => continue,
            _ => return Ok(port),
        }
    }
    return_errno_with_message!(Errno::EADDRNOTAVAIL, "ephemeral udp ports exhausted")
}

pub fn send(
    src: (Ipv4Addr, u16),
    dst: (Ipv4Addr, u16),
    payload: &[u8],
) -> Result<()> {
    let mut skb = SkBuff::with_capacity(MAX_HEADER + UDP_HEADER_LEN + payload.len());
    skb.reserve(MAX_HEADER);
    skb.put_slice(payload);
    {
        let header = skb.push(UDP_HEADER_LEN);
        header[0..2].copy_from_slice(&src.1.to_be_bytes());
        header[2..4].copy_from_slice(&dst.1.to_be_bytes());
        header[4..6].copy_from_slice(&((UDP_HEADER_LEN + payload.len()) as u16).to_be_bytes());
        header[6..8].fill(0);
    }
    skb.mark_transport_header();
    let sum = ip::transport_checksum(src.0, dst.0, IPPROTO_UDP, skb.data());
    skb.data_mut()[6..8].copy_from_slice(&sum.to_be_bytes());
    ip::send(&mut skb, src.0, dst.0, IPPROTO_UDP)
}

pub(super) fn receive(header: &IpHeader, skb: SkBuff) {
    let data = skb.data();
    if data.len() < UDP_HEADER_LEN {
        return;
    }
    let src_port = u16::from_be_bytes([data[0], data[1]]);
    let dst_port = u16::from_be_bytes([data[2], data[3]]);
    let length = u16::from_be_bytes([data[4], data[5]]) as usize;
    if length < UDP_HEADER_LEN || length > data.len() {
        return;
    }
    let declared_checksum = u16::from_be_bytes([data[6], data[7]]);
    if declared_checksum != 0
        && ip::transport_checksum_bad(header.src, header.dst, IPPROTO_UDP, &data[..length])
    {
        return;
    }
    let receiver = {
        let ports = PORTS.lock_irq_disabled();
        ports.get(&dst_port).and_then(|weak| weak.upgrade())
    };
    match receiver {
        Some(receiver) => receiver.deliver(
            (header.src, src_port),
            (header.dst, dst_port),
            &data[UDP_HEADER_LEN..length],
        ),
        None => {
            let raw = skb.slice_from(skb.network_header);
            super::icmp::send_dest_unreachable(header, raw);
        }
    }
}
