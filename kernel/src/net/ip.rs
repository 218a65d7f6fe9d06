//! IPv4: header build/parse, checksums and protocol dispatch.

use core::net::Ipv4Addr;
use core::sync::atomic::{AtomicU16, Ordering};

use super::{
    iface, route,
    skb::{SkBuff, MAX_HEADER},
};
use crate::prelude::*;

pub const IPPROTO_ICMP: u8 = 1;
pub const IPPROTO_TCP: u8 = 6;
pub const IPPROTO_UDP: u8 = 17;

pub const IP_HEADER_LEN: usize = 20;
const DEFAULT_TTL: u8 = 64;

static NEXT_ID: AtomicU16 = AtomicU16::new(1);

/// One's-complement sum over `data`, folded to 16 bits.
pub fn checksum(data: &[u8]) -> u16 {
    !fold(sum(data, 0))
}

pub(super) fn sum(data: &[u8], start: u32) -> u32 {
    let mut acc = start;
    let mut chunks = data.chunks_exact(2);
    for chunk in &mut chunks {
        acc += u16::from_be_bytes([chunk[0], chunk[1]]) as u32;
    }
    if let [last] = chunks.remainder() {
        acc += (*last as u32) << 8;
    }
    acc
}

pub(super) fn fold(mut acc: u32) -> u16 {
    while acc > 0xffff {
        acc = (acc & 0xffff) + (acc >> 16);
    }
    acc as u16
}

/// Checksum spanning the `(src, dst, 0, proto, len)` pseudo-header
/// plus a transport segment.
pub fn transport_checksum(src: Ipv4Addr, dst: Ipv4Addr, proto: u8, segment: &[u8]) -> u16 {
    let mut pseudo = [0u8; 12];
    pseudo[0..4].copy_from_slice(&src.octets());
    pseudo[4..8].copy_from_slice(&dst.octets());
    pseudo[9] = proto;
    pseudo[10..12].copy_from_slice(&(segment.len() as u16).to_be_bytes());
    let acc = sum(segment, sum(&pseudo, 0));
    let folded = !fold(acc);
    // An all-zero result is transmitted as all-ones (UDP rule; harmless
    // for TCP).
    if folded == 0 {
        0xffff
    } else {
        folded
    }
}

/// Whether a received transport segment fails its pseudo-header
/// checksum.
pub fn transport_checksum_bad(src: Ipv4Addr, dst: Ipv4Addr, proto: u8, segment: &[u8]) -> bool {
    let mut pseudo = [0u8; 12];
    pseudo[0..4].copy_from_slice(&src.octets());
    pseudo[4..8].copy_from_slice(&dst.octets());
    pseudo[9] = proto;
    pseudo[10..12].copy_from_slice(&(segment.len() as u16).to_be_bytes());
    fold(sum(segment, sum(&pseudo, 0))) != 0xffff
}

#[derive(Debug, Clone, Copy)]
pub struct IpHeader {
    pub src: Ipv4Addr,
    pub dst: Ipv4Addr,
    pub protocol: u8,
    pub total_len: usize,
    pub header_len: usize,
}

impl IpHeader {
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < IP_HEADER_LEN {
            return_errno_with_message!(Errno::EINVAL, "short ip packet");
        }
        if data[0] >> 4 != 4 {
            return_errno_with_message!(Errno::EINVAL, "not ipv4");
        }
        let header_len = ((data[0] & 0x0f) as usize) * 4;
        if header_len < IP_HEADER_LEN || data.len() < header_len {
            return_errno_with_message!(Errno::EINVAL, "bad ip header length");
        }
        if checksum(&data[..header_len]) != 0 {
            return_errno_with_message!(Errno::EINVAL, "ip checksum mismatch");
        }
        Ok(Self {
            src: Ipv4Addr::new(data[12], data[13], data[14], data[15]),
            dst: Ipv4Addr::new(data[16], data[17], data[18], data[19]),
            protocol: data[9],
            total_len: u16::from_be_bytes([data[2], data[3]]) as usize,
            header_len,
        })
    }
}

/// Wrap a transport segment already staged in `skb` and hand it to the
/// routed device.
pub fn send(skb: &mut SkBuff, src: Ipv4Addr, dst: Ipv4Addr, protocol: u8) -> Result<()> {
    let total_len = skb.len() + IP_HEADER_LEN;
    let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
    {
        let header = skb.push(IP_HEADER_LEN);
        header[0] = 0x45;
        header[1] = 0;
        header[2..4].copy_from_slice(&(total_len as u16).to_be_bytes());
        header[4..6].copy_from_slice(&id.to_be_bytes());
        header[6..8].copy_from_slice(&[0x40, 0]); // don't fragment
        header[8] = DEFAULT_TTL;
        header[9] = protocol;
        header[10..12].fill(0);
        header[12..16].copy_from_slice(&src.octets());
        header[16..20].copy_from_slice(&dst.octets());
        let sum = checksum(&header[..IP_HEADER_LEN]);
        header[10..12].copy_from_slice(&sum.to_be_bytes());
    }
    skb.mark_network_header();

    // Our own addresses and loopback go to the loopback path.
    if dst.is_loopback() || iface::device_for_local_addr(dst).is_some() {
        let device = iface::by_name("lo")
            .ok_or(Error::with_message(Errno::ENETDOWN, "no loopback device"))?;
        return device.transmit(skb.clone(), None);
    }
    let (next_hop, device) = route::lookup(dst)?;
    let mac = if device.name() == "lo" {
        None
    } else {
        Some(super::arp::resolve(&device, next_hop)?)
    };
    device.transmit(skb.clone(), mac)
}

/// Build a fresh skb around `payload` and send it.
pub fn send_payload(
    src: Ipv4Addr,
    dst: Ipv4Addr,
    protocol: u8,
    payload: &[u8],
) -> Result<()> {
    let mut skb = SkBuff::with_capacity(MAX_HEADER + payload.len());
    skb.reserve(MAX_HEADER);
    skb.put_slice(payload);
    send(&mut skb, src, dst, protocol)
}

/// Receive path: validate, then demux by protocol. Raw sockets see
/// every datagram whose protocol they bound.
pub fn receive(mut skb: SkBuff) {
    let header = match IpHeader::parse(skb.data()) {
        Ok(header) => header,
        Err(_) => return,
    };
    // Trim link padding beyond the IP total length.
    skb.mark_network_header();
    super::socket::inet::raw::deliver(&header, &skb);
    skb.pull(header.header_len);
    skb.mark_transport_header();
    match header.protocol {
        IPPROTO_ICMP => super::icmp::receive(&header, skb),
        IPPROTO_UDP => super::udp::receive(&header, skb),
        IPPROTO_TCP => super::tcp::receive(&header, skb),
        _ => {}
    }
}

/// The source address to use toward `dst`.
pub fn source_for(dst: Ipv4Addr) -> Ipv4Addr {
    if dst.is_loopback() {
        return Ipv4Addr::new(127, 0, 0, 1);
    }
    if let Some(device) = iface::device_for_local_addr(dst) {
        return device.ip_config().0;
    }
    match route::lookup(dst) {
        Ok((_, device)) => device.ip_config().0,
        Err(_) => Ipv4Addr::UNSPECIFIED,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_checksum_roundtrip() {
        let mut skb = SkBuff::with_capacity(MAX_HEADER + 4);
        skb.reserve(MAX_HEADER);
        skb.put_slice(b"data");
        // Build the header by hand through send()'s inner logic: use a
        // loopback-free path by constructing directly.
        let header = skb.push(IP_HEADER_LEN);
        header[0] = 0x45;
        header[2..4].copy_from_slice(&24u16.to_be_bytes());
        header[8] = 64;
        header[9] = IPPROTO_UDP;
        header[12..16].copy_from_slice(&[127, 0, 0, 1]);
        header[16..20].copy_from_slice(&[127, 0, 0, 1]);
        let sum = checksum(&header[..IP_HEADER_LEN]);
        header[10..12].copy_from_slice(&sum.to_be_bytes());

        let parsed = IpHeader::parse(skb.data()).unwrap();
        assert_eq!(parsed.protocol, IPPROTO_UDP);
        assert_eq!(parsed.total_len, 24);
        assert_eq!(parsed.src, Ipv4Addr::new(127, 0, 0, 1));

        // Corruption is caught.
        skb.data_mut()[13] ^= 0xff;
        assert!(IpHeader::parse(skb.data()).is_err());
    }

    #[test]
    fn pseudo_header_checksum_validates() {
        let src = Ipv4Addr::new(10, 0, 0, 1);
        let dst = Ipv4Addr::new(10, 0, 0, 2);
        let mut segment = vec![0u8; 12];
        segment[0..2].copy_from_slice(&4000u16.to_be_bytes());
        segment[2..4].copy_from_slice(&5000u16.to_be_bytes());
        let segment_len = segment.len() as u16;
        segment[4..6].copy_from_slice(&segment_len.to_be_bytes());
        let sum = transport_checksum(src, dst, IPPROTO_UDP, &segment);
        segment[6..8].copy_from_slice(&sum.to_be_bytes());
        // Re-summing a checksummed segment folds to zero.
        assert_eq!(fold(super::sum(&segment, {
            let mut pseudo = [0u8; 12];
            pseudo[0..4].copy_from_slice(&src.octets());
            pseudo[4..8].copy_from_slice(&dst.octets());
            pseudo[9] = IPPROTO_UDP;
            pseudo[10..12].copy_from_slice(&(segment.len() as u16).to_be_bytes());
            super::sum(&pseudo, 0)
        })), 0xffff);
    }
}
