//! ICMP: echo service plus delivery to raw sockets.

use core::net::Ipv4Addr;

use super::{
    ip::{self, IpHeader, IPPROTO_ICMP},
    skb::SkBuff,
};
use crate::prelude::*;

pub const ICMP_ECHO_REPLY: u8 = 0;
pub const ICMP_DEST_UNREACH: u8 = 3;
pub const ICMP_ECHO_REQUEST: u8 = 8;

const ICMP_HEADER_LEN: usize = 8;

/// Build and send one ICMP message.
pub fn send(
    src: Ipv4Addr,
    dst: Ipv4Addr,
    type_: u8,
    code: u8,
    rest: u32,
    payload: &[u8],
) -> Result<()> {
    let mut message = vec![0u8; ICMP_HEADER_LEN + payload.len()];
    message[0] = type_;
    message[1] = code;
    message[4..8].copy_from_slice(&rest.to_be_bytes());
    message[ICMP_HEADER_LEN..].copy_from_slice(payload);
    let sum = ip::checksum(&message);
    message[2..4].copy_from_slice(&sum.to_be_bytes());
    ip::send_payload(src, dst, IPPROTO_ICMP, &message)
}

/// Echo a destination-unreachable for a dropped datagram back to its
/// sender (port unreachable is the only code the stack generates).
pub fn send_dest_unreachable(original: &IpHeader, original_bytes: &[u8]) {
    let quote_len = original_bytes.len().min(original.header_len + 8);
    let _ = send(
        original.dst,
        original.src,
        ICMP_DEST_UNREACH,
        3,
        0,
        &original_bytes[..quote_len],
    );
}

pub(super) fn receive(header: &IpHeader, skb: SkBuff) {
    let data = skb.data();
    if data.len() < ICMP_HEADER_LEN || ip::checksum(data) != 0 {
        return;
    }
    match data[0] {
        ICMP_ECHO_REQUEST => {
            let rest = u32::from_be_bytes([data[4], data[5], data[6], data[7]]);
            let _ = send(
                header.dst,
                header.src,
                ICMP_ECHO_REPLY,
                0,
                rest,
                &data[ICMP_HEADER_LEN..],
            );
        }
        // Errors and replies are visible through raw sockets, which
        // already saw the datagram at the IP layer.
        _ => {}
    }
}
