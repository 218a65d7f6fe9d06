//! Segment construction and transmission.

use core::net::Ipv4Addr;

use super::TCP_HEADER_LEN;
use crate::{
    net::{
        ip::{self, IPPROTO_TCP},
        skb::{SkBuff, MAX_HEADER},
    },
    prelude::*,
};

pub const FLAG_FIN: u8 = 0x01;
pub const FLAG_SYN: u8 = 0x02;
pub const FLAG_RST: u8 = 0x04;
pub const FLAG_PSH: u8 = 0x08;
pub const FLAG_ACK: u8 = 0x10;

#[allow(clippy::too_many_arguments)]
pub(super) fn send_segment(
    local: (Ipv4Addr, u16),
    remote: (Ipv4Addr, u16),
    seq: u32,
    ack: u32,
    flags: u8,
    window: u16,
    payload: &[u8],
) -> Result<()> {
    let mut skb = SkBuff::with_capacity(MAX_HEADER + TCP_HEADER_LEN + payload.len());
    skb.reserve(MAX_HEADER);
    skb.put_slice(payload);
    {
        let header = skb.push(TCP_HEADER_LEN);
        header[0..2].copy_from_slice(&local.1.to_be_bytes());
        header[2..4].copy_from_slice(&remote.1.to_be_bytes());
        header[4..8].copy_from_slice(&seq.to_be_bytes());
        header[8..12].copy_from_slice(&ack.to_be_bytes());
        header[12] = ((TCP_HEADER_LEN / 4) as u8) << 4;
        header[13] = flags;
        header[14..16].copy_from_slice(&window.to_be_bytes());
        header[16..20].fill(0);
    }
    skb.mark_transport_header();
    let sum = ip::transport_checksum(local.0, remote.0, IPPROTO_TCP, skb.data());
    skb.data_mut()[16..18].copy_from_slice(&sum.to_be_bytes());
    ip::send(&mut skb, local.0, remote.0, IPPROTO_TCP)
}

/// A bare RST answering a segment that reached no connection.
pub(super) fn send_reset(
    local: (Ipv4Addr, u16),
    remote: (Ipv4Addr, u16),
    seq: u32,
    ack: u32,
) {
    let _ = send_segment(
        local,
        remote,
        seq,
        ack,
        FLAG_RST | FLAG_ACK,
        0,
        &[],
    );
}
