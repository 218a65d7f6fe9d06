//! Segment arrival: the state machine's receive half.

use core::net::Ipv4Addr;

use super::{
    output, seq_before, Tcb, TcpState, FLAG_ACK, FLAG_FIN, FLAG_RST, FLAG_SYN, TCP_HEADER_LEN,
};
use crate::{
    events::IoEvents,
    net::{
        ip::{self, IpHeader, IPPROTO_TCP},
        skb::SkBuff,
    },
    prelude::*,
    util::random,
};

struct Segment<'a> {
    src: (Ipv4Addr, u16),
    dst: (Ipv4Addr, u16),
    seq: u32,
    ack: u32,
    flags: u8,
    payload: &'a [u8],
}

pub(super) fn segment_arrives(header: &IpHeader, skb: SkBuff) {
    let data = skb.data();
    if data.len() < TCP_HEADER_LEN {
        return;
    }
    if ip::transport_checksum_bad(header.src, header.dst, IPPROTO_TCP, data) {
        return;
    }
    let data_off = ((data[12] >> 4) as usize) * 4;
    if data_off < TCP_HEADER_LEN || data_off > data.len() {
        return;
    }
    let seg = Segment {
        src: (header.src, u16::from_be_bytes([data[0], data[1]])),
        dst: (header.dst, u16::from_be_bytes([data[2], data[3]])),
        seq: u32::from_be_bytes([data[4], data[5], data[6], data[7]]),
        ack: u32::from_be_bytes([data[8], data[9], data[10], data[11]]),
        flags: data[13],
        payload: &data[data_off..],
    };

    let Some(tcb) = super::demux(seg.dst, seg.src) else {
        // No one home: answer non-RSTs with a reset.
        if seg.flags & FLAG_RST == 0 {
            let ack = seg.seq.wrapping_add(seg.payload.len() as u32 + 1);
            output::send_reset(seg.dst, seg.src, 0, ack);
        }
        return;
    };

    if seg.flags & FLAG_RST != 0 {
        if tcb.state() != TcpState::Listen {
            tcb.abort();
        }
        return;
    }

    match tcb.state() {
        TcpState::Listen => on_listen(&tcb, &seg),
        TcpState::SynSent => on_syn_sent(&tcb, &seg),
        TcpState::SynRecv => on_syn_recv(&tcb, &seg),
        TcpState::Established => on_established(&tcb, &seg),
        TcpState::FinWait1 => on_fin_wait1(&tcb, &seg),
        TcpState::FinWait2 => on_fin_wait2(&tcb, &seg),
        TcpState::CloseWait | TcpState::LastAck => on_last_ack(&tcb, &seg),
        TcpState::TimeWait => {
            // A retransmitted FIN re-draws the final ACK.
            if seg.flags & FLAG_FIN != 0 {
                tcb.send_ack();
            }
        }
        TcpState::Closed => {}
    }
}

/// Passive open: allocate the child connection, answer SYN+ACK.
fn on_listen(listener: &Arc<Tcb>, seg: &Segment) {
    if seg.flags & FLAG_SYN == 0 {
        return;
    }
    {
        let accept = listener.accept.lock();
        if let Some(queue) = accept.as_ref() {
            if queue.ready.len() >= queue.backlog {
                return; // Drop the SYN; the peer retries.
            }
        }
    }
    let child = Tcb::new();
    *child.local.lock() = seg.dst;
    *child.remote.lock() = seg.src;
    *child.listener.lock() = Some(Arc::downgrade(listener));
    {
        let mut rcv = child.rcv.lock();
        rcv.irs = seg.seq;
        rcv.nxt = seg.seq.wrapping_add(1);
    }
    let iss = random::random_u32();
    {
        let mut snd = child.snd.lock();
        snd.iss = iss;
        snd.una = iss;
        snd.nxt = iss.wrapping_add(1);
    }
    *child.state.lock() = TcpState::SynRecv;
    let _ = child.queue_and_send(iss, FLAG_SYN | FLAG_ACK, Vec::new());
}

fn on_syn_sent(tcb: &Arc<Tcb>, seg: &Segment) {
    if seg.flags & (FLAG_SYN | FLAG_ACK) != FLAG_SYN | FLAG_ACK {
        return;
    }
    let expected = tcb.snd.lock().iss.wrapping_add(1);
    if seg.ack != expected {
        return;
    }
    {
        let mut rcv = tcb.rcv.lock();
        rcv.irs = seg.seq;
        rcv.nxt = seg.seq.wrapping_add(1);
    }
    ack_advances(tcb, seg.ack);
    *tcb.state.lock() = TcpState::Established;
    tcb.send_ack();
    tcb.pollee().add_events(IoEvents::OUT);
}

fn on_syn_recv(tcb: &Arc<Tcb>, seg: &Segment) {
    if seg.flags & FLAG_ACK == 0 || seg.ack != tcb.snd.lock().nxt {
        return;
    }
    ack_advances(tcb, seg.ack);
    *tcb.state.lock() = TcpState::Established;
    tcb.pollee().add_events(IoEvents::OUT);
    // Hand the connection to the listener's accept queue.
    let listener = tcb.listener.lock().take();
    if let Some(listener) = listener.and_then(|weak| weak.upgrade()) {
        let mut accept = listener.accept.lock();
        if let Some(queue) = accept.as_mut() {
            queue.ready.push_back(tcb.clone());
            drop(accept);
            listener.pollee().add_events(IoEvents::IN);
        }
    }
    // The ACK may piggyback data.
    if !seg.payload.is_empty() {
        on_established(tcb, seg);
    }
}

fn on_established(tcb: &Arc<Tcb>, seg: &Segment) {
    if seg.flags & FLAG_ACK != 0 {
        ack_advances(tcb, seg.ack);
    }
    accept_in_order_data(tcb, seg, TcpState::CloseWait);
}

fn on_fin_wait1(tcb: &Arc<Tcb>, seg: &Segment) {
    if seg.flags & FLAG_ACK != 0 {
        ack_advances(tcb, seg.ack);
        if seg.ack == tcb.snd.lock().nxt {
            *tcb.state.lock() = TcpState::FinWait2;
        }
    }
    // Data (and a possible simultaneous FIN) still flow while the
    // close drains.
    if *tcb.state.lock() == TcpState::FinWait2 {
        on_fin_wait2(tcb, seg);
    } else {
        accept_in_order_data(tcb, seg, TcpState::FinWait1);
    }
}

fn on_fin_wait2(tcb: &Arc<Tcb>, seg: &Segment) {
    if seg.flags & FLAG_ACK != 0 {
        ack_advances(tcb, seg.ack);
    }
    let expected = tcb.rcv.lock().nxt;
    if seg.seq != expected {
        tcb.send_ack();
        return;
    }
    if seg.payload.len() > tcb.rx_free() {
        // Past the window: refuse the whole segment, FIN included.
        tcb.send_ack();
        return;
    }
    deliver_payload(tcb, seg.payload);
    if seg.flags & FLAG_FIN != 0 {
        let mut rcv = tcb.rcv.lock();
        rcv.nxt = rcv.nxt.wrapping_add(seg.payload.len() as u32 + 1);
        drop(rcv);
        *tcb.fin_received.lock() = true;
        tcb.send_ack();
        tcb.enter_time_wait();
        tcb.pollee().add_events(IoEvents::IN | IoEvents::RDHUP);
    } else if !seg.payload.is_empty() {
        let mut rcv = tcb.rcv.lock();
        rcv.nxt = rcv.nxt.wrapping_add(seg.payload.len() as u32);
        drop(rcv);
        tcb.send_ack();
    }
}

fn on_last_ack(tcb: &Arc<Tcb>, seg: &Segment) {
    if seg.flags & FLAG_ACK != 0 {
        ack_advances(tcb, seg.ack);
        if *tcb.state.lock() == TcpState::LastAck && seg.ack == tcb.snd.lock().nxt {
            *tcb.state.lock() = TcpState::Closed;
            tcb.pollee().add_events(IoEvents::HUP);
        }
    }
}

/// In-order receive with the duplicate-ACK rule; a FIN moves to
/// `fin_state`.
fn accept_in_order_data(tcb: &Arc<Tcb>, seg: &Segment, fin_state: TcpState) {
    let expected = tcb.rcv.lock().nxt;
    if seg.payload.is_empty() && seg.flags & FLAG_FIN == 0 {
        return;
    }
    if seg.seq != expected {
        // Out of order: drop and immediately re-ACK what we expect.
        tcb.send_ack();
        return;
    }
    if seg.payload.len() > tcb.rx_free() {
        // The segment overruns the advertised window. Acknowledged
        // bytes are never evicted to make room; re-ACK at the current
        // edge and let the sender's retransmit timer try again once
        // the reader drains.
        tcb.send_ack();
        return;
    }
    deliver_payload(tcb, seg.payload);
    let mut advance = seg.payload.len() as u32;
    let fin = seg.flags & FLAG_FIN != 0;
    if fin {
        advance = advance.wrapping_add(1);
    }
    {
        let mut rcv = tcb.rcv.lock();
        rcv.nxt = rcv.nxt.wrapping_add(advance);
    }
    if fin {
        *tcb.fin_received.lock() = true;
        *tcb.state.lock() = fin_state;
        tcb.pollee().add_events(IoEvents::IN | IoEvents::RDHUP);
    }
    tcb.send_ack();
}

/// Append in-order payload to the stream. Callers have already
/// checked the window, so nothing buffered is ever displaced.
fn deliver_payload(tcb: &Arc<Tcb>, payload: &[u8]) {
    if payload.is_empty() {
        return;
    }
    let pushed = tcb.rx.lock_irq_disabled().push_slice(payload);
    debug_assert_eq!(pushed, payload.len(), "tcp receive window violated");
    tcb.pollee().add_events(IoEvents::IN);
}

/// Process an acceptable ACK: advance `snd.una`, drop covered
/// retransmissions, reset the backoff.
fn ack_advances(tcb: &Arc<Tcb>, ack: u32) {
    let mut snd = tcb.snd.lock();
    if seq_before(snd.una, ack) && !seq_before(snd.nxt, ack) {
        snd.una = ack;
        drop(snd);
        let mut retrans = tcb.retrans.lock();
        retrans.queue.retain(|seg| {
            let end = seg
                .seq
                .wrapping_add(seg.payload.len().max(1) as u32);
            seq_before(ack, end)
        });
        retrans.backoff = 1;
        retrans.retries = 0;
        if retrans.queue.is_empty() {
            if let Some(handle) = retrans.timer.take() {
                crate::time::timer::cancel(handle);
            }
        }
        drop(retrans);
        tcb.pollee().add_events(IoEvents::OUT);
    }
}
