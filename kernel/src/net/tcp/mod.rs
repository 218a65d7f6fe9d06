//! TCP.
//!
//! One [`Tcb`] per connection. Delivery is strictly in order: a
//! segment that is not the next expected sequence draws an immediate
//! duplicate ACK and is dropped. Unacknowledged segments sit on a
//! retransmit queue behind a single per-connection timer with
//! doubling backoff.
//!
//! Flow control: every outgoing segment advertises the free share of
//! the receive ring, and an in-order segment that would overflow it
//! is refused (re-ACKed at the current edge, never acknowledged past
//! it), so acknowledged bytes are never evicted; the sender's
//! retransmit timer retries once the reader has drained room.
//!
//! Locking rule: no `Tcb` lock is held across a transmit, because the
//! loopback path delivers (and re-enters this module) synchronously.

mod input;
mod output;
mod timer;

use core::net::Ipv4Addr;

pub use output::{FLAG_ACK, FLAG_FIN, FLAG_PSH, FLAG_RST, FLAG_SYN};

use crate::{
    events::{IoEvents, Pollee},
    prelude::*,
    util::{random, ring_buffer::RingBuffer},
};

use super::{ip::IpHeader, skb::SkBuff};

pub const TCP_HEADER_LEN: usize = 20;
pub const MSS: usize = 1460;
/// Receive ring capacity; the advertised window is whatever share of
/// it the reader has not consumed yet.
pub const RECV_BUFFER_CAPACITY: usize = 16384;
/// 2MSL wait, in ticks.
pub const MSL_TICKS: u64 = 3000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TcpState {
    Closed,
    Listen,
    SynSent,
    SynRecv,
    Established,
    FinWait1,
    FinWait2,
    CloseWait,
    LastAck,
    TimeWait,
}

/// Sequence-space comparison (RFC 793 arithmetic).
pub(self) fn seq_before(a: u32, b: u32) -> bool {
    (a.wrapping_sub(b) as i32) < 0
}

#[derive(Debug, Default, Clone, Copy)]
pub(self) struct SendSeq {
    pub iss: u32,
    pub una: u32,
    pub nxt: u32,
}

#[derive(Debug, Default, Clone, Copy)]
pub(self) struct RecvSeq {
    pub irs: u32,
    pub nxt: u32,
}

pub(self) struct PendingSegment {
    pub seq: u32,
    pub flags: u8,
    pub payload: Vec<u8>,
}

pub(self) struct RetransState {
    pub queue: VecDeque<PendingSegment>,
    pub timer: Option<crate::time::timer::TimerHandle>,
    pub backoff: u32,
    pub retries: u32,
}

pub(self) struct AcceptQueue {
    pub backlog: usize,
    pub ready: VecDeque<Arc<Tcb>>,
}

/// The transmission control block.
pub struct Tcb {
    state: SpinLock<TcpState>,
    local: SpinLock<(Ipv4Addr, u16)>,
    remote: SpinLock<(Ipv4Addr, u16)>,
    snd: SpinLock<SendSeq>,
    rcv: SpinLock<RecvSeq>,
    /// In-order bytes awaiting the application.
    rx: SpinLock<RingBuffer<u8>>,
    /// EOF flag: the peer's FIN has been consumed into the stream.
    fin_received: SpinLock<bool>,
    retrans: SpinLock<RetransState>,
    accept: SpinLock<Option<AcceptQueue>>,
    /// The listener that spawned this connection, while handshaking.
    listener: SpinLock<Option<Weak<Tcb>>>,
    pollee: Pollee,
    this: Weak<Tcb>,
}

lazy_static! {
    static ref SOCKETS: SpinLock<Vec<Weak<Tcb>>> = SpinLock::new(Vec::new());
}

fn register(tcb: &Arc<Tcb>) {
    let mut sockets = SOCKETS.lock_irq_disabled();
    sockets.retain(|weak| weak.strong_count() > 0);
    sockets.push(Arc::downgrade(tcb));
}

/// Demux: an exact four-tuple match wins; otherwise a listener on the
/// destination port takes the segment.
pub(self) fn demux(
    local: (Ipv4Addr, u16),
    remote: (Ipv4Addr, u16),
) -> Option<Arc<Tcb>> {
    let sockets = SOCKETS.lock_irq_disabled();
    let mut listener = None;
    for weak in sockets.iter() {
        let Some(tcb) = weak.upgrade() else { continue };
        let state = *tcb.state.lock();
        let tcb_local = *tcb.local.lock();
        if tcb_local.1 != local.1 {
            continue;
        }
        if state == TcpState::Listen {
            listener = Some(tcb.clone());
            continue;
        }
        if *tcb.remote.lock() == remote
            && (tcb_local.0 == local.0 || tcb_local.0.is_unspecified())
        {
            return Some(tcb);
        }
    }
    listener
}

pub(self) fn port_in_use(port: u16) -> bool {
    let sockets = SOCKETS.lock_irq_disabled();
    sockets.iter().any(|weak| {
        weak.upgrade()
            .is_some_and(|tcb| tcb.local.lock().1 == port && *tcb.state.lock() != TcpState::Closed)
    })
}

pub fn alloc_ephemeral_port() -> Result<u16> {
    for port in 49152..u16::MAX {
        if !port_in_use(port) {
            return Ok(port);
        }
    }
    return_errno_with_message!(Errno::EADDRNOTAVAIL, "ephemeral tcp ports exhausted")
}

impl Tcb {
    pub fn new() -> Arc<Self> {
        let tcb = Arc::new_cyclic(|this| Self {
            state: SpinLock::new(TcpState::Closed),
            local: SpinLock::new((Ipv4Addr::UNSPECIFIED, 0)),
            remote: SpinLock::new((Ipv4Addr::UNSPECIFIED, 0)),
            snd: SpinLock::new(SendSeq::default()),
            rcv: SpinLock::new(RecvSeq::default()),
            rx: SpinLock::new(RingBuffer::new(RECV_BUFFER_CAPACITY)),
            fin_received: SpinLock::new(false),
            retrans: SpinLock::new(RetransState {
                queue: VecDeque::new(),
                timer: None,
                backoff: 1,
                retries: 0,
            }),
            accept: SpinLock::new(None),
            listener: SpinLock::new(None),
            pollee: Pollee::new(IoEvents::empty()),
            this: this.clone(),
        });
        register(&tcb);
        tcb
    }

    pub(self) fn this(&self) -> Arc<Tcb> {
        self.this.upgrade().unwrap()
    }

    pub fn state(&self) -> TcpState {
        *self.state.lock()
    }

    pub fn pollee(&self) -> &Pollee {
        &self.pollee
    }

    pub fn local_addr(&self) -> (Ipv4Addr, u16) {
        *self.local.lock()
    }

    pub fn remote_addr(&self) -> (Ipv4Addr, u16) {
        *self.remote.lock()
    }

    pub fn bind(&self, addr: (Ipv4Addr, u16)) -> Result<()> {
        if addr.1 != 0 && port_in_use(addr.1) {
            return_errno_with_message!(Errno::EADDRINUSE, "tcp port in use");
        }
        let port = if addr.1 == 0 {
            alloc_ephemeral_port()?
        } else {
            addr.1
        };
        *self.local.lock() = (addr.0, port);
        Ok(())
    }

    pub fn listen(&self, backlog: usize) -> Result<()> {
        let mut state = self.state.lock();
        if self.local.lock().1 == 0 {
            return_errno_with_message!(Errno::EINVAL, "listen on unbound socket");
        }
        if *state != TcpState::Closed {
            return_errno!(Errno::EINVAL);
        }
        *state = TcpState::Listen;
        *self.accept.lock() = Some(AcceptQueue {
            backlog: backlog.max(1),
            ready: VecDeque::new(),
        });
        Ok(())
    }

    /// Active open: send SYN. Completion (or refusal) is reported via
    /// the pollee; the socket layer waits on it.
    pub fn connect(&self, remote: (Ipv4Addr, u16)) -> Result<()> {
        {
            let mut state = self.state.lock();
            if *state != TcpState::Closed {
                return_errno!(Errno::EISCONN);
            }
            *state = TcpState::SynSent;
        }
        {
            let mut local = self.local.lock();
            if local.1 == 0 {
                local.1 = alloc_ephemeral_port()?;
            }
            if local.0.is_unspecified() {
                local.0 = super::ip::source_for(remote.0);
            }
        }
        *self.remote.lock() = remote;
        let iss = random::random_u32();
        {
            let mut snd = self.snd.lock();
            snd.iss = iss;
            snd.una = iss;
            snd.nxt = iss.wrapping_add(1);
        }
        self.queue_and_send(iss, FLAG_SYN, Vec::new())
    }

    /// One connection off the accept queue, if ready.
    pub fn try_accept(&self) -> Result<Option<Arc<Tcb>>> {
        let mut accept = self.accept.lock();
        let queue = accept
            .as_mut()
            .ok_or(Error::with_message(Errno::EINVAL, "not listening"))?;
        let child = queue.ready.pop_front();
        if queue.ready.is_empty() {
            self.pollee.del_events(IoEvents::IN);
        }
        Ok(child)
    }

    /// Queue outgoing payload; only legal once established.
    pub fn send_data(&self, buf: &[u8]) -> Result<usize> {
        match self.state() {
            TcpState::Established | TcpState::CloseWait => {}
            TcpState::SynSent | TcpState::SynRecv => {
                return_errno!(Errno::EAGAIN);
            }
            _ => return_errno_with_message!(Errno::EPIPE, "send on closed connection"),
        }
        let mut sent = 0;
        while sent < buf.len() {
            let chunk = (buf.len() - sent).min(MSS);
            let seq = {
                let mut snd = self.snd.lock();
                let seq = snd.nxt;
                snd.nxt = snd.nxt.wrapping_add(chunk as u32);
                seq
            };
            self.queue_and_send(
                seq,
                FLAG_ACK | FLAG_PSH,
                buf[sent..sent + chunk].to_vec(),
            )?;
            sent += chunk;
        }
        Ok(sent)
    }

    /// Nonblocking receive; `Ok(0)` is end of stream.
    pub fn recv_data(&self, buf: &mut [u8]) -> Result<usize> {
        let (read, was_full) = {
            let mut rx = self.rx.lock_irq_disabled();
            let was_full = rx.is_full();
            (rx.pop_slice(buf), was_full)
        };
        if read > 0 {
            if self.rx.lock_irq_disabled().is_empty() && !*self.fin_received.lock() {
                self.pollee.del_events(IoEvents::IN);
            }
            // Draining a closed window reopens it; tell the peer so a
            // stalled sender need not wait out its full backoff.
            if was_full && self.state() == TcpState::Established {
                self.send_ack();
            }
            return Ok(read);
        }
        if *self.fin_received.lock() {
            return Ok(0);
        }
        match self.state() {
            TcpState::Established | TcpState::SynSent | TcpState::SynRecv => {
                return_errno!(Errno::EAGAIN)
            }
            TcpState::Closed => return_errno!(Errno::ENOTCONN),
            _ => Ok(0),
        }
    }

    /// Orderly close from the user side.
    pub fn close(&self) -> Result<()> {
        let (send_fin, seq) = {
            let mut state = self.state.lock();
            match *state {
                TcpState::Established => {
                    *state = TcpState::FinWait1;
                    (true, ())
                }
                TcpState::CloseWait => {
                    *state = TcpState::LastAck;
                    (true, ())
                }
                TcpState::Listen | TcpState::SynSent => {
                    *state = TcpState::Closed;
                    (false, ())
                }
                _ => (false, ()),
            }
        };
        let _ = seq;
        if send_fin {
            let seq = {
                let mut snd = self.snd.lock();
                let seq = snd.nxt;
                snd.nxt = snd.nxt.wrapping_add(1);
                seq
            };
            self.queue_and_send(seq, FLAG_FIN | FLAG_ACK, Vec::new())?;
        } else {
            self.pollee.add_events(IoEvents::HUP);
        }
        Ok(())
    }

    /// Stash for retransmission and transmit once.
    fn queue_and_send(&self, seq: u32, flags: u8, payload: Vec<u8>) -> Result<()> {
        {
            let mut retrans = self.retrans.lock();
            retrans.queue.push_back(PendingSegment {
                seq,
                flags,
                payload: payload.clone(),
            });
        }
        timer::arm(&self.this());
        self.transmit(seq, flags, &payload)
    }

    /// Free room in the receive ring: the window every outgoing
    /// segment advertises.
    pub(self) fn rx_free(&self) -> usize {
        let rx = self.rx.lock_irq_disabled();
        rx.capacity() - rx.len()
    }

    pub(self) fn transmit(&self, seq: u32, flags: u8, payload: &[u8]) -> Result<()> {
        let local = *self.local.lock();
        let remote = *self.remote.lock();
        let ack = self.rcv.lock().nxt;
        let window = self.rx_free().min(u16::MAX as usize) as u16;
        output::send_segment(local, remote, seq, ack, flags, window, payload)
    }

    /// Plain ACK of the current receive point.
    pub(self) fn send_ack(&self) {
        let seq = self.snd.lock().nxt;
        let _ = self.transmit(seq, FLAG_ACK, &[]);
    }

    pub(self) fn enter_time_wait(&self) {
        *self.state.lock() = TcpState::TimeWait;
        let this = Arc::downgrade(&self.this());
        crate::time::timer::schedule_after(2 * MSL_TICKS, move || {
            if let Some(tcb) = this.upgrade() {
                *tcb.state.lock() = TcpState::Closed;
            }
        });
    }

    /// Hard teardown: retransmissions exhausted or RST received.
    pub(self) fn abort(&self) {
        *self.state.lock() = TcpState::Closed;
        let mut retrans = self.retrans.lock();
        retrans.queue.clear();
        if let Some(handle) = retrans.timer.take() {
            crate::time::timer::cancel(handle);
        }
        drop(retrans);
        self.pollee
            .add_events(IoEvents::ERR | IoEvents::HUP | IoEvents::IN | IoEvents::OUT);
    }
}

impl Debug for Tcb {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Tcb")
            .field("state", &self.state())
            .field("local", &self.local_addr())
            .field("remote", &self.remote_addr())
            .finish_non_exhaustive()
    }
}

/// IP hands TCP segments here.
pub(super) fn receive(header: &IpHeader, skb: SkBuff) {
    input::segment_arrives(header, skb);
}
