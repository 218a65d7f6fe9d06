//! SOCK_STREAM over in-kernel endpoints.

use core::sync::atomic::{AtomicU32, Ordering};

use super::{super::{SdFlags, Socket, SocketAddr}, create_socket_inode, expect_unix};
use crate::{
    events::{IoEvents, Pollee, Poller},
    fs::{
        file_handle::FileLike,
        utils::{AccessMode, InodeMode, InodeType, Metadata, StatusFlags},
    },
    prelude::*,
    util::ring_buffer::RingBuffer,
};

const STREAM_CAPACITY: usize = 16384;

/// One direction-aware half of a connected pair: reads drain the own
/// ring, writes fill the peer's.
pub(super) struct Endpoint {
    rx: SpinLock<RingBuffer<u8>>,
    pollee: Pollee,
    peer: SpinLock<Weak<Endpoint>>,
    shutdown_read: AtomicU32,
    shutdown_write: AtomicU32,
}

impl Endpoint {
    fn new_pair() -> (Arc<Endpoint>, Arc<Endpoint>) {
        let make = || {
            Arc::new(Endpoint {
                rx: SpinLock::new(RingBuffer::new(STREAM_CAPACITY)),
                pollee: Pollee::new(IoEvents::OUT),
                peer: SpinLock::new(Weak::new()),
                shutdown_read: AtomicU32::new(0),
                shutdown_write: AtomicU32::new(0),
            })
        };
        let a = make();
        let b = make();
        *a.peer.lock() = Arc::downgrade(&b);
        *b.peer.lock() = Arc::downgrade(&a);
        (a, b)
    }

    fn peer(&self) -> Option<Arc<Endpoint>> {
        self.peer.lock().upgrade()
    }

    fn try_read(&self, buf: &mut [u8]) -> Result<usize> {
        let read = self.rx.lock_irq_disabled().pop_slice(buf);
        if read > 0 {
            if self.rx.lock_irq_disabled().is_empty() {
                self.pollee.del_events(IoEvents::IN);
            }
            if let Some(peer) = self.peer() {
                peer.pollee.add_events(IoEvents::OUT);
            }
            return Ok(read);
        }
        if self.shutdown_read.load(Ordering::Relaxed) != 0 || self.peer().is_none() {
            return Ok(0);
        }
        return_errno!(Errno::EAGAIN)
    }

    fn try_write(&self, buf: &[u8]) -> Result<usize> {
        if self.shutdown_write.load(Ordering::Relaxed) != 0 {
            return_errno!(Errno::EPIPE);
        }
        let Some(peer) = self.peer() else {
            if let Some(current) = crate::process::current_opt() {
                use crate::process::signal::{constants::SIGPIPE, signals::kernel::KernelSignal};
                current.enqueue_signal(Box::new(KernelSignal::new(SIGPIPE)));
            }
            return_errno_with_message!(Errno::EPIPE, "peer is gone");
        };
        let written = peer.rx.lock_irq_disabled().push_slice(buf);
        if written == 0 {
            return_errno!(Errno::EAGAIN);
        }
        peer.pollee.add_events(IoEvents::IN);
        Ok(written)
    }
}

impl Drop for Endpoint {
    fn drop(&mut self) {
        if let Some(peer) = self.peer.lock().upgrade() {
            peer.pollee.add_events(IoEvents::IN | IoEvents::HUP);
        }
    }
}

enum State {
    Init {
        bound: Option<String>,
    },
    Listening {
        path: String,
        backlog: usize,
        pending: VecDeque<(Arc<Endpoint>, Option<String>)>,
    },
    Connected {
        endpoint: Arc<Endpoint>,
        local: Option<String>,
        peer: Option<String>,
    },
}

lazy_static! {
    static ref LISTENERS: SpinLock<BTreeMap<String, Weak<UnixStreamSocket>>> =
        SpinLock::new(BTreeMap::new());
}

pub struct UnixStreamSocket {
    state: SpinLock<State>,
    /// Wakes accept; connected I/O uses the endpoint's pollee.
    listen_pollee: Pollee,
    status_flags: AtomicU32,
    this: Weak<UnixStreamSocket>,
}

impl UnixStreamSocket {
    pub fn new() -> Arc<Self> {
        Self::with_state(State::Init { bound: None })
    }

    fn with_state(state: State) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            state: SpinLock::new(state),
            listen_pollee: Pollee::new(IoEvents::empty()),
            status_flags: AtomicU32::new(0),
            this: this.clone(),
        })
    }

    fn nonblocking(&self) -> bool {
        self.status_flags().contains(StatusFlags::O_NONBLOCK)
    }

    fn endpoint(&self) -> Result<Arc<Endpoint>> {
        match &*self.state.lock() {
            State::Connected { endpoint, .. } => Ok(endpoint.clone()),
            _ => return_errno!(Errno::ENOTCONN),
        }
    }

    fn block_on<R>(
        &self,
        pollee: &Pollee,
        events: IoEvents,
        mut attempt: impl FnMut() -> Result<R>,
    ) -> Result<R> {
        loop {
            match attempt() {
                Err(err) if err.error() == Errno::EAGAIN => {
                    if self.nonblocking() {
                        return Err(err);
                    }
                    let poller = Poller::new();
                    if pollee.poll(events, Some(&poller)).is_empty() {
                        poller.wait()?;
                    }
                }
                other => return other,
            }
        }
    }
}

/// `socketpair(AF_UNIX, SOCK_STREAM)`.
pub fn socketpair() -> (Arc<UnixStreamSocket>, Arc<UnixStreamSocket>) {
    let (a, b) = Endpoint::new_pair();
    (
        UnixStreamSocket::with_state(State::Connected {
            endpoint: a,
            local: None,
            peer: None,
        }),
        UnixStreamSocket::with_state(State::Connected {
            endpoint: b,
            local: None,
            peer: None,
        }),
    )
}

impl FileLike for UnixStreamSocket {
    fn read(&self, buf: &mut [u8]) -> Result<usize> {
        let endpoint = self.endpoint()?;
        self.block_on(&endpoint.pollee, IoEvents::IN | IoEvents::HUP, || {
            endpoint.try_read(buf)
        })
    }

    fn write(&self, buf: &[u8]) -> Result<usize> {
        let endpoint = self.endpoint()?;
        self.block_on(&endpoint.pollee, IoEvents::OUT | IoEvents::ERR, || {
            endpoint.try_write(buf)
        })
    }

    fn metadata(&self) -> Metadata {
        Metadata {
            type_: InodeType::Socket,
            ..Metadata::new_file(0, InodeMode::from_bits_truncate(0o777), 4096)
        }
    }

    fn poll(&self, mask: IoEvents, poller: Option<&Poller>) -> IoEvents {
        match &*self.state.lock() {
            State::Connected { endpoint, .. } => endpoint.pollee.poll(mask, poller),
            _ => self.listen_pollee.poll(mask, poller),
        }
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

    fn as_socket(&self) -> Option<&dyn Socket> {
        Some(self)
    }
}

impl Socket for UnixStreamSocket {
    fn bind(&self, addr: SocketAddr) -> Result<()> {
        let path = expect_unix(&addr)?;
        let mut state = self.state.lock();
        match &mut *state {
            State::Init { bound } if bound.is_none() => {
                create_socket_inode(&path)?;
                *bound = Some(path);
                Ok(())
            }
            _ => return_errno!(Errno::EINVAL),
        }
    }

    fn listen(&self, backlog: usize) -> Result<()> {
        let mut state = self.state.lock();
        match &*state {
            State::Init { bound: Some(path) } => {
                let path = path.clone();
                LISTENERS
                    .lock()
                    .insert(path.clone(), self.this.clone());
                *state = State::Listening {
                    path,
                    backlog: backlog.max(1),
                    pending: VecDeque::new(),
                };
                Ok(())
            }
            State::Init { bound: None } => {
                return_errno_with_message!(Errno::EINVAL, "listen on unbound socket")
            }
            _ => return_errno!(Errno::EINVAL),
        }
    }

    fn connect(&self, addr: SocketAddr) -> Result<()> {
        let path = expect_unix(&addr)?;
        let listener = LISTENERS
            .lock()
            .get(&path)
            .and_then(|weak| weak.upgrade())
            .ok_or(Error::with_message(Errno::ECONNREFUSED, "no listener"))?;
        let (client_ep, server_ep) = Endpoint::new_pair();
        let local = {
            let state = self.state.lock();
            match &*state {
                State::Init { bound } => bound.clone(),
                _ => return_errno!(Errno::EISCONN),
            }
        };
        {
            let mut lstate = listener.state.lock();
            match &mut *lstate {
                State::Listening {
                    backlog, pending, ..
                } => {
                    if pending.len() >= *backlog {
                        return_errno!(Errno::ECONNREFUSED);
                    }
                    pending.push_back((server_ep, local.clone()));
                }
                _ => return_errno!(Errno::ECONNREFUSED),
            }
        }
        listener.listen_pollee.add_events(IoEvents::IN);
        *self.state.lock() = State::Connected {
            endpoint: client_ep,
            local,
            peer: Some(path),
        };
        Ok(())
    }

    fn accept(&self) -> Result<(Arc<dyn FileLike>, SocketAddr)> {
        let (endpoint, peer) = self.block_on(&self.listen_pollee, IoEvents::IN, || {
            let mut state = self.state.lock();
            match &mut *state {
                State::Listening { pending, .. } => match pending.pop_front() {
                    Some(conn) => {
                        if pending.is_empty() {
                            self.listen_pollee.del_events(IoEvents::IN);
                        }
                        Ok(conn)
                    }
                    None => Err(Error::new(Errno::EAGAIN)),
                },
                _ => Err(Error::new(Errno::EINVAL)),
            }
        })?;
        let local = match &*self.state.lock() {
            State::Listening { path, .. } => Some(path.clone()),
            _ => None,
        };
        let peer_addr = SocketAddr::Unix(peer.clone().unwrap_or_default());
        let socket = UnixStreamSocket::with_state(State::Connected {
            endpoint,
            local,
            peer,
        });
        Ok((socket as Arc<dyn FileLike>, peer_addr))
    }

    fn shutdown(&self, cmd: SdFlags) -> Result<()> {
        let endpoint = self.endpoint()?;
        if cmd.contains(SdFlags::SHUT_RD) {
            endpoint.shutdown_read.store(1, Ordering::Relaxed);
            endpoint.pollee.add_events(IoEvents::IN);
        }
        if cmd.contains(SdFlags::SHUT_WR) {
            endpoint.shutdown_write.store(1, Ordering::Relaxed);
            if let Some(peer) = endpoint.peer() {
                peer.shutdown_read.store(1, Ordering::Relaxed);
                peer.pollee.add_events(IoEvents::IN | IoEvents::RDHUP);
            }
        }
        Ok(())
    }

    fn addr(&self) -> Result<SocketAddr> {
        let path = match &*self.state.lock() {
            State::Init { bound } => bound.clone(),
            State::Listening { path, .. } => Some(path.clone()),
            State::Connected { local, .. } => local.clone(),
        };
        Ok(SocketAddr::Unix(path.unwrap_or_default()))
    }

    fn peer_addr(&self) -> Result<SocketAddr> {
        match &*self.state.lock() {
            State::Connected { peer, .. } => {
                Ok(SocketAddr::Unix(peer.clone().unwrap_or_default()))
            }
            _ => return_errno!(Errno::ENOTCONN),
        }
    }

    fn sendto(&self, buf: &[u8], _remote: Option<SocketAddr>, _flags: u32) -> Result<usize> {
        self.write(buf)
    }

    fn recvfrom(&self, buf: &mut [u8], _flags: u32) -> Result<(usize, Option<SocketAddr>)> {
        let read = self.read(buf)?;
        Ok((read, None))
    }
}

impl Drop for UnixStreamSocket {
    fn drop(&mut self) {
        if let State::Listening { path, .. } = &*self.state.lock() {
            LISTENERS.lock().remove(path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn socketpair_carries_bytes_both_ways() {
        let (a, b) = socketpair();
        let payload: Vec<u8> = (0..100u8).collect();
        assert_eq!(a.write(&payload).unwrap(), 100);
        let mut buf = [0u8; 128];
        let read = b.read(&mut buf).unwrap();
        assert_eq!(&buf[..read], payload.as_slice());

        assert_eq!(b.write(b"pong").unwrap(), 4);
        let read = a.read(&mut buf).unwrap();
        assert_eq!(&buf[..read], b"pong");
    }

    #[test]
    fn read_after_peer_drop_is_eof() {
        let (a, b) = socketpair();
        a.write(b"last words").unwrap();
        drop(a);
        let mut buf = [0u8; 32];
        let read = b.read(&mut buf).unwrap();
        assert_eq!(&buf[..read], b"last words");
        assert_eq!(b.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn listen_connect_accept_roundtrip() {
        let _guard = crate::mm::test_util::serialize_test();
        let server = UnixStreamSocket::new();
        server
            .bind(SocketAddr::Unix(String::from("@test-listener")))
            .unwrap();
        server.listen(4).unwrap();

        let client = UnixStreamSocket::new();
        client
            .connect(SocketAddr::Unix(String::from("@test-listener")))
            .unwrap();
        client.set_status_flags(StatusFlags::O_NONBLOCK).unwrap();

        server.set_status_flags(StatusFlags::O_NONBLOCK).unwrap();
        let (conn, _) = server.accept().unwrap();
        client.write(b"hello").unwrap();
        let mut buf = [0u8; 8];
        let read = conn.read(&mut buf).unwrap();
        assert_eq!(&buf[..read], b"hello");
    }

    #[test]
    fn connect_without_listener_is_refused() {
        let _guard = crate::mm::test_util::serialize_test();
        let client = UnixStreamSocket::new();
        let err = client
            .connect(SocketAddr::Unix(String::from("@nobody-here")))
            .unwrap_err();
        assert_eq!(err.error(), Errno::ECONNREFUSED);
    }
}
