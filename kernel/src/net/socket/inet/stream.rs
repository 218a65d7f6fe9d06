//! TCP stream sockets.

use core::sync::atomic::{AtomicU32, Ordering};

use super::{super::{SdFlags, Socket, SocketAddr}, expect_inet};
use crate::{
    events::{IoEvents, Poller},
    fs::{
        file_handle::FileLike,
        utils::{AccessMode, InodeMode, InodeType, Metadata, StatusFlags},
    },
    net::tcp::{Tcb, TcpState},
    prelude::*,
};

pub struct StreamSocket {
    tcb: Arc<Tcb>,
    status_flags: AtomicU32,
}

impl StreamSocket {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            tcb: Tcb::new(),
            status_flags: AtomicU32::new(0),
        })
    }

    fn from_tcb(tcb: Arc<Tcb>) -> Arc<Self> {
        Arc::new(Self {
            tcb,
            status_flags: AtomicU32::new(0),
        })
    }

    fn nonblocking(&self) -> bool {
        self.status_flags().contains(StatusFlags::O_NONBLOCK)
    }

    /// Loop a nonblocking attempt against the pollee.
    fn block_on<R>(
        &self,
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
                    if self.tcb.pollee().poll(events, Some(&poller)).is_empty() {
                        poller.wait()?;
                    }
                }
                other => return other,
            }
        }
    }
}

impl FileLike for StreamSocket {
    fn read(&self, buf: &mut [u8]) -> Result<usize> {
        self.block_on(IoEvents::IN | IoEvents::HUP | IoEvents::ERR, || {
            self.tcb.recv_data(buf)
        })
    }

    fn write(&self, buf: &[u8]) -> Result<usize> {
        self.block_on(IoEvents::OUT | IoEvents::ERR, || self.tcb.send_data(buf))
    }

    fn metadata(&self) -> Metadata {
        Metadata {
            type_: InodeType::Socket,
            ..Metadata::new_file(0, InodeMode::from_bits_truncate(0o777), 4096)
        }
    }

    fn poll(&self, mask: IoEvents, poller: Option<&Poller>) -> IoEvents {
        self.tcb.pollee().poll(mask, poller)
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

impl Socket for StreamSocket {
    fn bind(&self, addr: SocketAddr) -> Result<()> {
        self.tcb.bind(expect_inet(&addr)?)
    }

    fn listen(&self, backlog: usize) -> Result<()> {
        self.tcb.listen(backlog)
    }

    fn connect(&self, addr: SocketAddr) -> Result<()> {
        self.tcb.connect(expect_inet(&addr)?)?;
        if self.nonblocking() {
            if self.tcb.state() == TcpState::Established {
                return Ok(());
            }
            return_errno_with_message!(Errno::EINPROGRESS, "connect in progress");
        }
        // Wait out the handshake.
        loop {
            match self.tcb.state() {
                TcpState::Established => return Ok(()),
                TcpState::Closed => {
                    return_errno_with_message!(Errno::ECONNREFUSED, "connection refused")
                }
                _ => {
                    let poller = Poller::new();
                    let ready = self
                        .tcb
                        .pollee()
                        .poll(IoEvents::OUT | IoEvents::ERR, Some(&poller));
                    if ready.is_empty() {
                        poller.wait()?;
                    } else if ready.contains(IoEvents::ERR) {
                        return_errno_with_message!(Errno::ECONNREFUSED, "connection refused");
                    }
                }
            }
        }
    }

    fn accept(&self) -> Result<(Arc<dyn FileLike>, SocketAddr)> {
        let child = self.block_on(IoEvents::IN, || {
            self.tcb
                .try_accept()?
                .ok_or(Error::new(Errno::EAGAIN))
        })?;
        let (ip, port) = child.remote_addr();
        Ok((
            StreamSocket::from_tcb(child) as Arc<dyn FileLike>,
            SocketAddr::Inet(ip, port),
        ))
    }

    fn shutdown(&self, cmd: SdFlags) -> Result<()> {
        if cmd.contains(SdFlags::SHUT_WR) {
            self.tcb.close()?;
        }
        Ok(())
    }

    fn addr(&self) -> Result<SocketAddr> {
        let (ip, port) = self.tcb.local_addr();
        Ok(SocketAddr::Inet(ip, port))
    }

    fn peer_addr(&self) -> Result<SocketAddr> {
        if self.tcb.state() == TcpState::Closed {
            return_errno!(Errno::ENOTCONN);
        }
        let (ip, port) = self.tcb.remote_addr();
        Ok(SocketAddr::Inet(ip, port))
    }

    fn sendto(&self, buf: &[u8], _remote: Option<SocketAddr>, _flags: u32) -> Result<usize> {
        self.write(buf)
    }

    fn recvfrom(&self, buf: &mut [u8], _flags: u32) -> Result<(usize, Option<SocketAddr>)> {
        let read = self.read(buf)?;
        Ok((read, None))
    }
}

impl Drop for StreamSocket {
    fn drop(&mut self) {
        let _ = self.tcb.close();
    }
}
