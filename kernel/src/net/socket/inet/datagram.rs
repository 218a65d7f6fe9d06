//! UDP datagram sockets.

use core::net::Ipv4Addr;
use core::sync::atomic::AtomicU32;
use core::sync::atomic::Ordering;

use super::{super::{Socket, SocketAddr}, expect_inet};
use crate::{
    events::{IoEvents, Pollee, Poller},
    fs::{
        file_handle::FileLike,
        utils::{AccessMode, InodeMode, InodeType, Metadata, StatusFlags},
    },
    net::{ip, udp},
    prelude::*,
};

struct Bound {
    addr: Ipv4Addr,
    port: u16,
}

pub struct DatagramSocket {
    bound: SpinLock<Option<Bound>>,
    remote: SpinLock<Option<(Ipv4Addr, u16)>>,
    /// Received datagrams with their source, boundaries preserved.
    queue: SpinLock<VecDeque<(Vec<u8>, (Ipv4Addr, u16))>>,
    pollee: Pollee,
    status_flags: AtomicU32,
    this: Weak<DatagramSocket>,
}

impl DatagramSocket {
    pub fn new() -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            bound: SpinLock::new(None),
            remote: SpinLock::new(None),
            queue: SpinLock::new(VecDeque::new()),
            pollee: Pollee::new(IoEvents::OUT),
            status_flags: AtomicU32::new(0),
            this: this.clone(),
        })
    }

    fn ensure_bound(&self) -> Result<(Ipv4Addr, u16)> {
        {
            let bound = self.bound.lock();
            if let Some(bound) = bound.as_ref() {
                return Ok((bound.addr, bound.port));
            }
        }
        let port = udp::alloc_ephemeral()?;
        self.bind_to(Ipv4Addr::UNSPECIFIED, port)?;
        Ok((Ipv4Addr::UNSPECIFIED, port))
    }

    fn bind_to(&self, addr: Ipv4Addr, port: u16) -> Result<()> {
        let this = self.this.upgrade().unwrap();
        udp::bind_port(port, Arc::downgrade(&this) as Weak<dyn udp::UdpReceiver>)?;
        *self.bound.lock() = Some(Bound { addr, port });
        Ok(())
    }

    fn nonblocking(&self) -> bool {
        self.status_flags().contains(StatusFlags::O_NONBLOCK)
    }
}

impl udp::UdpReceiver for DatagramSocket {
    fn deliver(&self, src: (Ipv4Addr, u16), _dst: (Ipv4Addr, u16), payload: &[u8]) {
        // A connected socket filters to its peer.
        if let Some(remote) = *self.remote.lock() {
            if remote != src {
                return;
            }
        }
        self.queue
            .lock_irq_disabled()
            .push_back((payload.to_vec(), src));
        self.pollee.add_events(IoEvents::IN);
    }
}

impl FileLike for DatagramSocket {
    fn read(&self, buf: &mut [u8]) -> Result<usize> {
        let (read, _) = self.recvfrom(buf, 0)?;
        Ok(read)
    }

    fn write(&self, buf: &[u8]) -> Result<usize> {
        self.sendto(buf, None, 0)
    }

    fn metadata(&self) -> Metadata {
        Metadata {
            type_: InodeType::Socket,
            ..Metadata::new_file(0, InodeMode::from_bits_truncate(0o777), 4096)
        }
    }

    fn poll(&self, mask: IoEvents, poller: Option<&Poller>) -> IoEvents {
        self.pollee.poll(mask, poller)
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

impl Socket for DatagramSocket {
    fn bind(&self, addr: SocketAddr) -> Result<()> {
        let (ip, port) = expect_inet(&addr)?;
        if self.bound.lock().is_some() {
            return_errno!(Errno::EINVAL);
        }
        let port = if port == 0 { udp::alloc_ephemeral()? } else { port };
        self.bind_to(ip, port)
    }

    fn connect(&self, addr: SocketAddr) -> Result<()> {
        let remote = expect_inet(&addr)?;
        self.ensure_bound()?;
        *self.remote.lock() = Some(remote);
        Ok(())
    }

    fn addr(&self) -> Result<SocketAddr> {
        let bound = self.bound.lock();
        match bound.as_ref() {
            Some(bound) => Ok(SocketAddr::Inet(bound.addr, bound.port)),
            None => Ok(SocketAddr::Inet(Ipv4Addr::UNSPECIFIED, 0)),
        }
    }

    fn peer_addr(&self) -> Result<SocketAddr> {
        let remote = self.remote.lock().ok_or(Error::new(Errno::ENOTCONN))?;
        Ok(SocketAddr::Inet(remote.0, remote.1))
    }

    fn sendto(&self, buf: &[u8], remote: Option<SocketAddr>, _flags: u32) -> Result<usize> {
        let dst = match remote {
            Some(addr) => expect_inet(&addr)?,
            None => self
                .remote
                .lock()
                .ok_or(Error::new(Errno::EDESTADDRREQ))?,
        };
        let (bound_addr, port) = self.ensure_bound()?;
        let src_ip = if bound_addr.is_unspecified() {
            ip::source_for(dst.0)
        } else {
            bound_addr
        };
        udp::send((src_ip, port), dst, buf)?;
        Ok(buf.len())
    }

    fn recvfrom(&self, buf: &mut [u8], _flags: u32) -> Result<(usize, Option<SocketAddr>)> {
        loop {
            {
                let mut queue = self.queue.lock_irq_disabled();
                if let Some((payload, src)) = queue.pop_front() {
                    let len = buf.len().min(payload.len());
                    buf[..len].copy_from_slice(&payload[..len]);
                    if queue.is_empty() {
                        self.pollee.del_events(IoEvents::IN);
                    }
                    return Ok((len, Some(SocketAddr::Inet(src.0, src.1))));
                }
            }
            if self.nonblocking() {
                return_errno!(Errno::EAGAIN);
            }
            let poller = Poller::new();
            if self.pollee.poll(IoEvents::IN, Some(&poller)).is_empty() {
                poller.wait()?;
            }
        }
    }
}

impl Drop for DatagramSocket {
    fn drop(&mut self) {
        if let Some(bound) = self.bound.lock().as_ref() {
            udp::unbind_port(bound.port);
        }
    }
}
