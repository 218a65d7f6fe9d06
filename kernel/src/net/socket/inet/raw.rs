//! Raw IP sockets: every received datagram whose protocol matches
//! (protocol 0 sees them all), complete with IP header.

use core::net::Ipv4Addr;
use core::sync::atomic::{AtomicU32, Ordering};

use super::{super::{Socket, SocketAddr}, expect_inet};
use crate::{
    events::{IoEvents, Pollee, Poller},
    fs::{
        file_handle::FileLike,
        utils::{AccessMode, InodeMode, InodeType, Metadata, StatusFlags},
    },
    net::{
        ip::{self, IpHeader},
        skb::SkBuff,
    },
    prelude::*,
};

lazy_static! {
    static ref RAW_SOCKETS: SpinLock<Vec<Weak<RawSocket>>> = SpinLock::new(Vec::new());
}

/// IP-layer fanout to every matching raw socket.
pub(crate) fn deliver(header: &IpHeader, skb: &SkBuff) {
    let sockets: Vec<Arc<RawSocket>> = {
        let mut table = RAW_SOCKETS.lock_irq_disabled();
        table.retain(|weak| weak.strong_count() > 0);
        table.iter().filter_map(|weak| weak.upgrade()).collect()
    };
    for socket in sockets {
        if socket.protocol == 0 || socket.protocol == header.protocol {
            socket.push(header, skb.data());
        }
    }
}

pub struct RawSocket {
    protocol: u8,
    queue: SpinLock<VecDeque<(Vec<u8>, Ipv4Addr)>>,
    pollee: Pollee,
    status_flags: AtomicU32,
}

impl RawSocket {
    pub fn new(protocol: u8) -> Arc<Self> {
        let socket = Arc::new(Self {
            protocol,
            queue: SpinLock::new(VecDeque::new()),
            pollee: Pollee::new(IoEvents::OUT),
            status_flags: AtomicU32::new(0),
        });
        RAW_SOCKETS.lock_irq_disabled().push(Arc::downgrade(&socket));
        socket
    }

    fn push(&self, header: &IpHeader, datagram: &[u8]) {
        self.queue
            .lock_irq_disabled()
            .push_back((datagram.to_vec(), header.src));
        self.pollee.add_events(IoEvents::IN);
    }
}

impl FileLike for RawSocket {
    fn read(&self, buf: &mut [u8]) -> Result<usize> {
        let (read, _) = self.recvfrom(buf, 0)?;
        Ok(read)
    }

    fn write(&self, _buf: &[u8]) -> Result<usize> {
        return_errno_with_message!(Errno::EDESTADDRREQ, "raw write needs a destination")
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

impl Socket for RawSocket {
    fn addr(&self) -> Result<SocketAddr> {
        Ok(SocketAddr::Inet(Ipv4Addr::UNSPECIFIED, 0))
    }

    fn sendto(&self, buf: &[u8], remote: Option<SocketAddr>, _flags: u32) -> Result<usize> {
        let (dst, _) = expect_inet(&remote.ok_or(Error::new(Errno::EDESTADDRREQ))?)?;
        let src = ip::source_for(dst);
        ip::send_payload(src, dst, self.protocol, buf)?;
        Ok(buf.len())
    }

    fn recvfrom(&self, buf: &mut [u8], _flags: u32) -> Result<(usize, Option<SocketAddr>)> {
        loop {
            {
                let mut queue = self.queue.lock_irq_disabled();
                if let Some((datagram, src)) = queue.pop_front() {
                    let len = buf.len().min(datagram.len());
                    buf[..len].copy_from_slice(&datagram[..len]);
                    if queue.is_empty() {
                        self.pollee.del_events(IoEvents::IN);
                    }
                    return Ok((len, Some(SocketAddr::Inet(src, 0))));
                }
            }
            if self.status_flags().contains(StatusFlags::O_NONBLOCK) {
                return_errno!(Errno::EAGAIN);
            }
            let poller = Poller::new();
            if self.pollee.poll(IoEvents::IN, Some(&poller)).is_empty() {
                poller.wait()?;
            }
        }
    }
}
