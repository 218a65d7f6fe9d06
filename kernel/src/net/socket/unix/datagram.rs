//! SOCK_DGRAM over in-kernel message queues; record boundaries are
//! preserved.

use core::sync::atomic::{AtomicU32, Ordering};

use super::{super::{Socket, SocketAddr}, create_socket_inode, expect_unix};
use crate::{
    events::{IoEvents, Pollee, Poller},
    fs::{
        file_handle::FileLike,
        utils::{AccessMode, InodeMode, InodeType, Metadata, StatusFlags},
    },
    prelude::*,
};

const MAX_QUEUED: usize = 64;

lazy_static! {
    static ref BINDINGS: SpinLock<BTreeMap<String, Weak<UnixDgramSocket>>> =
        SpinLock::new(BTreeMap::new());
}

pub struct UnixDgramSocket {
    bound: SpinLock<Option<String>>,
    remote: SpinLock<Option<String>>,
    queue: SpinLock<VecDeque<(Vec<u8>, Option<String>)>>,
    pollee: Pollee,
    status_flags: AtomicU32,
    this: Weak<UnixDgramSocket>,
}

impl UnixDgramSocket {
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

    fn deliver(&self, payload: &[u8], from: Option<String>) -> Result<()> {
        let mut queue = self.queue.lock_irq_disabled();
        if queue.len() >= MAX_QUEUED {
            return_errno!(Errno::EAGAIN);
        }
        queue.push_back((payload.to_vec(), from));
        drop(queue);
        self.pollee.add_events(IoEvents::IN);
        Ok(())
    }

    fn nonblocking(&self) -> bool {
        self.status_flags().contains(StatusFlags::O_NONBLOCK)
    }
}

impl FileLike for UnixDgramSocket {
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

impl Socket for UnixDgramSocket {
    fn bind(&self, addr: SocketAddr) -> Result<()> {
        let path = expect_unix(&addr)?;
        let mut bound = self.bound.lock();
        if bound.is_some() {
            return_errno!(Errno::EINVAL);
        }
        {
            let mut bindings = BINDINGS.lock();
            if bindings
                .get(&path)
                .is_some_and(|weak| weak.strong_count() > 0)
            {
                return_errno!(Errno::EADDRINUSE);
            }
            create_socket_inode(&path)?;
            bindings.insert(path.clone(), self.this.clone());
        }
        *bound = Some(path);
        Ok(())
    }

    fn connect(&self, addr: SocketAddr) -> Result<()> {
        *self.remote.lock() = Some(expect_unix(&addr)?);
        Ok(())
    }

    fn addr(&self) -> Result<SocketAddr> {
        Ok(SocketAddr::Unix(
            self.bound.lock().clone().unwrap_or_default(),
        ))
    }

    fn peer_addr(&self) -> Result<SocketAddr> {
        let remote = self.remote.lock().clone().ok_or(Error::new(Errno::ENOTCONN))?;
        Ok(SocketAddr::Unix(remote))
    }

    fn sendto(&self, buf: &[u8], remote: Option<SocketAddr>, _flags: u32) -> Result<usize> {
        let path = match remote {
            Some(addr) => expect_unix(&addr)?,
            None => self
                .remote
                .lock()
                .clone()
                .ok_or(Error::new(Errno::EDESTADDRREQ))?,
        };
        let target = BINDINGS
            .lock()
            .get(&path)
            .and_then(|weak| weak.upgrade())
            .ok_or(Error::with_message(Errno::ECONNREFUSED, "no such socket"))?;
        target.deliver(buf, self.bound.lock().clone())?;
        Ok(buf.len())
    }

    fn recvfrom(&self, buf: &mut [u8], _flags: u32) -> Result<(usize, Option<SocketAddr>)> {
        loop {
            {
                let mut queue = self.queue.lock_irq_disabled();
                if let Some((payload, from)) = queue.pop_front() {
                    let len = buf.len().min(payload.len());
                    buf[..len].copy_from_slice(&payload[..len]);
                    if queue.is_empty() {
                        self.pollee.del_events(IoEvents::IN);
                    }
                    return Ok((len, Some(SocketAddr::Unix(from.unwrap_or_default()))));
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

impl Drop for UnixDgramSocket {
    fn drop(&mut self) {
        if let Some(path) = self.bound.lock().as_ref() {
            BINDINGS.lock().remove(path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_boundaries_survive() {
        let _guard = crate::mm::test_util::serialize_test();
        let receiver = UnixDgramSocket::new();
        receiver
            .bind(SocketAddr::Unix(String::from("@dgram-rx")))
            .unwrap();
        let sender = UnixDgramSocket::new();
        sender
            .sendto(b"first", Some(SocketAddr::Unix(String::from("@dgram-rx"))), 0)
            .unwrap();
        sender
            .sendto(b"second!", Some(SocketAddr::Unix(String::from("@dgram-rx"))), 0)
            .unwrap();
        let mut buf = [0u8; 64];
        let (n, _) = receiver.recvfrom(&mut buf, 0).unwrap();
        assert_eq!(&buf[..n], b"first");
        let (n, from) = receiver.recvfrom(&mut buf, 0).unwrap();
        assert_eq!(&buf[..n], b"second!");
        assert_eq!(from, Some(SocketAddr::Unix(String::new())));
    }

    #[test]
    fn sendto_unbound_path_is_refused() {
        let _guard = crate::mm::test_util::serialize_test();
        let sender = UnixDgramSocket::new();
        let err = sender
            .sendto(b"x", Some(SocketAddr::Unix(String::from("@void"))), 0)
            .unwrap_err();
        assert_eq!(err.error(), Errno::ECONNREFUSED);
    }
}
