//! The family-neutral socket contract.

pub mod inet;
pub mod unix;

use core::net::Ipv4Addr;

use crate::{fs::file_handle::FileLike, prelude::*};

pub const AF_UNIX: u32 = 1;
pub const AF_INET: u32 = 2;

pub const SOCK_STREAM: u32 = 1;
pub const SOCK_DGRAM: u32 = 2;
pub const SOCK_RAW: u32 = 3;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketAddr {
    Inet(Ipv4Addr, u16),
    Unix(String),
}

bitflags! {
    pub struct SdFlags: u32 {
        const SHUT_RD   = 1 << 0;
        const SHUT_WR   = 1 << 1;
    }
}

impl SdFlags {
    pub fn from_how(how: u32) -> Result<Self> {
        match how {
            0 => Ok(SdFlags::SHUT_RD),
            1 => Ok(SdFlags::SHUT_WR),
            2 => Ok(SdFlags::SHUT_RD | SdFlags::SHUT_WR),
            _ => return_errno_with_message!(Errno::EINVAL, "invalid shutdown how"),
        }
    }
}

/// Operations every socket family provides on top of `FileLike`.
/// Defaults return the error an operation has on a family that does
/// not support it.
pub trait Socket: FileLike {
    fn bind(&self, _addr: SocketAddr) -> Result<()> {
        return_errno!(Errno::EOPNOTSUPP)
    }

    fn listen(&self, _backlog: usize) -> Result<()> {
        return_errno!(Errno::EOPNOTSUPP)
    }

    fn connect(&self, _addr: SocketAddr) -> Result<()> {
        return_errno!(Errno::EOPNOTSUPP)
    }

    fn accept(&self) -> Result<(Arc<dyn FileLike>, SocketAddr)> {
        return_errno!(Errno::EOPNOTSUPP)
    }

    fn shutdown(&self, _cmd: SdFlags) -> Result<()> {
        return_errno!(Errno::EOPNOTSUPP)
    }

    fn addr(&self) -> Result<SocketAddr>;

    fn peer_addr(&self) -> Result<SocketAddr> {
        return_errno!(Errno::ENOTCONN)
    }

    fn sendto(&self, buf: &[u8], remote: Option<SocketAddr>, flags: u32) -> Result<usize>;

    fn recvfrom(&self, buf: &mut [u8], flags: u32) -> Result<(usize, Option<SocketAddr>)>;

    fn setsockopt(&self, _level: u32, _name: u32, _value: &[u8]) -> Result<()> {
        // Options are accepted and ignored, old-kernel style.
        Ok(())
    }

    fn getsockopt(&self, _level: u32, _name: u32) -> Result<Vec<u8>> {
        Ok(vec![0, 0, 0, 0])
    }
}
