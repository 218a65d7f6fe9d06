//! AF_INET sockets.

pub mod datagram;
pub mod raw;
pub mod stream;

pub use datagram::DatagramSocket;
pub use raw::RawSocket;
pub use stream::StreamSocket;

use core::net::Ipv4Addr;

use super::SocketAddr;
use crate::prelude::*;

pub(super) fn expect_inet(addr: &SocketAddr) -> Result<(Ipv4Addr, u16)> {
    match addr {
        SocketAddr::Inet(ip, port) => Ok((*ip, *port)),
        _ => return_errno_with_message!(Errno::EAFNOSUPPORT, "expected an inet address"),
    }
}
