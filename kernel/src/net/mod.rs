//! The TCP/IP stack and the socket families above it.

pub mod arp;
pub mod icmp;
pub mod iface;
pub mod ip;
pub mod route;
pub mod skb;
pub mod socket;
pub mod tcp;
pub mod udp;

use core::net::Ipv4Addr;

use crate::prelude::*;

/// Bring the stack up: the loopback device and its route.
pub fn init() {
    let lo = iface::Loopback::new();
    iface::register(lo.clone());
    route::add(route::Route {
        destination: Ipv4Addr::new(127, 0, 0, 0),
        prefix_len: 8,
        gateway: None,
        device: lo,
    });
    info!("net: loopback interface up");
}

#[cfg(test)]
pub(crate) fn ensure_net_init() {
    crate::mm::test_util::ensure_mm_init();
    if iface::by_name("lo").is_none() {
        init();
    }
}

#[cfg(test)]
mod tests {
    use super::{
        socket::{inet::{DatagramSocket, StreamSocket}, SdFlags, Socket, SocketAddr},
        *,
    };
    use crate::fs::{file_handle::FileLike, utils::StatusFlags};

    const LOCALHOST: Ipv4Addr = Ipv4Addr::new(127, 0, 0, 1);

    fn nonblocking<T: FileLike + ?Sized>(sock: &T) {
        sock.set_status_flags(StatusFlags::O_NONBLOCK).unwrap();
    }

    #[test]
    fn tcp_echo_over_loopback() {
        let _guard = crate::mm::test_util::serialize_test();
        ensure_net_init();

        let server = StreamSocket::new();
        server.bind(SocketAddr::Inet(LOCALHOST, 7)).unwrap();
        server.listen(4).unwrap();
        nonblocking(&*server);

        let client = StreamSocket::new();
        nonblocking(&*client);
        // The loopback handshake completes synchronously.
        client.connect(SocketAddr::Inet(LOCALHOST, 7)).unwrap();

        let (conn, peer) = server.accept().unwrap();
        assert!(matches!(peer, SocketAddr::Inet(ip, _) if ip == LOCALHOST));
        nonblocking(&*conn);

        assert_eq!(client.write(b"ping").unwrap(), 4);
        let mut buf = [0u8; 16];
        let n = conn.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"ping");

        assert_eq!(conn.write(b"pong").unwrap(), 4);
        let n = client.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"pong");

        // Orderly shutdown: both sides see EOF afterwards.
        client.shutdown(SdFlags::SHUT_RD | SdFlags::SHUT_WR).unwrap();
        let n = conn.read(&mut buf).unwrap();
        assert_eq!(n, 0);
        conn.as_socket()
            .unwrap()
            .shutdown(SdFlags::SHUT_RD | SdFlags::SHUT_WR)
            .unwrap();
        let n = client.read(&mut buf).unwrap();
        assert_eq!(n, 0);
    }

    #[test]
    fn tcp_delivers_in_order_across_segments() {
        let _guard = crate::mm::test_util::serialize_test();
        ensure_net_init();

        let server = StreamSocket::new();
        server.bind(SocketAddr::Inet(LOCALHOST, 9090)).unwrap();
        server.listen(1).unwrap();
        nonblocking(&*server);

        let client = StreamSocket::new();
        nonblocking(&*client);
        client.connect(SocketAddr::Inet(LOCALHOST, 9090)).unwrap();
        let (conn, _) = server.accept().unwrap();
        nonblocking(&*conn);

        // More than one MSS forces segmentation.
        let payload: Vec<u8> = (0..4000).map(|i| (i % 251) as u8).collect();
        assert_eq!(client.write(&payload).unwrap(), payload.len());

        let mut received = Vec::new();
        let mut buf = [0u8; 1024];
        loop {
            match conn.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => received.extend_from_slice(&buf[..n]),
                Err(err) if err.error() == Errno::EAGAIN => break,
                Err(err) => panic!("read failed: {err:?}"),
            }
            if received.len() >= payload.len() {
                break;
            }
        }
        assert_eq!(received, payload);
    }

    #[test]
    fn tcp_slow_reader_loses_nothing() {
        let _guard = crate::mm::test_util::serialize_test();
        ensure_net_init();

        let server = StreamSocket::new();
        server.bind(SocketAddr::Inet(LOCALHOST, 9191)).unwrap();
        server.listen(1).unwrap();
        nonblocking(&*server);

        let client = StreamSocket::new();
        nonblocking(&*client);
        client.connect(SocketAddr::Inet(LOCALHOST, 9191)).unwrap();
        let (conn, _) = server.accept().unwrap();
        nonblocking(&*conn);

        // Far more than the receive ring holds; the overflow must sit
        // on the sender's retransmit queue, not displace ACKed bytes.
        let payload: Vec<u8> = (0..3 * tcp::RECV_BUFFER_CAPACITY)
            .map(|i| (i % 197) as u8)
            .collect();
        assert_eq!(client.write(&payload).unwrap(), payload.len());

        let mut received = Vec::new();
        let mut buf = [0u8; 2048];
        for _ in 0..200 {
            loop {
                match conn.read(&mut buf) {
                    Ok(n) if n > 0 => received.extend_from_slice(&buf[..n]),
                    _ => break,
                }
            }
            if received.len() >= payload.len() {
                break;
            }
            // Let the retransmit timer replay into the reopened window.
            crate::time::advance_jiffies(60);
        }
        assert_eq!(received, payload);
    }

    #[test]
    fn tcp_connect_to_closed_port_is_refused() {
        let _guard = crate::mm::test_util::serialize_test();
        ensure_net_init();
        let client = StreamSocket::new();
        let err = client
            .connect(SocketAddr::Inet(LOCALHOST, 1))
            .unwrap_err();
        assert_eq!(err.error(), Errno::ECONNREFUSED);
    }

    #[test]
    fn udp_roundtrip_over_loopback() {
        let _guard = crate::mm::test_util::serialize_test();
        ensure_net_init();

        let server = DatagramSocket::new();
        server.bind(SocketAddr::Inet(LOCALHOST, 5353)).unwrap();
        nonblocking(&*server);

        let client = DatagramSocket::new();
        nonblocking(&*client);
        client
            .sendto(b"query", Some(SocketAddr::Inet(LOCALHOST, 5353)), 0)
            .unwrap();

        let mut buf = [0u8; 32];
        let (n, from) = server.recvfrom(&mut buf, 0).unwrap();
        assert_eq!(&buf[..n], b"query");
        let Some(SocketAddr::Inet(ip, port)) = from else {
            panic!("missing source address")
        };
        assert_eq!(ip, LOCALHOST);

        server
            .sendto(b"answer", Some(SocketAddr::Inet(ip, port)), 0)
            .unwrap();
        let (n, _) = client.recvfrom(&mut buf, 0).unwrap();
        assert_eq!(&buf[..n], b"answer");
    }

    #[test]
    fn icmp_echo_is_answered() {
        let _guard = crate::mm::test_util::serialize_test();
        ensure_net_init();

        let raw = socket::inet::RawSocket::new(ip::IPPROTO_ICMP);
        nonblocking(&*raw);
        icmp::send(LOCALHOST, LOCALHOST, icmp::ICMP_ECHO_REQUEST, 0, 0x1234, b"abc").unwrap();

        // The raw socket sees both the request and the reply.
        let mut buf = [0u8; 128];
        let mut types = Vec::new();
        while let Ok((n, _)) = raw.recvfrom(&mut buf, 0) {
            let header_len = ((buf[0] & 0x0f) as usize) * 4;
            types.push(buf[header_len]);
            let _ = n;
        }
        assert!(types.contains(&icmp::ICMP_ECHO_REQUEST));
        assert!(types.contains(&icmp::ICMP_ECHO_REPLY));
    }
}
