//! The route table: longest-prefix match over
//! `(destination, netmask) -> (gateway, device)`.

use core::net::Ipv4Addr;

use super::iface::NetDevice;
use crate::prelude::*;

#[derive(Clone)]
pub struct Route {
    pub destination: Ipv4Addr,
    pub prefix_len: u8,
    /// `None` for on-link destinations.
    pub gateway: Option<Ipv4Addr>,
    pub device: Arc<dyn NetDevice>,
}

fn mask(prefix_len: u8) -> u32 {
    if prefix_len == 0 {
        0
    } else {
        u32::MAX << (32 - prefix_len as u32)
    }
}

fn matches(route: &Route, dst: Ipv4Addr) -> bool {
    let m = mask(route.prefix_len);
    u32::from(route.destination) & m == u32::from(dst) & m
}

lazy_static! {
    static ref ROUTES: SpinLock<Vec<Route>> = SpinLock::new(Vec::new());
}

pub fn add(route: Route) {
    ROUTES.lock_irq_disabled().push(route);
}

pub fn clear() {
    ROUTES.lock_irq_disabled().clear();
}

/// The best route to `dst`: next hop and device.
pub fn lookup(dst: Ipv4Addr) -> Result<(Ipv4Addr, Arc<dyn NetDevice>)> {
    let routes = ROUTES.lock_irq_disabled();
    let best = routes
        .iter()
        .filter(|route| matches(route, dst))
        .max_by_key(|route| route.prefix_len)
        .ok_or(Error::with_message(Errno::ENETUNREACH, "no route to host"))?;
    let next_hop = best.gateway.unwrap_or(dst);
    Ok((next_hop, best.device.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::iface::Loopback;

    #[test]
    fn longest_prefix_wins() {
        let _guard = crate::mm::test_util::serialize_test();
        clear();
        let dev = Loopback::new();
        add(Route {
            destination: Ipv4Addr::new(0, 0, 0, 0),
            prefix_len: 0,
            gateway: Some(Ipv4Addr::new(10, 0, 0, 1)),
            device: dev.clone(),
        });
        add(Route {
            destination: Ipv4Addr::new(10, 1, 0, 0),
            prefix_len: 16,
            gateway: None,
            device: dev.clone(),
        });
        // On-link beats the default route.
        let (hop, _) = lookup(Ipv4Addr::new(10, 1, 2, 3)).unwrap();
        assert_eq!(hop, Ipv4Addr::new(10, 1, 2, 3));
        // Off-subnet goes through the gateway.
        let (hop, _) = lookup(Ipv4Addr::new(8, 8, 8, 8)).unwrap();
        assert_eq!(hop, Ipv4Addr::new(10, 0, 0, 1));
        clear();
        let err = lookup(Ipv4Addr::new(1, 2, 3, 4)).unwrap_err();
        assert_eq!(err.error(), Errno::ENETUNREACH);
    }
}
