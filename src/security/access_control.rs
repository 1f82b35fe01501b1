//! IP allow-list for the internal-use listener.
//!
//! A peer is allowed when it is on the host's own /24, is a loopback
//! address, or is listed in `access.allowed_ips`.

use std::net::{IpAddr, Ipv4Addr, UdpSocket};

use crate::config::AccessConfig;

/// Address used only to pick the outbound interface; nothing is sent.
const PROBE_ADDR: (Ipv4Addr, u16) = (Ipv4Addr::new(8, 8, 8, 8), 80);

/// Peers permitted on the internal listener.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IpAllowList {
    local_network: Option<[u8; 3]>,
    extra: Vec<IpAddr>,
}

impl IpAllowList {
    /// Build the list around an explicit local address.
    pub fn new(local_ip: Option<Ipv4Addr>, extra: Vec<IpAddr>) -> Self {
        Self {
            local_network: local_ip.filter(|ip| !ip.is_loopback()).map(|ip| {
                let [a, b, c, _] = ip.octets();
                [a, b, c]
            }),
            extra,
        }
    }

    /// Build the list from config, probing the host's LAN address.
    pub fn from_config(config: &AccessConfig) -> Self {
        let local_ip = detect_local_ip();
        tracing::debug!(local_ip = ?local_ip, extra = config.allowed_ips.len(), "Internal allow-list built");
        Self::new(local_ip, config.allowed_ips.clone())
    }

    pub fn is_allowed(&self, peer: IpAddr) -> bool {
        let peer = match peer {
            IpAddr::V6(v6) => v6.to_ipv4_mapped().map(IpAddr::V4).unwrap_or(peer),
            v4 => v4,
        };
        if peer.is_loopback() || self.extra.contains(&peer) {
            return true;
        }
        match (peer, self.local_network) {
            (IpAddr::V4(v4), Some(prefix)) => v4.octets()[..3] == prefix,
            _ => false,
        }
    }
}

/// LAN address of the default route, found by "connecting" a UDP socket.
pub fn detect_local_ip() -> Option<Ipv4Addr> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).ok()?;
    socket.connect(PROBE_ADDR).ok()?;
    match socket.local_addr().ok()?.ip() {
        IpAddr::V4(v4) if !v4.is_unspecified() => Some(v4),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn allows_local_subnet_and_loopback() {
        let list = IpAllowList::new(Some(Ipv4Addr::new(192, 168, 1, 20)), vec![]);
        assert!(list.is_allowed(ip("192.168.1.99")));
        assert!(list.is_allowed(ip("127.0.0.1")));
        assert!(list.is_allowed(ip("::1")));
        assert!(!list.is_allowed(ip("192.168.2.1")));
        assert!(!list.is_allowed(ip("10.0.0.1")));
    }

    #[test]
    fn allows_configured_addresses() {
        let list = IpAllowList::new(None, vec![ip("10.0.0.7")]);
        assert!(list.is_allowed(ip("10.0.0.7")));
        assert!(list.is_allowed(ip("::ffff:10.0.0.7")));
        assert!(!list.is_allowed(ip("10.0.0.8")));
    }

    #[test]
    fn loopback_local_ip_opens_no_subnet() {
        let list = IpAllowList::new(Some(Ipv4Addr::LOCALHOST), vec![]);
        assert!(list.is_allowed(ip("127.0.0.1")));
        assert!(!list.is_allowed(ip("10.0.0.1")));
    }
}
