//! IP address plus port, doubling as a CIDR when the port carries prefix bits.

use core::fmt;
use core::str::FromStr;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use crate::error::ParseError;
use crate::types::string_serde;

/// Reachability scope of an IP address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IpScope {
    /// Unspecified (`0.0.0.0`, `::`).
    None,
    Multicast,
    Loopback,
    LinkLocal,
    /// Carrier-grade NAT space (100.64.0.0/10).
    Shared,
    /// RFC 1918 and IPv6 unique local space.
    Private,
    Global,
}

/// Classify an IP address by reachability scope.
pub fn ip_scope(ip: IpAddr) -> IpScope {
    match ip {
        IpAddr::V4(v4) => {
            let o = v4.octets();
            if v4.is_unspecified() {
                IpScope::None
            } else if v4.is_multicast() {
                IpScope::Multicast
            } else if v4.is_loopback() {
                IpScope::Loopback
            } else if v4.is_link_local() {
                IpScope::LinkLocal
            } else if o[0] == 100 && (o[1] & 0xc0) == 64 {
                IpScope::Shared
            } else if v4.is_private() {
                IpScope::Private
            } else {
                IpScope::Global
            }
        }
        IpAddr::V6(v6) => {
            let seg0 = v6.segments()[0];
            if v6.is_unspecified() {
                IpScope::None
            } else if v6.is_multicast() {
                IpScope::Multicast
            } else if v6.is_loopback() {
                IpScope::Loopback
            } else if (seg0 & 0xffc0) == 0xfe80 {
                IpScope::LinkLocal
            } else if (seg0 & 0xfe00) == 0xfc00 {
                IpScope::Private
            } else if let Some(v4) = v6.to_ipv4_mapped() {
                ip_scope(IpAddr::V4(v4))
            } else {
                IpScope::Global
            }
        }
    }
}

/// An IP address with a port.
///
/// For assigned addresses, routes, and CIDR rules the port holds the number
/// of network prefix bits instead, and `Display` renders `10.0.0.5/24`.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct InetAddress {
    ip: IpAddr,
    port: u16,
}

impl InetAddress {
    pub const fn new(ip: IpAddr, port: u16) -> Self {
        Self { ip, port }
    }

    pub const fn ip(&self) -> IpAddr {
        self.ip
    }

    pub const fn port(&self) -> u16 {
        self.port
    }

    /// The port field interpreted as a prefix length, clamped to the family width.
    pub fn netmask_bits(&self) -> u32 {
        u32::from(self.port).min(self.max_bits())
    }

    pub const fn is_v4(&self) -> bool {
        self.ip.is_ipv4()
    }

    pub const fn is_v6(&self) -> bool {
        self.ip.is_ipv6()
    }

    pub fn scope(&self) -> IpScope {
        ip_scope(self.ip)
    }

    /// `0.0.0.0/0` or `::/0`.
    pub fn is_default_route(&self) -> bool {
        self.ip.is_unspecified() && self.port == 0
    }

    /// Whether `ip` falls inside this address's network, using the port as prefix bits.
    pub fn contains(&self, ip: IpAddr) -> bool {
        match (self.ip, ip) {
            (IpAddr::V4(net), IpAddr::V4(ip)) => {
                let mask = prefix_mask_v4(self.netmask_bits());
                (u32::from(net) & mask) == (u32::from(ip) & mask)
            }
            (IpAddr::V6(net), IpAddr::V6(ip)) => {
                let mask = prefix_mask_v6(self.netmask_bits());
                (u128::from(net) & mask) == (u128::from(ip) & mask)
            }
            _ => false,
        }
    }

    /// The network address with host bits cleared.
    pub fn network(&self) -> Self {
        let ip = match self.ip {
            IpAddr::V4(v4) => IpAddr::V4(Ipv4Addr::from(
                u32::from(v4) & prefix_mask_v4(self.netmask_bits()),
            )),
            IpAddr::V6(v6) => IpAddr::V6(Ipv6Addr::from(
                u128::from(v6) & prefix_mask_v6(self.netmask_bits()),
            )),
        };
        Self { ip, port: self.port }
    }

    pub fn to_socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.ip, self.port)
    }

    fn max_bits(&self) -> u32 {
        if self.is_v4() { 32 } else { 128 }
    }
}

fn prefix_mask_v4(bits: u32) -> u32 {
    if bits == 0 { 0 } else { u32::MAX << (32 - bits) }
}

fn prefix_mask_v6(bits: u32) -> u128 {
    if bits == 0 { 0 } else { u128::MAX << (128 - bits) }
}

impl From<SocketAddr> for InetAddress {
    fn from(sa: SocketAddr) -> Self {
        Self::new(sa.ip(), sa.port())
    }
}

impl fmt::Display for InetAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.ip, self.port)
    }
}

impl fmt::Debug for InetAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "InetAddress({self})")
    }
}

impl FromStr for InetAddress {
    type Err = ParseError;

    /// Accepts `ip/port` or a bare `ip` (port 0).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (ip_part, port_part) = match s.rsplit_once('/') {
            Some((ip, port)) => (ip, Some(port)),
            None => (s, None),
        };
        let ip: IpAddr = ip_part
            .parse()
            .map_err(|_| ParseError::InvalidInetAddress(s.into()))?;
        let port = match port_part {
            Some(p) => p
                .parse()
                .map_err(|_| ParseError::InvalidInetAddress(s.into()))?,
            None => 0,
        };
        Ok(Self { ip, port })
    }
}

string_serde!(InetAddress);

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn inet(s: &str) -> InetAddress {
        s.parse().unwrap()
    }

    #[test]
    fn display_uses_slash_port() {
        assert_eq!(inet("10.0.0.5/24").to_string(), "10.0.0.5/24");
        assert_eq!(inet("fd00::1/88").to_string(), "fd00::1/88");
        assert_eq!(inet("192.168.1.1").port(), 0);
    }

    #[test]
    fn rejects_garbage() {
        assert!("10.0.0/24".parse::<InetAddress>().is_err());
        assert!("10.0.0.1/abc".parse::<InetAddress>().is_err());
        assert!("10.0.0.1/70000".parse::<InetAddress>().is_err());
    }

    #[test]
    fn contains_v4() {
        let net = inet("10.1.0.0/16");
        assert!(net.contains("10.1.200.3".parse().unwrap()));
        assert!(!net.contains("10.2.0.1".parse().unwrap()));
        assert!(!net.contains("::1".parse().unwrap()));
    }

    #[test]
    fn contains_v6() {
        let net = inet("fd00:1234::/32");
        assert!(net.contains("fd00:1234:5::1".parse().unwrap()));
        assert!(!net.contains("fd00:1235::1".parse().unwrap()));
    }

    #[test]
    fn zero_prefix_contains_everything_in_family() {
        let any = inet("0.0.0.0/0");
        assert!(any.is_default_route());
        assert!(any.contains("8.8.8.8".parse().unwrap()));
        assert!(!any.contains("2001:db8::1".parse().unwrap()));
    }

    #[test]
    fn network_clears_host_bits() {
        assert_eq!(inet("10.0.0.5/24").network(), inet("10.0.0.0/24"));
        assert_eq!(inet("10.0.0.5/40").netmask_bits(), 32);
    }

    #[test]
    fn scopes() {
        assert_eq!(inet("0.0.0.0").scope(), IpScope::None);
        assert_eq!(inet("127.0.0.1").scope(), IpScope::Loopback);
        assert_eq!(inet("224.0.0.1").scope(), IpScope::Multicast);
        assert_eq!(inet("169.254.3.3").scope(), IpScope::LinkLocal);
        assert_eq!(inet("100.72.0.1").scope(), IpScope::Shared);
        assert_eq!(inet("172.20.0.1").scope(), IpScope::Private);
        assert_eq!(inet("8.8.8.8").scope(), IpScope::Global);
        assert_eq!(inet("fe80::1").scope(), IpScope::LinkLocal);
        assert_eq!(inet("fd12::1").scope(), IpScope::Private);
        assert_eq!(inet("2001:4860::8888").scope(), IpScope::Global);
        assert_eq!(inet("::ffff:10.0.0.1").scope(), IpScope::Private);
    }

    #[test]
    fn serde_as_string() {
        let a = inet("10.0.0.5/24");
        assert_eq!(serde_json::to_string(&a).unwrap(), "\"10.0.0.5/24\"");
    }

    proptest! {
        #[test]
        fn display_parses_back(raw in any::<u32>(), port in any::<u16>()) {
            let a = InetAddress::new(IpAddr::V4(Ipv4Addr::from(raw)), port);
            prop_assert_eq!(a.to_string().parse::<InetAddress>().unwrap(), a);
        }

        #[test]
        fn network_contains_its_own_address(raw in any::<u128>(), bits in 0u16..=128) {
            let a = InetAddress::new(IpAddr::V6(Ipv6Addr::from(raw)), bits);
            prop_assert!(a.contains(a.ip()));
            prop_assert!(a.network().contains(a.ip()));
        }
    }
}
