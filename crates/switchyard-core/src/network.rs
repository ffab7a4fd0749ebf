//! Virtual network configuration types and local management policy.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use serde::{Deserialize, Serialize};

use crate::inet::{InetAddress, IpScope};
use crate::types::{Mac, NetworkId};

/// Authorization state of a joined network as reported by its controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NetworkStatus {
    #[default]
    RequestingConfiguration,
    Ok,
    AccessDenied,
    NotFound,
}

impl NetworkStatus {
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(NetworkStatus::RequestingConfiguration),
            1 => Some(NetworkStatus::Ok),
            2 => Some(NetworkStatus::AccessDenied),
            3 => Some(NetworkStatus::NotFound),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkType {
    #[default]
    Private,
    Public,
}

impl NetworkType {
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(NetworkType::Private),
            1 => Some(NetworkType::Public),
            _ => None,
        }
    }
}

/// A managed route pushed by a network controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Route {
    /// Destination network; the port holds prefix bits.
    pub target: InetAddress,
    /// Gateway, or `None` for a route directly on the virtual interface.
    #[serde(default)]
    pub via: Option<IpAddr>,
    #[serde(default)]
    pub flags: u16,
    #[serde(default)]
    pub metric: u16,
}

/// A multicast group: a MAC plus an additional distinguishing information field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MulticastGroup {
    pub mac: Mac,
    pub adi: u32,
}

impl MulticastGroup {
    /// The ARP broadcast group for an IPv4 address, scoped by the address itself.
    pub fn for_ipv4_arp(ip: Ipv4Addr) -> Self {
        Self {
            mac: Mac::BROADCAST,
            adi: u32::from(ip),
        }
    }

    /// The NDP solicited-node group for an IPv6 address.
    pub fn for_ipv6_ndp(ip: Ipv6Addr) -> Self {
        let o = ip.octets();
        Self {
            mac: Mac::from_octets([0x33, 0x33, 0xff, o[13], o[14], o[15]]),
            adi: 0,
        }
    }

    /// The address-resolution group for any IP.
    pub fn for_ip(ip: IpAddr) -> Self {
        match ip {
            IpAddr::V4(v4) => Self::for_ipv4_arp(v4),
            IpAddr::V6(v6) => Self::for_ipv6_ndp(v6),
        }
    }
}

/// Configuration of a joined network as delivered by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkConfig {
    pub id: NetworkId,
    pub mac: Mac,
    pub name: String,
    pub status: NetworkStatus,
    #[serde(rename = "type")]
    pub network_type: NetworkType,
    pub mtu: u32,
    pub bridge: bool,
    pub broadcast_enabled: bool,
    pub revision: u64,
    pub assigned_addresses: Vec<InetAddress>,
    pub routes: Vec<Route>,
}

/// Per-network local policy on what a controller may configure on this host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NetworkLocalSettings {
    /// Allow managed IPs and routes at all.
    pub allow_managed: bool,
    /// Allow managed IPs and routes in global address space.
    pub allow_global: bool,
    /// Allow the network to override the default route.
    pub allow_default: bool,
    /// When non-empty, managed targets must fall within one of these networks.
    pub allow_managed_whitelist: Vec<InetAddress>,
}

impl Default for NetworkLocalSettings {
    fn default() -> Self {
        Self {
            allow_managed: true,
            allow_global: false,
            allow_default: false,
            allow_managed_whitelist: Vec::new(),
        }
    }
}

impl NetworkLocalSettings {
    /// Whether a managed address or route target may be applied locally.
    pub fn permits(&self, target: &InetAddress) -> bool {
        if !self.allow_managed {
            return false;
        }
        if !self.allow_managed_whitelist.is_empty()
            && !self.allow_managed_whitelist.iter().any(|w| {
                w.is_v4() == target.is_v4()
                    && w.contains(target.ip())
                    && w.netmask_bits() <= target.netmask_bits()
            })
        {
            return false;
        }
        if target.is_default_route() {
            return self.allow_default;
        }
        match target.scope() {
            IpScope::None | IpScope::Multicast | IpScope::Loopback | IpScope::LinkLocal => false,
            IpScope::Global => self.allow_global,
            IpScope::Shared | IpScope::Private => true,
        }
    }
}

/// A local address announced to the engine for use in reachability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InterfaceAddress {
    pub address: InetAddress,
    /// Permanent addresses may be published in the node's locator.
    pub permanent: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inet(s: &str) -> InetAddress {
        s.parse().unwrap()
    }

    #[test]
    fn status_and_type_codes() {
        assert_eq!(NetworkStatus::from_code(1), Some(NetworkStatus::Ok));
        assert_eq!(NetworkStatus::from_code(9), None);
        assert_eq!(NetworkType::from_code(1), Some(NetworkType::Public));
        assert_eq!(NetworkType::from_code(-1), None);
    }

    #[test]
    fn arp_group_uses_broadcast_mac_and_ip_adi() {
        let g = MulticastGroup::for_ip("10.0.0.5".parse().unwrap());
        assert_eq!(g.mac, Mac::BROADCAST);
        assert_eq!(g.adi, 0x0a00_0005);
    }

    #[test]
    fn ndp_group_uses_solicited_node_mac() {
        let g = MulticastGroup::for_ip("fd00::12:3456".parse().unwrap());
        assert_eq!(g.mac.to_string(), "33:33:ff:12:34:56");
        assert_eq!(g.adi, 0);
    }

    #[test]
    fn default_settings_allow_private_only() {
        let s = NetworkLocalSettings::default();
        assert!(s.permits(&inet("10.0.0.5/24")));
        assert!(s.permits(&inet("fd00::1/88")));
        assert!(!s.permits(&inet("8.8.8.8/32")));
        assert!(!s.permits(&inet("0.0.0.0/0")));
        assert!(!s.permits(&inet("169.254.1.1/16")));
        assert!(!s.permits(&inet("127.0.0.1/8")));
    }

    #[test]
    fn global_and_default_flags() {
        let s = NetworkLocalSettings {
            allow_global: true,
            allow_default: true,
            ..Default::default()
        };
        assert!(s.permits(&inet("8.8.8.8/32")));
        assert!(s.permits(&inet("0.0.0.0/0")));
        assert!(s.permits(&inet("::/0")));
    }

    #[test]
    fn managed_disabled_blocks_everything() {
        let s = NetworkLocalSettings {
            allow_managed: false,
            allow_global: true,
            allow_default: true,
            ..Default::default()
        };
        assert!(!s.permits(&inet("10.0.0.5/24")));
        assert!(!s.permits(&inet("0.0.0.0/0")));
    }

    #[test]
    fn whitelist_requires_containment_and_narrower_prefix() {
        let s = NetworkLocalSettings {
            allow_managed_whitelist: vec![inet("10.0.0.0/16")],
            ..Default::default()
        };
        assert!(s.permits(&inet("10.0.3.4/24")));
        assert!(!s.permits(&inet("10.0.3.4/8")));
        assert!(!s.permits(&inet("192.168.1.1/24")));
        assert!(!s.permits(&inet("fd00::1/64")));
    }

    #[test]
    fn local_settings_json_names() {
        let json = serde_json::to_value(NetworkLocalSettings::default()).unwrap();
        assert_eq!(json["allowManaged"], true);
        assert_eq!(json["allowGlobal"], false);
        let parsed: NetworkLocalSettings =
            serde_json::from_str(r#"{"allowGlobal":true}"#).unwrap();
        assert!(parsed.allow_managed);
        assert!(parsed.allow_global);
    }
}
