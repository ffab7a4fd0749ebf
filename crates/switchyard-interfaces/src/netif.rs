//! Physical interface address enumeration.
//!
//! Wraps `getifaddrs` to list the host's IP addresses together with the
//! owning interface name and MAC, and provides the filters used to decide
//! which of them the node should bind to and advertise.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::net::{IpAddr, Ipv6Addr};

use switchyard_core::Mac;

/// An IP address found on a local interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhysicalAddress {
    /// OS interface name (e.g. "eth0", "en0").
    pub interface: String,
    /// Hardware address of the interface, when it has one.
    pub mac: Option<Mac>,
    pub ip: IpAddr,
}

/// Enumerate every IPv4/IPv6 address on every local interface.
///
/// Results are sorted by interface name, then address.
#[cfg(unix)]
pub fn enumerate_physical_addresses() -> std::io::Result<Vec<PhysicalAddress>> {
    use std::net::{SocketAddrV4, SocketAddrV6};

    let addrs: Vec<nix::ifaddrs::InterfaceAddress> = nix::ifaddrs::getifaddrs()
        .map_err(std::io::Error::other)?
        .collect();

    // First pass: link-layer addresses keyed by interface name.
    let mut macs: HashMap<String, Mac> = HashMap::new();
    for ifaddr in &addrs {
        if let Some(storage) = ifaddr.address.as_ref()
            && let Some(link) = storage.as_link_addr()
            && let Some(octets) = link.addr()
            && octets != [0u8; 6]
        {
            macs.insert(ifaddr.interface_name.clone(), Mac::from_octets(octets));
        }
    }

    let mut result = Vec::new();
    for ifaddr in &addrs {
        let Some(storage) = ifaddr.address.as_ref() else {
            continue;
        };
        let ip = if let Some(sin) = storage.as_sockaddr_in() {
            IpAddr::V4(*SocketAddrV4::from(*sin).ip())
        } else if let Some(sin6) = storage.as_sockaddr_in6() {
            IpAddr::V6(*SocketAddrV6::from(*sin6).ip())
        } else {
            continue;
        };
        result.push(PhysicalAddress {
            interface: ifaddr.interface_name.clone(),
            mac: macs.get(&ifaddr.interface_name).copied(),
            ip,
        });
    }

    result.sort_by(|a, b| a.interface.cmp(&b.interface).then(a.ip.cmp(&b.ip)));
    result.dedup();
    Ok(result)
}

#[cfg(not(unix))]
pub fn enumerate_physical_addresses() -> std::io::Result<Vec<PhysicalAddress>> {
    Ok(Vec::new())
}

/// Whether an address is eligible for binding: not unspecified, loopback,
/// multicast, or link-local.
pub fn is_usable_address(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            !(v4.is_unspecified() || v4.is_loopback() || v4.is_multicast() || v4.is_link_local())
        }
        IpAddr::V6(v6) => {
            let seg0 = v6.segments()[0];
            !(v6.is_unspecified()
                || v6.is_loopback()
                || v6.is_multicast()
                || (seg0 & 0xffc0) == 0xfe80)
        }
    }
}

/// Case-insensitive prefix match of an interface name against a blacklist.
pub fn name_is_blacklisted(name: &str, prefixes: &[String]) -> bool {
    let name = name.to_lowercase();
    prefixes
        .iter()
        .any(|p| !p.is_empty() && name.starts_with(&p.to_lowercase()))
}

/// IPv6 temporary (privacy extension) addresses currently configured.
#[cfg(target_os = "linux")]
pub fn temporary_ipv6_addresses() -> HashSet<Ipv6Addr> {
    match std::fs::read_to_string("/proc/net/if_inet6") {
        Ok(contents) => parse_if_inet6(&contents),
        Err(e) => {
            tracing::debug!("unable to read /proc/net/if_inet6: {e}");
            HashSet::new()
        }
    }
}

#[cfg(not(target_os = "linux"))]
pub fn temporary_ipv6_addresses() -> HashSet<Ipv6Addr> {
    HashSet::new()
}

/// `IFA_F_TEMPORARY` from the kernel's address flags.
const IFA_F_TEMPORARY: u32 = 0x01;

/// Parse `/proc/net/if_inet6` lines:
/// `<32 hex addr> <ifindex> <prefix len> <scope> <flags> <name>`.
fn parse_if_inet6(contents: &str) -> HashSet<Ipv6Addr> {
    let mut temporary = HashSet::new();
    for line in contents.lines() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 6 || fields[0].len() != 32 {
            continue;
        }
        let Ok(flags) = u32::from_str_radix(fields[4], 16) else {
            continue;
        };
        if flags & IFA_F_TEMPORARY == 0 {
            continue;
        }
        if let Ok(raw) = u128::from_str_radix(fields[0], 16) {
            temporary.insert(Ipv6Addr::from(raw));
        }
    }
    temporary
}

/// Exclusion rules applied to enumerated addresses.
#[derive(Debug, Clone, Copy)]
pub struct AddressFilter<'a> {
    /// Interface name prefixes to skip.
    pub name_blacklist: &'a [String],
    /// MACs of interfaces this node created itself.
    pub excluded_macs: &'a HashSet<Mac>,
    /// IPs assigned to this node's own virtual interfaces.
    pub excluded_ips: &'a HashSet<IpAddr>,
    /// Temporary IPv6 addresses.
    pub temporary: &'a HashSet<Ipv6Addr>,
}

impl AddressFilter<'_> {
    /// The set of addresses that pass every rule.
    pub fn apply(&self, candidates: &[PhysicalAddress]) -> BTreeSet<IpAddr> {
        candidates
            .iter()
            .filter(|a| !name_is_blacklisted(&a.interface, self.name_blacklist))
            .filter(|a| !a.mac.is_some_and(|m| self.excluded_macs.contains(&m)))
            .filter(|a| is_usable_address(a.ip))
            .filter(|a| !self.excluded_ips.contains(&a.ip))
            .filter(|a| match a.ip {
                IpAddr::V6(v6) => !self.temporary.contains(&v6),
                IpAddr::V4(_) => true,
            })
            .map(|a| a.ip)
            .collect()
    }
}
