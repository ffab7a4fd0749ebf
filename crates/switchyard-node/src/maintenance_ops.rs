//! Pure interface maintenance logic.
//!
//! Extracts the decisions of the periodic maintenance pass into testable pure
//! functions. Separates the "what to do" from the "when to do it" (the timer
//! and the engine calls remain in [`crate::maintenance`]).

use std::collections::BTreeSet;
use std::net::{IpAddr, SocketAddr};

use switchyard_core::{InetAddress, InterfaceAddress};

/// The distinct nonzero ports the node listens on, primary first.
pub fn listen_ports(primary: u16, secondary: u16) -> Vec<u16> {
    let mut ports = Vec::with_capacity(2);
    for port in [primary, secondary] {
        if port != 0 && !ports.contains(&port) {
            ports.push(port);
        }
    }
    ports
}

/// Every (address, port) pair that should have a bound socket.
pub fn listen_targets(ips: &BTreeSet<IpAddr>, ports: &[u16]) -> BTreeSet<SocketAddr> {
    ips.iter()
        .flat_map(|ip| ports.iter().map(move |port| SocketAddr::new(*ip, *port)))
        .collect()
}

/// Sockets to open and close to move from `bound` to `desired`.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ListenerPlan {
    pub open: Vec<SocketAddr>,
    pub close: Vec<SocketAddr>,
}

pub fn plan_listeners(desired: &BTreeSet<SocketAddr>, bound: &BTreeSet<SocketAddr>) -> ListenerPlan {
    ListenerPlan {
        open: desired.difference(bound).copied().collect(),
        close: bound.difference(desired).copied().collect(),
    }
}

/// Whether the advertised address list must be pushed to the engine.
///
/// `bound_changed` covers sockets that bound on a retry while the physical
/// addresses stayed the same.
pub fn should_announce(
    physical_changed: bool,
    explicit_changed: bool,
    bound_changed: bool,
    first_pass: bool,
) -> bool {
    first_pass || physical_changed || explicit_changed || bound_changed
}

/// The full list of addresses to advertise.
///
/// Explicit addresses come first and are permanent; bound local sockets
/// follow as non-permanent unless already listed.
pub fn build_interface_addresses(
    explicit: &[InetAddress],
    bound: &BTreeSet<SocketAddr>,
) -> Vec<InterfaceAddress> {
    let mut seen = BTreeSet::new();
    let mut out = Vec::with_capacity(explicit.len() + bound.len());
    for address in explicit {
        if seen.insert(*address) {
            out.push(InterfaceAddress {
                address: *address,
                permanent: true,
            });
        }
    }
    for sa in bound {
        let address = InetAddress::from(*sa);
        if seen.insert(address) {
            out.push(InterfaceAddress {
                address,
                permanent: false,
            });
        }
    }
    out
}

/// Byte ceiling for the info log, or `None` when trimming is disabled.
pub fn log_trim_limit(log_size_max_kib: i64) -> Option<u64> {
    (log_size_max_kib > 0).then(|| (log_size_max_kib as u64).saturating_mul(1024))
}
