//! The periodic interface and port maintenance pass.
//!
//! Reconciles the host's physical addresses against the sockets the engine
//! has bound and the addresses it advertises. Failures are logged and retried
//! on the next pass.

use std::collections::{BTreeSet, HashSet};
use std::net::{IpAddr, Ipv6Addr, SocketAddr};

use switchyard_core::{InetAddress, Mac};
use switchyard_interfaces::{AddressFilter, PhysicalAddress};
use switchyard_interfaces::netif::{enumerate_physical_addresses, temporary_ipv6_addresses};

use crate::maintenance_ops::{
    build_interface_addresses, listen_ports, listen_targets, log_trim_limit, plan_listeners,
    should_announce,
};
use crate::node::NodeShared;

/// What the previous pass observed and did.
#[derive(Debug, Default)]
pub(crate) struct MaintenanceState {
    /// Sockets the engine currently has bound.
    pub(crate) bound: BTreeSet<SocketAddr>,
    /// Physical addresses that passed filtering.
    pub(crate) physical: BTreeSet<IpAddr>,
    pub(crate) explicit: Vec<InetAddress>,
    pub(crate) announced: bool,
    pub(crate) passes: u64,
}

/// Run one maintenance pass against the host's interfaces.
///
/// Blocks on interface enumeration and log file I/O.
pub(crate) fn run(node: &NodeShared) {
    match enumerate_physical_addresses() {
        Ok(candidates) => reconcile(node, &candidates, &temporary_ipv6_addresses()),
        Err(e) => tracing::warn!("unable to enumerate interfaces: {e}"),
    }
    node.maintenance.lock().passes += 1;
}

/// Bring the engine's sockets and advertised addresses in line with
/// `candidates`, then trim the info log.
pub(crate) fn reconcile(
    node: &NodeShared,
    candidates: &[PhysicalAddress],
    temporary: &HashSet<Ipv6Addr>,
) {
    let (blacklist, explicit, log_size_max) = {
        let config = node.config.read();
        let settings = &config.current.settings;
        (
            settings.interface_prefix_blacklist.clone(),
            settings.explicit_addresses.clone(),
            settings.log_size_max,
        )
    };
    let Some(engine) = node.engine() else {
        return;
    };

    let (own_macs, own_ips) = node.own_interfaces();
    let excluded_macs: HashSet<Mac> = own_macs.into_iter().collect();
    let excluded_ips: HashSet<IpAddr> = own_ips.into_iter().collect();
    let physical = AddressFilter {
        name_blacklist: &blacklist,
        excluded_macs: &excluded_macs,
        excluded_ips: &excluded_ips,
        temporary,
    }
    .apply(candidates);

    let ports = listen_ports(node.ports.0, node.ports.1);
    let desired = listen_targets(&physical, &ports);

    let mut state = node.maintenance.lock();
    let plan = plan_listeners(&desired, &state.bound);
    let mut bound_changed = !plan.close.is_empty();
    for addr in plan.close {
        tracing::debug!(%addr, "closing listener");
        engine.unlisten(addr);
        state.bound.remove(&addr);
    }
    for addr in plan.open {
        match engine.listen(addr) {
            Ok(()) => {
                tracing::debug!(%addr, "listening");
                state.bound.insert(addr);
                bound_changed = true;
            }
            Err(e) => tracing::warn!(%addr, "unable to bind, will retry: {e}"),
        }
    }

    let physical_changed = physical != state.physical;
    let explicit_changed = explicit != state.explicit;
    if should_announce(
        physical_changed,
        explicit_changed,
        bound_changed,
        !state.announced,
    ) {
        let addresses = build_interface_addresses(&explicit, &state.bound);
        tracing::debug!(count = addresses.len(), "announcing interface addresses");
        engine.set_interface_addresses(&addresses);
        state.announced = true;
    }
    state.physical = physical;
    state.explicit = explicit;
    drop(state);

    if let Some(limit) = log_trim_limit(log_size_max) {
        node.log.trim_info(limit);
    }
}
