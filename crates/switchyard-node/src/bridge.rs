//! Callback entry points invoked by the engine.
//!
//! Each callback carries only the [`NodeHandle`] the engine was launched with.
//! A handle that no longer resolves means the node is being torn down; the
//! callback is then ignored and answers "absent" or "no opinion".
//!
//! Callbacks may arrive on any thread, in any order, including threads outside
//! the tokio runtime. Anything heavier than a lookup is spawned as a tracked
//! task on the node's runtime.

use std::net::IpAddr;

use rand::seq::SliceRandom;

use switchyard_core::{Identity, InetAddress, NetworkConfig, NetworkId};

use crate::engine::{EngineNetworkConfig, Event, VirtualNetworkConfigOp};
use crate::handle::{NodeHandle, nodes};
use crate::store::StateObjectKind;

/// Whether the engine may use a path to `ip`.
///
/// Denied when any blacklisted physical network contains the address.
pub fn path_check(handle: NodeHandle, ip: IpAddr) -> bool {
    let Some(node) = nodes().resolve(handle) else {
        return false;
    };
    let config = node.config.read();
    !config.current.is_blacklisted(ip)
}

/// A configured physical address to try for reaching `identity`.
pub fn path_lookup(handle: NodeHandle, identity: &Identity) -> Option<InetAddress> {
    let node = nodes().resolve(handle)?;
    let config = node.config.read();
    config
        .current
        .try_addresses(identity.address())
        .choose(&mut rand::thread_rng())
        .copied()
}

/// Read a state object.
pub fn state_get(handle: NodeHandle, kind: StateObjectKind, id: &[u64]) -> Option<Vec<u8>> {
    let node = nodes().resolve(handle)?;
    node.store.get(kind, id)
}

/// Store a state object. Absent or empty data deletes it.
pub fn state_put(handle: NodeHandle, kind: StateObjectKind, id: &[u64], data: Option<&[u8]>) {
    let Some(node) = nodes().resolve(handle) else {
        return;
    };
    let result = match data {
        Some(data) if !data.is_empty() => node.store.put(kind, id, data),
        _ => node.store.delete(kind, id),
    };
    if let Err(e) = result {
        node.log.error(&format!("unable to store {kind:?} object: {e}"));
    }
}

/// Delete a state object.
pub fn state_delete(handle: NodeHandle, kind: StateObjectKind, id: &[u64]) {
    state_put(handle, kind, id, None);
}

/// A network's configuration changed.
///
/// `Up` and `Update` are applied on a tracked task unless the revision is
/// older than the one already applied. `Down` and `Destroy` need no action:
/// membership changes go through `Node::leave`.
pub fn virtual_network_config(
    handle: NodeHandle,
    nwid: u64,
    op: VirtualNetworkConfigOp,
    config: Option<&EngineNetworkConfig>,
) {
    let Some(node) = nodes().resolve(handle) else {
        return;
    };
    let id = NetworkId::new(nwid);
    match op {
        VirtualNetworkConfigOp::Up | VirtualNetworkConfigOp::Update => {}
        VirtualNetworkConfigOp::Down | VirtualNetworkConfigOp::Destroy => {
            tracing::debug!(network = %id, ?op, "network config op ignored");
            return;
        }
    }
    let Some(raw) = config else {
        return;
    };
    let Some(network) = node.network(id) else {
        tracing::debug!(network = %id, "config for unknown network ignored");
        return;
    };

    let config = match NetworkConfig::try_from(raw) {
        Ok(config) => config,
        Err(e) => {
            tracing::warn!(network = %id, "invalid network config: {e}");
            return;
        }
    };
    if config.revision < network.revision() {
        tracing::debug!(
            network = %id,
            revision = config.revision,
            applied = network.revision(),
            "discarding stale network config"
        );
        return;
    }

    let spawned = node.shutdown.spawn_tracked(&node.runtime, async move {
        network.update_config(Some(config), None);
    });
    if !spawned {
        tracing::debug!(network = %id, "node closing, config not applied");
    }
}

/// A node-level event.
pub fn event(handle: NodeHandle, event: Event) {
    let Some(node) = nodes().resolve(handle) else {
        return;
    };
    match event {
        Event::Online => {
            node.shutdown.set_online(true);
            node.log.info("node is online");
        }
        Event::Offline => {
            node.shutdown.set_online(false);
            node.log.info("node is offline");
        }
        Event::Trace(msg) => node.log.trace(&msg),
        other @ (Event::Up | Event::Down | Event::UserMessage { .. }) => {
            tracing::debug!(event = ?other, "engine event ignored");
        }
    }
}
