//! Per-network state: applied configuration, managed addresses and routes,
//! multicast subscriptions, and the virtual interface.
//!
//! A [`Network`] is created on join and dropped from the node on leave. It
//! changes only through [`Network::update_config`], which callers reach
//! either from the engine's configuration callback or from explicit local
//! settings changes. Updates on one network are serialized by its state lock.

use std::collections::BTreeSet;
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use switchyard_core::{
    InetAddress, MulticastGroup, NetworkConfig, NetworkId, NetworkLocalSettings, Route,
};
use switchyard_interfaces::Tap;

use crate::node::NodeShared;

struct NetworkState {
    config: NetworkConfig,
    settings: NetworkLocalSettings,
    /// Addresses this node installed on the tap.
    managed_ips: BTreeSet<InetAddress>,
    /// Routes this node installed on the tap.
    managed_routes: BTreeSet<Route>,
    multicast: BTreeSet<MulticastGroup>,
}

/// A joined virtual network.
pub struct Network {
    id: NetworkId,
    node: Weak<NodeShared>,
    tap: Mutex<Option<Arc<dyn Tap>>>,
    state: Mutex<NetworkState>,
    revision: AtomicU64,
    leaving: AtomicBool,
}

impl Network {
    pub(crate) fn new(
        id: NetworkId,
        node: Weak<NodeShared>,
        tap: Arc<dyn Tap>,
        settings: NetworkLocalSettings,
    ) -> Self {
        Self {
            id,
            node,
            tap: Mutex::new(Some(tap)),
            state: Mutex::new(NetworkState {
                config: NetworkConfig {
                    id,
                    ..NetworkConfig::default()
                },
                settings,
                managed_ips: BTreeSet::new(),
                managed_routes: BTreeSet::new(),
                multicast: BTreeSet::new(),
            }),
            revision: AtomicU64::new(0),
            leaving: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> NetworkId {
        self.id
    }

    /// The most recently applied configuration.
    pub fn config(&self) -> NetworkConfig {
        self.state.lock().config.clone()
    }

    /// Revision of the applied configuration. Never decreases.
    pub fn revision(&self) -> u64 {
        self.revision.load(Ordering::Acquire)
    }

    pub fn local_settings(&self) -> NetworkLocalSettings {
        self.state.lock().settings.clone()
    }

    /// Replace the local policy and re-apply the current configuration.
    pub fn set_local_settings(&self, settings: NetworkLocalSettings) {
        self.update_config(None, Some(settings));
    }

    pub fn tap(&self) -> Option<Arc<dyn Tap>> {
        self.tap.lock().clone()
    }

    pub fn managed_ips(&self) -> Vec<InetAddress> {
        self.state.lock().managed_ips.iter().copied().collect()
    }

    pub fn managed_routes(&self) -> Vec<Route> {
        self.state.lock().managed_routes.iter().copied().collect()
    }

    pub fn multicast_subscriptions(&self) -> Vec<MulticastGroup> {
        self.state.lock().multicast.iter().copied().collect()
    }

    pub fn is_leaving(&self) -> bool {
        self.leaving.load(Ordering::Acquire)
    }

    /// Apply a new configuration and/or local policy.
    ///
    /// A configuration older than the applied one is discarded, as is any
    /// update once the network is leaving.
    pub fn update_config(
        &self,
        config: Option<NetworkConfig>,
        settings: Option<NetworkLocalSettings>,
    ) {
        let mut state = self.state.lock();
        if self.is_leaving() {
            tracing::debug!(network = %self.id, "ignoring update for leaving network");
            return;
        }

        let mut mac_changed = None;
        if let Some(config) = config {
            let applied = self.revision();
            if config.revision < applied {
                tracing::debug!(
                    network = %self.id,
                    revision = config.revision,
                    applied,
                    "discarding stale network config"
                );
                return;
            }
            if config.mac != state.config.mac {
                mac_changed = Some((state.config.mac, config.mac));
            }
            self.revision.store(config.revision, Ordering::Release);
            tracing::debug!(
                network = %self.id,
                revision = config.revision,
                status = ?config.status,
                "applying network config"
            );
            state.config = config;
        }
        if let Some(settings) = settings {
            state.settings = settings;
        }

        let node = self.node.upgrade();
        if let (Some(node), Some((old, new))) = (node.as_ref(), mac_changed) {
            node.index_mac(self.id, old, new);
        }

        self.apply_managed(&mut state, node.as_deref());
    }

    /// Reconcile tap addresses, routes and multicast groups with the state.
    fn apply_managed(&self, state: &mut NetworkState, node: Option<&NodeShared>) {
        let Some(tap) = self.tap() else {
            return;
        };

        let wanted_ips: BTreeSet<InetAddress> = state
            .config
            .assigned_addresses
            .iter()
            .filter(|a| state.settings.permits(a))
            .copied()
            .collect();

        for ip in state.managed_ips.clone().difference(&wanted_ips) {
            match tap.remove_ip(ip) {
                Ok(()) => {
                    state.managed_ips.remove(ip);
                }
                Err(e) => tracing::warn!(network = %self.id, %ip, "unable to remove address: {e}"),
            }
        }
        for ip in wanted_ips.difference(&state.managed_ips.clone()) {
            match tap.add_ip(ip) {
                Ok(()) => {
                    state.managed_ips.insert(*ip);
                }
                Err(e) => tracing::warn!(network = %self.id, %ip, "unable to add address: {e}"),
            }
        }

        let own: BTreeSet<IpAddr> = wanted_ips.iter().map(InetAddress::ip).collect();
        let wanted_routes: BTreeSet<Route> = state
            .config
            .routes
            .iter()
            .filter(|r| state.settings.permits(&r.target))
            .filter(|r| !r.via.is_some_and(|via| own.contains(&via)))
            .copied()
            .collect();

        for route in state.managed_routes.clone().difference(&wanted_routes) {
            match tap.remove_route(route) {
                Ok(()) => {
                    state.managed_routes.remove(route);
                }
                Err(e) => tracing::warn!(
                    network = %self.id,
                    target = %route.target,
                    "unable to remove route: {e}"
                ),
            }
        }
        for route in wanted_routes.difference(&state.managed_routes.clone()) {
            match tap.add_route(route) {
                Ok(()) => {
                    state.managed_routes.insert(*route);
                }
                Err(e) => tracing::warn!(
                    network = %self.id,
                    target = %route.target,
                    "unable to add route: {e}"
                ),
            }
        }

        let wanted_groups: BTreeSet<MulticastGroup> = state
            .managed_ips
            .iter()
            .map(|a| MulticastGroup::for_ip(a.ip()))
            .collect();
        if let Some(engine) = node.and_then(NodeShared::engine) {
            for group in state.multicast.difference(&wanted_groups) {
                engine.multicast_unsubscribe(self.id, *group);
            }
            for group in wanted_groups.difference(&state.multicast) {
                engine.multicast_subscribe(self.id, *group);
            }
            state.multicast = wanted_groups;
        }
    }

    /// Stop accepting updates. Returns whether this call made the change.
    pub(crate) fn mark_leaving(&self) -> bool {
        !self.leaving.swap(true, Ordering::AcqRel)
    }

    /// Tear down the tap after the network has been marked leaving.
    pub(crate) fn close_tap(&self) {
        // Waits for an in-progress apply to finish.
        let mut state = self.state.lock();
        if let Some(tap) = self.tap.lock().take() {
            tap.set_enabled(false);
            tap.close();
        }
        state.managed_ips.clear();
        state.managed_routes.clear();
        state.multicast.clear();
    }
}

impl std::fmt::Debug for Network {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Network")
            .field("id", &self.id)
            .field("revision", &self.revision())
            .field("leaving", &self.is_leaving())
            .finish()
    }
}
