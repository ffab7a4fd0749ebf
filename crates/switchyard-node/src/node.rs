//! Node lifecycle and the accessors exposed to upper layers.
//!
//! A [`Node`] owns its engine instance, joined networks, local configuration
//! and background tasks. It moves through
//! `Constructing -> Running -> Closing -> Closed`; construction is
//! all-or-nothing and [`Node::close`] tears down in reverse dependency order,
//! releasing the node's handle only after nothing can call back into it.

use std::collections::HashMap;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::runtime::Handle;
use tokio::sync::watch;

use switchyard_core::certificate::SERIAL_NO_SIZE;
use switchyard_core::{
    Address, Certificate, Endpoint, Fingerprint, Identity, LocalCertificate, Locator, Mac,
    NetworkId, NetworkLocalSettings, Peer, SerialNo,
};
use switchyard_interfaces::ports::{
    PORT_SEARCH_ATTEMPTS, check_port, search_primary_port, search_secondary_port,
};
use switchyard_interfaces::{PortSearchOutcome, ShutdownToken};

use crate::engine::{Engine, EngineLauncher};
use crate::error::{NodeError, PortKind};
use crate::handle::{HandleReservation, NodeHandle, nodes};
use crate::local_config::LocalConfig;
use crate::logging::NodeLog;
use crate::maintenance::{self, MaintenanceState};
use crate::network::Network;
use crate::store::StateStore;

/// Interval between interface maintenance passes.
pub const MAINTENANCE_INTERVAL: Duration = Duration::from_secs(30);

const LOCAL_CONFIG_FILE: &str = "local.conf";

/// Lifecycle state of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeState {
    Constructing,
    Running,
    Closing,
    Closed,
}

/// A listener serving the node to outside clients, closed with the node.
pub trait ApiServer: Send + Sync {
    fn close(&self);
}

/// Local configuration plus the one it replaced.
pub(crate) struct ConfigState {
    pub(crate) current: LocalConfig,
    pub(crate) previous: LocalConfig,
}

#[derive(Default)]
pub(crate) struct Networks {
    by_id: HashMap<NetworkId, Arc<Network>>,
    by_mac: HashMap<Mac, NetworkId>,
}

/// State shared between the node, its background tasks and engine callbacks.
pub(crate) struct NodeShared {
    pub(crate) base: PathBuf,
    pub(crate) handle: NodeHandle,
    pub(crate) runtime: Handle,
    pub(crate) store: StateStore,
    pub(crate) log: NodeLog,
    pub(crate) config: RwLock<ConfigState>,
    pub(crate) networks: RwLock<Networks>,
    pub(crate) ports: (u16, u16),
    pub(crate) maintenance: Mutex<MaintenanceState>,
    pub(crate) shutdown: ShutdownToken,
    state: watch::Sender<NodeState>,
    engine: OnceLock<Arc<dyn Engine>>,
    api_servers: Mutex<Vec<Box<dyn ApiServer>>>,
    /// Serializes join and leave so the engine is never asked twice.
    membership: Mutex<()>,
}

impl NodeShared {
    pub(crate) fn engine(&self) -> Option<&Arc<dyn Engine>> {
        self.engine.get()
    }

    pub(crate) fn network(&self, id: NetworkId) -> Option<Arc<Network>> {
        self.networks.read().by_id.get(&id).cloned()
    }

    /// Move a network's MAC index entry from `old` to `new`.
    pub(crate) fn index_mac(&self, id: NetworkId, old: Mac, new: Mac) {
        let mut networks = self.networks.write();
        if networks.by_mac.get(&old) == Some(&id) {
            networks.by_mac.remove(&old);
        }
        if !networks.by_id.contains_key(&id) {
            return;
        }
        if new != Mac::default() {
            networks.by_mac.insert(new, id);
        }
    }

    /// MACs and IPs of the node's own virtual interfaces.
    pub(crate) fn own_interfaces(&self) -> (Vec<Mac>, Vec<IpAddr>) {
        let (networks, macs): (Vec<Arc<Network>>, Vec<Mac>) = {
            let guard = self.networks.read();
            (
                guard.by_id.values().cloned().collect(),
                guard.by_mac.keys().copied().collect(),
            )
        };
        let ips = networks
            .iter()
            .filter_map(|n| n.tap())
            .flat_map(|tap| tap.ips())
            .map(|a| a.ip())
            .collect();
        (macs, ips)
    }

    fn state(&self) -> NodeState {
        *self.state.borrow()
    }
}

impl Drop for NodeShared {
    fn drop(&mut self) {
        // Reached without close(): no strong reference remains, so no callback
        // can resolve this node any more.
        if *self.state.borrow() != NodeState::Closed {
            self.shutdown.signal_stop();
            if let Some(engine) = self.engine.get() {
                engine.shutdown();
            }
            nodes().release(self.handle);
            tracing::warn!(handle = %self.handle, "node dropped without close");
        }
    }
}

/// A running node.
pub struct Node {
    shared: Arc<NodeShared>,
    identity: Identity,
}

impl Node {
    /// Construct and start a node stored under `base`.
    ///
    /// Must be called from within a tokio runtime; background work is
    /// spawned onto it. Any failure releases everything acquired so far.
    pub async fn create(
        base: impl AsRef<Path>,
        launcher: &dyn EngineLauncher,
    ) -> Result<Node, NodeError> {
        let base = base.as_ref().to_path_buf();
        let runtime = Handle::try_current().map_err(|_| NodeError::NoRuntime)?;
        let reservation = HandleReservation::acquire(nodes())?;
        let handle = reservation.handle();

        let store = StateStore::open(&base)?;
        let new_node = !base.join("identity.secret").exists();
        let config_path = base.join(LOCAL_CONFIG_FILE);
        let mut config = LocalConfig::read(&config_path, true, new_node)?;

        let log = NodeLog::open(&base, config.settings.log_size_max >= 0)?;

        match select_ports(&mut config) {
            Ok(true) => config.write(&config_path)?,
            Ok(false) => {}
            Err(e) => {
                log.error(&format!("fatal error: {e}"));
                return Err(e);
            }
        }
        let ports = (config.settings.primary_port, config.settings.secondary_port);

        let shared = Arc::new(NodeShared {
            base: base.clone(),
            handle,
            runtime: runtime.clone(),
            store,
            log,
            config: RwLock::new(ConfigState {
                previous: config.clone(),
                current: config,
            }),
            networks: RwLock::new(Networks::default()),
            ports,
            maintenance: Mutex::new(MaintenanceState::default()),
            shutdown: ShutdownToken::new(),
            state: watch::Sender::new(NodeState::Constructing),
            engine: OnceLock::new(),
            api_servers: Mutex::new(Vec::new()),
            membership: Mutex::new(()),
        });

        // The engine reads its identity through the state callbacks while
        // launching, so the handle must resolve before launch.
        nodes().register(handle, &shared);

        let engine = match launcher.launch(&base, handle) {
            Ok(engine) => engine,
            Err(e) => {
                shared.log.error(&format!("fatal error: unable to start engine: {e}"));
                // Mark closed so dropping the shared state does not release
                // the handle a second time after the reservation does.
                shared.state.send_replace(NodeState::Closed);
                drop(shared);
                drop(reservation);
                return Err(match e {
                    NodeError::EngineInit(_) => e,
                    other => NodeError::EngineInit(other.to_string()),
                });
            }
        };
        let identity = engine.identity();
        let _ = shared.engine.set(engine);

        let task = runtime.spawn(maintenance_loop(Arc::downgrade(&shared)));
        shared.shutdown.add_task(task).await;

        let handle = reservation.keep();
        shared.state.send_replace(NodeState::Running);
        shared.log.info(&format!(
            "node {} started (handle {handle}, ports {}/{}, path {})",
            identity.address(),
            ports.0,
            ports.1,
            base.display()
        ));

        Ok(Node { shared, identity })
    }

    // -- Lifecycle --

    pub fn state(&self) -> NodeState {
        self.shared.state()
    }

    /// Handle identifying this node to the engine.
    pub fn handle(&self) -> NodeHandle {
        self.shared.handle
    }

    pub fn base_path(&self) -> &Path {
        &self.shared.base
    }

    #[cfg(test)]
    pub(crate) fn shared(&self) -> &NodeShared {
        &self.shared
    }

    /// Whether the engine currently reports connectivity.
    pub fn online(&self) -> bool {
        self.shared.shutdown.is_online()
    }

    /// The bound primary and secondary ports (secondary zero when disabled).
    pub fn ports(&self) -> (u16, u16) {
        self.shared.ports
    }

    /// Register a listener to be closed when the node closes.
    pub fn attach_api_server(&self, server: Box<dyn ApiServer>) {
        self.shared.api_servers.lock().push(server);
    }

    /// Wait until every in-flight configuration apply has finished.
    pub async fn flush_pending(&self) {
        self.shared.shutdown.wait_idle().await;
    }

    /// Shut the node down.
    ///
    /// Exactly one caller performs the teardown; concurrent callers wait for
    /// it to finish. When this returns the handle no longer resolves.
    pub async fn close(&self) {
        let shared = &self.shared;
        let won = shared.state.send_if_modified(|state| {
            if *state == NodeState::Running {
                *state = NodeState::Closing;
                true
            } else {
                false
            }
        });
        if !won {
            let mut rx = shared.state.subscribe();
            let _ = rx.wait_for(|s| *s == NodeState::Closed).await;
            return;
        }

        tracing::debug!(handle = %shared.handle, "closing node");
        shared.shutdown.signal_stop();

        let servers: Vec<Box<dyn ApiServer>> = shared.api_servers.lock().drain(..).collect();
        for server in servers {
            server.close();
        }

        if let Some(engine) = shared.engine() {
            engine.shutdown();
        }
        shared.shutdown.join_all().await;
        shared.shutdown.seal_and_wait().await;

        let networks: Vec<Arc<Network>> = {
            let mut guard = shared.networks.write();
            guard.by_mac.clear();
            guard.by_id.drain().map(|(_, n)| n).collect()
        };
        for network in networks {
            network.mark_leaving();
            network.close_tap();
        }

        shared.shutdown.set_online(false);
        nodes().release(shared.handle);
        shared.log.info(&format!("node {} closed", self.identity.address()));
        shared.state.send_replace(NodeState::Closed);
    }

    // -- Identity --

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn address(&self) -> Address {
        self.identity.address()
    }

    pub fn locator(&self) -> Option<Locator> {
        self.shared.engine().and_then(|e| e.locator())
    }

    // -- Networks --

    /// Join a network, or return it if already joined.
    ///
    /// Settings given for an existing network are applied to it.
    pub fn join(
        &self,
        id: NetworkId,
        controller: Option<Fingerprint>,
        settings: Option<NetworkLocalSettings>,
    ) -> Result<Arc<Network>, NodeError> {
        let engine = self.running_engine()?;
        let _membership = self.shared.membership.lock();

        if let Some(existing) = self.shared.network(id) {
            if let Some(settings) = settings {
                existing.set_local_settings(settings);
            }
            return Ok(existing);
        }

        let settings = settings.unwrap_or_else(|| {
            self.shared
                .config
                .read()
                .current
                .network_settings(id)
                .cloned()
                .unwrap_or_default()
        });

        let tap = engine
            .join(id, controller.as_ref())
            .map_err(|e| NodeError::TapInitFailed(e.to_string()))?;
        let device = tap.device_name();
        let network = Arc::new(Network::new(
            id,
            Arc::downgrade(&self.shared),
            tap,
            settings,
        ));
        self.shared
            .networks
            .write()
            .by_id
            .insert(id, Arc::clone(&network));

        self.shared
            .log
            .info(&format!("joined network {id} on {device}"));
        Ok(network)
    }

    /// Leave a network. Late configuration for it is ignored.
    pub fn leave(&self, id: NetworkId) -> Result<(), NodeError> {
        let engine = self.running_engine()?;
        let _membership = self.shared.membership.lock();

        let network = self.shared.network(id);
        if let Some(network) = &network {
            network.mark_leaving();
        }
        engine.leave(id);

        {
            let mut networks = self.shared.networks.write();
            networks.by_id.remove(&id);
            networks.by_mac.retain(|_, nwid| *nwid != id);
        }
        if let Some(network) = network {
            network.close_tap();
            self.shared.log.info(&format!("left network {id}"));
        }
        Ok(())
    }

    /// Joined networks, sorted by id.
    pub fn networks(&self) -> Vec<Arc<Network>> {
        let mut list: Vec<Arc<Network>> =
            self.shared.networks.read().by_id.values().cloned().collect();
        list.sort_by_key(|n| n.id());
        list
    }

    pub fn network(&self, id: NetworkId) -> Option<Arc<Network>> {
        self.shared.network(id)
    }

    /// The network presenting `mac` on this host.
    pub fn network_by_mac(&self, mac: Mac) -> Option<Arc<Network>> {
        let networks = self.shared.networks.read();
        let id = networks.by_mac.get(&mac)?;
        networks.by_id.get(id).cloned()
    }

    // -- Peers --

    /// Peers known to the engine, sorted by address.
    pub fn peers(&self) -> Vec<Peer> {
        let Some(engine) = self.shared.engine() else {
            return Vec::new();
        };
        let mut peers = engine.peers();
        peers.sort_by_key(|p| p.address);
        peers
    }

    /// Look up a peer by fingerprint or bare address.
    pub fn peer(&self, id: impl Into<Fingerprint>) -> Option<Peer> {
        let wanted = id.into();
        self.peers()
            .into_iter()
            .find(|p| wanted.best_specificity_equals(&p.fingerprint))
    }

    pub fn add_peer(&self, identity: &Identity) -> Result<(), NodeError> {
        let engine = self.running_engine()?;
        if engine.add_peer(&identity.to_public()) {
            Ok(())
        } else {
            Err(NodeError::InvalidParameter(format!(
                "peer {} rejected",
                identity.address()
            )))
        }
    }

    /// Ask the engine to contact a peer at `endpoint`.
    pub fn try_peer(
        &self,
        id: impl Into<Fingerprint>,
        endpoint: &Endpoint,
        retries: u32,
    ) -> Result<bool, NodeError> {
        let engine = self.running_engine()?;
        Ok(engine.try_peer(&id.into(), endpoint, retries))
    }

    // -- Certificates --

    pub fn list_certificates(&self) -> Result<Vec<LocalCertificate>, NodeError> {
        Ok(self.running_engine()?.certificates())
    }

    pub fn add_certificate(
        &self,
        certificate: &Certificate,
        local_trust: u32,
    ) -> Result<(), NodeError> {
        self.running_engine()?
            .add_certificate(certificate, local_trust)?;
        Ok(())
    }

    /// Delete a certificate by serial number. Returns whether it existed.
    pub fn delete_certificate(&self, serial: &[u8]) -> Result<bool, NodeError> {
        let serial = SerialNo::try_from(serial).map_err(|_| {
            NodeError::InvalidParameter(format!(
                "serial number must be {SERIAL_NO_SIZE} bytes, got {}",
                serial.len()
            ))
        })?;
        Ok(self.running_engine()?.delete_certificate(&serial))
    }

    // -- Local configuration --

    pub fn local_config(&self) -> LocalConfig {
        self.shared.config.read().current.clone()
    }

    /// The configuration that the current one replaced.
    pub fn previous_local_config(&self) -> LocalConfig {
        self.shared.config.read().previous.clone()
    }

    /// Install and persist a new local configuration.
    ///
    /// Per-network settings apply immediately. Returns whether a restart is
    /// needed for the rest to take effect.
    pub fn set_local_config(&self, config: LocalConfig) -> Result<bool, NodeError> {
        let restart_required = {
            let mut state = self.shared.config.write();
            config.write(&self.shared.base.join(LOCAL_CONFIG_FILE))?;
            let restart_required = state.current.restart_required(&config);
            state.previous = std::mem::replace(&mut state.current, config.clone());
            restart_required
        };

        for (id, settings) in &config.network {
            if let Some(network) = self.shared.network(*id) {
                network.set_local_settings(settings.clone());
            }
        }
        if restart_required {
            self.shared
                .log
                .info("local configuration changed; restart required");
        }
        Ok(restart_required)
    }

    /// Physical addresses seen by the most recent maintenance pass, sorted.
    pub fn local_interface_addresses(&self) -> Vec<IpAddr> {
        self.shared
            .maintenance
            .lock()
            .physical
            .iter()
            .copied()
            .collect()
    }

    fn running_engine(&self) -> Result<Arc<dyn Engine>, NodeError> {
        if self.state() != NodeState::Running {
            return Err(NodeError::NotRunning);
        }
        self.shared.engine().cloned().ok_or(NodeError::NotRunning)
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("address", &self.identity.address())
            .field("handle", &self.shared.handle)
            .field("state", &self.state())
            .finish()
    }
}

/// Pick the primary and secondary ports, updating `config` if either moved.
///
/// Returns whether the configuration changed.
fn select_ports(config: &mut LocalConfig) -> Result<bool, NodeError> {
    let settings = &mut config.settings;
    let mut rng = rand::thread_rng();

    let primary = if settings.port_search {
        search_primary_port(settings.primary_port, check_port, &mut rng).ok_or(
            NodeError::NoAvailablePort {
                which: PortKind::Primary,
                attempts: PORT_SEARCH_ATTEMPTS,
            },
        )?
    } else if check_port(settings.primary_port) {
        PortSearchOutcome {
            port: settings.primary_port,
            changed: false,
            attempts: 1,
        }
    } else {
        return Err(NodeError::NoAvailablePort {
            which: PortKind::Primary,
            attempts: 1,
        });
    };
    if primary.changed {
        tracing::info!(
            configured = settings.primary_port,
            port = primary.port,
            attempts = primary.attempts,
            "primary port unavailable, using alternate"
        );
        settings.primary_port = primary.port;
    }
    let mut changed = primary.changed;

    if settings.secondary_port == 0 {
        // Disabled.
    } else if !settings.port_search {
        let secondary = settings.secondary_port;
        if secondary == primary.port || !check_port(secondary) {
            tracing::warn!(port = secondary, "secondary port unavailable, keeping it");
        }
    } else {
        let secondary = search_secondary_port(
            settings.secondary_port,
            |p| p != primary.port && check_port(p),
            &mut rng,
        )
        .ok_or(NodeError::NoAvailablePort {
            which: PortKind::Secondary,
            attempts: PORT_SEARCH_ATTEMPTS,
        })?;
        if secondary.changed {
            tracing::info!(
                configured = settings.secondary_port,
                port = secondary.port,
                "secondary port unavailable, using alternate"
            );
            settings.secondary_port = secondary.port;
            changed = true;
        }
    }

    Ok(changed)
}

async fn maintenance_loop(node: Weak<NodeShared>) {
    let Some(mut stop) = node.upgrade().map(|n| n.shutdown.subscribe()) else {
        return;
    };
    let mut interval = tokio::time::interval(MAINTENANCE_INTERVAL);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                let Some(node) = node.upgrade() else {
                    return;
                };
                if node.shutdown.is_stopped() {
                    return;
                }
                let pass = tokio::task::spawn_blocking(move || maintenance::run(&node));
                if let Err(e) = pass.await {
                    tracing::warn!("maintenance pass failed: {e}");
                }
            }
            _ = stop.changed() => {
                tracing::debug!("maintenance loop stopping");
                return;
            }
        }
    }
}
