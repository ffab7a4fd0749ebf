//! The boundary to the external packet and crypto engine.
//!
//! The node calls into the engine synchronously through [`Engine`]. The engine
//! calls back through the free functions in [`crate::bridge`], carrying only
//! the [`NodeHandle`] it was launched with.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use switchyard_core::{
    Address, Certificate, CertificateError, Endpoint, Fingerprint, Identity, InetAddress,
    InterfaceAddress, LocalCertificate, Locator, Mac, MulticastGroup, NetworkConfig, NetworkId,
    NetworkStatus, NetworkType, Peer, Route, SerialNo,
};
use switchyard_interfaces::{InterfaceError, Tap};

use crate::error::NodeError;
use crate::handle::NodeHandle;

/// Calls the node makes into a running engine instance.
///
/// Every method may be called from any thread and must not call back into
/// the node synchronously while holding engine-internal locks.
pub trait Engine: Send + Sync {
    /// The node's identity, including its secret key.
    fn identity(&self) -> Identity;

    /// Join a network and create its virtual interface.
    fn join(
        &self,
        id: NetworkId,
        controller: Option<&Fingerprint>,
    ) -> Result<Arc<dyn Tap>, InterfaceError>;

    fn leave(&self, id: NetworkId);

    fn peers(&self) -> Vec<Peer>;

    /// Add a peer by identity. Returns false if the engine refuses it.
    fn add_peer(&self, identity: &Identity) -> bool;

    /// Attempt contact with a peer at `endpoint`.
    fn try_peer(&self, fingerprint: &Fingerprint, endpoint: &Endpoint, retries: u32) -> bool;

    fn certificates(&self) -> Vec<LocalCertificate>;

    fn add_certificate(
        &self,
        certificate: &Certificate,
        local_trust: u32,
    ) -> Result<(), CertificateError>;

    /// Remove a certificate. Returns whether it was present.
    fn delete_certificate(&self, serial: &SerialNo) -> bool;

    /// Replace the full set of local addresses the engine may advertise.
    fn set_interface_addresses(&self, addresses: &[InterfaceAddress]);

    fn multicast_subscribe(&self, id: NetworkId, group: MulticastGroup);

    fn multicast_unsubscribe(&self, id: NetworkId, group: MulticastGroup);

    /// Bind a UDP socket on a specific local address.
    fn listen(&self, addr: SocketAddr) -> Result<(), InterfaceError>;

    /// Close a socket previously opened with [`listen`](Self::listen).
    fn unlisten(&self, addr: SocketAddr);

    fn locator(&self) -> Option<Locator>;

    /// Stop the engine. No callback may arrive once this returns.
    fn shutdown(&self);
}

/// Constructs engine instances for new nodes.
pub trait EngineLauncher: Send + Sync {
    /// Start an engine for the node stored under `base`.
    ///
    /// The engine may use the state-object callbacks with `handle` before
    /// this returns, e.g. to load or store its identity.
    fn launch(&self, base: &Path, handle: NodeHandle) -> Result<Arc<dyn Engine>, NodeError>;
}

/// What changed about a network, as reported with a configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VirtualNetworkConfigOp {
    Up,
    Update,
    Down,
    Destroy,
}

/// Asynchronous node-level events raised by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Up,
    Offline,
    Online,
    Down,
    Trace(String),
    UserMessage {
        source: Address,
        type_id: u64,
        data: Vec<u8>,
    },
}

/// A managed route in the engine's representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineRoute {
    /// Destination; the port holds prefix bits.
    pub target: SocketAddr,
    /// Gateway, or `None` / unspecified for a direct route.
    pub via: Option<SocketAddr>,
    pub flags: u16,
    pub metric: u16,
}

/// A network configuration in the engine's representation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineNetworkConfig {
    pub nwid: u64,
    pub mac: u64,
    pub name: String,
    pub status: i32,
    pub net_type: i32,
    pub mtu: u32,
    pub bridge: bool,
    pub broadcast_enabled: bool,
    pub netconf_revision: u64,
    /// Assigned addresses; the port holds prefix bits.
    pub assigned_addresses: Vec<SocketAddr>,
    pub routes: Vec<EngineRoute>,
}

impl TryFrom<&EngineNetworkConfig> for NetworkConfig {
    type Error = NodeError;

    fn try_from(raw: &EngineNetworkConfig) -> Result<Self, Self::Error> {
        let status = NetworkStatus::from_code(raw.status).ok_or_else(|| {
            NodeError::InvalidParameter(format!("unknown network status {}", raw.status))
        })?;
        let network_type = NetworkType::from_code(raw.net_type).ok_or_else(|| {
            NodeError::InvalidParameter(format!("unknown network type {}", raw.net_type))
        })?;
        let routes = raw
            .routes
            .iter()
            .map(|r| Route {
                target: InetAddress::from(r.target),
                via: r.via.map(|v| v.ip()).filter(|ip| !ip.is_unspecified()),
                flags: r.flags,
                metric: r.metric,
            })
            .collect();
        Ok(NetworkConfig {
            id: NetworkId::new(raw.nwid),
            mac: Mac::new(raw.mac),
            name: raw.name.clone(),
            status,
            network_type,
            mtu: raw.mtu,
            bridge: raw.bridge,
            broadcast_enabled: raw.broadcast_enabled,
            revision: raw.netconf_revision,
            assigned_addresses: raw
                .assigned_addresses
                .iter()
                .copied()
                .map(InetAddress::from)
                .collect(),
            routes,
        })
    }
}
