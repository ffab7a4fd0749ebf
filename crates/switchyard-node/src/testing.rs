//! In-memory engine for driving nodes in tests.
//!
//! [`MockEngine`] behaves like a real engine at the boundary: on launch it
//! loads its identity through the state-object callbacks (creating and
//! storing a new one if none exists), hands out [`MemoryTap`]s on join, and
//! records everything the node asks of it. Tests use it to deliver any
//! callback the engine can make.

use std::collections::{BTreeMap, BTreeSet};
use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use rand::Rng;

use switchyard_core::{
    Address, Certificate, CertificateError, Endpoint, Fingerprint, Identity, IdentityType,
    InterfaceAddress, LocalCertificate, Locator, Mac, MulticastGroup, NetworkId, Peer, SerialNo,
};
use switchyard_interfaces::{InterfaceError, MemoryTap, Tap};

use crate::bridge;
use crate::engine::{Engine, EngineLauncher, EngineNetworkConfig, EngineRoute, Event};
use crate::engine::VirtualNetworkConfigOp;
use crate::error::NodeError;
use crate::handle::NodeHandle;
use crate::store::StateObjectKind;

#[derive(Default)]
struct MockState {
    taps: BTreeMap<NetworkId, Arc<MemoryTap>>,
    left: Vec<NetworkId>,
    peers: Vec<Peer>,
    certificates: Vec<LocalCertificate>,
    interface_addresses: Vec<InterfaceAddress>,
    listening: BTreeSet<SocketAddr>,
    multicast: BTreeSet<(NetworkId, MulticastGroup)>,
    tried: Vec<(Fingerprint, Endpoint, u32)>,
}

/// An engine that keeps all of its state in memory.
pub struct MockEngine {
    handle: NodeHandle,
    identity: Identity,
    state: Mutex<MockState>,
    fail_join: AtomicBool,
    fail_listen: AtomicBool,
    shut_down: AtomicBool,
}

impl MockEngine {
    /// Start an engine for the node behind `handle`.
    ///
    /// The identity is read from `identity.secret` through the state
    /// callbacks, or generated and written back when absent.
    pub fn start(handle: NodeHandle) -> Result<Self, NodeError> {
        let stored = bridge::state_get(handle, StateObjectKind::IdentitySecret, &[])
            .and_then(|bytes| String::from_utf8(bytes).ok())
            .and_then(|s| s.parse::<Identity>().ok())
            .filter(Identity::has_private);

        let identity = match stored {
            Some(identity) => identity,
            None => {
                let identity = generate_identity();
                let secret = identity
                    .to_secret_string()
                    .ok_or_else(|| NodeError::EngineInit("identity has no secret".into()))?;
                bridge::state_put(
                    handle,
                    StateObjectKind::IdentitySecret,
                    &[],
                    Some(secret.as_bytes()),
                );
                identity
            }
        };
        bridge::state_put(
            handle,
            StateObjectKind::IdentityPublic,
            &[],
            Some(identity.to_public_string().as_bytes()),
        );

        Ok(Self {
            handle,
            identity,
            state: Mutex::new(MockState::default()),
            fail_join: AtomicBool::new(false),
            fail_listen: AtomicBool::new(false),
            shut_down: AtomicBool::new(false),
        })
    }

    pub fn handle(&self) -> NodeHandle {
        self.handle
    }

    /// Make subsequent joins fail as if the tap could not be created.
    pub fn set_fail_join(&self, fail: bool) {
        self.fail_join.store(fail, Ordering::SeqCst);
    }

    /// Make subsequent binds fail as if the address were taken.
    pub fn set_fail_listen(&self, fail: bool) {
        self.fail_listen.store(fail, Ordering::SeqCst);
    }

    // -- Recorded state --

    pub fn tap(&self, id: NetworkId) -> Option<Arc<MemoryTap>> {
        self.state.lock().taps.get(&id).cloned()
    }

    pub fn joined(&self) -> Vec<NetworkId> {
        self.state.lock().taps.keys().copied().collect()
    }

    pub fn left(&self) -> Vec<NetworkId> {
        self.state.lock().left.clone()
    }

    pub fn interface_addresses(&self) -> Vec<InterfaceAddress> {
        self.state.lock().interface_addresses.clone()
    }

    pub fn listening(&self) -> Vec<SocketAddr> {
        self.state.lock().listening.iter().copied().collect()
    }

    pub fn multicast_groups(&self, id: NetworkId) -> Vec<MulticastGroup> {
        self.state
            .lock()
            .multicast
            .iter()
            .filter(|(nwid, _)| *nwid == id)
            .map(|(_, g)| *g)
            .collect()
    }

    pub fn tried(&self) -> Vec<(Fingerprint, Endpoint, u32)> {
        self.state.lock().tried.clone()
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    // -- Callbacks into the node --

    pub fn deliver_config(&self, op: VirtualNetworkConfigOp, config: &EngineNetworkConfig) {
        bridge::virtual_network_config(self.handle, config.nwid, op, Some(config));
    }

    pub fn deliver_event(&self, event: Event) {
        bridge::event(self.handle, event);
    }

    pub fn path_check(&self, ip: IpAddr) -> bool {
        bridge::path_check(self.handle, ip)
    }

    pub fn path_lookup(&self, identity: &Identity) -> Option<switchyard_core::InetAddress> {
        bridge::path_lookup(self.handle, identity)
    }
}

impl Engine for MockEngine {
    fn identity(&self) -> Identity {
        self.identity.clone()
    }

    fn join(
        &self,
        id: NetworkId,
        _controller: Option<&Fingerprint>,
    ) -> Result<Arc<dyn Tap>, InterfaceError> {
        if self.fail_join.load(Ordering::SeqCst) {
            return Err(InterfaceError::TapFailed("permission denied".into()));
        }
        let mut state = self.state.lock();
        let tap = state
            .taps
            .entry(id)
            .or_insert_with(|| {
                let name = format!("zt{:x}", id.as_u64() & 0xffff);
                // Locally administered, derived from the network id.
                let mac = Mac::new(0x3200_0000_0000 | (id.as_u64() & 0xff_ffff_ffff));
                Arc::new(MemoryTap::new(name, mac))
            })
            .clone();
        Ok(tap)
    }

    fn leave(&self, id: NetworkId) {
        let mut state = self.state.lock();
        state.taps.remove(&id);
        state.multicast.retain(|(nwid, _)| *nwid != id);
        state.left.push(id);
    }

    fn peers(&self) -> Vec<Peer> {
        self.state.lock().peers.clone()
    }

    fn add_peer(&self, identity: &Identity) -> bool {
        if identity.address() == self.identity.address() {
            return false;
        }
        let mut state = self.state.lock();
        state.peers.retain(|p| p.address != identity.address());
        state.peers.push(Peer {
            address: identity.address(),
            identity: identity.clone(),
            fingerprint: identity.fingerprint(),
            version: None,
            latency: -1,
            root: false,
            networks: Vec::new(),
            paths: Vec::new(),
            locator: None,
        });
        true
    }

    fn try_peer(&self, fingerprint: &Fingerprint, endpoint: &Endpoint, retries: u32) -> bool {
        let mut state = self.state.lock();
        let known = state
            .peers
            .iter()
            .any(|p| fingerprint.best_specificity_equals(&p.fingerprint));
        state.tried.push((*fingerprint, endpoint.clone(), retries));
        known && endpoint.inet_address().is_some()
    }

    fn certificates(&self) -> Vec<LocalCertificate> {
        self.state.lock().certificates.clone()
    }

    fn add_certificate(
        &self,
        certificate: &Certificate,
        local_trust: u32,
    ) -> Result<(), CertificateError> {
        if certificate.signature.is_empty() {
            return Err(CertificateError::InvalidPrimarySignature);
        }
        if certificate.issuer.is_none() {
            return Err(CertificateError::MissingRequiredFields);
        }
        let mut state = self.state.lock();
        state
            .certificates
            .retain(|c| c.certificate.serial_no != certificate.serial_no);
        state.certificates.push(LocalCertificate {
            certificate: certificate.clone(),
            local_trust,
        });
        Ok(())
    }

    fn delete_certificate(&self, serial: &SerialNo) -> bool {
        let mut state = self.state.lock();
        let before = state.certificates.len();
        state
            .certificates
            .retain(|c| c.certificate.serial_no != *serial);
        state.certificates.len() != before
    }

    fn set_interface_addresses(&self, addresses: &[InterfaceAddress]) {
        self.state.lock().interface_addresses = addresses.to_vec();
    }

    fn multicast_subscribe(&self, id: NetworkId, group: MulticastGroup) {
        self.state.lock().multicast.insert((id, group));
    }

    fn multicast_unsubscribe(&self, id: NetworkId, group: MulticastGroup) {
        self.state.lock().multicast.remove(&(id, group));
    }

    fn listen(&self, addr: SocketAddr) -> Result<(), InterfaceError> {
        if self.fail_listen.load(Ordering::SeqCst) {
            return Err(InterfaceError::Io(std::io::Error::new(
                std::io::ErrorKind::AddrInUse,
                format!("{addr} in use"),
            )));
        }
        self.state.lock().listening.insert(addr);
        Ok(())
    }

    fn unlisten(&self, addr: SocketAddr) {
        self.state.lock().listening.remove(&addr);
    }

    fn locator(&self) -> Option<Locator> {
        let state = self.state.lock();
        if state.interface_addresses.is_empty() {
            return None;
        }
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or_default();
        Some(Locator {
            timestamp,
            signer: self.identity.fingerprint(),
            endpoints: state
                .interface_addresses
                .iter()
                .map(|a| Endpoint::IpUdp(a.address))
                .collect(),
            signature: vec![0x5a; 96],
        })
    }

    fn shutdown(&self) {
        self.shut_down.store(true, Ordering::SeqCst);
        self.state.lock().listening.clear();
    }
}

/// Launches [`MockEngine`]s and keeps the most recent one for inspection.
#[derive(Default)]
pub struct MockLauncher {
    fail: AtomicBool,
    last: Mutex<Option<Arc<MockEngine>>>,
}

impl MockLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    /// A launcher whose launches always fail.
    pub fn failing() -> Self {
        let launcher = Self::default();
        launcher.fail.store(true, Ordering::SeqCst);
        launcher
    }

    /// The engine created by the most recent successful launch.
    pub fn engine(&self) -> Option<Arc<MockEngine>> {
        self.last.lock().clone()
    }
}

impl EngineLauncher for MockLauncher {
    fn launch(&self, _base: &Path, handle: NodeHandle) -> Result<Arc<dyn Engine>, NodeError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(NodeError::EngineInit("mock engine refused to start".into()));
        }
        let engine = Arc::new(MockEngine::start(handle)?);
        *self.last.lock() = Some(Arc::clone(&engine));
        Ok(engine)
    }
}

/// A random identity with fake key material.
pub fn generate_identity() -> Identity {
    let mut rng = rand::thread_rng();
    // Addresses beginning with 0xff are reserved.
    let address = Address::new(rng.gen_range(1..0xff_0000_0000)).unwrap_or_default();
    let mut public = vec![0u8; 64];
    let mut secret = vec![0u8; 64];
    rng.fill(public.as_mut_slice());
    rng.fill(secret.as_mut_slice());
    Identity::new(address, IdentityType::C25519, public).with_secret(secret)
}

/// An engine-format network configuration.
///
/// `addresses` are `ip/bits` strings; unparseable entries are skipped.
pub fn network_config(nwid: u64, revision: u64, addresses: &[&str]) -> EngineNetworkConfig {
    let assigned_addresses = addresses
        .iter()
        .filter_map(|a| a.parse::<switchyard_core::InetAddress>().ok())
        .map(|a| a.to_socket_addr())
        .collect();
    EngineNetworkConfig {
        nwid,
        mac: 0x3200_0000_0000 | (nwid & 0xff_ffff_ffff),
        name: format!("net-{nwid:016x}"),
        status: 1,
        net_type: 0,
        mtu: 2800,
        bridge: false,
        broadcast_enabled: true,
        netconf_revision: revision,
        assigned_addresses,
        routes: Vec::<EngineRoute>::new(),
    }
}
