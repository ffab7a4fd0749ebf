//! End-to-end node lifecycle against the in-memory engine.
//!
//! Nodes share one process-wide handle table, so every test here takes the
//! `SERIAL` lock for its whole duration.

use std::net::{Ipv4Addr, TcpListener};
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::sync::Arc;

use rand::Rng;

use switchyard_core::{InetAddress, MulticastGroup, NetworkId, NetworkLocalSettings};
use switchyard_interfaces::Tap;
use switchyard_interfaces::ports::check_port;
use switchyard_node::engine::VirtualNetworkConfigOp;
use switchyard_node::error::PortKind;
use switchyard_node::handle::{handles_in_use, is_live};
use switchyard_node::testing::{MockLauncher, network_config};
use switchyard_node::{LocalConfig, Node, NodeError, NodeState};

static SERIAL: tokio::sync::Mutex<()> = tokio::sync::Mutex::const_new(());

const NWID: u64 = 0x0123_4567_89ab_cdef;

fn free_port() -> u16 {
    let mut rng = rand::thread_rng();
    loop {
        let port = rng.gen_range(20000..60000);
        if check_port(port) {
            return port;
        }
    }
}

/// Pre-seed `local.conf` so the node binds a free port and no secondary.
fn write_local_conf(base: &Path, primary: u16) {
    let mut config = LocalConfig::default();
    config.settings.primary_port = primary;
    config.settings.secondary_port = 0;
    config.write(&base.join("local.conf")).unwrap();
}

async fn start(base: &Path) -> (Node, MockLauncher) {
    write_local_conf(base, free_port());
    let launcher = MockLauncher::new();
    let node = Node::create(base, &launcher).await.unwrap();
    (node, launcher)
}

#[tokio::test]
async fn join_configure_leave_close() {
    let _serial = SERIAL.lock().await;
    switchyard_node::logging::init_for_tests();
    let dir = tempfile::tempdir().unwrap();
    let (node, launcher) = start(dir.path()).await;
    let engine = launcher.engine().unwrap();

    assert_eq!(node.state(), NodeState::Running);
    assert!(is_live(node.handle()));
    assert!(dir.path().join("identity.public").exists());
    let secret = std::fs::metadata(dir.path().join("identity.secret")).unwrap();
    assert_eq!(secret.permissions().mode() & 0o777, 0o600);
    let public = std::fs::read_to_string(dir.path().join("identity.public")).unwrap();
    assert!(public.starts_with(&node.address().to_string()));

    let id = NetworkId::new(NWID);
    let network = node.join(id, None, None).unwrap();
    assert_eq!(node.networks().len(), 1);
    assert_eq!(engine.joined(), vec![id]);

    engine.deliver_config(
        VirtualNetworkConfigOp::Up,
        &network_config(NWID, 1, &["10.0.0.5/24"]),
    );
    node.flush_pending().await;

    let expected: InetAddress = "10.0.0.5/24".parse().unwrap();
    assert_eq!(network.revision(), 1);
    assert_eq!(network.managed_ips(), vec![expected]);
    let tap = engine.tap(id).unwrap();
    assert!(tap.enabled());
    assert_eq!(tap.ips(), vec![expected]);
    let info = std::fs::read_to_string(dir.path().join("info.log")).unwrap();
    assert!(info.contains(&format!("joined network {id} on {}", tap.device_name())));
    assert_eq!(
        engine.multicast_groups(id),
        vec![MulticastGroup::for_ip(expected.ip())]
    );
    let mac = network.config().mac;
    assert_eq!(node.network_by_mac(mac).unwrap().id(), id);

    node.leave(id).unwrap();
    assert!(node.networks().is_empty());
    assert!(node.network_by_mac(mac).is_none());
    assert!(network.is_leaving());
    assert!(tap.is_closed());
    assert!(!tap.enabled());
    assert_eq!(engine.left(), vec![id]);

    let handle = node.handle();
    node.close().await;
    assert_eq!(node.state(), NodeState::Closed);
    assert!(!is_live(handle));
    assert!(engine.is_shut_down());
    assert!(matches!(node.join(id, None, None), Err(NodeError::NotRunning)));
}

#[tokio::test]
async fn join_is_idempotent_and_applies_settings() {
    let _serial = SERIAL.lock().await;
    let dir = tempfile::tempdir().unwrap();
    let (node, launcher) = start(dir.path()).await;
    let engine = launcher.engine().unwrap();
    let id = NetworkId::new(NWID);

    let first = node.join(id, None, None).unwrap();
    engine.deliver_config(
        VirtualNetworkConfigOp::Up,
        &network_config(NWID, 3, &["10.0.0.5/24"]),
    );
    node.flush_pending().await;
    assert_eq!(first.managed_ips().len(), 1);

    let locked_down = NetworkLocalSettings {
        allow_managed: false,
        ..NetworkLocalSettings::default()
    };
    let second = node.join(id, None, Some(locked_down.clone())).unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(node.networks().len(), 1);
    assert_eq!(second.local_settings(), locked_down);
    assert!(second.managed_ips().is_empty());
    assert!(engine.tap(id).unwrap().ips().is_empty());

    node.close().await;
}

#[tokio::test]
async fn join_reports_tap_failure() {
    let _serial = SERIAL.lock().await;
    let dir = tempfile::tempdir().unwrap();
    let (node, launcher) = start(dir.path()).await;
    launcher.engine().unwrap().set_fail_join(true);

    let err = node.join(NetworkId::new(NWID), None, None).unwrap_err();
    assert!(matches!(err, NodeError::TapInitFailed(_)));
    assert!(node.networks().is_empty());

    node.close().await;
}

#[tokio::test]
async fn concurrent_close_runs_teardown_once() {
    let _serial = SERIAL.lock().await;
    let dir = tempfile::tempdir().unwrap();
    let (node, launcher) = start(dir.path()).await;
    let node = Arc::new(node);
    let before = handles_in_use();

    let a = tokio::spawn({
        let node = Arc::clone(&node);
        async move { node.close().await }
    });
    let b = tokio::spawn({
        let node = Arc::clone(&node);
        async move { node.close().await }
    });
    a.await.unwrap();
    b.await.unwrap();

    assert_eq!(node.state(), NodeState::Closed);
    assert_eq!(handles_in_use(), before - 1);
    assert!(launcher.engine().unwrap().is_shut_down());

    // A later close is a no-op.
    node.close().await;
    assert_eq!(handles_in_use(), before - 1);
}

#[tokio::test]
async fn failed_launch_releases_everything() {
    let _serial = SERIAL.lock().await;
    let dir = tempfile::tempdir().unwrap();
    write_local_conf(dir.path(), free_port());
    let before = handles_in_use();

    let failing = MockLauncher::failing();
    for _ in 0..10 {
        let err = Node::create(dir.path(), &failing).await.unwrap_err();
        assert!(matches!(err, NodeError::EngineInit(_)));
        assert_eq!(handles_in_use(), before);
    }

    let launcher = MockLauncher::new();
    let node = Node::create(dir.path(), &launcher).await.unwrap();
    assert_eq!(node.state(), NodeState::Running);
    node.close().await;
    assert_eq!(handles_in_use(), before);
}

#[tokio::test]
async fn occupied_primary_port_falls_back_and_persists() {
    let _serial = SERIAL.lock().await;
    let dir = tempfile::tempdir().unwrap();
    let configured = free_port();
    let _occupied = TcpListener::bind((Ipv4Addr::UNSPECIFIED, configured)).unwrap();
    write_local_conf(dir.path(), configured);

    let launcher = MockLauncher::new();
    let node = Node::create(dir.path(), &launcher).await.unwrap();
    let (primary, secondary) = node.ports();
    assert_ne!(primary, configured);
    assert!((4096..20480).contains(&primary));
    assert_eq!(secondary, 0);

    let saved = LocalConfig::read(&dir.path().join("local.conf"), false, false).unwrap();
    assert_eq!(saved.settings.primary_port, primary);
    assert_eq!(node.local_config().settings.primary_port, primary);

    node.close().await;
}

#[tokio::test]
async fn occupied_primary_without_search_fails() {
    let _serial = SERIAL.lock().await;
    let dir = tempfile::tempdir().unwrap();
    let configured = free_port();
    let _occupied = TcpListener::bind((Ipv4Addr::UNSPECIFIED, configured)).unwrap();
    let mut config = LocalConfig::default();
    config.settings.primary_port = configured;
    config.settings.secondary_port = 0;
    config.settings.port_search = false;
    config.write(&dir.path().join("local.conf")).unwrap();
    let before = handles_in_use();

    let err = Node::create(dir.path(), &MockLauncher::new())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        NodeError::NoAvailablePort {
            which: PortKind::Primary,
            ..
        }
    ));
    assert_eq!(handles_in_use(), before);
}

#[tokio::test]
async fn occupied_secondary_without_search_is_kept() {
    let _serial = SERIAL.lock().await;
    let dir = tempfile::tempdir().unwrap();
    let primary = free_port();
    let secondary = loop {
        let port = free_port();
        if port != primary {
            break port;
        }
    };
    let _occupied = TcpListener::bind((Ipv4Addr::UNSPECIFIED, secondary)).unwrap();
    let mut config = LocalConfig::default();
    config.settings.primary_port = primary;
    config.settings.secondary_port = secondary;
    config.settings.port_search = false;
    config.write(&dir.path().join("local.conf")).unwrap();

    let node = Node::create(dir.path(), &MockLauncher::new()).await.unwrap();
    assert_eq!(node.ports(), (primary, secondary));
    let saved = LocalConfig::read(&dir.path().join("local.conf"), false, false).unwrap();
    assert_eq!(saved.settings.secondary_port, secondary);
    assert_eq!(saved.settings.primary_port, primary);

    node.close().await;
}

#[tokio::test]
async fn identity_survives_restart() {
    let _serial = SERIAL.lock().await;
    let dir = tempfile::tempdir().unwrap();
    let (node, _launcher) = start(dir.path()).await;
    let address = node.address();
    node.close().await;

    let launcher = MockLauncher::new();
    let node = Node::create(dir.path(), &launcher).await.unwrap();
    assert_eq!(node.address(), address);
    node.close().await;
}

#[tokio::test]
async fn set_local_config_persists_and_reports_restart() {
    let _serial = SERIAL.lock().await;
    let dir = tempfile::tempdir().unwrap();
    let (node, launcher) = start(dir.path()).await;
    let engine = launcher.engine().unwrap();
    let id = NetworkId::new(NWID);
    let network = node.join(id, None, None).unwrap();
    engine.deliver_config(
        VirtualNetworkConfigOp::Up,
        &network_config(NWID, 1, &["10.0.0.5/24"]),
    );
    node.flush_pending().await;

    let original = node.local_config();
    let mut next = original.clone();
    next.network.insert(
        id,
        NetworkLocalSettings {
            allow_managed: false,
            ..NetworkLocalSettings::default()
        },
    );
    assert!(!node.set_local_config(next.clone()).unwrap());
    assert!(network.managed_ips().is_empty());
    assert_eq!(node.previous_local_config(), original);

    next.settings.primary_port = next.settings.primary_port.wrapping_add(1);
    assert!(node.set_local_config(next.clone()).unwrap());
    let saved = LocalConfig::read(&dir.path().join("local.conf"), false, false).unwrap();
    assert_eq!(saved, next);

    node.close().await;
}

#[tokio::test]
async fn close_drops_late_configs() {
    let _serial = SERIAL.lock().await;
    let dir = tempfile::tempdir().unwrap();
    let (node, launcher) = start(dir.path()).await;
    let engine = launcher.engine().unwrap();
    let id = NetworkId::new(NWID);
    let network = node.join(id, None, None).unwrap();

    node.close().await;
    engine.deliver_config(
        VirtualNetworkConfigOp::Up,
        &network_config(NWID, 5, &["10.0.0.5/24"]),
    );
    assert_eq!(network.revision(), 0);
    assert!(network.is_leaving());
    assert!(engine.tap(id).unwrap().is_closed());
}

struct FlagServer(Arc<std::sync::atomic::AtomicBool>);

impl switchyard_node::ApiServer for FlagServer {
    fn close(&self) {
        self.0.store(true, std::sync::atomic::Ordering::SeqCst);
    }
}

#[tokio::test]
async fn close_shuts_attached_api_servers() {
    let _serial = SERIAL.lock().await;
    let dir = tempfile::tempdir().unwrap();
    let (node, _launcher) = start(dir.path()).await;
    let closed = Arc::new(std::sync::atomic::AtomicBool::new(false));
    node.attach_api_server(Box::new(FlagServer(Arc::clone(&closed))));

    assert!(!closed.load(std::sync::atomic::Ordering::SeqCst));
    node.close().await;
    assert!(closed.load(std::sync::atomic::Ordering::SeqCst));
}
