//! JSON local configuration (`local.conf`).
//!
//! Node-wide settings plus per-physical-path, per-peer and per-network
//! overrides. Keys are camelCase; map keys use the string forms of CIDRs,
//! addresses and network ids.

use std::collections::BTreeMap;
use std::net::IpAddr;
use std::path::Path;

use rand::Rng;
use serde::{Deserialize, Serialize};

use switchyard_core::{Address, InetAddress, NetworkId, NetworkLocalSettings};

use crate::error::NodeError;
use crate::store::atomic_write;

/// Default primary UDP/TCP port.
pub const DEFAULT_PRIMARY_PORT: u16 = 9993;

/// Default log size ceiling in KiB.
pub const DEFAULT_LOG_SIZE_MAX: i64 = 128;

/// Override for a physical network path, keyed by CIDR.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PhysicalPathConfig {
    /// Never use paths inside this network.
    pub blacklist: bool,
    /// Trusted path id; nonzero disables encryption on the path.
    pub trusted_path_id: u64,
}

/// Override for reaching a particular peer, keyed by its address.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VirtualPathConfig {
    /// Physical addresses to try when the engine asks how to reach the peer.
    #[serde(rename = "try")]
    pub try_: Vec<InetAddress>,
}

/// The `settings` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalSettings {
    #[serde(default = "default_primary_port")]
    pub primary_port: u16,
    /// Zero disables the secondary port.
    #[serde(default)]
    pub secondary_port: u16,
    /// Search for another port when a configured one cannot be bound.
    #[serde(default = "default_true")]
    pub port_search: bool,
    #[serde(default = "default_true")]
    pub port_mapping: bool,
    /// Log file ceiling in KiB. Zero disables trimming, negative disables file logs.
    #[serde(default = "default_log_size_max")]
    pub log_size_max: i64,
    #[serde(default)]
    pub multipath_mode: u8,
    /// Interface name prefixes never bound or advertised.
    #[serde(default = "default_interface_prefix_blacklist")]
    pub interface_prefix_blacklist: Vec<String>,
    /// Externally reachable addresses advertised as permanent.
    #[serde(default)]
    pub explicit_addresses: Vec<InetAddress>,
}

fn default_primary_port() -> u16 {
    DEFAULT_PRIMARY_PORT
}

fn default_true() -> bool {
    true
}

fn default_log_size_max() -> i64 {
    DEFAULT_LOG_SIZE_MAX
}

fn default_interface_prefix_blacklist() -> Vec<String> {
    ["lo", "zt", "tun", "tap", "utun"]
        .into_iter()
        .map(String::from)
        .collect()
}

impl Default for LocalSettings {
    fn default() -> Self {
        Self {
            primary_port: default_primary_port(),
            secondary_port: 0,
            port_search: true,
            port_mapping: true,
            log_size_max: default_log_size_max(),
            multipath_mode: 0,
            interface_prefix_blacklist: default_interface_prefix_blacklist(),
            explicit_addresses: Vec::new(),
        }
    }
}

/// Top-level `local.conf` document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalConfig {
    #[serde(default)]
    pub physical: BTreeMap<InetAddress, PhysicalPathConfig>,
    #[serde(default, rename = "virtual")]
    pub virtual_: BTreeMap<Address, VirtualPathConfig>,
    #[serde(default)]
    pub network: BTreeMap<NetworkId, NetworkLocalSettings>,
    #[serde(default)]
    pub settings: LocalSettings,
}

impl LocalConfig {
    /// Defaults for a node with no `local.conf`.
    ///
    /// A totally new node gets a random secondary port in `16384..32768`.
    pub fn defaults(new_node: bool) -> Self {
        let mut config = Self::default();
        if new_node {
            config.settings.secondary_port = rand::thread_rng().gen_range(16384..32768);
        }
        config
    }

    /// Parse configuration from a JSON string.
    pub fn parse(s: &str) -> Result<Self, NodeError> {
        serde_json::from_str(s)
            .map_err(|e| NodeError::Config(format!("failed to parse local.conf: {e}")))
    }

    /// Load `path`, falling back to defaults when it does not exist.
    ///
    /// With `save_if_missing` the defaults are written back. A file that
    /// exists but cannot be read or parsed is an error.
    pub fn read(path: &Path, save_if_missing: bool, new_node: bool) -> Result<Self, NodeError> {
        match std::fs::read_to_string(path) {
            Ok(content) => Self::parse(&content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let config = Self::defaults(new_node);
                if save_if_missing {
                    config.write(path)?;
                }
                Ok(config)
            }
            Err(e) => Err(NodeError::Config(format!(
                "failed to read {}: {e}",
                path.display()
            ))),
        }
    }

    /// Write atomically as pretty-printed JSON.
    pub fn write(&self, path: &Path) -> Result<(), NodeError> {
        let mut json = serde_json::to_vec_pretty(self)
            .map_err(|e| NodeError::Config(format!("failed to serialize local.conf: {e}")))?;
        json.push(b'\n');
        atomic_write(path, &json, false)?;
        Ok(())
    }

    /// Whether moving from `self` to `next` needs a node restart to take effect.
    pub fn restart_required(&self, next: &LocalConfig) -> bool {
        self.settings.primary_port != next.settings.primary_port
            || self.settings.secondary_port != next.settings.secondary_port
            || self.settings.log_size_max != next.settings.log_size_max
    }

    /// Whether any blacklisted physical network contains `ip`.
    pub fn is_blacklisted(&self, ip: IpAddr) -> bool {
        self.physical
            .iter()
            .any(|(cidr, path)| path.blacklist && cidr.contains(ip))
    }

    /// Addresses configured to try for reaching `peer`.
    pub fn try_addresses(&self, peer: Address) -> &[InetAddress] {
        self.virtual_
            .get(&peer)
            .map(|v| v.try_.as_slice())
            .unwrap_or_default()
    }

    pub fn network_settings(&self, id: NetworkId) -> Option<&NetworkLocalSettings> {
        self.network.get(&id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "physical": {
            "10.0.0.0/8": { "blacklist": true },
            "192.168.0.0/16": { "trustedPathId": 42 }
        },
        "virtual": {
            "89e92ceee5": { "try": ["203.0.113.7/9993"] }
        },
        "network": {
            "0123456789abcdef": { "allowGlobal": true }
        },
        "settings": {
            "primaryPort": 19993,
            "logSizeMax": -1,
            "explicitAddresses": ["198.51.100.1/9993"]
        }
    }"#;

    #[test]
    fn defaults_match_documented_values() {
        let s = LocalSettings::default();
        assert_eq!(s.primary_port, 9993);
        assert_eq!(s.secondary_port, 0);
        assert!(s.port_search);
        assert!(s.port_mapping);
        assert_eq!(s.log_size_max, 128);
        assert_eq!(s.multipath_mode, 0);
        assert_eq!(
            s.interface_prefix_blacklist,
            vec!["lo", "zt", "tun", "tap", "utun"]
        );
        assert!(s.explicit_addresses.is_empty());
    }

    #[test]
    fn new_node_gets_random_secondary_port() {
        for _ in 0..32 {
            let port = LocalConfig::defaults(true).settings.secondary_port;
            assert!((16384..32768).contains(&port));
        }
        assert_eq!(LocalConfig::defaults(false).settings.secondary_port, 0);
    }

    #[test]
    fn parse_sample() {
        let c = LocalConfig::parse(SAMPLE).unwrap();
        assert_eq!(c.settings.primary_port, 19993);
        assert_eq!(c.settings.log_size_max, -1);
        assert!(c.settings.port_search);
        assert_eq!(c.settings.explicit_addresses.len(), 1);

        assert!(c.is_blacklisted("10.1.2.3".parse().unwrap()));
        assert!(!c.is_blacklisted("192.168.1.1".parse().unwrap()));
        assert!(!c.is_blacklisted("8.8.8.8".parse().unwrap()));

        let peer: Address = "89e92ceee5".parse().unwrap();
        assert_eq!(c.try_addresses(peer).len(), 1);
        assert!(c.try_addresses(Address::new(1).unwrap()).is_empty());

        let nwid = NetworkId::new(0x0123456789abcdef);
        let settings = c.network_settings(nwid).unwrap();
        assert!(settings.allow_global);
        assert!(settings.allow_managed);
    }

    #[test]
    fn empty_object_is_all_defaults() {
        assert_eq!(LocalConfig::parse("{}").unwrap(), LocalConfig::default());
    }

    #[test]
    fn malformed_json_is_config_error() {
        assert!(matches!(
            LocalConfig::parse("{ not json"),
            Err(NodeError::Config(_))
        ));
        assert!(LocalConfig::parse(r#"{"physical":{"not-a-cidr":{}}}"#).is_err());
    }

    #[test]
    fn write_then_read_preserves_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("local.conf");
        let c = LocalConfig::parse(SAMPLE).unwrap();
        c.write(&path).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("\"primaryPort\": 19993"));
        assert!(text.contains("\"virtual\""));
        assert!(text.contains("\"try\""));
        assert_eq!(LocalConfig::read(&path, false, false).unwrap(), c);
    }

    #[test]
    fn read_missing_writes_defaults_when_asked() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("local.conf");

        let c = LocalConfig::read(&path, false, false).unwrap();
        assert_eq!(c, LocalConfig::default());
        assert!(!path.exists());

        let c = LocalConfig::read(&path, true, true).unwrap();
        assert!(path.exists());
        assert_eq!(LocalConfig::read(&path, false, false).unwrap(), c);
    }

    #[test]
    fn restart_required_on_port_or_log_changes() {
        let a = LocalConfig::default();
        let mut b = a.clone();
        assert!(!a.restart_required(&b));

        b.settings.port_mapping = false;
        b.network.insert(NetworkId::new(1), NetworkLocalSettings::default());
        assert!(!a.restart_required(&b));

        b.settings.secondary_port = 1234;
        assert!(a.restart_required(&b));

        let mut c = a.clone();
        c.settings.log_size_max = 0;
        assert!(a.restart_required(&c));
    }
}
