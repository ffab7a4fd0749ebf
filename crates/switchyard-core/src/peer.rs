//! Read-only snapshots of the engine's view of remote nodes.

use serde::{Deserialize, Serialize};

use crate::identity::{Fingerprint, Identity};
use crate::locator::{Endpoint, Locator};
use crate::types::{Address, NetworkId};

/// A physical path to a peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Path {
    pub endpoint: Endpoint,
    /// Milliseconds since the epoch.
    pub last_send: i64,
    pub last_receive: i64,
    pub alive: bool,
    pub preferred: bool,
}

/// A remote node known to the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Peer {
    pub address: Address,
    pub identity: Identity,
    pub fingerprint: Fingerprint,
    /// Protocol version as (major, minor, revision), when known.
    #[serde(default)]
    pub version: Option<(u16, u16, u16)>,
    /// Round-trip latency in milliseconds, negative when unknown.
    pub latency: i32,
    pub root: bool,
    #[serde(default)]
    pub networks: Vec<NetworkId>,
    #[serde(default)]
    pub paths: Vec<Path>,
    #[serde(default)]
    pub locator: Option<Locator>,
}

impl Peer {
    /// The preferred path, or the most recently active one.
    pub fn best_path(&self) -> Option<&Path> {
        self.paths
            .iter()
            .find(|p| p.preferred)
            .or_else(|| self.paths.iter().max_by_key(|p| p.last_receive))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::IdentityType;

    fn path(ep: &str, last_receive: i64, preferred: bool) -> Path {
        Path {
            endpoint: ep.parse().unwrap(),
            last_send: 0,
            last_receive,
            alive: true,
            preferred,
        }
    }

    fn peer(paths: Vec<Path>) -> Peer {
        let identity = Identity::new(
            Address::new(0x0102030405).unwrap(),
            IdentityType::C25519,
            vec![3; 64],
        );
        Peer {
            address: identity.address(),
            fingerprint: identity.fingerprint(),
            identity,
            version: Some((2, 0, 0)),
            latency: -1,
            root: false,
            networks: Vec::new(),
            paths,
            locator: None,
        }
    }

    #[test]
    fn best_path_prefers_flagged_path() {
        let p = peer(vec![
            path("udp/192.0.2.1/9993", 50, false),
            path("udp/192.0.2.2/9993", 10, true),
        ]);
        assert_eq!(p.best_path().unwrap().endpoint.to_string(), "udp/192.0.2.2/9993");
    }

    #[test]
    fn best_path_falls_back_to_most_recent() {
        let p = peer(vec![
            path("udp/192.0.2.1/9993", 50, false),
            path("udp/192.0.2.2/9993", 10, false),
        ]);
        assert_eq!(p.best_path().unwrap().last_receive, 50);
        assert!(peer(Vec::new()).best_path().is_none());
    }
}
