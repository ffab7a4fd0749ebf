//! Reachability endpoints and signed locators.

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ParseError;
use crate::identity::Fingerprint;
use crate::inet::InetAddress;
use crate::types::{Mac, string_serde};

/// A way of reaching a node.
///
/// String form is `<type>/<value>`, e.g. `udp/192.0.2.1/9993` or `zt/<fingerprint>`.
#[derive(Clone, PartialEq, Eq, Hash)]
pub enum Endpoint {
    Nil,
    /// Relayed through another node.
    ZeroTier(Fingerprint),
    Ethernet(Mac),
    WifiDirect(Mac),
    Bluetooth(Mac),
    /// Raw IP without a transport.
    Ip(InetAddress),
    IpUdp(InetAddress),
    IpTcp(InetAddress),
    IpHttp(String),
}

impl Endpoint {
    /// The IP address carried by IP-family endpoints.
    pub fn inet_address(&self) -> Option<&InetAddress> {
        match self {
            Endpoint::Ip(a) | Endpoint::IpUdp(a) | Endpoint::IpTcp(a) => Some(a),
            _ => None,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Nil => f.write_str("nil"),
            Endpoint::ZeroTier(fp) => write!(f, "zt/{fp}"),
            Endpoint::Ethernet(m) => write!(f, "eth/{m}"),
            Endpoint::WifiDirect(m) => write!(f, "wifip2p/{m}"),
            Endpoint::Bluetooth(m) => write!(f, "bt/{m}"),
            Endpoint::Ip(a) => write!(f, "ip/{a}"),
            Endpoint::IpUdp(a) => write!(f, "udp/{a}"),
            Endpoint::IpTcp(a) => write!(f, "tcp/{a}"),
            Endpoint::IpHttp(url) => write!(f, "http/{url}"),
        }
    }
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Endpoint({self})")
    }
}

impl FromStr for Endpoint {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s == "nil" {
            return Ok(Endpoint::Nil);
        }
        let (kind, value) = s
            .split_once('/')
            .ok_or_else(|| ParseError::InvalidEndpoint(s.into()))?;
        Ok(match kind {
            "zt" => Endpoint::ZeroTier(value.parse()?),
            "eth" => Endpoint::Ethernet(value.parse()?),
            "wifip2p" => Endpoint::WifiDirect(value.parse()?),
            "bt" => Endpoint::Bluetooth(value.parse()?),
            "ip" => Endpoint::Ip(value.parse()?),
            "udp" => Endpoint::IpUdp(value.parse()?),
            "tcp" => Endpoint::IpTcp(value.parse()?),
            "http" => Endpoint::IpHttp(value.to_string()),
            _ => return Err(ParseError::InvalidEndpoint(s.into())),
        })
    }
}

string_serde!(Endpoint);

/// A signed, timestamped list of endpoints describing how to reach a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Locator {
    pub timestamp: i64,
    pub signer: Fingerprint,
    pub endpoints: Vec<Endpoint>,
    #[serde(default)]
    pub signature: Vec<u8>,
}

impl Locator {
    pub fn is_signed(&self) -> bool {
        !self.signature.is_empty()
    }

    /// Whether `other` advertises a different set of endpoints.
    pub fn endpoints_differ(&self, other: &Locator) -> bool {
        let mut a: Vec<String> = self.endpoints.iter().map(ToString::to_string).collect();
        let mut b: Vec<String> = other.endpoints.iter().map(ToString::to_string).collect();
        a.sort();
        b.sort();
        a != b
    }
}
