//! Core value types for the switchyard node runtime.
//!
//! This crate defines node and network addressing, identities and
//! fingerprints, certificates, locators, peer snapshots, and virtual network
//! configuration. Cryptographic operations on these values are performed by
//! the external engine; this crate only models and validates their shape.

pub mod base32;
pub mod certificate;
pub mod error;
pub mod identity;
pub mod inet;
pub mod locator;
pub mod network;
pub mod peer;
pub mod types;

pub use certificate::{
    Certificate, CertificateIdentity, CertificateName, CertificateNetwork, CertificateSubject,
    LocalCertificate, SerialNo,
};
pub use error::{CertificateError, ParseError};
pub use identity::{Fingerprint, Identity, IdentityType};
pub use inet::{InetAddress, IpScope};
pub use locator::{Endpoint, Locator};
pub use network::{
    InterfaceAddress, MulticastGroup, NetworkConfig, NetworkLocalSettings, NetworkStatus,
    NetworkType, Route,
};
pub use peer::{Path, Peer};
pub use types::{Address, Mac, NetworkId};
