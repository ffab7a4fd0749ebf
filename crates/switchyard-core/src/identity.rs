//! Node identity and fingerprint.
//!
//! Key generation, signing, and validation belong to the engine. This module
//! only carries the key material around and derives fingerprints from it.
//!
//! String forms:
//! - identity: `<address>:<type>:<public hex>[:<secret hex>]`
//! - fingerprint: `<address>` or `<address>-<sha384 hex>`

use core::fmt;
use core::str::FromStr;

use sha2::{Digest, Sha384};

use crate::error::ParseError;
use crate::types::{Address, string_serde};

/// Size of a fingerprint hash (SHA-384).
pub const FINGERPRINT_HASH_SIZE: usize = 48;

/// Key algorithm family of an identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IdentityType {
    /// Curve25519/Ed25519 keys.
    C25519,
    /// Curve25519 plus NIST P-384 keys.
    P384,
}

impl IdentityType {
    fn code(self) -> u8 {
        match self {
            IdentityType::C25519 => 0,
            IdentityType::P384 => 1,
        }
    }

    fn from_code(code: &str) -> Option<Self> {
        match code {
            "0" => Some(IdentityType::C25519),
            "1" => Some(IdentityType::P384),
            _ => None,
        }
    }
}

/// A node identity: address, public key material, and optionally the secret key.
#[derive(Clone, PartialEq, Eq)]
pub struct Identity {
    address: Address,
    identity_type: IdentityType,
    public: Vec<u8>,
    secret: Option<Vec<u8>>,
}

impl Identity {
    pub fn new(address: Address, identity_type: IdentityType, public: Vec<u8>) -> Self {
        Self {
            address,
            identity_type,
            public,
            secret: None,
        }
    }

    #[must_use]
    pub fn with_secret(mut self, secret: Vec<u8>) -> Self {
        self.secret = Some(secret);
        self
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn identity_type(&self) -> IdentityType {
        self.identity_type
    }

    pub fn public_key(&self) -> &[u8] {
        &self.public
    }

    pub fn has_private(&self) -> bool {
        self.secret.is_some()
    }

    pub fn secret_key(&self) -> Option<&[u8]> {
        self.secret.as_deref()
    }

    /// The same identity with secret material removed.
    pub fn to_public(&self) -> Identity {
        Identity {
            secret: None,
            ..self.clone()
        }
    }

    pub fn fingerprint(&self) -> Fingerprint {
        let digest = Sha384::digest(&self.public);
        let mut hash = [0u8; FINGERPRINT_HASH_SIZE];
        hash.copy_from_slice(&digest);
        Fingerprint {
            address: self.address,
            hash: Some(hash),
        }
    }

    /// String form without secret material.
    pub fn to_public_string(&self) -> String {
        format!(
            "{}:{}:{}",
            self.address,
            self.identity_type.code(),
            hex::encode(&self.public)
        )
    }

    /// String form including the secret key, if present.
    pub fn to_secret_string(&self) -> Option<String> {
        self.secret
            .as_ref()
            .map(|s| format!("{}:{}", self.to_public_string(), hex::encode(s)))
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_public_string())
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("address", &self.address)
            .field("type", &self.identity_type)
            .field("has_private", &self.has_private())
            .finish()
    }
}

impl FromStr for Identity {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ParseError::InvalidIdentity(s.into());
        let mut parts = s.trim().split(':');
        let address: Address = parts.next().ok_or_else(invalid)?.parse()?;
        let identity_type =
            IdentityType::from_code(parts.next().ok_or_else(invalid)?).ok_or_else(invalid)?;
        let public = hex::decode(parts.next().ok_or_else(invalid)?).map_err(|_| invalid())?;
        if public.is_empty() {
            return Err(invalid());
        }
        let secret = match parts.next() {
            Some(h) => Some(hex::decode(h).map_err(|_| invalid())?),
            None => None,
        };
        if parts.next().is_some() {
            return Err(invalid());
        }
        Ok(Self {
            address,
            identity_type,
            public,
            secret,
        })
    }
}

// Serialized identities never carry the secret key.
impl serde::Serialize for Identity {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&self.to_public_string())
    }
}

impl<'de> serde::Deserialize<'de> for Identity {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let s = String::deserialize(d)?;
        let id: Identity = s.parse().map_err(serde::de::Error::custom)?;
        Ok(id.to_public())
    }
}

/// An address plus a hash of the public key.
///
/// A fingerprint without a hash matches on address alone.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint {
    pub address: Address,
    pub hash: Option<[u8; FINGERPRINT_HASH_SIZE]>,
}

impl Fingerprint {
    /// Compare as specifically as both sides allow: hashes when both carry
    /// one, otherwise addresses.
    pub fn best_specificity_equals(&self, other: &Fingerprint) -> bool {
        if self.address != other.address {
            return false;
        }
        match (&self.hash, &other.hash) {
            (Some(a), Some(b)) => a == b,
            _ => true,
        }
    }
}

impl From<Address> for Fingerprint {
    fn from(address: Address) -> Self {
        Self {
            address,
            hash: None,
        }
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.hash {
            Some(h) => write!(f, "{}-{}", self.address, hex::encode(h)),
            None => write!(f, "{}", self.address),
        }
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.hash {
            Some(h) => write!(f, "Fingerprint({}-{}..)", self.address, hex::encode(&h[..4])),
            None => write!(f, "Fingerprint({})", self.address),
        }
    }
}

impl FromStr for Fingerprint {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ParseError::InvalidFingerprint(s.into());
        let s = s.trim();
        match s.split_once('-') {
            Some((addr, hash)) => {
                let address: Address = addr.parse()?;
                let bytes = hex::decode(hash).map_err(|_| invalid())?;
                let hash: [u8; FINGERPRINT_HASH_SIZE] =
                    bytes.as_slice().try_into().map_err(|_| invalid())?;
                Ok(Self {
                    address,
                    hash: Some(hash),
                })
            }
            None => Ok(Self::from(s.parse::<Address>()?)),
        }
    }
}

string_serde!(Fingerprint);
