//! Certificate data model.
//!
//! Certificates are signed and verified by the engine; this crate only models
//! their contents so they can be listed, passed to the engine, and stored.

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::base32;
use crate::error::ParseError;
use crate::identity::{Fingerprint, Identity};
use crate::locator::Locator;
use crate::types::{NetworkId, string_serde};

/// Size of a certificate serial number (SHA-384 of the signed certificate).
pub const SERIAL_NO_SIZE: usize = 48;

/// Local trust flag: certificate is a root of trust.
pub const LOCAL_TRUST_ROOT_CA: u32 = 0x0001;
/// Local trust flag: certificate may carry node configuration.
pub const LOCAL_TRUST_CONFIG: u32 = 0x0002;

/// A 48-byte certificate serial number.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[must_use]
pub struct SerialNo(pub [u8; SERIAL_NO_SIZE]);

impl SerialNo {
    /// Lowercase unpadded base32, as used for file names under `certs.d`.
    pub fn to_base32(&self) -> String {
        base32::encode(&self.0)
    }
}

impl AsRef<[u8]> for SerialNo {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl TryFrom<&[u8]> for SerialNo {
    type Error = ParseError;

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        let arr: [u8; SERIAL_NO_SIZE] =
            bytes.try_into().map_err(|_| ParseError::InvalidLength {
                expected: SERIAL_NO_SIZE,
                actual: bytes.len(),
            })?;
        Ok(Self(arr))
    }
}

impl fmt::Display for SerialNo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for SerialNo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SerialNo({}..)", hex::encode(&self.0[..4]))
    }
}

impl FromStr for SerialNo {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s.trim()).map_err(|_| ParseError::InvalidHex(s.into()))?;
        Self::try_from(bytes.as_slice())
    }
}

string_serde!(SerialNo);

/// X.509-style naming fields.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CertificateName {
    pub serial_no: String,
    pub common_name: String,
    pub street_address: String,
    pub locality: String,
    pub province: String,
    pub postal_code: String,
    pub country: String,
    pub organization: String,
    pub unit: String,
    pub email: String,
    pub url: String,
    pub host: String,
}

/// An identity named in a certificate subject, with an optional locator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateIdentity {
    pub identity: Identity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locator: Option<Locator>,
}

/// A network membership named in a certificate subject.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateNetwork {
    pub id: NetworkId,
    pub controller: Fingerprint,
}

/// What a certificate attests to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CertificateSubject {
    pub timestamp: i64,
    pub identities: Vec<CertificateIdentity>,
    pub networks: Vec<CertificateNetwork>,
    /// Serial numbers of other certificates this one chains to.
    pub certificates: Vec<SerialNo>,
    pub update_urls: Vec<String>,
    pub name: CertificateName,
    #[serde(with = "hex_bytes")]
    pub unique_id: Vec<u8>,
    #[serde(with = "hex_bytes")]
    pub unique_id_proof_signature: Vec<u8>,
}

/// A signed certificate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Certificate {
    pub serial_no: SerialNo,
    #[serde(default)]
    pub flags: u64,
    pub timestamp: i64,
    /// Not-before and not-after, in milliseconds since the epoch.
    pub validity: [i64; 2],
    pub subject: CertificateSubject,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issuer: Option<Identity>,
    #[serde(default)]
    pub issuer_name: CertificateName,
    #[serde(default, with = "hex_bytes")]
    pub extended_attributes: Vec<u8>,
    #[serde(default)]
    pub max_path_length: u32,
    #[serde(default)]
    pub crl: Vec<SerialNo>,
    #[serde(default, with = "hex_bytes")]
    pub signature: Vec<u8>,
}

impl Certificate {
    /// An unsigned certificate whose subject unique-id proof is present.
    pub fn is_signing_request(&self) -> bool {
        self.signature.is_empty()
            && self.issuer.is_none()
            && !self.subject.unique_id_proof_signature.is_empty()
    }

    /// Whether `now_ms` lies within the validity window.
    pub fn is_valid_at(&self, now_ms: i64) -> bool {
        now_ms >= self.validity[0] && now_ms <= self.validity[1]
    }
}

/// A certificate as held in the local store, with its local trust flags.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalCertificate {
    pub certificate: Certificate,
    pub local_trust: u32,
}

impl LocalCertificate {
    pub fn is_root_ca(&self) -> bool {
        self.local_trust & LOCAL_TRUST_ROOT_CA != 0
    }

    pub fn is_config_authority(&self) -> bool {
        self.local_trust & LOCAL_TRUST_CONFIG != 0
    }
}

mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(d)?;
        hex::decode(s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::IdentityType;
    use crate::types::Address;

    fn subject() -> CertificateSubject {
        CertificateSubject {
            timestamp: 1_600_000_000_000,
            identities: vec![CertificateIdentity {
                identity: Identity::new(
                    Address::new(0x1122334455).unwrap(),
                    IdentityType::C25519,
                    vec![1; 64],
                ),
                locator: None,
            }],
            name: CertificateName {
                common_name: "root.example".into(),
                ..Default::default()
            },
            unique_id: vec![9; 8],
            unique_id_proof_signature: vec![7; 16],
            ..Default::default()
        }
    }

    fn csr() -> Certificate {
        Certificate {
            serial_no: SerialNo([0; SERIAL_NO_SIZE]),
            flags: 0,
            timestamp: 0,
            validity: [100, 200],
            subject: subject(),
            issuer: None,
            issuer_name: CertificateName::default(),
            extended_attributes: Vec::new(),
            max_path_length: 0,
            crl: Vec::new(),
            signature: Vec::new(),
        }
    }

    #[test]
    fn serial_requires_48_bytes() {
        assert!(SerialNo::try_from(&[0u8; 47][..]).is_err());
        assert!(SerialNo::try_from(&[0u8; 48][..]).is_ok());
    }

    #[test]
    fn serial_hex_form() {
        let s = SerialNo([0xab; SERIAL_NO_SIZE]);
        assert_eq!(s.to_string().len(), 96);
        assert_eq!(s.to_string().parse::<SerialNo>().unwrap(), s);
    }

    #[test]
    fn signing_request_detection() {
        let mut cert = csr();
        assert!(cert.is_signing_request());
        cert.signature = vec![1, 2, 3];
        assert!(!cert.is_signing_request());
    }

    #[test]
    fn validity_window_is_inclusive() {
        let cert = csr();
        assert!(!cert.is_valid_at(99));
        assert!(cert.is_valid_at(100));
        assert!(cert.is_valid_at(200));
        assert!(!cert.is_valid_at(201));
    }

    #[test]
    fn local_trust_flags() {
        let lc = LocalCertificate {
            certificate: csr(),
            local_trust: LOCAL_TRUST_ROOT_CA,
        };
        assert!(lc.is_root_ca());
        assert!(!lc.is_config_authority());
    }

    #[test]
    fn json_uses_camel_case_and_hex() {
        let json = serde_json::to_value(csr()).unwrap();
        assert!(json.get("serialNo").is_some());
        assert_eq!(json["subject"]["uniqueId"], "0909090909090909");
        assert_eq!(json["subject"]["name"]["commonName"], "root.example");
        let back: Certificate = serde_json::from_value(json).unwrap();
        assert_eq!(back, csr());
    }
}
