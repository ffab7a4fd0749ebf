//! Error types for the switchyard-core crate.

/// Errors produced when parsing or constructing core value types.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("invalid length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
    #[error("invalid hex: {0}")]
    InvalidHex(String),
    #[error("address out of range: {0:#x}")]
    AddressOutOfRange(u64),
    #[error("invalid MAC address: {0}")]
    InvalidMac(String),
    #[error("invalid IP/port: {0}")]
    InvalidInetAddress(String),
    #[error("invalid fingerprint: {0}")]
    InvalidFingerprint(String),
    #[error("invalid identity: {0}")]
    InvalidIdentity(String),
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),
}

/// Reasons a certificate is refused by the engine's certificate store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, thiserror::Error)]
pub enum CertificateError {
    #[error("a newer certificate with this subject unique id is already present")]
    HaveNewerCert,
    #[error("invalid certificate format")]
    InvalidFormat,
    #[error("invalid identity in certificate")]
    InvalidIdentity,
    #[error("invalid primary signature")]
    InvalidPrimarySignature,
    #[error("invalid certificate chain")]
    InvalidChain,
    #[error("invalid component signature")]
    InvalidComponentSignature,
    #[error("invalid unique id proof")]
    InvalidUniqueIdProof,
    #[error("certificate is missing required fields")]
    MissingRequiredFields,
    #[error("certificate is outside its valid time window")]
    OutOfValidTimeWindow,
}
