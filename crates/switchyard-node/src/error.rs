//! Error types for the node runtime.

use switchyard_core::CertificateError;
use switchyard_interfaces::InterfaceError;

use crate::store::StorageError;

/// Which of the node's two ports a search was selecting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortKind {
    Primary,
    Secondary,
}

impl std::fmt::Display for PortKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PortKind::Primary => f.write_str("primary"),
            PortKind::Secondary => f.write_str("secondary"),
        }
    }
}

/// Errors that can occur during node operation.
#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("interface error: {0}")]
    Interface(#[from] InterfaceError),
    #[error("certificate rejected: {0}")]
    Certificate(#[from] CertificateError),
    #[error("no free node handles")]
    HandlesExhausted,
    #[error("unable to bind {which} port after {attempts} attempts")]
    NoAvailablePort { which: PortKind, attempts: usize },
    #[error("engine initialization failed: {0}")]
    EngineInit(String),
    #[error("unable to initialize virtual interface: {0}")]
    TapInitFailed(String),
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
    #[error("must be called from within a tokio runtime")]
    NoRuntime,
    #[error("node is not running")]
    NotRunning,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_variants() {
        let port = NodeError::NoAvailablePort {
            which: PortKind::Secondary,
            attempts: 256,
        };
        assert_eq!(
            port.to_string(),
            "unable to bind secondary port after 256 attempts"
        );

        assert_eq!(NodeError::HandlesExhausted.to_string(), "no free node handles");

        let tap = NodeError::TapInitFailed("no permission".into());
        assert!(tap.to_string().contains("no permission"));

        let cert = NodeError::from(CertificateError::InvalidChain);
        assert!(cert.to_string().starts_with("certificate rejected"));
    }

    #[test]
    fn error_from_wrapped_causes() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        assert!(matches!(NodeError::from(io_err), NodeError::Io(_)));

        let tap_err = InterfaceError::Closed;
        assert!(matches!(NodeError::from(tap_err), NodeError::Interface(_)));
    }
}
