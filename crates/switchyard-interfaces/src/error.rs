//! Error types for the interfaces layer.

/// Errors that can occur while probing or configuring local interfaces.
#[derive(Debug, thiserror::Error)]
pub enum InterfaceError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("virtual interface failed: {0}")]
    TapFailed(String),
    #[error("virtual interface closed")]
    Closed,
}
