//! Error taxonomy for flavorpack
//!
//! The taxonomy is closed and shared across builder, reader and launcher.
//! Format, integrity and crypto errors at startup are fatal; the launcher
//! refuses to execute the child unless validation is disabled.

use crate::exit_codes;

/// Result type for flavorpack operations
pub type Result<T> = std::result::Result<T, FlavorError>;

/// Main error type for flavorpack operations
#[derive(Debug, thiserror::Error)]
pub enum FlavorError {
    /// Invalid magic, unsupported version, malformed index, unknown opcode,
    /// slot index mismatch
    #[error("format error: {0}")]
    Format(String),

    /// CRC mismatch, checksum mismatch, Ed25519 verification failure,
    /// missing integrity seal
    #[error("integrity error: {0}")]
    Integrity(String),

    /// Key wrong type, key wrong size, seed malformed
    #[error("crypto error: {0}")]
    Crypto(String),

    /// Read/write failed, truncated file, permission denied
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Required manifest field missing, placeholder references missing slot,
    /// env policy references undefined mapping
    #[error("config error: {0}")]
    Config(String),

    /// Child exec failed, command not found, workenv unusable
    #[error("execution error: {0}")]
    Execution(String),
}

impl FlavorError {
    /// I/O error with context naming the failing component and path
    pub fn io_context(what: impl std::fmt::Display, err: std::io::Error) -> Self {
        FlavorError::Io(std::io::Error::new(err.kind(), format!("{what}: {err}")))
    }

    /// Map an error to its process exit code (single fixed table, see
    /// `exit_codes`)
    pub fn exit_code(&self) -> i32 {
        match self {
            FlavorError::Format(_) | FlavorError::Integrity(_) | FlavorError::Crypto(_) => {
                exit_codes::EXIT_VERIFICATION_ERROR
            }
            FlavorError::Io(_) => exit_codes::EXIT_IO_ERROR,
            FlavorError::Config(_) => exit_codes::EXIT_CONFIG_ERROR,
            FlavorError::Execution(_) => exit_codes::EXIT_EXECUTION_ERROR,
        }
    }
}

impl From<serde_json::Error> for FlavorError {
    fn from(err: serde_json::Error) -> Self {
        FlavorError::Config(format!("JSON: {err}"))
    }
}
