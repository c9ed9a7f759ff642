// src/errors.rs

//! Crate-wide error types.
//!
//! - [`DevproxyError`] covers startup: config loading, validation, binding.
//! - [`RefreshError`] is the outcome of a failed reload cycle. It is `Clone`
//!   because every request that joined the cycle receives the same value.

use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DevproxyError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, DevproxyError>;

/// Why `ensure_fresh()` could not bring the backend up to date.
///
/// `Build` and `Start` carry the diagnostic text verbatim; it is what the
/// gateway sends back to the client.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RefreshError {
    #[error("fingerprinting source tree failed: {0}")]
    Fingerprint(String),

    #[error("{0}")]
    Build(String),

    #[error("{0}")]
    Start(String),

    #[error("backend at {addr} not ready after {waited:?}")]
    ReadinessTimeout { addr: SocketAddr, waited: Duration },

    #[error("reload cycle aborted: {0}")]
    Aborted(String),
}

impl RefreshError {
    /// Short machine-friendly label, used as a structured log field.
    pub fn kind(&self) -> &'static str {
        match self {
            RefreshError::Fingerprint(_) => "fingerprint",
            RefreshError::Build(_) => "build",
            RefreshError::Start(_) => "start",
            RefreshError::ReadinessTimeout { .. } => "readiness_timeout",
            RefreshError::Aborted(_) => "aborted",
        }
    }
}
