//! Service-level error type.

use crate::config::ConfigError;

/// Errors that stop the service from starting or running.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    /// Configuration could not be loaded.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The store could not be opened.
    #[error("store error: {0}")]
    Store(#[from] quota_store::StoreError),

    /// The configured backend is not compiled into this binary.
    #[error("unsupported store backend: {0}")]
    UnsupportedBackend(String),

    /// Waiting for the shutdown signal failed.
    #[error("signal error: {0}")]
    Signal(#[from] std::io::Error),
}
