//! Error types for quota ledger storage.

use quota_core::LedgerError;

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors that can occur in storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Database operation failed.
    #[error("database error: {0}")]
    Database(String),

    /// Serialization/deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Record not found.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// The kind of record.
        entity: &'static str,
        /// The key that was looked up.
        id: String,
    },

    /// Record already exists.
    #[error("{entity} already exists: {id}")]
    AlreadyExists {
        /// The kind of record.
        entity: &'static str,
        /// The key that was inserted.
        id: String,
    },
}

impl From<StoreError> for LedgerError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { entity, id } => Self::NotFound(format!("{entity} {id}")),
            StoreError::AlreadyExists { entity, id } => {
                Self::AlreadyExists(format!("{entity} {id}"))
            }
            StoreError::Database(msg) | StoreError::Serialization(msg) => {
                Self::StoreUnavailable(msg)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_errors_map_to_ledger_taxonomy() {
        let err: LedgerError = StoreError::NotFound {
            entity: "quota",
            id: "abc".into(),
        }
        .into();
        assert_eq!(err, LedgerError::NotFound("quota abc".into()));

        let err: LedgerError = StoreError::Database("disk full".into()).into();
        assert_eq!(err, LedgerError::StoreUnavailable("disk full".into()));
        assert!(err.is_retryable());
    }
}
