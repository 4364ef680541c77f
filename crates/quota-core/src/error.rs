//! Error types for the quota ledger.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::IdError;

/// Result type for ledger operations.
pub type Result<T> = std::result::Result<T, LedgerError>;

/// Which balance a rejected consumption ran short on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuotaKind {
    /// The daily allowance.
    Daily,
    /// The monthly quota.
    Monthly,
}

impl QuotaKind {
    /// Get the kind name as a string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Daily => "daily",
            Self::Monthly => "monthly",
        }
    }
}

impl std::fmt::Display for QuotaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors that can occur in ledger and gate operations.
///
/// Every variant is side-effect-free: when an operation returns an error,
/// nothing was committed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
    /// The requested cost does not fit in the remaining balance.
    #[error("{which} quota exceeded: remaining={remaining}, requested={requested}")]
    QuotaExceeded {
        /// The balance that ran short.
        which: QuotaKind,
        /// Balance at the time of the attempt.
        remaining: i64,
        /// Cost that was requested.
        requested: i64,
    },

    /// The flag changed too recently.
    #[error("cooldown active until {next_allowed_at}")]
    CooldownActive {
        /// Earliest instant at which a change will be accepted.
        next_allowed_at: DateTime<Utc>,
    },

    /// No record exists for the key.
    #[error("not found: {0}")]
    NotFound(String),

    /// A record already exists for the key.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// Caller passed an argument that can never be valid.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The backing store failed; the call may be retried.
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    /// Invalid identifier.
    #[error("invalid identifier: {0}")]
    InvalidId(#[from] IdError),
}

impl LedgerError {
    /// Whether a caller may retry the same call later and expect a different outcome.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::QuotaExceeded { .. } | Self::CooldownActive { .. } | Self::StoreUnavailable(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quota_exceeded_message_names_balance() {
        let err = LedgerError::QuotaExceeded {
            which: QuotaKind::Daily,
            remaining: 2,
            requested: 3,
        };
        assert_eq!(
            err.to_string(),
            "daily quota exceeded: remaining=2, requested=3"
        );
    }

    #[test]
    fn retryable_classification() {
        assert!(LedgerError::StoreUnavailable("io".into()).is_retryable());
        assert!(!LedgerError::InvalidArgument("negative".into()).is_retryable());
        assert!(!LedgerError::NotFound("x".into()).is_retryable());
    }
}
