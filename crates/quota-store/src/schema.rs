//! Database schema definitions and column families.
//!
//! This module defines the column families used in `RocksDB` storage.

/// Column family names for the `RocksDB` database.
pub mod cf {
    /// Quota records, keyed by `principal_id`.
    pub const QUOTAS: &str = "quotas";

    /// Cooldown records, keyed by `resource_id`.
    pub const COOLDOWNS: &str = "cooldowns";
}

/// Returns all column family names for database initialization.
#[must_use]
pub fn all_column_families() -> Vec<&'static str> {
    vec![cf::QUOTAS, cf::COOLDOWNS]
}
