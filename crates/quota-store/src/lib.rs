//! Storage layer for the quota ledger.
//!
//! This crate provides keyed storage for quota and cooldown records with the one
//! guarantee the ledger depends on: a read-modify-write on a single key is
//! atomic. Two backends implement it:
//!
//! - [`MemoryStore`]: one mutex per record, for tests and single-process use.
//! - `RocksStore` (feature `rocksdb-backend`): column families per record kind,
//!   CBOR values, and a per-key lock table around each read-modify-write.
//!
//! # Example
//!
//! ```
//! use chrono::Utc;
//! use quota_core::{LevelQuota, MembershipLevel, PrincipalId, QuotaRecord};
//! use quota_store::{Commit, MemoryStore, Store};
//!
//! let store = MemoryStore::new();
//! let id = PrincipalId::generate();
//! let record = QuotaRecord::open(id, MembershipLevel::Free, LevelQuota::new(100, 10), Utc::now(), 1).unwrap();
//! store.insert_quota(&record).unwrap();
//!
//! let after = store
//!     .modify_quota(&id, &mut |rec| {
//!         rec.remaining_daily -= 1;
//!         Commit::Write
//!     })
//!     .unwrap();
//! assert_eq!(after.remaining_daily, 9);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
#[cfg(feature = "rocksdb-backend")]
pub mod keys;
pub mod locks;
pub mod memory;
#[cfg(feature = "rocksdb-backend")]
pub mod rocks;
#[cfg(feature = "rocksdb-backend")]
pub mod schema;

pub use error::{Result, StoreError};
pub use locks::KeyLocks;
pub use memory::MemoryStore;
#[cfg(feature = "rocksdb-backend")]
pub use rocks::RocksStore;

use quota_core::{CooldownRecord, PrincipalId, QuotaRecord, ResourceId};

/// Decision returned by a read-modify-write callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Commit {
    /// Persist the working copy.
    Write,
    /// Throw the working copy away; the stored record stays as it was.
    Discard,
}

/// The storage trait defining all database operations.
///
/// This trait abstracts the storage layer, allowing for different implementations
/// (e.g., `RocksDB`, in-memory for testing).
///
/// # Atomicity
///
/// `modify_*` runs its callback on a working copy while holding the key's
/// serialization unit, then commits or discards the copy before releasing it.
/// No other `modify_*`, `insert_*` or `delete_*` on the same key interleaves with
/// that sequence, and a discarded copy is never visible. Calls on different keys
/// do not block each other.
pub trait Store: Send + Sync {
    // =========================================================================
    // Quota Operations
    // =========================================================================

    /// Insert a new quota record.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::AlreadyExists` if the principal already has a record.
    fn insert_quota(&self, record: &QuotaRecord) -> Result<()>;

    /// Get a quota record by principal ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_quota(&self, principal_id: &PrincipalId) -> Result<Option<QuotaRecord>>;

    /// Delete a quota record.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the record doesn't exist.
    fn delete_quota(&self, principal_id: &PrincipalId) -> Result<()>;

    /// List every principal with a quota record, in ascending order.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_principals(&self) -> Result<Vec<PrincipalId>>;

    /// Atomically read, modify and conditionally write one quota record.
    ///
    /// Returns the record as stored after the call: the working copy if the
    /// callback returned `Commit::Write`, the unchanged record otherwise.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the record doesn't exist.
    fn modify_quota(
        &self,
        principal_id: &PrincipalId,
        apply: &mut dyn FnMut(&mut QuotaRecord) -> Commit,
    ) -> Result<QuotaRecord>;

    // =========================================================================
    // Cooldown Operations
    // =========================================================================

    /// Insert a new cooldown record.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::AlreadyExists` if the resource already has a record.
    fn insert_cooldown(&self, record: &CooldownRecord) -> Result<()>;

    /// Get a cooldown record by resource ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_cooldown(&self, resource_id: &ResourceId) -> Result<Option<CooldownRecord>>;

    /// Delete a cooldown record.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the record doesn't exist.
    fn delete_cooldown(&self, resource_id: &ResourceId) -> Result<()>;

    /// Atomically read, modify and conditionally write one cooldown record.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the record doesn't exist.
    fn modify_cooldown(
        &self,
        resource_id: &ResourceId,
        apply: &mut dyn FnMut(&mut CooldownRecord) -> Commit,
    ) -> Result<CooldownRecord>;
}
