//! `RocksDB` storage implementation.
//!
//! This module provides the `RocksStore` implementation of the `Store` trait.
//! Every write to a key goes through the store's [`KeyLocks`] table, so a
//! read-modify-write on one key cannot interleave with another write to it.
//! The lock table is process-local: one process owns the database directory.

use std::path::Path;
use std::sync::Arc;

use rocksdb::{
    BoundColumnFamily, ColumnFamilyDescriptor, DBWithThreadMode, IteratorMode, MultiThreaded,
    Options,
};

use quota_core::{CooldownRecord, PrincipalId, QuotaRecord, ResourceId};

use crate::error::{Result, StoreError};
use crate::keys;
use crate::locks::KeyLocks;
use crate::schema::{all_column_families, cf};
use crate::{Commit, Store};

/// RocksDB-backed storage implementation.
pub struct RocksStore {
    db: Arc<DBWithThreadMode<MultiThreaded>>,
    locks: KeyLocks,
}

impl RocksStore {
    /// Open or create a `RocksDB` database at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or created.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cf_descriptors: Vec<_> = all_column_families()
            .into_iter()
            .map(|name| ColumnFamilyDescriptor::new(name, Options::default()))
            .collect();

        let path = path.as_ref();
        let db = DBWithThreadMode::open_cf_descriptors(&opts, path, cf_descriptors)
            .map_err(|e| StoreError::Database(e.to_string()))?;
        tracing::debug!(path = %path.display(), "RocksDB opened");

        Ok(Self {
            db: Arc::new(db),
            locks: KeyLocks::new(),
        })
    }

    /// Get a column family handle.
    fn cf(&self, name: &str) -> Result<Arc<BoundColumnFamily<'_>>> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::Database(format!("column family not found: {name}")))
    }

    /// Serialize a value using CBOR.
    fn serialize<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::into_writer(value, &mut buf)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        Ok(buf)
    }

    /// Deserialize a value from CBOR.
    fn deserialize<T: serde::de::DeserializeOwned>(data: &[u8]) -> Result<T> {
        ciborium::from_reader(data).map_err(|e| StoreError::Serialization(e.to_string()))
    }

    fn read<T: serde::de::DeserializeOwned>(&self, family: &str, key: &[u8]) -> Result<Option<T>> {
        let cf = self.cf(family)?;
        self.db
            .get_cf(&cf, key)
            .map_err(|e| StoreError::Database(e.to_string()))?
            .map(|data| Self::deserialize(&data))
            .transpose()
    }

    fn write<T: serde::Serialize>(&self, family: &str, key: &[u8], value: &T) -> Result<()> {
        let cf = self.cf(family)?;
        let value = Self::serialize(value)?;
        self.db
            .put_cf(&cf, key, value)
            .map_err(|e| StoreError::Database(e.to_string()))
    }

    fn insert<T: serde::Serialize>(
        &self,
        family: &str,
        entity: &'static str,
        key: &[u8],
        id: String,
        value: &T,
    ) -> Result<()> {
        self.locks.with_key(key, || {
            let cf = self.cf(family)?;
            let exists = self
                .db
                .get_pinned_cf(&cf, key)
                .map_err(|e| StoreError::Database(e.to_string()))?
                .is_some();
            if exists {
                return Err(StoreError::AlreadyExists { entity, id });
            }
            self.write(family, key, value)
        })
    }

    fn delete(&self, family: &str, entity: &'static str, key: &[u8], id: String) -> Result<()> {
        self.locks.with_key(key, || {
            let cf = self.cf(family)?;
            let exists = self
                .db
                .get_pinned_cf(&cf, key)
                .map_err(|e| StoreError::Database(e.to_string()))?
                .is_some();
            if !exists {
                return Err(StoreError::NotFound { entity, id });
            }
            self.db
                .delete_cf(&cf, key)
                .map_err(|e| StoreError::Database(e.to_string()))
        })
    }

    fn modify<T>(
        &self,
        family: &str,
        entity: &'static str,
        key: &[u8],
        id: String,
        apply: &mut dyn FnMut(&mut T) -> Commit,
    ) -> Result<T>
    where
        T: serde::Serialize + serde::de::DeserializeOwned,
    {
        self.locks.with_key(key, || {
            let mut working: T = self
                .read(family, key)?
                .ok_or(StoreError::NotFound { entity, id })?;
            match apply(&mut working) {
                Commit::Write => {
                    self.write(family, key, &working)?;
                    Ok(working)
                }
                // The stored bytes were not touched; decode them again rather
                // than trusting a copy the callback may have scribbled on.
                Commit::Discard => self
                    .read(family, key)?
                    .ok_or_else(|| StoreError::Database("record vanished under lock".into())),
            }
        })
    }
}

impl Store for RocksStore {
    // =========================================================================
    // Quota Operations
    // =========================================================================

    fn insert_quota(&self, record: &QuotaRecord) -> Result<()> {
        let key = keys::quota_key(&record.principal_id);
        self.insert(cf::QUOTAS, "quota", &key, record.principal_id.to_string(), record)
    }

    fn get_quota(&self, principal_id: &PrincipalId) -> Result<Option<QuotaRecord>> {
        self.read(cf::QUOTAS, &keys::quota_key(principal_id))
    }

    fn delete_quota(&self, principal_id: &PrincipalId) -> Result<()> {
        let key = keys::quota_key(principal_id);
        self.delete(cf::QUOTAS, "quota", &key, principal_id.to_string())
    }

    fn list_principals(&self) -> Result<Vec<PrincipalId>> {
        let cf = self.cf(cf::QUOTAS)?;
        let mut ids = Vec::new();

        // Keys are raw UUID bytes, so iteration order is ascending id order.
        for item in self.db.iterator_cf(&cf, IteratorMode::Start) {
            let (key, _) = item.map_err(|e| StoreError::Database(e.to_string()))?;
            ids.push(keys::principal_from_key(&key)?);
        }

        Ok(ids)
    }

    fn modify_quota(
        &self,
        principal_id: &PrincipalId,
        apply: &mut dyn FnMut(&mut QuotaRecord) -> Commit,
    ) -> Result<QuotaRecord> {
        let key = keys::quota_key(principal_id);
        self.modify(cf::QUOTAS, "quota", &key, principal_id.to_string(), apply)
    }

    // =========================================================================
    // Cooldown Operations
    // =========================================================================

    fn insert_cooldown(&self, record: &CooldownRecord) -> Result<()> {
        let key = keys::cooldown_key(&record.resource_id);
        self.insert(cf::COOLDOWNS, "cooldown", &key, record.resource_id.to_string(), record)
    }

    fn get_cooldown(&self, resource_id: &ResourceId) -> Result<Option<CooldownRecord>> {
        self.read(cf::COOLDOWNS, &keys::cooldown_key(resource_id))
    }

    fn delete_cooldown(&self, resource_id: &ResourceId) -> Result<()> {
        let key = keys::cooldown_key(resource_id);
        self.delete(cf::COOLDOWNS, "cooldown", &key, resource_id.to_string())
    }

    fn modify_cooldown(
        &self,
        resource_id: &ResourceId,
        apply: &mut dyn FnMut(&mut CooldownRecord) -> Commit,
    ) -> Result<CooldownRecord> {
        let key = keys::cooldown_key(resource_id);
        self.modify(cf::COOLDOWNS, "cooldown", &key, resource_id.to_string(), apply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use quota_core::{LevelQuota, MembershipLevel, Visibility};
    use tempfile::TempDir;

    fn create_test_store() -> (RocksStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = RocksStore::open(dir.path()).unwrap();
        (store, dir)
    }

    fn quota(id: PrincipalId) -> QuotaRecord {
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap();
        QuotaRecord::open(id, MembershipLevel::Standard, LevelQuota::new(1000, 50), now, 1)
            .unwrap()
    }

    #[test]
    fn quota_crud() {
        let (store, _dir) = create_test_store();
        let id = PrincipalId::generate();
        let record = quota(id);

        // Create
        store.insert_quota(&record).unwrap();
        assert!(matches!(
            store.insert_quota(&record),
            Err(StoreError::AlreadyExists { .. })
        ));

        // Read
        assert_eq!(store.get_quota(&id).unwrap().unwrap(), record);

        // Update
        let updated = store
            .modify_quota(&id, &mut |rec| {
                rec.remaining_daily -= 5;
                Commit::Write
            })
            .unwrap();
        assert_eq!(updated.remaining_daily, 45);
        assert_eq!(store.get_quota(&id).unwrap().unwrap().remaining_daily, 45);

        // Delete
        store.delete_quota(&id).unwrap();
        assert!(store.get_quota(&id).unwrap().is_none());
        assert!(matches!(
            store.delete_quota(&id),
            Err(StoreError::NotFound { .. })
        ));
    }

    #[test]
    fn discard_leaves_bytes_untouched() {
        let (store, _dir) = create_test_store();
        let id = PrincipalId::generate();
        let record = quota(id);
        store.insert_quota(&record).unwrap();

        let after = store
            .modify_quota(&id, &mut |rec| {
                rec.remaining_monthly = 0;
                Commit::Discard
            })
            .unwrap();
        assert_eq!(after, record);
    }

    #[test]
    fn list_principals_is_sorted() {
        let (store, _dir) = create_test_store();
        let mut ids: Vec<_> = (0..5).map(|_| PrincipalId::generate()).collect();
        for id in &ids {
            store.insert_quota(&quota(*id)).unwrap();
        }
        ids.sort();
        assert_eq!(store.list_principals().unwrap(), ids);
    }

    #[test]
    fn concurrent_modifies_are_serialized() {
        let (store, _dir) = create_test_store();
        let id = PrincipalId::generate();
        store.insert_quota(&quota(id)).unwrap();

        std::thread::scope(|s| {
            for _ in 0..8 {
                s.spawn(|| {
                    for _ in 0..5 {
                        store
                            .modify_quota(&id, &mut |rec| {
                                rec.remaining_monthly -= 1;
                                Commit::Write
                            })
                            .unwrap();
                    }
                });
            }
        });

        assert_eq!(store.get_quota(&id).unwrap().unwrap().remaining_monthly, 960);
    }

    #[test]
    fn cooldown_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let id = ResourceId::generate();
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap();

        {
            let store = RocksStore::open(dir.path()).unwrap();
            store
                .insert_cooldown(&CooldownRecord::new(id, Visibility::Private, now))
                .unwrap();
            store
                .modify_cooldown(&id, &mut |rec| {
                    rec.flag_value = Visibility::Public;
                    rec.last_changed_at = Some(now);
                    Commit::Write
                })
                .unwrap();
        }

        let store = RocksStore::open(dir.path()).unwrap();
        let rec = store.get_cooldown(&id).unwrap().unwrap();
        assert_eq!(rec.flag_value, Visibility::Public);
        assert_eq!(rec.last_changed_at, Some(now));
    }
}
