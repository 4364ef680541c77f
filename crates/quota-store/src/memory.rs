//! In-memory storage implementation.
//!
//! Each record sits behind its own mutex inside a concurrent map; the map
//! shard is only held long enough to look a record up, insert it, or remove it.

use std::hash::Hash;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;

use quota_core::{CooldownRecord, PrincipalId, QuotaRecord, ResourceId};

use crate::error::{Result, StoreError};
use crate::{Commit, Store};

/// A map of independently locked records.
#[derive(Debug)]
struct Table<K: Eq + Hash, V> {
    entity: &'static str,
    rows: DashMap<K, Arc<Mutex<V>>>,
}

impl<K, V> Table<K, V>
where
    K: Eq + Hash + Copy + std::fmt::Display,
    V: Clone,
{
    fn new(entity: &'static str) -> Self {
        Self {
            entity,
            rows: DashMap::new(),
        }
    }

    fn not_found(&self, key: &K) -> StoreError {
        StoreError::NotFound {
            entity: self.entity,
            id: key.to_string(),
        }
    }

    fn row(&self, key: &K) -> Option<Arc<Mutex<V>>> {
        self.rows.get(key).map(|row| Arc::clone(row.value()))
    }

    fn insert(&self, key: K, value: &V) -> Result<()> {
        match self.rows.entry(key) {
            Entry::Occupied(_) => Err(StoreError::AlreadyExists {
                entity: self.entity,
                id: key.to_string(),
            }),
            Entry::Vacant(slot) => {
                slot.insert(Arc::new(Mutex::new(value.clone())));
                Ok(())
            }
        }
    }

    fn get(&self, key: &K) -> Option<V> {
        self.row(key).map(|row| row.lock().clone())
    }

    fn delete(&self, key: &K) -> Result<()> {
        self.rows
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| self.not_found(key))
    }

    fn keys(&self) -> Vec<K> {
        self.rows.iter().map(|row| *row.key()).collect()
    }

    /// The callback runs on a clone; a callback that panics or discards leaves
    /// the stored record as it was.
    fn modify(&self, key: &K, apply: &mut dyn FnMut(&mut V) -> Commit) -> Result<V> {
        let row = self.row(key).ok_or_else(|| self.not_found(key))?;
        let mut stored = row.lock();

        let mut working = stored.clone();
        if apply(&mut working) == Commit::Write {
            *stored = working;
        }
        Ok(stored.clone())
    }
}

/// In-memory storage backend.
#[derive(Debug)]
pub struct MemoryStore {
    quotas: Table<PrincipalId, QuotaRecord>,
    cooldowns: Table<ResourceId, CooldownRecord>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            quotas: Table::new("quota"),
            cooldowns: Table::new("cooldown"),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Store for MemoryStore {
    fn insert_quota(&self, record: &QuotaRecord) -> Result<()> {
        self.quotas.insert(record.principal_id, record)
    }

    fn get_quota(&self, principal_id: &PrincipalId) -> Result<Option<QuotaRecord>> {
        Ok(self.quotas.get(principal_id))
    }

    fn delete_quota(&self, principal_id: &PrincipalId) -> Result<()> {
        self.quotas.delete(principal_id)
    }

    fn list_principals(&self) -> Result<Vec<PrincipalId>> {
        let mut ids = self.quotas.keys();
        ids.sort_unstable();
        Ok(ids)
    }

    fn modify_quota(
        &self,
        principal_id: &PrincipalId,
        apply: &mut dyn FnMut(&mut QuotaRecord) -> Commit,
    ) -> Result<QuotaRecord> {
        self.quotas.modify(principal_id, apply)
    }

    fn insert_cooldown(&self, record: &CooldownRecord) -> Result<()> {
        self.cooldowns.insert(record.resource_id, record)
    }

    fn get_cooldown(&self, resource_id: &ResourceId) -> Result<Option<CooldownRecord>> {
        Ok(self.cooldowns.get(resource_id))
    }

    fn delete_cooldown(&self, resource_id: &ResourceId) -> Result<()> {
        self.cooldowns.delete(resource_id)
    }

    fn modify_cooldown(
        &self,
        resource_id: &ResourceId,
        apply: &mut dyn FnMut(&mut CooldownRecord) -> Commit,
    ) -> Result<CooldownRecord> {
        self.cooldowns.modify(resource_id, apply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use quota_core::{LevelQuota, MembershipLevel, Visibility};
    use std::sync::Barrier;

    fn quota(id: PrincipalId, daily: i64) -> QuotaRecord {
        QuotaRecord::open(
            id,
            MembershipLevel::Free,
            LevelQuota::new(1000, daily),
            Utc::now(),
            1,
        )
        .unwrap()
    }

    #[test]
    fn quota_crud() {
        let store = MemoryStore::new();
        let id = PrincipalId::generate();
        store.insert_quota(&quota(id, 10)).unwrap();

        assert!(matches!(
            store.insert_quota(&quota(id, 10)),
            Err(StoreError::AlreadyExists { .. })
        ));
        assert_eq!(store.get_quota(&id).unwrap().unwrap().remaining_daily, 10);
        assert_eq!(store.list_principals().unwrap(), vec![id]);

        store.delete_quota(&id).unwrap();
        assert!(store.get_quota(&id).unwrap().is_none());
        assert!(matches!(
            store.delete_quota(&id),
            Err(StoreError::NotFound { .. })
        ));
    }

    #[test]
    fn discard_keeps_stored_record() {
        let store = MemoryStore::new();
        let id = PrincipalId::generate();
        let original = quota(id, 10);
        store.insert_quota(&original).unwrap();

        let after = store
            .modify_quota(&id, &mut |rec| {
                rec.remaining_daily = 0;
                Commit::Discard
            })
            .unwrap();
        assert_eq!(after, original);
        assert_eq!(store.get_quota(&id).unwrap().unwrap(), original);
    }

    #[test]
    fn modify_missing_is_not_found() {
        let store = MemoryStore::new();
        let result = store.modify_cooldown(&ResourceId::generate(), &mut |_| Commit::Write);
        assert!(matches!(result, Err(StoreError::NotFound { .. })));
    }

    #[test]
    fn concurrent_modifies_are_serialized() {
        let store = MemoryStore::new();
        let id = PrincipalId::generate();
        store.insert_quota(&quota(id, 1000)).unwrap();
        let barrier = Barrier::new(16);

        std::thread::scope(|s| {
            for _ in 0..16 {
                s.spawn(|| {
                    barrier.wait();
                    for _ in 0..50 {
                        store
                            .modify_quota(&id, &mut |rec| {
                                rec.remaining_daily -= 1;
                                Commit::Write
                            })
                            .unwrap();
                    }
                });
            }
        });

        assert_eq!(store.get_quota(&id).unwrap().unwrap().remaining_daily, 200);
    }

    #[test]
    fn panicking_callback_leaves_record_usable() {
        let store = MemoryStore::new();
        let id = PrincipalId::generate();
        let original = quota(id, 10);
        store.insert_quota(&original).unwrap();

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            store.modify_quota(&id, &mut |rec| {
                rec.remaining_daily = 0;
                panic!("callback failed");
            })
        }));
        assert!(result.is_err());

        assert_eq!(store.get_quota(&id).unwrap().unwrap(), original);
        let after = store
            .modify_quota(&id, &mut |rec| {
                rec.remaining_daily -= 1;
                Commit::Write
            })
            .unwrap();
        assert_eq!(after.remaining_daily, 9);
    }

    #[test]
    fn cooldown_crud() {
        let store = MemoryStore::new();
        let id = ResourceId::generate();
        store
            .insert_cooldown(&CooldownRecord::new(id, Visibility::Private, Utc::now()))
            .unwrap();

        let after = store
            .modify_cooldown(&id, &mut |rec| {
                rec.flag_value = Visibility::Public;
                Commit::Write
            })
            .unwrap();
        assert_eq!(after.flag_value, Visibility::Public);

        store.delete_cooldown(&id).unwrap();
        assert!(store.get_cooldown(&id).unwrap().is_none());
    }
}
