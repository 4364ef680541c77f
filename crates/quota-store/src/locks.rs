//! Per-key serialization for backends without native row locks.
//!
//! [`KeyLocks`] hands out one mutex per key on demand. Callers holding
//! different keys never contend; callers on the same key run one at a time.
//! Entries are dropped from the table once no caller holds or waits on them,
//! including when the holder unwinds.

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;

/// A table of per-key mutexes.
#[derive(Debug, Default)]
pub struct KeyLocks {
    table: DashMap<Vec<u8>, Arc<Mutex<()>>>,
}

/// Removes the key's table entry on drop if nobody else references it.
struct Release<'a> {
    locks: &'a KeyLocks,
    key: &'a [u8],
}

impl Drop for Release<'_> {
    fn drop(&mut self) {
        // Only the table's own reference left: no holder, no waiter.
        self.locks
            .table
            .remove_if(self.key, |_, slot| Arc::strong_count(slot) == 1);
    }
}

impl KeyLocks {
    /// Create an empty lock table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` while holding the lock for `key`.
    pub fn with_key<R>(&self, key: &[u8], f: impl FnOnce() -> R) -> R {
        // Locals drop in reverse: the guard, then our slot reference, then the
        // release check, which must see the slot without our reference.
        let _release = Release { locks: self, key };
        // Clone the slot out so the table shard is not held while waiting.
        let slot = Arc::clone(self.table.entry(key.to_vec()).or_default().value());

        let _guard = slot.lock();
        f()
    }

    /// Number of keys currently tracked.
    #[must_use]
    pub fn len(&self) -> usize {
        self.table.len()
    }

    /// Whether no key is currently tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}
