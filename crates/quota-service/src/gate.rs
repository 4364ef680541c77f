//! The cooldown gate.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use quota_core::{
    check_window, CooldownRecord, LedgerError, ResourceId, Result, Transition, Visibility,
};
use quota_store::{Commit, Store};

/// Serializes visibility changes per resource and enforces the cooldown window.
pub struct CooldownGate {
    store: Arc<dyn Store>,
    window: Duration,
}

impl CooldownGate {
    /// Create a gate with the given default window.
    #[must_use]
    pub fn new(store: Arc<dyn Store>, window: Duration) -> Self {
        Self { store, window }
    }

    /// The default cooldown window.
    #[must_use]
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Start tracking a resource's flag.
    ///
    /// # Errors
    ///
    /// - `LedgerError::AlreadyExists` if the resource is already registered.
    /// - `LedgerError::StoreUnavailable` if the store fails.
    pub fn register(
        &self,
        resource_id: ResourceId,
        initial: Visibility,
        now: DateTime<Utc>,
    ) -> Result<CooldownRecord> {
        let record = CooldownRecord::new(resource_id, initial, now);
        self.store.insert_cooldown(&record)?;
        tracing::debug!(resource_id = %resource_id, flag = ?initial, "Cooldown flag registered");
        Ok(record)
    }

    /// Change a resource's flag using the default window.
    ///
    /// # Errors
    ///
    /// See [`Self::try_transition_within`].
    pub fn try_transition(
        &self,
        resource_id: &ResourceId,
        new_value: Visibility,
        now: DateTime<Utc>,
    ) -> Result<Transition> {
        self.try_transition_within(resource_id, new_value, now, self.window)
    }

    /// Change a resource's flag, at most once per `window`.
    ///
    /// Asking for the value the flag already has succeeds with
    /// [`Transition::Unchanged`] and does not restart the window.
    ///
    /// # Errors
    ///
    /// - `LedgerError::CooldownActive` if the flag changed less than `window` ago.
    /// - `LedgerError::InvalidArgument` if `window` is negative or too large;
    ///   nothing is read or written.
    /// - `LedgerError::NotFound` if the resource is not registered.
    /// - `LedgerError::StoreUnavailable` if the store fails.
    pub fn try_transition_within(
        &self,
        resource_id: &ResourceId,
        new_value: Visibility,
        now: DateTime<Utc>,
        window: Duration,
    ) -> Result<Transition> {
        if let Err(err) = check_window(window, now) {
            tracing::error!(resource_id = %resource_id, error = %err, "Rejected malformed transition");
            return Err(err);
        }

        let mut outcome = Err(LedgerError::NotFound(format!("cooldown {resource_id}")));
        self.store.modify_cooldown(resource_id, &mut |record| {
            outcome = record.transition(new_value, now, window);
            match &outcome {
                Ok(Transition::Applied { .. }) => Commit::Write,
                Ok(Transition::Unchanged) | Err(_) => Commit::Discard,
            }
        })?;

        match &outcome {
            Ok(transition) => {
                tracing::debug!(resource_id = %resource_id, flag = ?new_value, ?transition, "Flag transition accepted");
            }
            Err(LedgerError::InvalidArgument(msg)) => {
                tracing::error!(resource_id = %resource_id, error = %msg, "Rejected malformed transition");
            }
            Err(err) => {
                tracing::debug!(resource_id = %resource_id, error = %err, "Flag transition rejected");
            }
        }
        outcome
    }

    /// Current state of a resource's flag.
    ///
    /// # Errors
    ///
    /// - `LedgerError::NotFound` if the resource is not registered.
    /// - `LedgerError::StoreUnavailable` if the store fails.
    pub fn state(&self, resource_id: &ResourceId) -> Result<CooldownRecord> {
        self.store
            .get_cooldown(resource_id)?
            .ok_or_else(|| LedgerError::NotFound(format!("cooldown {resource_id}")))
    }

    /// Stop tracking a resource.
    ///
    /// # Errors
    ///
    /// - `LedgerError::NotFound` if the resource is not registered.
    /// - `LedgerError::StoreUnavailable` if the store fails.
    pub fn remove(&self, resource_id: &ResourceId) -> Result<()> {
        self.store.delete_cooldown(resource_id)?;
        tracing::debug!(resource_id = %resource_id, "Cooldown flag removed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use quota_core::DEFAULT_COOLDOWN_WINDOW_SECS;
    use quota_store::MemoryStore;
    use std::sync::Barrier;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 8, 20, 15, 0, 0).unwrap()
    }

    fn gate() -> CooldownGate {
        CooldownGate::new(
            Arc::new(MemoryStore::new()),
            Duration::seconds(DEFAULT_COOLDOWN_WINDOW_SECS),
        )
    }

    #[test]
    fn unregistered_resource_is_not_found() {
        let gate = gate();
        assert!(matches!(
            gate.try_transition(&ResourceId::generate(), Visibility::Public, t0()),
            Err(LedgerError::NotFound(_))
        ));
    }

    #[test]
    fn register_twice_fails() {
        let gate = gate();
        let id = ResourceId::generate();
        gate.register(id, Visibility::Private, t0()).unwrap();
        assert!(matches!(
            gate.register(id, Visibility::Public, t0()),
            Err(LedgerError::AlreadyExists(_))
        ));
    }

    #[test]
    fn explicit_window_overrides_default() {
        let gate = gate();
        let id = ResourceId::generate();
        gate.register(id, Visibility::Private, t0()).unwrap();
        gate.try_transition(&id, Visibility::Public, t0()).unwrap();

        let out = gate
            .try_transition_within(&id, Visibility::Private, t0() + Duration::hours(1), Duration::hours(1))
            .unwrap();
        assert!(matches!(out, Transition::Applied { .. }));
    }

    #[test]
    fn concurrent_flips_apply_once_per_window() {
        let gate = gate();
        let id = ResourceId::generate();
        gate.register(id, Visibility::Private, t0()).unwrap();
        let barrier = Barrier::new(8);

        let applied: usize = std::thread::scope(|s| {
            let handles: Vec<_> = (0..8)
                .map(|i| {
                    let gate = &gate;
                    let barrier = &barrier;
                    s.spawn(move || {
                        barrier.wait();
                        let value = Visibility::from(i % 2 == 0);
                        matches!(
                            gate.try_transition(&id, value, t0()),
                            Ok(Transition::Applied { .. })
                        )
                    })
                })
                .collect();
            handles
                .into_iter()
                .map(|h| usize::from(h.join().unwrap()))
                .sum()
        });

        assert_eq!(applied, 1);
        let record = gate.state(&id).unwrap();
        assert_eq!(record.flag_value, Visibility::Public);
        assert_eq!(record.last_changed_at, Some(t0()));
    }

    #[test]
    fn oversized_window_is_rejected_and_resource_stays_usable() {
        let gate = gate();
        let id = ResourceId::generate();
        gate.register(id, Visibility::Private, t0()).unwrap();
        gate.try_transition(&id, Visibility::Public, t0()).unwrap();

        assert!(matches!(
            gate.try_transition_within(
                &id,
                Visibility::Private,
                t0() + Duration::days(1),
                Duration::days(365 * 300_000),
            ),
            Err(LedgerError::InvalidArgument(_))
        ));

        let record = gate.state(&id).unwrap();
        assert_eq!(record.flag_value, Visibility::Public);
        assert_eq!(record.last_changed_at, Some(t0()));

        let later = t0() + Duration::days(3);
        assert_eq!(
            gate.try_transition(&id, Visibility::Private, later).unwrap(),
            Transition::Applied { changed_at: later }
        );
    }

    #[test]
    fn removed_resource_is_gone() {
        let gate = gate();
        let id = ResourceId::generate();
        gate.register(id, Visibility::Private, t0()).unwrap();
        gate.remove(&id).unwrap();
        assert!(matches!(gate.state(&id), Err(LedgerError::NotFound(_))));
    }
}
