//! The quota ledger.
//!
//! [`QuotaLedger`] drives the per-principal state machine in
//! [`quota_core::QuotaRecord`] through the store's atomic read-modify-write, so
//! every consumption and refresh is linearized per principal.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use quota_core::{
    Consumption, LedgerError, MembershipLevel, PrincipalId, QuotaRecord, QuotaSchedule,
    RefreshApplied, Result,
};
use quota_store::{Commit, Store};

/// Outcome of one refresh pass.
#[derive(Debug, Clone, Default)]
pub struct RefreshReport {
    /// Refills applied, ordered by principal id.
    pub applied: Vec<RefreshApplied>,
    /// Principals whose refresh failed and will be retried next pass.
    pub failed: Vec<(PrincipalId, LedgerError)>,
    /// Number of records examined.
    pub scanned: usize,
}

impl RefreshReport {
    /// Fold another report into this one, keeping `applied` ordered.
    pub fn merge(&mut self, other: Self) {
        self.applied.extend(other.applied);
        self.applied.sort_by_key(|event| event.principal_id);
        self.failed.extend(other.failed);
        self.scanned += other.scanned;
    }
}

/// Per-principal quota accounting.
pub struct QuotaLedger {
    store: Arc<dyn Store>,
    schedule: QuotaSchedule,
    daily_reset_hour: u32,
}

impl QuotaLedger {
    /// Create a ledger over `store`.
    #[must_use]
    pub fn new(store: Arc<dyn Store>, schedule: QuotaSchedule, daily_reset_hour: u32) -> Self {
        Self {
            store,
            schedule,
            daily_reset_hour,
        }
    }

    /// The per-level capacities in use.
    #[must_use]
    pub fn schedule(&self) -> &QuotaSchedule {
        &self.schedule
    }

    /// Create the quota record for a principal acquiring a membership.
    ///
    /// # Errors
    ///
    /// - `LedgerError::AlreadyExists` if the principal already has a record.
    /// - `LedgerError::StoreUnavailable` if the store fails.
    pub fn open_account(
        &self,
        principal_id: PrincipalId,
        level: MembershipLevel,
        now: DateTime<Utc>,
    ) -> Result<QuotaRecord> {
        let record = QuotaRecord::open(
            principal_id,
            level,
            self.schedule.quota_for(level),
            now,
            self.daily_reset_hour,
        )?;
        self.store.insert_quota(&record)?;

        tracing::info!(
            principal_id = %principal_id,
            level = level.as_str(),
            monthly_quota = record.monthly_quota,
            daily_limit = record.daily_limit,
            "Quota record opened"
        );
        Ok(record)
    }

    /// Deduct `daily_cost` and `monthly_cost` from a principal's balances.
    ///
    /// Both balances are charged or neither is.
    ///
    /// # Errors
    ///
    /// - `LedgerError::InvalidArgument` if a cost is negative.
    /// - `LedgerError::QuotaExceeded` if either balance is too low; nothing is charged.
    /// - `LedgerError::NotFound` if the principal has no record.
    /// - `LedgerError::StoreUnavailable` if the store fails.
    pub fn try_consume(
        &self,
        principal_id: &PrincipalId,
        daily_cost: i64,
        monthly_cost: i64,
        now: DateTime<Utc>,
    ) -> Result<Consumption> {
        if daily_cost < 0 || monthly_cost < 0 {
            let err = LedgerError::InvalidArgument(format!(
                "costs must be non-negative: daily={daily_cost}, monthly={monthly_cost}"
            ));
            tracing::error!(principal_id = %principal_id, error = %err, "Rejected malformed consumption");
            return Err(err);
        }

        let mut outcome = Err(LedgerError::NotFound(format!("quota {principal_id}")));
        self.store.modify_quota(principal_id, &mut |record| {
            outcome = record.consume(daily_cost, monthly_cost, now);
            if outcome.is_ok() {
                Commit::Write
            } else {
                Commit::Discard
            }
        })?;

        match &outcome {
            Ok(consumed) => tracing::debug!(
                principal_id = %principal_id,
                daily_cost,
                monthly_cost,
                remaining_daily = consumed.remaining_daily,
                remaining_monthly = consumed.remaining_monthly,
                "Quota consumed"
            ),
            Err(err) => tracing::debug!(
                principal_id = %principal_id,
                error = %err,
                "Quota consumption rejected"
            ),
        }
        outcome
    }

    /// Every principal with a quota record, in ascending id order.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::StoreUnavailable` if the store fails.
    pub fn principals(&self) -> Result<Vec<PrincipalId>> {
        Ok(self.store.list_principals()?)
    }

    /// Refill every due balance across the whole population.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::StoreUnavailable` only if the principal list cannot be
    /// read. Per-record failures are collected in [`RefreshReport::failed`].
    pub fn refresh(&self, now: DateTime<Utc>) -> Result<RefreshReport> {
        self.refresh_where(now, |_| true)
    }

    /// Refill due balances of the principals selected by `include`.
    ///
    /// # Errors
    ///
    /// Same as [`Self::refresh`].
    pub fn refresh_where(
        &self,
        now: DateTime<Utc>,
        include: impl Fn(&PrincipalId) -> bool,
    ) -> Result<RefreshReport> {
        let selected: Vec<_> = self
            .principals()?
            .into_iter()
            .filter(|principal_id| include(principal_id))
            .collect();
        Ok(self.refresh_batch(now, &selected))
    }

    /// Refill due balances of an already listed set of principals.
    ///
    /// Principals removed since they were listed are skipped. Other failures are
    /// collected in [`RefreshReport::failed`] and do not stop the batch.
    #[must_use]
    pub fn refresh_batch(&self, now: DateTime<Utc>, principals: &[PrincipalId]) -> RefreshReport {
        let mut report = RefreshReport::default();

        for principal_id in principals {
            report.scanned += 1;

            match self.refresh_principal(principal_id, now) {
                Ok(Some(applied)) => report.applied.push(applied),
                // Removed since the listing; nothing left to refresh.
                Ok(None) | Err(LedgerError::NotFound(_)) => {}
                Err(err) => {
                    tracing::warn!(principal_id = %principal_id, error = %err, "Refresh failed");
                    report.failed.push((*principal_id, err));
                }
            }
        }

        report.applied.sort_by_key(|event| event.principal_id);
        report
    }

    /// Refill one principal's due balances.
    ///
    /// Returns `None` when nothing was due at `now`.
    ///
    /// # Errors
    ///
    /// - `LedgerError::NotFound` if the principal has no record.
    /// - `LedgerError::StoreUnavailable` if the store fails.
    pub fn refresh_principal(
        &self,
        principal_id: &PrincipalId,
        now: DateTime<Utc>,
    ) -> Result<Option<RefreshApplied>> {
        // Only a refresh moves reset instants, so a record that is not due on a
        // plain read cannot become due before we would lock it.
        match self.store.get_quota(principal_id)? {
            Some(record) if record.is_due(now) => {}
            Some(_) => return Ok(None),
            None => return Err(LedgerError::NotFound(format!("quota {principal_id}"))),
        }

        let mut applied = None;
        self.store.modify_quota(principal_id, &mut |record| {
            applied = record.refresh(now);
            if applied.is_some() {
                Commit::Write
            } else {
                Commit::Discard
            }
        })?;

        if let Some(event) = &applied {
            tracing::debug!(
                principal_id = %principal_id,
                monthly_reset_at = ?event.monthly_reset_at,
                daily_reset_at = ?event.daily_reset_at,
                "Quota refreshed"
            );
        }
        Ok(applied)
    }

    /// Move a principal to another membership level.
    ///
    /// # Errors
    ///
    /// - `LedgerError::NotFound` if the principal has no record.
    /// - `LedgerError::StoreUnavailable` if the store fails.
    pub fn change_level(
        &self,
        principal_id: &PrincipalId,
        level: MembershipLevel,
        now: DateTime<Utc>,
    ) -> Result<QuotaRecord> {
        let quota = self.schedule.quota_for(level);
        let mut outcome = Ok(());
        let record = self.store.modify_quota(principal_id, &mut |record| {
            outcome = record.change_level(level, quota, now);
            if outcome.is_ok() {
                Commit::Write
            } else {
                Commit::Discard
            }
        })?;
        outcome?;

        tracing::info!(
            principal_id = %principal_id,
            level = level.as_str(),
            remaining_daily = record.remaining_daily,
            remaining_monthly = record.remaining_monthly,
            "Membership level changed"
        );
        Ok(record)
    }

    /// Current quota state of a principal.
    ///
    /// # Errors
    ///
    /// - `LedgerError::NotFound` if the principal has no record.
    /// - `LedgerError::StoreUnavailable` if the store fails.
    pub fn usage(&self, principal_id: &PrincipalId) -> Result<QuotaRecord> {
        self.store
            .get_quota(principal_id)?
            .ok_or_else(|| LedgerError::NotFound(format!("quota {principal_id}")))
    }

    /// Drop a principal's record when the principal itself is removed.
    ///
    /// # Errors
    ///
    /// - `LedgerError::NotFound` if the principal has no record.
    /// - `LedgerError::StoreUnavailable` if the store fails.
    pub fn remove_principal(&self, principal_id: &PrincipalId) -> Result<()> {
        self.store.delete_quota(principal_id)?;
        tracing::info!(principal_id = %principal_id, "Quota record removed");
        Ok(())
    }
}
