//! Periodic quota refresh.
//!
//! The scheduler holds no state of its own between ticks. Each tick reads the
//! clock and asks the ledger to refill whatever is due at that instant, so a
//! missed or failed tick is made up by the next one.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use quota_core::{Clock, LedgerError, PrincipalId, Result};

use crate::ledger::{QuotaLedger, RefreshReport};

/// Splits the principal population into `count` disjoint shards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Shard {
    /// This shard's index, `0..count`.
    pub index: u32,
    /// Total number of shards.
    pub count: u32,
}

impl Shard {
    /// The shard `principal_id` falls in when split `count` ways.
    ///
    /// A count of zero is treated as one.
    #[must_use]
    pub fn of(principal_id: &PrincipalId, count: u32) -> Self {
        let count = count.max(1);
        let index = principal_id.as_uuid().as_u128() % u128::from(count);
        Self {
            // Always below `count`, so it fits.
            index: u32::try_from(index).unwrap_or_default(),
            count,
        }
    }

    /// Whether `principal_id` belongs to this shard.
    #[must_use]
    pub fn owns(&self, principal_id: &PrincipalId) -> bool {
        Self::of(principal_id, self.count).index == self.index
    }
}

/// Runs refresh passes on a fixed interval.
pub struct RefreshScheduler {
    ledger: Arc<QuotaLedger>,
    clock: Arc<dyn Clock>,
    interval: Duration,
    shards: u32,
}

impl RefreshScheduler {
    /// Create a scheduler.
    ///
    /// A shard count of zero is treated as one.
    #[must_use]
    pub fn new(
        ledger: Arc<QuotaLedger>,
        clock: Arc<dyn Clock>,
        interval: Duration,
        shards: u32,
    ) -> Self {
        Self {
            ledger,
            clock,
            interval,
            shards: shards.max(1),
        }
    }

    /// Run one refresh pass at the clock's current instant.
    ///
    /// The population is listed once and split into shards, which run
    /// concurrently on the blocking pool. Their reports are merged; a shard
    /// whose task dies has all of its principals recorded as failed, and the
    /// next pass retries them.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::StoreUnavailable` if the principals cannot be
    /// listed. Nothing is refreshed in that case.
    pub async fn tick(&self) -> Result<RefreshReport> {
        let now = self.clock.now();

        let mut partitions: BTreeMap<u32, Vec<PrincipalId>> = BTreeMap::new();
        for principal_id in self.ledger.principals()? {
            let shard = Shard::of(&principal_id, self.shards);
            partitions.entry(shard.index).or_default().push(principal_id);
        }

        let (batches, passes): (Vec<_>, Vec<_>) = partitions
            .into_values()
            .map(|batch| {
                let ledger = Arc::clone(&self.ledger);
                let owned = batch.clone();
                let pass =
                    tokio::task::spawn_blocking(move || ledger.refresh_batch(now, &owned));
                (batch, pass)
            })
            .unzip();

        let mut report = RefreshReport::default();
        for (batch, joined) in batches.into_iter().zip(join_all(passes).await) {
            match joined {
                Ok(shard_report) => report.merge(shard_report),
                Err(join_err) => {
                    tracing::error!(
                        error = %join_err,
                        principals = batch.len(),
                        "Refresh shard aborted"
                    );
                    let err =
                        LedgerError::StoreUnavailable(format!("refresh shard aborted: {join_err}"));
                    report.scanned += batch.len();
                    report
                        .failed
                        .extend(batch.into_iter().map(|principal_id| (principal_id, err.clone())));
                }
            }
        }

        tracing::info!(
            now = %now,
            scanned = report.scanned,
            refreshed = report.applied.len(),
            failed = report.failed.len(),
            "Refresh pass complete"
        );
        Ok(report)
    }

    /// Tick until `shutdown` flips to `true` or its sender is dropped.
    ///
    /// The first pass runs immediately. Ticks that fall behind are skipped
    /// rather than bunched up.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        tracing::info!(
            interval_ms = u64::try_from(self.interval.as_millis()).unwrap_or(u64::MAX),
            shards = self.shards,
            "Refresh scheduler started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(err) = self.tick().await {
                        tracing::warn!(error = %err, "Refresh pass failed; retrying next tick");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        tracing::info!("Refresh scheduler stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shards_partition_principals() {
        let shards: Vec<_> = (0..4).map(|index| Shard { index, count: 4 }).collect();
        for _ in 0..100 {
            let id = PrincipalId::generate();
            assert_eq!(shards.iter().filter(|s| s.owns(&id)).count(), 1);
        }
    }

    #[test]
    fn shard_of_agrees_with_owns() {
        for _ in 0..100 {
            let id = PrincipalId::generate();
            let shard = Shard::of(&id, 7);
            assert!(shard.index < 7);
            assert!(shard.owns(&id));
        }
    }

    #[test]
    fn zero_count_is_one_shard() {
        let id = PrincipalId::generate();
        assert_eq!(Shard::of(&id, 0), Shard { index: 0, count: 1 });
    }

    #[test]
    fn single_shard_owns_everything() {
        let shard = Shard { index: 0, count: 1 };
        assert!(shard.owns(&PrincipalId::generate()));
    }
}
