//! Quota records and their state machine.
//!
//! A [`QuotaRecord`] holds two independent balances for one principal: a monthly
//! quota and a daily allowance. Both are decremented together by
//! [`QuotaRecord::consume`] and refilled independently by [`QuotaRecord::refresh`]
//! once their reset instant has passed.
//!
//! The methods here are pure state transitions on a working copy. Atomicity
//! against concurrent callers is the store's job: it hands a record to one
//! transition at a time and commits the copy only when the transition succeeds.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::cycle;
use crate::error::{LedgerError, QuotaKind, Result};
use crate::PrincipalId;

// ============================================================================
// Constants
// ============================================================================

/// Default hour (UTC) at which daily allowances refill.
pub const DEFAULT_DAILY_RESET_HOUR: u32 = 1;

/// Free tier monthly quota.
pub const FREE_MONTHLY_QUOTA: i64 = 100;

/// Free tier daily limit.
pub const FREE_DAILY_LIMIT: i64 = 10;

/// Standard tier monthly quota.
pub const STANDARD_MONTHLY_QUOTA: i64 = 1_000;

/// Standard tier daily limit.
pub const STANDARD_DAILY_LIMIT: i64 = 50;

/// Premium tier monthly quota.
pub const PREMIUM_MONTHLY_QUOTA: i64 = 3_000;

/// Premium tier daily limit.
pub const PREMIUM_DAILY_LIMIT: i64 = 150;

/// Top tier monthly quota.
pub const TOP_TIER_MONTHLY_QUOTA: i64 = 10_000;

/// Top tier daily limit.
pub const TOP_TIER_DAILY_LIMIT: i64 = 500;

/// Membership levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MembershipLevel {
    /// No paid membership.
    Free,
    /// Standard membership.
    Standard,
    /// Premium membership.
    Premium,
    /// Highest membership tier.
    TopTier,
}

impl MembershipLevel {
    /// All levels, lowest first.
    pub const ALL: [Self; 4] = [Self::Free, Self::Standard, Self::Premium, Self::TopTier];

    /// Get the level name as a string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Free => "free",
            Self::Standard => "standard",
            Self::Premium => "premium",
            Self::TopTier => "top_tier",
        }
    }
}

/// Capacity granted per cycle for one membership level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelQuota {
    /// Units available per monthly cycle.
    pub monthly_quota: i64,
    /// Units available per daily cycle.
    pub daily_limit: i64,
}

impl LevelQuota {
    /// Create a level quota.
    #[must_use]
    pub const fn new(monthly_quota: i64, daily_limit: i64) -> Self {
        Self {
            monthly_quota,
            daily_limit,
        }
    }

    /// Reject negative capacities.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::InvalidArgument` if either capacity is negative.
    pub fn validate(&self) -> Result<()> {
        if self.monthly_quota < 0 || self.daily_limit < 0 {
            return Err(LedgerError::InvalidArgument(format!(
                "quota capacities must be non-negative: monthly={}, daily={}",
                self.monthly_quota, self.daily_limit
            )));
        }
        Ok(())
    }
}

/// Per-level quota amounts.
///
/// This is external configuration: the ledger only reads it when a record is
/// opened or changes level.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaSchedule {
    levels: BTreeMap<MembershipLevel, LevelQuota>,
}

impl QuotaSchedule {
    /// Capacity for a level.
    #[must_use]
    pub fn quota_for(&self, level: MembershipLevel) -> LevelQuota {
        self.levels
            .get(&level)
            .copied()
            .unwrap_or_else(|| default_quota(level))
    }

    /// Override the capacity of one level.
    #[must_use]
    pub fn with_level(mut self, level: MembershipLevel, quota: LevelQuota) -> Self {
        self.levels.insert(level, quota);
        self
    }

    /// Validate every configured level.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::InvalidArgument` naming the first invalid level.
    pub fn validate(&self) -> Result<()> {
        for (level, quota) in &self.levels {
            quota.validate().map_err(|e| {
                LedgerError::InvalidArgument(format!("level {}: {e}", level.as_str()))
            })?;
        }
        Ok(())
    }
}

impl Default for QuotaSchedule {
    fn default() -> Self {
        Self {
            levels: MembershipLevel::ALL
                .into_iter()
                .map(|level| (level, default_quota(level)))
                .collect(),
        }
    }
}

const fn default_quota(level: MembershipLevel) -> LevelQuota {
    match level {
        MembershipLevel::Free => LevelQuota::new(FREE_MONTHLY_QUOTA, FREE_DAILY_LIMIT),
        MembershipLevel::Standard => LevelQuota::new(STANDARD_MONTHLY_QUOTA, STANDARD_DAILY_LIMIT),
        MembershipLevel::Premium => LevelQuota::new(PREMIUM_MONTHLY_QUOTA, PREMIUM_DAILY_LIMIT),
        MembershipLevel::TopTier => LevelQuota::new(TOP_TIER_MONTHLY_QUOTA, TOP_TIER_DAILY_LIMIT),
    }
}

/// Quota state for one principal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaRecord {
    /// The owning principal.
    pub principal_id: PrincipalId,

    /// Membership level the capacities were taken from.
    pub level: MembershipLevel,

    /// Capacity of the monthly balance.
    pub monthly_quota: i64,

    /// Capacity of the daily balance.
    pub daily_limit: i64,

    /// Units left in the current monthly cycle.
    pub remaining_monthly: i64,

    /// Units left in the current daily cycle.
    pub remaining_daily: i64,

    /// Instant monthly cycles are counted from.
    pub monthly_anchor: DateTime<Utc>,

    /// Next instant the monthly balance refills.
    pub monthly_reset_at: DateTime<Utc>,

    /// Next instant the daily balance refills.
    pub daily_reset_at: DateTime<Utc>,

    /// When the record was created.
    pub created_at: DateTime<Utc>,

    /// When the record was last mutated. Informational only.
    pub updated_at: DateTime<Utc>,
}

impl QuotaRecord {
    /// Open a record with full balances and both reset instants one cycle ahead.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::InvalidArgument` for negative capacities or a reset
    /// hour outside `0..24`.
    pub fn open(
        principal_id: PrincipalId,
        level: MembershipLevel,
        quota: LevelQuota,
        now: DateTime<Utc>,
        daily_reset_hour: u32,
    ) -> Result<Self> {
        quota.validate()?;
        let daily_reset_at = cycle::next_daily_reset(now, daily_reset_hour).ok_or_else(|| {
            LedgerError::InvalidArgument(format!("daily reset hour out of range: {daily_reset_hour}"))
        })?;
        let monthly_reset_at = cycle::next_monthly_reset(now, now)
            .ok_or_else(|| LedgerError::InvalidArgument(format!("instant out of range: {now}")))?;

        Ok(Self {
            principal_id,
            level,
            monthly_quota: quota.monthly_quota,
            daily_limit: quota.daily_limit,
            remaining_monthly: quota.monthly_quota,
            remaining_daily: quota.daily_limit,
            monthly_anchor: now,
            monthly_reset_at,
            daily_reset_at,
            created_at: now,
            updated_at: now,
        })
    }

    /// Check whether a consumption would fit, without changing anything.
    ///
    /// The daily balance is checked first, so a request that exceeds both is
    /// reported as a daily shortfall.
    ///
    /// # Errors
    ///
    /// - `LedgerError::InvalidArgument` if either cost is negative.
    /// - `LedgerError::QuotaExceeded` if either balance is too low.
    pub fn check_consume(&self, daily_cost: i64, monthly_cost: i64) -> Result<()> {
        if daily_cost < 0 || monthly_cost < 0 {
            return Err(LedgerError::InvalidArgument(format!(
                "costs must be non-negative: daily={daily_cost}, monthly={monthly_cost}"
            )));
        }
        if self.remaining_daily < daily_cost {
            return Err(LedgerError::QuotaExceeded {
                which: QuotaKind::Daily,
                remaining: self.remaining_daily,
                requested: daily_cost,
            });
        }
        if self.remaining_monthly < monthly_cost {
            return Err(LedgerError::QuotaExceeded {
                which: QuotaKind::Monthly,
                remaining: self.remaining_monthly,
                requested: monthly_cost,
            });
        }
        Ok(())
    }

    /// Deduct both costs, or change nothing.
    ///
    /// # Errors
    ///
    /// Same as [`Self::check_consume`]; on error the record is untouched.
    pub fn consume(
        &mut self,
        daily_cost: i64,
        monthly_cost: i64,
        now: DateTime<Utc>,
    ) -> Result<Consumption> {
        self.check_consume(daily_cost, monthly_cost)?;
        self.remaining_daily -= daily_cost;
        self.remaining_monthly -= monthly_cost;
        self.updated_at = now;
        Ok(Consumption {
            principal_id: self.principal_id,
            daily_cost,
            monthly_cost,
            remaining_daily: self.remaining_daily,
            remaining_monthly: self.remaining_monthly,
        })
    }

    /// Whether either balance is due for a refill at `now`.
    #[must_use]
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.monthly_reset_at <= now || self.daily_reset_at <= now
    }

    /// Refill every balance whose reset instant is at or before `now`.
    ///
    /// Missed cycles collapse into a single refill: the reset instant moves to
    /// the first cycle boundary strictly after `now`. Returns `None`, leaving the
    /// record untouched, when nothing is due or when a due balance has no next
    /// reset instant inside chrono's representable range.
    pub fn refresh(&mut self, now: DateTime<Utc>) -> Option<RefreshApplied> {
        if !self.is_due(now) {
            return None;
        }

        let monthly = if self.monthly_reset_at <= now {
            Some(cycle::next_monthly_reset(self.monthly_anchor, now)?)
        } else {
            None
        };
        let daily = if self.daily_reset_at <= now {
            Some(cycle::advance_daily(self.daily_reset_at, now)?)
        } else {
            None
        };

        if let Some(next) = monthly {
            self.remaining_monthly = self.monthly_quota;
            self.monthly_reset_at = next;
        }
        if let Some(next) = daily {
            self.remaining_daily = self.daily_limit;
            self.daily_reset_at = next;
        }

        self.updated_at = now;
        Some(RefreshApplied {
            principal_id: self.principal_id,
            monthly_reset_at: monthly,
            daily_reset_at: daily,
            refreshed_at: now,
        })
    }

    /// Move to another membership level.
    ///
    /// An upgrade credits the capacity increase to the current balances; a
    /// downgrade clamps them to the new capacities. Reset instants are kept.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::InvalidArgument` for negative capacities.
    pub fn change_level(
        &mut self,
        level: MembershipLevel,
        quota: LevelQuota,
        now: DateTime<Utc>,
    ) -> Result<()> {
        quota.validate()?;
        self.remaining_monthly =
            rebalance(self.remaining_monthly, self.monthly_quota, quota.monthly_quota);
        self.remaining_daily = rebalance(self.remaining_daily, self.daily_limit, quota.daily_limit);
        self.monthly_quota = quota.monthly_quota;
        self.daily_limit = quota.daily_limit;
        self.level = level;
        self.updated_at = now;
        Ok(())
    }

    /// Whether both balances lie within `0..=capacity`.
    #[must_use]
    pub fn balances_within_capacity(&self) -> bool {
        (0..=self.daily_limit).contains(&self.remaining_daily)
            && (0..=self.monthly_quota).contains(&self.remaining_monthly)
    }
}

fn rebalance(remaining: i64, old_capacity: i64, new_capacity: i64) -> i64 {
    if new_capacity >= old_capacity {
        remaining
            .saturating_add(new_capacity - old_capacity)
            .clamp(0, new_capacity)
    } else {
        remaining.clamp(0, new_capacity)
    }
}

/// Outcome of an accepted consumption.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Consumption {
    /// The charged principal.
    pub principal_id: PrincipalId,
    /// Units taken from the daily balance.
    pub daily_cost: i64,
    /// Units taken from the monthly balance.
    pub monthly_cost: i64,
    /// Daily balance after the deduction.
    pub remaining_daily: i64,
    /// Monthly balance after the deduction.
    pub remaining_monthly: i64,
}

/// A refill applied to one record by a refresh pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshApplied {
    /// The refreshed principal.
    pub principal_id: PrincipalId,
    /// New monthly reset instant, if the monthly balance was refilled.
    pub monthly_reset_at: Option<DateTime<Utc>>,
    /// New daily reset instant, if the daily balance was refilled.
    pub daily_reset_at: Option<DateTime<Utc>>,
    /// The `now` the refresh ran at.
    pub refreshed_at: DateTime<Utc>,
}
