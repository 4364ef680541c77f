//! Core types for the quota ledger.
//!
//! This crate provides the foundational types shared by the store and the service:
//!
//! - **Identifiers**: `PrincipalId`, `ResourceId`
//! - **Quotas**: `QuotaRecord`, `MembershipLevel`, `LevelQuota`, `QuotaSchedule`
//! - **Cooldowns**: `CooldownRecord`, `Visibility`, `Transition`
//! - **Time**: `Clock`, `SystemClock`, `ManualClock`, reset-cycle arithmetic
//!
//! # Units
//!
//! Quota balances are integer units (`i64`). A principal has two balances: a
//! monthly quota and a daily allowance. A consumption names a cost against each
//! and succeeds only if both fit.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod clock;
pub mod cooldown;
pub mod cycle;
pub mod error;
pub mod ids;
pub mod quota;

pub use clock::{Clock, ManualClock, SystemClock};
pub use cooldown::{
    check_window, CooldownRecord, Transition, Visibility, DEFAULT_COOLDOWN_WINDOW_SECS,
};
pub use error::{LedgerError, QuotaKind, Result};
pub use ids::{IdError, PrincipalId, ResourceId};
pub use quota::{
    Consumption, LevelQuota, MembershipLevel, QuotaRecord, QuotaSchedule, RefreshApplied,
    DEFAULT_DAILY_RESET_HOUR,
};
