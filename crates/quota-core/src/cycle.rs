//! Reset-cycle arithmetic.
//!
//! Monthly cycles are counted from a fixed anchor (`anchor + n months`) so that a
//! cycle starting on the 31st does not drift to the 28th after February. Daily
//! cycles fire once a day at a fixed UTC hour.

use chrono::{DateTime, Duration, Months, NaiveTime, TimeZone, Utc};

/// Length of one daily cycle.
#[must_use]
pub fn one_day() -> Duration {
    Duration::days(1)
}

/// Monthly reset instant number `n` after `anchor`.
///
/// Returns `None` only if the result is outside chrono's representable range.
#[must_use]
pub fn monthly_reset(anchor: DateTime<Utc>, n: u32) -> Option<DateTime<Utc>> {
    anchor.checked_add_months(Months::new(n))
}

/// First monthly reset after `anchor` that is strictly later than `now`.
///
/// Starts counting from the first cycle boundary, so an `anchor` in the future
/// yields `anchor + 1 month`.
#[must_use]
pub fn next_monthly_reset(anchor: DateTime<Utc>, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let mut n: u32 = 1;
    let mut candidate = monthly_reset(anchor, n)?;
    while candidate <= now {
        n = n.checked_add(1)?;
        candidate = monthly_reset(anchor, n)?;
    }
    Some(candidate)
}

/// First instant strictly after `now` whose wall-clock time is `hour:00` UTC.
#[must_use]
pub fn next_daily_reset(now: DateTime<Utc>, hour: u32) -> Option<DateTime<Utc>> {
    let time = NaiveTime::from_hms_opt(hour, 0, 0)?;
    let today = Utc.from_utc_datetime(&now.date_naive().and_time(time));
    if today > now {
        Some(today)
    } else {
        today.checked_add_signed(one_day())
    }
}

/// Advance a daily reset instant by whole days until it is strictly after `now`.
///
/// A `reset_at` already in the future is returned unchanged. Missed cycles are
/// skipped in one step rather than one day at a time. Returns `None` only if
/// the result is outside chrono's representable range.
#[must_use]
pub fn advance_daily(reset_at: DateTime<Utc>, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    if reset_at > now {
        return Some(reset_at);
    }
    let behind = now.signed_duration_since(reset_at).num_days().checked_add(1)?;
    reset_at.checked_add_signed(Duration::try_days(behind)?)
}
