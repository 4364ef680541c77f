//! Cooldown-gated flags.
//!
//! A [`CooldownRecord`] guards one flag on one resource. A genuine change of
//! value is accepted at most once per cooldown window; re-asserting the current
//! value is always accepted and does not start a new window.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{LedgerError, Result};
use crate::ResourceId;

/// Default minimum time between two accepted changes (3 days).
pub const DEFAULT_COOLDOWN_WINDOW_SECS: i64 = 3 * 24 * 60 * 60;

/// Visibility of a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    /// Only the owner can see the resource.
    #[default]
    Private,
    /// Anyone can see the resource.
    Public,
}

impl Visibility {
    /// Whether the resource is public.
    #[must_use]
    pub const fn is_public(self) -> bool {
        matches!(self, Self::Public)
    }
}

impl From<bool> for Visibility {
    fn from(public: bool) -> Self {
        if public {
            Self::Public
        } else {
            Self::Private
        }
    }
}

/// Cooldown state for one resource flag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CooldownRecord {
    /// The gated resource.
    pub resource_id: ResourceId,

    /// Current value of the flag.
    pub flag_value: Visibility,

    /// Instant of the last accepted change; `None` if it never changed.
    pub last_changed_at: Option<DateTime<Utc>>,

    /// When the record was registered.
    pub created_at: DateTime<Utc>,

    /// When the record was last written.
    pub updated_at: DateTime<Utc>,
}

/// Outcome of an accepted transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum Transition {
    /// The value changed; a new cooldown window started at `changed_at`.
    Applied {
        /// Instant the change was recorded.
        changed_at: DateTime<Utc>,
    },
    /// The requested value was already current; nothing was written.
    Unchanged,
}

impl CooldownRecord {
    /// Register a flag that has never been changed.
    #[must_use]
    pub fn new(resource_id: ResourceId, initial: Visibility, now: DateTime<Utc>) -> Self {
        Self {
            resource_id,
            flag_value: initial,
            last_changed_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Earliest instant a change will be accepted, if a window is running.
    ///
    /// `None` if the flag never changed, or if the window ends past the last
    /// representable instant.
    #[must_use]
    pub fn next_allowed_at(&self, window: Duration) -> Option<DateTime<Utc>> {
        self.last_changed_at
            .and_then(|at| at.checked_add_signed(window))
    }

    /// Set the flag, subject to the cooldown window.
    ///
    /// # Errors
    ///
    /// - `LedgerError::InvalidArgument` if `window` is negative or too large to
    ///   add to the timestamps involved.
    /// - `LedgerError::CooldownActive` if the last change is less than `window`
    ///   before `now`; the record is untouched.
    pub fn transition(
        &mut self,
        new_value: Visibility,
        now: DateTime<Utc>,
        window: Duration,
    ) -> Result<Transition> {
        check_window(window, now)?;
        if new_value == self.flag_value {
            return Ok(Transition::Unchanged);
        }
        if let Some(at) = self.last_changed_at {
            let next_allowed_at = at
                .checked_add_signed(window)
                .ok_or_else(|| window_out_of_range(window))?;
            if now < next_allowed_at {
                return Err(LedgerError::CooldownActive { next_allowed_at });
            }
        }

        self.flag_value = new_value;
        self.last_changed_at = Some(now);
        self.updated_at = now;
        Ok(Transition::Applied { changed_at: now })
    }
}

/// Reject a cooldown window that is negative or cannot be added to `now`.
///
/// # Errors
///
/// Returns `LedgerError::InvalidArgument` describing the window.
pub fn check_window(window: Duration, now: DateTime<Utc>) -> Result<()> {
    if window < Duration::zero() {
        return Err(LedgerError::InvalidArgument(format!(
            "cooldown window must be non-negative: {window}"
        )));
    }
    if now.checked_add_signed(window).is_none() {
        return Err(window_out_of_range(window));
    }
    Ok(())
}

fn window_out_of_range(window: Duration) -> LedgerError {
    LedgerError::InvalidArgument(format!("cooldown window out of range: {window}"))
}
