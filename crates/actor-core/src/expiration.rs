//! Expiring time intervals.
//!
//! All queries take `now` explicitly so callers (and tests) control the clock.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ScheduleError;

/// Longest interval accepted from callers, one hundred years in minutes.
pub const MAX_MINUTES: f64 = 100.0 * 365.25 * 24.0 * 60.0;

/// An interval of `duration` starting at `started_at`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Expiration {
    started_at: DateTime<Utc>,
    duration: Duration,
    #[serde(default)]
    notified: bool,
}

impl Expiration {
    pub fn new(started_at: DateTime<Utc>, duration: Duration) -> Self {
        Self {
            started_at,
            duration,
            notified: false,
        }
    }

    /// Interval of fractional `minutes`, rounded to the millisecond.
    pub fn from_minutes(started_at: DateTime<Utc>, minutes: f64) -> Self {
        Self::new(started_at, minutes_to_duration(minutes))
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.started_at
            .checked_add_signed(self.duration)
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at()
    }

    /// True on the first call after expiry, false afterwards.
    /// Empty intervals never report.
    pub fn just_expired(&mut self, now: DateTime<Utc>) -> bool {
        if self.duration == Duration::zero() || self.notified || !self.is_expired(now) {
            return false;
        }
        self.notified = true;
        true
    }

    /// Time elapsed since the start.
    pub fn passed(&self, now: DateTime<Utc>) -> Duration {
        now - self.started_at
    }

    /// Time left until expiry, never negative.
    pub fn remaining(&self, now: DateTime<Utc>) -> Duration {
        (self.expires_at() - now).max(Duration::zero())
    }

    /// Remaining share of the interval, `0.0..=1.0`.
    pub fn remaining_fraction(&self, now: DateTime<Utc>) -> f64 {
        let total = self.duration.num_milliseconds();
        if total <= 0 {
            return 0.0;
        }
        self.remaining(now).num_milliseconds() as f64 / total as f64
    }
}

/// Whether `minutes` is a usable interval length.
pub fn minutes_in_range(minutes: f64) -> bool {
    minutes.is_finite() && minutes.abs() <= MAX_MINUTES
}

/// Normalise an optional time limit: non-positive means unlimited.
///
/// # Errors
///
/// `InvalidDuration` for NaN, infinite or out-of-range values.
pub fn time_limit(minutes: Option<f64>) -> Result<Option<f64>, ScheduleError> {
    match minutes {
        Some(m) if !minutes_in_range(m) => Err(ScheduleError::InvalidDuration(m)),
        other => Ok(other.filter(|m| *m > 0.0)),
    }
}

/// Convert fractional minutes to a duration, rounded to the millisecond.
/// Values outside `±MAX_MINUTES` saturate; NaN becomes zero.
pub fn minutes_to_duration(minutes: f64) -> Duration {
    let minutes = if minutes.is_nan() { 0.0 } else { minutes.clamp(-MAX_MINUTES, MAX_MINUTES) };
    Duration::milliseconds((minutes * 60_000.0).round() as i64)
}

/// Convert a duration to fractional minutes.
pub fn duration_to_minutes(duration: Duration) -> f64 {
    duration.num_milliseconds() as f64 / 60_000.0
}
