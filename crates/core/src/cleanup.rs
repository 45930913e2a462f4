//! Cleanup throttle rules shared by every record-store backend.
//!
//! Each application owns one throttle row `(application_id, last_run,
//! interval_minutes)`. A sweep is due when `last_run + interval < now`;
//! claiming it moves `last_run` to `now` in the same statement, so only one
//! process sweeps per interval.

use std::time::Duration as StdDuration;

use chrono::Duration;

use crate::types::Timestamp;

/// Interval written into a freshly created throttle row.
pub const DEFAULT_CLEANUP_INTERVAL_MINUTES: i32 = 10;

/// Floor applied to non-positive configured intervals.
pub const MIN_CLEANUP_INTERVAL_MINUTES: i32 = 1;

/// Clamp a configured interval to at least one minute.
pub fn effective_interval_minutes(configured: i32) -> i32 {
    if configured <= 0 {
        MIN_CLEANUP_INTERVAL_MINUTES
    } else {
        configured
    }
}

/// Timer period for a reaper driven by `configured` minutes.
pub fn sweep_period(configured: i32) -> StdDuration {
    let minutes = effective_interval_minutes(configured) as u64;
    StdDuration::from_secs(minutes * 60)
}

/// Whether the throttle row permits another sweep at `now`.
pub fn is_sweep_due(last_run: Timestamp, interval_minutes: i32, now: Timestamp) -> bool {
    last_run + Duration::minutes(i64::from(interval_minutes)) < now
}
