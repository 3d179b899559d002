//! Elapsed/remaining time helpers shared by machine jobs and inventory checkouts.

use chrono::{DateTime, Utc};

const MILLIS_PER_MINUTE: f64 = 60_000.0;

/// Whole minutes until `completes_at`, halves rounding up. Negative once overdue.
pub fn remaining_minutes(completes_at: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    let minutes = (completes_at - now).num_milliseconds() as f64 / MILLIS_PER_MINUTE;
    (minutes + 0.5).floor() as i64
}

/// Share of a job's estimated duration that has elapsed, in `[0, 100]`.
pub fn progress_percent(completes_at: DateTime<Utc>, estimated_minutes: i64, now: DateTime<Utc>) -> f64 {
    if estimated_minutes <= 0 {
        return 100.0;
    }
    let remaining = (completes_at - now).num_milliseconds() as f64;
    let total = estimated_minutes as f64 * MILLIS_PER_MINUTE;
    ((1.0 - remaining / total) * 100.0).clamp(0.0, 100.0)
}

pub fn is_overdue(due_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    now > due_at
}
