use chrono::Duration;

use crate::error::{LabError, LabResult};

pub const DEFAULT_MAX_RESERVATION_HOURS: i64 = 4;

/// Reservation rules the console enforces.
#[derive(Debug, Clone)]
pub struct ReservationPolicy {
    pub max_duration: Duration,
    /// Approve new requests on submission when their window is free.
    pub auto_approve: bool,
}

impl ReservationPolicy {
    /// A policy capping reservations at `hours`, which must be positive and
    /// representable as a `chrono::Duration`.
    pub fn with_max_hours(hours: i64) -> LabResult<Self> {
        if hours <= 0 {
            return Err(LabError::Validation(format!(
                "max reservation hours must be positive, got {}",
                hours
            )));
        }
        let max_duration = Duration::try_hours(hours).ok_or_else(|| {
            LabError::Validation(format!("max reservation hours {} is out of range", hours))
        })?;
        Ok(Self {
            max_duration,
            ..Self::default()
        })
    }
}

impl Default for ReservationPolicy {
    fn default() -> Self {
        Self {
            max_duration: Duration::hours(DEFAULT_MAX_RESERVATION_HOURS),
            auto_approve: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_max_hours_must_be_positive_and_in_range() {
        assert!(matches!(ReservationPolicy::with_max_hours(0), Err(LabError::Validation(_))));
        assert!(matches!(ReservationPolicy::with_max_hours(-3), Err(LabError::Validation(_))));
        assert!(matches!(ReservationPolicy::with_max_hours(i64::MAX), Err(LabError::Validation(_))));

        let policy = ReservationPolicy::with_max_hours(6).unwrap();
        assert_eq!(policy.max_duration, Duration::hours(6));
        assert!(!policy.auto_approve);
    }
}
