use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::{LabError, LabResult};
use crate::models::{Machine, Reservation};
use crate::policy::ReservationPolicy;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Availability {
    pub available: bool,
    pub conflicts: Vec<Reservation>,
    /// The machine's running job overlaps the window.
    pub job_conflict: bool,
}

pub fn validate_window(
    starts_at: DateTime<Utc>,
    ends_at: DateTime<Utc>,
    policy: &ReservationPolicy,
) -> LabResult<()> {
    if ends_at <= starts_at {
        return Err(LabError::Validation(format!(
            "reservation must end after it starts ({} >= {})",
            starts_at, ends_at
        )));
    }
    if ends_at - starts_at > policy.max_duration {
        return Err(LabError::Validation(format!(
            "reservation of {} minutes exceeds the {} minute maximum",
            (ends_at - starts_at).num_minutes(),
            policy.max_duration.num_minutes()
        )));
    }
    Ok(())
}

/// Checks `[starts_at, ends_at)` on `machine` against `existing` reservations and the
/// machine's current job. Reservations for other machines, and rejected or completed
/// ones, never conflict.
pub fn check_availability(
    machine: &Machine,
    starts_at: DateTime<Utc>,
    ends_at: DateTime<Utc>,
    existing: &[Reservation],
    policy: &ReservationPolicy,
) -> LabResult<Availability> {
    validate_window(starts_at, ends_at, policy)?;

    let conflicts: Vec<Reservation> = existing
        .iter()
        .filter(|r| r.machine_id == machine.id)
        .filter(|r| r.status.holds_window())
        .filter(|r| r.overlaps(starts_at, ends_at))
        .cloned()
        .collect();

    let job_conflict = machine
        .current_job
        .as_ref()
        .map(|job| job.started_at < ends_at && starts_at < job.completes_at)
        .unwrap_or(false);

    Ok(Availability {
        available: conflicts.is_empty() && !job_conflict,
        conflicts,
        job_conflict,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CurrentJob, MachineCategory, MachineStatus, ReservationStatus};
    use chrono::{Duration, TimeZone};
    use uuid::Uuid;

    fn at(hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 14, hour, minute, 0).unwrap()
    }

    fn reservation_on(machine: &Machine, from: DateTime<Utc>, to: DateTime<Utc>, status: ReservationStatus) -> Reservation {
        Reservation {
            id: Uuid::new_v4(),
            machine_id: machine.id,
            member_id: Uuid::new_v4(),
            starts_at: from,
            ends_at: to,
            purpose: "enclosure panels".to_string(),
            status,
            created_at: at(8, 0),
        }
    }

    #[test]
    fn test_overlapping_approved_reservation_is_reported() {
        let machine = Machine::new("Glowforge", MachineCategory::LaserCutter);
        let existing = vec![reservation_on(&machine, at(10, 0), at(12, 0), ReservationStatus::Approved)];

        let result = check_availability(&machine, at(11, 0), at(13, 0), &existing, &ReservationPolicy::default()).unwrap();

        assert!(!result.available);
        assert_eq!(result.conflicts, existing);
        assert!(!result.job_conflict);
    }

    #[test]
    fn test_rejected_completed_and_other_machines_do_not_conflict() {
        let machine = Machine::new("Glowforge", MachineCategory::LaserCutter);
        let other = Machine::new("Shapeoko", MachineCategory::Cnc);
        let existing = vec![
            reservation_on(&machine, at(10, 0), at(12, 0), ReservationStatus::Rejected),
            reservation_on(&machine, at(10, 0), at(12, 0), ReservationStatus::Completed),
            reservation_on(&other, at(10, 0), at(12, 0), ReservationStatus::Approved),
            reservation_on(&machine, at(12, 0), at(14, 0), ReservationStatus::Pending),
        ];

        let result = check_availability(&machine, at(10, 0), at(12, 0), &existing, &ReservationPolicy::default()).unwrap();

        assert!(result.available);
        assert!(result.conflicts.is_empty());
    }

    #[test]
    fn test_pending_reservation_holds_its_window() {
        let machine = Machine::new("Bambu X1", MachineCategory::Printer);
        let existing = vec![reservation_on(&machine, at(9, 0), at(10, 30), ReservationStatus::Pending)];

        let result = check_availability(&machine, at(10, 0), at(11, 0), &existing, &ReservationPolicy::default()).unwrap();

        assert!(!result.available);
        assert_eq!(result.conflicts.len(), 1);
    }

    #[test]
    fn test_running_job_blocks_window() {
        let mut machine = Machine::new("Bambu X1", MachineCategory::Printer);
        machine.status = MachineStatus::InUse;
        machine.current_job = Some(CurrentJob::starting_at(Uuid::new_v4(), at(9, 0), 120));

        let overlapping = check_availability(&machine, at(10, 0), at(11, 0), &[], &ReservationPolicy::default()).unwrap();
        assert!(!overlapping.available);
        assert!(overlapping.job_conflict);

        let after = check_availability(&machine, at(11, 0), at(12, 0), &[], &ReservationPolicy::default()).unwrap();
        assert!(after.available);
    }

    #[test]
    fn test_window_must_move_forward() {
        let machine = Machine::new("Bambu X1", MachineCategory::Printer);
        let policy = ReservationPolicy::default();

        assert!(matches!(
            check_availability(&machine, at(10, 0), at(10, 0), &[], &policy),
            Err(LabError::Validation(_))
        ));
        assert!(matches!(
            check_availability(&machine, at(11, 0), at(10, 0), &[], &policy),
            Err(LabError::Validation(_))
        ));
    }

    #[test]
    fn test_maximum_duration_is_inclusive() {
        let machine = Machine::new("Workstation 3", MachineCategory::Workstation);
        let policy = ReservationPolicy::default();
        let start = at(8, 0);

        assert!(check_availability(&machine, start, start + Duration::hours(4), &[], &policy).is_ok());
        assert!(matches!(
            check_availability(&machine, start, start + Duration::hours(4) + Duration::minutes(1), &[], &policy),
            Err(LabError::Validation(_))
        ));
    }

    #[test]
    fn test_check_is_idempotent() {
        let machine = Machine::new("Glowforge", MachineCategory::LaserCutter);
        let existing = vec![
            reservation_on(&machine, at(10, 0), at(12, 0), ReservationStatus::Approved),
            reservation_on(&machine, at(13, 0), at(14, 0), ReservationStatus::Pending),
        ];
        let policy = ReservationPolicy::default();

        let first = check_availability(&machine, at(11, 30), at(13, 30), &existing, &policy).unwrap();
        let second = check_availability(&machine, at(11, 30), at(13, 30), &existing, &policy).unwrap();

        assert_eq!(first, second);
        assert_eq!(first.conflicts.len(), 2);
    }
}
