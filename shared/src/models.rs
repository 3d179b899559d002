use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MachineCategory {
    Printer,
    Cnc,
    LaserCutter,
    Workstation,
}

impl MachineCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            MachineCategory::Printer => "printer",
            MachineCategory::Cnc => "cnc",
            MachineCategory::LaserCutter => "laser_cutter",
            MachineCategory::Workstation => "workstation",
        }
    }
}

impl FromStr for MachineCategory {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "printer" => Ok(MachineCategory::Printer),
            "cnc" => Ok(MachineCategory::Cnc),
            "laser_cutter" => Ok(MachineCategory::LaserCutter),
            "workstation" => Ok(MachineCategory::Workstation),
            other => Err(anyhow::anyhow!("unknown machine category: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MachineStatus {
    Idle,
    InUse,
    Maintenance,
    Offline,
}

impl MachineStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MachineStatus::Idle => "idle",
            MachineStatus::InUse => "in_use",
            MachineStatus::Maintenance => "maintenance",
            MachineStatus::Offline => "offline",
        }
    }
}

impl fmt::Display for MachineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MachineStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "idle" => Ok(MachineStatus::Idle),
            "in_use" => Ok(MachineStatus::InUse),
            "maintenance" => Ok(MachineStatus::Maintenance),
            "offline" => Ok(MachineStatus::Offline),
            other => Err(anyhow::anyhow!("unknown machine status: {}", other)),
        }
    }
}

/// The job a machine is currently running.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrentJob {
    pub member_id: Uuid,
    pub estimated_minutes: i64,
    pub started_at: DateTime<Utc>,
    pub completes_at: DateTime<Utc>,
}

impl CurrentJob {
    /// A job of `estimated_minutes` starting at `started_at`.
    pub fn starting_at(member_id: Uuid, started_at: DateTime<Utc>, estimated_minutes: i64) -> Self {
        Self {
            member_id,
            estimated_minutes,
            started_at,
            completes_at: started_at + Duration::minutes(estimated_minutes),
        }
    }

    /// The job a machine runs for the duration of an approved reservation.
    pub fn for_reservation(reservation: &Reservation) -> Self {
        Self {
            member_id: reservation.member_id,
            estimated_minutes: (reservation.ends_at - reservation.starts_at).num_minutes(),
            started_at: reservation.starts_at,
            completes_at: reservation.ends_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Machine {
    pub id: Uuid,
    pub name: String,
    pub category: MachineCategory,
    pub status: MachineStatus,
    pub current_job: Option<CurrentJob>,
}

impl Machine {
    pub fn new(name: impl Into<String>, category: MachineCategory) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            category,
            status: MachineStatus::Idle,
            current_job: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReservationStatus {
    Pending,
    Approved,
    Rejected,
    Completed,
}

impl ReservationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReservationStatus::Pending => "pending",
            ReservationStatus::Approved => "approved",
            ReservationStatus::Rejected => "rejected",
            ReservationStatus::Completed => "completed",
        }
    }

    /// Pending and approved reservations hold their window on the machine.
    pub fn holds_window(&self) -> bool {
        matches!(self, ReservationStatus::Pending | ReservationStatus::Approved)
    }
}

impl fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReservationStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ReservationStatus::Pending),
            "approved" => Ok(ReservationStatus::Approved),
            "rejected" => Ok(ReservationStatus::Rejected),
            "completed" => Ok(ReservationStatus::Completed),
            other => Err(anyhow::anyhow!("unknown reservation status: {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: Uuid,
    pub machine_id: Uuid,
    pub member_id: Uuid,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub purpose: String,
    pub status: ReservationStatus,
    pub created_at: DateTime<Utc>,
}

impl Reservation {
    /// Half-open overlap test against `[starts_at, ends_at)`.
    pub fn overlaps(&self, starts_at: DateTime<Utc>, ends_at: DateTime<Utc>) -> bool {
        self.starts_at < ends_at && starts_at < self.ends_at
    }

    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        self.status == ReservationStatus::Approved && self.starts_at <= now && now < self.ends_at
    }
}

/// What a member submits when asking for machine time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReservationRequest {
    pub machine_id: Uuid,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub purpose: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Member,
    Operator,
}

impl FromStr for Role {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "member" => Ok(Role::Member),
            "operator" => Ok(Role::Operator),
            other => Err(anyhow::anyhow!("unknown role: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub member_id: Uuid,
    pub role: Role,
}

impl Actor {
    pub fn member(member_id: Uuid) -> Self {
        Self { member_id, role: Role::Member }
    }

    pub fn operator(member_id: Uuid) -> Self {
        Self { member_id, role: Role::Operator }
    }

    pub fn is_operator(&self) -> bool {
        self.role == Role::Operator
    }
}

/// Partial update for a machine record. `current_job: Some(None)` clears the job.
#[derive(Debug, Clone, Default)]
pub struct MachinePatch {
    pub status: Option<MachineStatus>,
    pub current_job: Option<Option<CurrentJob>>,
}

impl MachinePatch {
    /// The patch that turns `before` into `after`.
    pub fn between(before: &Machine, after: &Machine) -> Self {
        Self {
            status: (before.status != after.status).then_some(after.status),
            current_job: (before.current_job != after.current_job).then(|| after.current_job.clone()),
        }
    }

    pub fn apply(self, machine: &mut Machine) {
        if let Some(status) = self.status {
            machine.status = status;
        }
        if let Some(job) = self.current_job {
            machine.current_job = job;
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ReservationPatch {
    pub status: Option<ReservationStatus>,
}

impl ReservationPatch {
    pub fn status(status: ReservationStatus) -> Self {
        Self { status: Some(status) }
    }

    pub fn apply(self, reservation: &mut Reservation) {
        if let Some(status) = self.status {
            reservation.status = status;
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboxEvent {
    pub id: Uuid,
    pub aggregate_id: Uuid,
    pub event_type: String,
    pub event_data: serde_json::Value,
    pub processed: bool,
    pub created_at: DateTime<Utc>,
}

impl OutboxEvent {
    pub fn new(aggregate_id: Uuid, event_type: &str, event_data: serde_json::Value, created_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            aggregate_id,
            event_type: event_type.to_string(),
            event_data,
            processed: false,
            created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 14, hour, minute, 0).unwrap()
    }

    fn reservation(starts_at: DateTime<Utc>, ends_at: DateTime<Utc>) -> Reservation {
        Reservation {
            id: Uuid::new_v4(),
            machine_id: Uuid::new_v4(),
            member_id: Uuid::new_v4(),
            starts_at,
            ends_at,
            purpose: "bracket print".to_string(),
            status: ReservationStatus::Approved,
            created_at: at(8, 0),
        }
    }

    #[test]
    fn test_overlap_is_half_open() {
        let r = reservation(at(10, 0), at(12, 0));
        assert!(r.overlaps(at(11, 0), at(13, 0)));
        assert!(r.overlaps(at(9, 0), at(10, 1)));
        assert!(!r.overlaps(at(12, 0), at(13, 0)));
        assert!(!r.overlaps(at(9, 0), at(10, 0)));
    }

    #[test]
    fn test_status_strings_parse_back() {
        for status in [
            MachineStatus::Idle,
            MachineStatus::InUse,
            MachineStatus::Maintenance,
            MachineStatus::Offline,
        ] {
            assert_eq!(status.as_str().parse::<MachineStatus>().unwrap(), status);
        }
        assert!("broken".parse::<ReservationStatus>().is_err());
        assert_eq!("laser_cutter".parse::<MachineCategory>().unwrap(), MachineCategory::LaserCutter);
    }

    #[test]
    fn test_machine_patch_between_only_carries_changes() {
        let before = Machine::new("Prusa MK4", MachineCategory::Printer);
        let mut after = before.clone();
        after.status = MachineStatus::Maintenance;

        let patch = MachinePatch::between(&before, &after);
        assert_eq!(patch.status, Some(MachineStatus::Maintenance));
        assert!(patch.current_job.is_none());

        let mut target = before.clone();
        patch.apply(&mut target);
        assert_eq!(target, after);
    }

    #[test]
    fn test_job_for_reservation_spans_window() {
        let r = reservation(at(10, 0), at(11, 30));
        let job = CurrentJob::for_reservation(&r);
        assert_eq!(job.estimated_minutes, 90);
        assert_eq!(job.completes_at, at(11, 30));
        assert_eq!(job.member_id, r.member_id);
    }
}
