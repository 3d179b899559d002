use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use shared::*;
use uuid::Uuid;

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = crate::schema::machines)]
pub struct MachineRow {
    pub id: Uuid,
    pub name: String,
    pub category: String,
    pub status: String,
    pub job_member_id: Option<Uuid>,
    pub job_estimated_minutes: Option<i64>,
    pub job_started_at: Option<DateTime<Utc>>,
    pub job_completes_at: Option<DateTime<Utc>>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::machines)]
pub struct NewMachineRow {
    pub id: Uuid,
    pub name: String,
    pub category: String,
    pub status: String,
    pub job_member_id: Option<Uuid>,
    pub job_estimated_minutes: Option<i64>,
    pub job_started_at: Option<DateTime<Utc>>,
    pub job_completes_at: Option<DateTime<Utc>>,
}

/// Full write of a machine's mutable columns. `None` job fields clear the job.
#[derive(Debug, Clone, AsChangeset)]
#[diesel(table_name = crate::schema::machines, treat_none_as_null = true)]
pub struct MachineChangeset {
    pub status: String,
    pub job_member_id: Option<Uuid>,
    pub job_estimated_minutes: Option<i64>,
    pub job_started_at: Option<DateTime<Utc>>,
    pub job_completes_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = crate::schema::reservations)]
pub struct ReservationRow {
    pub id: Uuid,
    pub machine_id: Uuid,
    pub member_id: Uuid,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub purpose: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::reservations)]
pub struct NewReservationRow {
    pub id: Uuid,
    pub machine_id: Uuid,
    pub member_id: Uuid,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub purpose: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Queryable, Insertable)]
#[diesel(table_name = crate::schema::checkouts)]
pub struct CheckoutRow {
    pub id: Uuid,
    pub item_name: String,
    pub member_id: Uuid,
    pub checked_out_at: DateTime<Utc>,
    pub due_at: DateTime<Utc>,
    pub returned_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Queryable, Serialize, Deserialize)]
#[diesel(table_name = crate::schema::outbox_events)]
pub struct DbOutboxEvent {
    pub id: Uuid,
    pub aggregate_id: Uuid,
    pub event_type: String,
    pub event_data: serde_json::Value,
    pub processed: Option<bool>,
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::outbox_events)]
pub struct NewOutboxEvent {
    pub id: Uuid,
    pub aggregate_id: Uuid,
    pub event_type: String,
    pub event_data: serde_json::Value,
    pub processed: Option<bool>,
    pub created_at: Option<DateTime<Utc>>,
}

fn job_columns(job: Option<&CurrentJob>) -> (Option<Uuid>, Option<i64>, Option<DateTime<Utc>>, Option<DateTime<Utc>>) {
    match job {
        Some(job) => (
            Some(job.member_id),
            Some(job.estimated_minutes),
            Some(job.started_at),
            Some(job.completes_at),
        ),
        None => (None, None, None, None),
    }
}

impl From<&Machine> for NewMachineRow {
    fn from(machine: &Machine) -> Self {
        let (job_member_id, job_estimated_minutes, job_started_at, job_completes_at) =
            job_columns(machine.current_job.as_ref());
        Self {
            id: machine.id,
            name: machine.name.clone(),
            category: machine.category.as_str().to_string(),
            status: machine.status.as_str().to_string(),
            job_member_id,
            job_estimated_minutes,
            job_started_at,
            job_completes_at,
        }
    }
}

impl MachineChangeset {
    pub fn of(machine: &Machine, updated_at: DateTime<Utc>) -> Self {
        let (job_member_id, job_estimated_minutes, job_started_at, job_completes_at) =
            job_columns(machine.current_job.as_ref());
        Self {
            status: machine.status.as_str().to_string(),
            job_member_id,
            job_estimated_minutes,
            job_started_at,
            job_completes_at,
            updated_at: Some(updated_at),
        }
    }
}

impl TryFrom<MachineRow> for Machine {
    type Error = anyhow::Error;

    fn try_from(row: MachineRow) -> Result<Self, Self::Error> {
        let current_job = match (
            row.job_member_id,
            row.job_estimated_minutes,
            row.job_started_at,
            row.job_completes_at,
        ) {
            (Some(member_id), Some(estimated_minutes), Some(started_at), Some(completes_at)) => Some(CurrentJob {
                member_id,
                estimated_minutes,
                started_at,
                completes_at,
            }),
            _ => None,
        };

        Ok(Self {
            id: row.id,
            name: row.name,
            category: row.category.parse()?,
            status: row.status.parse()?,
            current_job,
        })
    }
}

impl From<&Reservation> for NewReservationRow {
    fn from(reservation: &Reservation) -> Self {
        Self {
            id: reservation.id,
            machine_id: reservation.machine_id,
            member_id: reservation.member_id,
            starts_at: reservation.starts_at,
            ends_at: reservation.ends_at,
            purpose: reservation.purpose.clone(),
            status: reservation.status.as_str().to_string(),
            created_at: reservation.created_at,
        }
    }
}

impl TryFrom<ReservationRow> for Reservation {
    type Error = anyhow::Error;

    fn try_from(row: ReservationRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            machine_id: row.machine_id,
            member_id: row.member_id,
            starts_at: row.starts_at,
            ends_at: row.ends_at,
            purpose: row.purpose,
            status: row.status.parse()?,
            created_at: row.created_at,
        })
    }
}

impl From<&Checkout> for CheckoutRow {
    fn from(checkout: &Checkout) -> Self {
        Self {
            id: checkout.id,
            item_name: checkout.item_name.clone(),
            member_id: checkout.member_id,
            checked_out_at: checkout.checked_out_at,
            due_at: checkout.due_at,
            returned_at: checkout.returned_at,
        }
    }
}

impl From<CheckoutRow> for Checkout {
    fn from(row: CheckoutRow) -> Self {
        Self {
            id: row.id,
            item_name: row.item_name,
            member_id: row.member_id,
            checked_out_at: row.checked_out_at,
            due_at: row.due_at,
            returned_at: row.returned_at,
        }
    }
}

impl From<OutboxEvent> for NewOutboxEvent {
    fn from(event: OutboxEvent) -> Self {
        Self {
            id: event.id,
            aggregate_id: event.aggregate_id,
            event_type: event.event_type,
            event_data: event.event_data,
            processed: Some(event.processed),
            created_at: Some(event.created_at),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_machine_row_round_trips_job_columns() {
        let started_at = Utc.with_ymd_and_hms(2026, 3, 14, 9, 0, 0).unwrap();
        let mut machine = Machine::new("Trotec Speedy", MachineCategory::LaserCutter);
        machine.status = MachineStatus::InUse;
        machine.current_job = Some(CurrentJob::starting_at(Uuid::new_v4(), started_at, 40));

        let new_row = NewMachineRow::from(&machine);
        let row = MachineRow {
            id: new_row.id,
            name: new_row.name,
            category: new_row.category,
            status: new_row.status,
            job_member_id: new_row.job_member_id,
            job_estimated_minutes: new_row.job_estimated_minutes,
            job_started_at: new_row.job_started_at,
            job_completes_at: new_row.job_completes_at,
            created_at: None,
            updated_at: None,
        };

        assert_eq!(Machine::try_from(row).unwrap(), machine);
    }

    #[test]
    fn test_changeset_clears_job_when_idle() {
        let machine = Machine::new("Trotec Speedy", MachineCategory::LaserCutter);
        let changeset = MachineChangeset::of(&machine, Utc::now());
        assert_eq!(changeset.status, "idle");
        assert!(changeset.job_member_id.is_none());
        assert!(changeset.job_completes_at.is_none());
    }

    #[test]
    fn test_unknown_status_is_rejected() {
        let row = ReservationRow {
            id: Uuid::new_v4(),
            machine_id: Uuid::new_v4(),
            member_id: Uuid::new_v4(),
            starts_at: Utc::now(),
            ends_at: Utc::now(),
            purpose: "jig".to_string(),
            status: "archived".to_string(),
            created_at: Utc::now(),
            updated_at: None,
        };
        assert!(Reservation::try_from(row).is_err());
    }
}
