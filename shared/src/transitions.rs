//! Allowed state changes for machines and reservations, and the read-time
//! convergence rules that apply transitions driven purely by the clock.
//!
//! Nothing here schedules work. Time-driven changes (a job finishing, an
//! approved reservation starting or ending) only take effect when a caller
//! converges the records, so a status read without converging may be stale.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::availability::check_availability;
use crate::error::{LabError, LabResult};
use crate::models::{Actor, CurrentJob, Machine, MachineStatus, Reservation, ReservationStatus};
use crate::policy::ReservationPolicy;

/// Requested machine state. Entering `InUse` needs the job that occupies it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "job", rename_all = "snake_case")]
pub enum MachineTarget {
    Idle,
    InUse(CurrentJob),
    Maintenance,
    Offline,
}

impl MachineTarget {
    pub fn status(&self) -> MachineStatus {
        match self {
            MachineTarget::Idle => MachineStatus::Idle,
            MachineTarget::InUse(_) => MachineStatus::InUse,
            MachineTarget::Maintenance => MachineStatus::Maintenance,
            MachineTarget::Offline => MachineStatus::Offline,
        }
    }
}

enum Gate {
    Operator,
    /// Anyone once the running job has finished, otherwise operator only.
    JobFinishedOrOperator,
}

fn machine_gate(from: MachineStatus, to: MachineStatus) -> Option<Gate> {
    use MachineStatus::*;

    match (from, to) {
        (Idle, InUse) => Some(Gate::Operator),
        (InUse, Idle) => Some(Gate::JobFinishedOrOperator),
        (Idle | InUse, Maintenance) => Some(Gate::Operator),
        (Maintenance, Idle) => Some(Gate::Operator),
        (Idle | InUse | Maintenance, Offline) => Some(Gate::Operator),
        (Offline, Idle) => Some(Gate::Operator),
        _ => None,
    }
}

/// Applies a requested status change. `existing` are the machine's reservations;
/// a manually started job may not cover a window another member holds.
pub fn transition_machine(
    machine: &Machine,
    existing: &[Reservation],
    target: MachineTarget,
    actor: &Actor,
    now: DateTime<Utc>,
) -> LabResult<Machine> {
    let to = target.status();
    let gate = machine_gate(machine.status, to)
        .ok_or_else(|| LabError::invalid_transition(machine.status, to))?;

    let permitted = match gate {
        Gate::Operator => actor.is_operator(),
        Gate::JobFinishedOrOperator => {
            let finished = machine
                .current_job
                .as_ref()
                .map(|job| job.completes_at <= now)
                .unwrap_or(true);
            finished || actor.is_operator()
        }
    };
    if !permitted {
        return Err(LabError::Unauthorized(format!(
            "moving machine {} from {} to {} requires an operator",
            machine.id, machine.status, to
        )));
    }

    let mut next = machine.clone();
    next.status = to;
    next.current_job = match target {
        MachineTarget::InUse(job) => {
            validate_job(&job, now)?;
            let conflicts: Vec<_> = existing
                .iter()
                .filter(|r| r.machine_id == machine.id && r.member_id != job.member_id)
                .filter(|r| r.status.holds_window())
                .filter(|r| r.overlaps(job.started_at, job.completes_at))
                .map(|r| r.id)
                .collect();
            if !conflicts.is_empty() {
                return Err(LabError::Conflict {
                    machine_id: machine.id,
                    reservations: conflicts,
                });
            }
            Some(job)
        }
        _ => None,
    };
    Ok(next)
}

fn validate_job(job: &CurrentJob, now: DateTime<Utc>) -> LabResult<()> {
    if job.estimated_minutes <= 0 {
        return Err(LabError::Validation(format!(
            "job estimate must be positive, got {} minutes",
            job.estimated_minutes
        )));
    }
    if job.started_at >= job.completes_at {
        return Err(LabError::Validation(format!(
            "job must start before it completes ({} >= {})",
            job.started_at, job.completes_at
        )));
    }
    if job.completes_at <= now {
        return Err(LabError::Validation(format!(
            "job completing at {} is already finished",
            job.completes_at
        )));
    }
    Ok(())
}

fn require_operator(actor: &Actor, action: &str, reservation: &Reservation) -> LabResult<()> {
    if actor.is_operator() {
        Ok(())
    } else {
        Err(LabError::Unauthorized(format!(
            "only operators may {} reservation {}",
            action, reservation.id
        )))
    }
}

fn require_status(reservation: &Reservation, expected: ReservationStatus, to: ReservationStatus) -> LabResult<()> {
    if reservation.status == expected {
        Ok(())
    } else {
        Err(LabError::invalid_transition(reservation.status, to))
    }
}

/// Approves a pending reservation. `existing` may include the reservation itself.
pub fn approve_reservation(
    reservation: &Reservation,
    machine: &Machine,
    existing: &[Reservation],
    actor: &Actor,
    policy: &ReservationPolicy,
) -> LabResult<Reservation> {
    require_operator(actor, "approve", reservation)?;
    require_status(reservation, ReservationStatus::Pending, ReservationStatus::Approved)?;
    if matches!(machine.status, MachineStatus::Maintenance | MachineStatus::Offline) {
        return Err(LabError::Validation(format!(
            "machine {} is {} and cannot take reservations",
            machine.id, machine.status
        )));
    }

    let others: Vec<Reservation> = existing
        .iter()
        .filter(|r| r.id != reservation.id)
        .cloned()
        .collect();
    let availability = check_availability(machine, reservation.starts_at, reservation.ends_at, &others, policy)?;
    if !availability.available {
        return Err(LabError::Conflict {
            machine_id: machine.id,
            reservations: availability.conflicts.iter().map(|r| r.id).collect(),
        });
    }

    Ok(Reservation {
        status: ReservationStatus::Approved,
        ..reservation.clone()
    })
}

pub fn reject_reservation(reservation: &Reservation, actor: &Actor) -> LabResult<Reservation> {
    require_operator(actor, "reject", reservation)?;
    require_status(reservation, ReservationStatus::Pending, ReservationStatus::Rejected)?;

    Ok(Reservation {
        status: ReservationStatus::Rejected,
        ..reservation.clone()
    })
}

pub fn complete_reservation(reservation: &Reservation, now: DateTime<Utc>) -> LabResult<Reservation> {
    require_status(reservation, ReservationStatus::Approved, ReservationStatus::Completed)?;
    if now < reservation.ends_at {
        return Err(LabError::TooEarly {
            reservation_id: reservation.id,
            ends_at: reservation.ends_at,
        });
    }

    Ok(Reservation {
        status: ReservationStatus::Completed,
        ..reservation.clone()
    })
}

/// Ends an approved reservation early, for an operator taking its machine back
/// while the window is still running.
pub fn release_reservation(reservation: &Reservation, actor: &Actor, now: DateTime<Utc>) -> LabResult<Reservation> {
    require_operator(actor, "release", reservation)?;
    require_status(reservation, ReservationStatus::Approved, ReservationStatus::Completed)?;
    if !reservation.is_active_at(now) {
        return Err(LabError::Validation(format!(
            "reservation {} is not running at {}",
            reservation.id, now
        )));
    }

    Ok(Reservation {
        status: ReservationStatus::Completed,
        ..reservation.clone()
    })
}

/// The reservation after time-driven transitions, or `None` if nothing changes.
pub fn converge_reservation(reservation: &Reservation, now: DateTime<Utc>) -> Option<Reservation> {
    if reservation.status == ReservationStatus::Approved && now >= reservation.ends_at {
        return complete_reservation(reservation, now).ok();
    }
    None
}

/// The machine after time-driven transitions, or `None` if nothing changes.
///
/// A finished job releases the machine first; an idle machine is then taken by
/// whichever approved reservation covers `now`.
pub fn converge_machine(machine: &Machine, reservations: &[Reservation], now: DateTime<Utc>) -> Option<Machine> {
    let mut next = machine.clone();

    if next.status == MachineStatus::InUse {
        let finished = next
            .current_job
            .as_ref()
            .map(|job| job.completes_at <= now)
            .unwrap_or(true);
        if finished {
            next.status = MachineStatus::Idle;
            next.current_job = None;
        }
    }

    if next.status == MachineStatus::Idle {
        if let Some(active) = reservations
            .iter()
            .find(|r| r.machine_id == machine.id && r.is_active_at(now))
        {
            next.status = MachineStatus::InUse;
            next.current_job = Some(CurrentJob::for_reservation(active));
        }
    }

    (next != *machine).then_some(next)
}
