use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum LabError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Machine {machine_id} is not available: conflicting reservations {reservations:?}")]
    Conflict {
        machine_id: Uuid,
        reservations: Vec<Uuid>,
    },

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Invalid transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Reservation {reservation_id} cannot complete before {ends_at}")]
    TooEarly {
        reservation_id: Uuid,
        ends_at: DateTime<Utc>,
    },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Store error: {0}")]
    Store(#[from] anyhow::Error),
}

impl LabError {
    pub fn invalid_transition(from: impl ToString, to: impl ToString) -> Self {
        LabError::InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
        }
    }
}

pub type LabResult<T> = Result<T, LabError>;
