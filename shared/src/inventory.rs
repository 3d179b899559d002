use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{LabError, LabResult};
use crate::time_math::{is_overdue, remaining_minutes};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkout {
    pub id: Uuid,
    pub item_name: String,
    pub member_id: Uuid,
    pub checked_out_at: DateTime<Utc>,
    pub due_at: DateTime<Utc>,
    pub returned_at: Option<DateTime<Utc>>,
}

impl Checkout {
    pub fn new(
        item_name: impl Into<String>,
        member_id: Uuid,
        checked_out_at: DateTime<Utc>,
        due_at: DateTime<Utc>,
    ) -> LabResult<Self> {
        let item_name = item_name.into();
        if item_name.trim().is_empty() {
            return Err(LabError::Validation("checkout needs an item name".to_string()));
        }
        if due_at <= checked_out_at {
            return Err(LabError::Validation(format!(
                "checkout due at {} must be after {}",
                due_at, checked_out_at
            )));
        }
        Ok(Self {
            id: Uuid::new_v4(),
            item_name,
            member_id,
            checked_out_at,
            due_at,
            returned_at: None,
        })
    }

    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        self.returned_at.is_none() && is_overdue(self.due_at, now)
    }

    /// Minutes past due, zero when on time or already returned.
    pub fn minutes_overdue(&self, now: DateTime<Utc>) -> i64 {
        if self.is_overdue(now) {
            -remaining_minutes(self.due_at, now)
        } else {
            0
        }
    }

    pub fn mark_returned(&self, now: DateTime<Utc>) -> LabResult<Checkout> {
        if let Some(returned_at) = self.returned_at {
            return Err(LabError::Validation(format!(
                "checkout {} was already returned at {}",
                self.id, returned_at
            )));
        }
        Ok(Checkout {
            returned_at: Some(now),
            ..self.clone()
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct CheckoutPatch {
    pub returned_at: Option<DateTime<Utc>>,
}

impl CheckoutPatch {
    pub fn apply(self, checkout: &mut Checkout) {
        if let Some(returned_at) = self.returned_at {
            checkout.returned_at = Some(returned_at);
        }
    }
}

/// Outstanding checkouts past their due time, most overdue first.
pub fn overdue_checkouts(checkouts: &[Checkout], now: DateTime<Utc>) -> Vec<Checkout> {
    let mut overdue: Vec<Checkout> = checkouts.iter().filter(|c| c.is_overdue(now)).cloned().collect();
    overdue.sort_by_key(|c| c.due_at);
    overdue
}
