use async_trait::async_trait;
use uuid::Uuid;

use crate::error::LabResult;
use crate::inventory::{Checkout, CheckoutPatch};
use crate::models::{Machine, MachinePatch, OutboxEvent, Reservation, ReservationPatch};

/// Persistence contract for the lab console: list, insert and patch records.
///
/// Implementations return `LabError::NotFound` for unknown ids and wrap
/// backend failures in `LabError::Store`.
#[async_trait]
pub trait LabStore: Send + Sync {
    async fn list_machines(&self) -> LabResult<Vec<Machine>>;
    async fn get_machine(&self, id: Uuid) -> LabResult<Machine>;
    async fn insert_machine(&self, machine: Machine) -> LabResult<Machine>;
    async fn update_machine(&self, id: Uuid, patch: MachinePatch) -> LabResult<Machine>;

    async fn list_reservations(&self) -> LabResult<Vec<Reservation>>;
    async fn list_reservations_for_machine(&self, machine_id: Uuid) -> LabResult<Vec<Reservation>>;
    async fn get_reservation(&self, id: Uuid) -> LabResult<Reservation>;
    async fn insert_reservation(&self, reservation: Reservation) -> LabResult<Reservation>;
    async fn update_reservation(&self, id: Uuid, patch: ReservationPatch) -> LabResult<Reservation>;

    async fn list_checkouts(&self) -> LabResult<Vec<Checkout>>;
    async fn get_checkout(&self, id: Uuid) -> LabResult<Checkout>;
    async fn insert_checkout(&self, checkout: Checkout) -> LabResult<Checkout>;
    async fn update_checkout(&self, id: Uuid, patch: CheckoutPatch) -> LabResult<Checkout>;

    /// Appends to the audit trail.
    async fn record_event(&self, event: OutboxEvent) -> LabResult<()>;
}
