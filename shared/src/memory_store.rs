use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::{LabError, LabResult};
use crate::inventory::{Checkout, CheckoutPatch};
use crate::models::{Machine, MachinePatch, OutboxEvent, Reservation, ReservationPatch};
use crate::store::LabStore;

/// In-memory implementation of `LabStore`. Each instance is independent.
pub struct InMemoryStore {
    machines: RwLock<HashMap<Uuid, Machine>>,
    reservations: RwLock<HashMap<Uuid, Reservation>>,
    checkouts: RwLock<HashMap<Uuid, Checkout>>,
    events: RwLock<Vec<OutboxEvent>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            machines: RwLock::new(HashMap::new()),
            reservations: RwLock::new(HashMap::new()),
            checkouts: RwLock::new(HashMap::new()),
            events: RwLock::new(Vec::new()),
        }
    }

    /// Recorded audit events, oldest first.
    pub async fn events(&self) -> Vec<OutboxEvent> {
        self.events.read().await.clone()
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn not_found(kind: &str, id: Uuid) -> LabError {
    LabError::NotFound(format!("{} {}", kind, id))
}

#[async_trait]
impl LabStore for InMemoryStore {
    async fn list_machines(&self) -> LabResult<Vec<Machine>> {
        let machines = self.machines.read().await;
        let mut all: Vec<Machine> = machines.values().cloned().collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(all)
    }

    async fn get_machine(&self, id: Uuid) -> LabResult<Machine> {
        let machines = self.machines.read().await;
        machines.get(&id).cloned().ok_or_else(|| not_found("machine", id))
    }

    async fn insert_machine(&self, machine: Machine) -> LabResult<Machine> {
        let mut machines = self.machines.write().await;
        machines.insert(machine.id, machine.clone());
        Ok(machine)
    }

    async fn update_machine(&self, id: Uuid, patch: MachinePatch) -> LabResult<Machine> {
        let mut machines = self.machines.write().await;
        let machine = machines.get_mut(&id).ok_or_else(|| not_found("machine", id))?;
        patch.apply(machine);
        Ok(machine.clone())
    }

    async fn list_reservations(&self) -> LabResult<Vec<Reservation>> {
        let reservations = self.reservations.read().await;
        let mut all: Vec<Reservation> = reservations.values().cloned().collect();
        all.sort_by_key(|r| r.starts_at);
        Ok(all)
    }

    async fn list_reservations_for_machine(&self, machine_id: Uuid) -> LabResult<Vec<Reservation>> {
        Ok(self
            .list_reservations()
            .await?
            .into_iter()
            .filter(|r| r.machine_id == machine_id)
            .collect())
    }

    async fn get_reservation(&self, id: Uuid) -> LabResult<Reservation> {
        let reservations = self.reservations.read().await;
        reservations.get(&id).cloned().ok_or_else(|| not_found("reservation", id))
    }

    async fn insert_reservation(&self, reservation: Reservation) -> LabResult<Reservation> {
        let mut reservations = self.reservations.write().await;
        reservations.insert(reservation.id, reservation.clone());
        Ok(reservation)
    }

    async fn update_reservation(&self, id: Uuid, patch: ReservationPatch) -> LabResult<Reservation> {
        let mut reservations = self.reservations.write().await;
        let reservation = reservations.get_mut(&id).ok_or_else(|| not_found("reservation", id))?;
        patch.apply(reservation);
        Ok(reservation.clone())
    }

    async fn list_checkouts(&self) -> LabResult<Vec<Checkout>> {
        let checkouts = self.checkouts.read().await;
        let mut all: Vec<Checkout> = checkouts.values().cloned().collect();
        all.sort_by_key(|c| c.checked_out_at);
        Ok(all)
    }

    async fn get_checkout(&self, id: Uuid) -> LabResult<Checkout> {
        let checkouts = self.checkouts.read().await;
        checkouts.get(&id).cloned().ok_or_else(|| not_found("checkout", id))
    }

    async fn insert_checkout(&self, checkout: Checkout) -> LabResult<Checkout> {
        let mut checkouts = self.checkouts.write().await;
        checkouts.insert(checkout.id, checkout.clone());
        Ok(checkout)
    }

    async fn update_checkout(&self, id: Uuid, patch: CheckoutPatch) -> LabResult<Checkout> {
        let mut checkouts = self.checkouts.write().await;
        let checkout = checkouts.get_mut(&id).ok_or_else(|| not_found("checkout", id))?;
        patch.apply(checkout);
        Ok(checkout.clone())
    }

    async fn record_event(&self, event: OutboxEvent) -> LabResult<()> {
        self.events.write().await.push(event);
        Ok(())
    }
}
