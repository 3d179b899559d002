use chrono::{DateTime, Utc};
use futures::future::try_join_all;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::availability::{self, validate_window, Availability};
use crate::clock::Clock;
use crate::error::{LabError, LabResult};
use crate::inventory::{self, Checkout, CheckoutPatch};
use crate::models::*;
use crate::policy::ReservationPolicy;
use crate::store::LabStore;
use crate::time_math::{is_overdue, progress_percent, remaining_minutes};
use crate::transitions::{self, MachineTarget};

/// A machine together with the timing of its current job.
#[derive(Debug, Clone, Serialize)]
pub struct MachineView {
    #[serde(flatten)]
    pub machine: Machine,
    pub remaining_minutes: Option<i64>,
    pub progress_percent: Option<f64>,
    pub overdue: bool,
}

impl MachineView {
    pub fn at(machine: Machine, now: DateTime<Utc>) -> Self {
        let (remaining, progress, overdue) = match &machine.current_job {
            Some(job) => (
                Some(remaining_minutes(job.completes_at, now)),
                Some(progress_percent(job.completes_at, job.estimated_minutes, now)),
                is_overdue(job.completes_at, now),
            ),
            None => (None, None, false),
        };
        Self {
            machine,
            remaining_minutes: remaining,
            progress_percent: progress,
            overdue,
        }
    }
}

/// Runs lab operations against an explicit store, clock and policy.
///
/// Reads converge time-driven transitions first (see [`LabConsole::refresh`]).
pub struct LabConsole {
    store: Arc<dyn LabStore>,
    clock: Arc<dyn Clock>,
    policy: ReservationPolicy,
}

impl LabConsole {
    pub fn new(store: Arc<dyn LabStore>, clock: Arc<dyn Clock>, policy: ReservationPolicy) -> Self {
        Self { store, clock, policy }
    }

    pub fn policy(&self) -> &ReservationPolicy {
        &self.policy
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    async fn record(&self, aggregate_id: Uuid, event_type: &str, data: &impl Serialize) -> LabResult<()> {
        let event_data = serde_json::to_value(data).map_err(anyhow::Error::from)?;
        self.store
            .record_event(OutboxEvent::new(aggregate_id, event_type, event_data, self.clock.now()))
            .await
    }

    /// Applies every transition the clock has made due and persists the result.
    pub async fn refresh(&self) -> LabResult<()> {
        let now = self.clock.now();

        let mut reservations = self.store.list_reservations().await?;
        let mut completed = Vec::new();
        for reservation in reservations.iter_mut() {
            if let Some(next) = transitions::converge_reservation(reservation, now) {
                *reservation = next;
                completed.push(reservation.clone());
            }
        }
        try_join_all(
            completed
                .iter()
                .map(|r| self.store.update_reservation(r.id, ReservationPatch::status(r.status))),
        )
        .await?;
        for reservation in &completed {
            self.record(reservation.id, "ReservationCompleted", reservation).await?;
        }

        let machines = self.store.list_machines().await?;
        let changed: Vec<(Machine, Machine)> = machines
            .into_iter()
            .filter_map(|m| transitions::converge_machine(&m, &reservations, now).map(|next| (m, next)))
            .collect();
        try_join_all(
            changed
                .iter()
                .map(|(before, after)| self.store.update_machine(after.id, MachinePatch::between(before, after))),
        )
        .await?;
        for (before, after) in &changed {
            info!("Machine {} converged from {} to {}", after.id, before.status, after.status);
            self.record(after.id, "MachineStatusChanged", after).await?;
        }

        if !completed.is_empty() {
            info!("Completed {} ended reservations", completed.len());
        }
        Ok(())
    }

    pub async fn register_machine(&self, actor: &Actor, name: &str, category: MachineCategory) -> LabResult<Machine> {
        if !actor.is_operator() {
            return Err(LabError::Unauthorized("only operators may register machines".to_string()));
        }
        if name.trim().is_empty() {
            return Err(LabError::Validation("machine needs a name".to_string()));
        }

        let machine = self.store.insert_machine(Machine::new(name.trim(), category)).await?;
        self.record(machine.id, "MachineRegistered", &machine).await?;
        info!("Registered {} {} ({})", category.as_str(), machine.name, machine.id);
        Ok(machine)
    }

    pub async fn machines(&self) -> LabResult<Vec<Machine>> {
        self.refresh().await?;
        self.store.list_machines().await
    }

    pub async fn machine(&self, id: Uuid) -> LabResult<Machine> {
        self.refresh().await?;
        self.store.get_machine(id).await
    }

    pub async fn machine_views(&self) -> LabResult<Vec<MachineView>> {
        let machines = self.machines().await?;
        let now = self.clock.now();
        Ok(machines.into_iter().map(|m| MachineView::at(m, now)).collect())
    }

    pub async fn transition_machine(&self, actor: &Actor, id: Uuid, target: MachineTarget) -> LabResult<Machine> {
        let machine = self.machine(id).await?;
        let existing = self.store.list_reservations_for_machine(id).await?;
        let now = self.clock.now();
        let next = transitions::transition_machine(&machine, &existing, target, actor, now).map_err(|e| {
            warn!("Machine {} transition refused: {}", id, e);
            e
        })?;

        // leaving in_use ends the running reservation the job belongs to
        if machine.status == MachineStatus::InUse && next.status != MachineStatus::InUse {
            if let Some(job) = &machine.current_job {
                let running = existing
                    .iter()
                    .filter(|r| r.member_id == job.member_id && r.is_active_at(now));
                for reservation in running {
                    let released = transitions::release_reservation(reservation, actor, now)?;
                    let released = self
                        .store
                        .update_reservation(released.id, ReservationPatch::status(released.status))
                        .await?;
                    self.record(released.id, "ReservationReleased", &released).await?;
                    info!("Reservation {} released early by {}", released.id, actor.member_id);
                }
            }
        }

        let updated = self
            .store
            .update_machine(id, MachinePatch::between(&machine, &next))
            .await?;
        self.record(id, "MachineStatusChanged", &updated).await?;
        info!("Machine {} moved from {} to {} by {}", id, machine.status, updated.status, actor.member_id);
        Ok(updated)
    }

    pub async fn check_availability(
        &self,
        machine_id: Uuid,
        starts_at: DateTime<Utc>,
        ends_at: DateTime<Utc>,
    ) -> LabResult<Availability> {
        let machine = self.machine(machine_id).await?;
        let existing = self.store.list_reservations_for_machine(machine_id).await?;
        availability::check_availability(&machine, starts_at, ends_at, &existing, &self.policy)
    }

    pub async fn request_reservation(&self, actor: &Actor, request: ReservationRequest) -> LabResult<Reservation> {
        let machine = self.machine(request.machine_id).await?;
        validate_window(request.starts_at, request.ends_at, &self.policy)?;
        if request.purpose.trim().is_empty() {
            return Err(LabError::Validation("reservation needs a purpose".to_string()));
        }

        let reservation = Reservation {
            id: Uuid::new_v4(),
            machine_id: machine.id,
            member_id: actor.member_id,
            starts_at: request.starts_at,
            ends_at: request.ends_at,
            purpose: request.purpose.trim().to_string(),
            status: ReservationStatus::Pending,
            created_at: self.clock.now(),
        };
        let reservation = self.store.insert_reservation(reservation).await?;
        self.record(reservation.id, "ReservationRequested", &reservation).await?;
        info!(
            "Reservation {} requested on {} from {} to {}",
            reservation.id, machine.id, reservation.starts_at, reservation.ends_at
        );

        if !self.policy.auto_approve {
            return Ok(reservation);
        }

        let others: Vec<Reservation> = self
            .store
            .list_reservations_for_machine(machine.id)
            .await?
            .into_iter()
            .filter(|r| r.id != reservation.id)
            .collect();
        let availability =
            availability::check_availability(&machine, reservation.starts_at, reservation.ends_at, &others, &self.policy)?;
        if !availability.available {
            info!("Reservation {} left pending: window is taken", reservation.id);
            return Ok(reservation);
        }

        let approved = self
            .store
            .update_reservation(reservation.id, ReservationPatch::status(ReservationStatus::Approved))
            .await?;
        self.record(approved.id, "ReservationApproved", &approved).await?;
        info!("Reservation {} approved automatically", approved.id);
        Ok(approved)
    }

    pub async fn approve_reservation(&self, actor: &Actor, id: Uuid) -> LabResult<Reservation> {
        self.refresh().await?;
        let reservation = self.store.get_reservation(id).await?;
        let machine = self.store.get_machine(reservation.machine_id).await?;
        let existing = self.store.list_reservations_for_machine(machine.id).await?;

        let approved = transitions::approve_reservation(&reservation, &machine, &existing, actor, &self.policy)
            .map_err(|e| {
                warn!("Approval of reservation {} refused: {}", id, e);
                e
            })?;

        let approved = self
            .store
            .update_reservation(id, ReservationPatch::status(approved.status))
            .await?;
        self.record(id, "ReservationApproved", &approved).await?;
        info!("Reservation {} approved by {}", id, actor.member_id);
        Ok(approved)
    }

    pub async fn reject_reservation(&self, actor: &Actor, id: Uuid) -> LabResult<Reservation> {
        let reservation = self.store.get_reservation(id).await?;
        let rejected = transitions::reject_reservation(&reservation, actor)?;

        let rejected = self
            .store
            .update_reservation(id, ReservationPatch::status(rejected.status))
            .await?;
        self.record(id, "ReservationRejected", &rejected).await?;
        info!("Reservation {} rejected by {}", id, actor.member_id);
        Ok(rejected)
    }

    pub async fn complete_reservation(&self, actor: &Actor, id: Uuid) -> LabResult<Reservation> {
        let reservation = self.store.get_reservation(id).await?;
        let completed = transitions::complete_reservation(&reservation, self.clock.now())?;

        let completed = self
            .store
            .update_reservation(id, ReservationPatch::status(completed.status))
            .await?;
        self.record(id, "ReservationCompleted", &completed).await?;
        info!("Reservation {} marked completed by {}", id, actor.member_id);

        // release the machine if this reservation was holding it
        self.refresh().await?;
        Ok(completed)
    }

    pub async fn reservations(&self, machine_id: Option<Uuid>) -> LabResult<Vec<Reservation>> {
        self.refresh().await?;
        match machine_id {
            Some(machine_id) => self.store.list_reservations_for_machine(machine_id).await,
            None => self.store.list_reservations().await,
        }
    }

    pub async fn check_out(&self, actor: &Actor, item_name: &str, due_at: DateTime<Utc>) -> LabResult<Checkout> {
        let checkout = Checkout::new(item_name.trim(), actor.member_id, self.clock.now(), due_at)?;
        let checkout = self.store.insert_checkout(checkout).await?;
        self.record(checkout.id, "CheckoutCreated", &checkout).await?;
        info!("{} checked out {} until {}", actor.member_id, checkout.item_name, checkout.due_at);
        Ok(checkout)
    }

    pub async fn return_checkout(&self, actor: &Actor, id: Uuid) -> LabResult<Checkout> {
        let checkout = self.store.get_checkout(id).await?;
        if checkout.member_id != actor.member_id && !actor.is_operator() {
            return Err(LabError::Unauthorized(format!(
                "checkout {} belongs to another member",
                id
            )));
        }
        let returned = checkout.mark_returned(self.clock.now())?;

        let returned = self
            .store
            .update_checkout(
                id,
                CheckoutPatch {
                    returned_at: returned.returned_at,
                },
            )
            .await?;
        self.record(id, "CheckoutReturned", &returned).await?;
        info!("Checkout {} returned", id);
        Ok(returned)
    }

    pub async fn checkouts(&self) -> LabResult<Vec<Checkout>> {
        self.store.list_checkouts().await
    }

    pub async fn overdue_checkouts(&self) -> LabResult<Vec<Checkout>> {
        let checkouts = self.store.list_checkouts().await?;
        Ok(inventory::overdue_checkouts(&checkouts, self.clock.now()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::memory_store::InMemoryStore;
    use chrono::{Duration, TimeZone};

    fn at(hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 14, hour, minute, 0).unwrap()
    }

    struct Fixture {
        store: Arc<InMemoryStore>,
        clock: Arc<FixedClock>,
        console: LabConsole,
        operator: Actor,
        member: Actor,
    }

    fn fixture(policy: ReservationPolicy) -> Fixture {
        let store = Arc::new(InMemoryStore::new());
        let clock = Arc::new(FixedClock::new(at(8, 0)));
        let console = LabConsole::new(store.clone(), clock.clone(), policy);
        Fixture {
            store,
            clock,
            console,
            operator: Actor::operator(Uuid::new_v4()),
            member: Actor::member(Uuid::new_v4()),
        }
    }

    fn request(machine: &Machine, from: DateTime<Utc>, to: DateTime<Utc>) -> ReservationRequest {
        ReservationRequest {
            machine_id: machine.id,
            starts_at: from,
            ends_at: to,
            purpose: "drone frame".to_string(),
        }
    }

    #[tokio::test]
    async fn test_members_cannot_register_machines() {
        let f = fixture(ReservationPolicy::default());
        let result = f.console.register_machine(&f.member, "Voron", MachineCategory::Printer).await;
        assert!(matches!(result, Err(LabError::Unauthorized(_))));
    }

    #[tokio::test]
    async fn test_request_starts_pending_and_is_audited() {
        let f = fixture(ReservationPolicy::default());
        let machine = f.console.register_machine(&f.operator, "Voron", MachineCategory::Printer).await.unwrap();

        let reservation = f
            .console
            .request_reservation(&f.member, request(&machine, at(10, 0), at(12, 0)))
            .await
            .unwrap();

        assert_eq!(reservation.status, ReservationStatus::Pending);
        assert_eq!(reservation.member_id, f.member.member_id);
        let kinds: Vec<String> = f.store.events().await.into_iter().map(|e| e.event_type).collect();
        assert_eq!(kinds, vec!["MachineRegistered", "ReservationRequested"]);
    }

    #[tokio::test]
    async fn test_request_validates_window_and_purpose() {
        let f = fixture(ReservationPolicy::default());
        let machine = f.console.register_machine(&f.operator, "Voron", MachineCategory::Printer).await.unwrap();

        let too_long = f
            .console
            .request_reservation(&f.member, request(&machine, at(10, 0), at(14, 1)))
            .await;
        assert!(matches!(too_long, Err(LabError::Validation(_))));

        let mut blank = request(&machine, at(10, 0), at(11, 0));
        blank.purpose = "   ".to_string();
        assert!(matches!(
            f.console.request_reservation(&f.member, blank).await,
            Err(LabError::Validation(_))
        ));

        let unknown = ReservationRequest {
            machine_id: Uuid::new_v4(),
            ..request(&machine, at(10, 0), at(11, 0))
        };
        assert!(matches!(
            f.console.request_reservation(&f.member, unknown).await,
            Err(LabError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_auto_approve_only_free_windows() {
        let f = fixture(ReservationPolicy {
            auto_approve: true,
            ..ReservationPolicy::default()
        });
        let machine = f.console.register_machine(&f.operator, "Voron", MachineCategory::Printer).await.unwrap();

        let first = f
            .console
            .request_reservation(&f.member, request(&machine, at(10, 0), at(12, 0)))
            .await
            .unwrap();
        let second = f
            .console
            .request_reservation(&f.member, request(&machine, at(11, 0), at(13, 0)))
            .await
            .unwrap();

        assert_eq!(first.status, ReservationStatus::Approved);
        assert_eq!(second.status, ReservationStatus::Pending);
    }

    #[tokio::test]
    async fn test_reads_converge_machine_with_reservation_window() {
        let f = fixture(ReservationPolicy::default());
        let machine = f.console.register_machine(&f.operator, "Voron", MachineCategory::Printer).await.unwrap();
        let reservation = f
            .console
            .request_reservation(&f.member, request(&machine, at(10, 0), at(11, 0)))
            .await
            .unwrap();
        f.console.approve_reservation(&f.operator, reservation.id).await.unwrap();

        f.clock.set(at(10, 30));
        let views = f.console.machine_views().await.unwrap();
        assert_eq!(views[0].machine.status, MachineStatus::InUse);
        assert_eq!(views[0].remaining_minutes, Some(30));
        assert_eq!(views[0].progress_percent, Some(50.0));
        assert!(!views[0].overdue);

        f.clock.advance(Duration::minutes(30));
        let machine = f.console.machine(machine.id).await.unwrap();
        assert_eq!(machine.status, MachineStatus::Idle);
        let reservations = f.console.reservations(Some(machine.id)).await.unwrap();
        assert_eq!(reservations[0].status, ReservationStatus::Completed);
    }

    #[tokio::test]
    async fn test_manual_completion_before_end_is_too_early() {
        let f = fixture(ReservationPolicy::default());
        let machine = f.console.register_machine(&f.operator, "Voron", MachineCategory::Printer).await.unwrap();
        let reservation = f
            .console
            .request_reservation(&f.member, request(&machine, at(9, 0), at(10, 0)))
            .await
            .unwrap();
        f.console.approve_reservation(&f.operator, reservation.id).await.unwrap();

        let early = f.console.complete_reservation(&f.member, reservation.id).await;
        assert!(matches!(early, Err(LabError::TooEarly { .. })));
    }

    #[tokio::test]
    async fn test_manual_job_shows_overdue_until_converged() {
        let f = fixture(ReservationPolicy::default());
        let machine = f.console.register_machine(&f.operator, "Voron", MachineCategory::Printer).await.unwrap();
        let job = CurrentJob::starting_at(f.member.member_id, at(8, 0), 45);

        let busy = f
            .console
            .transition_machine(&f.operator, machine.id, MachineTarget::InUse(job))
            .await
            .unwrap();
        assert_eq!(busy.status, MachineStatus::InUse);

        // a view computed from a stale snapshot reports the overdue job
        let stale = MachineView::at(busy, at(9, 0));
        assert_eq!(stale.remaining_minutes, Some(-15));
        assert!(stale.overdue);

        f.clock.set(at(9, 0));
        let views = f.console.machine_views().await.unwrap();
        assert_eq!(views[0].machine.status, MachineStatus::Idle);
        assert_eq!(views[0].remaining_minutes, None);
    }

    #[tokio::test]
    async fn test_checkout_return_and_overdue() {
        let f = fixture(ReservationPolicy::default());
        let other = Actor::member(Uuid::new_v4());

        let checkout = f.console.check_out(&f.member, "hot air station", at(9, 0)).await.unwrap();
        f.console.check_out(&f.member, "bench supply", at(18, 0)).await.unwrap();

        f.clock.set(at(10, 0));
        let overdue = f.console.overdue_checkouts().await.unwrap();
        assert_eq!(overdue.len(), 1);
        assert_eq!(overdue[0].id, checkout.id);

        assert!(matches!(
            f.console.return_checkout(&other, checkout.id).await,
            Err(LabError::Unauthorized(_))
        ));
        let returned = f.console.return_checkout(&f.member, checkout.id).await.unwrap();
        assert_eq!(returned.returned_at, Some(at(10, 0)));
        assert!(f.console.overdue_checkouts().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_members_cannot_start_jobs_over_reserved_windows() {
        let f = fixture(ReservationPolicy::default());
        let machine = f.console.register_machine(&f.operator, "Voron", MachineCategory::Printer).await.unwrap();
        let reservation = f
            .console
            .request_reservation(&f.member, request(&machine, at(10, 0), at(12, 0)))
            .await
            .unwrap();
        f.console.approve_reservation(&f.operator, reservation.id).await.unwrap();

        let intruder = Actor::member(Uuid::new_v4());
        let job = CurrentJob::starting_at(intruder.member_id, at(8, 0), 180);
        assert!(matches!(
            f.console.transition_machine(&intruder, machine.id, MachineTarget::InUse(job.clone())).await,
            Err(LabError::Unauthorized(_))
        ));
        match f.console.transition_machine(&f.operator, machine.id, MachineTarget::InUse(job)).await {
            Err(LabError::Conflict { reservations, .. }) => assert_eq!(reservations, vec![reservation.id]),
            other => panic!("expected conflict, got {:?}", other),
        }
        assert_eq!(f.console.machine(machine.id).await.unwrap().status, MachineStatus::Idle);
    }

    #[tokio::test]
    async fn test_operator_release_survives_next_read() {
        let f = fixture(ReservationPolicy::default());
        let machine = f.console.register_machine(&f.operator, "Voron", MachineCategory::Printer).await.unwrap();
        let reservation = f
            .console
            .request_reservation(&f.member, request(&machine, at(10, 0), at(12, 0)))
            .await
            .unwrap();
        f.console.approve_reservation(&f.operator, reservation.id).await.unwrap();

        f.clock.set(at(10, 30));
        assert_eq!(f.console.machine(machine.id).await.unwrap().status, MachineStatus::InUse);
        assert!(matches!(
            f.console.transition_machine(&f.member, machine.id, MachineTarget::Idle).await,
            Err(LabError::Unauthorized(_))
        ));

        let idle = f
            .console
            .transition_machine(&f.operator, machine.id, MachineTarget::Idle)
            .await
            .unwrap();
        assert_eq!(idle.status, MachineStatus::Idle);

        f.clock.advance(Duration::minutes(5));
        let machine = f.console.machine(machine.id).await.unwrap();
        assert_eq!(machine.status, MachineStatus::Idle);
        assert!(machine.current_job.is_none());
        let reservations = f.console.reservations(Some(machine.id)).await.unwrap();
        assert_eq!(reservations[0].status, ReservationStatus::Completed);
        let kinds: Vec<String> = f.store.events().await.into_iter().map(|e| e.event_type).collect();
        assert!(kinds.contains(&"ReservationReleased".to_string()));
    }

    #[tokio::test]
    async fn test_offline_machine_refuses_approval() {
        let f = fixture(ReservationPolicy::default());
        let machine = f.console.register_machine(&f.operator, "Voron", MachineCategory::Printer).await.unwrap();
        let reservation = f
            .console
            .request_reservation(&f.member, request(&machine, at(10, 0), at(11, 0)))
            .await
            .unwrap();
        f.console
            .transition_machine(&f.operator, machine.id, MachineTarget::Offline)
            .await
            .unwrap();

        assert!(matches!(
            f.console.approve_reservation(&f.operator, reservation.id).await,
            Err(LabError::Validation(_))
        ));
        let reservations = f.console.reservations(Some(machine.id)).await.unwrap();
        assert_eq!(reservations[0].status, ReservationStatus::Pending);
    }
}
