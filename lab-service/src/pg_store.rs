use async_trait::async_trait;
use bb8::PooledConnection;
use chrono::Utc;
use diesel::prelude::*;
use diesel_async::{pooled_connection::AsyncDieselConnectionManager, AsyncConnection, AsyncPgConnection, RunQueryDsl};
use shared::*;
use uuid::Uuid;

use crate::models::*;
use crate::schema::*;

pub type DbPool = bb8::Pool<AsyncDieselConnectionManager<AsyncPgConnection>>;

type PgConn<'a> = PooledConnection<'a, AsyncDieselConnectionManager<AsyncPgConnection>>;

/// Postgres-backed `LabStore`. Status and category columns hold the snake_case names.
#[derive(Clone)]
pub struct PgStore {
    pool: DbPool,
}

impl PgStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn conn(&self) -> LabResult<PgConn<'_>> {
        self.pool
            .get()
            .await
            .map_err(|e| LabError::Store(anyhow::anyhow!("Failed to get connection: {}", e)))
    }
}

fn store_err(e: diesel::result::Error) -> LabError {
    LabError::Store(e.into())
}

fn not_found(kind: &str, id: Uuid) -> LabError {
    LabError::NotFound(format!("{} {}", kind, id))
}

fn reservations_from(rows: Vec<ReservationRow>) -> LabResult<Vec<Reservation>> {
    rows.into_iter()
        .map(|row| Reservation::try_from(row).map_err(LabError::from))
        .collect()
}

#[async_trait]
impl LabStore for PgStore {
    async fn list_machines(&self) -> LabResult<Vec<Machine>> {
        let mut pooled = self.conn().await?;
        let conn: &mut AsyncPgConnection = &mut pooled;

        let rows = machines::table
            .order(machines::name.asc())
            .load::<MachineRow>(conn)
            .await
            .map_err(store_err)?;
        rows.into_iter()
            .map(|row| Machine::try_from(row).map_err(LabError::from))
            .collect()
    }

    async fn get_machine(&self, id: Uuid) -> LabResult<Machine> {
        let mut pooled = self.conn().await?;
        let conn: &mut AsyncPgConnection = &mut pooled;

        let row = machines::table
            .find(id)
            .first::<MachineRow>(conn)
            .await
            .optional()
            .map_err(store_err)?
            .ok_or_else(|| not_found("machine", id))?;
        Ok(Machine::try_from(row)?)
    }

    async fn insert_machine(&self, machine: Machine) -> LabResult<Machine> {
        let mut pooled = self.conn().await?;
        let conn: &mut AsyncPgConnection = &mut pooled;

        diesel::insert_into(machines::table)
            .values(NewMachineRow::from(&machine))
            .execute(conn)
            .await
            .map_err(store_err)?;
        Ok(machine)
    }

    async fn update_machine(&self, id: Uuid, patch: MachinePatch) -> LabResult<Machine> {
        let mut pooled = self.conn().await?;
        let conn: &mut AsyncPgConnection = &mut pooled;

        let updated = conn
            .transaction::<_, anyhow::Error, _>(|conn| {
                Box::pin(async move {
                    let row = machines::table
                        .find(id)
                        .for_update()
                        .first::<MachineRow>(conn)
                        .await
                        .optional()?;
                    let Some(row) = row else {
                        return Ok(None);
                    };

                    let mut machine = Machine::try_from(row)?;
                    patch.apply(&mut machine);

                    diesel::update(machines::table.find(id))
                        .set(MachineChangeset::of(&machine, Utc::now()))
                        .execute(conn)
                        .await?;

                    Ok(Some(machine))
                })
            })
            .await?;

        updated.ok_or_else(|| not_found("machine", id))
    }

    async fn list_reservations(&self) -> LabResult<Vec<Reservation>> {
        let mut pooled = self.conn().await?;
        let conn: &mut AsyncPgConnection = &mut pooled;

        let rows = reservations::table
            .order(reservations::starts_at.asc())
            .load::<ReservationRow>(conn)
            .await
            .map_err(store_err)?;
        reservations_from(rows)
    }

    async fn list_reservations_for_machine(&self, machine_id: Uuid) -> LabResult<Vec<Reservation>> {
        let mut pooled = self.conn().await?;
        let conn: &mut AsyncPgConnection = &mut pooled;

        let rows = reservations::table
            .filter(reservations::machine_id.eq(machine_id))
            .order(reservations::starts_at.asc())
            .load::<ReservationRow>(conn)
            .await
            .map_err(store_err)?;
        reservations_from(rows)
    }

    async fn get_reservation(&self, id: Uuid) -> LabResult<Reservation> {
        let mut pooled = self.conn().await?;
        let conn: &mut AsyncPgConnection = &mut pooled;

        let row = reservations::table
            .find(id)
            .first::<ReservationRow>(conn)
            .await
            .optional()
            .map_err(store_err)?
            .ok_or_else(|| not_found("reservation", id))?;
        Ok(Reservation::try_from(row)?)
    }

    async fn insert_reservation(&self, reservation: Reservation) -> LabResult<Reservation> {
        let mut pooled = self.conn().await?;
        let conn: &mut AsyncPgConnection = &mut pooled;

        diesel::insert_into(reservations::table)
            .values(NewReservationRow::from(&reservation))
            .execute(conn)
            .await
            .map_err(store_err)?;
        Ok(reservation)
    }

    async fn update_reservation(&self, id: Uuid, patch: ReservationPatch) -> LabResult<Reservation> {
        let mut reservation = self.get_reservation(id).await?;
        patch.apply(&mut reservation);

        let mut pooled = self.conn().await?;
        let conn: &mut AsyncPgConnection = &mut pooled;
        diesel::update(reservations::table.find(id))
            .set((
                reservations::status.eq(reservation.status.as_str()),
                reservations::updated_at.eq(Some(Utc::now())),
            ))
            .execute(conn)
            .await
            .map_err(store_err)?;
        Ok(reservation)
    }

    async fn list_checkouts(&self) -> LabResult<Vec<Checkout>> {
        let mut pooled = self.conn().await?;
        let conn: &mut AsyncPgConnection = &mut pooled;

        let rows = checkouts::table
            .order(checkouts::checked_out_at.asc())
            .load::<CheckoutRow>(conn)
            .await
            .map_err(store_err)?;
        Ok(rows.into_iter().map(Checkout::from).collect())
    }

    async fn get_checkout(&self, id: Uuid) -> LabResult<Checkout> {
        let mut pooled = self.conn().await?;
        let conn: &mut AsyncPgConnection = &mut pooled;

        checkouts::table
            .find(id)
            .first::<CheckoutRow>(conn)
            .await
            .optional()
            .map_err(store_err)?
            .map(Checkout::from)
            .ok_or_else(|| not_found("checkout", id))
    }

    async fn insert_checkout(&self, checkout: Checkout) -> LabResult<Checkout> {
        let mut pooled = self.conn().await?;
        let conn: &mut AsyncPgConnection = &mut pooled;

        diesel::insert_into(checkouts::table)
            .values(CheckoutRow::from(&checkout))
            .execute(conn)
            .await
            .map_err(store_err)?;
        Ok(checkout)
    }

    async fn update_checkout(&self, id: Uuid, patch: CheckoutPatch) -> LabResult<Checkout> {
        let mut checkout = self.get_checkout(id).await?;
        patch.apply(&mut checkout);

        let mut pooled = self.conn().await?;
        let conn: &mut AsyncPgConnection = &mut pooled;
        diesel::update(checkouts::table.find(id))
            .set(checkouts::returned_at.eq(checkout.returned_at))
            .execute(conn)
            .await
            .map_err(store_err)?;
        Ok(checkout)
    }

    async fn record_event(&self, event: OutboxEvent) -> LabResult<()> {
        let mut pooled = self.conn().await?;
        let conn: &mut AsyncPgConnection = &mut pooled;

        diesel::insert_into(outbox_events::table)
            .values(NewOutboxEvent::from(event))
            .execute(conn)
            .await
            .map_err(store_err)?;
        Ok(())
    }
}
