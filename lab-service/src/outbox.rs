use anyhow::Result;
use diesel::prelude::*;
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use rdkafka::producer::{FutureProducer, FutureRecord};
use std::time::Duration;
use tokio::time;
use tracing::{error, info};
use crate::models::*;
use crate::pg_store::DbPool;
use crate::schema::*;

/// Publishes the audit trail written by `PgStore::record_event` to Kafka.
pub struct OutboxProcessor {
    pool: DbPool,
    producer: FutureProducer,
}

pub fn topic_for(event_type: &str) -> &'static str {
    if event_type.starts_with("Reservation") {
        "lab-reservation-events"
    } else if event_type.starts_with("Machine") {
        "lab-machine-events"
    } else if event_type.starts_with("Checkout") {
        "inventory-events"
    } else {
        "domain-events"
    }
}

impl OutboxProcessor {
    pub fn new(pool: DbPool, producer: FutureProducer) -> Self {
        Self { pool, producer }
    }

    pub async fn run(&self) {
        let mut interval = time::interval(Duration::from_secs(5));

        loop {
            interval.tick().await;

            if let Err(e) = self.process_outbox_events().await {
                error!("Error processing outbox events: {}", e);
            }
        }
    }

    async fn process_outbox_events(&self) -> Result<()> {
        let mut pooled = self.pool.get().await?;
        let conn: &mut AsyncPgConnection = &mut pooled;

        let unprocessed_events = outbox_events::table
            .filter(outbox_events::processed.eq(false))
            .order(outbox_events::created_at.asc())
            .limit(100)
            .load::<DbOutboxEvent>(conn)
            .await?;

        for event in unprocessed_events {
            if let Err(e) = self.publish_event(&event).await {
                error!("Failed to publish event {}: {}", event.id, e);
                continue;
            }

            diesel::update(outbox_events::table.filter(outbox_events::id.eq(event.id)))
                .set(outbox_events::processed.eq(true))
                .execute(conn)
                .await?;

            info!("Published {} event: {}", event.event_type, event.id);
        }

        Ok(())
    }

    async fn publish_event(&self, event: &DbOutboxEvent) -> Result<()> {
        let json = serde_json::to_string(&serde_json::json!({
            "id": event.id,
            "event_type": event.event_type,
            "data": event.event_data,
            "created_at": event.created_at,
        }))?;
        let key = event.aggregate_id.to_string();
        let record = FutureRecord::to(topic_for(&event.event_type))
            .payload(&json)
            .key(&key);

        self.producer.send(record, Duration::from_secs(5)).await
            .map_err(|(e, _)| anyhow::anyhow!("Failed to publish event: {}", e))?;

        Ok(())
    }
}
