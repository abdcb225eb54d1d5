use crate::bus::MessageBus;
use crate::store;
use crate::store::OutboxEvent;
use crate::topics::TopicMap;
use anyhow::Context;
use anyhow::Result;
use diesel::r2d2::ConnectionManager;
use diesel::r2d2::Pool;
use diesel::PgConnection;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::spawn_blocking;

/// A PROCESSING claim older than this is assumed to belong to a dead
/// dispatcher and is requeued.
const STALE_CLAIM: time::Duration = time::Duration::minutes(10);

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OutboxConfig {
    pub poll_interval_secs: u64,
    pub batch_size: i64,
    pub max_attempts: i32,
    pub retention_days: i64,
}

impl Default for OutboxConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 30,
            batch_size: 100,
            max_attempts: 3,
            retention_days: 7,
        }
    }
}

pub struct Dispatcher {
    pool: Pool<ConnectionManager<PgConnection>>,
    bus: Arc<dyn MessageBus>,
    topics: TopicMap,
    config: OutboxConfig,
}

impl Dispatcher {
    pub fn new(
        pool: Pool<ConnectionManager<PgConnection>>,
        bus: Arc<dyn MessageBus>,
        topics: TopicMap,
        config: OutboxConfig,
    ) -> Self {
        Self {
            pool,
            bus,
            topics,
            config,
        }
    }

    /// Poll loop; one pass per `poll_interval_secs`. Never returns.
    pub async fn run(self: Arc<Self>) {
        let mut interval =
            tokio::time::interval(Duration::from_secs(self.config.poll_interval_secs.max(1)));
        loop {
            interval.tick().await;
            match self.tick().await {
                Ok(0) => {}
                Ok(published) => tracing::debug!(published, "Outbox pass complete"),
                Err(e) => tracing::error!("Outbox pass failed: {e:#}"),
            }
        }
    }

    /// One dispatch pass: requeue stale claims, claim a batch, publish each
    /// row in created-at order. Returns the number of rows published.
    pub async fn tick(&self) -> Result<usize> {
        let pool = self.pool.clone();
        let mut conn = spawn_blocking(move || pool.get())
            .await
            .expect("task to complete")
            .context("could not acquire db connection")?;

        let requeued = store::requeue_stale_claims(&mut conn, STALE_CLAIM)
            .context("requeueing stale claims")?;
        if requeued > 0 {
            tracing::warn!(requeued, "Requeued stale outbox claims");
        }

        let batch =
            store::claim_batch(&mut conn, self.config.batch_size).context("claiming batch")?;
        if batch.is_empty() {
            return Ok(0);
        }

        let mut published = 0;
        for event in batch {
            if self.publish_one(&mut conn, &event).await? {
                published += 1;
            }
        }
        Ok(published)
    }

    async fn publish_one(&self, conn: &mut PgConnection, event: &OutboxEvent) -> Result<bool> {
        let Some(topic) = self.topics.route(&event.event_type) else {
            tracing::error!(
                event_id = %event.event_id,
                event_type = %event.event_type,
                "No topic route for event type, tombstoning"
            );
            store::mark_failed(conn, event.id, "no topic route for event type")?;
            return Ok(false);
        };

        let envelope = event.to_envelope();
        let key = event.partition_key();
        match self.bus.publish(topic, &key, &envelope).await {
            Ok(ack) => {
                store::mark_published(conn, event.id, ack.partition, ack.offset)?;
                tracing::debug!(
                    event_id = %event.event_id,
                    event_type = %event.event_type,
                    topic,
                    partition = ack.partition,
                    offset = ack.offset,
                    "Published outbox event"
                );
                Ok(true)
            }
            Err(e) => {
                let status = store::record_failure(
                    conn,
                    event.id,
                    &format!("{e:#}"),
                    self.config.max_attempts,
                )?;
                tracing::warn!(
                    event_id = %event.event_id,
                    event_type = %event.event_type,
                    retry_count = event.retry_count + 1,
                    ?status,
                    "Publish failed: {e:#}"
                );
                Ok(false)
            }
        }
    }

    /// Retention sweep; scheduled daily by the host service.
    pub async fn sweep(&self) -> Result<usize> {
        let pool = self.pool.clone();
        let retention_days = self.config.retention_days;
        let deleted = spawn_blocking(move || -> Result<usize> {
            let mut conn = pool.get().context("could not acquire db connection")?;
            Ok(store::sweep_published(&mut conn, retention_days)?)
        })
        .await
        .expect("task to complete")?;

        if deleted > 0 {
            tracing::info!(deleted, "Swept published outbox events");
        }
        Ok(deleted)
    }
}
