use crate::schema::outbox_events;
use crate::schema::sql_types::OutboxEventStatus;
use commons::EventEnvelope;
use commons::RequestContext;
use diesel::deserialize;
use diesel::deserialize::FromSql;
use diesel::pg::Pg;
use diesel::pg::PgValue;
use diesel::query_builder::QueryId;
use diesel::serialize;
use diesel::serialize::IsNull;
use diesel::serialize::Output;
use diesel::serialize::ToSql;
use diesel::AsExpression;
use diesel::BoolExpressionMethods;
use diesel::Connection;
use diesel::ExpressionMethods;
use diesel::FromSqlRow;
use diesel::OptionalExtension;
use diesel::PgConnection;
use diesel::QueryDsl;
use diesel::QueryResult;
use diesel::Queryable;
use diesel::RunQueryDsl;
use std::any::TypeId;
use std::io::Write;
use time::Duration;
use time::OffsetDateTime;
use uuid::Uuid;

/// Retry backoff doubles per attempt but never exceeds this many minutes.
const MAX_BACKOFF_MINUTES: i64 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, FromSqlRow, AsExpression)]
#[diesel(sql_type = OutboxEventStatus)]
pub enum OutboxStatus {
    Pending,
    Processing,
    Published,
    Failed,
}

impl QueryId for OutboxEventStatus {
    type QueryId = OutboxEventStatus;
    const HAS_STATIC_QUERY_ID: bool = false;

    fn query_id() -> Option<TypeId> {
        None
    }
}

impl ToSql<OutboxEventStatus, Pg> for OutboxStatus {
    fn to_sql<'b>(&'b self, out: &mut Output<'b, '_, Pg>) -> serialize::Result {
        match *self {
            OutboxStatus::Pending => out.write_all(b"PENDING")?,
            OutboxStatus::Processing => out.write_all(b"PROCESSING")?,
            OutboxStatus::Published => out.write_all(b"PUBLISHED")?,
            OutboxStatus::Failed => out.write_all(b"FAILED")?,
        }
        Ok(IsNull::No)
    }
}

impl FromSql<OutboxEventStatus, Pg> for OutboxStatus {
    fn from_sql(bytes: PgValue<'_>) -> deserialize::Result<Self> {
        match bytes.as_bytes() {
            b"PENDING" => Ok(OutboxStatus::Pending),
            b"PROCESSING" => Ok(OutboxStatus::Processing),
            b"PUBLISHED" => Ok(OutboxStatus::Published),
            b"FAILED" => Ok(OutboxStatus::Failed),
            other => Err(format!("unrecognized outbox status: {other:?}").into()),
        }
    }
}

#[derive(Debug, Clone, Queryable)]
pub struct OutboxEvent {
    pub id: i64,
    pub event_id: Uuid,
    pub aggregate_type: String,
    pub aggregate_id: String,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub status: OutboxStatus,
    pub retry_count: i32,
    pub next_retry_at: Option<OffsetDateTime>,
    pub last_error: Option<String>,
    pub correlation_id: String,
    pub causation_id: Option<String>,
    pub created_at: OffsetDateTime,
    pub published_at: Option<OffsetDateTime>,
    pub processing_started_at: Option<OffsetDateTime>,
    pub bus_partition: Option<i32>,
    pub bus_offset: Option<i64>,
}

impl OutboxEvent {
    /// Partition key on the bus; events of one aggregate stay ordered.
    /// Aggregate-less events fall back to the event id.
    pub fn partition_key(&self) -> String {
        if self.aggregate_id.is_empty() {
            return self.event_id.to_string();
        }
        self.aggregate_id.clone()
    }

    pub fn to_envelope(&self) -> EventEnvelope {
        EventEnvelope {
            event_id: self.event_id,
            event_type: self.event_type.clone(),
            aggregate_type: self.aggregate_type.clone(),
            aggregate_id: self.aggregate_id.clone(),
            event_data: self.payload.clone(),
            timestamp: self.created_at,
            correlation_id: self.correlation_id.clone(),
            causation_id: self.causation_id.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewOutboxEvent {
    pub aggregate_type: String,
    pub aggregate_id: String,
    pub event_type: String,
    pub payload: serde_json::Value,
}

impl NewOutboxEvent {
    pub fn new(
        aggregate_type: impl Into<String>,
        aggregate_id: impl Into<String>,
        event_type: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            aggregate_type: aggregate_type.into(),
            aggregate_id: aggregate_id.into(),
            event_type: event_type.into(),
            payload,
        }
    }
}

/// Stage an event inside the caller's transaction. The row commits (or rolls
/// back) together with the state change it describes; nothing is published
/// here.
pub fn stage(
    conn: &mut PgConnection,
    event: &NewOutboxEvent,
    ctx: &RequestContext,
) -> QueryResult<Uuid> {
    let event_id = Uuid::new_v4();
    diesel::insert_into(outbox_events::table)
        .values((
            outbox_events::event_id.eq(event_id),
            outbox_events::aggregate_type.eq(&event.aggregate_type),
            outbox_events::aggregate_id.eq(&event.aggregate_id),
            outbox_events::event_type.eq(&event.event_type),
            outbox_events::payload.eq(&event.payload),
            outbox_events::status.eq(OutboxStatus::Pending),
            outbox_events::retry_count.eq(0),
            outbox_events::correlation_id.eq(&ctx.correlation_id),
            outbox_events::causation_id.eq(ctx.causation_id.as_deref()),
            outbox_events::created_at.eq(OffsetDateTime::now_utc()),
        ))
        .execute(conn)?;
    Ok(event_id)
}

/// Claim up to `batch_size` due events. Rows are locked with
/// `FOR UPDATE SKIP LOCKED`, so concurrent dispatcher instances never claim
/// the same row; the claim (status PROCESSING) commits before publishing
/// starts.
pub fn claim_batch(conn: &mut PgConnection, batch_size: i64) -> QueryResult<Vec<OutboxEvent>> {
    conn.transaction(|conn| {
        let now = OffsetDateTime::now_utc();
        let rows: Vec<OutboxEvent> = outbox_events::table
            .filter(outbox_events::status.eq(OutboxStatus::Pending))
            .filter(
                outbox_events::next_retry_at
                    .is_null()
                    .or(outbox_events::next_retry_at.le(now)),
            )
            .order(outbox_events::created_at.asc())
            .limit(batch_size)
            .for_update()
            .skip_locked()
            .load(conn)?;

        if rows.is_empty() {
            return Ok(rows);
        }

        let ids: Vec<i64> = rows.iter().map(|row| row.id).collect();
        diesel::update(outbox_events::table.filter(outbox_events::id.eq_any(&ids)))
            .set((
                outbox_events::status.eq(OutboxStatus::Processing),
                outbox_events::processing_started_at.eq(now),
            ))
            .execute(conn)?;

        Ok(rows)
    })
}

pub fn mark_published(
    conn: &mut PgConnection,
    id: i64,
    partition: i32,
    offset: i64,
) -> QueryResult<usize> {
    diesel::update(outbox_events::table.find(id))
        .set((
            outbox_events::status.eq(OutboxStatus::Published),
            outbox_events::published_at.eq(OffsetDateTime::now_utc()),
            outbox_events::bus_partition.eq(partition),
            outbox_events::bus_offset.eq(offset),
            outbox_events::last_error.eq(None::<String>),
        ))
        .execute(conn)
}

/// Record a failed publish attempt: either reschedule with exponential
/// backoff or tombstone once the attempt budget is spent.
pub fn record_failure(
    conn: &mut PgConnection,
    id: i64,
    error: &str,
    max_attempts: i32,
) -> QueryResult<OutboxStatus> {
    conn.transaction(|conn| {
        let retry_count: i32 = outbox_events::table
            .find(id)
            .select(outbox_events::retry_count)
            .first(conn)?;
        let retry_count = retry_count + 1;

        if retry_count >= max_attempts {
            diesel::update(outbox_events::table.find(id))
                .set((
                    outbox_events::status.eq(OutboxStatus::Failed),
                    outbox_events::retry_count.eq(retry_count),
                    outbox_events::last_error.eq(error),
                ))
                .execute(conn)?;
            return Ok(OutboxStatus::Failed);
        }

        let delay = Duration::minutes(backoff_minutes(retry_count));
        diesel::update(outbox_events::table.find(id))
            .set((
                outbox_events::status.eq(OutboxStatus::Pending),
                outbox_events::retry_count.eq(retry_count),
                outbox_events::next_retry_at.eq(OffsetDateTime::now_utc() + delay),
                outbox_events::last_error.eq(error),
            ))
            .execute(conn)?;
        Ok(OutboxStatus::Pending)
    })
}

/// Tombstone immediately, without burning through retries. Used for events
/// that can never publish, e.g. an event type with no topic route.
pub fn mark_failed(conn: &mut PgConnection, id: i64, error: &str) -> QueryResult<usize> {
    diesel::update(outbox_events::table.find(id))
        .set((
            outbox_events::status.eq(OutboxStatus::Failed),
            outbox_events::last_error.eq(error),
        ))
        .execute(conn)
}

/// Return PROCESSING rows whose claim is older than `stale_after` to
/// PENDING. Covers dispatchers that died between claim and publish.
pub fn requeue_stale_claims(
    conn: &mut PgConnection,
    stale_after: Duration,
) -> QueryResult<usize> {
    let cutoff = OffsetDateTime::now_utc() - stale_after;
    diesel::update(
        outbox_events::table
            .filter(outbox_events::status.eq(OutboxStatus::Processing))
            .filter(outbox_events::processing_started_at.le(cutoff)),
    )
    .set((
        outbox_events::status.eq(OutboxStatus::Pending),
        outbox_events::processing_started_at.eq(None::<OffsetDateTime>),
    ))
    .execute(conn)
}

/// Delete PUBLISHED rows older than the retention window.
pub fn sweep_published(conn: &mut PgConnection, retention_days: i64) -> QueryResult<usize> {
    let cutoff = OffsetDateTime::now_utc() - Duration::days(retention_days);
    diesel::delete(
        outbox_events::table
            .filter(outbox_events::status.eq(OutboxStatus::Published))
            .filter(outbox_events::published_at.le(cutoff)),
    )
    .execute(conn)
}

pub fn find_by_event_id(
    conn: &mut PgConnection,
    event_id: Uuid,
) -> QueryResult<Option<OutboxEvent>> {
    outbox_events::table
        .filter(outbox_events::event_id.eq(event_id))
        .first(conn)
        .optional()
}

pub(crate) fn backoff_minutes(retry_count: i32) -> i64 {
    let exponent = retry_count.clamp(0, 30) as u32;
    2i64.saturating_pow(exponent).min(MAX_BACKOFF_MINUTES)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        assert_eq!(backoff_minutes(1), 2);
        assert_eq!(backoff_minutes(2), 4);
        assert_eq!(backoff_minutes(3), 8);
        assert_eq!(backoff_minutes(6), 60);
        assert_eq!(backoff_minutes(20), 60);
    }

    #[test]
    fn partition_key_falls_back_to_event_id() {
        let mut event = sample_event();
        assert_eq!(event.partition_key(), "R-1001");

        event.aggregate_id.clear();
        assert_eq!(event.partition_key(), event.event_id.to_string());
    }

    #[test]
    fn envelope_mirrors_row_columns() {
        let event = sample_event();
        let envelope = event.to_envelope();

        assert_eq!(envelope.event_id, event.event_id);
        assert_eq!(envelope.event_type, "payment.succeeded");
        assert_eq!(envelope.aggregate_id, "R-1001");
        assert_eq!(envelope.timestamp, event.created_at);
        assert_eq!(envelope.correlation_id, "corr-1");
        assert_eq!(envelope.causation_id.as_deref(), Some("cause-1"));
    }

    fn sample_event() -> OutboxEvent {
        OutboxEvent {
            id: 1,
            event_id: Uuid::new_v4(),
            aggregate_type: "INVOICE".to_string(),
            aggregate_id: "R-1001".to_string(),
            event_type: "payment.succeeded".to_string(),
            payload: serde_json::json!({ "paymentId": "pay_1" }),
            status: OutboxStatus::Pending,
            retry_count: 0,
            next_retry_at: None,
            last_error: None,
            correlation_id: "corr-1".to_string(),
            causation_id: Some("cause-1".to_string()),
            created_at: OffsetDateTime::now_utc(),
            published_at: None,
            processing_started_at: None,
            bus_partition: None,
            bus_offset: None,
        }
    }
}
