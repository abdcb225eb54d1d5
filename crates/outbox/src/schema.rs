pub mod sql_types {
    #[derive(diesel::sql_types::SqlType)]
    #[diesel(postgres_type(name = "outbox_event_status"))]
    pub struct OutboxEventStatus;
}

diesel::table! {
    use diesel::sql_types::*;
    use super::sql_types::OutboxEventStatus;

    outbox_events (id) {
        id -> Int8,
        event_id -> Uuid,
        aggregate_type -> Text,
        aggregate_id -> Text,
        event_type -> Text,
        payload -> Jsonb,
        status -> OutboxEventStatus,
        retry_count -> Int4,
        next_retry_at -> Nullable<Timestamptz>,
        last_error -> Nullable<Text>,
        correlation_id -> Text,
        causation_id -> Nullable<Text>,
        created_at -> Timestamptz,
        published_at -> Nullable<Timestamptz>,
        processing_started_at -> Nullable<Timestamptz>,
        bus_partition -> Nullable<Int4>,
        bus_offset -> Nullable<Int8>,
    }
}
