use crate::schema::user_audit;
use diesel::ExpressionMethods;
use diesel::PgConnection;
use diesel::QueryDsl;
use diesel::QueryResult;
use diesel::Queryable;
use diesel::RunQueryDsl;
use time::OffsetDateTime;

pub const USER_CREATED: &str = "USER_CREATED";
pub const USER_UPDATED: &str = "USER_UPDATED";
pub const USER_DELETED: &str = "USER_DELETED";
pub const USER_ARCHIVED: &str = "USER_ARCHIVED";
pub const USER_REACTIVATED: &str = "USER_REACTIVATED";
pub const USER_ANONYMIZED: &str = "USER_ANONYMIZED";
pub const PII_ACCESSED: &str = "PII_ACCESSED";
pub const ADDRESS_ADDED: &str = "ADDRESS_ADDED";
pub const ADDRESS_UPDATED: &str = "ADDRESS_UPDATED";
pub const ADDRESS_DELETED: &str = "ADDRESS_DELETED";
pub const CONSENT_GRANTED: &str = "CONSENT_GRANTED";
pub const CONSENT_WITHDRAWN: &str = "CONSENT_WITHDRAWN";
pub const ROLE_ASSIGNED: &str = "ROLE_ASSIGNED";
pub const ROLE_REMOVED: &str = "ROLE_REMOVED";
pub const DATA_EXPORTED: &str = "DATA_EXPORTED";

#[derive(Debug, Clone, Queryable)]
pub struct AuditRecord {
    pub id: i64,
    pub user_id: Option<i64>,
    pub event_type: String,
    pub detail: serde_json::Value,
    pub actor: Option<String>,
    pub correlation_id: Option<String>,
    pub session_id: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone)]
pub struct NewAuditRecord<'a> {
    pub user_id: Option<i64>,
    pub event_type: &'a str,
    pub detail: serde_json::Value,
    pub actor: Option<&'a str>,
    pub correlation_id: Option<&'a str>,
}

/// Append-only; audit rows are never updated or deleted.
pub fn insert(conn: &mut PgConnection, record: &NewAuditRecord<'_>) -> QueryResult<usize> {
    diesel::insert_into(user_audit::table)
        .values((
            user_audit::user_id.eq(record.user_id),
            user_audit::event_type.eq(record.event_type),
            user_audit::detail.eq(&record.detail),
            user_audit::actor.eq(record.actor),
            user_audit::correlation_id.eq(record.correlation_id),
            user_audit::created_at.eq(OffsetDateTime::now_utc()),
        ))
        .execute(conn)
}

pub fn list_recent_for_user(
    conn: &mut PgConnection,
    user_id: i64,
    limit: i64,
) -> QueryResult<Vec<AuditRecord>> {
    user_audit::table
        .filter(user_audit::user_id.eq(user_id))
        .order(user_audit::created_at.desc())
        .limit(limit)
        .load(conn)
}
