use crate::schema::payout_transactions;
use crate::schema::sql_types::PayoutTxStatusType;
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
use diesel::Connection;
use diesel::ExpressionMethods;
use diesel::FromSqlRow;
use diesel::OptionalExtension;
use diesel::PgConnection;
use diesel::QueryDsl;
use diesel::QueryResult;
use diesel::Queryable;
use diesel::RunQueryDsl;
use rust_decimal::Decimal;
use std::any::TypeId;
use std::io::Write;
use time::OffsetDateTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq, FromSqlRow, AsExpression)]
#[diesel(sql_type = PayoutTxStatusType)]
pub enum PayoutStatus {
    Init,
    Pending,
    Success,
    Failed,
}

impl PayoutStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, PayoutStatus::Success | PayoutStatus::Failed)
    }
}

impl QueryId for PayoutTxStatusType {
    type QueryId = PayoutTxStatusType;
    const HAS_STATIC_QUERY_ID: bool = false;

    fn query_id() -> Option<TypeId> {
        None
    }
}

impl ToSql<PayoutTxStatusType, Pg> for PayoutStatus {
    fn to_sql<'b>(&'b self, out: &mut Output<'b, '_, Pg>) -> serialize::Result {
        match *self {
            PayoutStatus::Init => out.write_all(b"INIT")?,
            PayoutStatus::Pending => out.write_all(b"PENDING")?,
            PayoutStatus::Success => out.write_all(b"SUCCESS")?,
            PayoutStatus::Failed => out.write_all(b"FAILED")?,
        }
        Ok(IsNull::No)
    }
}

impl FromSql<PayoutTxStatusType, Pg> for PayoutStatus {
    fn from_sql(bytes: PgValue<'_>) -> deserialize::Result<Self> {
        match bytes.as_bytes() {
            b"INIT" => Ok(PayoutStatus::Init),
            b"PENDING" => Ok(PayoutStatus::Pending),
            b"SUCCESS" => Ok(PayoutStatus::Success),
            b"FAILED" => Ok(PayoutStatus::Failed),
            other => Err(format!("unrecognized payout status: {other:?}").into()),
        }
    }
}

#[derive(Debug, Clone, Queryable)]
pub struct PayoutTransaction {
    pub id: i64,
    pub payment_transaction_id: i64,
    pub vendor_id: String,
    pub gross_amount: Decimal,
    pub commission_amount: Decimal,
    pub net_amount: Decimal,
    pub currency: String,
    pub status: PayoutStatus,
    pub gateway_payout_id: Option<String>,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

#[allow(clippy::too_many_arguments)]
pub fn insert_init(
    conn: &mut PgConnection,
    payment_transaction_id: i64,
    vendor_id: &str,
    gross: Decimal,
    commission: Decimal,
    net: Decimal,
    currency: &str,
) -> QueryResult<PayoutTransaction> {
    let now = OffsetDateTime::now_utc();
    diesel::insert_into(payout_transactions::table)
        .values((
            payout_transactions::payment_transaction_id.eq(payment_transaction_id),
            payout_transactions::vendor_id.eq(vendor_id),
            payout_transactions::gross_amount.eq(gross),
            payout_transactions::commission_amount.eq(commission),
            payout_transactions::net_amount.eq(net),
            payout_transactions::currency.eq(currency),
            payout_transactions::status.eq(PayoutStatus::Init),
            payout_transactions::created_at.eq(now),
            payout_transactions::updated_at.eq(now),
        ))
        .get_result(conn)
}

pub fn by_id(conn: &mut PgConnection, id: i64) -> QueryResult<Option<PayoutTransaction>> {
    payout_transactions::table.find(id).first(conn).optional()
}

pub fn by_gateway_payout_id(
    conn: &mut PgConnection,
    gateway_payout_id: &str,
) -> QueryResult<Option<PayoutTransaction>> {
    payout_transactions::table
        .filter(payout_transactions::gateway_payout_id.eq(gateway_payout_id))
        .first(conn)
        .optional()
}

pub fn by_payment_transaction_id(
    conn: &mut PgConnection,
    payment_transaction_id: i64,
) -> QueryResult<Option<PayoutTransaction>> {
    payout_transactions::table
        .filter(payout_transactions::payment_transaction_id.eq(payment_transaction_id))
        .first(conn)
        .optional()
}

/// INIT rows due for gateway submission, locked with SKIP LOCKED so
/// concurrent submitter instances never pick the same row in one pass.
pub fn claim_submittable(
    conn: &mut PgConnection,
    limit: i64,
) -> QueryResult<Vec<PayoutTransaction>> {
    conn.transaction(|conn| {
        payout_transactions::table
            .filter(payout_transactions::status.eq(PayoutStatus::Init))
            .order(payout_transactions::created_at.asc())
            .limit(limit)
            .for_update()
            .skip_locked()
            .load(conn)
    })
}

/// INIT → PENDING after a 2xx from the gateway.
pub fn mark_pending(
    conn: &mut PgConnection,
    id: i64,
    gateway_payout_id: &str,
) -> QueryResult<usize> {
    diesel::update(
        payout_transactions::table
            .find(id)
            .filter(payout_transactions::status.eq(PayoutStatus::Init)),
    )
    .set((
        payout_transactions::status.eq(PayoutStatus::Pending),
        payout_transactions::gateway_payout_id.eq(gateway_payout_id),
        payout_transactions::updated_at.eq(OffsetDateTime::now_utc()),
    ))
    .execute(conn)
}

/// INIT → FAILED on submit error.
pub fn mark_submit_failed(
    conn: &mut PgConnection,
    id: i64,
    error_code: &str,
    error_message: &str,
) -> QueryResult<usize> {
    diesel::update(
        payout_transactions::table
            .find(id)
            .filter(payout_transactions::status.eq(PayoutStatus::Init)),
    )
    .set((
        payout_transactions::status.eq(PayoutStatus::Failed),
        payout_transactions::error_code.eq(error_code),
        payout_transactions::error_message.eq(error_message),
        payout_transactions::updated_at.eq(OffsetDateTime::now_utc()),
    ))
    .execute(conn)
}

/// PENDING → SUCCESS, keyed by the gateway payout id from the webhook.
pub fn mark_success(conn: &mut PgConnection, gateway_payout_id: &str) -> QueryResult<usize> {
    diesel::update(
        payout_transactions::table
            .filter(payout_transactions::gateway_payout_id.eq(gateway_payout_id))
            .filter(payout_transactions::status.eq(PayoutStatus::Pending)),
    )
    .set((
        payout_transactions::status.eq(PayoutStatus::Success),
        payout_transactions::updated_at.eq(OffsetDateTime::now_utc()),
    ))
    .execute(conn)
}

/// PENDING → FAILED, keyed by the gateway payout id from the webhook.
pub fn mark_webhook_failed(
    conn: &mut PgConnection,
    gateway_payout_id: &str,
    error_code: Option<&str>,
    error_message: Option<&str>,
) -> QueryResult<usize> {
    diesel::update(
        payout_transactions::table
            .filter(payout_transactions::gateway_payout_id.eq(gateway_payout_id))
            .filter(payout_transactions::status.eq(PayoutStatus::Pending)),
    )
    .set((
        payout_transactions::status.eq(PayoutStatus::Failed),
        payout_transactions::error_code.eq(error_code),
        payout_transactions::error_message.eq(error_message),
        payout_transactions::updated_at.eq(OffsetDateTime::now_utc()),
    ))
    .execute(conn)
}

/// Overwrite the status without a precondition. Only for webhook conflict
/// resolution, where an event newer than `updated_at` overrides a terminal
/// state recorded earlier.
pub fn force_terminal(
    conn: &mut PgConnection,
    id: i64,
    status: PayoutStatus,
    error_code: Option<&str>,
    error_message: Option<&str>,
) -> QueryResult<usize> {
    diesel::update(payout_transactions::table.find(id))
        .set((
            payout_transactions::status.eq(status),
            payout_transactions::error_code.eq(error_code),
            payout_transactions::error_message.eq(error_message),
            payout_transactions::updated_at.eq(OffsetDateTime::now_utc()),
        ))
        .execute(conn)
}

/// PENDING payouts whose last update is older than `cutoff`; input for the
/// reconciler's status refresh.
pub fn list_stale_pending(
    conn: &mut PgConnection,
    cutoff: OffsetDateTime,
    limit: i64,
) -> QueryResult<Vec<PayoutTransaction>> {
    payout_transactions::table
        .filter(payout_transactions::status.eq(PayoutStatus::Pending))
        .filter(payout_transactions::updated_at.le(cutoff))
        .order(payout_transactions::updated_at.asc())
        .limit(limit)
        .load(conn)
}
