use crate::schema::payment_transactions;
use crate::schema::sql_types::PaymentTxStatusType;
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
#[diesel(sql_type = PaymentTxStatusType)]
pub enum PaymentTxStatus {
    Pending,
    Authorized,
    Captured,
    Failed,
}

impl PaymentTxStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, PaymentTxStatus::Captured | PaymentTxStatus::Failed)
    }
}

impl QueryId for PaymentTxStatusType {
    type QueryId = PaymentTxStatusType;
    const HAS_STATIC_QUERY_ID: bool = false;

    fn query_id() -> Option<TypeId> {
        None
    }
}

impl ToSql<PaymentTxStatusType, Pg> for PaymentTxStatus {
    fn to_sql<'b>(&'b self, out: &mut Output<'b, '_, Pg>) -> serialize::Result {
        match *self {
            PaymentTxStatus::Pending => out.write_all(b"PENDING")?,
            PaymentTxStatus::Authorized => out.write_all(b"AUTHORIZED")?,
            PaymentTxStatus::Captured => out.write_all(b"CAPTURED")?,
            PaymentTxStatus::Failed => out.write_all(b"FAILED")?,
        }
        Ok(IsNull::No)
    }
}

impl FromSql<PaymentTxStatusType, Pg> for PaymentTxStatus {
    fn from_sql(bytes: PgValue<'_>) -> deserialize::Result<Self> {
        match bytes.as_bytes() {
            b"PENDING" => Ok(PaymentTxStatus::Pending),
            b"AUTHORIZED" => Ok(PaymentTxStatus::Authorized),
            b"CAPTURED" => Ok(PaymentTxStatus::Captured),
            b"FAILED" => Ok(PaymentTxStatus::Failed),
            other => Err(format!("unrecognized payment tx status: {other:?}").into()),
        }
    }
}

#[derive(Debug, Clone, Queryable)]
pub struct PaymentTransaction {
    pub id: i64,
    pub invoice_id: i64,
    pub amount: Decimal,
    pub currency: String,
    pub status: PaymentTxStatus,
    pub gateway_order_id: String,
    pub gateway_payment_id: Option<String>,
    pub vendor_id: Option<String>,
    pub payment_method: Option<String>,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

pub fn insert(
    conn: &mut PgConnection,
    invoice_id: i64,
    amount: Decimal,
    currency: &str,
    gateway_order_id: &str,
    vendor_id: Option<&str>,
) -> QueryResult<PaymentTransaction> {
    let now = OffsetDateTime::now_utc();
    diesel::insert_into(payment_transactions::table)
        .values((
            payment_transactions::invoice_id.eq(invoice_id),
            payment_transactions::amount.eq(amount),
            payment_transactions::currency.eq(currency),
            payment_transactions::status.eq(PaymentTxStatus::Pending),
            payment_transactions::gateway_order_id.eq(gateway_order_id),
            payment_transactions::vendor_id.eq(vendor_id),
            payment_transactions::created_at.eq(now),
            payment_transactions::updated_at.eq(now),
        ))
        .get_result(conn)
}

pub fn by_id(conn: &mut PgConnection, id: i64) -> QueryResult<Option<PaymentTransaction>> {
    payment_transactions::table.find(id).first(conn).optional()
}

pub fn by_gateway_order_id(
    conn: &mut PgConnection,
    gateway_order_id: &str,
) -> QueryResult<Option<PaymentTransaction>> {
    payment_transactions::table
        .filter(payment_transactions::gateway_order_id.eq(gateway_order_id))
        .order(payment_transactions::created_at.desc())
        .first(conn)
        .optional()
}

/// Open transactions whose last update is older than `cutoff`; input for
/// the reconciler's order-payments refresh.
pub fn list_stale_open(
    conn: &mut PgConnection,
    cutoff: OffsetDateTime,
    limit: i64,
) -> QueryResult<Vec<PaymentTransaction>> {
    payment_transactions::table
        .filter(
            payment_transactions::status
                .eq_any([PaymentTxStatus::Pending, PaymentTxStatus::Authorized]),
        )
        .filter(payment_transactions::updated_at.le(cutoff))
        .order(payment_transactions::updated_at.asc())
        .limit(limit)
        .load(conn)
}

/// PENDING → AUTHORIZED.
pub fn mark_authorized(
    conn: &mut PgConnection,
    id: i64,
    gateway_payment_id: &str,
) -> QueryResult<usize> {
    diesel::update(
        payment_transactions::table
            .find(id)
            .filter(payment_transactions::status.eq(PaymentTxStatus::Pending)),
    )
    .set((
        payment_transactions::status.eq(PaymentTxStatus::Authorized),
        payment_transactions::gateway_payment_id.eq(gateway_payment_id),
        payment_transactions::updated_at.eq(OffsetDateTime::now_utc()),
    ))
    .execute(conn)
}

/// PENDING|AUTHORIZED → CAPTURED. 0 rows means the transaction was already
/// terminal.
pub fn mark_captured(
    conn: &mut PgConnection,
    id: i64,
    gateway_payment_id: &str,
    payment_method: Option<&str>,
) -> QueryResult<usize> {
    diesel::update(
        payment_transactions::table.find(id).filter(
            payment_transactions::status
                .eq_any([PaymentTxStatus::Pending, PaymentTxStatus::Authorized]),
        ),
    )
    .set((
        payment_transactions::status.eq(PaymentTxStatus::Captured),
        payment_transactions::gateway_payment_id.eq(gateway_payment_id),
        payment_transactions::payment_method.eq(payment_method),
        payment_transactions::updated_at.eq(OffsetDateTime::now_utc()),
    ))
    .execute(conn)
}

/// PENDING|AUTHORIZED → FAILED.
pub fn mark_failed(
    conn: &mut PgConnection,
    id: i64,
    error_code: Option<&str>,
    error_message: Option<&str>,
) -> QueryResult<usize> {
    diesel::update(
        payment_transactions::table.find(id).filter(
            payment_transactions::status
                .eq_any([PaymentTxStatus::Pending, PaymentTxStatus::Authorized]),
        ),
    )
    .set((
        payment_transactions::status.eq(PaymentTxStatus::Failed),
        payment_transactions::error_code.eq(error_code),
        payment_transactions::error_message.eq(error_message),
        payment_transactions::updated_at.eq(OffsetDateTime::now_utc()),
    ))
    .execute(conn)
}
