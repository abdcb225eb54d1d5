use crate::schema::invoices;
use crate::schema::sql_types::InvoicePaymentStatusType;
use commons::EnrollmentCreated;
use commons::EnrollmentType;
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
#[diesel(sql_type = InvoicePaymentStatusType)]
pub enum InvoiceStatus {
    Pending,
    Paid,
    Failed,
}

impl QueryId for InvoicePaymentStatusType {
    type QueryId = InvoicePaymentStatusType;
    const HAS_STATIC_QUERY_ID: bool = false;

    fn query_id() -> Option<TypeId> {
        None
    }
}

impl ToSql<InvoicePaymentStatusType, Pg> for InvoiceStatus {
    fn to_sql<'b>(&'b self, out: &mut Output<'b, '_, Pg>) -> serialize::Result {
        match *self {
            InvoiceStatus::Pending => out.write_all(b"PENDING")?,
            InvoiceStatus::Paid => out.write_all(b"PAID")?,
            InvoiceStatus::Failed => out.write_all(b"FAILED")?,
        }
        Ok(IsNull::No)
    }
}

impl FromSql<InvoicePaymentStatusType, Pg> for InvoiceStatus {
    fn from_sql(bytes: PgValue<'_>) -> deserialize::Result<Self> {
        match bytes.as_bytes() {
            b"PENDING" => Ok(InvoiceStatus::Pending),
            b"PAID" => Ok(InvoiceStatus::Paid),
            b"FAILED" => Ok(InvoiceStatus::Failed),
            other => Err(format!("unrecognized invoice status: {other:?}").into()),
        }
    }
}

#[derive(Debug, Clone, Queryable)]
pub struct Invoice {
    pub id: i64,
    pub invoice_number: String,
    pub enrollment_id: String,
    pub registration_id: String,
    pub user_id: String,
    pub plan_id: String,
    pub plan_title: String,
    pub enrollment_type: String,
    pub team_name: Option<String>,
    pub base_amount: Decimal,
    pub discount_amount: Decimal,
    pub tax_amount: Decimal,
    pub convenience_fee: Decimal,
    pub platform_fee: Decimal,
    pub total_amount: Decimal,
    pub currency: String,
    pub billing_name: String,
    pub billing_email: String,
    pub billing_phone: String,
    pub billing_address: Option<String>,
    pub payment_status: InvoiceStatus,
    pub payment_method: Option<String>,
    pub gateway_order_id: Option<String>,
    pub gateway_payment_id: Option<String>,
    pub payment_transaction_id: Option<i64>,
    pub vendor_id: Option<String>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl Invoice {
    pub fn is_terminal(&self) -> bool {
        self.payment_status != InvoiceStatus::Pending
    }
}

/// Insert an invoice derived from an enrollment event. The unique
/// registration id makes replays a no-op: 0 rows means the invoice already
/// existed.
pub fn insert_from_enrollment(
    conn: &mut PgConnection,
    enrollment: &EnrollmentCreated,
) -> QueryResult<usize> {
    let enrollment_type = match enrollment.enrollment_type {
        EnrollmentType::Individual => "INDIVIDUAL",
        EnrollmentType::Team => "TEAM",
    };
    let now = OffsetDateTime::now_utc();
    diesel::insert_into(invoices::table)
        .values((
            invoices::invoice_number.eq(&enrollment.registration_id),
            invoices::enrollment_id.eq(&enrollment.enrollment_id),
            invoices::registration_id.eq(&enrollment.registration_id),
            invoices::user_id.eq(&enrollment.user_id),
            invoices::plan_id.eq(&enrollment.plan_id),
            invoices::plan_title.eq(&enrollment.plan_title),
            invoices::enrollment_type.eq(enrollment_type),
            invoices::team_name.eq(enrollment.team_name.as_deref()),
            invoices::base_amount.eq(enrollment.base_amount),
            invoices::discount_amount.eq(enrollment.discount_amount),
            invoices::tax_amount.eq(enrollment.tax_amount),
            invoices::convenience_fee.eq(enrollment.convenience_fee),
            invoices::platform_fee.eq(enrollment.platform_fee),
            invoices::total_amount.eq(enrollment.total_amount),
            invoices::currency.eq(&enrollment.currency),
            invoices::billing_name.eq(&enrollment.billing_name),
            invoices::billing_email.eq(&enrollment.billing_email),
            invoices::billing_phone.eq(&enrollment.billing_phone),
            invoices::billing_address.eq(enrollment.billing_address.as_deref()),
            invoices::payment_status.eq(InvoiceStatus::Pending),
            invoices::vendor_id.eq(enrollment.vendor_id.as_deref()),
            invoices::created_at.eq(now),
            invoices::updated_at.eq(now),
        ))
        .on_conflict(invoices::registration_id)
        .do_nothing()
        .execute(conn)
}

pub fn by_registration_id(
    conn: &mut PgConnection,
    registration_id: &str,
) -> QueryResult<Option<Invoice>> {
    invoices::table
        .filter(invoices::registration_id.eq(registration_id))
        .first(conn)
        .optional()
}

pub fn by_id(conn: &mut PgConnection, id: i64) -> QueryResult<Option<Invoice>> {
    invoices::table.find(id).first(conn).optional()
}

pub fn by_gateway_order_id(
    conn: &mut PgConnection,
    gateway_order_id: &str,
) -> QueryResult<Option<Invoice>> {
    invoices::table
        .filter(invoices::gateway_order_id.eq(gateway_order_id))
        .first(conn)
        .optional()
}

pub fn link_payment_transaction(
    conn: &mut PgConnection,
    invoice_id: i64,
    payment_transaction_id: i64,
    gateway_order_id: &str,
) -> QueryResult<usize> {
    diesel::update(invoices::table.find(invoice_id))
        .set((
            invoices::payment_transaction_id.eq(payment_transaction_id),
            invoices::gateway_order_id.eq(gateway_order_id),
            invoices::updated_at.eq(OffsetDateTime::now_utc()),
        ))
        .execute(conn)
}

/// PENDING → PAID. Returns 0 when the invoice was not PENDING; terminal
/// states never transition again.
pub fn mark_paid(
    conn: &mut PgConnection,
    invoice_id: i64,
    payment_method: &str,
    gateway_payment_id: &str,
) -> QueryResult<usize> {
    diesel::update(
        invoices::table
            .find(invoice_id)
            .filter(invoices::payment_status.eq(InvoiceStatus::Pending)),
    )
    .set((
        invoices::payment_status.eq(InvoiceStatus::Paid),
        invoices::payment_method.eq(payment_method),
        invoices::gateway_payment_id.eq(gateway_payment_id),
        invoices::updated_at.eq(OffsetDateTime::now_utc()),
    ))
    .execute(conn)
}

/// PENDING → FAILED, same guard as [`mark_paid`].
pub fn mark_failed(conn: &mut PgConnection, invoice_id: i64) -> QueryResult<usize> {
    diesel::update(
        invoices::table
            .find(invoice_id)
            .filter(invoices::payment_status.eq(InvoiceStatus::Pending)),
    )
    .set((
        invoices::payment_status.eq(InvoiceStatus::Failed),
        invoices::updated_at.eq(OffsetDateTime::now_utc()),
    ))
    .execute(conn)
}
