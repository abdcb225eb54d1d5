use crate::schema::vendor_profiles;
use diesel::ExpressionMethods;
use diesel::OptionalExtension;
use diesel::PgConnection;
use diesel::QueryDsl;
use diesel::QueryResult;
use diesel::Queryable;
use diesel::RunQueryDsl;
use rust_decimal::Decimal;
use time::OffsetDateTime;

#[derive(Debug, Clone, Queryable)]
pub struct VendorProfile {
    pub id: i64,
    pub vendor_id: String,
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub bank_account_number: Option<String>,
    pub bank_ifsc: Option<String>,
    pub account_holder_name: Option<String>,
    pub commission_rate: Decimal,
    pub active: bool,
    pub verified: bool,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl VendorProfile {
    /// Payout creation requires an active vendor with complete bank
    /// details.
    pub fn payout_ready(&self) -> bool {
        self.active
            && self
                .bank_account_number
                .as_deref()
                .is_some_and(|account| !account.is_empty())
            && self
                .bank_ifsc
                .as_deref()
                .is_some_and(|ifsc| !ifsc.is_empty())
    }
}

pub fn by_vendor_id(conn: &mut PgConnection, vendor_id: &str) -> QueryResult<Option<VendorProfile>> {
    vendor_profiles::table
        .filter(vendor_profiles::vendor_id.eq(vendor_id))
        .first(conn)
        .optional()
}

#[allow(clippy::too_many_arguments)]
pub fn insert(
    conn: &mut PgConnection,
    vendor_id: &str,
    name: &str,
    email: Option<&str>,
    phone: Option<&str>,
    bank_account_number: Option<&str>,
    bank_ifsc: Option<&str>,
    account_holder_name: Option<&str>,
    commission_rate: Decimal,
) -> QueryResult<VendorProfile> {
    let now = OffsetDateTime::now_utc();
    diesel::insert_into(vendor_profiles::table)
        .values((
            vendor_profiles::vendor_id.eq(vendor_id),
            vendor_profiles::name.eq(name),
            vendor_profiles::email.eq(email),
            vendor_profiles::phone.eq(phone),
            vendor_profiles::bank_account_number.eq(bank_account_number),
            vendor_profiles::bank_ifsc.eq(bank_ifsc),
            vendor_profiles::account_holder_name.eq(account_holder_name),
            vendor_profiles::commission_rate.eq(commission_rate),
            vendor_profiles::active.eq(true),
            vendor_profiles::verified.eq(false),
            vendor_profiles::created_at.eq(now),
            vendor_profiles::updated_at.eq(now),
        ))
        .get_result(conn)
}
