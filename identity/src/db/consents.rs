use crate::schema::consents;
use diesel::ExpressionMethods;
use diesel::OptionalExtension;
use diesel::PgConnection;
use diesel::QueryDsl;
use diesel::QueryResult;
use diesel::Queryable;
use diesel::RunQueryDsl;
use time::OffsetDateTime;

#[derive(Debug, Clone, Queryable)]
pub struct Consent {
    pub id: i64,
    pub user_id: i64,
    pub consent_key: String,
    pub granted: bool,
    pub consent_version: String,
    pub granted_at: Option<OffsetDateTime>,
    pub withdrawn_at: Option<OffsetDateTime>,
    pub source: String,
    pub legal_basis: String,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, Clone)]
pub struct GrantConsentRow<'a> {
    pub user_id: i64,
    pub consent_key: &'a str,
    pub consent_version: &'a str,
    pub source: &'a str,
    pub legal_basis: &'a str,
    pub ip_address: Option<&'a str>,
    pub user_agent: Option<&'a str>,
}

/// Grant (or re-grant) a consent. One row per (user, key); re-granting
/// clears any previous withdrawal.
pub fn grant(conn: &mut PgConnection, row: &GrantConsentRow<'_>) -> QueryResult<Consent> {
    let now = OffsetDateTime::now_utc();
    diesel::insert_into(consents::table)
        .values((
            consents::user_id.eq(row.user_id),
            consents::consent_key.eq(row.consent_key),
            consents::granted.eq(true),
            consents::consent_version.eq(row.consent_version),
            consents::granted_at.eq(now),
            consents::source.eq(row.source),
            consents::legal_basis.eq(row.legal_basis),
            consents::ip_address.eq(row.ip_address),
            consents::user_agent.eq(row.user_agent),
            consents::created_at.eq(now),
            consents::updated_at.eq(now),
        ))
        .on_conflict((consents::user_id, consents::consent_key))
        .do_update()
        .set((
            consents::granted.eq(true),
            consents::consent_version.eq(row.consent_version),
            consents::granted_at.eq(now),
            consents::withdrawn_at.eq(None::<OffsetDateTime>),
            consents::source.eq(row.source),
            consents::legal_basis.eq(row.legal_basis),
            consents::ip_address.eq(row.ip_address),
            consents::user_agent.eq(row.user_agent),
            consents::updated_at.eq(now),
        ))
        .get_result(conn)
}

/// Withdraw a granted consent. 0 rows means there was nothing granted.
pub fn withdraw(conn: &mut PgConnection, user_id: i64, consent_key: &str) -> QueryResult<usize> {
    diesel::update(
        consents::table
            .filter(consents::user_id.eq(user_id))
            .filter(consents::consent_key.eq(consent_key))
            .filter(consents::granted.eq(true)),
    )
    .set((
        consents::granted.eq(false),
        consents::withdrawn_at.eq(OffsetDateTime::now_utc()),
        consents::updated_at.eq(OffsetDateTime::now_utc()),
    ))
    .execute(conn)
}

pub fn by_user_and_key(
    conn: &mut PgConnection,
    user_id: i64,
    consent_key: &str,
) -> QueryResult<Option<Consent>> {
    consents::table
        .filter(consents::user_id.eq(user_id))
        .filter(consents::consent_key.eq(consent_key))
        .first(conn)
        .optional()
}

pub fn list_for_user(conn: &mut PgConnection, user_id: i64) -> QueryResult<Vec<Consent>> {
    consents::table
        .filter(consents::user_id.eq(user_id))
        .order(consents::consent_key.asc())
        .load(conn)
}
