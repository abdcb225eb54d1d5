use crate::schema::users;
use diesel::AsChangeset;
use diesel::BoolExpressionMethods;
use diesel::ExpressionMethods;
use diesel::OptionalExtension;
use diesel::PgConnection;
use diesel::QueryDsl;
use diesel::QueryResult;
use diesel::Queryable;
use diesel::RunQueryDsl;
use time::OffsetDateTime;
use uuid::Uuid;

/// Ciphertext sentinel written by anonymization.
pub const DELETED_SENTINEL: &str = "DELETED";

#[derive(Debug, Clone, Queryable)]
pub struct User {
    pub id: i64,
    pub reference_id: Uuid,
    pub first_name_enc: Option<String>,
    pub last_name_enc: Option<String>,
    pub email_enc: String,
    pub email_hmac: Option<String>,
    pub phone_enc: String,
    pub phone_hmac: Option<String>,
    pub dob_enc: Option<String>,
    pub gender: Option<String>,
    pub active: bool,
    pub archived_at: Option<OffsetDateTime>,
    pub anonymized: bool,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, Clone)]
pub struct NewUserRow {
    pub reference_id: Uuid,
    pub first_name_enc: Option<String>,
    pub last_name_enc: Option<String>,
    pub email_enc: String,
    pub email_hmac: String,
    pub phone_enc: String,
    pub phone_hmac: String,
    pub dob_enc: Option<String>,
    pub gender: Option<String>,
}

/// Encrypted-field update; `None` fields are left untouched.
#[derive(Debug, Clone, Default, AsChangeset)]
#[diesel(table_name = users)]
pub struct UserChangeset {
    pub first_name_enc: Option<String>,
    pub last_name_enc: Option<String>,
    pub email_enc: Option<String>,
    pub email_hmac: Option<String>,
    pub phone_enc: Option<String>,
    pub phone_hmac: Option<String>,
    pub dob_enc: Option<String>,
    pub gender: Option<String>,
}

pub fn insert(conn: &mut PgConnection, row: &NewUserRow) -> QueryResult<User> {
    let now = OffsetDateTime::now_utc();
    diesel::insert_into(users::table)
        .values((
            users::reference_id.eq(row.reference_id),
            users::first_name_enc.eq(row.first_name_enc.as_deref()),
            users::last_name_enc.eq(row.last_name_enc.as_deref()),
            users::email_enc.eq(&row.email_enc),
            users::email_hmac.eq(&row.email_hmac),
            users::phone_enc.eq(&row.phone_enc),
            users::phone_hmac.eq(&row.phone_hmac),
            users::dob_enc.eq(row.dob_enc.as_deref()),
            users::gender.eq(row.gender.as_deref()),
            users::active.eq(true),
            users::anonymized.eq(false),
            users::created_at.eq(now),
            users::updated_at.eq(now),
        ))
        .get_result(conn)
}

pub fn by_reference_id(conn: &mut PgConnection, reference_id: Uuid) -> QueryResult<Option<User>> {
    users::table
        .filter(users::reference_id.eq(reference_id))
        .first(conn)
        .optional()
}

pub fn by_id(conn: &mut PgConnection, id: i64) -> QueryResult<Option<User>> {
    users::table.find(id).first(conn).optional()
}

pub fn by_email_hmac(conn: &mut PgConnection, email_hmac: &str) -> QueryResult<Option<User>> {
    users::table
        .filter(users::email_hmac.eq(email_hmac))
        .first(conn)
        .optional()
}

pub fn by_phone_hmac(conn: &mut PgConnection, phone_hmac: &str) -> QueryResult<Option<User>> {
    users::table
        .filter(users::phone_hmac.eq(phone_hmac))
        .first(conn)
        .optional()
}

pub fn by_email_or_phone_hmac(
    conn: &mut PgConnection,
    email_hmac: &str,
    phone_hmac: &str,
) -> QueryResult<Option<User>> {
    users::table
        .filter(
            users::email_hmac
                .eq(email_hmac)
                .or(users::phone_hmac.eq(phone_hmac)),
        )
        .first(conn)
        .optional()
}

pub fn bulk_by_reference_ids(
    conn: &mut PgConnection,
    reference_ids: &[Uuid],
) -> QueryResult<Vec<User>> {
    users::table
        .filter(users::reference_id.eq_any(reference_ids))
        .order(users::created_at.asc())
        .load(conn)
}

/// Whether the HMAC is already indexed for a different user.
pub fn email_hmac_in_use(
    conn: &mut PgConnection,
    email_hmac: &str,
    exclude_user_id: Option<i64>,
) -> QueryResult<bool> {
    let count: i64 = match exclude_user_id {
        Some(id) => users::table
            .filter(users::email_hmac.eq(email_hmac))
            .filter(users::id.ne(id))
            .count()
            .get_result(conn)?,
        None => users::table
            .filter(users::email_hmac.eq(email_hmac))
            .count()
            .get_result(conn)?,
    };
    Ok(count > 0)
}

pub fn phone_hmac_in_use(
    conn: &mut PgConnection,
    phone_hmac: &str,
    exclude_user_id: Option<i64>,
) -> QueryResult<bool> {
    let count: i64 = match exclude_user_id {
        Some(id) => users::table
            .filter(users::phone_hmac.eq(phone_hmac))
            .filter(users::id.ne(id))
            .count()
            .get_result(conn)?,
        None => users::table
            .filter(users::phone_hmac.eq(phone_hmac))
            .count()
            .get_result(conn)?,
    };
    Ok(count > 0)
}

pub fn update_pii(conn: &mut PgConnection, id: i64, changes: &UserChangeset) -> QueryResult<usize> {
    diesel::update(users::table.find(id))
        .set((changes.clone(), users::updated_at.eq(OffsetDateTime::now_utc())))
        .execute(conn)
}

/// ACTIVE → ARCHIVED. 0 rows means the user was already archived (or
/// anonymized).
pub fn archive(conn: &mut PgConnection, id: i64) -> QueryResult<usize> {
    diesel::update(users::table.find(id).filter(users::active.eq(true)))
        .set((
            users::active.eq(false),
            users::archived_at.eq(OffsetDateTime::now_utc()),
            users::updated_at.eq(OffsetDateTime::now_utc()),
        ))
        .execute(conn)
}

/// ARCHIVED → ACTIVE. Anonymized users never reactivate.
pub fn reactivate(conn: &mut PgConnection, id: i64) -> QueryResult<usize> {
    diesel::update(
        users::table
            .find(id)
            .filter(users::active.eq(false))
            .filter(users::anonymized.eq(false)),
    )
    .set((
        users::active.eq(true),
        users::archived_at.eq(None::<OffsetDateTime>),
        users::updated_at.eq(OffsetDateTime::now_utc()),
    ))
    .execute(conn)
}

/// Terminal: ciphertexts become the sentinel, the search index is dropped,
/// the reference id survives for audit linkage.
pub fn anonymize(conn: &mut PgConnection, id: i64) -> QueryResult<usize> {
    let now = OffsetDateTime::now_utc();
    diesel::update(users::table.find(id).filter(users::anonymized.eq(false)))
        .set((
            users::first_name_enc.eq(DELETED_SENTINEL),
            users::last_name_enc.eq(DELETED_SENTINEL),
            users::email_enc.eq(DELETED_SENTINEL),
            users::phone_enc.eq(DELETED_SENTINEL),
            users::dob_enc.eq(DELETED_SENTINEL),
            users::email_hmac.eq(None::<String>),
            users::phone_hmac.eq(None::<String>),
            users::anonymized.eq(true),
            users::active.eq(false),
            users::archived_at.eq(now),
            users::updated_at.eq(now),
        ))
        .execute(conn)
}
