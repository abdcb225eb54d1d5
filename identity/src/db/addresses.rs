use crate::schema::addresses;
use crate::schema::sql_types::AddressTypeType;
use diesel::deserialize;
use diesel::deserialize::FromSql;
use diesel::pg::Pg;
use diesel::pg::PgValue;
use diesel::query_builder::QueryId;
use diesel::serialize;
use diesel::serialize::IsNull;
use diesel::serialize::Output;
use diesel::serialize::ToSql;
use diesel::AsChangeset;
use diesel::AsExpression;
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
use time::OffsetDateTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq, FromSqlRow, AsExpression)]
#[diesel(sql_type = AddressTypeType)]
pub enum AddressType {
    Home,
    Work,
    Other,
}

impl AddressType {
    pub fn parse(value: &str) -> Option<AddressType> {
        match value {
            "HOME" => Some(AddressType::Home),
            "WORK" => Some(AddressType::Work),
            "OTHER" => Some(AddressType::Other),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AddressType::Home => "HOME",
            AddressType::Work => "WORK",
            AddressType::Other => "OTHER",
        }
    }
}

impl QueryId for AddressTypeType {
    type QueryId = AddressTypeType;
    const HAS_STATIC_QUERY_ID: bool = false;

    fn query_id() -> Option<TypeId> {
        None
    }
}

impl ToSql<AddressTypeType, Pg> for AddressType {
    fn to_sql<'b>(&'b self, out: &mut Output<'b, '_, Pg>) -> serialize::Result {
        out.write_all(self.as_str().as_bytes())?;
        Ok(IsNull::No)
    }
}

impl FromSql<AddressTypeType, Pg> for AddressType {
    fn from_sql(bytes: PgValue<'_>) -> deserialize::Result<Self> {
        match bytes.as_bytes() {
            b"HOME" => Ok(AddressType::Home),
            b"WORK" => Ok(AddressType::Work),
            b"OTHER" => Ok(AddressType::Other),
            other => Err(format!("unrecognized address type: {other:?}").into()),
        }
    }
}

#[derive(Debug, Clone, Queryable)]
pub struct Address {
    pub id: i64,
    pub user_id: i64,
    pub address_type: AddressType,
    pub line1_enc: String,
    pub line2_enc: Option<String>,
    pub city_enc: String,
    pub postal_code_enc: String,
    pub country_enc: String,
    pub is_primary: bool,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, Clone)]
pub struct NewAddressRow {
    pub user_id: i64,
    pub address_type: AddressType,
    pub line1_enc: String,
    pub line2_enc: Option<String>,
    pub city_enc: String,
    pub postal_code_enc: String,
    pub country_enc: String,
    pub is_primary: bool,
}

#[derive(Debug, Clone, Default, AsChangeset)]
#[diesel(table_name = addresses)]
pub struct AddressChangeset {
    pub address_type: Option<AddressType>,
    pub line1_enc: Option<String>,
    pub line2_enc: Option<String>,
    pub city_enc: Option<String>,
    pub postal_code_enc: Option<String>,
    pub country_enc: Option<String>,
}

pub fn insert(conn: &mut PgConnection, row: &NewAddressRow) -> QueryResult<Address> {
    let now = OffsetDateTime::now_utc();
    diesel::insert_into(addresses::table)
        .values((
            addresses::user_id.eq(row.user_id),
            addresses::address_type.eq(row.address_type),
            addresses::line1_enc.eq(&row.line1_enc),
            addresses::line2_enc.eq(row.line2_enc.as_deref()),
            addresses::city_enc.eq(&row.city_enc),
            addresses::postal_code_enc.eq(&row.postal_code_enc),
            addresses::country_enc.eq(&row.country_enc),
            addresses::is_primary.eq(row.is_primary),
            addresses::created_at.eq(now),
            addresses::updated_at.eq(now),
        ))
        .get_result(conn)
}

pub fn by_id(conn: &mut PgConnection, id: i64) -> QueryResult<Option<Address>> {
    addresses::table.find(id).first(conn).optional()
}

pub fn list_for_user(conn: &mut PgConnection, user_id: i64) -> QueryResult<Vec<Address>> {
    addresses::table
        .filter(addresses::user_id.eq(user_id))
        .order(addresses::created_at.asc())
        .load(conn)
}

pub fn update(conn: &mut PgConnection, id: i64, changes: &AddressChangeset) -> QueryResult<usize> {
    diesel::update(addresses::table.find(id))
        .set((
            changes.clone(),
            addresses::updated_at.eq(OffsetDateTime::now_utc()),
        ))
        .execute(conn)
}

pub fn delete(conn: &mut PgConnection, id: i64) -> QueryResult<usize> {
    diesel::delete(addresses::table.find(id)).execute(conn)
}

pub fn has_primary(conn: &mut PgConnection, user_id: i64) -> QueryResult<bool> {
    let count: i64 = addresses::table
        .filter(addresses::user_id.eq(user_id))
        .filter(addresses::is_primary.eq(true))
        .count()
        .get_result(conn)?;
    Ok(count > 0)
}

/// Most recently created address of the user, used to promote a new
/// primary after the old one is deleted.
pub fn latest_for_user(conn: &mut PgConnection, user_id: i64) -> QueryResult<Option<Address>> {
    addresses::table
        .filter(addresses::user_id.eq(user_id))
        .order(addresses::created_at.desc())
        .first(conn)
        .optional()
}

pub fn clear_primary_for_user(conn: &mut PgConnection, user_id: i64) -> QueryResult<usize> {
    diesel::update(
        addresses::table
            .filter(addresses::user_id.eq(user_id))
            .filter(addresses::is_primary.eq(true)),
    )
    .set((
        addresses::is_primary.eq(false),
        addresses::updated_at.eq(OffsetDateTime::now_utc()),
    ))
    .execute(conn)
}

pub fn set_primary(conn: &mut PgConnection, id: i64) -> QueryResult<usize> {
    diesel::update(addresses::table.find(id))
        .set((
            addresses::is_primary.eq(true),
            addresses::updated_at.eq(OffsetDateTime::now_utc()),
        ))
        .execute(conn)
}
