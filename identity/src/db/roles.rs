use crate::schema::user_roles;
use diesel::ExpressionMethods;
use diesel::PgConnection;
use diesel::QueryDsl;
use diesel::QueryResult;
use diesel::Queryable;
use diesel::RunQueryDsl;
use time::OffsetDateTime;

#[derive(Debug, Clone, Queryable)]
pub struct UserRole {
    pub id: i64,
    pub user_id: i64,
    pub role: String,
    pub active: bool,
    pub assigned_at: OffsetDateTime,
    pub deactivated_at: Option<OffsetDateTime>,
}

/// Assign (or re-activate) a role. One row per (user, role).
pub fn assign(conn: &mut PgConnection, user_id: i64, role: &str) -> QueryResult<usize> {
    let now = OffsetDateTime::now_utc();
    diesel::insert_into(user_roles::table)
        .values((
            user_roles::user_id.eq(user_id),
            user_roles::role.eq(role),
            user_roles::active.eq(true),
            user_roles::assigned_at.eq(now),
        ))
        .on_conflict((user_roles::user_id, user_roles::role))
        .do_update()
        .set((
            user_roles::active.eq(true),
            user_roles::assigned_at.eq(now),
            user_roles::deactivated_at.eq(None::<OffsetDateTime>),
        ))
        .execute(conn)
}

/// Deactivate one role. 0 rows means it was not active.
pub fn remove(conn: &mut PgConnection, user_id: i64, role: &str) -> QueryResult<usize> {
    diesel::update(
        user_roles::table
            .filter(user_roles::user_id.eq(user_id))
            .filter(user_roles::role.eq(role))
            .filter(user_roles::active.eq(true)),
    )
    .set((
        user_roles::active.eq(false),
        user_roles::deactivated_at.eq(OffsetDateTime::now_utc()),
    ))
    .execute(conn)
}

/// Archive cascade: deactivate every active role of the user.
pub fn deactivate_all(conn: &mut PgConnection, user_id: i64) -> QueryResult<usize> {
    diesel::update(
        user_roles::table
            .filter(user_roles::user_id.eq(user_id))
            .filter(user_roles::active.eq(true)),
    )
    .set((
        user_roles::active.eq(false),
        user_roles::deactivated_at.eq(OffsetDateTime::now_utc()),
    ))
    .execute(conn)
}

pub fn active_roles(conn: &mut PgConnection, user_id: i64) -> QueryResult<Vec<String>> {
    user_roles::table
        .filter(user_roles::user_id.eq(user_id))
        .filter(user_roles::active.eq(true))
        .select(user_roles::role)
        .order(user_roles::role.asc())
        .load(conn)
}
