use crate::IdentityError;
use anyhow::Context;
use diesel::r2d2::ConnectionManager;
use diesel::r2d2::Pool;
use diesel::r2d2::PooledConnection;
use diesel::PgConnection;
use tokio::task::spawn_blocking;

pub mod addresses;
pub mod audit;
pub mod consents;
pub mod roles;
pub mod users;

pub type PgPool = Pool<ConnectionManager<PgConnection>>;
pub type PgPooledConnection = PooledConnection<ConnectionManager<PgConnection>>;

/// Check out a connection off the async executor.
pub async fn acquire(pool: &PgPool) -> Result<PgPooledConnection, IdentityError> {
    let pool = pool.clone();
    let conn = spawn_blocking(move || pool.get())
        .await
        .expect("task to complete")
        .context("could not acquire db connection")?;
    Ok(conn)
}
