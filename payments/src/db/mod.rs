use crate::PaymentError;
use anyhow::Context;
use diesel::r2d2::ConnectionManager;
use diesel::r2d2::Pool;
use diesel::r2d2::PooledConnection;
use diesel::PgConnection;
use tokio::task::spawn_blocking;

pub mod invoices;
pub mod payment_transactions;
pub mod payouts;
pub mod vendors;

pub type PgPool = Pool<ConnectionManager<PgConnection>>;
pub type PgPooledConnection = PooledConnection<ConnectionManager<PgConnection>>;

/// Check out a connection off the async executor.
pub async fn acquire(pool: &PgPool) -> Result<PgPooledConnection, PaymentError> {
    let pool = pool.clone();
    let conn = spawn_blocking(move || pool.get())
        .await
        .expect("task to complete")
        .context("could not acquire db connection")?;
    Ok(conn)
}
