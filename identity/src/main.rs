use anyhow::anyhow;
use anyhow::Context;
use anyhow::Result;
use diesel::r2d2;
use diesel::r2d2::ConnectionManager;
use diesel::PgConnection;
use diesel_migrations::embed_migrations;
use diesel_migrations::EmbeddedMigrations;
use diesel_migrations::MigrationHarness;
use identity::address::AddressService;
use identity::cli::Opts;
use identity::consent::ConsentService;
use identity::logger;
use identity::routes;
use identity::settings::Settings;
use identity::user::UserService;
use outbox::Dispatcher;
use outbox::HttpLogBus;
use outbox::MessageBus;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio_cron_scheduler::Job;
use tokio_cron_scheduler::JobScheduler;
use tracing_subscriber::filter::LevelFilter;

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!();

#[tokio::main]
async fn main() -> Result<()> {
    let opts = Opts::read();
    let settings = Settings::new(&opts.config)?;
    logger::init_tracing(LevelFilter::DEBUG, opts.json)?;

    let manager = ConnectionManager::<PgConnection>::new(settings.database.url.clone());
    let pool = r2d2::Pool::builder()
        .build(manager)
        .context("could not build connection pool")?;

    let mut conn = pool.get().context("could not acquire db connection")?;
    conn.run_pending_migrations(MIGRATIONS)
        .map_err(|e| anyhow!("could not run migrations: {e}"))?;
    drop(conn);

    let crypto = settings.build_crypto()?;
    let users = Arc::new(UserService::new(pool.clone(), crypto.clone()));
    let addresses = Arc::new(AddressService::new(pool.clone(), crypto));
    let consents = Arc::new(ConsentService::new(pool.clone()));

    let bus: Arc<dyn MessageBus> = Arc::new(HttpLogBus::new(
        settings.bus.base_url.clone(),
        Duration::from_secs(settings.bus.timeout_secs),
    )?);
    let dispatcher = Arc::new(Dispatcher::new(
        pool,
        bus,
        settings.bus.topics.clone(),
        settings.outbox.clone(),
    ));
    tokio::spawn(dispatcher.clone().run());

    let scheduler = JobScheduler::new()
        .await
        .map_err(|e| anyhow!("could not create scheduler: {e:?}"))?;
    scheduler
        .add(
            Job::new_async("0 0 3 * * *", {
                let dispatcher = dispatcher.clone();
                move |_, _| {
                    let dispatcher = dispatcher.clone();
                    Box::pin(async move {
                        if let Err(e) = dispatcher.sweep().await {
                            tracing::error!("Outbox sweep failed: {e:#}");
                        }
                    })
                }
            })
            .map_err(|e| anyhow!("could not create sweep job: {e:?}"))?,
        )
        .await
        .map_err(|e| anyhow!("could not schedule sweep job: {e:?}"))?;
    scheduler
        .start()
        .await
        .map_err(|e| anyhow!("could not start scheduler: {e:?}"))?;

    let app = routes::router(users, addresses, consents);
    let addr: SocketAddr = settings
        .server
        .bind
        .parse()
        .with_context(|| format!("invalid bind address {}", settings.server.bind))?;
    tracing::info!("Identity service listening on {addr}");
    axum::Server::bind(&addr)
        .serve(app.into_make_service())
        .await
        .context("web server failed")?;

    Ok(())
}
