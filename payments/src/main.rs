use anyhow::anyhow;
use anyhow::Context;
use anyhow::Result;
use diesel::r2d2;
use diesel::r2d2::ConnectionManager;
use diesel::PgConnection;
use diesel_migrations::embed_migrations;
use diesel_migrations::EmbeddedMigrations;
use diesel_migrations::MigrationHarness;
use outbox::Dispatcher;
use outbox::HttpLogBus;
use outbox::MessageBus;
use payments::cli::Opts;
use payments::logger;
use payments::payment::PaymentOrchestrator;
use payments::payout::PayoutEngine;
use payments::reconciler::Reconciler;
use payments::routes;
use payments::settings::Settings;
use razorpay_client::RazorpayClient;
use resilience::Policy;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio_cron_scheduler::Job;
use tokio_cron_scheduler::JobScheduler;
use tracing_subscriber::filter::LevelFilter;

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!();

/// Cadence of the payout submitter between cron-grade jobs.
const PAYOUT_SUBMIT_INTERVAL: Duration = Duration::from_secs(5);

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

    let gateway = Arc::new(RazorpayClient::new(
        settings.gateway.base_url.clone(),
        settings.gateway.key_id.clone(),
        settings.gateway.key_secret.clone(),
        Duration::from_secs(settings.gateway.timeout_secs),
    )?);
    let orders_policy = Arc::new(Policy::new("gateway-orders", &settings.resilience.orders));
    let payments_policy = Arc::new(Policy::new("gateway-payments", &settings.resilience.payments));
    let payouts_policy = Arc::new(Policy::new("gateway-payouts", &settings.resilience.payouts));

    let payout_engine = Arc::new(PayoutEngine::new(
        pool.clone(),
        gateway.clone(),
        payouts_policy.clone(),
        settings.gateway.account_number.clone(),
        settings.commission.percent,
    ));
    let orchestrator = Arc::new(PaymentOrchestrator::new(
        pool.clone(),
        gateway.clone(),
        orders_policy,
        payments_policy,
        payout_engine.clone(),
    ));

    let bus: Arc<dyn MessageBus> = Arc::new(HttpLogBus::new(
        settings.bus.base_url.clone(),
        Duration::from_secs(settings.bus.timeout_secs),
    )?);
    let dispatcher = Arc::new(Dispatcher::new(
        pool.clone(),
        bus,
        settings.bus.topics.clone(),
        settings.outbox.clone(),
    ));

    tokio::spawn(dispatcher.clone().run());
    tokio::spawn(payout_engine.clone().run_submitter(PAYOUT_SUBMIT_INTERVAL));

    let reconciler = Arc::new(Reconciler::new(
        pool.clone(),
        orchestrator.clone(),
        payout_engine.clone(),
        gateway.clone(),
        payouts_policy,
    ));

    let scheduler = JobScheduler::new()
        .await
        .map_err(|e| anyhow!("could not create scheduler: {e:?}"))?;
    scheduler
        .add(
            Job::new_async("0 */5 * * * *", {
                let reconciler = reconciler.clone();
                move |_, _| {
                    let reconciler = reconciler.clone();
                    Box::pin(async move {
                        if let Err(e) = reconciler.run_once().await {
                            tracing::error!("Reconciler run failed: {e:#?}");
                        }
                    })
                }
            })
            .map_err(|e| anyhow!("could not create reconciler job: {e:?}"))?,
        )
        .await
        .map_err(|e| anyhow!("could not schedule reconciler job: {e:?}"))?;
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

    let app = routes::router(
        pool,
        orchestrator,
        payout_engine,
        settings.gateway.webhook_secret.clone(),
    );
    let addr: SocketAddr = settings
        .server
        .bind
        .parse()
        .with_context(|| format!("invalid bind address {}", settings.server.bind))?;
    tracing::info!("Payment service listening on {addr}");
    axum::Server::bind(&addr)
        .serve(app.into_make_service())
        .await
        .context("web server failed")?;

    Ok(())
}
