use anyhow::anyhow;
use anyhow::Result;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

pub fn init_tracing(level: LevelFilter, json_format: bool) -> Result<()> {
    let filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env()?
        .add_directive("hyper=warn".parse()?)
        .add_directive("reqwest=warn".parse()?)
        .add_directive("tokio_cron_scheduler=warn".parse()?);

    let registry = tracing_subscriber::registry().with(filter);
    if json_format {
        registry
            .with(fmt::layer().json())
            .try_init()
            .map_err(|e| anyhow!("failed to init tracing: {e}"))?;
    } else {
        registry
            .with(fmt::layer())
            .try_init()
            .map_err(|e| anyhow!("failed to init tracing: {e}"))?;
    }

    tracing::info!("Initialized logger");
    Ok(())
}
