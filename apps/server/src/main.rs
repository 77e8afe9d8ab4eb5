//! SureRoute transfer server entry point.

mod app;
mod config;

use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    // Initialize structured logging.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        "starting SureRoute server"
    );

    let config = config::Config::load()?;
    tracing::info!(
        listen = %config.listen_addr,
        events_port = config.events_port,
        data_dir = %config.data_dir.display(),
        "configuration loaded"
    );

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(app::run(config))?;

    tracing::info!("server shut down cleanly");
    Ok(())
}
