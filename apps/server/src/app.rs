//! Application orchestrator: wires store, scheduler, simulator client,
//! event channel and HTTP API together.

use std::net::SocketAddr;
use std::sync::Arc;

use sureroute_event_server::{EventBus, EventServer, ServerConfig};
use sureroute_ingest::Ingest;
use sureroute_netsim::ConditionsClient;
use sureroute_scheduler::Scheduler;
use sureroute_transfer::TransferStore;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::config::Config;

/// Runs the server until shutdown is requested.
pub async fn run(config: Config) -> anyhow::Result<()> {
    let cancel = CancellationToken::new();

    // -- Storage --
    let store = TransferStore::open(&config.data_dir).await?;
    tracing::info!(root = %store.root().display(), "transfer store ready");

    // -- Scheduler --
    // Outlives the API's graceful shutdown so in-flight chunks can finish.
    let scheduler = Scheduler::spawn(CancellationToken::new());

    // -- Link simulator --
    let conditions = ConditionsClient::new(config.simulator_url.clone(), config.conditions_ttl())?;

    // -- Event channel --
    let bus = EventBus::new();
    let events_addr: SocketAddr = (config.listen_addr.ip(), config.events_port).into();
    let event_server = EventServer::new(
        ServerConfig { addr: events_addr },
        bus.clone(),
        cancel.child_token(),
    );
    let event_run = Arc::clone(&event_server);
    let events_task = tokio::spawn(async move {
        if let Err(e) = event_run.run().await {
            tracing::error!("event server error: {e}");
        }
    });

    // -- HTTP API --
    let ingest = Arc::new(
        Ingest::new(store, scheduler.clone(), conditions, bus)
            .with_high_priority_idle(config.high_priority_idle()),
    );
    let app = sureroute_ingest::router(ingest, config.max_chunk_bytes);
    let listener = TcpListener::bind(config.listen_addr).await?;
    let api_task = tokio::spawn(sureroute_ingest::serve(listener, app, cancel.child_token()));

    tracing::info!("server ready");

    // -- Main loop: wait for shutdown --
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("SIGINT received, shutting down");
        }
        _ = cancel.cancelled() => {}
    }

    // -- Graceful shutdown --
    cancel.cancel();
    if let Err(e) = api_task.await? {
        tracing::error!("transfer API error: {e}");
    }
    scheduler.stop();
    events_task.await?;

    Ok(())
}
