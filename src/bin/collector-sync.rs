//! Headless queue drain for a collector device.
//!
//! Probes the booking API to track connectivity and replays queued sample
//! submissions whenever it is reachable.

use anyhow::Result;
use std::time::Duration;

use homecollect_backend::{client::CollectorRuntime, config, logging};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let settings = config::ClientSettings::from_env()?;

    logging::init_logging(&settings.env, "collector-sync");

    let runtime = CollectorRuntime::from_settings(&settings).await?;

    let pending = runtime.queue.pending_count().await?;
    tracing::info!(
        pending,
        sync_interval_secs = settings.queue_sync_interval_seconds,
        probe_interval_secs = settings.connectivity_probe_seconds,
        "Starting collector sync"
    );

    let reconciler = runtime.queue.clone().spawn_reconciler(
        Duration::from_secs(settings.queue_sync_interval_seconds),
        runtime.connectivity.subscribe(),
    );

    let mut probe = tokio::time::interval(Duration::from_secs(settings.connectivity_probe_seconds));
    loop {
        tokio::select! {
            _ = probe.tick() => {
                let online = runtime.api.ping().await;
                runtime.connectivity.set_online(online);
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutting down collector sync");
                break;
            }
        }
    }

    reconciler.abort();
    Ok(())
}
