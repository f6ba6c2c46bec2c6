use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use goldmine_config::AppConfig;
use goldmine_ingest::{
    fill_queue, FillListener, IngestMetrics, ListenerConfig, PersistenceWriter, ShutdownSignal,
};
use goldmine_store::{FillStore, SqliteFillStore};
use tracing::info;

use crate::telemetry::spawn_metrics_server;

/// Listener settings derived from the `ingest` config section.
pub fn listener_config(config: &AppConfig) -> ListenerConfig {
    ListenerConfig {
        read_timeout: Duration::from_millis(config.ingest.read_timeout_ms),
        max_frame_bytes: config.ingest.max_frame_bytes,
    }
}

/// Run the ingestion pipeline until `shutdown` fires.
pub async fn run_ingest(config: &AppConfig, shutdown: ShutdownSignal) -> Result<()> {
    let store = SqliteFillStore::open(&config.db_path)
        .with_context(|| format!("failed to open fill store {}", config.db_path.display()))?;
    let store: Arc<dyn FillStore> = Arc::new(store);
    let metrics = IngestMetrics::new().context("failed to register ingest metrics")?;

    let (queue, receiver) = fill_queue(config.ingest.queue_capacity);
    let writer = PersistenceWriter::spawn(store, receiver, shutdown.clone(), metrics.clone());
    let listener = FillListener::bind(
        &config.ingest.endpoint,
        listener_config(config),
        queue,
        shutdown.clone(),
        metrics.clone(),
    )
    .await?;

    let metrics_task = match config.telemetry.metrics_addr.as_deref() {
        Some(addr) => {
            let addr: SocketAddr = addr
                .parse()
                .with_context(|| format!("invalid metrics address {addr}"))?;
            Some(spawn_metrics_server(metrics.registry(), addr, shutdown.clone()))
        }
        None => None,
    };

    info!(
        endpoint = %config.ingest.endpoint,
        db = %config.db_path.display(),
        queue_capacity = config.ingest.queue_capacity,
        "fill ingestion running"
    );
    let result = listener.run().await;
    shutdown.trigger();
    writer.join().await?;
    if let Some(task) = metrics_task {
        task.await.context("metrics server task failed")?;
    }
    info!(
        persisted = metrics.fills_persisted(),
        decode_errors = metrics.decode_errors(),
        store_errors = metrics.store_errors(),
        "fill ingestion stopped"
    );
    result
}
