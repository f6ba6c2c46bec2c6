use std::sync::Arc;

use anyhow::{anyhow, Result};
use goldmine_core::NewFill;
use goldmine_store::FillStore;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::metrics::IngestMetrics;
use crate::queue::FillReceiver;
use crate::shutdown::ShutdownSignal;

/// The only task that appends fills during ingestion.
pub struct PersistenceWriter {
    task: Option<JoinHandle<()>>,
}

impl PersistenceWriter {
    /// Start draining `queue` into `store`.
    pub fn spawn(
        store: Arc<dyn FillStore>,
        queue: FillReceiver,
        shutdown: ShutdownSignal,
        metrics: IngestMetrics,
    ) -> Self {
        let worker = WriterWorker {
            store,
            queue,
            shutdown,
            metrics,
        };
        let task = tokio::spawn(worker.run());
        Self { task: Some(task) }
    }

    /// Wait for the writer to exit.
    ///
    /// The writer stops on shutdown or once every queue sender is dropped.
    pub async fn join(mut self) -> Result<()> {
        if let Some(task) = self.task.take() {
            task.await
                .map_err(|err| anyhow!("persistence writer task aborted: {err}"))?;
        }
        Ok(())
    }
}

struct WriterWorker {
    store: Arc<dyn FillStore>,
    queue: FillReceiver,
    shutdown: ShutdownSignal,
    metrics: IngestMetrics,
}

impl WriterWorker {
    async fn run(mut self) {
        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.wait() => {
                    info!("persistence writer stopping on shutdown");
                    break;
                }
                message = self.queue.recv() => match message {
                    Some(fill) => persist(&self.store, &self.metrics, fill).await,
                    None => {
                        debug!("ingestion queue drained and closed");
                        break;
                    }
                },
            }
        }
    }
}

async fn persist(store: &Arc<dyn FillStore>, metrics: &IngestMetrics, fill: NewFill) {
    let store = store.clone();
    let account = fill.account.clone();
    let security = fill.security.clone();
    let quantity = fill.quantity;
    match tokio::task::spawn_blocking(move || store.append(&fill)).await {
        Ok(Ok(id)) => {
            metrics.inc_persisted();
            debug!(fill_id = id, %account, %security, quantity, "fill persisted");
        }
        Ok(Err(err)) => {
            metrics.inc_store_error();
            warn!(
                error = %err,
                %account,
                %security,
                quantity,
                "dropping fill after store error"
            );
        }
        Err(err) => {
            metrics.inc_store_error();
            error!(error = %err, "fill append task failed");
        }
    }
}
