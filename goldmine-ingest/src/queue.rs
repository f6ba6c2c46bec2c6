use goldmine_core::NewFill;
use thiserror::Error;
use tokio::sync::mpsc;

/// Returned by [`FillSender::submit`] once the writer side is gone.
#[derive(Debug, Error)]
#[error("ingestion queue closed")]
pub struct QueueClosed(pub NewFill);

/// Build the bounded handoff between connection handlers and the writer.
///
/// A capacity of zero is treated as one.
pub fn fill_queue(capacity: usize) -> (FillSender, FillReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (FillSender { tx }, FillReceiver { rx })
}

/// Producer half, cloned into every connection handler.
#[derive(Clone, Debug)]
pub struct FillSender {
    tx: mpsc::Sender<NewFill>,
}

impl FillSender {
    /// Enqueue a fill, waiting while the queue is full.
    pub async fn submit(&self, fill: NewFill) -> Result<(), QueueClosed> {
        self.tx.send(fill).await.map_err(|err| QueueClosed(err.0))
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Consumer half, owned by the single persistence writer.
#[derive(Debug)]
pub struct FillReceiver {
    rx: mpsc::Receiver<NewFill>,
}

impl FillReceiver {
    /// Next fill in arrival order; `None` once every sender is dropped.
    pub async fn recv(&mut self) -> Option<NewFill> {
        self.rx.recv().await
    }
}
