use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Cooperative cancellation shared by the listener, its connection handlers
/// and the persistence writer.
#[derive(Clone, Debug, Default)]
pub struct ShutdownSignal {
    token: CancellationToken,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fire the signal; idempotent.
    pub fn trigger(&self) {
        self.token.cancel();
    }

    pub fn triggered(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once the signal fires, immediately if it already has.
    pub async fn wait(&self) {
        self.token.cancelled().await;
    }

    /// Sleep for `duration`, returning `false` if interrupted by shutdown.
    pub async fn sleep(&self, duration: Duration) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(duration) => true,
            _ = self.token.cancelled() => false,
        }
    }

    /// Trigger the signal on Ctrl-C.
    pub fn trigger_on_ctrl_c(&self) -> JoinHandle<()> {
        let signal = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                result = tokio::signal::ctrl_c() => {
                    if result.is_ok() {
                        info!("ctrl-c received; shutting down");
                        signal.trigger();
                    }
                }
                _ = signal.wait() => {}
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn clones_observe_trigger() {
        let signal = ShutdownSignal::new();
        let observer = signal.clone();
        assert!(!observer.triggered());

        let waiter = tokio::spawn(async move { observer.wait().await });
        signal.trigger();
        waiter.await.unwrap();
        assert!(signal.triggered());
        assert!(!signal.sleep(Duration::from_secs(30)).await);
    }

    #[tokio::test]
    async fn sleep_completes_without_trigger() {
        let signal = ShutdownSignal::new();
        assert!(signal.sleep(Duration::from_millis(5)).await);
    }
}
