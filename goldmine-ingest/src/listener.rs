use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result};
use bytes::BytesMut;
use futures::StreamExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_util::codec::{FramedRead, LengthDelimitedCodec};
use tracing::{debug, info, trace, warn};

use crate::metrics::IngestMetrics;
use crate::queue::FillSender;
use crate::shutdown::ShutdownSignal;
use crate::wire::decode_fill;

/// Per-connection read settings.
#[derive(Clone, Debug)]
pub struct ListenerConfig {
    /// Idle period after which a pending read is restarted.
    pub read_timeout: Duration,
    /// Largest accepted frame payload; bigger frames end the connection.
    pub max_frame_bytes: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            read_timeout: Duration::from_millis(500),
            max_frame_bytes: 64 * 1024,
        }
    }
}

/// Accepts peers on one endpoint and hands decoded fills to the queue.
pub struct FillListener {
    listener: TcpListener,
    config: ListenerConfig,
    queue: FillSender,
    shutdown: ShutdownSignal,
    metrics: IngestMetrics,
}

impl FillListener {
    pub async fn bind(
        endpoint: &str,
        config: ListenerConfig,
        queue: FillSender,
        shutdown: ShutdownSignal,
        metrics: IngestMetrics,
    ) -> Result<Self> {
        let listener = TcpListener::bind(endpoint)
            .await
            .with_context(|| format!("failed to bind fill listener on {endpoint}"))?;
        Ok(Self {
            listener,
            config,
            queue,
            shutdown,
            metrics,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until shutdown, one handler task per peer.
    pub async fn run(self) -> Result<()> {
        info!(addr = %self.local_addr()?, "fill listener started");
        loop {
            tokio::select! {
                _ = self.shutdown.wait() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let handler = ConnectionHandler {
                            peer,
                            config: self.config.clone(),
                            queue: self.queue.clone(),
                            shutdown: self.shutdown.clone(),
                            metrics: self.metrics.clone(),
                        };
                        tokio::spawn(handler.run(stream));
                    }
                    Err(err) => {
                        warn!(error = %err, "failed to accept fill connection");
                        if !self.shutdown.sleep(Duration::from_millis(100)).await {
                            break;
                        }
                    }
                },
            }
        }
        info!("fill listener stopped");
        Ok(())
    }
}

struct ConnectionHandler {
    peer: SocketAddr,
    config: ListenerConfig,
    queue: FillSender,
    shutdown: ShutdownSignal,
    metrics: IngestMetrics,
}

impl ConnectionHandler {
    async fn run(self, stream: TcpStream) {
        let codec = LengthDelimitedCodec::builder()
            .max_frame_length(self.config.max_frame_bytes)
            .new_codec();
        let mut frames = FramedRead::new(stream, codec);
        let peer = self.peer;
        self.metrics.connection_opened();
        debug!(%peer, "fill connection opened");

        loop {
            let next = tokio::select! {
                _ = self.shutdown.wait() => break,
                next = timeout(self.config.read_timeout, frames.next()) => next,
            };
            let frame = match next {
                // Idle peer; keep waiting.
                Err(_) => continue,
                Ok(None) => {
                    debug!(%peer, "peer closed fill connection");
                    break;
                }
                Ok(Some(Err(err))) => {
                    warn!(%peer, error = %err, "closing fill connection after transport error");
                    break;
                }
                Ok(Some(Ok(frame))) => frame,
            };
            if !self.dispatch(frame).await {
                break;
            }
        }

        self.metrics.connection_closed();
    }

    /// Decode and enqueue one frame. Returns `false` when the handler should stop.
    async fn dispatch(&self, frame: BytesMut) -> bool {
        let peer = self.peer;
        self.metrics.inc_received();
        trace!(%peer, payload = %String::from_utf8_lossy(&frame), "incoming frame");
        let fill = match decode_fill(&frame) {
            Ok(fill) => fill,
            Err(err) => {
                self.metrics.inc_decode_error();
                warn!(%peer, error = %err, "dropping undecodable message");
                return true;
            }
        };
        debug!(
            %peer,
            account = %fill.account,
            security = %fill.security,
            quantity = fill.quantity,
            "decoded fill"
        );
        tokio::select! {
            _ = self.shutdown.wait() => false,
            result = self.queue.submit(fill) => match result {
                Ok(()) => {
                    self.metrics.inc_enqueued();
                    true
                }
                Err(err) => {
                    warn!(%peer, error = %err, "fill dropped");
                    false
                }
            },
        }
    }
}
