use std::convert::Infallible;
use std::fs::{self, OpenOptions};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::OnceLock;

use anyhow::{Context, Result};
use goldmine_ingest::ShutdownSignal;
use hyper::body::Body;
use hyper::service::{make_service_fn, service_fn};
use hyper::{Request, Response, StatusCode};
use prometheus::{Encoder, Registry, TextEncoder};
use tracing::{error, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

static FILE_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Install the global tracing subscriber with optional JSON file logging.
pub fn init_tracing(filter: &str, log_path: Option<&Path>) -> Result<()> {
    let stdout_layer = fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::new(filter));
    let Some(path) = log_path else {
        tracing_subscriber::registry()
            .with(stdout_layer)
            .try_init()?;
        return Ok(());
    };

    if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
        fs::create_dir_all(dir)
            .with_context(|| format!("failed to create log directory {}", dir.display()))?;
    }
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("failed to open log file {}", path.display()))?;
    let (writer, guard) = tracing_appender::non_blocking(file);
    let _ = FILE_GUARD.set(guard);
    let file_layer = fmt::layer()
        .json()
        .with_ansi(false)
        .with_target(true)
        .with_writer(writer)
        .with_filter(EnvFilter::new(filter));
    tracing_subscriber::registry()
        .with(stdout_layer)
        .with(file_layer)
        .try_init()?;
    Ok(())
}

fn render_metrics(registry: &Registry) -> Response<Body> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(err) = encoder.encode(&registry.gather(), &mut buffer) {
        error!(error = %err, "failed to encode Prometheus metrics");
        let mut response = Response::new(Body::from("failed to encode metrics"));
        *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
        return response;
    }
    let mut response = Response::new(Body::from(buffer));
    if let Ok(content_type) = encoder.format_type().parse() {
        response
            .headers_mut()
            .insert(hyper::header::CONTENT_TYPE, content_type);
    }
    response
}

/// Serve Prometheus metrics over HTTP until `shutdown` fires.
pub fn spawn_metrics_server(
    registry: Registry,
    addr: SocketAddr,
    shutdown: ShutdownSignal,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let make_svc = make_service_fn(move |_| {
            let registry = registry.clone();
            async move {
                Ok::<_, Infallible>(service_fn(move |_req: Request<Body>| {
                    let response = render_metrics(&registry);
                    async move { Ok::<_, Infallible>(response) }
                }))
            }
        });

        let server = match hyper::Server::try_bind(&addr) {
            Ok(builder) => builder.serve(make_svc),
            Err(err) => {
                error!(error = %err, %addr, "failed to bind metrics server");
                return;
            }
        };
        info!(%addr, "metrics server listening");
        let graceful = server.with_graceful_shutdown(async move { shutdown.wait().await });
        if let Err(err) = graceful.await {
            error!(error = %err, %addr, "metrics server terminated");
        } else {
            info!(%addr, "metrics server shutdown");
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use goldmine_ingest::IngestMetrics;

    #[test]
    fn rendered_metrics_use_text_exposition() {
        let metrics = IngestMetrics::new().unwrap();
        metrics.inc_persisted();
        let response = render_metrics(&metrics.registry());
        assert_eq!(response.status(), StatusCode::OK);
        let content_type = response.headers()[hyper::header::CONTENT_TYPE]
            .to_str()
            .unwrap()
            .to_string();
        assert!(content_type.starts_with("text/plain"));
    }
}
