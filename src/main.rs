//! Relay Cache
//!
//! Standalone host for the caching core: loads settings, runs the monitor
//! loop and exposes health and Prometheus endpoints.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                          Relay Cache                             │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  ┌──────────────┐    ┌──────────────┐    ┌──────────────┐       │
//! │  │    Facade    │───▶│   Metrics    │───▶│   Monitor    │       │
//! │  │  (versioned) │    │              │    │  (/readyz)   │       │
//! │  └──────────────┘    └──────────────┘    └──────────────┘       │
//! │          ▲                  │                                    │
//! │  ┌──────────────┐    ┌──────────────┐                           │
//! │  │    Warmer    │    │  Exporter    │──▶ /metrics               │
//! │  └──────────────┘    └──────────────┘                           │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

use std::convert::Infallible;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use http_body_util::Full;
use hyper::body::{Bytes, Incoming};
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use relay_cache::adapters::{PrometheusExporter, UnavailableEnrichment};
use relay_cache::{CacheCore, PerformanceMonitor, Settings};

// =============================================================================
// CLI Arguments
// =============================================================================

/// Relay Cache - versioned TTL cache with warming and health monitoring
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// YAML settings file
    #[arg(long, env = "RELAY_CACHE_CONFIG")]
    config: Option<PathBuf>,

    /// Backing cache ("moka" or "memory"), overrides the settings file
    #[arg(long, env = "RELAY_CACHE_BACKEND")]
    backend: Option<String>,

    /// Application schema version, overrides the settings file
    #[arg(long, env = "RELAY_CACHE_APP_VERSION")]
    app_version: Option<String>,

    /// Metrics server bind address
    #[arg(long, env = "METRICS_ADDR", default_value = "0.0.0.0:8080")]
    metrics_addr: String,

    /// Health server bind address
    #[arg(long, env = "HEALTH_ADDR", default_value = "0.0.0.0:8081")]
    health_addr: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    init_logging(&args)?;

    let mut settings = Settings::load(args.config.as_deref()).context("loading settings")?;
    if let Some(backend) = &args.backend {
        settings.cache.backend = backend.clone();
    }
    if let Some(version) = &args.app_version {
        settings.version.app_version = version.clone();
    }

    info!("Starting Relay Cache");
    info!("  Backend: {}", settings.cache.backend);
    info!("  Max capacity: {}", settings.cache.max_capacity);
    info!("  App version: {}", settings.version.app_version);
    info!("  Monitor interval: {:?}", settings.monitor_interval());

    // The host application supplies enrichment; standalone there is none
    if settings.warmer.enabled {
        warn!("No enrichment service in standalone mode, cache warming disabled");
        settings.warmer.enabled = false;
    }

    let core = Arc::new(
        CacheCore::build(settings, Arc::new(UnavailableEnrichment))
            .context("building cache core")?,
    );
    let exporter = Arc::new(PrometheusExporter::new().context("creating metrics exporter")?);

    let shutdown = CancellationToken::new();
    let mut handles = core.start(shutdown.clone());

    let health_addr = args.health_addr.clone();
    let monitor = core.monitor.clone();
    let health_shutdown = shutdown.clone();
    handles.push(tokio::spawn(async move {
        if let Err(e) = run_health_server(&health_addr, monitor, health_shutdown).await {
            error!("Health server error: {:#}", e);
        }
    }));

    let metrics_addr = args.metrics_addr.clone();
    let metrics_core = core.clone();
    let metrics_shutdown = shutdown.clone();
    handles.push(tokio::spawn(async move {
        if let Err(e) = run_metrics_server(&metrics_addr, metrics_core, exporter, metrics_shutdown).await
        {
            error!("Metrics server error: {:#}", e);
        }
    }));

    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    info!("Shutdown requested");
    shutdown.cancel();

    for handle in handles {
        if let Err(e) = handle.await {
            warn!("Background task ended abnormally: {}", e);
        }
    }

    info!("Relay Cache shutdown complete");
    Ok(())
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) -> anyhow::Result<()> {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env()
        .add_directive(level.into())
        .add_directive("hyper=warn".parse()?)
        .add_directive("moka=warn".parse()?);

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }
    Ok(())
}

// =============================================================================
// HTTP Helpers
// =============================================================================

fn text_response(status: StatusCode, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(body.into()));
    *response.status_mut() = status;
    response
}

async fn bind(addr: &str, server: &str) -> anyhow::Result<TcpListener> {
    let addr: SocketAddr = addr
        .parse()
        .with_context(|| format!("invalid {} server address '{}'", server, addr))?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {} server on {}", server, addr))?;
    info!("{} server listening on {}", server, addr);
    Ok(listener)
}

// =============================================================================
// Health Server
// =============================================================================

fn health_response(path: &str, monitor: &PerformanceMonitor) -> Response<Full<Bytes>> {
    match path {
        "/healthz" | "/livez" => text_response(StatusCode::OK, "ok"),
        "/readyz" => {
            let status = monitor.status();
            let code = if status.is_operational() {
                StatusCode::OK
            } else {
                StatusCode::SERVICE_UNAVAILABLE
            };
            text_response(code, status.to_string())
        }
        _ => text_response(StatusCode::NOT_FOUND, "not found"),
    }
}

async fn run_health_server(
    addr: &str,
    monitor: Arc<PerformanceMonitor>,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let listener = bind(addr, "Health").await?;

    loop {
        let (stream, _) = tokio::select! {
            _ = shutdown.cancelled() => return Ok(()),
            accepted = listener.accept() => accepted.context("health server accept")?,
        };

        let io = TokioIo::new(stream);
        let monitor = monitor.clone();

        tokio::spawn(async move {
            let service = service_fn(move |req: Request<Incoming>| {
                let response = health_response(req.uri().path(), &monitor);
                async move { Ok::<_, Infallible>(response) }
            });
            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                error!("Health server connection error: {}", e);
            }
        });
    }
}

// =============================================================================
// Metrics Server
// =============================================================================

fn metrics_response(
    path: &str,
    core: &CacheCore,
    exporter: &PrometheusExporter,
) -> Response<Full<Bytes>> {
    if path != "/metrics" {
        return text_response(StatusCode::NOT_FOUND, "not found");
    }

    core.update_exporter(exporter);
    match exporter.encode() {
        Ok(body) => {
            let mut response = text_response(StatusCode::OK, body);
            if let Ok(value) = HeaderValue::from_str(&exporter.content_type()) {
                response.headers_mut().insert(CONTENT_TYPE, value);
            }
            response
        }
        Err(e) => {
            error!("Failed to encode metrics: {}", e);
            text_response(StatusCode::INTERNAL_SERVER_ERROR, "metrics unavailable")
        }
    }
}

async fn run_metrics_server(
    addr: &str,
    core: Arc<CacheCore>,
    exporter: Arc<PrometheusExporter>,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let listener = bind(addr, "Metrics").await?;

    loop {
        let (stream, _) = tokio::select! {
            _ = shutdown.cancelled() => return Ok(()),
            accepted = listener.accept() => accepted.context("metrics server accept")?,
        };

        let io = TokioIo::new(stream);
        let core = core.clone();
        let exporter = exporter.clone();

        tokio::spawn(async move {
            let service = service_fn(move |req: Request<Incoming>| {
                let response = metrics_response(req.uri().path(), &core, &exporter);
                async move { Ok::<_, Infallible>(response) }
            });
            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                error!("Metrics server connection error: {}", e);
            }
        });
    }
}
