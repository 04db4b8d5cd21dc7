//! HTTP side of the exporter: configuration loading, the background
//! collection loop and the axum server exposing the accumulated metrics.

use crate::{
    cancel::{Cancellation, Canceller},
    cli::telemetry::shutdown_tracer,
    client::BitbucketClient,
    collectors::{config::CollectorConfig, registry::CollectorRegistry},
    config::ExporterConfig,
};
use anyhow::{Context, Result, anyhow};
use axum::{
    Extension, Router,
    body::Body,
    http::{HeaderName, HeaderValue, Request},
    middleware::{Next, from_fn},
    response::Response,
    routing::get,
};
use opentelemetry::global;
use opentelemetry::trace::{TraceContextExt, TraceId};
use opentelemetry_http::HeaderExtractor;
use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};
use tokio::{net::TcpListener, task::JoinHandle, time::timeout};
use tower::ServiceBuilder;
use tower_http::{
    request_id::PropagateRequestIdLayer, set_header::SetRequestHeaderLayer, trace::TraceLayer,
};
use tracing::{Span, error, info, info_span, warn};
use tracing_futures::Instrument as _;
use tracing_opentelemetry::OpenTelemetrySpanExt;
use ulid::Ulid;

mod handlers;
mod shutdown;

pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = if let Some(hash) = built_info::GIT_COMMIT_HASH {
    hash
} else {
    ":-("
};

/// How long the collection loop gets to wind down after the server stopped.
const COLLECTION_SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Everything `new` needs to run the exporter.
#[derive(Clone, Debug)]
pub struct Options {
    pub port: u16,
    pub listen: Option<String>,
    pub config_file: PathBuf,
    pub telemetry_path: String,
    pub api_url: String,
    pub interval: Duration,
    pub prom_file: Option<PathBuf>,
    pub collectors: Vec<String>,
}

/// Where the metrics endpoint reads from.
#[derive(Clone)]
pub enum MetricsSource {
    /// Families accumulated by the collectors.
    Collectors {
        collectors: CollectorRegistry,
        registry: prometheus::Registry,
    },
    /// A pre-rendered exposition file served verbatim.
    File(Arc<Path>),
}

/// Shared state of the HTTP handlers.
#[derive(Clone)]
pub struct AppState {
    pub source: MetricsSource,
    pub telemetry_path: Arc<str>,
}

impl AppState {
    /// Collection cycles started so far.
    pub fn cycles(&self) -> u64 {
        match &self.source {
            MetricsSource::Collectors { collectors, .. } => collectors.cycles(),
            MetricsSource::File(_) => 0,
        }
    }
}

/// Load the configuration, start the collection loop and serve until a
/// shutdown signal arrives.
///
/// # Errors
///
/// Returns an error if the collectors cannot be set up or the listener cannot be bound
pub async fn new(options: Options) -> Result<()> {
    let (canceller, cancellation) = Canceller::new();

    let (source, collection) = match &options.prom_file {
        Some(path) => {
            info!(file = %path.display(), "serving metrics from file, collection disabled");
            (MetricsSource::File(Arc::from(path.as_path())), None)
        }
        None => {
            let (collectors, registry) = build_collectors(&options)?;
            let collection = spawn_collection(collectors.clone(), options.interval, cancellation);
            (MetricsSource::Collectors { collectors, registry }, Some(collection))
        }
    };

    let state = AppState {
        source,
        telemetry_path: Arc::from(options.telemetry_path.as_str()),
    };

    let (listener, bind_addr) = bind(options.port, options.listen.as_deref()).await?;

    println!(
        "{} {} - Listening on {bind_addr}{}\n\nEnabled collectors:\n{}",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION"),
        options.telemetry_path,
        format_list(&options.collectors),
    );

    if let Err(e) = axum::serve(listener, router(state).into_make_service())
        .with_graceful_shutdown(async move {
            shutdown::shutdown_signal().await;
            info!("shutdown signal received, stopping collection");
            canceller.cancel();
        })
        .await
    {
        error!(error=%e, "server error");
    }

    if let Some(collection) = collection {
        match timeout(COLLECTION_SHUTDOWN_GRACE, collection).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "collection task did not finish cleanly"),
            Err(_) => warn!(
                "collection still running after {}s, exiting anyway",
                COLLECTION_SHUTDOWN_GRACE.as_secs()
            ),
        }
    }

    info!("shutting down");

    shutdown_tracer();

    Ok(())
}

fn build_collectors(options: &Options) -> Result<(CollectorRegistry, prometheus::Registry)> {
    let config = match ExporterConfig::load(&options.config_file) {
        Ok(config) => config,
        Err(e) => {
            warn!(error = %format!("{e:#}"), "unable to load configuration, continuing with an empty one");
            ExporterConfig::default()
        }
    };

    let client = BitbucketClient::new(&options.api_url, &config.auth)
        .with_context(|| format!("Failed to create API client for {}", options.api_url))?;

    let collectors = CollectorRegistry::new(
        &client,
        &config,
        &CollectorConfig::new().with_enabled(&options.collectors),
    )?;

    if collectors.is_empty() {
        warn!("no collector will run, only scrape metadata is exposed");
    } else {
        info!(collectors = ?collectors.collector_names(), "collectors ready");
    }

    let registry = prometheus::Registry::new();
    collectors
        .register_metrics(&registry)
        .context("Failed to register metrics")?;

    Ok((collectors, registry))
}

fn spawn_collection(collectors: CollectorRegistry, interval: Duration, cancellation: Cancellation) -> JoinHandle<()> {
    let span = info_span!("collection", interval_seconds = interval.as_secs());
    tokio::spawn(async move { collectors.run(interval, cancellation).await }.instrument(span))
}

/// Routes and middleware of the exporter.
pub fn router(state: AppState) -> Router {
    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(make_span)
        .on_response(on_response);

    let mut app = Router::new()
        .route(&state.telemetry_path, get(handlers::metrics))
        .route("/health", get(handlers::health).options(handlers::health));

    if &*state.telemetry_path != "/" {
        app = app.route("/", get(handlers::landing));
    }

    app.layer(
        ServiceBuilder::new()
            .layer(SetRequestHeaderLayer::if_not_present(
                HeaderName::from_static("x-request-id"),
                |_req: &_| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
            ))
            .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                "x-request-id",
            )))
            .layer(trace_layer)
            .layer(from_fn(add_trace_headers))
            .layer(Extension(state)),
    )
}

/// Bind `listen:port`, or `[::]:port` falling back to `0.0.0.0:port`.
async fn bind(port: u16, listen: Option<&str>) -> Result<(TcpListener, String)> {
    if let Some(addr) = listen {
        let ip = addr.parse::<std::net::IpAddr>().map_err(|_| {
            anyhow!(
                "Invalid IP address: '{addr}'. Expected IPv4 (e.g., 0.0.0.0, 127.0.0.1) or IPv6 (e.g., ::, ::1)"
            )
        })?;

        let bind_addr = std::net::SocketAddr::new(ip, port);
        let listener = TcpListener::bind(bind_addr)
            .await
            .with_context(|| format!("Failed to bind to {bind_addr}"))?;

        return Ok((listener, bind_addr.to_string()));
    }

    // Auto: try IPv6 first, fallback to IPv4
    match TcpListener::bind(format!("[::]:{port}")).await {
        Ok(listener) => Ok((listener, format!("[::]:{port}"))),
        Err(_) => {
            let listener = TcpListener::bind(format!("0.0.0.0:{port}"))
                .await
                .with_context(|| format!("Failed to bind to 0.0.0.0:{port}"))?;
            Ok((listener, format!("0.0.0.0:{port}")))
        }
    }
}

// Helper to format a list of items with a leading dash and indentation for the
// start up message
fn format_list<T: std::fmt::Display>(items: &[T]) -> String {
    items
        .iter()
        .map(|i| format!("  - {i}"))
        .collect::<Vec<_>>()
        .join("\n")
}

fn make_span(request: &Request<Body>) -> Span {
    let parent_cx =
        global::get_text_map_propagator(|prop| prop.extract(&HeaderExtractor(request.headers())));

    let header = |name: &str, default: &'static str| {
        request
            .headers()
            .get(name)
            .and_then(|v| v.to_str().ok())
            .unwrap_or(default)
            .to_string()
    };

    let span = info_span!(
        "http.server.request",
        otel.kind = "server",
        otel.status_code = tracing::field::Empty,
        http.method = request.method().as_str(),
        http.route = request.uri().path(),
        http.target = %request.uri(),
        http.user_agent = header("user-agent", "unknown"),
        request_id = header("x-request-id", "none"),
    );

    let _ = span.set_parent(parent_cx);

    span
}

fn on_response<B>(response: &axum::http::Response<B>, latency: Duration, span: &Span) {
    span.record(
        "otel.status_code",
        if response.status().is_server_error() { "ERROR" } else { "OK" },
    );

    let elapsed_ms = u64::try_from(latency.as_millis()).unwrap_or(u64::MAX);
    let trace_id = span.context().span().span_context().trace_id();

    if trace_id == TraceId::INVALID {
        info!(parent: span, status = response.status().as_u16(), elapsed_ms, "request completed");
    } else {
        info!(
            parent: span,
            status = response.status().as_u16(),
            elapsed_ms,
            trace_id = %trace_id,
            "request completed"
        );
    }
}

async fn add_trace_headers(req: Request<Body>, next: Next) -> Response {
    let mut res = next.run(req).await;

    let cx = Span::current().context();

    // Clone the SpanContext to avoid borrowing a temporary
    let span_context = cx.span().span_context().clone();

    if span_context.is_valid()
        && let Ok(val) = HeaderValue::from_str(&span_context.trace_id().to_string())
    {
        res.headers_mut()
            .insert(HeaderName::from_static("x-trace-id"), val);
    }

    res
}
