//! # Observability
//!
//! Centralized logging and trace export for the outbox workspace.
//!
//! Services call [`init_with_config`] once at startup and then use the
//! standard `tracing` macros. Where the output goes is decided here:
//!
//! - a compact human-readable stream on stderr
//! - an optional append-only JSONL file (`tail -f <file> | jq`)
//! - optional OTLP span export, so dispatch spans join the producer's trace
//!
//! It also installs the W3C Trace Context propagator as the global text-map
//! propagator.
//!
//! ```rust,ignore
//! let _guard = observability::init_with_config(observability::LogConfig {
//!     service_name: "outbox-dispatcher".into(),
//!     default_level: "debug".into(),
//!     also_stderr: true,
//!     ..Default::default()
//! })?;
//! ```

mod file;
mod json_layer;
mod otlp;

pub use file::{default_log_path, LogFileWriter};
pub use json_layer::{JsonLayer, LogEntry};

use opentelemetry::global;
use opentelemetry::trace::TracerProvider as _;
use opentelemetry_sdk::propagation::TraceContextPropagator;
use opentelemetry_sdk::trace::SdkTracerProvider;
use std::io;
use std::path::PathBuf;
use thiserror::Error;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};
use tracing_subscriber::EnvFilter;

/// Configuration for the logging system.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Name of the service. Included in every JSONL line and in exported spans.
    pub service_name: String,

    /// Default log level filter (e.g., "debug", "info", "warn").
    /// Can be overridden by `RUST_LOG` environment variable.
    pub default_level: String,

    /// Write JSONL logs to a file.
    pub file_logging: bool,

    /// Custom log file path. Defaults to [`default_log_path`].
    pub log_path: Option<PathBuf>,

    /// Also emit logs to stderr.
    pub also_stderr: bool,

    /// OTLP/HTTP collector base URL, e.g. `http://localhost:4318`.
    pub otlp_endpoint: Option<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            service_name: "unknown".into(),
            default_level: "info".into(),
            file_logging: false,
            log_path: None,
            also_stderr: true,
            otlp_endpoint: None,
        }
    }
}

impl LogConfig {
    /// File the JSONL layer writes to, if file logging is on.
    pub fn resolved_log_path(&self) -> Option<PathBuf> {
        match (&self.log_path, self.file_logging) {
            (Some(path), _) => Some(path.clone()),
            (None, true) => Some(default_log_path(&self.service_name)),
            (None, false) => None,
        }
    }
}

/// Errors raised while installing the subscriber.
#[derive(Debug, Error)]
pub enum ObservabilityError {
    #[error("failed to open log file: {0}")]
    Io(#[from] io::Error),

    #[error("failed to build OTLP exporter: {0}")]
    Otlp(String),

    #[error("global subscriber already installed: {0}")]
    Init(#[from] TryInitError),
}

/// Flushes exported spans when dropped. Keep it alive for the whole program.
#[must_use = "dropping the guard shuts down span export"]
pub struct ObservabilityGuard {
    tracer_provider: Option<SdkTracerProvider>,
}

impl Drop for ObservabilityGuard {
    fn drop(&mut self) {
        if let Some(provider) = self.tracer_provider.take() {
            if let Err(e) = provider.shutdown() {
                eprintln!("failed to flush spans: {e:?}");
            }
        }
    }
}

/// Initialize with default settings.
pub fn init(service_name: &str) -> Result<ObservabilityGuard, ObservabilityError> {
    init_with_config(LogConfig {
        service_name: service_name.into(),
        ..Default::default()
    })
}

/// Initialize the observability layer with custom configuration.
pub fn init_with_config(config: LogConfig) -> Result<ObservabilityGuard, ObservabilityError> {
    global::set_text_map_propagator(TraceContextPropagator::new());

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.default_level));

    let stderr_layer = config.also_stderr.then(|| {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .compact()
            .with_writer(io::stderr)
    });

    let log_path = config.resolved_log_path();
    let json_layer = match &log_path {
        Some(path) => Some(JsonLayer::new(
            config.service_name.clone(),
            LogFileWriter::open(path)?,
        )),
        None => None,
    };

    let tracer_provider = match &config.otlp_endpoint {
        Some(endpoint) => Some(otlp::tracer_provider(&config.service_name, endpoint)?),
        None => None,
    };
    let otel_layer = tracer_provider.as_ref().map(|provider| {
        tracing_opentelemetry::layer().with_tracer(provider.tracer(config.service_name.clone()))
    });

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stderr_layer)
        .with(json_layer)
        .with(otel_layer)
        .try_init()?;

    tracing::info!(
        service = %config.service_name,
        log_path = ?log_path,
        otlp_endpoint = ?config.otlp_endpoint,
        "observability initialized"
    );

    Ok(ObservabilityGuard { tracer_provider })
}

/// Re-export tracing macros for convenience.
pub use tracing::{debug, error, info, instrument, trace, warn};
