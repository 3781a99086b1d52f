//! Outbox dispatcher binary entry point.
//!
//! Usage: outbox-dispatcher [OPTIONS] [run|once|status|record]
//!
//! `run` (the default) polls until Ctrl-C. `once` runs a single cycle and
//! prints its report. `status` prints per-status entry counts. `record`
//! inserts a pending entry, which is handy for trying a broker setup.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand, ValueEnum};
use outbox_database::{AsyncDatabase, Database, NewOutboxEntry};
use outbox_dispatcher::{
    DispatchMetrics, Dispatcher, DispatcherConfig, HttpPublisher, HttpPublisherConfig,
    LogPublisher, Publisher, RedisStreamPublisher, Scheduler, SqliteEntryStore,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

/// Outbox dispatcher: publishes recorded domain events to a broker.
#[derive(Parser, Debug)]
#[command(name = "outbox-dispatcher")]
#[command(about = "Polls the transactional outbox and publishes pending entries")]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Path to the SQLite database holding the outbox table.
    #[arg(long, global = true, env = "OUTBOX_DATABASE_PATH", default_value = "outbox.db")]
    database: PathBuf,

    /// Broker to publish to.
    #[arg(long, global = true, value_enum, env = "OUTBOX_BROKER", default_value = "redis")]
    broker: Broker,

    /// Redis connection URL.
    #[arg(long, global = true, env = "REDIS_URL", default_value = "redis://127.0.0.1:6379")]
    redis_url: String,

    /// Base URL for the HTTP broker.
    #[arg(long, global = true, env = "OUTBOX_HTTP_BASE_URL")]
    http_base_url: Option<String>,

    /// Bearer token for the HTTP broker.
    #[arg(long, global = true, env = "OUTBOX_HTTP_TOKEN", hide_env_values = true)]
    http_token: Option<String>,

    /// Failed attempts tolerated before an entry is marked FAILED.
    #[arg(long, global = true)]
    retry_limit: Option<u32>,

    /// Delay between dispatch cycles in milliseconds.
    #[arg(long, global = true)]
    poll_interval_ms: Option<u64>,

    /// Broker destination (stream, queue or path segment).
    #[arg(long, global = true)]
    destination: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Also write JSONL logs, optionally to a specific file.
    #[arg(long, global = true, num_args = 0..=1)]
    log_file: Option<Option<PathBuf>>,

    /// OTLP/HTTP collector for span export.
    #[arg(long, global = true, env = "OTEL_EXPORTER_OTLP_ENDPOINT")]
    otlp_endpoint: Option<String>,
}

#[derive(Subcommand, Debug, Clone)]
enum Command {
    /// Poll and publish until interrupted.
    Run,
    /// Run a single dispatch cycle and print the report.
    Once,
    /// Print entry counts per status.
    Status,
    /// Record a pending entry.
    Record {
        #[arg(long)]
        action: String,
        #[arg(long)]
        payload: String,
        #[arg(long)]
        traceparent: Option<String>,
    },
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
enum Broker {
    Redis,
    Http,
    /// Log envelopes instead of publishing them.
    Log,
}

impl Args {
    fn dispatcher_config(&self) -> anyhow::Result<DispatcherConfig> {
        let mut config = DispatcherConfig::from_env();
        if let Some(retry_limit) = self.retry_limit {
            config.retry_limit = retry_limit;
        }
        if let Some(ms) = self.poll_interval_ms {
            config.poll_interval = Duration::from_millis(ms);
        }
        if let Some(destination) = &self.destination {
            config.destination = destination.clone();
        }
        config.validate()?;
        Ok(config)
    }

    async fn publisher(&self, config: &DispatcherConfig) -> anyhow::Result<Arc<dyn Publisher>> {
        let publisher: Arc<dyn Publisher> = match self.broker {
            Broker::Redis => Arc::new(
                RedisStreamPublisher::connect(&self.redis_url)
                    .await
                    .with_context(|| format!("connecting to {}", self.redis_url))?,
            ),
            Broker::Http => {
                let Some(base_url) = &self.http_base_url else {
                    bail!("--http-base-url is required with --broker http");
                };
                let mut http = HttpPublisherConfig::new(base_url.clone());
                http.auth_token = self.http_token.clone();
                http.timeout = config.publish_timeout;
                Arc::new(HttpPublisher::new(http)?)
            }
            Broker::Log => Arc::new(LogPublisher),
        };
        Ok(publisher)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let _observability = observability::init_with_config(observability::LogConfig {
        service_name: "outbox-dispatcher".into(),
        default_level: args.log_level.clone(),
        file_logging: args.log_file.is_some(),
        log_path: args.log_file.clone().flatten(),
        also_stderr: true,
        otlp_endpoint: args.otlp_endpoint.clone(),
    })?;

    match args.command.clone().unwrap_or(Command::Run) {
        Command::Record {
            action,
            payload,
            traceparent,
        } => record(&args, action, payload, traceparent),
        Command::Status => status(&args),
        Command::Once => once(&args).await,
        Command::Run => run(&args).await,
    }
}

fn record(
    args: &Args,
    action: String,
    payload: String,
    traceparent: Option<String>,
) -> anyhow::Result<()> {
    let db = Database::open(&args.database)
        .with_context(|| format!("opening {}", args.database.display()))?;

    let mut new = NewOutboxEntry::new(action, payload);
    if let Some(traceparent) = traceparent {
        new = new.with_traceparent(traceparent);
    }
    let entry = db.record_entry(&new)?;

    println!("{}", entry.id);
    Ok(())
}

fn status(args: &Args) -> anyhow::Result<()> {
    let db = Database::open(&args.database)
        .with_context(|| format!("opening {}", args.database.display()))?;
    let counts = db.count_by_status()?;
    println!("{}", serde_json::to_string_pretty(&counts)?);
    Ok(())
}

async fn build_dispatcher(
    args: &Args,
    metrics: Arc<DispatchMetrics>,
) -> anyhow::Result<Dispatcher> {
    let config = args.dispatcher_config()?;

    info!(
        database = %args.database.display(),
        broker = ?args.broker,
        destination = %config.destination,
        retry_limit = config.retry_limit,
        poll_interval_ms = config.poll_interval.as_millis() as u64,
        "Configuration loaded"
    );

    let db = AsyncDatabase::open(&args.database)
        .await
        .with_context(|| format!("opening {}", args.database.display()))?;
    let store = SqliteEntryStore::connect(db, &config)
        .await
        .with_context(|| format!("checking {}", args.database.display()))?;
    let publisher = args.publisher(&config).await?;

    Ok(Dispatcher::new(config, Arc::new(store), publisher).with_metrics(metrics))
}

async fn once(args: &Args) -> anyhow::Result<()> {
    let metrics = Arc::new(DispatchMetrics::new());
    let dispatcher = build_dispatcher(args, metrics).await?;

    let report = dispatcher.run_cycle().await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn run(args: &Args) -> anyhow::Result<()> {
    let metrics = Arc::new(DispatchMetrics::new());
    let dispatcher = Arc::new(build_dispatcher(args, metrics.clone()).await?);

    info!("Outbox dispatcher starting...");

    let cycles = Scheduler::new(dispatcher)
        .run(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "Failed to listen for shutdown signal");
            }
        })
        .await;

    let totals = metrics.snapshot();
    info!(
        cycles,
        processed = totals.processed,
        failed = totals.failed,
        "Outbox dispatcher stopped"
    );
    Ok(())
}
