#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used, clippy::panic))]
// crates/alertpipe-cli/src/main.rs
// ============================================================================
// Module: Alert Pipeline CLI Entry Point
// Description: Command dispatcher for the four pipeline stages plus schema
//              migration.
// Purpose: Give every stage a process entry point (§10, "Supplemental
//          feature: CLI"): read configuration, construct the KV/log-bus/
//          store clients, bind the metrics endpoint, and drive the chosen
//          stage's service loop until shutdown.
// Dependencies: alertpipe-channels, alertpipe-config, alertpipe-core,
//               alertpipe-dedup, alertpipe-dispatch, alertpipe-kv,
//               alertpipe-logbus, alertpipe-matcher, alertpipe-metrics,
//               alertpipe-snapshot, alertpipe-store, axum, clap, reqwest,
//               thiserror, tokio
// ============================================================================

//! ## Overview
//! Every subcommand shares the same shape: load [`PipelineConfig`], connect
//! a [`alertpipe_store::PostgresStore`] against `connections.database_url`,
//! spin up a counter registry and audit sink, bind the `/metrics` endpoint,
//! then construct and run the requested stage.
//!
//! The log bus and KV store traits are built so a real deployment can swap
//! in a networked broker/KV behind them; no such backend is vendored here
//! (§10 scopes a production broker/KV implementation out), so every
//! subcommand constructs its own process-local
//! [`alertpipe_logbus::InMemoryLogBus`] and [`alertpipe_kv::InMemoryKv`].
//! That makes a single `alertpipe` process a complete, runnable stage
//! against a real Postgres database; coordinating multiple stage processes
//! over a shared bus and KV store is a production deployment's job, and
//! only requires implementing [`alertpipe_logbus::LogProducer`]/
//! [`alertpipe_logbus::LogConsumer`] and [`alertpipe_kv::KvStore`] against
//! that backend.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use alertpipe_channels::ChatWebhookSender;
use alertpipe_channels::EmailSender;
use alertpipe_channels::HttpEmailProvider;
use alertpipe_channels::HttpEmailProviderConfig;
use alertpipe_channels::HttpWebhookSender;
use alertpipe_channels::SenderRegistry;
use alertpipe_channels::TokenBucket;
use alertpipe_config::ConfigError;
use alertpipe_config::LogLevel;
use alertpipe_config::PipelineConfig;
use alertpipe_core::ChannelKind;
use alertpipe_dedup::Deduplicator;
use alertpipe_dispatch::Dispatcher;
use alertpipe_kv::CounterStore;
use alertpipe_kv::InMemoryKv;
use alertpipe_kv::KvStore;
use alertpipe_logbus::InMemoryLogBus;
use alertpipe_logbus::LogProducer;
use alertpipe_logbus::Topic;
use alertpipe_matcher::Matcher;
use alertpipe_matcher::refresh::spawn_refresh_task;
use alertpipe_metrics::AuditSink;
use alertpipe_metrics::CounterRegistry;
use alertpipe_metrics::EventSeverity;
use alertpipe_metrics::StderrAuditSink;
use alertpipe_metrics::metrics_router;
use alertpipe_metrics::spawn_flush_task;
use alertpipe_snapshot::SnapshotBuilder;
use alertpipe_snapshot::VERSION_KV_KEY;
use alertpipe_store::EndpointStore;
use alertpipe_store::NotificationStore;
use alertpipe_store::PostgresStore;
use alertpipe_store::RuleStore;
use alertpipe_store::StoreError;
use clap::ArgAction;
use clap::Args;
use clap::Parser;
use clap::Subcommand;
use thiserror::Error;

// ============================================================================
// SECTION: CLI Types
// ============================================================================

/// Top-level CLI definition.
#[derive(Parser, Debug)]
#[command(name = "alertpipe", disable_help_subcommand = true, disable_version_flag = true, arg_required_else_help = true)]
struct Cli {
    /// Print version information and exit.
    #[arg(long = "version", action = ArgAction::SetTrue, global = true)]
    show_version: bool,
    /// Selected subcommand to execute.
    #[command(subcommand)]
    command: Option<Commands>,
}

/// Supported CLI subcommands, one per pipeline stage plus schema migration.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the Snapshot Builder service loop.
    SnapshotBuilder(StageArgs),
    /// Run the Matcher service loop.
    Matcher(StageArgs),
    /// Run the Deduplicator service loop.
    Deduplicator(StageArgs),
    /// Run the Dispatcher service loop.
    Dispatcher(StageArgs),
    /// Apply the relational schema migrations and exit.
    Migrate(StageArgs),
}

/// Arguments shared by every stage subcommand.
#[derive(Args, Debug)]
struct StageArgs {
    /// Optional config file path (defaults to `alertpipe.toml` or the
    /// `ALERTPIPE_CONFIG` env override).
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// CLI error wrapper.
#[derive(Debug, Error)]
enum CliError {
    /// Configuration failed to load or validate.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// The relational store failed to connect, migrate, or query.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// A stage's service loop returned an error.
    #[error("{0}")]
    Stage(String),
}

type CliResult<T> = Result<T, CliError>;

// ============================================================================
// SECTION: Entry Point
// ============================================================================

/// CLI entry point returning an exit code.
#[tokio::main(flavor = "multi_thread")]
async fn main() -> ExitCode {
    match run().await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("alertpipe: {err}");
            ExitCode::FAILURE
        }
    }
}

/// Executes the CLI command dispatcher.
async fn run() -> CliResult<ExitCode> {
    let cli = Cli::parse();

    if cli.show_version {
        println!("alertpipe {}", env!("CARGO_PKG_VERSION"));
        return Ok(ExitCode::SUCCESS);
    }

    let Some(command) = cli.command else {
        return Ok(ExitCode::SUCCESS);
    };

    match command {
        Commands::SnapshotBuilder(args) => command_snapshot_builder(args).await,
        Commands::Matcher(args) => command_matcher(args).await,
        Commands::Deduplicator(args) => command_deduplicator(args).await,
        Commands::Dispatcher(args) => command_dispatcher(args).await,
        Commands::Migrate(args) => command_migrate(args).await,
    }
}

// ============================================================================
// SECTION: Shared Wiring
// ============================================================================

/// Everything every stage subcommand needs before constructing its service.
struct StageContext {
    config: PipelineConfig,
    store: Arc<PostgresStore>,
    kv: Arc<InMemoryKv>,
    audit: Arc<dyn AuditSink>,
    counters: Arc<CounterRegistry>,
}

async fn stage_context(args: &StageArgs) -> CliResult<StageContext> {
    let config = PipelineConfig::load(args.config.as_deref())?;
    let store = PostgresStore::connect(&config.connections.database_url, config.connections.database_max_connections).await?;
    let audit = StderrAuditSink::new(event_severity(config.metrics.log_level));
    Ok(StageContext {
        config,
        store: Arc::new(store),
        kv: Arc::new(InMemoryKv::new()),
        audit: Arc::new(audit),
        counters: Arc::new(CounterRegistry::new()),
    })
}

/// Maps the configured [`LogLevel`] onto the audit crate's own severity
/// type. Kept here, in the composition root, so the config and metrics
/// crates stay decoupled from each other (§10's ambient-stack boundary).
fn event_severity(level: LogLevel) -> EventSeverity {
    match level {
        LogLevel::Debug | LogLevel::Info => EventSeverity::Info,
        LogLevel::Warn => EventSeverity::Warn,
        LogLevel::Error => EventSeverity::Error,
    }
}

/// Spawns the periodic counter flush task and binds the local `/metrics`
/// endpoint for one stage.
async fn spawn_metrics(ctx: &StageContext, service: &'static str) -> CliResult<()> {
    let counter_store: Arc<dyn CounterStore> = ctx.kv.clone();
    spawn_flush_task(
        Arc::clone(&ctx.counters),
        service,
        counter_store,
        Duration::from_millis(ctx.config.metrics.flush_interval_ms),
    );

    let router = metrics_router(Arc::clone(&ctx.counters));
    let listener = tokio::net::TcpListener::bind(&ctx.config.metrics.bind_address)
        .await
        .map_err(|error| CliError::Stage(format!("binding metrics endpoint: {error}")))?;
    tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });
    Ok(())
}

// ============================================================================
// SECTION: Snapshot Builder
// ============================================================================

async fn command_snapshot_builder(args: StageArgs) -> CliResult<ExitCode> {
    let ctx = stage_context(&args).await?;
    spawn_metrics(&ctx, "snapshot-builder").await?;

    let bus = InMemoryLogBus::new();
    let consumer = bus.consumer(Topic::RuleChanged, ctx.config.snapshot_builder.consumer_group.clone());
    let rule_store: Arc<dyn RuleStore> = ctx.store;
    let kv: Arc<dyn KvStore> = ctx.kv.clone();
    let counter_store: Arc<dyn CounterStore> = ctx.kv;

    let mut builder = SnapshotBuilder::new(rule_store, kv, counter_store, consumer, ctx.audit, ctx.counters, ctx.config.snapshot_builder.clone());
    builder.run().await.map_err(|error| CliError::Stage(error.to_string()))?;
    Ok(ExitCode::SUCCESS)
}

// ============================================================================
// SECTION: Matcher
// ============================================================================

async fn command_matcher(args: StageArgs) -> CliResult<ExitCode> {
    let ctx = stage_context(&args).await?;
    spawn_metrics(&ctx, "matcher").await?;

    let bus = InMemoryLogBus::new();
    let consumer = bus.consumer(Topic::AlertsNew, ctx.config.matcher.consumer_group.clone());
    let kv: Arc<dyn KvStore> = ctx.kv.clone();
    let producer: Arc<dyn LogProducer> = Arc::new(bus);

    let mut matcher = Matcher::new(kv.clone(), producer, consumer, Arc::clone(&ctx.audit), Arc::clone(&ctx.counters), ctx.config.matcher.clone());
    matcher.warm_start().await.map_err(|error| CliError::Stage(error.to_string()))?;

    let _refresh = spawn_refresh_task(
        matcher.snapshot_handle(),
        kv,
        ctx.audit,
        VERSION_KV_KEY.to_string(),
        ctx.config.matcher.snapshot_kv_key.clone(),
        Duration::from_millis(ctx.config.matcher.snapshot_poll_interval_ms),
    );

    matcher.run().await.map_err(|error| CliError::Stage(error.to_string()))?;
    Ok(ExitCode::SUCCESS)
}

// ============================================================================
// SECTION: Deduplicator
// ============================================================================

async fn command_deduplicator(args: StageArgs) -> CliResult<ExitCode> {
    let ctx = stage_context(&args).await?;
    spawn_metrics(&ctx, "deduplicator").await?;

    let bus = InMemoryLogBus::new();
    let consumer = bus.consumer(Topic::AlertsMatched, ctx.config.deduplicator.consumer_group.clone());
    let producer: Arc<dyn LogProducer> = Arc::new(bus);
    let notifications: Arc<dyn NotificationStore> = ctx.store;

    let mut dedup = Deduplicator::new(notifications, producer, consumer, ctx.audit, ctx.counters, ctx.config.deduplicator.clone());
    dedup.run().await.map_err(|error| CliError::Stage(error.to_string()))?;
    Ok(ExitCode::SUCCESS)
}

// ============================================================================
// SECTION: Dispatcher
// ============================================================================

async fn command_dispatcher(args: StageArgs) -> CliResult<ExitCode> {
    let ctx = stage_context(&args).await?;
    spawn_metrics(&ctx, "dispatcher").await?;

    let bus = InMemoryLogBus::new();
    let consumer = bus.consumer(Topic::NotificationsReady, ctx.config.dispatcher.consumer_group.clone());

    let registry = build_sender_registry(&ctx.config)?;
    let worker_count = ctx.config.dispatcher.worker_count;
    let endpoints: Arc<dyn EndpointStore> = Arc::clone(&ctx.store);
    let notifications: Arc<dyn NotificationStore> = ctx.store;

    let dispatcher = Arc::new(Dispatcher::new(
        notifications,
        endpoints,
        consumer,
        Arc::new(registry),
        ctx.audit,
        ctx.counters,
        &ctx.config.dispatcher,
    ));

    let mut workers = Vec::with_capacity(worker_count);
    for _ in 0..worker_count {
        let dispatcher = Arc::clone(&dispatcher);
        workers.push(tokio::spawn(async move { dispatcher.run().await }));
    }
    for worker in workers {
        let outcome = worker.await.map_err(|error| CliError::Stage(format!("dispatcher worker panicked: {error}")))?;
        outcome.map_err(|error| CliError::Stage(error.to_string()))?;
    }
    Ok(ExitCode::SUCCESS)
}

/// Builds the Dispatcher's sender registry from configuration and
/// environment-provided secrets (`ALERTPIPE_EMAIL_*`, per §10's convention
/// of env-var overrides for connection secrets). The email sender is
/// omitted, not an error, when those variables are unset; webhook channels
/// never need credentials beyond the target URL carried on the endpoint
/// itself.
fn build_sender_registry(config: &PipelineConfig) -> CliResult<SenderRegistry> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_millis(config.dispatcher.http_client_timeout_ms))
        .build()
        .map_err(|error| CliError::Stage(format!("building HTTP client: {error}")))?;

    let mut registry = SenderRegistry::new()
        .with_sender(ChannelKind::HttpWebhook, Arc::new(HttpWebhookSender::new(client.clone())))
        .with_sender(ChannelKind::ChatWebhook, Arc::new(ChatWebhookSender::new(client.clone())));

    if let Ok(endpoint) = std::env::var("ALERTPIPE_EMAIL_ENDPOINT") {
        let api_key = std::env::var("ALERTPIPE_EMAIL_API_KEY").unwrap_or_default();
        let from_address = std::env::var("ALERTPIPE_EMAIL_FROM").unwrap_or_default();
        let provider = HttpEmailProvider::new(
            HttpEmailProviderConfig { name: "primary".to_string(), endpoint, api_key, from_address },
            client,
        );
        let bucket = Arc::new(TokenBucket::new(
            config.dispatcher.email_rate_limit_capacity,
            config.dispatcher.email_rate_limit_refill_per_second,
        ));
        TokenBucket::spawn_refill(Arc::clone(&bucket), Duration::from_secs(1));
        registry = registry.with_sender(ChannelKind::Email, Arc::new(EmailSender::new(Arc::new(provider), None, bucket)));
    }

    Ok(registry)
}

// ============================================================================
// SECTION: Migrate
// ============================================================================

async fn command_migrate(args: StageArgs) -> CliResult<ExitCode> {
    let config = PipelineConfig::load(args.config.as_deref())?;
    let store = PostgresStore::connect(&config.connections.database_url, config.connections.database_max_connections).await?;
    store.migrate().await?;
    println!("alertpipe: migrations applied");
    Ok(ExitCode::SUCCESS)
}
