#![forbid(unsafe_code)]

//! `httpqueue` service binary.
//!
//! Bootstraps configuration and storage, then starts the components the
//! selected mode asks for: HTTP API, outbox relay and webhook workers.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

use httpqueue::api::{self, AppState};
use httpqueue::broker::queue::TaskQueue;
use httpqueue::config::GlobalConfig;
use httpqueue::delivery::WebhookClient;
use httpqueue::dispatch::consumer;
use httpqueue::dispatch::processor::WebhookProcessor;
use httpqueue::dispatch::producer::TimerProducer;
use httpqueue::dispatch::relay::Relay;
use httpqueue::metrics::CounterRegistry;
use httpqueue::mode::AppMode;
use httpqueue::persistence::timer_repo::TimerRepo;
use httpqueue::persistence::{db, retention};
use httpqueue::timer::TimerService;
use httpqueue::{AppError, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "httpqueue", about = "Durable one-shot webhook timers", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file. Defaults apply when omitted.
    #[arg(long, env = "HTTPQUEUE_CONFIG")]
    config: Option<PathBuf>,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Components to run; overrides the configured mode.
    #[arg(long, value_enum)]
    mode: Option<AppMode>,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;
    info!("httpqueue bootstrap");

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    // ── Load configuration ──────────────────────────────
    let mut config = match &args.config {
        Some(path) => GlobalConfig::load_from_path(path)?,
        None => GlobalConfig::default(),
    };
    config.apply_env_overrides()?;
    if let Some(mode) = args.mode {
        config.mode = mode;
    }
    info!(mode = %config.mode, "configuration loaded");

    // ── Initialize database ─────────────────────────────
    let db = Arc::new(db::connect(&config.storage).await?);
    info!(path = %config.storage.db_path.display(), "database connected");

    let metrics = CounterRegistry::shared()?;
    let repo = Arc::new(TimerRepo::new(Arc::clone(&db), &config.storage));
    let queue = TaskQueue::new(Arc::clone(&db), config.consumer.lease());
    let service = TimerService::new(Arc::clone(&repo) as _);

    let ct = CancellationToken::new();
    let mut handles: Vec<JoinHandle<()>> = Vec::new();

    // ── Start retention service ──────────────────────────
    handles.push(retention::spawn_retention_task(
        Arc::clone(&db),
        std::time::Duration::from_secs(config.storage.retention_interval_seconds),
        config.storage.timer_max_ttl(),
        ct.clone(),
    ));
    info!("retention service started");

    // ── Start components ────────────────────────────────
    if config.mode.runs_api() {
        let state = AppState {
            service: service.clone(),
            metrics: Arc::clone(&metrics),
        };
        let bind_addr = config.http.bind_addr.clone();
        let api_ct = ct.clone();
        handles.push(tokio::spawn(async move {
            if let Err(err) = api::serve_http(&bind_addr, state, api_ct).await {
                error!(%err, "http api failed");
            }
        }));
    }

    if config.mode.runs_relay() {
        let producer = TimerProducer::new(Arc::new(queue.clone()), config.producer.max_retry);
        let relay = Relay::new(
            &config.relay,
            Arc::clone(&repo) as _,
            Arc::new(producer),
            Arc::clone(&metrics) as _,
        );
        handles.push(relay.spawn(ct.clone()));
        info!("relay started");
    }

    if config.mode.runs_workers() {
        let client = WebhookClient::new(&config.delivery)?;
        let processor =
            WebhookProcessor::new(service.clone(), Arc::new(client), Arc::clone(&metrics) as _);
        handles.push(consumer::spawn_consumer(
            queue.clone(),
            processor,
            &config.consumer,
            ct.clone(),
        ));
        info!(concurrency = config.consumer.concurrency, "workers started");
    }

    info!("httpqueue ready");

    // ── Wait for shutdown signal ────────────────────────
    shutdown_signal().await;
    info!("shutdown signal received");
    ct.cancel();

    // ── Wait for background tasks ───────────────────────
    for handle in handles {
        if let Err(err) = handle.await {
            error!(%err, "background task panicked");
        }
    }
    db.close().await;
    info!("httpqueue shut down");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                tracing::warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            tracing::error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt().with_env_filter(env_filter);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
