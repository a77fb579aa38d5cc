//! Relay speed-test coordinator daemon
//!
//! Connects to every configured measurement client and drives the pool
//! through one group measurement after another until interrupted.

use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use st_core::config::{self, CoordinatorConfig};
use st_core::time::current_time_millis;
use st_core::traits::CommandSink;
use st_core::ClientId;
use st_coordinator::catalog::catalog_source_from_config;
use st_coordinator::connection::ControllerPool;
use st_coordinator::{CheckpointStore, ControlEvent, Coordinator, CoordinatorState};

/// Capacity of the event channel shared by all control connections
const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Parser)]
#[command(name = "st-coordinator")]
#[command(about = "Relay speed-test coordinator")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Checkpoint file (overrides config)
    #[arg(long)]
    state_path: Option<PathBuf>,

    /// Log file (overrides config)
    #[arg(long)]
    log_path: Option<PathBuf>,

    /// Run in foreground with verbose output
    #[arg(short, long)]
    foreground: bool,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn load_config(args: &Args) -> Result<CoordinatorConfig> {
    let mut config: CoordinatorConfig = if let Some(config_path) = &args.config {
        config::load_config(config_path)
            .with_context(|| format!("Failed to load config from {:?}", config_path))?
    } else {
        let default_path = config::default_config_path();
        config::load_config(&default_path)
            .with_context(|| format!("Failed to load config from {:?}", default_path))?
    };

    if let Some(path) = &args.state_path {
        config.checkpoint_path = path.clone();
    }
    if let Some(path) = &args.log_path {
        config.log_path = path.clone();
    }

    config.validate().context("Invalid configuration")?;
    Ok(config)
}

fn init_logging(args: &Args, config: &CoordinatorConfig) -> Result<()> {
    if let Some(parent) = config.log_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create log directory {:?}", parent))?;
    }
    let log_file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&config.log_path)
        .with_context(|| format!("Failed to open log file {:?}", config.log_path))?;

    let log_level = if args.foreground { "debug" } else { &args.log_level };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| log_level.into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(Arc::new(log_file)),
        )
        .init();

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = load_config(&args)?;
    init_logging(&args, &config)?;

    tracing::info!("Relay speed-test coordinator starting...");
    tracing::info!(
        "{} clients configured, checkpoint at {:?}",
        config.clients.len(),
        config.checkpoint_path
    );

    // Create cancellation token for graceful shutdown
    let cancel = CancellationToken::new();

    // Setup signal handlers
    let cancel_clone = cancel.clone();
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut signal) => {
                    signal.recv().await;
                }
                Err(e) => {
                    tracing::warn!("Failed to install SIGTERM handler: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                tracing::info!("Received Ctrl+C, initiating shutdown...");
            }
            _ = terminate => {
                tracing::info!("Received SIGTERM, initiating shutdown...");
            }
        }

        cancel_clone.cancel();
    });

    // Bring up control connections
    let (event_tx, event_rx) = mpsc::channel::<ControlEvent>(EVENT_CHANNEL_CAPACITY);
    let pool = Arc::new(
        ControllerPool::connect_all(&config, event_tx)
            .await
            .context("Failed to bring up measurement clients")?,
    );
    if pool.is_empty() {
        bail!("No measurement client could be brought up");
    }

    // Only clients that came up take part
    let clients: Vec<(ClientId, String)> = config
        .clients
        .iter()
        .map(|(name, profile)| (ClientId::new(name.clone()), profile.partner.fingerprint.clone()))
        .filter(|(id, _)| pool.contains(id))
        .collect();

    let now = current_time_millis();
    let store = CheckpointStore::new(&config.checkpoint_path);
    let state = match store.load() {
        Ok(Some(snapshot)) => {
            tracing::info!(
                "Resuming from checkpoint: round {}, {} measurements",
                snapshot.round,
                snapshot.total_measurements
            );
            CoordinatorState::resume(snapshot, clients, now)
        }
        Ok(None) => {
            tracing::info!("No checkpoint found, starting fresh");
            CoordinatorState::fresh(clients, now)
        }
        Err(e) => {
            pool.close_all().await;
            return Err(e).context("Failed to read checkpoint");
        }
    };

    let coordinator = Arc::new(Coordinator::new(
        &config,
        state,
        catalog_source_from_config(&config.catalog),
        Arc::clone(&pool) as Arc<dyn CommandSink>,
    ));

    coordinator.heartbeat().await;
    Arc::clone(&coordinator).run(event_rx, cancel).await;

    pool.close_all().await;

    tracing::info!("Coordinator shutdown complete");
    Ok(())
}
