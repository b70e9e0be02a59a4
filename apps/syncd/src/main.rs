//! # ReMarket Sync Daemon
//!
//! Background process that keeps the local listing store in sync with the
//! product API.
//!
//! ## Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                           syncd                                         │
//! │                                                                         │
//! │  sync.toml + env ──► SyncConfig                                        │
//! │                          │                                              │
//! │  remarket.db ◄── Database ◄── SyncEngine ──► HttpGateway ──► API       │
//! │                                   ▲                                     │
//! │                                   │ push, then pull                     │
//! │  SIGUSR1 ──► trigger_now ──► SyncScheduler                             │
//! │  Ctrl+C / SIGTERM ──► graceful shutdown                                │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modes
//! - `auto`: sync at start-up, then every `periodic_interval_secs`
//! - `manual`: sync only on SIGUSR1
//! - `offline`: report local status and exit

use std::error::Error;
use std::sync::Arc;

use remarket_db::{Database, DbConfig};
use remarket_sync::{
    CredentialSource, EngineOptions, HttpGateway, SchedulerConfig, SchedulerHandle,
    StaticConditions, StaticCredentials, SyncConfig, SyncEngine, SyncMode, SyncScheduler,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    init_tracing();

    info!(version = env!("CARGO_PKG_VERSION"), "Starting ReMarket sync daemon");

    let config = SyncConfig::load(None)?;
    info!(
        mode = %config.mode(),
        api = %config.api.base_url,
        "Configuration loaded"
    );

    let db_path = config
        .database_path()
        .ok_or("Could not determine app data directory")?;
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let db = Database::new(DbConfig::new(db_path)).await?;

    let credentials = Arc::new(StaticCredentials::from_env());
    if credentials.access_token().is_none() {
        warn!("REMARKET_API_TOKEN not set; API requests are sent anonymously");
    }

    let gateway = Arc::new(HttpGateway::new(&config.api, credentials.clone())?);
    let engine = SyncEngine::new(
        db.clone(),
        gateway,
        credentials,
        EngineOptions::from(&config),
    );

    match config.mode() {
        SyncMode::Offline => info!("Offline mode, no sync will run"),
        SyncMode::Auto | SyncMode::Manual => run_scheduler(&engine, &config).await?,
    }

    report_status(&engine).await;
    db.close().await;

    info!("Sync daemon stopped");
    Ok(())
}

/// Initializes the tracing subscriber.
///
/// ## Log Levels
/// - `RUST_LOG=debug` - Show debug messages
/// - `RUST_LOG=remarket_sync=trace` - Trace the sync engine only
/// - Default: INFO, DEBUG for remarket crates
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,remarket=debug,sqlx=warn"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}

async fn run_scheduler(engine: &SyncEngine, config: &SyncConfig) -> Result<(), Box<dyn Error>> {
    let mut schedule = SchedulerConfig::from(&config.schedule);
    if !config.mode().is_scheduled() {
        schedule.initial_sync = false;
        schedule.periodic_interval = None;
    }

    // No platform probe on a desktop host; constraints always hold.
    let (handle, join) = SyncScheduler::spawn(
        Arc::new(engine.clone()),
        Arc::new(StaticConditions::unrestricted()),
        schedule,
    );

    wait_for_shutdown(&handle).await;

    handle.shutdown().await?;
    join.await?;
    Ok(())
}

async fn report_status(engine: &SyncEngine) {
    match engine.status().await {
        Ok(status) => info!(
            pending = status.pending,
            errored = status.errored,
            synced = status.synced,
            last_push_at = ?status.last_push_at,
            last_pull_at = ?status.last_pull_at,
            last_pull_error = ?status.last_pull_error,
            "Local sync status"
        ),
        Err(e) => warn!(error = %e, "Could not read sync status"),
    }
}

/// Waits for Ctrl+C or SIGTERM. SIGUSR1 requests a sync in the meantime.
async fn wait_for_shutdown(handle: &SchedulerHandle) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    #[cfg(unix)]
    let on_demand = async {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::user_defined1()) {
            Ok(mut sigusr1) => {
                while sigusr1.recv().await.is_some() {
                    info!("Sync requested by SIGUSR1");
                    if let Err(e) = handle.trigger_now() {
                        warn!(error = %e, "Could not queue sync");
                    }
                }
            }
            Err(e) => warn!(error = %e, "Failed to install SIGUSR1 handler"),
        }
        std::future::pending::<()>().await
    };

    #[cfg(not(unix))]
    let on_demand = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
        _ = on_demand => {},
    }

    info!("Shutdown signal received, starting graceful shutdown...");
}
