//! lnp-ingest - lesson-note submission service
//!
//! Accepts lesson-note uploads from teachers, versions them per
//! (teacher, subject, classroom, session, term, week) slot, and serves the
//! admin review workflow. Side effects run on a background job worker.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use lnp_common::config::{self, RootFolderInitializer, ROOT_FOLDER_ENV};
use lnp_common::events::{EventBus, LnpEvent};
use tokio::signal;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use lnp_ingest::config::{IngestConfig, ScannerConfig, PORT_ENV};
use lnp_ingest::services::{
    EicarScanner, FallbackStorage, FileStorage, HttpScanner, LocalStorage, MokaCacheStore,
    VirusScanner,
};
use lnp_ingest::{AppState, Backends};

const RATE_LIMIT_PURGE_INTERVAL: Duration = Duration::from_secs(3600);

/// Command-line arguments for lnp-ingest
#[derive(Parser, Debug)]
#[command(name = "lnp-ingest")]
#[command(about = "Lesson-note submission, versioning and review service")]
#[command(version)]
struct Args {
    /// Port to listen on (overrides config)
    #[arg(short, long, env = PORT_ENV)]
    port: Option<u16>,

    /// Storage root holding the database and stored files
    #[arg(short, long, env = ROOT_FOLDER_ENV)]
    root_folder: Option<PathBuf>,

    /// Explicit TOML config file
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let toml_config = match args.config.clone().or_else(config::find_config_file) {
        Some(path) => Some(config::load_toml_config(&path)?),
        None => None,
    };

    let default_filter = toml_config
        .as_ref()
        .map(|c| format!("lnp_ingest={},tower_http={}", c.logging.level, c.logging.level))
        .unwrap_or_else(|| "lnp_ingest=info,tower_http=info".to_string());
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting lnp-ingest");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let mut ingest_config = IngestConfig::resolve(toml_config.as_ref())?;
    if let Some(port) = args.port {
        ingest_config.port = port;
    }

    let root_folder =
        config::resolve_root_folder(args.root_folder.as_deref(), ROOT_FOLDER_ENV, toml_config.as_ref());
    let initializer = RootFolderInitializer::new(root_folder);
    initializer
        .ensure_directory_exists()
        .map_err(|e| anyhow!("Failed to initialize root folder: {}", e))?;
    info!("Root folder: {}", initializer.root().display());

    let db_path = initializer.database_path();
    let db_pool = lnp_common::db::init_database(&db_path)
        .await
        .context("Failed to open database")?;
    info!("Database: {}", db_path.display());

    let event_bus = EventBus::new(256);
    spawn_notification_log(&event_bus);

    let fallback_root = ingest_config
        .fallback_storage_path
        .clone()
        .unwrap_or_else(|| initializer.fallback_storage_path());
    let storage: Arc<dyn FileStorage> = Arc::new(FallbackStorage::new(
        Arc::new(LocalStorage::new("primary", initializer.storage_path())),
        Arc::new(LocalStorage::new("fallback", fallback_root)),
        ingest_config.storage_timeout(),
    ));
    let mirror: Arc<dyn FileStorage> = Arc::new(LocalStorage::new("mirror", initializer.mirror_path()));

    let scanner: Arc<dyn VirusScanner> = match &ingest_config.scanner {
        ScannerConfig::Eicar => Arc::new(EicarScanner),
        ScannerConfig::Http { url } => Arc::new(
            HttpScanner::new(url, ingest_config.scanner_timeout(), ingest_config.scanner_rate_per_sec)
                .map_err(|e| anyhow!("Failed to configure virus scanner: {}", e))?,
        ),
    };
    info!(scanner = scanner.name(), "Virus scanner configured");

    let cache = Arc::new(MokaCacheStore::new(
        ingest_config.cache_capacity,
        Duration::from_secs(ingest_config.cache_ttl_secs),
    ));

    let poll_interval = ingest_config.job_poll_interval();
    let addr: SocketAddr = format!("{}:{}", ingest_config.bind_address, ingest_config.port)
        .parse()
        .with_context(|| format!("Invalid bind address {}", ingest_config.bind_address))?;

    let state = AppState::wire(
        db_pool,
        event_bus,
        ingest_config,
        Backends {
            storage,
            mirror,
            scanner,
            cache,
        },
    )
    .await
    .map_err(|e| anyhow!("Failed to wire services: {}", e))?;

    let cancel = CancellationToken::new();
    let worker = state.jobs.clone().spawn_worker(poll_interval, cancel.clone());
    spawn_rate_limit_purge(&state, cancel.clone());

    let app = lnp_ingest::build_router(state);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;
    info!("Listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    cancel.cancel();
    if let Err(e) = worker.await {
        warn!(error = %e, "Job worker did not stop cleanly");
    }

    info!("Server shutdown complete");
    Ok(())
}

/// Log notification work items
///
/// Keeps a subscriber on the bus so notification jobs have a consumer when
/// no delivery service is attached.
fn spawn_notification_log(event_bus: &EventBus) {
    let mut rx = event_bus.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(LnpEvent::AdminNotification { dedup_key, note_id, message, .. }) => {
                    info!(%dedup_key, %note_id, "Admin notification: {}", message);
                }
                Ok(LnpEvent::TeacherNotification { dedup_key, teacher_id, note_id, message, .. }) => {
                    info!(%dedup_key, teacher_id, %note_id, "Teacher notification: {}", message);
                }
                Ok(LnpEvent::AuditFailed { subject_type, subject_id, action, error, .. }) => {
                    error!(%subject_type, %subject_id, %action, "Audit side channel: {}", error);
                }
                Ok(LnpEvent::JobDeadLettered { job_id, kind, error, .. }) => {
                    warn!(%job_id, %kind, "Job dead-lettered: {}", error);
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "Notification log lagged"),
                Err(RecvError::Closed) => break,
            }
        }
    });
}

fn spawn_rate_limit_purge(state: &AppState, cancel: CancellationToken) {
    let limiter = state.rate_limiter.clone();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(RATE_LIMIT_PURGE_INTERVAL) => {}
            }
            match limiter.purge_stale(lnp_common::time::now()).await {
                Ok(0) => {}
                Ok(n) => info!(purged = n, "Purged stale rate limit counters"),
                Err(e) => warn!(error = %e, "Rate limit purge failed"),
            }
        }
    });
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
