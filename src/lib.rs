pub mod analytics;
pub mod client;
pub mod config;
pub mod dashboard;
pub mod db;
pub mod errors;
pub mod models;
pub mod permissions;
pub mod policy;
pub mod scheduler;
pub mod server;
pub mod sheets;
pub mod sync_store;
pub mod uploads;

use crate::config::Config;
use crate::db::Database;
use crate::policy::UploadPolicy;
use crate::server::{build_router, AppState};
use crate::sheets::SheetImporter;
use std::path::Path;
use std::sync::Arc;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::writer::MakeWriterExt;

static LOG_GUARD: std::sync::OnceLock<WorkerGuard> = std::sync::OnceLock::new();

/// Opens storage and serves the API until ctrl-c. A database that cannot be
/// opened is fatal.
pub async fn run(config: Config) -> anyhow::Result<()> {
    if let Err(error) = init_tracing(&config.log_dir(), config.log_stdout) {
        eprintln!("failed to initialize logging: {}", error);
    }

    let db = Database::new(&config.db_path())
        .map_err(|error| anyhow::anyhow!("failed to open database {}: {}", config.db_path().display(), error))?;
    tracing::info!(path = %db.path().display(), "database ready");

    let state = AppState {
        db: Arc::new(db),
        uploads: Arc::new(UploadPolicy::new(config.upload_root())),
        sheets: Arc::new(SheetImporter::new(config.sheet_timeout)?),
    };

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    tracing::info!(address = %listener.local_addr()?, "leaddesk listening");

    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown requested");
        })
        .await?;
    Ok(())
}

fn init_tracing(log_dir: &Path, log_stdout: bool) -> Result<(), String> {
    std::fs::create_dir_all(log_dir).map_err(|error| error.to_string())?;
    let file_appender = tracing_appender::rolling::daily(log_dir, "leaddesk.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    let _ = LOG_GUARD.set(guard);

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let builder = tracing_subscriber::fmt().with_env_filter(filter).json();
    if log_stdout {
        builder
            .with_writer(non_blocking.and(std::io::stdout))
            .try_init()
            .map_err(|error| error.to_string())
    } else {
        builder
            .with_writer(non_blocking)
            .try_init()
            .map_err(|error| error.to_string())
    }
}
