mod auth;
mod config;
mod console;
mod git;
mod repo;
mod ssh;
mod storage;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::auth::IdentityStore;
use crate::config::{Config, LogConfig, LogFormat};
use crate::repo::RepoTable;
use crate::storage::DataDir;

// ---------------------------------------------------------------------------
// CLI
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(name = "gitgate", about = "Git-over-SSH gateway")]
struct Cli {
    /// Path to an optional YAML configuration file.
    #[arg(short, long, env = "GITLITE_CONFIG")]
    config: Option<PathBuf>,

    /// Port (or full socket address) to listen on.
    #[arg(short, long, env = "GITLITE_PORT")]
    port: Option<String>,

    /// Data directory holding repositories, keys and permission tables.
    #[arg(short, long, env = "GITLITE_DATA")]
    data: Option<PathBuf>,
}

// ---------------------------------------------------------------------------
// Shared application state
// ---------------------------------------------------------------------------

/// State shared by every SSH session.
pub struct AppState {
    pub config: Arc<Config>,
    pub data: DataDir,
    pub identities: Arc<IdentityStore>,
    pub repos: Arc<RepoTable>,
}

// ---------------------------------------------------------------------------
// Tracing
// ---------------------------------------------------------------------------

fn init_tracing(log: &LogConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log.filter));
    let registry = tracing_subscriber::registry().with(filter);
    match log.format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer().pretty()).init(),
    }
}

// ---------------------------------------------------------------------------
// Graceful shutdown
// ---------------------------------------------------------------------------

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("received SIGINT"),
        () = terminate => tracing::info!("received SIGTERM"),
    }
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    // ---- CLI ----
    let cli = Cli::parse();

    // ---- Config ----
    let mut config = config::load_config(cli.config.as_deref())?;
    config.apply_overrides(cli.port.as_deref(), cli.data.as_deref());
    config::validate_config(&config)?;
    let config = Arc::new(config);

    // ---- Tracing ----
    init_tracing(&config.log);
    tracing::info!(
        config_path = ?cli.config,
        listen = %config.listen,
        data_dir = %config.data_dir.display(),
        "starting gitgate"
    );

    // ---- Data directory ----
    let data = DataDir::new(&config.data_dir);
    tokio::fs::create_dir_all(data.repos_dir())
        .await
        .with_context(|| {
            format!(
                "failed to create repository dir: {}",
                data.repos_dir().display()
            )
        })?;

    // ---- Tables ----
    let identities = Arc::new(IdentityStore::new());
    let repos = Arc::new(RepoTable::new(data.repos_dir()));
    data.load_tables(&identities, &repos).await;
    tracing::info!(
        admin_key = identities.has_admin_key(),
        users = identities.list_users().len(),
        repos = repos.list().await.len(),
        "tables ready"
    );

    // ---- App state ----
    let state = Arc::new(AppState {
        config: Arc::clone(&config),
        data,
        identities,
        repos,
    });

    // ---- Serve until a shutdown signal ----
    let result = tokio::select! {
        r = ssh::start_ssh_server(Arc::clone(&state)) => r,
        () = shutdown_signal() => Ok(()),
    };

    // ---- Persist ----
    if let Err(e) = state.data.save_tables(&state.identities, &state.repos).await {
        tracing::warn!(error = %format!("{e:#}"), "failed to save tables on shutdown");
    }

    match &result {
        Ok(()) => tracing::info!("gitgate shut down cleanly"),
        Err(e) => tracing::error!(error = %format!("{e:#}"), "SSH server failed"),
    }
    result
}
