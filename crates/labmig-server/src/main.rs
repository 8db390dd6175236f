//! Labmig Server - REST backend for lab results data migration.
//!
//! This binary wraps the labmig-core library in an HTTP API for starting,
//! monitoring and reporting on migrations, and for managing configuration.

mod error;
mod handlers;
mod logging;
mod server;

use anyhow::Result;
use clap::Parser;
use labmig_core::{ConfigStore, MigrationControlService, MigrationOptions, TargetDatabase};
use server::AppState;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "labmig-server")]
#[command(about = "HTTP server for lab results data migration")]
struct Args {
    /// Port to listen on (0 = auto-assign)
    #[arg(short, long, default_value = "5000")]
    port: u16,

    /// Host to bind to
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Migration options file (JSON)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Environment name; loads migration-<name>.json from the config directory
    #[arg(long)]
    environment: Option<String>,

    /// Target SQLite database
    #[arg(long, default_value = "labresults.db")]
    database: PathBuf,

    /// Directory holding configuration files
    #[arg(long, default_value = "config")]
    config_dir: PathBuf,
}

async fn load_base_options(store: &ConfigStore, args: &Args) -> Result<MigrationOptions> {
    let options = match (&args.config, &args.environment) {
        (Some(path), _) => store.load_options(path).await?,
        (None, Some(environment)) => store.environment_options(environment).await?,
        (None, None) => store.default_options().await,
    };
    Ok(options)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let store = ConfigStore::new(&args.config_dir);
    let base_options = load_base_options(&store, &args).await?;

    // Keep the guard alive so buffered file logs are flushed on exit
    let _log_guard = logging::init(&base_options.logging_options, args.debug)?;

    info!("Starting Labmig Server");
    info!("Target database: {}", args.database.display());

    let db = TargetDatabase::open(&args.database)?;
    let state = Arc::new(AppState {
        service: MigrationControlService::new(db),
        config: store,
        base_options,
    });

    let addr = server::start_server(Arc::clone(&state), &args.host, args.port).await?;

    // Print port for launchers and tests to read (intentional stdout)
    println!("LABMIG_PORT={}", addr.port());

    info!("Server running on {}", addr);

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received, stopping active migration");
    state.service.shutdown().await;

    Ok(())
}
