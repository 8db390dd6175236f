//! HTTP server implementation using Axum.

use crate::handlers::{config, handle_health, migration};
use axum::{
    routing::{get, post},
    Router,
};
use labmig_core::{ConfigStore, MigrationControlService, MigrationOptions};
use std::net::SocketAddr;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

/// Application state shared across handlers.
pub struct AppState {
    /// Migration job control
    pub service: MigrationControlService,
    /// Configuration file store
    pub config: ConfigStore,
    /// Options loaded at startup; used when a request supplies none
    pub base_options: MigrationOptions,
}

/// Build the router for all migration and configuration routes.
pub fn router(state: Arc<AppState>) -> Router {
    // Configure CORS for development
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let config_routes = Router::new()
        .route("/default", get(config::default_options))
        .route("/validate", post(config::validate))
        .route(
            "/overrides",
            get(config::available).post(config::apply),
        )
        .route("/prerequisites", post(config::prerequisites))
        .route("/compatibility", post(config::compatibility));

    let migration_routes = Router::new()
        .route("/start", post(migration::start))
        .route("/status", get(migration::status))
        .route("/running", get(migration::running))
        .route("/progress", get(migration::progress))
        .route("/cancel", post(migration::cancel))
        .route("/pause", post(migration::pause))
        .route("/resume", post(migration::resume))
        .route("/history", get(migration::history))
        .route("/statistics", get(migration::statistics))
        .route("/:id", get(migration::get_migration))
        .route("/:id/report", get(migration::report))
        .route("/:id/logs", get(migration::logs))
        .nest("/config", config_routes);

    Router::new()
        .route("/health", get(handle_health))
        .nest("/api/migration", migration_routes)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
        .with_state(state)
}

/// Start the HTTP server.
///
/// Returns the actual address the server is bound to (useful when port=0).
pub async fn start_server(state: Arc<AppState>, host: &str, port: u16) -> anyhow::Result<SocketAddr> {
    let app = router(state);

    // Parse the address
    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;

    // Bind to the address
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let actual_addr = listener.local_addr()?;

    info!("Server listening on {}", actual_addr);

    // Spawn the server in the background
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("Server error: {}", e);
        }
    });

    Ok(actual_addr)
}

#[cfg(test)]
mod tests {
    use super::*;
    use labmig_core::TargetDatabase;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_server_starts() {
        let temp_dir = TempDir::new().unwrap();
        let state = Arc::new(AppState {
            service: MigrationControlService::new(TargetDatabase::open_in_memory().unwrap()),
            config: ConfigStore::new(temp_dir.path()),
            base_options: MigrationOptions::default(),
        });

        let addr = start_server(state, "127.0.0.1", 0).await.unwrap();
        assert!(addr.port() > 0);
    }
}
