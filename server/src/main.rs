//! Tessera Server - HTTP and Postgres adapter for the Tessera content engine.
//!
//! Collections are loaded from JSON definitions at startup. Their tables are
//! migrated on request, and documents are stored as brick rows in those tables.

mod adapter;
mod config;
mod db;
mod error;
mod handlers;
mod migrate;
mod registry;
mod routes;

use crate::adapter::PgSchemaAdapter;
use crate::config::Config;
use crate::db::Pool;
use crate::migrate::{MigrationLocks, MigrationRunner};
use crate::registry::Registry;
use axum::Router;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub pool: Pool,
    pub config: Arc<Config>,
    pub registry: Arc<Registry>,
    pub locks: MigrationLocks,
}

impl AppState {
    /// A migration runner over the shared pool and locks.
    pub fn runner(&self) -> MigrationRunner<PgSchemaAdapter> {
        MigrationRunner::new(PgSchemaAdapter::new(self.pool.clone()), self.locks.clone())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tessera_server=debug,tessera_engine=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;

    tracing::info!("Starting Tessera Server on {}:{}", config.host, config.port);

    // Compile collections, any invalid definition aborts startup
    let registry = Registry::load_dir(&config.collections_dir)?;
    tracing::info!(
        collections = registry.len(),
        dir = %config.collections_dir.display(),
        "collections compiled"
    );

    // Create database pool
    let pool = db::create_pool(&config.database_url, config.database_max_connections).await?;

    // Run migrations
    tracing::info!("Running database migrations...");
    db::run_migrations(&pool).await?;

    // Build application state
    let state = AppState {
        pool,
        config: Arc::new(config.clone()),
        registry: Arc::new(registry),
        locks: MigrationLocks::new(),
    };

    // Build router
    let app = Router::new()
        .merge(routes::create_routes())
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state);

    // Start server
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
