//! Liveness and registry summary.

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;
use tessera_engine::Locales;

use crate::AppState;

/// What the running server has loaded.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    /// Number of compiled collections
    pub collections: usize,
    pub default_locale: String,
    pub locales: Locales,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health_check))
        .route("/", get(|| async { "Tessera Server" }))
}

/// Does not touch the database, so it answers while Postgres is down.
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        collections: state.registry.len(),
        default_locale: state.config.locales.default_locale().to_string(),
        locales: state.config.locales.clone(),
    })
}
