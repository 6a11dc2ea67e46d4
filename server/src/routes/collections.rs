//! Collection, document and migration routes.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use tessera_engine::{DocumentId, DocumentInput, MigrationStatus};

use crate::error::Result;
use crate::handlers::{
    handle_create, handle_get, handle_migration_apply, handle_migration_status, handle_promote,
    handle_update, handle_versions, DocumentQuery, MigrationRequest, PromoteRequest,
    PromoteResponse, ReadResponse, VersionsResponse, WriteResponse,
};
use crate::migrate::ApplyReport;
use crate::AppState;

/// A registered collection.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionSummary {
    pub key: String,
    pub tables: Vec<String>,
}

/// Create collection routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/collections", get(list_collections))
        .route(
            "/collections/{key}/migration",
            get(migration_status_handler).post(migration_apply_handler),
        )
        .route("/collections/{key}/documents", post(create_handler))
        .route(
            "/collections/{key}/documents/{id}",
            get(get_handler).put(update_handler),
        )
        .route(
            "/collections/{key}/documents/{id}/versions",
            get(versions_handler),
        )
        .route(
            "/collections/{key}/documents/{id}/promote",
            post(promote_handler),
        )
}

/// GET /collections - Registered collections and their tables.
async fn list_collections(State(state): State<AppState>) -> Json<Vec<CollectionSummary>> {
    let summaries = state
        .registry
        .keys()
        .filter_map(|key| state.registry.get(key))
        .map(|compiled| CollectionSummary {
            key: compiled.key().clone(),
            tables: compiled.table_names().map(str::to_string).collect(),
        })
        .collect();
    Json(summaries)
}

/// GET /collections/{key}/migration - Pending migration plan.
async fn migration_status_handler(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<MigrationStatus>> {
    let status = handle_migration_status(&state, &key).await?;
    Ok(Json(status))
}

/// POST /collections/{key}/migration - Apply the pending plan.
async fn migration_apply_handler(
    State(state): State<AppState>,
    Path(key): Path<String>,
    request: Option<Json<MigrationRequest>>,
) -> Result<Json<ApplyReport>> {
    let request = request.map(|Json(r)| r).unwrap_or_default();
    let report = handle_migration_apply(&state, &key, request).await?;
    Ok(Json(report))
}

/// POST /collections/{key}/documents - Create a document.
async fn create_handler(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Json(input): Json<DocumentInput>,
) -> Result<(StatusCode, Json<WriteResponse>)> {
    let response = handle_create(&state, &key, input).await?;
    Ok((StatusCode::CREATED, Json(response)))
}

/// GET /collections/{key}/documents/{id} - Read a document version.
async fn get_handler(
    State(state): State<AppState>,
    Path((key, id)): Path<(String, DocumentId)>,
    Query(query): Query<DocumentQuery>,
) -> Result<Json<ReadResponse>> {
    let response = handle_get(&state, &key, id, query).await?;
    Ok(Json(response))
}

/// PUT /collections/{key}/documents/{id} - Replace the latest version.
async fn update_handler(
    State(state): State<AppState>,
    Path((key, id)): Path<(String, DocumentId)>,
    Json(input): Json<DocumentInput>,
) -> Result<Json<WriteResponse>> {
    let response = handle_update(&state, &key, id, input).await?;
    Ok(Json(response))
}

/// GET /collections/{key}/documents/{id}/versions - Versions and sync state.
async fn versions_handler(
    State(state): State<AppState>,
    Path((key, id)): Path<(String, DocumentId)>,
) -> Result<Json<VersionsResponse>> {
    let response = handle_versions(&state, &key, id).await?;
    Ok(Json(response))
}

/// POST /collections/{key}/documents/{id}/promote - Promote a version.
async fn promote_handler(
    State(state): State<AppState>,
    Path((key, id)): Path<(String, DocumentId)>,
    Json(request): Json<PromoteRequest>,
) -> Result<Json<PromoteResponse>> {
    let response = handle_promote(&state, &key, id, request).await?;
    Ok(Json(response))
}
