//! Document handlers - create, update and read documents.

use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tessera_engine::{
    compose, decompose, sync_status, CompiledCollection, DocumentId, DocumentInput,
    EnvironmentStatus, VersionType,
};
use uuid::Uuid;

use crate::db::documents::{self, StoredDocument};
use crate::db::versions::{self, StoredVersion};
use crate::db::{bricks, relations};
use crate::error::{AppError, Result};
use crate::AppState;

/// Layout of the returned content.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Shape {
    /// Fields and groups as ordered arrays
    #[default]
    Array,
    /// Fields keyed by field key
    Object,
}

/// Query parameters for reading a document.
#[derive(Debug, Default, Deserialize)]
pub struct DocumentQuery {
    /// `latest` (default), an environment key or a version id
    pub version: Option<String>,
    #[serde(default)]
    pub shape: Shape,
}

/// Response for document writes.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WriteResponse {
    pub document: StoredDocument,
    pub version: StoredVersion,
    /// Brick rows written
    pub rows: usize,
}

/// Response for document reads.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadResponse {
    pub document: StoredDocument,
    pub version: StoredVersion,
    pub content: serde_json::Value,
}

/// Response for the version listing.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionsResponse {
    pub versions: Vec<StoredVersion>,
    pub environments: Vec<EnvironmentStatus>,
}

/// Refuse writes while the collection's tables lag behind its definition.
async fn ensure_migrated(state: &AppState, compiled: &CompiledCollection) -> Result<()> {
    let status = state.runner().check_status(compiled).await?;
    if status.requires_migration {
        return Err(tessera_engine::Error::MigrationRequired(compiled.key().clone()).into());
    }
    Ok(())
}

/// Create a document and its latest version.
pub async fn handle_create(
    state: &AppState,
    key: &str,
    input: DocumentInput,
) -> Result<WriteResponse> {
    let compiled = state.registry.require(key)?;
    ensure_migrated(state, &compiled).await?;

    let mut tx = state.pool.begin().await?;
    let document = documents::insert_document(&mut *tx, key).await?;
    let content_id = Uuid::new_v4().to_string();
    let version = versions::insert_version(
        &mut *tx,
        key,
        document.id,
        &VersionType::Latest,
        &content_id,
        None,
    )
    .await?;

    let mut rows = compose(
        &compiled,
        &input,
        document.id,
        version.id,
        &state.config.locales,
    )?;
    let written = bricks::insert_rows(&mut *tx, &compiled, &mut rows).await?;
    tx.commit().await?;

    tracing::info!(
        collection = %key,
        document_id = document.id,
        version_id = version.id,
        rows = written,
        "created document"
    );

    Ok(WriteResponse {
        document,
        version,
        rows: written,
    })
}

/// Replace the content of a document's latest version.
pub async fn handle_update(
    state: &AppState,
    key: &str,
    id: DocumentId,
    input: DocumentInput,
) -> Result<WriteResponse> {
    let compiled = state.registry.require(key)?;
    ensure_migrated(state, &compiled).await?;

    let mut tx = state.pool.begin().await?;
    let document = documents::touch_document(&mut *tx, key, id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("document {}", id)))?;
    let mut version = versions::find_by_type(&mut *tx, id, &VersionType::Latest)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("latest version of document {}", id)))?;

    let removed = bricks::delete_rows(&mut *tx, &compiled, version.id).await?;
    let content_id = Uuid::new_v4().to_string();
    versions::set_content_id(&mut *tx, version.id, &content_id).await?;
    version.content_id = content_id;

    let mut rows = compose(&compiled, &input, id, version.id, &state.config.locales)?;
    let written = bricks::insert_rows(&mut *tx, &compiled, &mut rows).await?;
    tx.commit().await?;

    tracing::info!(
        collection = %key,
        document_id = id,
        version_id = version.id,
        removed,
        rows = written,
        "updated document"
    );

    Ok(WriteResponse {
        document,
        version,
        rows: written,
    })
}

/// Resolve the `version` query parameter.
async fn resolve_version(
    pool: &PgPool,
    id: DocumentId,
    version: Option<&str>,
) -> Result<StoredVersion> {
    let found = match version {
        Some(raw) => match raw.parse::<i64>() {
            Ok(version_id) => versions::find_by_id(pool, id, version_id).await?,
            Err(_) => {
                let version_type: VersionType = raw.parse()?;
                versions::find_by_type(pool, id, &version_type).await?
            }
        },
        None => versions::find_by_type(pool, id, &VersionType::Latest).await?,
    };
    found.ok_or_else(|| {
        AppError::NotFound(format!(
            "version '{}' of document {}",
            version.unwrap_or("latest"),
            id
        ))
    })
}

/// Read a document version as nested content.
pub async fn handle_get(
    state: &AppState,
    key: &str,
    id: DocumentId,
    query: DocumentQuery,
) -> Result<ReadResponse> {
    let compiled = state.registry.require(key)?;
    let document = documents::get_document(&state.pool, key, id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("document {}", id)))?;
    let version = resolve_version(&state.pool, id, query.version.as_deref()).await?;

    let rows = {
        let mut conn = state.pool.acquire().await?;
        bricks::fetch_rows(&mut conn, &compiled, version.id).await?
    };
    let lookup = relations::fetch_lookup(&state.pool, &compiled, &rows).await?;
    let response = decompose(&compiled, &rows, &lookup, &state.config.locales);

    let content = match query.shape {
        Shape::Array => {
            serde_json::to_value(&response).map_err(|e| AppError::Internal(e.to_string()))?
        }
        Shape::Object => response.to_object(),
    };

    Ok(ReadResponse {
        document,
        version,
        content,
    })
}

/// List a document's versions and whether each environment is up to date.
pub async fn handle_versions(
    state: &AppState,
    key: &str,
    id: DocumentId,
) -> Result<VersionsResponse> {
    documents::get_document(&state.pool, key, id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("document {}", id)))?;

    let stored = versions::list_versions(&state.pool, id).await?;
    let environments = sync_status(&versions::to_versions(&stored)?);

    Ok(VersionsResponse {
        versions: stored,
        environments,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_defaults_to_latest_array() {
        let query: DocumentQuery = serde_json::from_str("{}").unwrap();
        assert_eq!(query.version, None);
        assert_eq!(query.shape, Shape::Array);

        let query: DocumentQuery =
            serde_json::from_str(r#"{"version": "published", "shape": "object"}"#).unwrap();
        assert_eq!(query.version.as_deref(), Some("published"));
        assert_eq!(query.shape, Shape::Object);
    }
}
