//! Promote handler - copies a version into another version type.

use serde::{Deserialize, Serialize};
use tessera_engine::{
    compose, decompose, plan_promotion, DisplacedAction, DisplacedVersion, DocumentId,
    PromotionRequest, VersionId, VersionType,
};

use crate::db::versions::{self, StoredVersion};
use crate::db::{bricks, documents, relations};
use crate::error::{AppError, Result};
use crate::AppState;

/// Request body for a promotion.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromoteRequest {
    pub from_version_id: VersionId,
    /// `latest` or a configured environment
    pub to_version_type: String,
    /// Allow a revision as the source
    #[serde(default)]
    pub allow_revision_source: bool,
}

/// Response for a promotion.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PromoteResponse {
    pub version: StoredVersion,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub displaced: Option<DisplacedVersion>,
    pub rows: usize,
}

/// Promote a version.
///
/// Everything that can reject the promotion is checked before the
/// transaction starts; the writes then happen in one transaction.
pub async fn handle_promote(
    state: &AppState,
    key: &str,
    id: DocumentId,
    request: PromoteRequest,
) -> Result<PromoteResponse> {
    let compiled = state.registry.require(key)?;
    let to_version_type: VersionType = request.to_version_type.parse()?;

    documents::get_document(&state.pool, key, id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("document {}", id)))?;

    let runner = state.runner();
    let (stored, status) = futures::try_join!(
        async { Ok::<_, AppError>(versions::list_versions(&state.pool, id).await?) },
        async { Ok::<_, AppError>(runner.check_status(&compiled).await?) },
    )?;

    let plan = plan_promotion(
        &compiled.definition.config,
        &versions::to_versions(&stored)?,
        &PromotionRequest {
            collection_key: key.to_string(),
            document_id: id,
            from_version_id: request.from_version_id,
            to_version_type,
            allow_revision_source: request.allow_revision_source,
        },
        status.requires_migration,
    )?;

    let mut tx = state.pool.begin().await?;
    documents::touch_document(&mut *tx, key, id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("document {}", id)))?;

    let source_rows = bricks::fetch_rows(&mut *tx, &compiled, plan.source.id).await?;

    if let Some(displaced) = &plan.displaced {
        match displaced.action {
            DisplacedAction::Retype => {
                versions::retype_as_revision(&mut *tx, displaced.version.id).await?
            }
            DisplacedAction::Delete => {
                versions::delete_version(&mut *tx, displaced.version.id).await?
            }
        }
    }

    let new_version = versions::insert_version(
        &mut *tx,
        key,
        id,
        &plan.new_version.version_type,
        &plan.new_version.content_id,
        Some(plan.new_version.promoted_from),
    )
    .await?;

    if let Some(displaced) = &plan.displaced {
        if displaced.action == DisplacedAction::Retype {
            versions::set_promoted_from(&mut *tx, displaced.version.id, new_version.id).await?;
        }
    }

    // Recompose so the copy gets its own rows and synthetic references.
    let locales = &state.config.locales;
    let lookup = relations::identity_lookup(&compiled, &source_rows);
    let input = decompose(&compiled, &source_rows, &lookup, locales).into_input();
    let mut rows = compose(&compiled, &input, id, new_version.id, locales)?;
    let written = bricks::insert_rows(&mut *tx, &compiled, &mut rows).await?;

    tx.commit().await?;

    tracing::info!(
        collection = %key,
        document_id = id,
        version_id = new_version.id,
        from_version_id = plan.source.id,
        version_type = %new_version.version_type,
        displaced = ?plan.displaced.as_ref().map(|d| (d.version.id, d.action)),
        rows = written,
        "promoted version"
    );

    Ok(PromoteResponse {
        version: new_version,
        displaced: plan.displaced,
        rows: written,
    })
}
