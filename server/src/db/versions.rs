//! Database operations for document versions.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{PgConnection, PgExecutor, Row};
use tessera_engine::{DocumentId, DocumentVersion, VersionId, VersionType};

/// A stored version row.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredVersion {
    pub id: VersionId,
    pub document_id: DocumentId,
    pub collection_key: String,
    pub version_type: String,
    pub content_id: String,
    pub promoted_from: Option<VersionId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for StoredVersion {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(StoredVersion {
            id: row.try_get("id")?,
            document_id: row.try_get("document_id")?,
            collection_key: row.try_get("collection_key")?,
            version_type: row.try_get("version_type")?,
            content_id: row.try_get("content_id")?,
            promoted_from: row.try_get("promoted_from")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

impl StoredVersion {
    /// Convert the row into the engine's version type.
    pub fn to_version(&self) -> Result<DocumentVersion, tessera_engine::Error> {
        Ok(DocumentVersion {
            id: self.id,
            document_id: self.document_id,
            version_type: self.version_type.parse()?,
            content_id: self.content_id.clone(),
            promoted_from: self.promoted_from,
        })
    }
}

/// Convert stored rows into engine versions.
pub fn to_versions(stored: &[StoredVersion]) -> Result<Vec<DocumentVersion>, tessera_engine::Error> {
    stored.iter().map(StoredVersion::to_version).collect()
}

const COLUMNS: &str =
    "id, document_id, collection_key, version_type, content_id, promoted_from, created_at, updated_at";

/// Every version of a document, oldest first.
pub async fn list_versions<'e, E: PgExecutor<'e>>(
    executor: E,
    document_id: DocumentId,
) -> Result<Vec<StoredVersion>, sqlx::Error> {
    sqlx::query_as::<_, StoredVersion>(&format!(
        "SELECT {} FROM tsr_document_versions WHERE document_id = $1 ORDER BY id",
        COLUMNS
    ))
    .bind(document_id)
    .fetch_all(executor)
    .await
}

/// The version of a document with the given type. For `revision`, which
/// can repeat, the newest one.
pub async fn find_by_type<'e, E: PgExecutor<'e>>(
    executor: E,
    document_id: DocumentId,
    version_type: &VersionType,
) -> Result<Option<StoredVersion>, sqlx::Error> {
    sqlx::query_as::<_, StoredVersion>(&format!(
        "SELECT {} FROM tsr_document_versions
         WHERE document_id = $1 AND version_type = $2
         ORDER BY id DESC LIMIT 1",
        COLUMNS
    ))
    .bind(document_id)
    .bind(version_type.as_str())
    .fetch_optional(executor)
    .await
}

pub async fn find_by_id<'e, E: PgExecutor<'e>>(
    executor: E,
    document_id: DocumentId,
    version_id: VersionId,
) -> Result<Option<StoredVersion>, sqlx::Error> {
    sqlx::query_as::<_, StoredVersion>(&format!(
        "SELECT {} FROM tsr_document_versions WHERE document_id = $1 AND id = $2",
        COLUMNS
    ))
    .bind(document_id)
    .bind(version_id)
    .fetch_optional(executor)
    .await
}

/// Insert a version.
pub async fn insert_version(
    conn: &mut PgConnection,
    collection_key: &str,
    document_id: DocumentId,
    version_type: &VersionType,
    content_id: &str,
    promoted_from: Option<VersionId>,
) -> Result<StoredVersion, sqlx::Error> {
    sqlx::query_as::<_, StoredVersion>(&format!(
        "INSERT INTO tsr_document_versions
             (document_id, collection_key, version_type, content_id, promoted_from)
         VALUES ($1, $2, $3, $4, $5)
         RETURNING {}",
        COLUMNS
    ))
    .bind(document_id)
    .bind(collection_key)
    .bind(version_type.as_str())
    .bind(content_id)
    .bind(promoted_from)
    .fetch_one(conn)
    .await
}

/// Point a version at new content.
pub async fn set_content_id(
    conn: &mut PgConnection,
    version_id: VersionId,
    content_id: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE tsr_document_versions SET content_id = $2, updated_at = now() WHERE id = $1",
    )
    .bind(version_id)
    .bind(content_id)
    .execute(conn)
    .await?;
    Ok(())
}

/// Turn a displaced version into a revision of the version that replaced it.
pub async fn retype_as_revision(
    conn: &mut PgConnection,
    version_id: VersionId,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE tsr_document_versions
         SET version_type = $2, promoted_from = NULL, updated_at = now()
         WHERE id = $1",
    )
    .bind(version_id)
    .bind(VersionType::Revision.as_str())
    .execute(conn)
    .await?;
    Ok(())
}

pub async fn set_promoted_from(
    conn: &mut PgConnection,
    version_id: VersionId,
    promoted_from: VersionId,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE tsr_document_versions SET promoted_from = $2 WHERE id = $1")
        .bind(version_id)
        .bind(promoted_from)
        .execute(conn)
        .await?;
    Ok(())
}

/// Delete a version. Its brick rows go with it through cascading keys.
pub async fn delete_version(conn: &mut PgConnection, version_id: VersionId) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM tsr_document_versions WHERE id = $1")
        .bind(version_id)
        .execute(conn)
        .await?;
    Ok(())
}
