//! Database operations for documents.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{PgConnection, PgExecutor, Row};
use tessera_engine::DocumentId;

/// A stored document row.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredDocument {
    pub id: DocumentId,
    pub collection_key: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for StoredDocument {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(StoredDocument {
            id: row.try_get("id")?,
            collection_key: row.try_get("collection_key")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

/// Create an empty document in a collection.
pub async fn insert_document(
    conn: &mut PgConnection,
    collection_key: &str,
) -> Result<StoredDocument, sqlx::Error> {
    sqlx::query_as::<_, StoredDocument>(
        r#"
        INSERT INTO tsr_documents (collection_key)
        VALUES ($1)
        RETURNING id, collection_key, created_at, updated_at
        "#,
    )
    .bind(collection_key)
    .fetch_one(conn)
    .await
}

/// Get a document of a collection by id.
pub async fn get_document<'e, E: PgExecutor<'e>>(
    executor: E,
    collection_key: &str,
    id: DocumentId,
) -> Result<Option<StoredDocument>, sqlx::Error> {
    sqlx::query_as::<_, StoredDocument>(
        r#"
        SELECT id, collection_key, created_at, updated_at
        FROM tsr_documents
        WHERE collection_key = $1 AND id = $2
        "#,
    )
    .bind(collection_key)
    .bind(id)
    .fetch_optional(executor)
    .await
}

/// Lock a document row for the rest of the transaction and bump its
/// update time.
pub async fn touch_document(
    conn: &mut PgConnection,
    collection_key: &str,
    id: DocumentId,
) -> Result<Option<StoredDocument>, sqlx::Error> {
    sqlx::query_as::<_, StoredDocument>(
        r#"
        UPDATE tsr_documents SET updated_at = now()
        WHERE collection_key = $1 AND id = $2
        RETURNING id, collection_key, created_at, updated_at
        "#,
    )
    .bind(collection_key)
    .bind(id)
    .fetch_optional(conn)
    .await
}
