//! Relation targets: media, users and documents referenced by brick rows.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use sqlx::{PgPool, Row};
use tessera_engine::{CompiledCollection, RelationKind, RelationLookup, RowSet};

/// A media item as relation fields expose it.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct MediaTarget {
    id: i64,
    key: String,
    file_name: String,
    mime_type: String,
    width: Option<i32>,
    height: Option<i32>,
    alt: serde_json::Value,
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for MediaTarget {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(MediaTarget {
            id: row.try_get("id")?,
            key: row.try_get("key")?,
            file_name: row.try_get("file_name")?,
            mime_type: row.try_get("mime_type")?,
            width: row.try_get("width")?,
            height: row.try_get("height")?,
            alt: row.try_get("alt")?,
        })
    }
}

/// A user as relation fields expose it.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct UserTarget {
    id: i64,
    username: String,
    email: String,
    first_name: Option<String>,
    last_name: Option<String>,
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for UserTarget {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(UserTarget {
            id: row.try_get("id")?,
            username: row.try_get("username")?,
            email: row.try_get("email")?,
            first_name: row.try_get("first_name")?,
            last_name: row.try_get("last_name")?,
        })
    }
}

/// A referenced document.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DocumentTarget {
    id: i64,
    collection_key: String,
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for DocumentTarget {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(DocumentTarget {
            id: row.try_get("id")?,
            collection_key: row.try_get("collection_key")?,
        })
    }
}

fn ids_of(required: &BTreeMap<RelationKind, BTreeSet<i64>>, kind: RelationKind) -> Vec<i64> {
    required
        .get(&kind)
        .map(|ids| ids.iter().copied().collect())
        .unwrap_or_default()
}

async fn fetch_media(pool: &PgPool, ids: &[i64]) -> Result<Vec<MediaTarget>, sqlx::Error> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }
    sqlx::query_as::<_, MediaTarget>(
        "SELECT id, key, file_name, mime_type, width, height, alt FROM tsr_media WHERE id = ANY($1)",
    )
    .bind(ids)
    .fetch_all(pool)
    .await
}

async fn fetch_users(pool: &PgPool, ids: &[i64]) -> Result<Vec<UserTarget>, sqlx::Error> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }
    sqlx::query_as::<_, UserTarget>(
        "SELECT id, username, email, first_name, last_name FROM tsr_users WHERE id = ANY($1)",
    )
    .bind(ids)
    .fetch_all(pool)
    .await
}

async fn fetch_documents(pool: &PgPool, ids: &[i64]) -> Result<Vec<DocumentTarget>, sqlx::Error> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }
    sqlx::query_as::<_, DocumentTarget>(
        "SELECT id, collection_key FROM tsr_documents WHERE id = ANY($1)",
    )
    .bind(ids)
    .fetch_all(pool)
    .await
}

fn insert_all<T: Serialize>(
    lookup: &mut RelationLookup,
    kind: RelationKind,
    targets: Vec<T>,
    id: impl Fn(&T) -> i64,
) -> Result<(), serde_json::Error> {
    for target in targets {
        let target_id = id(&target);
        lookup.insert(kind, target_id, serde_json::to_value(&target)?);
    }
    Ok(())
}

/// Fetch every relation target `rows` reference, one query per kind, run
/// concurrently. Ids with no target are simply absent from the lookup.
pub async fn fetch_lookup(
    pool: &PgPool,
    compiled: &CompiledCollection,
    rows: &RowSet,
) -> crate::error::Result<RelationLookup> {
    let required = RelationLookup::required_ids(compiled, rows);
    let media_ids = ids_of(&required, RelationKind::Media);
    let user_ids = ids_of(&required, RelationKind::User);
    let document_ids = ids_of(&required, RelationKind::Document);

    let (media, users, documents) = futures::try_join!(
        fetch_media(pool, &media_ids),
        fetch_users(pool, &user_ids),
        fetch_documents(pool, &document_ids),
    )?;

    let mut lookup = RelationLookup::new();
    let serialize = |e: serde_json::Error| crate::error::AppError::Internal(e.to_string());
    insert_all(&mut lookup, RelationKind::Media, media, |m| m.id).map_err(serialize)?;
    insert_all(&mut lookup, RelationKind::User, users, |u| u.id).map_err(serialize)?;
    insert_all(&mut lookup, RelationKind::Document, documents, |d| d.id).map_err(serialize)?;

    tracing::debug!(
        collection = %compiled.key(),
        requested = required.values().map(BTreeSet::len).sum::<usize>(),
        resolved = lookup.len(),
        "fetched relation targets"
    );

    Ok(lookup)
}

/// A lookup that resolves every referenced id to `{ "id": id }`, enough to
/// carry relations through a decompose/compose cycle without fetching them.
pub fn identity_lookup(compiled: &CompiledCollection, rows: &RowSet) -> RelationLookup {
    let mut lookup = RelationLookup::new();
    for (kind, ids) in RelationLookup::required_ids(compiled, rows) {
        for id in ids {
            lookup.insert(kind, id, serde_json::json!({ "id": id }));
        }
    }
    lookup
}
