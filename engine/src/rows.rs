//! Physical brick rows, grouped by table.

use crate::{DocumentId, Locale, VersionId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A typed cell value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum ColumnValue {
    Null,
    Boolean(bool),
    Integer(i64),
    Double(f64),
    /// Text, and timestamps in RFC 3339 form
    Text(String),
    Json(serde_json::Value),
}

impl ColumnValue {
    pub fn is_null(&self) -> bool {
        matches!(self, ColumnValue::Null)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ColumnValue::Integer(i) => Some(*i),
            _ => None,
        }
    }
}

/// One physical row in a brick, fields or repeater table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrickRow {
    /// Database id, `None` until inserted
    #[serde(default)]
    pub id: Option<i64>,
    pub document_id: DocumentId,
    pub document_version_id: VersionId,
    pub locale: Locale,
    /// Sibling order within the parent
    pub position: i32,
    pub is_open: bool,
    /// Synthetic reference shared by every row of one brick instance
    pub brick_instance_id: i64,
    /// Synthetic reference shared by the locale rows of one repeater group
    #[serde(default)]
    pub group_ref: Option<i64>,
    /// `group_ref` of the parent group, for nested repeater rows
    #[serde(default)]
    pub parent_id_ref: Option<i64>,
    /// Database id of the parent row in the same locale
    #[serde(default)]
    pub parent_id: Option<i64>,
    /// Field column values keyed by column name
    pub values: BTreeMap<String, ColumnValue>,
}

impl BrickRow {
    /// Reference that children of this row point at: the group for repeater
    /// rows, the brick instance for brick and fields rows.
    pub fn scope_ref(&self) -> i64 {
        self.group_ref.unwrap_or(self.brick_instance_id)
    }

    /// [`BrickRow::scope_ref`] of the parent row. Top-level repeater groups
    /// belong to their brick instance.
    pub fn parent_scope_ref(&self) -> i64 {
        self.parent_id_ref.unwrap_or(self.brick_instance_id)
    }

    /// Get a field column value.
    pub fn value(&self, column: &str) -> Option<&ColumnValue> {
        self.values.get(column)
    }
}

/// Rows of a single table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableRows {
    pub table: String,
    pub rows: Vec<BrickRow>,
}

/// Rows grouped by table, in the order the tables were compiled so parents
/// are always inserted before their children.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RowSet {
    tables: Vec<TableRows>,
}

impl RowSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a row to its table, creating the table entry on first use.
    pub fn push(&mut self, table: &str, row: BrickRow) {
        match self.tables.iter_mut().find(|t| t.table == table) {
            Some(entry) => entry.rows.push(row),
            None => self.tables.push(TableRows {
                table: table.to_string(),
                rows: vec![row],
            }),
        }
    }

    /// Add every row of a table, as read from the database.
    pub fn extend(&mut self, table: &str, rows: impl IntoIterator<Item = BrickRow>) {
        for row in rows {
            self.push(table, row);
        }
    }

    /// Rows of a table; empty when the table has none.
    pub fn rows(&self, table: &str) -> &[BrickRow] {
        self.tables
            .iter()
            .find(|t| t.table == table)
            .map(|t| t.rows.as_slice())
            .unwrap_or(&[])
    }

    pub fn rows_mut(&mut self, table: &str) -> Option<&mut Vec<BrickRow>> {
        self.tables
            .iter_mut()
            .find(|t| t.table == table)
            .map(|t| &mut t.rows)
    }

    /// Tables that have at least one row, in insertion order.
    pub fn tables(&self) -> &[TableRows] {
        &self.tables
    }

    /// Total number of rows across all tables.
    pub fn len(&self) -> usize {
        self.tables.iter().map(|t| t.rows.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fill in `parent_id` for the rows of `table` once the parent table's
    /// rows are inserted.
    ///
    /// `parents` maps `(scope_ref, locale)` of each inserted parent row to its
    /// database id. A child is linked only to the parent row of its own
    /// locale. Returns the number of rows that could not be resolved.
    pub fn resolve_parent_ids(
        &mut self,
        table: &str,
        parents: &BTreeMap<(i64, Locale), i64>,
    ) -> usize {
        let Some(rows) = self.rows_mut(table) else {
            return 0;
        };

        let mut unresolved = 0;
        for row in rows.iter_mut() {
            match parents.get(&(row.parent_scope_ref(), row.locale.clone())) {
                Some(id) => row.parent_id = Some(*id),
                None => unresolved += 1,
            }
        }
        unresolved
    }
}

/// Map inserted rows to `(scope_ref, locale) -> id`, the input of
/// [`RowSet::resolve_parent_ids`] for the next table down.
pub fn inserted_group_ids(rows: &[BrickRow]) -> BTreeMap<(i64, Locale), i64> {
    rows.iter()
        .filter_map(|row| Some(((row.scope_ref(), row.locale.clone()), row.id?)))
        .collect()
}
