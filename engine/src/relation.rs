//! Resolved relation targets.

use crate::compiler::CompiledCollection;
use crate::field::RelationKind;
use crate::rows::RowSet;
use crate::schema::ColumnRole;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

/// Relation targets fetched ahead of a decompose, keyed by kind and id.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RelationLookup {
    entries: BTreeMap<(RelationKind, i64), Value>,
}

impl RelationLookup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, kind: RelationKind, id: i64, target: Value) {
        self.entries.insert((kind, id), target);
    }

    /// Builder-style method to add a target.
    pub fn with(mut self, kind: RelationKind, id: i64, target: Value) -> Self {
        self.insert(kind, id, target);
        self
    }

    pub fn get(&self, kind: RelationKind, id: i64) -> Option<&Value> {
        self.entries.get(&(kind, id))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Ids referenced by relation columns in `rows`, per kind.
    pub fn required_ids(
        compiled: &CompiledCollection,
        rows: &RowSet,
    ) -> BTreeMap<RelationKind, BTreeSet<i64>> {
        let mut ids: BTreeMap<RelationKind, BTreeSet<i64>> = BTreeMap::new();
        for table in &compiled.tables {
            let relation_columns: Vec<_> = table
                .columns
                .iter()
                .filter_map(|c| match &c.role {
                    ColumnRole::Field { field_type, .. } => field_type
                        .capabilities()
                        .relation
                        .map(|kind| (c.name.as_str(), kind)),
                    ColumnRole::System { .. } => None,
                })
                .collect();
            if relation_columns.is_empty() {
                continue;
            }
            for row in rows.rows(&table.name) {
                for (column, kind) in &relation_columns {
                    if let Some(id) = row.value(column).and_then(|v| v.as_i64()) {
                        ids.entry(*kind).or_default().insert(id);
                    }
                }
            }
        }
        ids
    }
}
