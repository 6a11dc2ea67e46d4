//! Applied migration plans.
//!
//! Every executed plan is stored alongside the column specs it left behind.
//! The planner reads the newest record of a table when introspection reports
//! a type it cannot map, instead of treating the column as drifted.

use crate::compiler::CompiledCollection;
use crate::migration::{MigrationOperation, MigrationPlan, TableMigration};
use crate::schema::DataType;
use crate::{error::Result, CollectionKey, Error};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Version of the applied plan format for future compatibility.
pub const SNAPSHOT_FORMAT_VERSION: u32 = 1;

/// The managed spec of a column after a plan ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordedColumn {
    pub data_type: DataType,
    pub nullable: bool,
}

/// State of a table after a plan ran.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum TableRecord {
    Present {
        columns: BTreeMap<String, RecordedColumn>,
    },
    Dropped,
}

/// A plan that was executed against the database.
///
/// Uses BTreeMap so serialization is deterministic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppliedPlan {
    pub format_version: u32,
    pub collection_key: CollectionKey,
    /// Operations that were executed, grouped by table
    pub operations: Vec<TableMigration>,
    /// Every table the plan touched, with its resulting columns
    pub tables: BTreeMap<String, TableRecord>,
}

impl AppliedPlan {
    /// Record `plan` as executed against `compiled`.
    pub fn from_plan(compiled: &CompiledCollection, plan: &MigrationPlan) -> Self {
        let mut tables = BTreeMap::new();
        for table in &plan.tables {
            let dropped = table
                .operations
                .iter()
                .any(|op| matches!(op.operation, MigrationOperation::DropTable));
            let record = match compiled.table(&table.table_name) {
                Some(schema) if !dropped => TableRecord::Present {
                    columns: schema
                        .columns
                        .iter()
                        .map(|c| {
                            (
                                c.name.clone(),
                                RecordedColumn {
                                    data_type: c.data_type,
                                    nullable: c.nullable,
                                },
                            )
                        })
                        .collect(),
                },
                _ => TableRecord::Dropped,
            };
            tables.insert(table.table_name.clone(), record);
        }

        Self {
            format_version: SNAPSHOT_FORMAT_VERSION,
            collection_key: plan.collection_key.clone(),
            operations: plan.tables.clone(),
            tables,
        }
    }

    /// Serialize to JSON with deterministic ordering.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| Error::InvalidSnapshot(e.to_string()))
    }

    /// Deserialize from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        let plan: Self =
            serde_json::from_str(json).map_err(|e| Error::InvalidSnapshot(e.to_string()))?;

        if plan.format_version > SNAPSHOT_FORMAT_VERSION {
            return Err(Error::InvalidSnapshot(format!(
                "unsupported snapshot format version: {} (max supported: {})",
                plan.format_version, SNAPSHOT_FORMAT_VERSION
            )));
        }

        Ok(plan)
    }
}

/// Applied plans of one collection, oldest first.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MigrationHistory {
    plans: Vec<AppliedPlan>,
}

impl MigrationHistory {
    pub fn new(plans: Vec<AppliedPlan>) -> Self {
        Self { plans }
    }

    pub fn push(&mut self, plan: AppliedPlan) {
        self.plans.push(plan);
    }

    pub fn latest(&self) -> Option<&AppliedPlan> {
        self.plans.last()
    }

    pub fn len(&self) -> usize {
        self.plans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plans.is_empty()
    }

    /// The column as the newest plan touching its table left it.
    pub fn recorded_column(&self, table: &str, column: &str) -> Option<&RecordedColumn> {
        let record = self.plans.iter().rev().find_map(|p| p.tables.get(table))?;
        match record {
            TableRecord::Present { columns } => columns.get(column),
            TableRecord::Dropped => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collection::{CollectionDefinition, FieldDefinition};
    use crate::compiler::compile;
    use crate::field::FieldType;
    use crate::migration::{apply_to_live, plan, LiveSchema};

    fn compiled(extra: bool) -> CompiledCollection {
        let mut fields = vec![FieldDefinition::new("hero", FieldType::Text)];
        if extra {
            fields.push(FieldDefinition::repeater(
                "items",
                vec![FieldDefinition::new("label", FieldType::Text)],
            ));
        }
        compile(&CollectionDefinition::new("blog", fields)).unwrap()
    }

    #[test]
    fn records_created_tables() {
        let c = compiled(true);
        let p = plan(&c, &LiveSchema::new(), &MigrationHistory::default());
        let applied = AppliedPlan::from_plan(&c, &p);

        assert_eq!(applied.format_version, SNAPSHOT_FORMAT_VERSION);
        assert_eq!(applied.tables.len(), 2);
        let mut history = MigrationHistory::default();
        history.push(applied);
        let hero = history.recorded_column("tsr_blog__fields", "_hero").unwrap();
        assert_eq!(hero.data_type, DataType::Text);
        assert!(hero.nullable);
    }

    #[test]
    fn newest_record_wins() {
        let with_items = compiled(true);
        let first = plan(&with_items, &LiveSchema::new(), &MigrationHistory::default());
        let live = apply_to_live(&LiveSchema::new(), &first);

        let without = compiled(false);
        let second = plan(&without, &live, &MigrationHistory::default());

        let history = MigrationHistory::new(vec![
            AppliedPlan::from_plan(&with_items, &first),
            AppliedPlan::from_plan(&without, &second),
        ]);
        assert!(history
            .recorded_column("tsr_blog__fields__items", "_label")
            .is_none());
        // Untouched by the second plan, so the first record still holds.
        assert!(history.recorded_column("tsr_blog__fields", "_hero").is_some());
        assert_eq!(history.len(), 2);
    }

    #[test]
    fn json_roundtrip_is_deterministic() {
        let c = compiled(true);
        let p = plan(&c, &LiveSchema::new(), &MigrationHistory::default());
        let applied = AppliedPlan::from_plan(&c, &p);

        let json = applied.to_json().unwrap();
        assert_eq!(json, AppliedPlan::from_plan(&c, &p).to_json().unwrap());
        assert_eq!(AppliedPlan::from_json(&json).unwrap(), applied);
    }

    #[test]
    fn reject_future_format_version() {
        let json = r#"{
            "formatVersion": 999,
            "collectionKey": "blog",
            "operations": [],
            "tables": {}
        }"#;
        assert!(matches!(
            AppliedPlan::from_json(json),
            Err(Error::InvalidSnapshot(_))
        ));
    }
}
