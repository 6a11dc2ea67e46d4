//! Migration differ and planner.
//!
//! Compares compiled tables against the live database and produces an
//! ordered plan. Plans are computed fresh on every call; only the plan that
//! was actually executed is persisted, as an [`AppliedPlan`](crate::AppliedPlan).
//!
//! # Algorithm
//!
//! 1. Target table missing from the live schema: create it
//! 2. Present: diff column by column (add, alter, drop)
//! 3. Live table under the collection prefix with no target: drop it
//! 4. Order steps: creates, adds, alters, then column drops, then table drops

use crate::compiler::CompiledCollection;
use crate::schema::{depth_from_name, Column, DataType, ForeignKey, TableSchema};
use crate::snapshot::MigrationHistory;
use crate::{error::Result, CollectionKey, Error};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Column type as reported by introspection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "type", rename_all = "lowercase")]
pub enum LiveType {
    Known(DataType),
    /// A database type the dialect could not map
    Other(String),
}

/// A foreign key as reported by introspection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveForeignKey {
    pub constraint: String,
    pub table: String,
    pub column: String,
}

/// A live column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveColumn {
    pub name: String,
    pub data_type: LiveType,
    pub nullable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub foreign_key: Option<LiveForeignKey>,
}

impl LiveColumn {
    /// The live state a compiled column is created with.
    pub fn from_column(column: &Column) -> Self {
        Self {
            name: column.name.clone(),
            data_type: LiveType::Known(column.data_type),
            nullable: column.nullable,
            foreign_key: column.foreign_key.as_ref().map(|fk| LiveForeignKey {
                constraint: String::new(),
                table: fk.table.clone(),
                column: fk.column.clone(),
            }),
        }
    }
}

/// A live table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveTable {
    pub name: String,
    pub columns: Vec<LiveColumn>,
    /// Whether introspection reported foreign keys for this table. When it
    /// did not, foreign keys are not diffed.
    #[serde(default)]
    pub foreign_keys_known: bool,
}

impl LiveTable {
    pub fn column(&self, name: &str) -> Option<&LiveColumn> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// The live state a compiled table is created with.
    pub fn from_schema(table: &TableSchema) -> Self {
        Self {
            name: table.name.clone(),
            columns: table.columns.iter().map(LiveColumn::from_column).collect(),
            foreign_keys_known: true,
        }
    }
}

/// The introspected tables of one collection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveSchema {
    pub tables: BTreeMap<String, LiveTable>,
}

impl LiveSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, table: LiveTable) {
        self.tables.insert(table.name.clone(), table);
    }

    pub fn table(&self, name: &str) -> Option<&LiveTable> {
        self.tables.get(name)
    }

    /// Builder-style method to add a table.
    pub fn with_table(mut self, table: LiveTable) -> Self {
        self.insert(table);
        self
    }
}

/// A single difference between a live column and its target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "change", rename_all = "camelCase")]
pub enum ColumnChange {
    DataType { from: LiveType, to: DataType },
    Nullability { nullable: bool },
    #[serde(rename_all = "camelCase")]
    ForeignKey {
        from: Option<LiveForeignKey>,
        to: Option<ForeignKey>,
    },
}

/// A table or column operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum MigrationOperation {
    CreateTable { columns: Vec<Column> },
    AddColumn { column: Column },
    AlterColumn { column: Column, changes: Vec<ColumnChange> },
    DropColumn { column: String },
    DropTable,
}

impl MigrationOperation {
    /// Short human-readable description.
    pub fn describe(&self, table: &str) -> String {
        match self {
            MigrationOperation::CreateTable { .. } => format!("create table {}", table),
            MigrationOperation::AddColumn { column } => {
                format!("add column {}.{}", table, column.name)
            }
            MigrationOperation::AlterColumn { column, .. } => {
                format!("alter column {}.{}", table, column.name)
            }
            MigrationOperation::DropColumn { column } => {
                format!("drop column {}.{}", table, column)
            }
            MigrationOperation::DropTable => format!("drop table {}", table),
        }
    }

    fn phase(&self) -> Phase {
        match self {
            MigrationOperation::CreateTable { .. } => Phase::CreateTable,
            MigrationOperation::AddColumn { .. } => Phase::AddColumn,
            MigrationOperation::AlterColumn { .. } => Phase::AlterColumn,
            MigrationOperation::DropColumn { .. } => Phase::DropColumn,
            MigrationOperation::DropTable => Phase::DropTable,
        }
    }

    /// Whether the operation only adds structure.
    pub fn is_additive(&self) -> bool {
        matches!(
            self,
            MigrationOperation::CreateTable { .. } | MigrationOperation::AddColumn { .. }
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Phase {
    CreateTable,
    AddColumn,
    AlterColumn,
    DropColumn,
    DropTable,
}

/// An operation with its destructiveness.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlannedOperation {
    #[serde(flatten)]
    pub operation: MigrationOperation,
    pub destructive: bool,
}

/// Operations on one table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableMigration {
    pub table_name: String,
    pub operations: Vec<PlannedOperation>,
    pub destructive: bool,
}

/// A step of a plan in execution order.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MigrationStep<'a> {
    pub table: &'a str,
    pub operation: &'a MigrationOperation,
    pub destructive: bool,
}

impl MigrationStep<'_> {
    pub fn describe(&self) -> String {
        self.operation.describe(self.table)
    }
}

/// What the caller intends to do with a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "camelCase")]
pub enum PlanMode {
    /// Compute the plan, touch nothing
    DryRun,
    #[serde(rename_all = "camelCase")]
    Apply { confirm_destructive: bool },
}

impl PlanMode {
    /// Whether `plan` should be executed under this mode.
    ///
    /// Dry runs never execute. Applying a plan with destructive steps
    /// without confirmation is a [`Error::ConfirmationRequired`].
    pub fn permits(self, plan: &MigrationPlan) -> Result<bool> {
        match self {
            PlanMode::DryRun => Ok(false),
            PlanMode::Apply {
                confirm_destructive,
            } => {
                plan.authorize(confirm_destructive)?;
                Ok(!plan.is_empty())
            }
        }
    }
}

/// An ordered migration plan for one collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationPlan {
    pub collection_key: CollectionKey,
    pub tables: Vec<TableMigration>,
}

impl MigrationPlan {
    /// A plan with nothing to do.
    pub fn empty(collection_key: impl Into<CollectionKey>) -> Self {
        Self {
            collection_key: collection_key.into(),
            tables: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.tables.iter().all(|t| t.operations.is_empty())
    }

    pub fn is_destructive(&self) -> bool {
        self.tables.iter().any(|t| t.destructive)
    }

    /// Whether every operation only adds tables or columns.
    pub fn is_additive(&self) -> bool {
        self.tables
            .iter()
            .flat_map(|t| &t.operations)
            .all(|op| op.operation.is_additive())
    }

    /// Number of operations across all tables.
    pub fn operation_count(&self) -> usize {
        self.tables.iter().map(|t| t.operations.len()).sum()
    }

    /// Steps in execution order.
    ///
    /// Tables are created before anything references them (compile order
    /// puts parents first), additive and altering steps come before any
    /// deletion, and tables are dropped deepest first so no foreign key
    /// points at a dropped table.
    pub fn steps(&self) -> Vec<MigrationStep<'_>> {
        let mut steps: Vec<(Phase, usize, usize, MigrationStep<'_>)> = Vec::new();
        for (table_index, table) in self.tables.iter().enumerate() {
            for op in &table.operations {
                let phase = op.operation.phase();
                let order = if phase == Phase::DropTable {
                    let depth = depth_from_name(&self.collection_key, &table.table_name)
                        .unwrap_or(0);
                    usize::MAX - depth
                } else {
                    0
                };
                steps.push((
                    phase,
                    order,
                    table_index,
                    MigrationStep {
                        table: &table.table_name,
                        operation: &op.operation,
                        destructive: op.destructive,
                    },
                ));
            }
        }
        // Stable sort keeps per-table operation order.
        steps.sort_by_key(|(phase, order, index, _)| (*phase, *order, *index));
        steps.into_iter().map(|(_, _, _, step)| step).collect()
    }

    /// Descriptions of every destructive step.
    pub fn destructive_operations(&self) -> Vec<String> {
        self.steps()
            .into_iter()
            .filter(|s| s.destructive)
            .map(|s| s.describe())
            .collect()
    }

    /// Check that a plan may be applied.
    pub fn authorize(&self, confirm_destructive: bool) -> Result<()> {
        if self.is_destructive() && !confirm_destructive {
            return Err(Error::ConfirmationRequired {
                operations: self.destructive_operations(),
            });
        }
        Ok(())
    }
}

/// Result of a migration status check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationStatus {
    pub requires_migration: bool,
    pub plan: MigrationPlan,
}

/// Dry-run wrapper over [`plan`].
pub fn check_migration_status(
    compiled: &CompiledCollection,
    live: &LiveSchema,
    history: &MigrationHistory,
) -> MigrationStatus {
    let plan = plan(compiled, live, history);
    MigrationStatus {
        requires_migration: !plan.is_empty(),
        plan,
    }
}

/// Diff compiled tables against the live schema.
pub fn plan(
    compiled: &CompiledCollection,
    live: &LiveSchema,
    history: &MigrationHistory,
) -> MigrationPlan {
    let mut tables = Vec::new();

    for target in &compiled.tables {
        let operations = match live.table(&target.name) {
            None => vec![PlannedOperation {
                operation: MigrationOperation::CreateTable {
                    columns: target.columns.clone(),
                },
                destructive: false,
            }],
            Some(live_table) => diff_table(target, live_table, history),
        };
        push_table(&mut tables, &target.name, operations);
    }

    let prefix = compiled.table_prefix();
    for name in live.tables.keys() {
        if name.starts_with(&prefix) && compiled.table(name).is_none() {
            push_table(
                &mut tables,
                name,
                vec![PlannedOperation {
                    operation: MigrationOperation::DropTable,
                    destructive: true,
                }],
            );
        }
    }

    let plan = MigrationPlan {
        collection_key: compiled.key().clone(),
        tables,
    };

    tracing::debug!(
        collection = %plan.collection_key,
        operations = plan.operation_count(),
        destructive = plan.is_destructive(),
        "planned migration"
    );

    plan
}

fn push_table(tables: &mut Vec<TableMigration>, name: &str, operations: Vec<PlannedOperation>) {
    if operations.is_empty() {
        return;
    }
    tables.push(TableMigration {
        table_name: name.to_string(),
        destructive: operations.iter().any(|op| op.destructive),
        operations,
    });
}

fn diff_table(
    target: &TableSchema,
    live: &LiveTable,
    history: &MigrationHistory,
) -> Vec<PlannedOperation> {
    let mut operations = Vec::new();

    for column in &target.columns {
        match live.column(&column.name) {
            None => operations.push(PlannedOperation {
                destructive: !column.nullable && column.default.is_none(),
                operation: MigrationOperation::AddColumn {
                    column: column.clone(),
                },
            }),
            Some(live_column) => {
                let (changes, destructive) = diff_column(
                    &target.name,
                    column,
                    live_column,
                    live.foreign_keys_known,
                    history,
                );
                if !changes.is_empty() {
                    operations.push(PlannedOperation {
                        operation: MigrationOperation::AlterColumn {
                            column: column.clone(),
                            changes,
                        },
                        destructive,
                    });
                }
            }
        }
    }

    for live_column in &live.columns {
        if target.column(&live_column.name).is_none() {
            operations.push(PlannedOperation {
                operation: MigrationOperation::DropColumn {
                    column: live_column.name.clone(),
                },
                destructive: true,
            });
        }
    }

    operations
}

fn diff_column(
    table: &str,
    target: &Column,
    live: &LiveColumn,
    foreign_keys_known: bool,
    history: &MigrationHistory,
) -> (Vec<ColumnChange>, bool) {
    let mut changes = Vec::new();
    let mut destructive = false;

    match &live.data_type {
        LiveType::Known(data_type) if *data_type == target.data_type => {}
        LiveType::Known(data_type) => {
            destructive |= !data_type.widens_to(target.data_type);
            changes.push(ColumnChange::DataType {
                from: live.data_type.clone(),
                to: target.data_type,
            });
        }
        LiveType::Other(raw) => {
            // The newest applied plan says what this column was created as.
            let recorded = history
                .recorded_column(table, &target.name)
                .is_some_and(|r| r.data_type == target.data_type && r.nullable == target.nullable);
            if recorded {
                tracing::debug!(table, column = %target.name, raw, "unmapped live type matches applied plan");
            } else {
                destructive = true;
                changes.push(ColumnChange::DataType {
                    from: live.data_type.clone(),
                    to: target.data_type,
                });
            }
        }
    }

    if live.nullable != target.nullable {
        // Tightening fails on existing nulls unless a default backfills them.
        destructive |= !target.nullable && target.default.is_none();
        changes.push(ColumnChange::Nullability {
            nullable: target.nullable,
        });
    }

    if foreign_keys_known {
        let same_target = match (&live.foreign_key, &target.foreign_key) {
            (None, None) => true,
            (Some(l), Some(t)) => l.table == t.table && l.column == t.column,
            _ => false,
        };
        if !same_target {
            // Existing ids point into the old table.
            destructive |= live.foreign_key.is_some() && target.foreign_key.is_some();
            changes.push(ColumnChange::ForeignKey {
                from: live.foreign_key.clone(),
                to: target.foreign_key.clone(),
            });
        }
    }

    (changes, destructive)
}

/// The live schema that results from applying `plan` to `live`.
///
/// Used to check idempotence and by in-memory adapters.
pub fn apply_to_live(live: &LiveSchema, plan: &MigrationPlan) -> LiveSchema {
    let mut result = live.clone();
    for step in plan.steps() {
        apply_step(&mut result, step.table, step.operation);
    }
    result
}

/// Apply one operation to an in-memory live schema.
pub fn apply_step(live: &mut LiveSchema, table: &str, operation: &MigrationOperation) {
    match operation {
        MigrationOperation::CreateTable { columns } => {
            live.insert(LiveTable {
                name: table.to_string(),
                columns: columns.iter().map(LiveColumn::from_column).collect(),
                foreign_keys_known: true,
            });
        }
        MigrationOperation::AddColumn { column } => {
            if let Some(t) = live.tables.get_mut(table) {
                t.columns.push(LiveColumn::from_column(column));
            }
        }
        MigrationOperation::AlterColumn { column, .. } => {
            if let Some(t) = live.tables.get_mut(table) {
                if let Some(existing) = t.columns.iter_mut().find(|c| c.name == column.name) {
                    *existing = LiveColumn::from_column(column);
                }
            }
        }
        MigrationOperation::DropColumn { column } => {
            if let Some(t) = live.tables.get_mut(table) {
                t.columns.retain(|c| &c.name != column);
            }
        }
        MigrationOperation::DropTable => {
            live.tables.remove(table);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collection::{BrickDefinition, CollectionDefinition, FieldDefinition};
    use crate::compiler::compile;
    use crate::field::FieldType;
    use crate::snapshot::AppliedPlan;

    fn blog_fields(extra: Vec<FieldDefinition>) -> CollectionDefinition {
        let mut fields = vec![
            FieldDefinition::new("hero", FieldType::Text),
            FieldDefinition::repeater(
                "authors",
                vec![FieldDefinition::translatable("name", FieldType::Text)],
            ),
        ];
        fields.extend(extra);
        CollectionDefinition::new("blog", fields)
    }

    fn migrated(def: &CollectionDefinition) -> LiveSchema {
        let compiled = compile(def).unwrap();
        let plan = plan(&compiled, &LiveSchema::new(), &MigrationHistory::default());
        apply_to_live(&LiveSchema::new(), &plan)
    }

    #[test]
    fn fresh_database_creates_every_table() {
        let compiled = compile(&blog_fields(vec![])).unwrap();
        let plan = plan(&compiled, &LiveSchema::new(), &MigrationHistory::default());

        assert_eq!(plan.tables.len(), 2);
        assert!(plan.is_additive());
        assert!(!plan.is_destructive());
        let steps: Vec<_> = plan.steps().iter().map(|s| s.describe()).collect();
        assert_eq!(
            steps,
            vec![
                "create table tsr_blog__fields",
                "create table tsr_blog__fields__authors"
            ]
        );
    }

    #[test]
    fn second_plan_is_empty() {
        let def = blog_fields(vec![]);
        let compiled = compile(&def).unwrap();
        let live = migrated(&def);
        let again = plan(&compiled, &live, &MigrationHistory::default());
        assert!(again.is_empty());
        assert!(again.tables.is_empty());
    }

    #[test]
    fn added_field_becomes_add_column() {
        let live = migrated(&blog_fields(vec![]));
        let compiled = compile(&blog_fields(vec![FieldDefinition::new(
            "subtitle",
            FieldType::Text,
        )]))
        .unwrap();

        let plan = plan(&compiled, &live, &MigrationHistory::default());
        assert_eq!(plan.operation_count(), 1);
        assert!(!plan.is_destructive());
        assert!(matches!(
            &plan.tables[0].operations[0].operation,
            MigrationOperation::AddColumn { column } if column.name == "_subtitle"
        ));
    }

    #[test]
    fn removed_field_is_destructive_drop() {
        let live = migrated(&blog_fields(vec![FieldDefinition::new(
            "subtitle",
            FieldType::Text,
        )]));
        let compiled = compile(&blog_fields(vec![])).unwrap();

        let plan = plan(&compiled, &live, &MigrationHistory::default());
        assert!(plan.is_destructive());
        assert_eq!(
            plan.destructive_operations(),
            vec!["drop column tsr_blog__fields._subtitle"]
        );
        assert!(matches!(
            plan.authorize(false),
            Err(Error::ConfirmationRequired { operations }) if operations.len() == 1
        ));
        assert!(plan.authorize(true).is_ok());
    }

    #[test]
    fn removed_brick_drops_tables_deepest_first() {
        let with_brick = blog_fields(vec![]).with_builder_brick(BrickDefinition::new(
            "gallery",
            vec![FieldDefinition::repeater(
                "slides",
                vec![FieldDefinition::repeater(
                    "captions",
                    vec![FieldDefinition::new("text", FieldType::Text)],
                )],
            )],
        ));
        let live = migrated(&with_brick);
        let compiled = compile(&blog_fields(vec![])).unwrap();

        let plan = plan(&compiled, &live, &MigrationHistory::default());
        let steps: Vec<_> = plan.steps().iter().map(|s| s.describe()).collect();
        assert_eq!(
            steps,
            vec![
                "drop table tsr_blog__gallery__slides__captions",
                "drop table tsr_blog__gallery__slides",
                "drop table tsr_blog__gallery",
            ]
        );
        assert!(plan.steps().iter().all(|s| s.destructive));
    }

    #[test]
    fn tables_of_other_collections_are_ignored() {
        let mut live = migrated(&blog_fields(vec![]));
        live.insert(LiveTable {
            name: "tsr_news__fields".into(),
            columns: vec![],
            foreign_keys_known: true,
        });
        let compiled = compile(&blog_fields(vec![])).unwrap();
        assert!(plan(&compiled, &live, &MigrationHistory::default()).is_empty());
    }

    #[test]
    fn type_changes_flag_narrowing() {
        let live = migrated(&blog_fields(vec![FieldDefinition::new(
            "rating",
            FieldType::Number,
        )]));

        // double -> text widens
        let compiled = compile(&blog_fields(vec![FieldDefinition::new(
            "rating",
            FieldType::Text,
        )]))
        .unwrap();
        let widen = plan(&compiled, &live, &MigrationHistory::default());
        assert_eq!(widen.operation_count(), 1);
        assert!(!widen.is_destructive());
        assert!(!widen.is_additive());

        // double -> boolean narrows, and tightens nullability with a default
        let compiled = compile(&blog_fields(vec![FieldDefinition::new(
            "rating",
            FieldType::Checkbox,
        )]))
        .unwrap();
        let narrow = plan(&compiled, &live, &MigrationHistory::default());
        assert!(narrow.is_destructive());
        match &narrow.tables[0].operations[0].operation {
            MigrationOperation::AlterColumn { changes, .. } => {
                assert_eq!(changes.len(), 2);
                assert!(changes.contains(&ColumnChange::Nullability { nullable: false }));
            }
            other => panic!("unexpected operation {:?}", other),
        }
    }

    #[test]
    fn relation_retarget_is_destructive() {
        let live = migrated(&blog_fields(vec![FieldDefinition::new(
            "owner",
            FieldType::User,
        )]));
        let compiled = compile(&blog_fields(vec![FieldDefinition::new(
            "owner",
            FieldType::Media,
        )]))
        .unwrap();
        let plan = plan(&compiled, &live, &MigrationHistory::default());
        assert!(plan.is_destructive());
        match &plan.tables[0].operations[0].operation {
            MigrationOperation::AlterColumn { changes, .. } => {
                assert!(matches!(&changes[0], ColumnChange::ForeignKey { to: Some(fk), .. } if fk.table == "tsr_media"));
            }
            other => panic!("unexpected operation {:?}", other),
        }
    }

    #[test]
    fn foreign_keys_ignored_when_not_introspected() {
        let def = blog_fields(vec![FieldDefinition::new("owner", FieldType::User)]);
        let mut live = migrated(&def);
        for table in live.tables.values_mut() {
            table.foreign_keys_known = false;
            for column in &mut table.columns {
                column.foreign_key = None;
            }
        }
        let compiled = compile(&def).unwrap();
        assert!(plan(&compiled, &live, &MigrationHistory::default()).is_empty());
    }

    #[test]
    fn unmapped_type_resolved_by_applied_plan() {
        let def = blog_fields(vec![]);
        let compiled = compile(&def).unwrap();
        let initial = plan(&compiled, &LiveSchema::new(), &MigrationHistory::default());
        let mut live = apply_to_live(&LiveSchema::new(), &initial);

        // Introspection can no longer map the hero column's type.
        let hero = live
            .tables
            .get_mut("tsr_blog__fields")
            .and_then(|t| t.columns.iter_mut().find(|c| c.name == "_hero"))
            .unwrap();
        hero.data_type = LiveType::Other("character varying".into());

        let without_history = plan(&compiled, &live, &MigrationHistory::default());
        assert!(without_history.is_destructive());

        let mut history = MigrationHistory::default();
        history.push(AppliedPlan::from_plan(&compiled, &initial));
        let with_history = plan(&compiled, &live, &history);
        assert!(with_history.is_empty());
    }

    #[test]
    fn plan_mode_gates_execution() {
        let live = migrated(&blog_fields(vec![FieldDefinition::new("gone", FieldType::Text)]));
        let compiled = compile(&blog_fields(vec![])).unwrap();
        let plan = plan(&compiled, &live, &MigrationHistory::default());

        assert_eq!(PlanMode::DryRun.permits(&plan), Ok(false));
        assert!(PlanMode::Apply {
            confirm_destructive: false
        }
        .permits(&plan)
        .is_err());
        assert_eq!(
            PlanMode::Apply {
                confirm_destructive: true
            }
            .permits(&plan),
            Ok(true)
        );
    }

    #[test]
    fn status_reflects_plan() {
        let def = blog_fields(vec![]);
        let compiled = compile(&def).unwrap();
        let status =
            check_migration_status(&compiled, &LiveSchema::new(), &MigrationHistory::default());
        assert!(status.requires_migration);

        let status = check_migration_status(&compiled, &migrated(&def), &MigrationHistory::default());
        assert!(!status.requires_migration);
    }

    #[test]
    fn plan_serialization() {
        let compiled = compile(&blog_fields(vec![])).unwrap();
        let plan = plan(&compiled, &LiveSchema::new(), &MigrationHistory::default());
        let json = serde_json::to_value(&plan).unwrap();
        assert_eq!(json["tables"][0]["operations"][0]["op"], "createTable");
        let parsed: MigrationPlan = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, plan);
    }
}
