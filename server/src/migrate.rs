//! Migration runner: introspect, plan, execute and record.

use std::collections::BTreeSet;
use std::sync::Arc;

use dashmap::DashMap;
use futures::future::try_join_all;
use serde::Serialize;
use tessera_engine::{
    check_migration_status, AppliedPlan, CollectionKey, CompiledCollection, LiveSchema,
    MigrationHistory, MigrationStatus, PlanMode,
};
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::adapter::{AdapterError, SchemaAdapter};

/// One mutex per collection so two applies never interleave.
#[derive(Debug, Clone, Default)]
pub struct MigrationLocks {
    locks: Arc<DashMap<CollectionKey, Arc<Mutex<()>>>>,
}

impl MigrationLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to a collection's schema.
    pub async fn acquire(&self, collection: &str) -> OwnedMutexGuard<()> {
        let lock = Arc::clone(self.locks.entry(collection.to_string()).or_default().value());
        lock.lock_owned().await
    }
}

/// A step that failed to execute.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailedStep {
    pub step: String,
    pub error: String,
}

/// What an apply call did, step by step.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplyReport {
    pub collection_key: CollectionKey,
    pub dry_run: bool,
    pub applied: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed: Option<FailedStep>,
    pub skipped: Vec<String>,
}

impl ApplyReport {
    fn new(collection_key: &str, dry_run: bool) -> Self {
        Self {
            collection_key: collection_key.to_string(),
            dry_run,
            applied: Vec::new(),
            failed: None,
            skipped: Vec::new(),
        }
    }
}

/// Migration failures.
#[derive(Debug, thiserror::Error)]
pub enum MigrateError {
    #[error(transparent)]
    Adapter(#[from] AdapterError),

    #[error(transparent)]
    Engine(#[from] tessera_engine::Error),

    /// Some steps ran before one failed. Executed steps are not rolled back.
    #[error("migration of '{}' stopped after {} step(s)", .0.collection_key, .0.applied.len())]
    Partial(Box<ApplyReport>),
}

/// Runs migration plans through a [`SchemaAdapter`].
#[derive(Debug, Clone)]
pub struct MigrationRunner<A> {
    adapter: A,
    locks: MigrationLocks,
}

impl<A: SchemaAdapter> MigrationRunner<A> {
    pub fn new(adapter: A, locks: MigrationLocks) -> Self {
        Self { adapter, locks }
    }

    /// Introspect every table the collection has or should have.
    pub async fn live_schema(
        &self,
        compiled: &CompiledCollection,
    ) -> Result<LiveSchema, AdapterError> {
        let mut names: BTreeSet<String> = self
            .adapter
            .list_tables(&compiled.table_prefix())
            .await?
            .into_iter()
            .collect();
        names.extend(compiled.table_names().map(str::to_string));

        let tables = try_join_all(names.iter().map(|name| self.adapter.describe_table(name))).await?;

        let mut live = LiveSchema::new();
        for table in tables.into_iter().flatten() {
            live.insert(table);
        }
        Ok(live)
    }

    pub async fn history(
        &self,
        compiled: &CompiledCollection,
    ) -> Result<MigrationHistory, AdapterError> {
        let plans = self.adapter.load_applied_plans(compiled.key()).await?;
        Ok(MigrationHistory::new(plans))
    }

    /// Dry run: what would a migration do right now.
    pub async fn check_status(
        &self,
        compiled: &CompiledCollection,
    ) -> Result<MigrationStatus, AdapterError> {
        let (live, history) =
            futures::try_join!(self.live_schema(compiled), self.history(compiled))?;
        Ok(check_migration_status(compiled, &live, &history))
    }

    /// Re-plan under the collection lock and execute the plan if `mode`
    /// permits it.
    ///
    /// Steps run in plan order. The first failure stops the run and is
    /// returned as [`MigrateError::Partial`]; the snapshot is only recorded
    /// once every step succeeded.
    pub async fn apply(
        &self,
        compiled: &CompiledCollection,
        mode: PlanMode,
    ) -> Result<ApplyReport, MigrateError> {
        let key = compiled.key();
        let _guard = self.locks.acquire(key).await;

        let plan = self.check_status(compiled).await?.plan;
        let steps = plan.steps();
        let descriptions: Vec<String> = steps.iter().map(|s| s.describe()).collect();

        if !mode.permits(&plan)? {
            let mut report = ApplyReport::new(key, mode == PlanMode::DryRun);
            report.skipped = descriptions;
            return Ok(report);
        }

        tracing::info!(
            collection = %key,
            steps = steps.len(),
            destructive = plan.is_destructive(),
            "applying migration"
        );

        let mut report = ApplyReport::new(key, false);
        for (index, step) in steps.iter().enumerate() {
            let description = &descriptions[index];
            match self.adapter.execute(step.table, step.operation).await {
                Ok(()) => {
                    tracing::info!(collection = %key, table = step.table, step = %description, "applied migration step");
                    report.applied.push(description.clone());
                }
                Err(e) => {
                    tracing::error!(collection = %key, table = step.table, step = %description, error = %e, "migration step failed");
                    report.failed = Some(FailedStep {
                        step: description.clone(),
                        error: e.to_string(),
                    });
                    report.skipped = descriptions[index + 1..].to_vec();
                    return Err(MigrateError::Partial(Box::new(report)));
                }
            }
        }

        self.adapter
            .record_applied_plan(&AppliedPlan::from_plan(compiled, &plan))
            .await?;

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;
    use tessera_engine::migration::apply_step;
    use tessera_engine::{
        compile, CollectionDefinition, Error, FieldDefinition, FieldType, LiveTable, LiveType,
        MigrationOperation,
    };

    /// In-memory database schema.
    #[derive(Default)]
    struct MemoryAdapter {
        live: StdMutex<LiveSchema>,
        plans: StdMutex<Vec<AppliedPlan>>,
        executed: StdMutex<Vec<String>>,
        fail_on: Option<String>,
        unreachable: bool,
        history_unavailable: bool,
    }

    impl MemoryAdapter {
        fn executed(&self) -> Vec<String> {
            self.executed.lock().unwrap().clone()
        }

        fn plan_count(&self) -> usize {
            self.plans.lock().unwrap().len()
        }
    }

    impl SchemaAdapter for &MemoryAdapter {
        async fn describe_table(&self, table: &str) -> Result<Option<LiveTable>, AdapterError> {
            if self.unreachable {
                return Err(AdapterError::Introspection {
                    table: table.to_string(),
                    message: "connection refused".into(),
                });
            }
            Ok(self.live.lock().unwrap().table(table).cloned())
        }

        async fn list_tables(&self, prefix: &str) -> Result<Vec<String>, AdapterError> {
            Ok(self
                .live
                .lock()
                .unwrap()
                .tables
                .keys()
                .filter(|name| name.starts_with(prefix))
                .cloned()
                .collect())
        }

        async fn execute(
            &self,
            table: &str,
            operation: &MigrationOperation,
        ) -> Result<(), AdapterError> {
            let step = operation.describe(table);
            if self.fail_on.as_deref() == Some(step.as_str()) {
                return Err(AdapterError::Execution {
                    step,
                    message: "disk full".into(),
                });
            }
            apply_step(&mut self.live.lock().unwrap(), table, operation);
            self.executed.lock().unwrap().push(step);
            Ok(())
        }

        async fn load_applied_plans(
            &self,
            collection: &str,
        ) -> Result<Vec<AppliedPlan>, AdapterError> {
            if self.history_unavailable {
                return Err(AdapterError::Introspection {
                    table: "tsr_migration_plans".into(),
                    message: "connection reset".into(),
                });
            }
            Ok(self
                .plans
                .lock()
                .unwrap()
                .iter()
                .filter(|p| p.collection_key == collection)
                .cloned()
                .collect())
        }

        async fn record_applied_plan(&self, plan: &AppliedPlan) -> Result<(), AdapterError> {
            self.plans.lock().unwrap().push(plan.clone());
            Ok(())
        }
    }

    fn blog(with_subtitle: bool) -> CompiledCollection {
        let mut fields = vec![
            FieldDefinition::translatable("title", FieldType::Text),
            FieldDefinition::repeater(
                "authors",
                vec![FieldDefinition::new("name", FieldType::Text)],
            ),
        ];
        if with_subtitle {
            fields.push(FieldDefinition::new("subtitle", FieldType::Text));
        }
        compile(&CollectionDefinition::new("blog", fields)).unwrap()
    }

    fn runner(adapter: &MemoryAdapter) -> MigrationRunner<&MemoryAdapter> {
        MigrationRunner::new(adapter, MigrationLocks::new())
    }

    const APPLY: PlanMode = PlanMode::Apply {
        confirm_destructive: false,
    };

    #[tokio::test]
    async fn fresh_apply_creates_tables_and_records_plan() {
        let adapter = MemoryAdapter::default();
        let runner = runner(&adapter);
        let compiled = blog(false);

        let report = runner.apply(&compiled, APPLY).await.unwrap();
        assert_eq!(
            report.applied,
            vec![
                "create table tsr_blog__fields",
                "create table tsr_blog__fields__authors"
            ]
        );
        assert!(report.failed.is_none());
        assert_eq!(adapter.plan_count(), 1);

        let status = runner.check_status(&compiled).await.unwrap();
        assert!(!status.requires_migration);

        // Nothing left to do, nothing recorded.
        let again = runner.apply(&compiled, APPLY).await.unwrap();
        assert!(again.applied.is_empty());
        assert_eq!(adapter.plan_count(), 1);
    }

    #[tokio::test]
    async fn dry_run_touches_nothing() {
        let adapter = MemoryAdapter::default();
        let report = runner(&adapter)
            .apply(&blog(false), PlanMode::DryRun)
            .await
            .unwrap();

        assert!(report.dry_run);
        assert_eq!(report.skipped.len(), 2);
        assert!(adapter.executed().is_empty());
        assert_eq!(adapter.plan_count(), 0);
    }

    #[tokio::test]
    async fn destructive_plan_needs_confirmation() {
        let adapter = MemoryAdapter::default();
        let runner = runner(&adapter);
        runner.apply(&blog(true), APPLY).await.unwrap();
        let executed = adapter.executed().len();

        let err = runner.apply(&blog(false), APPLY).await.unwrap_err();
        match err {
            MigrateError::Engine(Error::ConfirmationRequired { operations }) => {
                assert_eq!(operations, vec!["drop column tsr_blog__fields._subtitle"]);
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(adapter.executed().len(), executed);

        let confirmed = PlanMode::Apply {
            confirm_destructive: true,
        };
        let report = runner.apply(&blog(false), confirmed).await.unwrap();
        assert_eq!(report.applied, vec!["drop column tsr_blog__fields._subtitle"]);
        assert_eq!(adapter.plan_count(), 2);
    }

    #[tokio::test]
    async fn stops_at_first_failure() {
        let adapter = MemoryAdapter {
            fail_on: Some("create table tsr_blog__fields__authors".into()),
            ..Default::default()
        };
        let err = runner(&adapter)
            .apply(&blog(true), APPLY)
            .await
            .unwrap_err();

        let MigrateError::Partial(report) = err else {
            panic!("expected a partial apply");
        };
        assert_eq!(report.applied, vec!["create table tsr_blog__fields"]);
        assert_eq!(
            report.failed.as_ref().map(|f| f.step.as_str()),
            Some("create table tsr_blog__fields__authors")
        );
        assert!(report.skipped.is_empty());
        assert_eq!(adapter.plan_count(), 0);
    }

    #[tokio::test]
    async fn introspection_failure_is_reported() {
        let adapter = MemoryAdapter {
            unreachable: true,
            ..Default::default()
        };
        let err = runner(&adapter).check_status(&blog(false)).await.unwrap_err();
        assert!(matches!(err, AdapterError::Introspection { .. }));
    }

    #[tokio::test]
    async fn history_failure_is_reported() {
        let adapter = MemoryAdapter {
            history_unavailable: true,
            ..Default::default()
        };
        let runner = runner(&adapter);
        let err = runner.check_status(&blog(false)).await.unwrap_err();
        assert!(
            matches!(err, AdapterError::Introspection { ref table, .. } if table == "tsr_migration_plans")
        );

        let err = runner.apply(&blog(false), APPLY).await.unwrap_err();
        assert!(matches!(
            err,
            MigrateError::Adapter(AdapterError::Introspection { .. })
        ));
        assert!(adapter.executed().is_empty());
    }

    #[tokio::test]
    async fn concurrent_applies_are_serialized() {
        let adapter = MemoryAdapter::default();
        let runner = runner(&adapter);
        let compiled = blog(false);

        let (a, b) = tokio::join!(
            runner.apply(&compiled, APPLY),
            runner.apply(&compiled, APPLY)
        );
        let total = a.unwrap().applied.len() + b.unwrap().applied.len();
        assert_eq!(total, 2);
        assert_eq!(adapter.executed().len(), 2);
        assert_eq!(adapter.plan_count(), 1);
    }

    #[tokio::test]
    async fn unmapped_live_type_matches_recorded_plan() {
        let adapter = MemoryAdapter::default();
        let runner = runner(&adapter);
        let compiled = blog(false);
        runner.apply(&compiled, APPLY).await.unwrap();

        {
            let mut live = adapter.live.lock().unwrap();
            let table = live.tables.get_mut("tsr_blog__fields").unwrap();
            let column = table.columns.iter_mut().find(|c| c.name == "_title").unwrap();
            column.data_type = LiveType::Other("citext".into());
        }

        let status = runner.check_status(&compiled).await.unwrap();
        assert!(!status.requires_migration);

        // Without history the same column needs an alter.
        adapter.plans.lock().unwrap().clear();
        let status = runner.check_status(&compiled).await.unwrap();
        assert!(status.requires_migration);
        assert!(status.plan.is_destructive());
    }
}
