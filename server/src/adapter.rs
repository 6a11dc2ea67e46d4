//! Schema adapter: how migrations see and change the database.
//!
//! The planner in `tessera_engine` is pure. Everything that talks to the
//! database on its behalf goes through [`SchemaAdapter`], so the runner can be
//! exercised against an in-memory implementation.

use std::future::Future;

use sqlx::{PgPool, Row};
use tessera_engine::{
    AppliedPlan, Dialect, LiveColumn, LiveForeignKey, LiveTable, MigrationOperation, Postgres,
};

/// Errors raised while introspecting or changing the schema.
#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    /// The live schema could not be read. Retrying later may succeed.
    #[error("introspection of '{table}' failed: {message}")]
    Introspection { table: String, message: String },

    #[error("step '{step}' failed: {message}")]
    Execution { step: String, message: String },

    #[error(transparent)]
    Engine(#[from] tessera_engine::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Database access needed by the migration runner.
pub trait SchemaAdapter: Send + Sync {
    /// Introspect one table; `None` when it does not exist.
    fn describe_table(
        &self,
        table: &str,
    ) -> impl Future<Output = Result<Option<LiveTable>, AdapterError>> + Send;

    /// Names of the existing tables starting with `prefix`.
    fn list_tables(
        &self,
        prefix: &str,
    ) -> impl Future<Output = Result<Vec<String>, AdapterError>> + Send;

    /// Execute one operation, atomically where the dialect allows it.
    fn execute(
        &self,
        table: &str,
        operation: &MigrationOperation,
    ) -> impl Future<Output = Result<(), AdapterError>> + Send;

    /// Applied plans of a collection, oldest first.
    fn load_applied_plans(
        &self,
        collection: &str,
    ) -> impl Future<Output = Result<Vec<AppliedPlan>, AdapterError>> + Send;

    fn record_applied_plan(
        &self,
        plan: &AppliedPlan,
    ) -> impl Future<Output = Result<(), AdapterError>> + Send;
}

/// [`SchemaAdapter`] over a Postgres pool.
#[derive(Debug, Clone)]
pub struct PgSchemaAdapter {
    pool: PgPool,
}

impl PgSchemaAdapter {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn foreign_keys(
        &self,
        table: &str,
    ) -> Result<Vec<(String, LiveForeignKey)>, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT kcu.column_name::text AS column_name,
                   tc.constraint_name::text AS constraint_name,
                   ccu.table_name::text AS foreign_table,
                   ccu.column_name::text AS foreign_column
            FROM information_schema.table_constraints tc
            JOIN information_schema.key_column_usage kcu
              ON tc.constraint_name = kcu.constraint_name
             AND tc.table_schema = kcu.table_schema
            JOIN information_schema.constraint_column_usage ccu
              ON ccu.constraint_name = tc.constraint_name
             AND ccu.table_schema = tc.table_schema
            WHERE tc.constraint_type = 'FOREIGN KEY'
              AND tc.table_schema = current_schema()
              AND tc.table_name = $1
            "#,
        )
        .bind(table)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> Result<(String, LiveForeignKey), sqlx::Error> {
                Ok((
                    row.try_get("column_name")?,
                    LiveForeignKey {
                        constraint: row.try_get("constraint_name")?,
                        table: row.try_get("foreign_table")?,
                        column: row.try_get("foreign_column")?,
                    },
                ))
            })
            .collect()
    }
}

impl SchemaAdapter for PgSchemaAdapter {
    async fn describe_table(&self, table: &str) -> Result<Option<LiveTable>, AdapterError> {
        let introspection = |e: sqlx::Error| AdapterError::Introspection {
            table: table.to_string(),
            message: e.to_string(),
        };

        let rows = sqlx::query(
            r#"
            SELECT column_name::text AS column_name,
                   data_type::text AS data_type,
                   is_nullable::text AS is_nullable
            FROM information_schema.columns
            WHERE table_schema = current_schema() AND table_name = $1
            ORDER BY ordinal_position
            "#,
        )
        .bind(table)
        .fetch_all(&self.pool)
        .await
        .map_err(introspection)?;

        if rows.is_empty() {
            return Ok(None);
        }

        let foreign_keys = self.foreign_keys(table).await.map_err(introspection)?;

        let columns = rows
            .iter()
            .map(|row| -> Result<LiveColumn, sqlx::Error> {
                let name: String = row.try_get("column_name")?;
                let data_type: String = row.try_get("data_type")?;
                let nullable: String = row.try_get("is_nullable")?;
                let foreign_key = foreign_keys
                    .iter()
                    .find(|(column, _)| *column == name)
                    .map(|(_, fk)| fk.clone());
                Ok(LiveColumn {
                    name,
                    data_type: Postgres.parse_type(&data_type),
                    nullable: nullable == "YES",
                    foreign_key,
                })
            })
            .collect::<Result<Vec<_>, sqlx::Error>>()
            .map_err(introspection)?;

        Ok(Some(LiveTable {
            name: table.to_string(),
            columns,
            foreign_keys_known: true,
        }))
    }

    async fn list_tables(&self, prefix: &str) -> Result<Vec<String>, AdapterError> {
        let pattern = format!("{}%", prefix.replace('\\', "\\\\").replace('_', "\\_"));
        sqlx::query_scalar(
            r#"
            SELECT table_name::text
            FROM information_schema.tables
            WHERE table_schema = current_schema() AND table_name LIKE $1
            ORDER BY table_name
            "#,
        )
        .bind(pattern)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AdapterError::Introspection {
            table: prefix.to_string(),
            message: e.to_string(),
        })
    }

    async fn execute(
        &self,
        table: &str,
        operation: &MigrationOperation,
    ) -> Result<(), AdapterError> {
        let step = operation.describe(table);
        let statements = Postgres.render(table, operation)?;
        let failed = |e: sqlx::Error| AdapterError::Execution {
            step: step.clone(),
            message: e.to_string(),
        };

        let mut tx = self.pool.begin().await?;
        for statement in &statements {
            tracing::debug!(table, statement = %statement, "executing migration statement");
            sqlx::query(statement)
                .execute(&mut *tx)
                .await
                .map_err(failed)?;
        }
        tx.commit().await.map_err(failed)?;
        Ok(())
    }

    async fn load_applied_plans(&self, collection: &str) -> Result<Vec<AppliedPlan>, AdapterError> {
        let rows: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT plan::text
            FROM tsr_migration_plans
            WHERE collection_key = $1
            ORDER BY id
            "#,
        )
        .bind(collection)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AdapterError::Introspection {
            table: "tsr_migration_plans".into(),
            message: e.to_string(),
        })?;

        Ok(rows
            .iter()
            .map(|json| AppliedPlan::from_json(json))
            .collect::<Result<Vec<_>, _>>()?)
    }

    async fn record_applied_plan(&self, plan: &AppliedPlan) -> Result<(), AdapterError> {
        let json = plan.to_json()?;
        sqlx::query("INSERT INTO tsr_migration_plans (collection_key, plan) VALUES ($1, $2::jsonb)")
            .bind(&plan.collection_key)
            .bind(json)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
