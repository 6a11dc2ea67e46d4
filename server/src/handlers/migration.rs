//! Migration handlers - status checks and plan execution.

use serde::Deserialize;
use tessera_engine::{MigrationStatus, PlanMode};

use crate::error::Result;
use crate::migrate::ApplyReport;
use crate::AppState;

/// Request body for applying a migration.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MigrationRequest {
    /// Compute the plan without executing it
    pub dry_run: bool,
    /// Allow steps that can lose data
    pub confirm_destructive: bool,
}

impl MigrationRequest {
    pub fn mode(&self) -> PlanMode {
        if self.dry_run {
            PlanMode::DryRun
        } else {
            PlanMode::Apply {
                confirm_destructive: self.confirm_destructive,
            }
        }
    }
}

/// Plan a collection's migration without touching the schema.
pub async fn handle_migration_status(state: &AppState, key: &str) -> Result<MigrationStatus> {
    let compiled = state.registry.require(key)?;
    let status = state.runner().check_status(&compiled).await?;
    tracing::debug!(
        collection = %key,
        requires_migration = status.requires_migration,
        operations = status.plan.operation_count(),
        "checked migration status"
    );
    Ok(status)
}

/// Re-plan and execute a collection's migration.
pub async fn handle_migration_apply(
    state: &AppState,
    key: &str,
    request: MigrationRequest,
) -> Result<ApplyReport> {
    let compiled = state.registry.require(key)?;
    let report = state.runner().apply(&compiled, request.mode()).await?;
    Ok(report)
}
