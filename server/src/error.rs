//! Unified error handling for the server.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tessera_engine::Error as EngineError;

use crate::adapter::AdapterError;
use crate::migrate::{ApplyReport, MigrateError};

/// Application error type.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("Schema adapter error: {0}")]
    Adapter(#[from] AdapterError),

    #[error("Migration stopped after {} step(s)", .0.applied.len())]
    PartialApply(Box<ApplyReport>),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<MigrateError> for AppError {
    fn from(err: MigrateError) -> Self {
        match err {
            MigrateError::Adapter(e) => AppError::Adapter(e),
            MigrateError::Engine(e) => AppError::Engine(e),
            MigrateError::Partial(report) => AppError::PartialApply(report),
        }
    }
}

/// Error response body.
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    retryable: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    report: Option<ApplyReport>,
}

impl ErrorResponse {
    fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            details: None,
            retryable: None,
            report: None,
        }
    }

    fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

/// Status code for an engine error.
fn engine_status(err: &EngineError) -> StatusCode {
    match err {
        EngineError::ConfirmationRequired { .. }
        | EngineError::MigrationRequired(_)
        | EngineError::SameVersionType { .. }
        | EngineError::RevisionSource(_) => StatusCode::CONFLICT,
        EngineError::VersionNotFound(_) => StatusCode::NOT_FOUND,
        EngineError::InvalidTargetVersion(_) | EngineError::InvalidEnvironment(_) => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        EngineError::UnsupportedOperation { .. } | EngineError::InvalidSnapshot(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
        e if e.is_definition_error() => StatusCode::BAD_REQUEST,
        _ => StatusCode::UNPROCESSABLE_ENTITY,
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            AppError::Database(e) => {
                tracing::error!("Database error: {:?}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorResponse::new("Database error"),
                )
            }
            AppError::Engine(e) => {
                let status = engine_status(&e);
                if status.is_server_error() {
                    tracing::error!("Engine error: {:?}", e);
                } else {
                    tracing::warn!("Engine error: {:?}", e);
                }
                let mut body = ErrorResponse::new(e.to_string());
                if let EngineError::ConfirmationRequired { operations } = &e {
                    body = body.with_details(operations.join("; "));
                }
                (status, body)
            }
            AppError::Adapter(AdapterError::Introspection { table, message }) => {
                tracing::warn!(table = %table, "Schema introspection failed: {}", message);
                let mut body = ErrorResponse::new("Schema introspection failed")
                    .with_details(format!("{}: {}", table, message));
                body.retryable = Some(true);
                (StatusCode::SERVICE_UNAVAILABLE, body)
            }
            AppError::Adapter(AdapterError::Engine(e)) => return AppError::Engine(e).into_response(),
            AppError::Adapter(e) => {
                tracing::error!("Schema adapter error: {:?}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorResponse::new("Schema adapter error").with_details(e.to_string()),
                )
            }
            AppError::PartialApply(report) => {
                tracing::error!(
                    collection = %report.collection_key,
                    applied = report.applied.len(),
                    skipped = report.skipped.len(),
                    "Migration stopped"
                );
                let mut body = ErrorResponse::new("Migration stopped before completion");
                body.details = report.failed.as_ref().map(|f| f.error.clone());
                body.report = Some(*report);
                (StatusCode::INTERNAL_SERVER_ERROR, body)
            }
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, ErrorResponse::new(msg)),
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorResponse::new("Internal server error").with_details(msg),
                )
            }
        };

        (status, Json(body)).into_response()
    }
}

/// Result type alias for handlers.
pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrate::FailedStep;

    async fn body(err: AppError) -> (StatusCode, serde_json::Value) {
        let response = err.into_response();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn introspection_failure_is_retryable() {
        let (status, json) = body(AppError::Adapter(AdapterError::Introspection {
            table: "tsr_blog__fields".into(),
            message: "timeout".into(),
        }))
        .await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(json["retryable"], true);
    }

    #[tokio::test]
    async fn confirmation_lists_operations() {
        let (status, json) = body(AppError::Engine(EngineError::ConfirmationRequired {
            operations: vec!["drop table tsr_blog__quote".into()],
        }))
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(json["details"], "drop table tsr_blog__quote");
    }

    #[tokio::test]
    async fn partial_apply_carries_report() {
        let report = ApplyReport {
            collection_key: "blog".into(),
            dry_run: false,
            applied: vec!["create table tsr_blog__fields".into()],
            failed: Some(FailedStep {
                step: "create table tsr_blog__fields__authors".into(),
                error: "disk full".into(),
            }),
            skipped: vec![],
        };
        let (status, json) = body(AppError::PartialApply(Box::new(report))).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(json["report"]["applied"][0], "create table tsr_blog__fields");
        assert_eq!(json["details"], "disk full");
    }

    #[test]
    fn engine_status_codes() {
        assert_eq!(
            engine_status(&EngineError::MigrationRequired("blog".into())),
            StatusCode::CONFLICT
        );
        assert_eq!(
            engine_status(&EngineError::InvalidTargetVersion("draft".into())),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            engine_status(&EngineError::UnknownBrick("quote".into())),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            engine_status(&EngineError::ReservedBrickKey("fields".into())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            engine_status(&EngineError::VersionNotFound(9)),
            StatusCode::NOT_FOUND
        );
    }
}
