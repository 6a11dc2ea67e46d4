//! # Tessera Engine
//!
//! The deterministic core of a content-modeling engine.
//!
//! Authors describe collections as trees of typed fields. This crate compiles
//! those trees into relational table schemas, plans migrations against the
//! live database, flattens nested document input into per-locale rows and
//! rebuilds the nested tree from rows. It also holds the document version
//! state machine used for promotion.
//!
//! ## Design Principles
//!
//! - **No IO**: introspection, DDL execution and row storage belong to the caller
//! - **Deterministic**: same inputs always produce the same outputs
//! - **Explicit locales**: every call takes its [`Locales`]
//!
//! ## Core Concepts
//!
//! ### Compilation
//!
//! [`compile`] walks a [`CollectionDefinition`] depth first and emits one
//! [`TableSchema`] for the document fields, one per brick and one per
//! repeater nesting level. Names are pure functions of the keys.
//!
//! ### Migration
//!
//! [`plan`] diffs compiled tables against a [`LiveSchema`] and returns an
//! ordered [`MigrationPlan`]. Destructive steps need explicit confirmation,
//! see [`MigrationPlan::authorize`]. A [`Dialect`] renders steps as DDL.
//!
//! ### Composition
//!
//! [`compose`] turns a [`DocumentInput`] into a [`RowSet`]; [`decompose`]
//! turns rows and a [`RelationLookup`] back into a [`DocumentResponse`].
//!
//! ## Quick Start
//!
//! ```rust
//! use tessera_engine::{
//!     compile, compose, decompose, plan, CollectionDefinition, DocumentInput,
//!     FieldDefinition, FieldInput, FieldType, LiveSchema, Locales, MigrationHistory,
//!     RelationLookup,
//! };
//! use serde_json::json;
//!
//! // 1. Define and compile a collection
//! let definition = CollectionDefinition::new(
//!     "blog",
//!     vec![FieldDefinition::translatable("title", FieldType::Text)],
//! );
//! let compiled = compile(&definition).unwrap();
//!
//! // 2. Plan against an empty database
//! let plan = plan(&compiled, &LiveSchema::new(), &MigrationHistory::default());
//! assert_eq!(plan.operation_count(), 1);
//!
//! // 3. Compose and decompose a document
//! let locales = Locales::parse("en,fr").unwrap();
//! let input = DocumentInput {
//!     fields: vec![FieldInput::translations(
//!         "title",
//!         [("en", json!("Hello")), ("fr", json!("Bonjour"))],
//!     )],
//!     bricks: vec![],
//! };
//! let rows = compose(&compiled, &input, 1, 1, &locales).unwrap();
//! assert_eq!(rows.len(), 2);
//!
//! let doc = decompose(&compiled, &rows, &RelationLookup::new(), &locales);
//! assert_eq!(doc.into_input(), input);
//! ```

pub mod collection;
pub mod compiler;
pub mod compose;
pub mod decompose;
pub mod dialect;
pub mod error;
pub mod field;
pub mod migration;
pub mod relation;
pub mod rows;
pub mod schema;
pub mod snapshot;
pub mod version;

// Re-export main types at crate root
pub use collection::{
    BrickDefinition, BrickKind, CollectionConfig, CollectionDefinition, DefinitionParseError,
    FieldDefinition, FieldValidation,
};
pub use compiler::{compile, CompiledCollection};
pub use compose::{compose, BrickInput, DocumentInput, FieldInput, GroupInput, Locales};
pub use decompose::{decompose, BrickResponse, DocumentResponse, FieldResponse, GroupResponse};
pub use dialect::{Dialect, Postgres, Sqlite};
pub use error::Error;
pub use field::{FieldCapabilities, FieldType, RelationKind};
pub use migration::{
    check_migration_status, plan, ColumnChange, LiveColumn, LiveForeignKey, LiveSchema, LiveTable,
    LiveType, MigrationOperation, MigrationPlan, MigrationStatus, MigrationStep, PlanMode,
    PlannedOperation, TableMigration,
};
pub use relation::RelationLookup;
pub use rows::{BrickRow, ColumnValue, RowSet, TableRows};
pub use schema::{Column, DataType, TableKind, TableSchema};
pub use snapshot::{AppliedPlan, MigrationHistory, SNAPSHOT_FORMAT_VERSION};
pub use version::{
    plan_promotion, sync_status, DisplacedAction, DisplacedVersion, DocumentVersion,
    EnvironmentStatus, NewVersion, PromotionPlan, PromotionRequest, VersionType,
};

/// Type aliases for clarity
pub type CollectionKey = String;
pub type DocumentId = i64;
pub type VersionId = i64;
pub type Locale = String;
