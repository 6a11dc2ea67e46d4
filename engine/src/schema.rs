//! Table schema descriptors and the naming scheme shared by the compiler,
//! the migration planner and the brick table codec.
//!
//! Names are pure functions of the collection key, brick key and repeater
//! path, so the same definition always compiles to byte-identical names.

use crate::field::{FieldType, DOCUMENTS_TABLE, VERSIONS_TABLE};
use crate::{error::Result, Error};
use serde::{Deserialize, Serialize};

/// Prefix of every table the compiler emits.
pub const TABLE_PREFIX: &str = "tsr_";
/// Separator between name segments. Keys can never contain it.
pub const SEGMENT_SEPARATOR: &str = "__";
/// Marker prefix of field columns, keeping them apart from system columns.
pub const FIELD_COLUMN_PREFIX: &str = "_";
/// Longest identifier accepted by the supported databases.
pub const MAX_IDENTIFIER_LEN: usize = 63;

/// Name segment of the document fields table.
pub const DOCUMENT_FIELDS_SEGMENT: &str = "fields";

/// Logical column data types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    Integer,
    Double,
    Text,
    Boolean,
    Timestamp,
    Json,
}

impl DataType {
    /// Whether converting a column from `self` to `target` keeps every value.
    pub fn widens_to(self, target: DataType) -> bool {
        use DataType::*;
        self == target
            || matches!(
                (self, target),
                (Integer, Double)
                    | (Integer, Text)
                    | (Double, Text)
                    | (Boolean, Text)
                    | (Timestamp, Text)
                    | (Integer, Json)
                    | (Double, Json)
                    | (Text, Json)
                    | (Boolean, Json)
            )
    }
}

impl std::fmt::Display for DataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            DataType::Integer => "integer",
            DataType::Double => "double",
            DataType::Text => "text",
            DataType::Boolean => "boolean",
            DataType::Timestamp => "timestamp",
            DataType::Json => "json",
        };
        f.write_str(name)
    }
}

/// Column default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum DefaultValue {
    Boolean(bool),
    Integer(i64),
    Double(f64),
    Text(String),
    Json(serde_json::Value),
}

impl DefaultValue {
    /// Build a default from a field's declared default value.
    pub fn from_json(data_type: DataType, value: &serde_json::Value) -> Option<Self> {
        match (data_type, value) {
            (DataType::Boolean, serde_json::Value::Bool(b)) => Some(DefaultValue::Boolean(*b)),
            (DataType::Integer, v) => v.as_i64().map(DefaultValue::Integer),
            (DataType::Double, v) => v.as_f64().map(DefaultValue::Double),
            (DataType::Text, serde_json::Value::String(s)) => Some(DefaultValue::Text(s.clone())),
            (DataType::Json, v) if !v.is_null() => Some(DefaultValue::Json(v.clone())),
            _ => None,
        }
    }
}

/// Foreign key delete behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OnDelete {
    Cascade,
    SetNull,
}

/// A foreign key from one column to `table.column`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForeignKey {
    pub table: String,
    pub column: String,
    pub on_delete: OnDelete,
}

impl ForeignKey {
    /// Reference the `id` column of a table.
    pub fn to_id(table: impl Into<String>, on_delete: OnDelete) -> Self {
        Self {
            table: table.into(),
            column: "id".to_string(),
            on_delete,
        }
    }
}

/// Framework columns present on every compiled table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SystemColumn {
    Id,
    DocumentId,
    DocumentVersionId,
    Locale,
    Position,
    IsOpen,
    BrickInstanceId,
    GroupRef,
    ParentIdRef,
    ParentId,
}

impl SystemColumn {
    /// Column name. None of these start with [`FIELD_COLUMN_PREFIX`].
    pub fn name(self) -> &'static str {
        match self {
            SystemColumn::Id => "id",
            SystemColumn::DocumentId => "document_id",
            SystemColumn::DocumentVersionId => "document_version_id",
            SystemColumn::Locale => "locale",
            SystemColumn::Position => "position",
            SystemColumn::IsOpen => "is_open",
            SystemColumn::BrickInstanceId => "brick_instance_id",
            SystemColumn::GroupRef => "group_ref",
            SystemColumn::ParentIdRef => "parent_id_ref",
            SystemColumn::ParentId => "parent_id",
        }
    }
}

/// What a column stores.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "camelCase")]
pub enum ColumnRole {
    System { column: SystemColumn },
    #[serde(rename_all = "camelCase")]
    Field {
        key: String,
        field_type: FieldType,
        translatable: bool,
    },
}

/// A column descriptor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Column {
    pub name: String,
    pub data_type: DataType,
    pub nullable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<DefaultValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub foreign_key: Option<ForeignKey>,
    #[serde(default)]
    pub primary_key: bool,
    pub role: ColumnRole,
}

impl Column {
    /// A framework column.
    pub fn system(column: SystemColumn, data_type: DataType, nullable: bool) -> Self {
        Self {
            name: column.name().to_string(),
            data_type,
            nullable,
            default: None,
            foreign_key: None,
            primary_key: false,
            role: ColumnRole::System { column },
        }
    }

    fn references(mut self, fk: ForeignKey) -> Self {
        self.foreign_key = Some(fk);
        self
    }

    fn with_default(mut self, default: DefaultValue) -> Self {
        self.default = Some(default);
        self
    }

    /// The field key this column stores, if it is a field column.
    pub fn field_key(&self) -> Option<&str> {
        match &self.role {
            ColumnRole::Field { key, .. } => Some(key),
            ColumnRole::System { .. } => None,
        }
    }

    /// Whether this column is a framework column.
    pub fn is_system(&self) -> bool {
        matches!(self.role, ColumnRole::System { .. })
    }
}

/// Kind of compiled table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TableKind {
    DocumentFields,
    Brick,
    Repeater,
}

/// A compiled table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableSchema {
    pub name: String,
    pub kind: TableKind,
    /// Brick key, `None` for the document fields table and its repeaters
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub brick_key: Option<String>,
    /// Repeater keys from the owning brick down to this table
    #[serde(default)]
    pub nesting_path: Vec<String>,
    /// The table whose rows own this table's rows
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_table: Option<String>,
    pub columns: Vec<Column>,
}

impl TableSchema {
    /// Start a table with the system columns of its kind.
    pub(crate) fn with_system_columns(
        name: String,
        kind: TableKind,
        brick_key: Option<String>,
        nesting_path: Vec<String>,
        parent_table: Option<String>,
    ) -> Self {
        let mut id = Column::system(SystemColumn::Id, DataType::Integer, false);
        id.primary_key = true;

        let mut columns = vec![
            id,
            Column::system(SystemColumn::DocumentId, DataType::Integer, false)
                .references(ForeignKey::to_id(DOCUMENTS_TABLE, OnDelete::Cascade)),
            Column::system(SystemColumn::DocumentVersionId, DataType::Integer, false)
                .references(ForeignKey::to_id(VERSIONS_TABLE, OnDelete::Cascade)),
            Column::system(SystemColumn::Locale, DataType::Text, false),
            Column::system(SystemColumn::Position, DataType::Integer, false)
                .with_default(DefaultValue::Integer(0)),
            Column::system(SystemColumn::IsOpen, DataType::Boolean, false)
                .with_default(DefaultValue::Boolean(false)),
            Column::system(SystemColumn::BrickInstanceId, DataType::Integer, false),
        ];

        if kind == TableKind::Repeater {
            columns.push(Column::system(SystemColumn::GroupRef, DataType::Integer, false));
            columns.push(Column::system(SystemColumn::ParentIdRef, DataType::Integer, true));
            if let Some(parent) = &parent_table {
                columns.push(
                    Column::system(SystemColumn::ParentId, DataType::Integer, true)
                        .references(ForeignKey::to_id(parent.clone(), OnDelete::Cascade)),
                );
            }
        }

        Self {
            name,
            kind,
            brick_key,
            nesting_path,
            parent_table,
            columns,
        }
    }

    /// Get a column by name.
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Get the column storing a field.
    pub fn field_column(&self, key: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.field_key() == Some(key))
    }

    /// Field columns in definition order.
    pub fn field_columns(&self) -> impl Iterator<Item = &Column> {
        self.columns.iter().filter(|c| !c.is_system())
    }

    /// Repeater depth below the owning brick (0 for brick and fields tables).
    pub fn depth(&self) -> usize {
        self.nesting_path.len()
    }

    /// Whether this table carries a resolvable `parent_id` column.
    pub fn has_parent_id(&self) -> bool {
        self.column(SystemColumn::ParentId.name()).is_some()
    }
}

/// Prefix shared by every table of a collection.
pub fn collection_prefix(collection: &str) -> String {
    format!("{}{}{}", TABLE_PREFIX, collection, SEGMENT_SEPARATOR)
}

/// Name of the document fields table.
pub fn document_fields_table_name(collection: &str) -> String {
    format!("{}{}", collection_prefix(collection), DOCUMENT_FIELDS_SEGMENT)
}

/// Name of a brick table.
pub fn brick_table_name(collection: &str, brick: &str) -> String {
    format!("{}{}", collection_prefix(collection), brick)
}

/// Name of a repeater table below `owner`, the brick or fields table.
pub fn repeater_table_name(owner: &str, path: &[String]) -> String {
    let mut name = owner.to_string();
    for key in path {
        name.push_str(SEGMENT_SEPARATOR);
        name.push_str(key);
    }
    name
}

/// Name of a field column.
pub fn field_column_name(key: &str) -> String {
    format!("{}{}", FIELD_COLUMN_PREFIX, key)
}

/// Number of repeater levels encoded in a table name of a collection.
pub fn depth_from_name(collection: &str, table: &str) -> Option<usize> {
    let rest = table.strip_prefix(&collection_prefix(collection))?;
    Some(rest.matches(SEGMENT_SEPARATOR).count())
}

/// Reject identifiers the database would truncate.
pub fn check_identifier(name: &str) -> Result<()> {
    if name.len() > MAX_IDENTIFIER_LEN {
        return Err(Error::IdentifierTooLong(name.to_string()));
    }
    Ok(())
}
