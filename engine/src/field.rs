//! Field type registry.
//!
//! Every field type is a variant of [`FieldType`]. What a type can do is
//! described once, by [`FieldType::capabilities`], and the compiler, composer
//! and decomposer all read that table instead of switching on the type.

use crate::rows::ColumnValue;
use crate::schema::{DataType, DefaultValue, OnDelete};
use crate::{error::Result, Error};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Core table holding documents. Document and brick tables reference it.
pub const DOCUMENTS_TABLE: &str = "tsr_documents";
/// Core table holding document versions.
pub const VERSIONS_TABLE: &str = "tsr_document_versions";
/// Core table holding media metadata.
pub const MEDIA_TABLE: &str = "tsr_media";
/// Core table holding users.
pub const USERS_TABLE: &str = "tsr_users";

/// Field types supported in collection definitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Text,
    Textarea,
    Wysiwyg,
    Number,
    Checkbox,
    Select,
    Datetime,
    Colour,
    Json,
    Link,
    Media,
    User,
    Document,
    /// Ordered list of field groups, stored one table deeper.
    Repeater,
    /// Visual grouping only; children are stored in the parent table.
    Tab,
}

/// Kinds of relation a field can point at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelationKind {
    Media,
    User,
    Document,
}

impl RelationKind {
    /// The core table a relation column references.
    pub fn table(self) -> &'static str {
        match self {
            RelationKind::Media => MEDIA_TABLE,
            RelationKind::User => USERS_TABLE,
            RelationKind::Document => DOCUMENTS_TABLE,
        }
    }
}

impl std::fmt::Display for RelationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RelationKind::Media => write!(f, "media"),
            RelationKind::User => write!(f, "user"),
            RelationKind::Document => write!(f, "document"),
        }
    }
}

/// The physical column a field needs.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnSpec {
    pub data_type: DataType,
    pub nullable: bool,
    pub default: Option<DefaultValue>,
    /// Referenced core table and delete behaviour.
    pub references: Option<(&'static str, OnDelete)>,
}

/// How a field is stored.
#[derive(Debug, Clone, PartialEq)]
pub enum Storage {
    /// One column in the owning table.
    Column(ColumnSpec),
    /// A new table one nesting level deeper.
    ChildTable,
    /// Children are inlined into the owning table.
    Inline,
}

/// Capability entry for a field type.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldCapabilities {
    pub translatable: bool,
    pub relation: Option<RelationKind>,
    pub storage: Storage,
}

impl FieldType {
    /// The capability table.
    pub fn capabilities(self) -> FieldCapabilities {
        use FieldType::*;

        let column = |data_type: DataType| {
            Storage::Column(ColumnSpec {
                data_type,
                nullable: true,
                default: None,
                references: None,
            })
        };
        let relation = |kind: RelationKind| FieldCapabilities {
            translatable: false,
            relation: Some(kind),
            storage: Storage::Column(ColumnSpec {
                data_type: DataType::Integer,
                nullable: true,
                default: None,
                references: Some((kind.table(), OnDelete::SetNull)),
            }),
        };

        match self {
            Text | Textarea | Wysiwyg | Select => FieldCapabilities {
                translatable: true,
                relation: None,
                storage: column(DataType::Text),
            },
            Json | Link => FieldCapabilities {
                translatable: true,
                relation: None,
                storage: column(DataType::Json),
            },
            Number => FieldCapabilities {
                translatable: false,
                relation: None,
                storage: column(DataType::Double),
            },
            Checkbox => FieldCapabilities {
                translatable: false,
                relation: None,
                storage: Storage::Column(ColumnSpec {
                    data_type: DataType::Boolean,
                    nullable: false,
                    default: Some(DefaultValue::Boolean(false)),
                    references: None,
                }),
            },
            Datetime => FieldCapabilities {
                translatable: false,
                relation: None,
                storage: column(DataType::Timestamp),
            },
            Colour => FieldCapabilities {
                translatable: false,
                relation: None,
                storage: column(DataType::Text),
            },
            Media => relation(RelationKind::Media),
            User => relation(RelationKind::User),
            Document => relation(RelationKind::Document),
            Repeater => FieldCapabilities {
                translatable: false,
                relation: None,
                storage: Storage::ChildTable,
            },
            Tab => FieldCapabilities {
                translatable: false,
                relation: None,
                storage: Storage::Inline,
            },
        }
    }

    /// Whether the type may declare nested fields.
    pub fn is_container(self) -> bool {
        matches!(self, FieldType::Repeater | FieldType::Tab)
    }

    /// Convert an input JSON value into the cell value stored for this type.
    pub fn to_column_value(self, field: &str, value: &Value) -> Result<ColumnValue> {
        use FieldType::*;

        let invalid = |expected: &str| Error::InvalidFieldValue {
            field: field.to_string(),
            expected: expected.to_string(),
        };

        if value.is_null() {
            return Ok(ColumnValue::Null);
        }

        match self {
            Text | Textarea | Wysiwyg | Select | Colour | Datetime => value
                .as_str()
                .map(|s| ColumnValue::Text(s.to_string()))
                .ok_or_else(|| invalid("string")),
            Number => value
                .as_f64()
                .map(ColumnValue::Double)
                .ok_or_else(|| invalid("number")),
            Checkbox => value
                .as_bool()
                .map(ColumnValue::Boolean)
                .ok_or_else(|| invalid("boolean")),
            Json | Link => Ok(ColumnValue::Json(value.clone())),
            Media | User | Document => value
                .as_i64()
                .map(ColumnValue::Integer)
                .ok_or_else(|| invalid("integer id")),
            Repeater | Tab => Err(invalid("groups")),
        }
    }

    /// Convert a stored cell value back into the JSON value callers see.
    ///
    /// Numbers are stored as doubles, so a whole number within the exactly
    /// representable range comes back as a JSON integer.
    pub fn to_json(self, value: &ColumnValue) -> Value {
        match value {
            ColumnValue::Double(f)
                if self == FieldType::Number && f.fract() == 0.0 && f.abs() <= MAX_EXACT_DOUBLE =>
            {
                Value::from(*f as i64)
            }
            ColumnValue::Null => Value::Null,
            ColumnValue::Boolean(b) => Value::Bool(*b),
            ColumnValue::Integer(i) => Value::from(*i),
            ColumnValue::Double(f) => serde_json::Number::from_f64(*f)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            ColumnValue::Text(s) => Value::String(s.clone()),
            ColumnValue::Json(v) => v.clone(),
        }
    }
}

/// Largest magnitude below which every integer is exactly a double.
const MAX_EXACT_DOUBLE: f64 = 9_007_199_254_740_992.0;

impl std::fmt::Display for FieldType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            FieldType::Text => "text",
            FieldType::Textarea => "textarea",
            FieldType::Wysiwyg => "wysiwyg",
            FieldType::Number => "number",
            FieldType::Checkbox => "checkbox",
            FieldType::Select => "select",
            FieldType::Datetime => "datetime",
            FieldType::Colour => "colour",
            FieldType::Json => "json",
            FieldType::Link => "link",
            FieldType::Media => "media",
            FieldType::User => "user",
            FieldType::Document => "document",
            FieldType::Repeater => "repeater",
            FieldType::Tab => "tab",
        };
        f.write_str(name)
    }
}
