//! Collection definitions authored by content modellers.
//!
//! A collection owns a list of document fields and two lists of bricks. Each
//! of those is a field tree: tabs group fields visually, repeaters nest groups
//! of fields to any depth. The tree is owned data, so it cannot contain cycles.

use crate::field::FieldType;
use crate::{error::Result, CollectionKey, Error};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Brick key reserved for the document fields table.
pub const RESERVED_FIELDS_KEY: &str = "fields";

/// Version type names that cannot be used as environments.
const RESERVED_VERSION_TYPES: [&str; 2] = ["latest", "revision"];

/// Validation rules attached to a field.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FieldValidation {
    /// The default locale value must be present and non-null.
    pub required: bool,
    /// Minimum number of groups (repeaters only).
    pub min_groups: Option<usize>,
    /// Maximum number of groups (repeaters only).
    pub max_groups: Option<usize>,
}

/// Definition of a single field in a field tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldDefinition {
    /// Key, unique within the table scope the field lands in
    pub key: String,
    /// Field type
    #[serde(rename = "type")]
    pub field_type: FieldType,
    /// Whether values are stored per locale
    #[serde(default)]
    pub translatable: bool,
    /// Children of a repeater or tab
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<FieldDefinition>,
    #[serde(default)]
    pub validation: FieldValidation,
    /// Value written when the input does not supply one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<serde_json::Value>,
}

impl FieldDefinition {
    /// Create a field with no children.
    pub fn new(key: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            key: key.into(),
            field_type,
            translatable: false,
            fields: Vec::new(),
            validation: FieldValidation::default(),
            default: None,
        }
    }

    /// Create a translatable field.
    pub fn translatable(key: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            translatable: true,
            ..Self::new(key, field_type)
        }
    }

    /// Create a repeater with the given children.
    pub fn repeater(key: impl Into<String>, fields: Vec<FieldDefinition>) -> Self {
        Self {
            fields,
            ..Self::new(key, FieldType::Repeater)
        }
    }

    /// Create a tab with the given children.
    pub fn tab(key: impl Into<String>, fields: Vec<FieldDefinition>) -> Self {
        Self {
            fields,
            ..Self::new(key, FieldType::Tab)
        }
    }

    /// Builder-style method to mark the field required.
    pub fn required(mut self) -> Self {
        self.validation.required = true;
        self
    }

    /// Builder-style method to set a default value.
    pub fn with_default(mut self, value: serde_json::Value) -> Self {
        self.default = Some(value);
        self
    }

    /// Whether values are stored per locale. Only honoured for types whose
    /// capability allows it; [`CollectionDefinition::validate`] rejects the rest.
    pub fn is_translatable(&self) -> bool {
        self.translatable && self.field_type.capabilities().translatable
    }
}

/// Iterate the fields stored in one table: tabs are flattened, repeaters are
/// yielded but not descended into.
pub fn table_fields(fields: &[FieldDefinition]) -> Vec<&FieldDefinition> {
    let mut out = Vec::new();
    for field in fields {
        if field.field_type == FieldType::Tab {
            out.extend(table_fields(&field.fields));
        } else {
            out.push(field);
        }
    }
    out
}

/// A named group of fields attached to documents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrickDefinition {
    pub key: String,
    #[serde(default)]
    pub fields: Vec<FieldDefinition>,
}

impl BrickDefinition {
    pub fn new(key: impl Into<String>, fields: Vec<FieldDefinition>) -> Self {
        Self {
            key: key.into(),
            fields,
        }
    }
}

/// Whether a brick is fixed (at most once per document) or placed freely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BrickKind {
    Fixed,
    Builder,
}

/// Collection-level behaviour.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CollectionConfig {
    /// Keep displaced versions as revisions instead of deleting them
    pub use_revisions: bool,
    /// Environment version types documents can be promoted to
    pub environments: Vec<String>,
}

/// A content type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionDefinition {
    pub key: CollectionKey,
    /// Document-level fields
    #[serde(default)]
    pub fields: Vec<FieldDefinition>,
    #[serde(default)]
    pub fixed_bricks: Vec<BrickDefinition>,
    #[serde(default)]
    pub builder_bricks: Vec<BrickDefinition>,
    #[serde(default)]
    pub config: CollectionConfig,
}

impl CollectionDefinition {
    /// Create a collection with document fields only.
    pub fn new(key: impl Into<CollectionKey>, fields: Vec<FieldDefinition>) -> Self {
        Self {
            key: key.into(),
            fields,
            fixed_bricks: Vec::new(),
            builder_bricks: Vec::new(),
            config: CollectionConfig::default(),
        }
    }

    /// Builder-style method to add a fixed brick.
    pub fn with_fixed_brick(mut self, brick: BrickDefinition) -> Self {
        self.fixed_bricks.push(brick);
        self
    }

    /// Builder-style method to add a builder brick.
    pub fn with_builder_brick(mut self, brick: BrickDefinition) -> Self {
        self.builder_bricks.push(brick);
        self
    }

    /// Builder-style method to replace the config.
    pub fn with_config(mut self, config: CollectionConfig) -> Self {
        self.config = config;
        self
    }

    /// Look up a brick definition by key.
    pub fn brick(&self, key: &str) -> Option<(BrickKind, &BrickDefinition)> {
        self.fixed_bricks
            .iter()
            .find(|b| b.key == key)
            .map(|b| (BrickKind::Fixed, b))
            .or_else(|| {
                self.builder_bricks
                    .iter()
                    .find(|b| b.key == key)
                    .map(|b| (BrickKind::Builder, b))
            })
    }

    /// Parse a definition from JSON and validate it.
    pub fn from_json(json: &str) -> std::result::Result<Self, DefinitionParseError> {
        let definition: Self = serde_json::from_str(json)?;
        definition.validate()?;
        Ok(definition)
    }

    /// Validate the whole definition.
    pub fn validate(&self) -> Result<()> {
        validate_key(&self.key)?;

        let mut environments = BTreeSet::new();
        for env in &self.config.environments {
            if validate_key(env).is_err() || RESERVED_VERSION_TYPES.contains(&env.as_str()) {
                return Err(Error::InvalidEnvironment(env.clone()));
            }
            if !environments.insert(env.as_str()) {
                return Err(Error::DuplicateKey {
                    key: env.clone(),
                    scope: format!("{} environments", self.key),
                });
            }
        }

        validate_tree(&self.fields, &format!("{} fields", self.key), true)?;

        let mut brick_keys = BTreeSet::new();
        for brick in self.fixed_bricks.iter().chain(&self.builder_bricks) {
            validate_key(&brick.key)?;
            if brick.key == RESERVED_FIELDS_KEY {
                return Err(Error::ReservedBrickKey(brick.key.clone()));
            }
            if !brick_keys.insert(brick.key.as_str()) {
                return Err(Error::DuplicateKey {
                    key: brick.key.clone(),
                    scope: format!("{} bricks", self.key),
                });
            }
            validate_tree(&brick.fields, &format!("brick {}", brick.key), true)?;
        }

        Ok(())
    }
}

/// Errors from [`CollectionDefinition::from_json`].
#[derive(Debug, thiserror::Error)]
pub enum DefinitionParseError {
    #[error("malformed definition: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Invalid(#[from] Error),
}

/// Validate one table scope. Tabs share their parent's scope; each repeater
/// opens a new one.
fn validate_tree(fields: &[FieldDefinition], scope: &str, at_root: bool) -> Result<()> {
    let mut seen = BTreeSet::new();
    validate_scope(fields, scope, at_root, &mut seen)
}

fn validate_scope<'a>(
    fields: &'a [FieldDefinition],
    scope: &str,
    at_root: bool,
    seen: &mut BTreeSet<&'a str>,
) -> Result<()> {
    for field in fields {
        validate_key(&field.key)?;

        if !seen.insert(field.key.as_str()) {
            return Err(Error::DuplicateKey {
                key: field.key.clone(),
                scope: scope.to_string(),
            });
        }

        if !field.fields.is_empty() && !field.field_type.is_container() {
            return Err(Error::UnexpectedNestedFields(field.key.clone()));
        }

        if field.translatable && !field.field_type.capabilities().translatable {
            return Err(Error::UnsupportedTranslation {
                key: field.key.clone(),
                field_type: field.field_type.to_string(),
            });
        }

        match field.field_type {
            FieldType::Tab => {
                if !at_root {
                    return Err(Error::NestedTab(field.key.clone()));
                }
                // Tabs cannot nest inside tabs either.
                validate_scope(&field.fields, scope, false, seen)?;
            }
            FieldType::Repeater => {
                validate_tree(
                    &field.fields,
                    &format!("{} > {}", scope, field.key),
                    false,
                )?;
            }
            _ => {}
        }
    }
    Ok(())
}

/// Check that a key can be used as a table or column name fragment.
///
/// Keys are lowercase ASCII words joined by single underscores, so the `__`
/// separator used in table names can never appear inside a key.
pub fn validate_key(key: &str) -> Result<()> {
    let invalid = |reason| {
        Err(Error::InvalidKey {
            key: key.to_string(),
            reason,
        })
    };

    let mut chars = key.chars();
    match chars.next() {
        None => return invalid("key is empty"),
        Some(c) if !c.is_ascii_lowercase() => {
            return invalid("key must start with a lowercase letter")
        }
        _ => {}
    }

    let mut previous = ' ';
    for c in chars {
        if !(c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_') {
            return invalid("only lowercase letters, digits and underscores are allowed");
        }
        if c == '_' && previous == '_' {
            return invalid("consecutive underscores are not allowed");
        }
        previous = c;
    }
    if previous == '_' {
        return invalid("key cannot end with an underscore");
    }

    Ok(())
}
