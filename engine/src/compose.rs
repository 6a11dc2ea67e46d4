//! Brick table composer.
//!
//! Flattens nested document input into rows, one per locale for each brick
//! instance and each repeater group. Rows of one group share a synthetic
//! `group_ref`; their children carry it as `parent_id_ref` until the real
//! parent ids are known after insert.

use crate::collection::{table_fields, BrickKind, FieldDefinition};
use crate::compiler::CompiledCollection;
use crate::field::Storage;
use crate::rows::{BrickRow, ColumnValue, RowSet};
use crate::schema::{field_column_name, repeater_table_name, DefaultValue, TableSchema};
use crate::{error::Result, DocumentId, Error, Locale, VersionId};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

/// The locale set of a call. The first locale is the default.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Locale>", into = "Vec<Locale>")]
pub struct Locales {
    locales: Vec<Locale>,
}

impl Locales {
    /// Create a locale set. It must be non-empty and free of duplicates.
    pub fn new(locales: Vec<Locale>) -> Result<Self> {
        if locales.is_empty() {
            return Err(Error::InvalidLocales("at least one locale is required".into()));
        }
        let mut seen = BTreeSet::new();
        for locale in &locales {
            if locale.trim().is_empty() {
                return Err(Error::InvalidLocales("empty locale code".into()));
            }
            if !seen.insert(locale.as_str()) {
                return Err(Error::InvalidLocales(format!("duplicate locale '{}'", locale)));
            }
        }
        Ok(Self { locales })
    }

    /// Parse a comma-separated list such as `en,fr`.
    pub fn parse(list: &str) -> Result<Self> {
        Self::new(
            list.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
        )
    }

    pub fn default_locale(&self) -> &str {
        &self.locales[0]
    }

    pub fn contains(&self, locale: &str) -> bool {
        self.locales.iter().any(|l| l == locale)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.locales.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.locales.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locales.is_empty()
    }
}

impl TryFrom<Vec<Locale>> for Locales {
    type Error = Error;

    fn try_from(locales: Vec<Locale>) -> Result<Self> {
        Self::new(locales)
    }
}

impl From<Locales> for Vec<Locale> {
    fn from(locales: Locales) -> Self {
        locales.locales
    }
}

/// Input value of one field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldInput {
    pub key: String,
    /// Value of a non-translatable field
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    /// Per-locale values of a translatable field
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub translations: Option<BTreeMap<Locale, Value>>,
    /// Groups of a repeater
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub groups: Option<Vec<GroupInput>>,
}

impl FieldInput {
    pub fn value(key: impl Into<String>, value: Value) -> Self {
        Self {
            key: key.into(),
            value: Some(value),
            translations: None,
            groups: None,
        }
    }

    pub fn translations<L, I>(key: impl Into<String>, translations: I) -> Self
    where
        L: Into<Locale>,
        I: IntoIterator<Item = (L, Value)>,
    {
        Self {
            key: key.into(),
            value: None,
            translations: Some(
                translations
                    .into_iter()
                    .map(|(l, v)| (l.into(), v))
                    .collect(),
            ),
            groups: None,
        }
    }

    pub fn groups(key: impl Into<String>, groups: Vec<GroupInput>) -> Self {
        Self {
            key: key.into(),
            value: None,
            translations: None,
            groups: Some(groups),
        }
    }
}

/// One entry of a repeater.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupInput {
    /// Declared order; re-ranked into contiguous positions
    #[serde(default)]
    pub order: i64,
    #[serde(default)]
    pub open: bool,
    #[serde(default)]
    pub fields: Vec<FieldInput>,
}

impl GroupInput {
    pub fn new(order: i64, fields: Vec<FieldInput>) -> Self {
        Self {
            order,
            open: false,
            fields,
        }
    }
}

/// One brick instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrickInput {
    pub key: String,
    #[serde(default)]
    pub order: i64,
    #[serde(default)]
    pub open: bool,
    #[serde(default)]
    pub fields: Vec<FieldInput>,
}

impl BrickInput {
    pub fn new(key: impl Into<String>, order: i64, fields: Vec<FieldInput>) -> Self {
        Self {
            key: key.into(),
            order,
            open: false,
            fields,
        }
    }
}

/// Nested input of a whole document version.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentInput {
    #[serde(default)]
    pub fields: Vec<FieldInput>,
    #[serde(default)]
    pub bricks: Vec<BrickInput>,
}

/// Flatten `input` into rows for `document_version_id`.
///
/// The document fields table always gets one row per locale. Each brick
/// instance gets one row per locale in its table, and each repeater group one
/// row per locale in the repeater's table. An empty repeater writes nothing.
pub fn compose(
    compiled: &CompiledCollection,
    input: &DocumentInput,
    document_id: DocumentId,
    document_version_id: VersionId,
    locales: &Locales,
) -> Result<RowSet> {
    let mut composer = Composer {
        compiled,
        locales,
        document_id,
        document_version_id,
        next_ref: 1,
        rows: RowSet::new(),
    };

    let fields_table = compiled.owner_table(None);
    let instance = composer.next_ref();
    composer.compose_scope(
        &fields_table,
        &[],
        &compiled.definition.fields,
        &input.fields,
        Slot {
            instance,
            group_ref: None,
            parent_ref: None,
            position: 0,
            open: false,
        },
    )?;

    let mut fixed_seen = BTreeSet::new();
    for brick in &input.bricks {
        match compiled.definition.brick(&brick.key) {
            None => return Err(Error::UnknownBrick(brick.key.clone())),
            Some((BrickKind::Fixed, _)) if !fixed_seen.insert(brick.key.as_str()) => {
                return Err(Error::DuplicateFixedBrick(brick.key.clone()))
            }
            Some(_) => {}
        }
    }

    for (position, brick) in ranked(&input.bricks, |b| b.order) {
        // Checked above.
        let Some((_, definition)) = compiled.definition.brick(&brick.key) else {
            continue;
        };
        let owner = compiled.owner_table(Some(&brick.key));
        let instance = composer.next_ref();
        composer.compose_scope(
            &owner,
            &[],
            &definition.fields,
            &brick.fields,
            Slot {
                instance,
                group_ref: None,
                parent_ref: None,
                position,
                open: brick.open,
            },
        )?;
    }

    tracing::debug!(
        collection = %compiled.key(),
        document_id,
        version_id = document_version_id,
        rows = composer.rows.len(),
        "composed document"
    );

    Ok(composer.rows)
}

/// Sort by declared order (stable) and rank from 0.
fn ranked<T>(items: &[T], order: impl Fn(&T) -> i64) -> impl Iterator<Item = (i32, &T)> {
    let mut sorted: Vec<&T> = items.iter().collect();
    sorted.sort_by_key(|item| order(item));
    sorted
        .into_iter()
        .enumerate()
        .map(|(rank, item)| (rank as i32, item))
}

/// Where the rows of one scope go.
#[derive(Debug, Clone, Copy)]
struct Slot {
    instance: i64,
    group_ref: Option<i64>,
    parent_ref: Option<i64>,
    position: i32,
    open: bool,
}

struct Composer<'a> {
    compiled: &'a CompiledCollection,
    locales: &'a Locales,
    document_id: DocumentId,
    document_version_id: VersionId,
    next_ref: i64,
    rows: RowSet,
}

impl Composer<'_> {
    fn next_ref(&mut self) -> i64 {
        let r = self.next_ref;
        self.next_ref += 1;
        r
    }

    fn compose_scope(
        &mut self,
        owner: &str,
        path: &[String],
        definitions: &[FieldDefinition],
        inputs: &[FieldInput],
        slot: Slot,
    ) -> Result<()> {
        let table_name = repeater_table_name(owner, path);
        let Some(table) = self.compiled.table(&table_name) else {
            return Err(Error::UnknownField {
                key: path.last().cloned().unwrap_or_default(),
                scope: table_name,
            });
        };

        let fields = table_fields(definitions);
        let inputs = index_inputs(&fields, inputs, &table_name)?;

        // Column values per locale, in definition order.
        let mut per_locale: Vec<BTreeMap<String, ColumnValue>> =
            vec![BTreeMap::new(); self.locales.len()];
        let mut repeaters = Vec::new();

        for field in &fields {
            let input = inputs.get(field.key.as_str()).copied();
            match field.field_type.capabilities().storage {
                Storage::Column(_) => {
                    let values = self.field_values(table, field, input)?;
                    for (row, value) in per_locale.iter_mut().zip(values) {
                        row.insert(field_column_name(&field.key), value);
                    }
                }
                Storage::ChildTable => repeaters.push((*field, input)),
                Storage::Inline => {}
            }
        }

        for (locale, values) in self.locales.iter().zip(per_locale) {
            self.rows.push(
                &table_name,
                BrickRow {
                    id: None,
                    document_id: self.document_id,
                    document_version_id: self.document_version_id,
                    locale: locale.to_string(),
                    position: slot.position,
                    is_open: slot.open,
                    brick_instance_id: slot.instance,
                    group_ref: slot.group_ref,
                    parent_id_ref: slot.parent_ref,
                    parent_id: None,
                    values,
                },
            );
        }

        for (repeater, input) in repeaters {
            let groups = match input {
                None => &[][..],
                Some(input) => {
                    if input.value.as_ref().is_some_and(|v| !v.is_null())
                        || input.translations.is_some()
                    {
                        return Err(Error::InvalidFieldValue {
                            field: repeater.key.clone(),
                            expected: "groups".into(),
                        });
                    }
                    input.groups.as_deref().unwrap_or(&[])
                }
            };

            let validation = &repeater.validation;
            let min = validation.min_groups.unwrap_or(0);
            let max = validation.max_groups.unwrap_or(usize::MAX);
            if groups.len() < min || groups.len() > max {
                return Err(Error::GroupCountOutOfRange {
                    field: repeater.key.clone(),
                    count: groups.len(),
                    min,
                    max,
                });
            }

            let mut child_path = path.to_vec();
            child_path.push(repeater.key.clone());
            for (position, group) in ranked(groups, |g| g.order) {
                let group_ref = self.next_ref();
                self.compose_scope(
                    owner,
                    &child_path,
                    &repeater.fields,
                    &group.fields,
                    Slot {
                        instance: slot.instance,
                        group_ref: Some(group_ref),
                        parent_ref: slot.group_ref,
                        position,
                        open: group.open,
                    },
                )?;
            }
        }

        Ok(())
    }

    /// The cell value of a field for every locale, in locale order.
    fn field_values(
        &self,
        table: &TableSchema,
        field: &FieldDefinition,
        input: Option<&FieldInput>,
    ) -> Result<Vec<ColumnValue>> {
        if input.is_some_and(|i| i.groups.is_some()) {
            return Err(Error::InvalidFieldValue {
                field: field.key.clone(),
                expected: field.field_type.to_string(),
            });
        }

        let column = table.field_column(&field.key);
        let fallback = || -> Result<ColumnValue> {
            if let Some(default) = &field.default {
                return field.field_type.to_column_value(&field.key, default);
            }
            Ok(column
                .filter(|c| !c.nullable)
                .and_then(|c| c.default.as_ref())
                .map(default_cell)
                .unwrap_or(ColumnValue::Null))
        };
        let not_null = |value: ColumnValue| -> Result<ColumnValue> {
            match column {
                Some(c) if !c.nullable && value.is_null() => fallback(),
                _ => Ok(value),
            }
        };

        let values = match input {
            None => vec![fallback()?; self.locales.len()],
            Some(input) if field.is_translatable() => {
                if let Some(translations) = &input.translations {
                    if let Some(unknown) = translations.keys().find(|l| !self.locales.contains(l)) {
                        return Err(Error::UnknownLocale(unknown.clone()));
                    }
                }
                let mut values = Vec::with_capacity(self.locales.len());
                for locale in self.locales.iter() {
                    let raw = match &input.translations {
                        Some(t) => t.get(locale),
                        // A bare value is the default locale's translation.
                        None if locale == self.locales.default_locale() => input.value.as_ref(),
                        None => None,
                    };
                    let value = match raw {
                        Some(v) => field.field_type.to_column_value(&field.key, v)?,
                        None => ColumnValue::Null,
                    };
                    values.push(not_null(value)?);
                }
                values
            }
            Some(input) => {
                let raw = match (&input.value, &input.translations) {
                    (Some(v), _) => Some(v),
                    // Tolerate a translation map on a shared field.
                    (None, Some(t)) => t.get(self.locales.default_locale()),
                    (None, None) => None,
                };
                let value = match raw {
                    Some(v) => not_null(field.field_type.to_column_value(&field.key, v)?)?,
                    None => fallback()?,
                };
                vec![value; self.locales.len()]
            }
        };

        if field.validation.required && values.first().map_or(true, ColumnValue::is_null) {
            return Err(Error::MissingRequiredField(field.key.clone()));
        }

        Ok(values)
    }
}

fn default_cell(default: &DefaultValue) -> ColumnValue {
    match default {
        DefaultValue::Boolean(b) => ColumnValue::Boolean(*b),
        DefaultValue::Integer(i) => ColumnValue::Integer(*i),
        DefaultValue::Double(f) => ColumnValue::Double(*f),
        DefaultValue::Text(s) => ColumnValue::Text(s.clone()),
        DefaultValue::Json(v) => ColumnValue::Json(v.clone()),
    }
}

/// Match inputs to the fields of a table, rejecting unknown and repeated keys.
fn index_inputs<'a>(
    fields: &[&FieldDefinition],
    inputs: &'a [FieldInput],
    scope: &str,
) -> Result<BTreeMap<&'a str, &'a FieldInput>> {
    let mut by_key = BTreeMap::new();
    for input in inputs {
        if !fields.iter().any(|f| f.key == input.key) {
            return Err(Error::UnknownField {
                key: input.key.clone(),
                scope: scope.to_string(),
            });
        }
        if by_key.insert(input.key.as_str(), input).is_some() {
            return Err(Error::DuplicateKey {
                key: input.key.clone(),
                scope: scope.to_string(),
            });
        }
    }
    Ok(by_key)
}
