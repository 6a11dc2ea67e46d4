//! Brick table decomposer.
//!
//! Rebuilds the nested field tree from rows. Missing locale rows and
//! relation ids without a target become `null`; a read never fails for them.

use crate::collection::{table_fields, BrickKind, FieldDefinition};
use crate::compiler::CompiledCollection;
use crate::compose::{BrickInput, DocumentInput, FieldInput, GroupInput, Locales};
use crate::field::{FieldType, Storage};
use crate::relation::RelationLookup;
use crate::rows::{BrickRow, ColumnValue, RowSet};
use crate::schema::{field_column_name, repeater_table_name};
use crate::Locale;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Decoded value of one field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldResponse {
    pub key: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub translations: Option<BTreeMap<Locale, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub groups: Option<Vec<GroupResponse>>,
}

/// Decoded repeater group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupResponse {
    pub order: i32,
    pub open: bool,
    pub fields: Vec<FieldResponse>,
}

/// Decoded brick instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrickResponse {
    pub key: String,
    pub kind: BrickKind,
    pub order: i32,
    pub open: bool,
    pub fields: Vec<FieldResponse>,
}

/// Decoded document version.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentResponse {
    pub fields: Vec<FieldResponse>,
    pub bricks: Vec<BrickResponse>,
}

impl DocumentResponse {
    /// Object-keyed variant: fields become `{ key: value }` maps.
    pub fn to_object(&self) -> Value {
        let bricks = self
            .bricks
            .iter()
            .map(|b| {
                let mut brick = Map::new();
                brick.insert("key".into(), Value::String(b.key.clone()));
                brick.insert("order".into(), Value::from(b.order));
                brick.insert("open".into(), Value::Bool(b.open));
                brick.insert("fields".into(), fields_object(&b.fields));
                Value::Object(brick)
            })
            .collect();

        let mut object = Map::new();
        object.insert("fields".into(), fields_object(&self.fields));
        object.insert("bricks".into(), Value::Array(bricks));
        Value::Object(object)
    }

    /// Convert back into composer input. Relation targets collapse to their
    /// ids.
    pub fn into_input(self) -> DocumentInput {
        DocumentInput {
            fields: self.fields.into_iter().map(field_input).collect(),
            bricks: self
                .bricks
                .into_iter()
                .map(|b| BrickInput {
                    key: b.key,
                    order: i64::from(b.order),
                    open: b.open,
                    fields: b.fields.into_iter().map(field_input).collect(),
                })
                .collect(),
        }
    }
}

fn fields_object(fields: &[FieldResponse]) -> Value {
    let mut object = Map::new();
    for field in fields {
        let value = if let Some(groups) = &field.groups {
            Value::Array(groups.iter().map(|g| fields_object(&g.fields)).collect())
        } else if let Some(translations) = &field.translations {
            Value::Object(
                translations
                    .iter()
                    .map(|(l, v)| (l.clone(), v.clone()))
                    .collect(),
            )
        } else {
            field.value.clone().unwrap_or(Value::Null)
        };
        object.insert(field.key.clone(), value);
    }
    Value::Object(object)
}

fn field_input(field: FieldResponse) -> FieldInput {
    let is_relation = field.field_type.capabilities().relation.is_some();
    let collapse = |v: Value| if is_relation { relation_id(v) } else { v };
    FieldInput {
        key: field.key,
        value: field.value.map(collapse),
        translations: field
            .translations
            .map(|t| t.into_iter().map(|(l, v)| (l, collapse(v))).collect()),
        groups: field.groups.map(|groups| {
            groups
                .into_iter()
                .map(|g| GroupInput {
                    order: i64::from(g.order),
                    open: g.open,
                    fields: g.fields.into_iter().map(field_input).collect(),
                })
                .collect()
        }),
    }
}

fn relation_id(target: Value) -> Value {
    match target {
        Value::Object(mut object) => object.remove("id").unwrap_or(Value::Null),
        other => other,
    }
}

/// Rebuild a document from its rows.
pub fn decompose(
    compiled: &CompiledCollection,
    rows: &RowSet,
    lookup: &RelationLookup,
    locales: &Locales,
) -> DocumentResponse {
    let decomposer = Decomposer {
        rows,
        lookup,
        locales,
    };

    let fields_table = compiled.owner_table(None);
    let fields = match instances(rows.rows(&fields_table)).into_iter().next() {
        Some((_, instance, group)) => {
            decomposer.scope(&fields_table, &[], &compiled.definition.fields, &group, instance, None)
        }
        None => Vec::new(),
    };

    let mut bricks = Vec::new();
    let definitions = compiled
        .definition
        .fixed_bricks
        .iter()
        .map(|b| (BrickKind::Fixed, b))
        .chain(
            compiled
                .definition
                .builder_bricks
                .iter()
                .map(|b| (BrickKind::Builder, b)),
        );
    for (kind, brick) in definitions {
        let owner = compiled.owner_table(Some(&brick.key));
        for (position, instance, group) in instances(rows.rows(&owner)) {
            bricks.push((
                instance,
                BrickResponse {
                    key: brick.key.clone(),
                    kind,
                    order: position,
                    open: decomposer.is_open(&group),
                    fields: decomposer.scope(&owner, &[], &brick.fields, &group, instance, None),
                },
            ));
        }
    }
    bricks.sort_by_key(|(instance, b)| (b.order, *instance));

    DocumentResponse {
        fields,
        bricks: bricks.into_iter().map(|(_, b)| b).collect(),
    }
}

/// Group rows by brick instance, ordered by position.
fn instances(rows: &[BrickRow]) -> Vec<(i32, i64, Vec<&BrickRow>)> {
    let mut by_instance: BTreeMap<(i32, i64), Vec<&BrickRow>> = BTreeMap::new();
    for row in rows {
        by_instance
            .entry((row.position, row.brick_instance_id))
            .or_default()
            .push(row);
    }
    by_instance
        .into_iter()
        .map(|((position, instance), rows)| (position, instance, rows))
        .collect()
}

struct Decomposer<'a> {
    rows: &'a RowSet,
    lookup: &'a RelationLookup,
    locales: &'a Locales,
}

impl<'a> Decomposer<'a> {
    fn locale_row<'r>(&self, group: &[&'r BrickRow], locale: &str) -> Option<&'r BrickRow> {
        group.iter().copied().find(|r| r.locale == locale)
    }

    fn is_open(&self, group: &[&BrickRow]) -> bool {
        self.locale_row(group, self.locales.default_locale())
            .or_else(|| group.first().copied())
            .is_some_and(|r| r.is_open)
    }

    fn scope(
        &self,
        owner: &str,
        path: &[String],
        definitions: &[FieldDefinition],
        group: &[&'a BrickRow],
        instance: i64,
        group_ref: Option<i64>,
    ) -> Vec<FieldResponse> {
        let default_row = self.locale_row(group, self.locales.default_locale());
        let mut out = Vec::new();

        for field in table_fields(definitions) {
            match field.field_type.capabilities().storage {
                Storage::Column(_) => {
                    let column = field_column_name(&field.key);
                    if field.is_translatable() {
                        let translations = self
                            .locales
                            .iter()
                            .map(|locale| {
                                let value = match self.locale_row(group, locale) {
                                    Some(row) => self.cell(field, row.value(&column)),
                                    None => {
                                        tracing::debug!(field = %field.key, locale, "missing locale row");
                                        Value::Null
                                    }
                                };
                                (locale.to_string(), value)
                            })
                            .collect();
                        out.push(FieldResponse {
                            key: field.key.clone(),
                            field_type: field.field_type,
                            value: None,
                            translations: Some(translations),
                            groups: None,
                        });
                    } else if let Some(row) = default_row {
                        out.push(FieldResponse {
                            key: field.key.clone(),
                            field_type: field.field_type,
                            value: Some(self.cell(field, row.value(&column))),
                            translations: None,
                            groups: None,
                        });
                    }
                }
                Storage::ChildTable => {
                    let mut child_path = path.to_vec();
                    child_path.push(field.key.clone());
                    let groups = self.groups(owner, &child_path, field, instance, group_ref);
                    out.push(FieldResponse {
                        key: field.key.clone(),
                        field_type: field.field_type,
                        value: None,
                        translations: None,
                        groups: Some(groups),
                    });
                }
                Storage::Inline => {}
            }
        }

        out
    }

    fn groups(
        &self,
        owner: &str,
        path: &[String],
        repeater: &FieldDefinition,
        instance: i64,
        parent_ref: Option<i64>,
    ) -> Vec<GroupResponse> {
        let table = repeater_table_name(owner, path);
        let mut by_group: BTreeMap<(i32, i64), Vec<&'a BrickRow>> = BTreeMap::new();
        for row in self.rows.rows(&table) {
            if row.brick_instance_id != instance || row.parent_id_ref != parent_ref {
                continue;
            }
            let Some(group_ref) = row.group_ref else {
                tracing::warn!(table = %table, "repeater row without group ref");
                continue;
            };
            by_group
                .entry((row.position, group_ref))
                .or_default()
                .push(row);
        }

        by_group
            .into_iter()
            .map(|((position, group_ref), rows)| GroupResponse {
                order: position,
                open: self.is_open(&rows),
                fields: self.scope(owner, path, &repeater.fields, &rows, instance, Some(group_ref)),
            })
            .collect()
    }

    fn cell(&self, field: &FieldDefinition, value: Option<&ColumnValue>) -> Value {
        let Some(value) = value else {
            return Value::Null;
        };
        match field.field_type.capabilities().relation {
            Some(kind) => match value.as_i64() {
                Some(id) => match self.lookup.get(kind, id) {
                    Some(target) => target.clone(),
                    None => {
                        tracing::warn!(field = %field.key, %kind, id, "unresolved relation");
                        Value::Null
                    }
                },
                None => Value::Null,
            },
            None => field.field_type.to_json(value),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collection::{BrickDefinition, CollectionDefinition};
    use crate::compiler::compile;
    use crate::compose::compose;
    use crate::field::RelationKind;
    use serde_json::json;

    fn locales() -> Locales {
        Locales::parse("en,fr").unwrap()
    }

    fn article() -> CompiledCollection {
        compile(
            &CollectionDefinition::new(
                "article",
                vec![
                    FieldDefinition::translatable("title", FieldType::Text),
                    FieldDefinition::new("cover", FieldType::Media),
                ],
            )
            .with_builder_brick(BrickDefinition::new(
                "quote",
                vec![FieldDefinition::new("text", FieldType::Textarea)],
            )),
        )
        .unwrap()
    }

    #[test]
    fn relation_resolved_or_null() {
        let compiled = article();
        let input = DocumentInput {
            fields: vec![FieldInput::value("cover", json!(4))],
            bricks: vec![],
        };
        let rows = compose(&compiled, &input, 1, 1, &locales()).unwrap();

        let lookup =
            RelationLookup::new().with(RelationKind::Media, 4, json!({"id": 4, "url": "/a.png"}));
        let doc = decompose(&compiled, &rows, &lookup, &locales());
        assert_eq!(doc.fields[1].value, Some(json!({"id": 4, "url": "/a.png"})));

        let doc = decompose(&compiled, &rows, &RelationLookup::new(), &locales());
        assert_eq!(doc.fields[1].value, Some(Value::Null));
    }

    #[test]
    fn missing_locale_rows_become_null() {
        let compiled = article();
        let input = DocumentInput {
            fields: vec![FieldInput::translations(
                "title",
                [("en", json!("Hi")), ("fr", json!("Salut"))],
            )],
            bricks: vec![],
        };
        let mut rows = compose(&compiled, &input, 1, 1, &locales()).unwrap();
        if let Some(fields) = rows.rows_mut("tsr_article__fields") {
            fields.retain(|r| r.locale == "en");
        }

        let doc = decompose(&compiled, &rows, &RelationLookup::new(), &locales());
        let title = doc.fields[0].translations.as_ref().unwrap();
        assert_eq!(title["en"], json!("Hi"));
        assert_eq!(title["fr"], Value::Null);
    }

    #[test]
    fn shared_field_omitted_without_default_locale_row() {
        let compiled = article();
        let mut rows = compose(&compiled, &DocumentInput::default(), 1, 1, &locales()).unwrap();
        if let Some(fields) = rows.rows_mut("tsr_article__fields") {
            fields.retain(|r| r.locale == "fr");
        }
        let doc = decompose(&compiled, &rows, &RelationLookup::new(), &locales());
        let keys: Vec<_> = doc.fields.iter().map(|f| f.key.as_str()).collect();
        assert_eq!(keys, vec!["title"]);
    }

    #[test]
    fn bricks_ordered_by_position() {
        let compiled = article();
        let input = DocumentInput {
            fields: vec![],
            bricks: vec![
                BrickInput::new("quote", 1, vec![FieldInput::value("text", json!("second"))]),
                BrickInput::new("quote", 0, vec![FieldInput::value("text", json!("first"))]),
            ],
        };
        let rows = compose(&compiled, &input, 1, 1, &locales()).unwrap();
        let doc = decompose(&compiled, &rows, &RelationLookup::new(), &locales());
        assert_eq!(doc.bricks.len(), 2);
        assert_eq!(doc.bricks[0].fields[0].value, Some(json!("first")));
        assert_eq!(doc.bricks[1].order, 1);
        assert_eq!(doc.bricks[0].kind, BrickKind::Builder);
    }

    #[test]
    fn object_shape() {
        let compiled = article();
        let input = DocumentInput {
            fields: vec![FieldInput::translations(
                "title",
                [("en", json!("Hi")), ("fr", json!("Salut"))],
            )],
            bricks: vec![BrickInput::new("quote", 0, vec![FieldInput::value("text", json!("q"))])],
        };
        let rows = compose(&compiled, &input, 1, 1, &locales()).unwrap();
        let doc = decompose(&compiled, &rows, &RelationLookup::new(), &locales());
        assert_eq!(
            doc.to_object(),
            json!({
                "fields": {"title": {"en": "Hi", "fr": "Salut"}, "cover": null},
                "bricks": [{"key": "quote", "order": 0, "open": false, "fields": {"text": "q"}}]
            })
        );
    }

    #[test]
    fn into_input_collapses_relations() {
        let response = DocumentResponse {
            fields: vec![FieldResponse {
                key: "cover".into(),
                field_type: FieldType::Media,
                value: Some(json!({"id": 4, "url": "/a.png"})),
                translations: None,
                groups: None,
            }],
            bricks: vec![],
        };
        let input = response.into_input();
        assert_eq!(input.fields[0].value, Some(json!(4)));
    }
}
