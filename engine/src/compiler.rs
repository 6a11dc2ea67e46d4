//! Schema compiler.
//!
//! Walks a collection's field trees depth first and emits one table for the
//! document fields, one per brick, and one per repeater nesting level below
//! either of those. Tabs add nothing but grouping.

use crate::collection::{table_fields, BrickKind, CollectionDefinition, FieldDefinition};
use crate::field::Storage;
use crate::schema::{
    brick_table_name, check_identifier, collection_prefix, document_fields_table_name,
    field_column_name, repeater_table_name, Column, ColumnRole, DefaultValue, ForeignKey,
    TableKind, TableSchema,
};
use crate::{error::Result, CollectionKey};
use serde::{Deserialize, Serialize};

/// The output of [`compile`]: the validated definition with its tables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompiledCollection {
    pub definition: CollectionDefinition,
    /// Tables in creation order: every table follows the table it references
    pub tables: Vec<TableSchema>,
}

impl CompiledCollection {
    pub fn key(&self) -> &CollectionKey {
        &self.definition.key
    }

    /// Prefix shared by every table of this collection.
    pub fn table_prefix(&self) -> String {
        collection_prefix(&self.definition.key)
    }

    /// Get a table by name.
    pub fn table(&self, name: &str) -> Option<&TableSchema> {
        self.tables.iter().find(|t| t.name == name)
    }

    /// Table holding the rows of a brick, or of the document fields when
    /// `brick` is `None`.
    pub fn owner_table(&self, brick: Option<&str>) -> String {
        match brick {
            Some(key) => brick_table_name(&self.definition.key, key),
            None => document_fields_table_name(&self.definition.key),
        }
    }

    /// Table holding a repeater's groups.
    pub fn repeater_table(&self, brick: Option<&str>, path: &[String]) -> String {
        repeater_table_name(&self.owner_table(brick), path)
    }

    /// Fields of a brick, or of the document when `brick` is `None`.
    pub fn brick_fields(&self, brick: Option<&str>) -> Option<(Option<BrickKind>, &[FieldDefinition])> {
        match brick {
            None => Some((None, &self.definition.fields)),
            Some(key) => self
                .definition
                .brick(key)
                .map(|(kind, def)| (Some(kind), def.fields.as_slice())),
        }
    }

    /// Names of every table, in creation order.
    pub fn table_names(&self) -> impl Iterator<Item = &str> {
        self.tables.iter().map(|t| t.name.as_str())
    }
}

/// Compile a collection definition into table schemas.
///
/// The definition is validated first, so definition errors never reach the
/// database. Output depends only on the definition: there is no randomness
/// and no map iteration involved.
pub fn compile(definition: &CollectionDefinition) -> Result<CompiledCollection> {
    definition.validate()?;

    let mut compiler = Compiler { tables: Vec::new() };
    let key = &definition.key;

    compiler.compile_scope(
        &document_fields_table_name(key),
        None,
        Vec::new(),
        None,
        &definition.fields,
    )?;

    for brick in definition.fixed_bricks.iter().chain(&definition.builder_bricks) {
        compiler.compile_scope(
            &brick_table_name(key, &brick.key),
            Some(&brick.key),
            Vec::new(),
            None,
            &brick.fields,
        )?;
    }

    tracing::debug!(
        collection = %key,
        tables = compiler.tables.len(),
        "compiled collection"
    );

    Ok(CompiledCollection {
        definition: definition.clone(),
        tables: compiler.tables,
    })
}

struct Compiler {
    tables: Vec<TableSchema>,
}

impl Compiler {
    fn compile_scope(
        &mut self,
        owner: &str,
        brick_key: Option<&str>,
        path: Vec<String>,
        parent_table: Option<String>,
        fields: &[FieldDefinition],
    ) -> Result<()> {
        let (name, kind) = if path.is_empty() {
            let kind = if brick_key.is_some() {
                TableKind::Brick
            } else {
                TableKind::DocumentFields
            };
            (owner.to_string(), kind)
        } else {
            (repeater_table_name(owner, &path), TableKind::Repeater)
        };
        check_identifier(&name)?;

        let mut table = TableSchema::with_system_columns(
            name.clone(),
            kind,
            brick_key.map(str::to_string),
            path.clone(),
            parent_table,
        );

        let mut repeaters = Vec::new();
        for field in table_fields(fields) {
            match field.field_type.capabilities().storage {
                Storage::Column(spec) => {
                    let column_name = field_column_name(&field.key);
                    check_identifier(&column_name)?;

                    let default = field
                        .default
                        .as_ref()
                        .and_then(|v| DefaultValue::from_json(spec.data_type, v))
                        .or(spec.default);

                    table.columns.push(Column {
                        name: column_name,
                        data_type: spec.data_type,
                        nullable: spec.nullable,
                        default,
                        foreign_key: spec
                            .references
                            .map(|(target, on_delete)| ForeignKey::to_id(target, on_delete)),
                        primary_key: false,
                        role: ColumnRole::Field {
                            key: field.key.clone(),
                            field_type: field.field_type,
                            translatable: field.is_translatable(),
                        },
                    });
                }
                Storage::ChildTable => repeaters.push(field),
                // Flattened by table_fields.
                Storage::Inline => {}
            }
        }

        self.tables.push(table);

        for repeater in repeaters {
            let mut child_path = path.clone();
            child_path.push(repeater.key.clone());
            self.compile_scope(
                owner,
                brick_key,
                child_path,
                Some(name.clone()),
                &repeater.fields,
            )?;
        }

        Ok(())
    }
}
