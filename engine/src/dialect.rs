//! SQL dialects.
//!
//! A dialect maps logical column types to database types and renders
//! migration operations as DDL. Planning never looks at a dialect; only
//! execution and introspection do.

use crate::migration::{ColumnChange, LiveType, MigrationOperation};
use crate::schema::{Column, DataType, DefaultValue, ForeignKey, OnDelete};
use crate::{error::Result, Error};

/// Database-specific behaviour needed to execute a plan.
pub trait Dialect {
    /// Short name used in errors and logs.
    fn name(&self) -> &'static str;

    /// Database type for a logical type.
    fn type_name(&self, data_type: DataType) -> &'static str;

    /// Column definition of the `id` primary key, without the name.
    fn primary_key(&self) -> &'static str;

    fn boolean_literal(&self, value: bool) -> &'static str;

    /// Whether DDL can run inside a transaction and roll back.
    fn supports_transactional_ddl(&self) -> bool;

    /// Map an introspected type name back to a logical type.
    fn parse_type(&self, raw: &str) -> LiveType;

    fn quote_ident(&self, ident: &str) -> String {
        format!("\"{}\"", ident.replace('"', "\"\""))
    }

    fn default_literal(&self, default: &DefaultValue) -> String {
        match default {
            DefaultValue::Boolean(b) => self.boolean_literal(*b).to_string(),
            DefaultValue::Integer(i) => i.to_string(),
            DefaultValue::Double(f) => f.to_string(),
            DefaultValue::Text(s) => quote_literal(s),
            DefaultValue::Json(v) => quote_literal(&v.to_string()),
        }
    }

    /// Full column definition as used in `CREATE TABLE` and `ADD COLUMN`.
    fn column_definition(&self, column: &Column) -> String {
        let name = self.quote_ident(&column.name);
        if column.primary_key {
            return format!("{} {}", name, self.primary_key());
        }

        let mut def = format!("{} {}", name, self.type_name(column.data_type));
        if !column.nullable {
            def.push_str(" NOT NULL");
        }
        if let Some(default) = &column.default {
            def.push_str(" DEFAULT ");
            def.push_str(&self.default_literal(default));
        }
        if let Some(fk) = &column.foreign_key {
            def.push(' ');
            def.push_str(&self.references(fk));
        }
        def
    }

    fn references(&self, fk: &ForeignKey) -> String {
        let on_delete = match fk.on_delete {
            OnDelete::Cascade => "CASCADE",
            OnDelete::SetNull => "SET NULL",
        };
        format!(
            "REFERENCES {} ({}) ON DELETE {}",
            self.quote_ident(&fk.table),
            self.quote_ident(&fk.column),
            on_delete
        )
    }

    /// Statements altering one column in place.
    fn alter_column(
        &self,
        table: &str,
        column: &Column,
        changes: &[ColumnChange],
    ) -> Result<Vec<String>>;

    /// Render one operation as one or more statements.
    fn render(&self, table: &str, operation: &MigrationOperation) -> Result<Vec<String>> {
        let quoted = self.quote_ident(table);
        let statements = match operation {
            MigrationOperation::CreateTable { columns } => {
                let defs: Vec<_> = columns.iter().map(|c| self.column_definition(c)).collect();
                vec![format!(
                    "CREATE TABLE IF NOT EXISTS {} ({})",
                    quoted,
                    defs.join(", ")
                )]
            }
            MigrationOperation::AddColumn { column } => vec![format!(
                "ALTER TABLE {} ADD COLUMN {}",
                quoted,
                self.column_definition(column)
            )],
            MigrationOperation::AlterColumn { column, changes } => {
                self.alter_column(table, column, changes)?
            }
            MigrationOperation::DropColumn { column } => vec![format!(
                "ALTER TABLE {} DROP COLUMN {}",
                quoted,
                self.quote_ident(column)
            )],
            MigrationOperation::DropTable => vec![format!("DROP TABLE IF EXISTS {}", quoted)],
        };
        Ok(statements)
    }
}

/// Quote a string literal.
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// PostgreSQL.
#[derive(Debug, Clone, Copy, Default)]
pub struct Postgres;

impl Postgres {
    fn using_expression(&self, column: &str, from: &LiveType, to: DataType) -> String {
        let quoted = self.quote_ident(column);
        match (from, to) {
            (_, DataType::Json) => format!("to_jsonb({})", quoted),
            (LiveType::Known(DataType::Integer | DataType::Double), DataType::Boolean) => {
                format!("({} <> 0)", quoted)
            }
            (LiveType::Known(DataType::Json), DataType::Text) => format!("({} #>> '{{}}')", quoted),
            _ => format!("{}::{}", quoted, self.type_name(to)),
        }
    }

    /// Name Postgres gives an inline foreign key constraint.
    fn constraint_name(table: &str, column: &str) -> String {
        format!("{}_{}_fkey", table, column)
    }
}

impl Dialect for Postgres {
    fn name(&self) -> &'static str {
        "postgres"
    }

    fn type_name(&self, data_type: DataType) -> &'static str {
        match data_type {
            DataType::Integer => "bigint",
            DataType::Double => "double precision",
            DataType::Text => "text",
            DataType::Boolean => "boolean",
            DataType::Timestamp => "timestamptz",
            DataType::Json => "jsonb",
        }
    }

    fn primary_key(&self) -> &'static str {
        "bigserial PRIMARY KEY"
    }

    fn boolean_literal(&self, value: bool) -> &'static str {
        if value {
            "true"
        } else {
            "false"
        }
    }

    fn supports_transactional_ddl(&self) -> bool {
        true
    }

    fn parse_type(&self, raw: &str) -> LiveType {
        match raw.trim().to_ascii_lowercase().as_str() {
            "bigint" | "integer" | "smallint" | "int8" | "int4" | "int2" => {
                LiveType::Known(DataType::Integer)
            }
            "double precision" | "real" | "float8" | "float4" => LiveType::Known(DataType::Double),
            "text" => LiveType::Known(DataType::Text),
            "boolean" | "bool" => LiveType::Known(DataType::Boolean),
            "timestamp with time zone" | "timestamptz" => LiveType::Known(DataType::Timestamp),
            "jsonb" => LiveType::Known(DataType::Json),
            _ => LiveType::Other(raw.to_string()),
        }
    }

    fn default_literal(&self, default: &DefaultValue) -> String {
        match default {
            DefaultValue::Json(v) => format!("{}::jsonb", quote_literal(&v.to_string())),
            DefaultValue::Boolean(b) => self.boolean_literal(*b).to_string(),
            DefaultValue::Integer(i) => i.to_string(),
            DefaultValue::Double(f) => f.to_string(),
            DefaultValue::Text(s) => quote_literal(s),
        }
    }

    fn alter_column(
        &self,
        table: &str,
        column: &Column,
        changes: &[ColumnChange],
    ) -> Result<Vec<String>> {
        let quoted_table = self.quote_ident(table);
        let quoted_column = self.quote_ident(&column.name);
        let alter = |clause: String| {
            format!(
                "ALTER TABLE {} ALTER COLUMN {} {}",
                quoted_table, quoted_column, clause
            )
        };

        let mut drop_fk = Vec::new();
        let mut body = Vec::new();
        let mut add_fk = Vec::new();

        for change in changes {
            match change {
                ColumnChange::DataType { from, to } => {
                    // The old default may not cast to the new type.
                    body.push(alter("DROP DEFAULT".to_string()));
                    body.push(alter(format!(
                        "TYPE {} USING {}",
                        self.type_name(*to),
                        self.using_expression(&column.name, from, *to)
                    )));
                }
                ColumnChange::Nullability { nullable: true } => {
                    body.push(alter("DROP NOT NULL".to_string()));
                }
                ColumnChange::Nullability { nullable: false } => {
                    if let Some(default) = &column.default {
                        body.push(format!(
                            "UPDATE {} SET {} = {} WHERE {} IS NULL",
                            quoted_table,
                            quoted_column,
                            self.default_literal(default),
                            quoted_column
                        ));
                    }
                    body.push(alter("SET NOT NULL".to_string()));
                }
                ColumnChange::ForeignKey { from, to } => {
                    if let Some(live) = from {
                        let name = if live.constraint.is_empty() {
                            Self::constraint_name(table, &column.name)
                        } else {
                            live.constraint.clone()
                        };
                        drop_fk.push(format!(
                            "ALTER TABLE {} DROP CONSTRAINT IF EXISTS {}",
                            quoted_table,
                            self.quote_ident(&name)
                        ));
                    }
                    if let Some(fk) = to {
                        add_fk.push(format!(
                            "ALTER TABLE {} ADD CONSTRAINT {} FOREIGN KEY ({}) {}",
                            quoted_table,
                            self.quote_ident(&Self::constraint_name(table, &column.name)),
                            quoted_column,
                            self.references(fk)
                        ));
                    }
                }
            }
        }

        if let Some(default) = &column.default {
            body.push(alter(format!("SET DEFAULT {}", self.default_literal(default))));
        }

        let mut statements = drop_fk;
        statements.extend(body);
        statements.extend(add_fk);
        Ok(statements)
    }
}

/// SQLite. Cannot alter columns in place.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sqlite;

impl Dialect for Sqlite {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn type_name(&self, data_type: DataType) -> &'static str {
        // SQLite keeps declared type names, so distinct names round-trip.
        match data_type {
            DataType::Integer => "INTEGER",
            DataType::Double => "REAL",
            DataType::Text => "TEXT",
            DataType::Boolean => "BOOLEAN",
            DataType::Timestamp => "TIMESTAMP",
            DataType::Json => "JSON",
        }
    }

    fn primary_key(&self) -> &'static str {
        "INTEGER PRIMARY KEY AUTOINCREMENT"
    }

    fn boolean_literal(&self, value: bool) -> &'static str {
        if value {
            "1"
        } else {
            "0"
        }
    }

    fn supports_transactional_ddl(&self) -> bool {
        false
    }

    fn parse_type(&self, raw: &str) -> LiveType {
        match raw.trim().to_ascii_uppercase().as_str() {
            "INTEGER" | "INT" | "BIGINT" => LiveType::Known(DataType::Integer),
            "REAL" | "DOUBLE" => LiveType::Known(DataType::Double),
            "TEXT" => LiveType::Known(DataType::Text),
            "BOOLEAN" => LiveType::Known(DataType::Boolean),
            "TIMESTAMP" => LiveType::Known(DataType::Timestamp),
            "JSON" => LiveType::Known(DataType::Json),
            _ => LiveType::Other(raw.to_string()),
        }
    }

    fn alter_column(
        &self,
        table: &str,
        column: &Column,
        _changes: &[ColumnChange],
    ) -> Result<Vec<String>> {
        Err(Error::UnsupportedOperation {
            dialect: self.name(),
            operation: format!("alter column {}.{}", table, column.name),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collection::{CollectionDefinition, FieldDefinition};
    use crate::compiler::compile;
    use crate::field::FieldType;

    fn table() -> crate::schema::TableSchema {
        let def = CollectionDefinition::new(
            "blog",
            vec![
                FieldDefinition::new("title", FieldType::Text),
                FieldDefinition::new("featured", FieldType::Checkbox),
                FieldDefinition::new("cover", FieldType::Media),
            ],
        );
        compile(&def).unwrap().tables.remove(0)
    }

    #[test]
    fn postgres_create_table() {
        let t = table();
        let sql = Postgres
            .render(
                &t.name,
                &MigrationOperation::CreateTable {
                    columns: t.columns.clone(),
                },
            )
            .unwrap();
        assert_eq!(sql.len(), 1);
        let sql = &sql[0];
        assert!(sql.starts_with("CREATE TABLE IF NOT EXISTS \"tsr_blog__fields\""));
        assert!(sql.contains("\"id\" bigserial PRIMARY KEY"));
        assert!(sql.contains(
            "\"document_id\" bigint NOT NULL REFERENCES \"tsr_documents\" (\"id\") ON DELETE CASCADE"
        ));
        assert!(sql.contains("\"_featured\" boolean NOT NULL DEFAULT false"));
        assert!(sql.contains("\"_cover\" bigint REFERENCES \"tsr_media\" (\"id\") ON DELETE SET NULL"));
    }

    #[test]
    fn sqlite_booleans_and_primary_key() {
        let t = table();
        let featured = t.field_column("featured").unwrap();
        assert_eq!(
            Sqlite.column_definition(featured),
            "\"_featured\" BOOLEAN NOT NULL DEFAULT 0"
        );
        assert_eq!(
            Sqlite.column_definition(&t.columns[0]),
            "\"id\" INTEGER PRIMARY KEY AUTOINCREMENT"
        );
    }

    #[test]
    fn sqlite_rejects_alter() {
        let t = table();
        let column = t.field_column("title").unwrap().clone();
        let err = Sqlite
            .render(
                &t.name,
                &MigrationOperation::AlterColumn {
                    column,
                    changes: vec![ColumnChange::Nullability { nullable: true }],
                },
            )
            .unwrap_err();
        assert!(matches!(err, Error::UnsupportedOperation { dialect: "sqlite", .. }));
    }

    #[test]
    fn postgres_alter_backfills_before_not_null() {
        let t = table();
        let column = t.field_column("featured").unwrap().clone();
        let sql = Postgres
            .alter_column(
                &t.name,
                &column,
                &[
                    ColumnChange::DataType {
                        from: LiveType::Known(DataType::Double),
                        to: DataType::Boolean,
                    },
                    ColumnChange::Nullability { nullable: false },
                ],
            )
            .unwrap();
        assert_eq!(
            sql,
            vec![
                "ALTER TABLE \"tsr_blog__fields\" ALTER COLUMN \"_featured\" DROP DEFAULT",
                "ALTER TABLE \"tsr_blog__fields\" ALTER COLUMN \"_featured\" TYPE boolean USING (\"_featured\" <> 0)",
                "UPDATE \"tsr_blog__fields\" SET \"_featured\" = false WHERE \"_featured\" IS NULL",
                "ALTER TABLE \"tsr_blog__fields\" ALTER COLUMN \"_featured\" SET NOT NULL",
                "ALTER TABLE \"tsr_blog__fields\" ALTER COLUMN \"_featured\" SET DEFAULT false",
            ]
        );
    }

    #[test]
    fn parse_types() {
        assert_eq!(Postgres.parse_type("bigint"), LiveType::Known(DataType::Integer));
        assert_eq!(
            Postgres.parse_type("timestamp with time zone"),
            LiveType::Known(DataType::Timestamp)
        );
        assert_eq!(
            Postgres.parse_type("character varying"),
            LiveType::Other("character varying".into())
        );
        assert_eq!(Sqlite.parse_type("boolean"), LiveType::Known(DataType::Boolean));
        for data_type in [
            DataType::Integer,
            DataType::Double,
            DataType::Text,
            DataType::Boolean,
            DataType::Timestamp,
            DataType::Json,
        ] {
            assert_eq!(
                Postgres.parse_type(Postgres.type_name(data_type)),
                LiveType::Known(data_type)
            );
            assert_eq!(
                Sqlite.parse_type(Sqlite.type_name(data_type)),
                LiveType::Known(data_type)
            );
        }
    }

    #[test]
    fn quoting() {
        assert_eq!(Postgres.quote_ident("a\"b"), "\"a\"\"b\"");
        assert_eq!(quote_literal("it's"), "'it''s'");
        assert_eq!(
            Postgres.default_literal(&DefaultValue::Json(serde_json::json!({"a": 1}))),
            "'{\"a\":1}'::jsonb"
        );
    }
}
