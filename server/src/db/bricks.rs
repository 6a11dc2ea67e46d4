//! Brick rows: bulk insert, fetch and delete across a collection's tables.

use std::collections::BTreeMap;

use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::postgres::{PgRow, Postgres};
use sqlx::{PgConnection, QueryBuilder, Row};
use tessera_engine::rows::inserted_group_ids;
use tessera_engine::schema::{ColumnRole, SystemColumn};
use tessera_engine::{
    BrickRow, Column, ColumnValue, CompiledCollection, DataType, Dialect, Locale, Postgres as Pg,
    RowSet, TableSchema, VersionId,
};

use crate::error::{AppError, Result};

/// Postgres caps bind parameters per statement.
const MAX_BIND_PARAMS: usize = 65_535;

/// A value ready to bind, typed by its column.
enum SqlValue {
    Integer(Option<i64>),
    Double(Option<f64>),
    Text(Option<String>),
    Boolean(Option<bool>),
    Timestamp(Option<DateTime<Utc>>),
    Json(Option<serde_json::Value>),
}

impl SqlValue {
    fn null(data_type: DataType) -> Self {
        match data_type {
            DataType::Integer => SqlValue::Integer(None),
            DataType::Double => SqlValue::Double(None),
            DataType::Text => SqlValue::Text(None),
            DataType::Boolean => SqlValue::Boolean(None),
            DataType::Timestamp => SqlValue::Timestamp(None),
            DataType::Json => SqlValue::Json(None),
        }
    }

    fn from_cell(column: &Column, value: &ColumnValue) -> Result<Self> {
        let mismatch = || {
            AppError::Internal(format!(
                "value {:?} does not fit column {} of type {}",
                value, column.name, column.data_type
            ))
        };

        Ok(match (column.data_type, value) {
            (data_type, ColumnValue::Null) => SqlValue::null(data_type),
            (DataType::Integer, ColumnValue::Integer(i)) => SqlValue::Integer(Some(*i)),
            (DataType::Double, ColumnValue::Double(f)) => SqlValue::Double(Some(*f)),
            (DataType::Double, ColumnValue::Integer(i)) => SqlValue::Double(Some(*i as f64)),
            (DataType::Text, ColumnValue::Text(s)) => SqlValue::Text(Some(s.clone())),
            (DataType::Boolean, ColumnValue::Boolean(b)) => SqlValue::Boolean(Some(*b)),
            (DataType::Timestamp, ColumnValue::Text(s)) => {
                let parsed = DateTime::parse_from_rfc3339(s).map_err(|_| {
                    tessera_engine::Error::InvalidFieldValue {
                        field: column.field_key().unwrap_or(&column.name).to_string(),
                        expected: "RFC 3339 timestamp".to_string(),
                    }
                })?;
                SqlValue::Timestamp(Some(parsed.with_timezone(&Utc)))
            }
            (DataType::Json, ColumnValue::Json(v)) => SqlValue::Json(Some(v.clone())),
            _ => return Err(mismatch()),
        })
    }

    fn push(self, builder: &mut sqlx::query_builder::Separated<'_, '_, Postgres, &'static str>) {
        match self {
            SqlValue::Integer(v) => builder.push_bind(v),
            SqlValue::Double(v) => builder.push_bind(v),
            SqlValue::Text(v) => builder.push_bind(v),
            SqlValue::Boolean(v) => builder.push_bind(v),
            SqlValue::Timestamp(v) => builder.push_bind(v),
            SqlValue::Json(v) => builder.push_bind(v),
        };
    }
}

/// Value of a system column for a row.
fn system_value(column: SystemColumn, row: &BrickRow) -> SqlValue {
    match column {
        SystemColumn::Id => SqlValue::Integer(row.id),
        SystemColumn::DocumentId => SqlValue::Integer(Some(row.document_id)),
        SystemColumn::DocumentVersionId => SqlValue::Integer(Some(row.document_version_id)),
        SystemColumn::Locale => SqlValue::Text(Some(row.locale.clone())),
        SystemColumn::Position => SqlValue::Integer(Some(i64::from(row.position))),
        SystemColumn::IsOpen => SqlValue::Boolean(Some(row.is_open)),
        SystemColumn::BrickInstanceId => SqlValue::Integer(Some(row.brick_instance_id)),
        SystemColumn::GroupRef => SqlValue::Integer(row.group_ref),
        SystemColumn::ParentIdRef => SqlValue::Integer(row.parent_id_ref),
        SystemColumn::ParentId => SqlValue::Integer(row.parent_id),
    }
}

/// Every column except the generated primary key.
fn insert_columns(table: &TableSchema) -> Vec<&Column> {
    table.columns.iter().filter(|c| !c.primary_key).collect()
}

fn row_values(columns: &[&Column], row: &BrickRow) -> Result<Vec<SqlValue>> {
    columns
        .iter()
        .map(|column| match &column.role {
            ColumnRole::System { column: system } => Ok(system_value(*system, row)),
            ColumnRole::Field { .. } => match row.value(&column.name) {
                Some(value) => SqlValue::from_cell(column, value),
                None => Ok(SqlValue::null(column.data_type)),
            },
        })
        .collect()
}

/// Insert every row of `rows`, parents first, and store the generated ids
/// back into the rows.
///
/// Repeater rows get their `parent_id` from the ids of the parent table's
/// rows in the same locale: the owning group for nested repeaters, the brick
/// instance for top-level ones.
pub async fn insert_rows(
    conn: &mut PgConnection,
    compiled: &CompiledCollection,
    rows: &mut RowSet,
) -> Result<usize> {
    let mut group_ids: BTreeMap<&str, BTreeMap<(i64, Locale), i64>> = BTreeMap::new();
    let no_parents = BTreeMap::new();
    let mut inserted = 0;

    for table in &compiled.tables {
        if table.has_parent_id() {
            let parents = table
                .parent_table
                .as_deref()
                .and_then(|parent| group_ids.get(parent))
                .unwrap_or(&no_parents);
            let unresolved = rows.resolve_parent_ids(&table.name, parents);
            if unresolved > 0 {
                return Err(AppError::Internal(format!(
                    "{} rows of {} have no parent row",
                    unresolved, table.name
                )));
            }
        }

        let Some(table_rows) = rows.rows_mut(&table.name) else {
            continue;
        };
        if table_rows.is_empty() {
            continue;
        }

        let columns = insert_columns(table);
        let chunk_size = (MAX_BIND_PARAMS / columns.len().max(1)).max(1);

        for chunk in table_rows.chunks_mut(chunk_size) {
            let values = chunk
                .iter()
                .map(|row| row_values(&columns, row))
                .collect::<Result<Vec<_>>>()?;

            let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(format!(
                "INSERT INTO {} ({}) ",
                Pg.quote_ident(&table.name),
                columns
                    .iter()
                    .map(|c| Pg.quote_ident(&c.name))
                    .collect::<Vec<_>>()
                    .join(", ")
            ));
            builder.push_values(values, |mut b, row| {
                for value in row {
                    value.push(&mut b);
                }
            });
            builder.push(" RETURNING id");

            let ids: Vec<i64> = builder
                .build_query_scalar()
                .fetch_all(&mut *conn)
                .await?;
            if ids.len() != chunk.len() {
                return Err(AppError::Internal(format!(
                    "inserted {} rows into {} but got {} ids",
                    chunk.len(),
                    table.name,
                    ids.len()
                )));
            }
            for (row, id) in chunk.iter_mut().zip(ids) {
                row.id = Some(id);
            }
            inserted += chunk.len();
        }

        tracing::debug!(table = %table.name, rows = table_rows.len(), "inserted brick rows");
        group_ids.insert(&table.name, inserted_group_ids(table_rows));
    }

    Ok(inserted)
}

fn cell(row: &PgRow, column: &Column) -> std::result::Result<ColumnValue, sqlx::Error> {
    let name = column.name.as_str();
    let value = match column.data_type {
        DataType::Integer => row.try_get::<Option<i64>, _>(name)?.map(ColumnValue::Integer),
        DataType::Double => row.try_get::<Option<f64>, _>(name)?.map(ColumnValue::Double),
        DataType::Text => row.try_get::<Option<String>, _>(name)?.map(ColumnValue::Text),
        DataType::Boolean => row.try_get::<Option<bool>, _>(name)?.map(ColumnValue::Boolean),
        DataType::Timestamp => row
            .try_get::<Option<DateTime<Utc>>, _>(name)?
            .map(|t| ColumnValue::Text(t.to_rfc3339_opts(SecondsFormat::AutoSi, true))),
        DataType::Json => row
            .try_get::<Option<serde_json::Value>, _>(name)?
            .map(ColumnValue::Json),
    };
    Ok(value.unwrap_or(ColumnValue::Null))
}

fn brick_row(row: &PgRow, table: &TableSchema) -> std::result::Result<BrickRow, sqlx::Error> {
    let optional = |column: SystemColumn| -> std::result::Result<Option<i64>, sqlx::Error> {
        if table.column(column.name()).is_some() {
            row.try_get(column.name())
        } else {
            Ok(None)
        }
    };

    let position: i64 = row.try_get("position")?;
    let mut values = BTreeMap::new();
    for column in table.field_columns() {
        values.insert(column.name.clone(), cell(row, column)?);
    }

    Ok(BrickRow {
        id: Some(row.try_get("id")?),
        document_id: row.try_get("document_id")?,
        document_version_id: row.try_get("document_version_id")?,
        locale: row.try_get("locale")?,
        position: i32::try_from(position).unwrap_or(i32::MAX),
        is_open: row.try_get("is_open")?,
        brick_instance_id: row.try_get("brick_instance_id")?,
        group_ref: optional(SystemColumn::GroupRef)?,
        parent_id_ref: optional(SystemColumn::ParentIdRef)?,
        parent_id: optional(SystemColumn::ParentId)?,
        values,
    })
}

/// Read every row of a version from all of the collection's tables.
pub async fn fetch_rows(
    conn: &mut PgConnection,
    compiled: &CompiledCollection,
    version_id: VersionId,
) -> Result<RowSet> {
    let mut rows = RowSet::new();

    for table in &compiled.tables {
        let columns = table
            .columns
            .iter()
            .map(|c| Pg.quote_ident(&c.name))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "SELECT {} FROM {} WHERE document_version_id = $1 ORDER BY position, id",
            columns,
            Pg.quote_ident(&table.name)
        );

        let fetched = sqlx::query(&sql)
            .bind(version_id)
            .fetch_all(&mut *conn)
            .await?;
        let table_rows = fetched
            .iter()
            .map(|row| brick_row(row, table))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        rows.extend(&table.name, table_rows);
    }

    Ok(rows)
}

/// Delete every row of a version, children first.
pub async fn delete_rows(
    conn: &mut PgConnection,
    compiled: &CompiledCollection,
    version_id: VersionId,
) -> Result<u64> {
    let mut deleted = 0;
    for table in compiled.tables.iter().rev() {
        let sql = format!(
            "DELETE FROM {} WHERE document_version_id = $1",
            Pg.quote_ident(&table.name)
        );
        deleted += sqlx::query(&sql)
            .bind(version_id)
            .execute(&mut *conn)
            .await?
            .rows_affected();
    }
    Ok(deleted)
}
