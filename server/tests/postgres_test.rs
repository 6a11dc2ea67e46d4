//! Schema migration and introspection against a live PostgreSQL database.
//!
//! These tests require a running PostgreSQL database.
//! Set DATABASE_URL and run with `--ignored`.

use serde_json::json;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use tessera_engine::{
    compile, plan, CollectionDefinition, CompiledCollection, Dialect, FieldDefinition, FieldType,
    LiveColumn, LiveSchema, LiveTable, MigrationHistory, Postgres,
};

async fn connect() -> PgPool {
    let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
    let pool = PgPoolOptions::new()
        .max_connections(2)
        .connect(&url)
        .await
        .unwrap();
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    pool
}

fn collection() -> CompiledCollection {
    let key = format!("it{}", &uuid::Uuid::new_v4().simple().to_string()[..8]);
    let definition: CollectionDefinition = serde_json::from_value(json!({
        "key": key,
        "fields": [
            {"key": "title", "type": "text", "translatable": true},
            {"key": "cover", "type": "media"},
            {"key": "links", "type": "repeater", "fields": [{"key": "url", "type": "link"}]}
        ]
    }))
    .unwrap();
    compile(&definition).unwrap()
}

async fn migrate(pool: &PgPool, compiled: &CompiledCollection, live: &LiveSchema) -> usize {
    let plan = plan(compiled, live, &MigrationHistory::default());
    let steps = plan.steps();
    for step in &steps {
        for statement in Postgres.render(step.table, step.operation).unwrap() {
            sqlx::query(&statement).execute(pool).await.unwrap();
        }
    }
    steps.len()
}

async fn introspect(pool: &PgPool, compiled: &CompiledCollection) -> LiveSchema {
    let mut live = LiveSchema::new();
    for table in compiled.table_names() {
        let rows = sqlx::query(
            "SELECT column_name::text AS name, data_type::text AS data_type, is_nullable::text AS nullable
             FROM information_schema.columns
             WHERE table_schema = current_schema() AND table_name = $1
             ORDER BY ordinal_position",
        )
        .bind(table)
        .fetch_all(pool)
        .await
        .unwrap();

        let columns = rows
            .iter()
            .map(|row| {
                let data_type: String = row.get("data_type");
                let nullable: String = row.get("nullable");
                LiveColumn {
                    name: row.get("name"),
                    data_type: Postgres.parse_type(&data_type),
                    nullable: nullable == "YES",
                    foreign_key: None,
                }
            })
            .collect();
        live.insert(LiveTable {
            name: table.to_string(),
            columns,
            foreign_keys_known: false,
        });
    }
    live
}

async fn drop_tables(pool: &PgPool, compiled: &CompiledCollection) {
    for table in compiled.table_names().collect::<Vec<_>>().into_iter().rev() {
        sqlx::query(&format!("DROP TABLE IF EXISTS {} CASCADE", Postgres.quote_ident(table)))
            .execute(pool)
            .await
            .unwrap();
    }
}

#[tokio::test]
#[ignore]
async fn fresh_migration_converges() {
    let pool = connect().await;
    let compiled = collection();

    let executed = migrate(&pool, &compiled, &LiveSchema::new()).await;
    assert_eq!(executed, compiled.tables.len());

    let live = introspect(&pool, &compiled).await;
    for table in &compiled.tables {
        let live_table = live.table(&table.name).unwrap();
        assert_eq!(live_table.columns.len(), table.columns.len(), "{}", table.name);
    }

    // Re-planning against the migrated schema is a no-op
    let replan = plan(&compiled, &live, &MigrationHistory::default());
    assert_eq!(replan.operation_count(), 0, "{:?}", replan);

    drop_tables(&pool, &compiled).await;
}

#[tokio::test]
#[ignore]
async fn core_tables_exist() {
    let pool = connect().await;
    for table in [
        "tsr_documents",
        "tsr_document_versions",
        "tsr_media",
        "tsr_users",
        "tsr_migration_plans",
    ] {
        let found: Option<String> = sqlx::query_scalar("SELECT to_regclass($1)::text")
            .bind(table)
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(found.as_deref(), Some(table));
    }
}
