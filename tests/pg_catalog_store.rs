//! Runs the Postgres store against a real database. Skipped unless
//! `TEST_DATABASE_URL` points at a scratch database.
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use catalog_ingest::config::DbConfig;
use catalog_ingest::database_ops::catalog_store::CatalogStore;
use catalog_ingest::database_ops::db::Db;

const SCHEMA: &str = include_str!("../sql/schema.sql");

async fn scratch_db() -> Option<Db> {
    let url = std::env::var("TEST_DATABASE_URL").ok()?;
    let cfg = DbConfig {
        url,
        max_connections: 2,
        connect_timeout: Duration::from_secs(5),
        use_prepared: false,
    };
    let db = Db::connect(&cfg).await.expect("connect to TEST_DATABASE_URL");
    sqlx::raw_sql(SCHEMA)
        .execute(&db.pool)
        .await
        .expect("apply schema");
    db.require_catalog_schema().await.expect("schema present");
    Some(db)
}

fn unique(name: &str) -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    format!("{name}-{nanos}")
}

#[tokio::test]
async fn city_upsert_reports_existing_row_with_same_id() {
    let Some(db) = scratch_db().await else {
        eprintln!("TEST_DATABASE_URL not set; skipping");
        return;
    };
    let name = unique("Bar");

    let first = db.upsert_city(&name).await.unwrap();
    let second = db.upsert_city(&name).await.unwrap();

    assert!(!first.existed);
    assert!(second.existed);
    assert_eq!(first.id, second.id);
}

#[tokio::test]
async fn university_key_includes_the_city() {
    let Some(db) = scratch_db().await else {
        eprintln!("TEST_DATABASE_URL not set; skipping");
        return;
    };
    let a = db.upsert_city(&unique("A")).await.unwrap();
    let b = db.upsert_city(&unique("B")).await.unwrap();

    assert!(!db.insert_university(a.id, "Polytech").await.unwrap());
    assert!(db.insert_university(a.id, "Polytech").await.unwrap());
    assert!(!db.insert_university(b.id, "Polytech").await.unwrap());

    let count: i64 = sqlx::query_scalar(
        "SELECT count(*) FROM university WHERE name = 'Polytech' AND city = ANY($1)",
    )
    .bind(vec![a.id, b.id])
    .fetch_one(&db.pool)
    .await
    .unwrap();
    assert_eq!(count, 2);
}
