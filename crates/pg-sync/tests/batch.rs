//! The upsert-statement execution itself (spec.md §8): a batch flush
//! against a live database, first insert then a second batch exercising the
//! primary-key upsert path. Gated behind `TEST_DATABASE_URL`.

use chrono::Utc;
use pg_sync::batch::{self, MappingCache, PendingRecord};
use pg_sync::dialect::Postgres;
use pg_sync::remote_schema::SchemaCache;
use schema_types::simplify;
use serde_json::json;
use sqlx::postgres::PgPoolOptions;

async fn test_cache() -> Option<SchemaCache> {
    let url = std::env::var("TEST_DATABASE_URL").ok()?;
    let pool = PgPoolOptions::new()
        .max_connections(2)
        .connect(&url)
        .await
        .expect("connecting to TEST_DATABASE_URL");
    Some(SchemaCache::new(pool, "public".to_string()))
}

fn schema() -> serde_json::Value {
    json!({
        "type": "object",
        "required": ["id"],
        "properties": {
            "id": {"type": "integer"},
            "name": {"type": "string"},
        },
    })
}

fn pending(id: i64, name: &str, sequence: i64) -> PendingRecord {
    PendingRecord {
        record: json!({"id": id, "name": name}).as_object().unwrap().clone(),
        received_at: Utc::now(),
        sequence,
        version: None,
    }
}

#[tokio::test]
async fn flush_then_reflush_upserts_by_primary_key() {
    let Some(cache) = test_cache().await else {
        eprintln!("skipping: TEST_DATABASE_URL not set");
        return;
    };
    let pool = cache.pool().clone();
    sqlx::raw_sql("drop table if exists \"public\".\"upsert_people\"")
        .execute(&pool)
        .await
        .unwrap();

    let schema_value = schema();
    let simplified = simplify::simplify(&schema_value, &schema_value).unwrap();
    let dialect = Postgres;
    let mut mappings = MappingCache::new();

    let first_batch = vec![pending(1, "Ada", 1), pending(2, "Grace", 2)];
    batch::flush_stream(
        &cache,
        &dialect,
        "upsert_people",
        &simplified,
        &["id".to_string()],
        false,
        &first_batch,
        &mut mappings,
    )
    .await
    .expect("first flush succeeds");

    let second_batch = vec![pending(1, "Ada Lovelace", 3)];
    batch::flush_stream(
        &cache,
        &dialect,
        "upsert_people",
        &simplified,
        &["id".to_string()],
        false,
        &second_batch,
        &mut mappings,
    )
    .await
    .expect("second flush succeeds");

    let count: i64 = sqlx::query_scalar("select count(*) from \"public\".\"upsert_people\"")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(count, 2, "upsert must not duplicate rows for an existing key");

    let name: String =
        sqlx::query_scalar("select name from \"public\".\"upsert_people\" where id = 1")
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(name, "Ada Lovelace");
}
