//! The remote-table metadata side channel and a read-through schema cache
//! (spec.md §3 "Remote-table metadata", §5 "the remote-schema cache is
//! read-through and is invalidated after any DDL").

use crate::error::Error;
use serde::{Deserialize, Serialize};
use sqlx::Row;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Debug, Clone)]
pub struct ColumnInfo {
    pub sql_type: String,
    pub is_nullable: bool,
}

/// The `{key_properties, version}` side-channel record, stored as a
/// `COMMENT ON TABLE` per spec.md §3.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableMeta {
    pub key_properties: Vec<String>,
    pub version: i64,
}

#[derive(Debug, Clone)]
pub struct RemoteTable {
    pub name: String,
    pub columns: HashMap<String, ColumnInfo>,
    pub meta: Option<TableMeta>,
}

/// Reads `information_schema.columns` plus the table's `COMMENT ON TABLE`
/// payload for `postgres_schema.table_name`. Returns `Ok(None)` when the
/// table does not exist yet (first write, spec.md §3 "Lifecycle").
pub async fn fetch_remote_table(
    pool: &sqlx::PgPool,
    postgres_schema: &str,
    table_name: &str,
) -> Result<Option<RemoteTable>, Error> {
    let rows = sqlx::query(
        "select column_name, data_type, is_nullable \
         from information_schema.columns \
         where table_schema = $1 and table_name = $2",
    )
    .bind(postgres_schema)
    .bind(table_name)
    .fetch_all(pool)
    .await?;

    if rows.is_empty() {
        return Ok(None);
    }

    let mut columns = HashMap::new();
    for row in rows {
        let name: String = row.try_get("column_name")?;
        let data_type: String = row.try_get("data_type")?;
        let is_nullable: String = row.try_get("is_nullable")?;
        columns.insert(
            name,
            ColumnInfo {
                sql_type: data_type,
                is_nullable: is_nullable == "YES",
            },
        );
    }

    let comment: Option<String> = sqlx::query_scalar(
        "select obj_description(format('%I.%I', $1::text, $2::text)::regclass, 'pg_class')",
    )
    .bind(postgres_schema)
    .bind(table_name)
    .fetch_one(pool)
    .await?;

    let meta = comment.and_then(|c| serde_json::from_str(&c).ok());

    Ok(Some(RemoteTable {
        name: table_name.to_string(),
        columns,
        meta,
    }))
}

/// Whether `postgres_schema.table_name` currently holds any rows, which
/// decides between rules 6/7 and 8/9 of the schema-reconciliation table
/// (spec.md §4.5: a new column on a populated table must be nullable,
/// since existing rows have no value for it).
pub async fn table_has_rows(
    pool: &sqlx::PgPool,
    postgres_schema: &str,
    table_name: &str,
) -> Result<bool, Error> {
    let sql = format!(
        "select exists(select 1 from \"{}\".\"{}\" limit 1)",
        postgres_schema, table_name
    );
    let exists: bool = sqlx::query_scalar(&sql).fetch_one(pool).await?;
    Ok(exists)
}

/// Read-through cache over [`fetch_remote_table`], invalidated after any
/// DDL (spec.md §5). Also hands out a per-table `tokio::sync::Mutex` so two
/// flushes targeting the same table never race their DDL statements.
pub struct SchemaCache {
    pool: sqlx::PgPool,
    postgres_schema: String,
    cache: Mutex<HashMap<String, Option<RemoteTable>>>,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl SchemaCache {
    pub fn new(pool: sqlx::PgPool, postgres_schema: String) -> Self {
        SchemaCache {
            pool,
            postgres_schema,
            cache: Mutex::new(HashMap::new()),
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn pool(&self) -> &sqlx::PgPool {
        &self.pool
    }

    pub fn postgres_schema(&self) -> &str {
        &self.postgres_schema
    }

    /// Acquires the DDL mutex for `table_name`, creating it on first use.
    pub async fn table_lock(&self, table_name: &str) -> tokio::sync::OwnedMutexGuard<()> {
        let mut locks = self.locks.lock().await;
        let entry = locks
            .entry(table_name.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        drop(locks);
        entry.lock_owned().await
    }

    /// Returns the cached entry for `table_name`, fetching it on first
    /// access (or after invalidation).
    pub async fn get(&self, table_name: &str) -> Result<Option<RemoteTable>, Error> {
        let mut cache = self.cache.lock().await;
        if let Some(entry) = cache.get(table_name) {
            return Ok(entry.clone());
        }
        let fetched = fetch_remote_table(&self.pool, &self.postgres_schema, table_name).await?;
        cache.insert(table_name.to_string(), fetched.clone());
        Ok(fetched)
    }

    /// Drops the cached entry for `table_name`, forcing the next [`get`]
    /// call to re-fetch. Called after every DDL statement.
    pub async fn invalidate(&self, table_name: &str) {
        self.cache.lock().await.remove(table_name);
    }
}
