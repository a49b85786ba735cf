//! Batch Writer (spec.md C6, §4.6): the ten-step flush sequence for one
//! stream — metadata injection, versioned-table targeting, schema
//! reconciliation, denesting, CSV bulk-load, and the upsert merge.

use crate::csv_rows;
use crate::error::Error;
use crate::remote_schema::{self, RemoteTable, SchemaCache, TableMeta};
use crate::upsert_schema::{self, Migration, Reconciliation};
use chrono::{DateTime, Utc};
use denest::schema::{BATCHED_AT, PRIMARY_KEY, RECEIVED_AT, SEQUENCE, TABLE_VERSION};
use denest::{denest_records, denest_schema, Mapping, RecordsMap, TableSchema};
use schema_types::{Simplified, SqlDialect};
use serde_json::{Map, Value};
use std::collections::HashMap;
use uuid::Uuid;

/// Kept deliberately decoupled from `stream_state::BufferedRecord` — this
/// crate knows nothing about the buffer crate, only the shape of record it
/// needs to write. The orchestrator maps one to the other at the call site.
#[derive(Debug, Clone)]
pub struct PendingRecord {
    pub record: Map<String, Value>,
    pub received_at: DateTime<Utc>,
    pub sequence: i64,
    pub version: Option<i64>,
}

/// Per-table renamed-column state that must be carried forward across
/// flushes (spec.md §4.5; see the doc comment on `denest::TableSchema::mappings`)
/// keyed by table name (root or subtable).
#[derive(Debug, Default)]
pub struct MappingCache(HashMap<String, Vec<Mapping>>);

impl MappingCache {
    pub fn new() -> Self {
        MappingCache::default()
    }

    fn get(&self, table: &str) -> Vec<Mapping> {
        self.0.get(table).cloned().unwrap_or_default()
    }

    fn set(&mut self, table: &str, mappings: Vec<Mapping>) {
        self.0.insert(table.to_string(), mappings);
    }
}

#[derive(Debug)]
pub struct FlushOutcome {
    /// Rows written across the root table and every subtable.
    pub rows_written: u64,
}

/// Flushes one stream's buffered batch (spec.md §4.6 steps 1–10). `schema`
/// is the stream's current (already-simplified) JSON schema; `use_uuid_pk`
/// mirrors the decision `stream_state::Buffer` made about synthesizing
/// `_sdc_primary_key` for a keyless stream.
pub async fn flush_stream(
    cache: &SchemaCache,
    dialect: &dyn SqlDialect,
    stream: &str,
    schema: &Simplified,
    key_properties: &[String],
    use_uuid_pk: bool,
    records: &[PendingRecord],
    mappings: &mut MappingCache,
) -> Result<FlushOutcome, Error> {
    // Step 2: metadata augmentation.
    let batched_at = Utc::now();
    let augmented: Vec<Map<String, Value>> = records
        .iter()
        .map(|r| augment_record(r, use_uuid_pk, batched_at))
        .collect();

    // Step 3: target root table name — a shadow `stream__<version>` table
    // once this batch carries a version the live table hasn't seen yet.
    let live = cache.get(stream).await?;
    let live_version = live.as_ref().and_then(|t| t.meta.as_ref()).map(|m| m.version);
    let max_version = records.iter().filter_map(|r| r.version).max();
    let root_table_name = match (live_version, max_version) {
        (Some(rv), Some(mv)) if mv > rv => format!("{}__{}", stream, mv),
        _ => stream.to_string(),
    };

    // Step 4: key-property drift against the live table is fatal.
    if let Some(remote_meta) = live.as_ref().and_then(|t| t.meta.as_ref()) {
        let effective_keys: Vec<String> = if key_properties.is_empty() {
            vec![PRIMARY_KEY.to_string()]
        } else {
            key_properties.to_vec()
        };
        if remote_meta.key_properties != effective_keys {
            return Err(Error::KeyPropertyMismatch {
                stream: stream.to_string(),
                remote: remote_meta.key_properties.clone(),
                local: effective_keys,
            });
        }
    }

    // Step 5: keep only the highest-version records in this batch — an
    // earlier version's record arriving after a later one within the same
    // buffer window is dropped, not merged.
    let kept: Vec<&Map<String, Value>> = match max_version {
        Some(mv) => {
            let mut dropped = 0usize;
            let kept: Vec<&Map<String, Value>> = augmented
                .iter()
                .zip(records.iter())
                .filter_map(|(rec, orig)| {
                    if orig.version.unwrap_or(mv) == mv {
                        Some(rec)
                    } else {
                        dropped += 1;
                        None
                    }
                })
                .collect();
            if dropped > 0 {
                tracing::warn!(stream, dropped, max_version = mv, "dropping records from a stale table version within one batch");
            }
            kept
        }
        None => augmented.iter().collect(),
    };

    // Step 6: denest the (possibly versioned) root + subtable schemas.
    let (mut root, subtables) = denest_schema(&root_table_name, schema, key_properties)?;
    root.mappings = mappings.get(&root.name);

    // Step 7: reconcile + stage each table.
    let mut staged = Vec::new();
    for table in std::iter::once(root).chain(subtables.into_iter()) {
        let mut table = table;
        if table.mappings.is_empty() {
            table.mappings = mappings.get(&table.name);
        }
        let staged_table = stage_table(cache, dialect, &table).await?;
        mappings.set(&table.name, staged_table.reconciliation.mappings.clone());
        staged.push((table, staged_table));
    }

    // Step 8: denest records into every staged table's rows.
    let root_name = staged[0].0.name.clone();
    let root_key_properties = staged[0].0.key_properties.clone();
    let mut records_map: RecordsMap = RecordsMap::new();
    for record in kept {
        denest_records(&root_name, record, &mut records_map, &root_key_properties);
    }

    // Steps 9–10: one transaction for the whole batch's bulk-load + merge.
    let mut rows_written: u64 = 0;
    let mut tx = cache.pool().begin().await.map_err(Error::BackendFailure)?;
    for (table, staged_table) in &staged {
        let rows = records_map.remove(&table.name).unwrap_or_default();
        let written = write_table(&mut tx, cache.postgres_schema(), table, staged_table, &rows)
            .await
            .map_err(|e| {
                tracing::error!(stream, table = %table.name, error = %e, "batch write failed");
                e
            })?;
        rows_written += written;
    }
    tx.commit().await.map_err(Error::BackendFailure)?;

    for (table, _) in &staged {
        cache.invalidate(&table.name).await;
    }

    Ok(FlushOutcome { rows_written })
}

fn augment_record(
    pending: &PendingRecord,
    use_uuid_pk: bool,
    batched_at: DateTime<Utc>,
) -> Map<String, Value> {
    let mut record = pending.record.clone();
    record.insert(
        RECEIVED_AT.to_string(),
        Value::String(pending.received_at.to_rfc3339()),
    );
    record.insert(BATCHED_AT.to_string(), Value::String(batched_at.to_rfc3339()));
    record.insert(SEQUENCE.to_string(), Value::from(pending.sequence));
    if let Some(v) = pending.version {
        record.insert(TABLE_VERSION.to_string(), Value::from(v));
    }
    if use_uuid_pk {
        record.insert(
            PRIMARY_KEY.to_string(),
            Value::String(Uuid::new_v4().to_string()),
        );
    }
    record
}

struct StagedTable {
    reconciliation: Reconciliation,
    temp_name: String,
}

/// Fetches or creates the remote table at `table.name` through the cache,
/// reconciles its schema against `table`, applies the resulting
/// migrations, and creates a fresh temp table with the reconciled column
/// set (spec.md §4.6 step 7). Holds the cache's per-table DDL lock for the
/// duration so two concurrent flushes of the same table never race.
async fn stage_table(
    cache: &SchemaCache,
    dialect: &dyn SqlDialect,
    table: &TableSchema,
) -> Result<StagedTable, Error> {
    let _guard = cache.table_lock(&table.name).await;

    let remote = cache.get(&table.name).await?;
    let table_is_empty = match &remote {
        None => true,
        Some(_) => !remote_schema::table_has_rows(cache.pool(), cache.postgres_schema(), &table.name).await?,
    };
    let empty_remote = RemoteTable {
        name: table.name.clone(),
        columns: HashMap::new(),
        meta: None,
    };
    let reconciliation = upsert_schema::upsert_table(
        dialect,
        remote.as_ref().unwrap_or(&empty_remote),
        table_is_empty,
        table,
        &table.mappings,
    )?;

    {
        let mut conn = cache.pool().acquire().await.map_err(Error::BackendFailure)?;
        match &remote {
            None => {
                create_table(
                    &mut conn,
                    cache.postgres_schema(),
                    &table.name,
                    &reconciliation,
                    table,
                )
                .await?;
            }
            Some(_) => {
                apply_migrations(&mut conn, cache.postgres_schema(), &table.name, &reconciliation.migrations).await?;
            }
        }
    }
    cache.invalidate(&table.name).await;

    let mut conn = cache.pool().acquire().await.map_err(Error::BackendFailure)?;
    let temp_name = format!("{}__{}", table.name, Uuid::new_v4().simple());
    create_temp_table(&mut conn, &temp_name, table, &reconciliation).await?;

    Ok(StagedTable {
        reconciliation,
        temp_name,
    })
}

/// Builds the first-creation DDL straight from the reconciliation's
/// `AddColumn` migrations (every column, since the remote side started
/// empty) rather than from `table.columns` directly, so canonicalized and
/// type-tagged column names are honored even on the very first write.
async fn create_table(
    conn: &mut sqlx::PgConnection,
    postgres_schema: &str,
    table_name: &str,
    reconciliation: &Reconciliation,
    table: &TableSchema,
) -> Result<(), Error> {
    let mut cols = Vec::new();
    for migration in &reconciliation.migrations {
        if let Migration::AddColumn { column, sql_type } = migration {
            cols.push(format!("\"{}\" {}", column, sql_type));
        }
    }
    let pk_cols: Vec<String> = table
        .key_properties
        .iter()
        .map(|raw| reconciliation.columns[raw].column.clone())
        .collect();
    let pk_sql = if pk_cols.is_empty() {
        String::new()
    } else {
        format!(
            ", primary key ({})",
            pk_cols
                .iter()
                .map(|c| format!("\"{}\"", c))
                .collect::<Vec<_>>()
                .join(", ")
        )
    };
    let ddl = format!(
        "create table if not exists \"{}\".\"{}\" ({}{})",
        postgres_schema,
        table_name,
        cols.join(", "),
        pk_sql,
    );
    sqlx::raw_sql(&ddl).execute(&mut *conn).await?;

    let meta = TableMeta {
        key_properties: table.key_properties.clone(),
        version: 0,
    };
    let comment = serde_json::to_string(&meta).expect("TableMeta serializes");
    let comment_sql = format!(
        "comment on table \"{}\".\"{}\" is '{}'",
        postgres_schema,
        table_name,
        comment.replace('\'', "''"),
    );
    sqlx::raw_sql(&comment_sql).execute(&mut *conn).await?;
    Ok(())
}

async fn apply_migrations(
    conn: &mut sqlx::PgConnection,
    postgres_schema: &str,
    table: &str,
    migrations: &[Migration],
) -> Result<(), Error> {
    for migration in migrations {
        let sql = match migration {
            Migration::AddColumn { column, sql_type } => format!(
                "alter table \"{}\".\"{}\" add column \"{}\" {}",
                postgres_schema, table, column, sql_type
            ),
            Migration::MakeNullable { column } => format!(
                "alter table \"{}\".\"{}\" alter column \"{}\" drop not null",
                postgres_schema, table, column
            ),
            Migration::DropColumn { column } => format!(
                "alter table \"{}\".\"{}\" drop column \"{}\"",
                postgres_schema, table, column
            ),
            Migration::MigrateData { from, to } => format!(
                "update \"{}\".\"{}\" set \"{}\" = \"{}\"",
                postgres_schema, table, to, from
            ),
        };
        sqlx::raw_sql(&sql).execute(&mut *conn).await?;
    }
    Ok(())
}

async fn create_temp_table(
    conn: &mut sqlx::PgConnection,
    temp_name: &str,
    table: &TableSchema,
    reconciliation: &Reconciliation,
) -> Result<(), Error> {
    let mut cols = Vec::new();
    for raw in table.columns.keys() {
        let resolved = &reconciliation.columns[raw];
        cols.push(format!("\"{}\" {}", resolved.column, resolved.sql_type));
    }
    let ddl = format!("create temp table \"{}\" ({})", temp_name, cols.join(", "));
    sqlx::raw_sql(&ddl).execute(&mut *conn).await?;
    Ok(())
}

/// Steps 9–10 for one table: CSV-serialize, bulk-load into the temp table,
/// upsert-merge into the target, drop the temp table.
async fn write_table(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    postgres_schema: &str,
    table: &TableSchema,
    staged: &StagedTable,
    rows: &[denest::Row],
) -> Result<u64, Error> {
    if rows.is_empty() {
        sqlx::raw_sql(&format!("drop table if exists \"{}\"", staged.temp_name))
            .execute(&mut **tx)
            .await?;
        return Ok(0);
    }

    let header = csv_rows::header(table, &staged.reconciliation.columns);
    let csv_bytes = csv_rows::serialize_rows(table, &staged.reconciliation.columns, rows)?;

    let copy_sql = format!(
        "copy \"{}\" ({}) from stdin with (format csv)",
        staged.temp_name,
        header
            .iter()
            .map(|c| format!("\"{}\"", c))
            .collect::<Vec<_>>()
            .join(", "),
    );
    let mut copy = tx.copy_in_raw(&copy_sql).await?;
    copy.send(csv_bytes.as_slice()).await?;
    copy.finish().await?;

    let merge_sql = build_merge_sql(postgres_schema, table, &staged.reconciliation, &staged.temp_name);
    sqlx::raw_sql(&merge_sql).execute(&mut **tx).await?;

    sqlx::raw_sql(&format!("drop table if exists \"{}\"", staged.temp_name))
        .execute(&mut **tx)
        .await?;

    Ok(rows.len() as u64)
}

/// Builds the literal DELETE/INSERT merge statement (spec.md §4.6). `PK`
/// is the business key for the root table, or just the
/// `_sdc_source_key_*` columns for a subtable — a newer batch for a parent
/// replaces that parent's entire array rather than merging per position.
/// `SUB` (the `_sdc_level_*_id` columns) only widens the `DISTINCT ON`
/// used by the INSERT, so distinct array positions under one parent
/// coexist.
fn build_merge_sql(
    postgres_schema: &str,
    table: &TableSchema,
    reconciliation: &Reconciliation,
    temp_name: &str,
) -> String {
    let resolve = |raw: &str| -> String {
        reconciliation
            .columns
            .get(raw)
            .map(|r| r.column.clone())
            .unwrap_or_else(|| raw.to_string())
    };

    let pk_raw: Vec<&str> = if table.is_root() {
        table.key_properties.iter().map(String::as_str).collect()
    } else {
        table.source_key_columns().collect()
    };
    let sub_raw: Vec<&str> = table.level_id_columns().collect();

    let pk: Vec<String> = pk_raw.iter().map(|c| resolve(c)).collect();
    let sub: Vec<String> = sub_raw.iter().map(|c| resolve(c)).collect();
    let dedup: Vec<String> = pk.iter().chain(sub.iter()).cloned().collect();
    let all_cols: Vec<String> = table.columns.keys().map(|c| resolve(c)).collect();

    let qident = |c: &str| format!("\"{}\"", c);
    let pk_list = pk.iter().map(|c| qident(c)).collect::<Vec<_>>().join(", ");
    let dedup_list = dedup.iter().map(|c| qident(c)).collect::<Vec<_>>().join(", ");
    let col_list = all_cols.iter().map(|c| qident(c)).collect::<Vec<_>>().join(", ");
    let temp_col_list = all_cols
        .iter()
        .map(|c| format!("temp.{}", qident(c)))
        .collect::<Vec<_>>()
        .join(", ");
    let first_pk = qident(&pk[0]);
    let target = format!("\"{}\".\"{}\"", postgres_schema, table.name);
    let temp = format!("\"{}\"", temp_name);

    format!(
        "with pks as (
            select distinct on ({pk_list}) {pk_list_temp}
            from {temp} as temp
            join {target} as target using ({pk_list_bare})
            where temp.\"_sdc_sequence\" >= target.\"_sdc_sequence\"
            order by {pk_list}, temp.\"_sdc_sequence\" desc
        )
        delete from {target} as target
        using pks
        where target.{first_pk} = pks.{first_pk}{extra_pk_eq};

        insert into {target} ({col_list})
        select distinct on ({dedup_list}) {temp_col_list}
        from {temp} as temp
        left join {target} as target using ({pk_list_bare})
        where target.{first_pk} is null
        order by {dedup_list}, temp.\"_sdc_sequence\" desc;",
        pk_list = pk_list,
        pk_list_temp = pk
            .iter()
            .map(|c| format!("temp.{}", qident(c)))
            .collect::<Vec<_>>()
            .join(", "),
        pk_list_bare = pk_list,
        temp = temp,
        target = target,
        first_pk = first_pk,
        extra_pk_eq = pk[1..]
            .iter()
            .map(|c| format!(" and target.{} = pks.{}", qident(c), qident(c)))
            .collect::<String>(),
        col_list = col_list,
        dedup_list = dedup_list,
        temp_col_list = temp_col_list,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::Postgres;
    use denest::Mapping as DenestMapping;
    use schema_types::types;
    use std::collections::BTreeMap;

    fn table() -> TableSchema {
        let mut columns = BTreeMap::new();
        columns.insert(
            "id".to_string(),
            schema_types::SimpleSchema {
                types: types::INTEGER,
                format: None,
            },
        );
        columns.insert(
            SEQUENCE.to_string(),
            schema_types::SimpleSchema {
                types: types::INTEGER,
                format: None,
            },
        );
        TableSchema {
            name: "users".to_string(),
            level: None,
            key_properties: vec!["id".to_string()],
            mappings: Vec::<DenestMapping>::new(),
            columns,
        }
    }

    #[test]
    fn merge_sql_mentions_both_statements_and_the_sequence_tiebreak() {
        let dialect = Postgres;
        let table = table();
        let reconciliation = upsert_schema::upsert_table(
            &dialect,
            &RemoteTable {
                name: table.name.clone(),
                columns: HashMap::new(),
                meta: None,
            },
            true,
            &table,
            &[],
        )
        .unwrap();
        let sql = build_merge_sql("public", &table, &reconciliation, "users__tmp");
        assert!(sql.to_lowercase().contains("delete from"));
        assert!(sql.to_lowercase().contains("insert into"));
        assert!(sql.contains("_sdc_sequence"));
    }

    #[test]
    fn mapping_cache_round_trips_per_table() {
        let mut cache = MappingCache::new();
        assert!(cache.get("users").is_empty());
        cache.set(
            "users",
            vec![DenestMapping {
                raw: "Age".to_string(),
                mapped: "age".to_string(),
            }],
        );
        assert_eq!(cache.get("users").len(), 1);
    }
}
