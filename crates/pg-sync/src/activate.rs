//! Version activation (spec.md §4.6 "Version activation", §3 "Table
//! version"): swaps a shadow root table (plus its subtables) for the live
//! generation once a stream's `ACTIVATE_VERSION` line arrives.

use crate::error::Error;
use crate::remote_schema::{SchemaCache, TableMeta};
use sqlx::Row;

/// Activates `version` for `stream`: renames every remote table whose name
/// starts with `stream__<version>` (the root plus each subtable) into the
/// live position, dropping the prior generation. A single transaction
/// covers the whole swap so readers never observe a partial rename set.
pub async fn activate_version(
    cache: &SchemaCache,
    stream: &str,
    version: i64,
) -> Result<(), Error> {
    let postgres_schema = cache.postgres_schema();
    let pool = cache.pool();

    let current_meta = fetch_meta(pool, postgres_schema, stream).await?;
    let Some(current_meta) = current_meta else {
        tracing::error!(stream, version, "activate_version: no existing table metadata, nothing to swap");
        return Ok(());
    };
    if current_meta.version == version {
        tracing::warn!(stream, version, "activate_version: already at this version");
        return Ok(());
    }

    let versioned_root = format!("{}__{}", stream, version);
    let candidates = matching_versioned_tables(pool, postgres_schema, &versioned_root).await?;
    if candidates.is_empty() {
        tracing::error!(stream, version, "activate_version: no shadow tables found for this version");
        return Ok(());
    }

    let mut tx = pool.begin().await.map_err(|source| Error::ActivationFailure {
        stream: stream.to_string(),
        source,
    })?;

    let mut swapped_live_names = Vec::new();
    for versioned in &candidates {
        let suffix = versioned
            .strip_prefix(&versioned_root)
            .unwrap_or_default()
            .to_string();
        let live = format!("{}{}", stream, suffix);
        let old = format!("{}__old", live);

        rename_if_exists(&mut tx, postgres_schema, &live, &old)
            .await
            .map_err(|source| Error::ActivationFailure {
                stream: stream.to_string(),
                source,
            })?;
        rename_table(&mut tx, postgres_schema, versioned, &live)
            .await
            .map_err(|source| Error::ActivationFailure {
                stream: stream.to_string(),
                source,
            })?;
        drop_if_exists(&mut tx, postgres_schema, &old)
            .await
            .map_err(|source| Error::ActivationFailure {
                stream: stream.to_string(),
                source,
            })?;

        swapped_live_names.push(live);
    }

    let new_meta = TableMeta {
        key_properties: current_meta.key_properties.clone(),
        version,
    };
    let comment = serde_json::to_string(&new_meta).expect("TableMeta serializes");
    let comment_sql = format!(
        "comment on table \"{}\".\"{}\" is '{}'",
        postgres_schema,
        stream,
        comment.replace('\'', "''"),
    );
    sqlx::raw_sql(&comment_sql)
        .execute(&mut *tx)
        .await
        .map_err(|source| Error::ActivationFailure {
            stream: stream.to_string(),
            source,
        })?;

    tx.commit().await.map_err(|source| Error::ActivationFailure {
        stream: stream.to_string(),
        source,
    })?;

    for live in &swapped_live_names {
        cache.invalidate(live).await;
    }
    Ok(())
}

async fn fetch_meta(
    pool: &sqlx::PgPool,
    postgres_schema: &str,
    table_name: &str,
) -> Result<Option<TableMeta>, Error> {
    let exists: bool = sqlx::query_scalar(
        "select exists(select 1 from information_schema.tables where table_schema = $1 and table_name = $2)",
    )
    .bind(postgres_schema)
    .bind(table_name)
    .fetch_one(pool)
    .await?;
    if !exists {
        return Ok(None);
    }

    let comment: Option<String> = sqlx::query_scalar(
        "select obj_description(format('%I.%I', $1::text, $2::text)::regclass, 'pg_class')",
    )
    .bind(postgres_schema)
    .bind(table_name)
    .fetch_one(pool)
    .await?;
    Ok(comment.and_then(|c| serde_json::from_str(&c).ok()))
}

async fn matching_versioned_tables(
    pool: &sqlx::PgPool,
    postgres_schema: &str,
    versioned_root: &str,
) -> Result<Vec<String>, Error> {
    let like_pattern = format!("{}__%", versioned_root);
    let rows = sqlx::query(
        "select table_name from information_schema.tables \
         where table_schema = $1 and (table_name = $2 or table_name like $3) \
         order by table_name",
    )
    .bind(postgres_schema)
    .bind(versioned_root)
    .bind(&like_pattern)
    .fetch_all(pool)
    .await?;
    rows.into_iter()
        .map(|row| row.try_get::<String, _>("table_name").map_err(Error::from))
        .collect()
}

async fn rename_if_exists(
    tx: &mut sqlx::PgConnection,
    postgres_schema: &str,
    from: &str,
    to: &str,
) -> Result<(), sqlx::Error> {
    let sql = format!(
        "alter table if exists \"{}\".\"{}\" rename to \"{}\"",
        postgres_schema, from, to
    );
    sqlx::raw_sql(&sql).execute(&mut *tx).await?;
    Ok(())
}

async fn rename_table(
    tx: &mut sqlx::PgConnection,
    postgres_schema: &str,
    from: &str,
    to: &str,
) -> Result<(), sqlx::Error> {
    let sql = format!(
        "alter table \"{}\".\"{}\" rename to \"{}\"",
        postgres_schema, from, to
    );
    sqlx::raw_sql(&sql).execute(&mut *tx).await?;
    Ok(())
}

async fn drop_if_exists(
    tx: &mut sqlx::PgConnection,
    postgres_schema: &str,
    table: &str,
) -> Result<(), sqlx::Error> {
    let sql = format!(
        "drop table if exists \"{}\".\"{}\"",
        postgres_schema, table
    );
    sqlx::raw_sql(&sql).execute(&mut *tx).await?;
    Ok(())
}
