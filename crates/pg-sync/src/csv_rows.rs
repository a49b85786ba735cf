//! Row serialization for the bulk-load step (spec.md §4.6 step 9a):
//! CSV rows feeding `COPY ... FROM STDIN WITH (FORMAT csv)`, using the
//! `csv` crate (teacher's own dependency, `Cargo.toml`).
//!
//! Datetimes render as `YYYY-MM-DD HH:mm:ss.SSSSZZ`; nulls and missing
//! columns render as the empty CSV field (Postgres's default `NULL`
//! representation for text-format CSV); every other scalar uses its
//! natural `Display`.

use crate::error::Error;
use crate::upsert_schema::ResolvedColumn;
use chrono::{DateTime, Utc};
use denest::{Row, TableSchema};
use schema_types::SimpleSchema;
use serde_json::Value;
use std::collections::HashMap;

/// Final column names, in the fixed order every row in this batch is
/// serialized in (matches `table.columns`'s deterministic `BTreeMap`
/// iteration order).
pub fn header(table: &TableSchema, resolved: &HashMap<String, ResolvedColumn>) -> Vec<String> {
    table
        .columns
        .keys()
        .map(|raw| resolved[raw].column.clone())
        .collect()
}

/// Serializes `rows` to a CSV byte buffer, one record per row, columns in
/// `table.columns`'s order (raw denester names, each resolved to its final
/// remote column name via `resolved` — the reconciliation's output).
pub fn serialize_rows(
    table: &TableSchema,
    resolved: &HashMap<String, ResolvedColumn>,
    rows: &[Row],
) -> Result<Vec<u8>, Error> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(Vec::new());
    let raws: Vec<&String> = table.columns.keys().collect();

    for row in rows {
        let mut record: Vec<String> = Vec::with_capacity(raws.len());
        for raw in &raws {
            let schema = &table.columns[*raw];
            record.push(format_field(row.get(*raw), schema));
        }
        writer.write_record(&record)?;
    }
    writer.flush()?;
    Ok(writer.into_inner().expect("in-memory writer never fails to unwrap"))
}

fn format_field(value: Option<&Value>, schema: &SimpleSchema) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::Bool(b)) => b.to_string(),
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::String(s)) if schema.shorthand() == "t" => format_datetime(s),
        Some(Value::String(s)) => s.clone(),
        Some(other @ Value::Array(_)) | Some(other @ Value::Object(_)) => other.to_string(),
    }
}

/// Parses an RFC3339 datetime and renders it in the fixed wire format
/// spec.md §4.6 names: `YYYY-MM-DD HH:mm:ss.SSSSZZ`. A value that fails to
/// parse as a datetime is passed through verbatim rather than dropped —
/// the upsert schema's type-split machinery is what absorbs a field that
/// drifted from datetime to plain string, not this serializer.
fn format_datetime(raw: &str) -> String {
    match DateTime::parse_from_rfc3339(raw) {
        Ok(dt) => dt
            .with_timezone(&Utc)
            .format("%Y-%m-%d %H:%M:%S%.4f%z")
            .to_string(),
        Err(_) => raw.to_string(),
    }
}
