//! `denest_records`: flattens records in lockstep with `denest_schema`
//! (spec.md §4.2). Resolves the arity open question in design note 1/§9:
//! the recursive call is `denest_subrecord(table_name, next_path,
//! parent_record, value, records_map, key_properties, pk_fks, level)`,
//! matching the outer signature.

use crate::path::Path;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// A single flattened row: column name -> value. Rows accumulate outside
/// of any particular record's lifetime, so they own their data.
pub type Row = BTreeMap<String, Value>;

/// `records_map[table_name]` accumulates rows for every table touched while
/// denesting one batch of records, across repeated calls.
pub type RecordsMap = BTreeMap<String, Vec<Row>>;

/// Denests one top-level `record` for `root_name`, appending rows into
/// `records_map`. `key_properties` establishes `_sdc_source_key_<k>` for
/// every row derived from this record, including nested subtable rows.
pub fn denest_records(
    root_name: &str,
    record: &Map<String, Value>,
    records_map: &mut RecordsMap,
    key_properties: &[String],
) {
    let mut pk_fks: Row = BTreeMap::new();
    for key in key_properties {
        if let Some(value) = record.get(key) {
            pk_fks.insert(format!("_sdc_source_key_{}", key), value.clone());
        }
    }

    let mut root_row: Row = BTreeMap::new();
    let path = Path::new();
    for (name, value) in record {
        denest_subrecord(
            root_name,
            &path.child(name),
            &mut root_row,
            value,
            records_map,
            key_properties,
            &pk_fks,
            /* level = */ None,
        );
    }
    for (k, v) in &pk_fks {
        root_row.entry(k.clone()).or_insert_with(|| v.clone());
    }

    records_map
        .entry(root_name.to_string())
        .or_default()
        .push(root_row);
}

/// Flattens `value` at `path` into `parent_row`, or — for an array value —
/// spawns rows in a subtable of `records_map` instead.
///
/// * object values recurse into the *same* `parent_row` (flattening into
///   the parent);
/// * array values recurse with `level` incremented, writing into a
///   dedicated subtable rather than `parent_row`;
/// * `null` scalars are omitted so they never overwrite a column default;
/// * any other scalar is written at the flattened column name.
///
/// `table_name` names the table `path` accumulates columns within — it is
/// combined with `path` only to name a *new* subtable (`table_name__path`),
/// never folded into a column name itself.
#[allow(clippy::too_many_arguments)]
fn denest_subrecord(
    table_name: &str,
    path: &Path,
    parent_row: &mut Row,
    value: &Value,
    records_map: &mut RecordsMap,
    key_properties: &[String],
    pk_fks: &Row,
    level: Option<usize>,
) {
    match value {
        Value::Null => {
            // omit: do not overwrite defaults
        }
        Value::Object(fields) => {
            for (name, child) in fields {
                denest_subrecord(
                    table_name,
                    &path.child(name),
                    parent_row,
                    child,
                    records_map,
                    key_properties,
                    pk_fks,
                    level,
                );
            }
        }
        Value::Array(items) => {
            let subtable_name = if path.is_empty() {
                table_name.to_string()
            } else {
                format!("{}__{}", table_name, path.rendered())
            };
            let next_level = level.map(|l| l + 1).unwrap_or(0);
            let subtable_path = Path::new();

            for (index, item) in items.iter().enumerate() {
                let mut row = pk_fks.clone();
                // Carry forward ancestor level ids already recorded on the
                // enclosing row (multi-level array nesting).
                for (k, v) in parent_row.iter() {
                    if k.starts_with("_sdc_level_") && k.ends_with("_id") {
                        row.insert(k.clone(), v.clone());
                    }
                }
                row.insert(
                    format!("_sdc_level_{}_id", next_level),
                    Value::from(index as u64),
                );

                match item {
                    Value::Object(fields) => {
                        for (name, child) in fields {
                            denest_subrecord(
                                &subtable_name,
                                &subtable_path.child(name),
                                &mut row,
                                child,
                                records_map,
                                key_properties,
                                pk_fks,
                                Some(next_level),
                            );
                        }
                    }
                    Value::Array(_) => {
                        // Array-of-arrays: re-enter at the same subtable,
                        // one level deeper. The outer positional row still
                        // carries its own level id; the inner array's rows
                        // land in the same subtable bucket.
                        denest_subrecord(
                            &subtable_name,
                            &subtable_path,
                            &mut row,
                            item,
                            records_map,
                            key_properties,
                            pk_fks,
                            Some(next_level),
                        );
                    }
                    Value::Null => {
                        // omit `_sdc_value`
                    }
                    scalar => {
                        row.insert("_sdc_value".to_string(), scalar.clone());
                    }
                }

                records_map
                    .entry(subtable_name.clone())
                    .or_default()
                    .push(row);
            }
        }
        scalar => {
            parent_row.insert(path.rendered(), scalar.clone());
        }
    }
}
