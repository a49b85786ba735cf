//! Schema Upserter (spec.md C5, §4.5): reconciles a streamed `TableSchema`
//! against the remote catalog, emitting column add / nullability relax /
//! type-split migrations per the ten-rule decision table, evaluated in
//! order, first match wins.

use crate::error::Error;
use crate::remote_schema::{ColumnInfo, RemoteTable};
use denest::{Mapping, TableSchema};
use schema_types::{SimpleSchema, SqlDialect};
use std::collections::HashMap;

/// One schema-evolution step the caller must apply as DDL, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum Migration {
    AddColumn { column: String, sql_type: String },
    MakeNullable { column: String },
    DropColumn { column: String },
    /// `UPDATE table SET "to" = "from"` — issued before `DropColumn { from }`.
    MigrateData { from: String, to: String },
}

/// Where a raw (denester-produced) column name ultimately lands, plus the
/// SQL type its temp-table counterpart should declare.
#[derive(Debug, Clone)]
pub struct ResolvedColumn {
    pub column: String,
    pub sql_type: String,
}

#[derive(Debug, Clone, Default)]
pub struct Reconciliation {
    pub migrations: Vec<Migration>,
    pub mappings: Vec<Mapping>,
    pub columns: HashMap<String, ResolvedColumn>,
}

/// Reconciles every column of `local` against `remote`, threading a
/// mutating working view of the remote catalog through the column list so
/// that within the same batch, a second raw column canonicalizing to a name
/// just added by a first is detected as a collision too (spec.md §4.5 rule
/// 1 names only "remote already has", but a batch-local addition is
/// logically the same remote state one statement later).
pub fn upsert_table(
    dialect: &dyn SqlDialect,
    remote: &RemoteTable,
    table_is_empty: bool,
    local: &TableSchema,
    existing_mappings: &[Mapping],
) -> Result<Reconciliation, Error> {
    let mut working: HashMap<String, ColumnInfo> = remote.columns.clone();
    let mut mappings: Vec<Mapping> = existing_mappings.to_vec();
    let mut migrations = Vec::new();
    let mut columns = HashMap::new();

    for (raw, local_schema) in &local.columns {
        let canonical = dialect.canonicalize_identifier(raw)?;
        let shorthand = local_schema.shorthand();
        let typed = format!("{}__{}", canonical, shorthand);
        let already_mapped = mappings.iter().any(|m| &m.raw == raw);

        let canonical_present = working.contains_key(&canonical);
        let any_typed_variant = working
            .keys()
            .any(|k| k.starts_with(&format!("{}__", canonical)));

        // Rule 1: NAME COLLISION.
        if raw != &canonical && !already_mapped && (canonical_present || any_typed_variant) {
            return Err(Error::NameCollision {
                table: local.name.clone(),
                raw: raw.clone(),
                canonical,
            });
        }

        // Rule 2/3: EXISTS EXACT (or via nullable relax) under `canonical`.
        if let Some(info) = working.get(&canonical) {
            if remote_shorthand(dialect, info)? == shorthand {
                let resolved = reconcile_existing(
                    dialect,
                    &mut working,
                    &mut migrations,
                    &canonical,
                    info.clone(),
                    local_schema,
                )?;
                columns.insert(raw.clone(), resolved);
                continue;
            }
        }

        // Rule 2/3: EXISTS EXACT under the `typed` name (split already
        // happened, or this raw was previously renamed without a split).
        if let Some(info) = working.get(&typed) {
            if remote_shorthand(dialect, info)? == shorthand {
                let resolved = reconcile_existing(
                    dialect,
                    &mut working,
                    &mut migrations,
                    &typed,
                    info.clone(),
                    local_schema,
                )?;
                if raw != &typed {
                    upsert_mapping(&mut mappings, raw, &typed);
                }
                columns.insert(raw.clone(), resolved);
                continue;
            }
        }

        // Rule 4: FIRST TYPE SPLIT — canonical exists with a different type family.
        if let Some(info) = working.get(&canonical).cloned() {
            let old_shorthand = remote_shorthand(dialect, &info)?;
            let old_tag = format!("{}__{}", canonical, old_shorthand);
            let new_tag = typed.clone();

            mappings.retain(|m| m.mapped != canonical);

            migrations.push(Migration::AddColumn {
                column: old_tag.clone(),
                sql_type: dialect.to_sql(&info_as_nullable_schema(dialect, &info)?),
            });
            migrations.push(Migration::AddColumn {
                column: new_tag.clone(),
                sql_type: dialect.to_sql(&local_schema.make_nullable()),
            });
            migrations.push(Migration::MigrateData {
                from: canonical.clone(),
                to: old_tag.clone(),
            });
            migrations.push(Migration::DropColumn {
                column: canonical.clone(),
            });

            working.remove(&canonical);
            working.insert(
                old_tag.clone(),
                ColumnInfo {
                    sql_type: info.sql_type.clone(),
                    is_nullable: true,
                },
            );
            working.insert(
                new_tag.clone(),
                ColumnInfo {
                    sql_type: remote_type_name(dialect, local_schema)?,
                    is_nullable: true,
                },
            );

            upsert_mapping(&mut mappings, raw, &old_tag);
            upsert_mapping(&mut mappings, raw, &new_tag);

            columns.insert(
                raw.clone(),
                ResolvedColumn {
                    column: new_tag.clone(),
                    sql_type: dialect.to_sql(&local_schema.make_nullable()),
                },
            );
            continue;
        }

        // Rule 5: MULTI TYPE SPLIT — raw already mapped, this shorthand's
        // tagged column doesn't exist yet.
        if already_mapped {
            migrations.push(Migration::AddColumn {
                column: typed.clone(),
                sql_type: dialect.to_sql(&local_schema.make_nullable()),
            });
            working.insert(
                typed.clone(),
                ColumnInfo {
                    sql_type: remote_type_name(dialect, local_schema)?,
                    is_nullable: true,
                },
            );
            upsert_mapping(&mut mappings, raw, &typed);
            columns.insert(
                raw.clone(),
                ResolvedColumn {
                    column: typed.clone(),
                    sql_type: dialect.to_sql(&local_schema.make_nullable()),
                },
            );
            continue;
        }

        if raw == &canonical {
            // Rule 6/7: NEW, CANONICAL == RAW.
            let schema = if table_is_empty {
                local_schema.clone()
            } else {
                local_schema.make_nullable()
            };
            migrations.push(Migration::AddColumn {
                column: canonical.clone(),
                sql_type: dialect.to_sql(&schema),
            });
            working.insert(
                canonical.clone(),
                ColumnInfo {
                    sql_type: remote_type_name(dialect, &schema)?,
                    is_nullable: schema.is_nullable(),
                },
            );
            columns.insert(
                raw.clone(),
                ResolvedColumn {
                    column: canonical.clone(),
                    sql_type: dialect.to_sql(&schema),
                },
            );
            continue;
        }

        // Rule 8/9: NEW, CANONICAL != RAW.
        let schema = if table_is_empty {
            local_schema.clone()
        } else {
            local_schema.make_nullable()
        };
        migrations.push(Migration::AddColumn {
            column: canonical.clone(),
            sql_type: dialect.to_sql(&schema),
        });
        working.insert(
            canonical.clone(),
            ColumnInfo {
                sql_type: remote_type_name(dialect, &schema)?,
                is_nullable: schema.is_nullable(),
            },
        );
        upsert_mapping(&mut mappings, raw, &canonical);
        columns.insert(
            raw.clone(),
            ResolvedColumn {
                column: canonical.clone(),
                sql_type: dialect.to_sql(&schema),
            },
        );
    }

    Ok(Reconciliation {
        migrations,
        mappings,
        columns,
    })
}

/// Handles the no-op / nullable-relax branch common to both the
/// `canonical`-named and `typed`-named exact-match cases (rules 2 and 3).
fn reconcile_existing(
    dialect: &dyn SqlDialect,
    working: &mut HashMap<String, ColumnInfo>,
    migrations: &mut Vec<Migration>,
    column: &str,
    info: ColumnInfo,
    local_schema: &SimpleSchema,
) -> Result<ResolvedColumn, Error> {
    if !info.is_nullable && local_schema.is_nullable() {
        migrations.push(Migration::MakeNullable {
            column: column.to_string(),
        });
        working.insert(
            column.to_string(),
            ColumnInfo {
                sql_type: info.sql_type,
                is_nullable: true,
            },
        );
    }
    let nullable = working[column].is_nullable || local_schema.is_nullable();
    let effective = if nullable {
        local_schema.make_nullable()
    } else {
        local_schema.clone()
    };
    Ok(ResolvedColumn {
        column: column.to_string(),
        sql_type: dialect.to_sql(&effective),
    })
}

fn upsert_mapping(mappings: &mut Vec<Mapping>, raw: &str, mapped: &str) {
    if !mappings
        .iter()
        .any(|m| m.raw == raw && m.mapped == mapped)
    {
        mappings.push(Mapping {
            raw: raw.to_string(),
            mapped: mapped.to_string(),
        });
    }
}

fn remote_shorthand(dialect: &dyn SqlDialect, info: &ColumnInfo) -> Result<&'static str, Error> {
    Ok(dialect
        .from_sql(&info.sql_type, info.is_nullable)?
        .shorthand())
}

fn remote_type_name(dialect: &dyn SqlDialect, schema: &SimpleSchema) -> Result<String, Error> {
    // The temp-table/DDL type string already carries nullability as a
    // trailing clause for some dialects; `ColumnInfo::sql_type` should
    // instead hold just the bare type family so a later `from_sql` round
    // trip can recover it. Strip a trailing `not null` if present.
    let rendered = dialect.to_sql(schema);
    Ok(rendered
        .trim_end_matches(" not null")
        .to_string())
}

fn info_as_nullable_schema(
    dialect: &dyn SqlDialect,
    info: &ColumnInfo,
) -> Result<SimpleSchema, Error> {
    Ok(dialect.from_sql(&info.sql_type, true)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::Postgres;
    use schema_types::types;
    use std::collections::BTreeMap;

    fn remote(columns: &[(&str, &str, bool)]) -> RemoteTable {
        RemoteTable {
            name: "t".to_string(),
            columns: columns
                .iter()
                .map(|(name, ty, nullable)| {
                    (
                        name.to_string(),
                        ColumnInfo {
                            sql_type: ty.to_string(),
                            is_nullable: *nullable,
                        },
                    )
                })
                .collect(),
            meta: None,
        }
    }

    fn table(columns: &[(&str, SimpleSchema)]) -> TableSchema {
        let mut map = BTreeMap::new();
        for (name, schema) in columns {
            map.insert(name.to_string(), schema.clone());
        }
        TableSchema {
            name: "t".to_string(),
            level: None,
            key_properties: vec!["id".to_string()],
            mappings: Vec::new(),
            columns: map,
        }
    }

    fn simple(types: schema_types::Types) -> SimpleSchema {
        SimpleSchema { types, format: None }
    }

    #[test]
    fn new_column_on_empty_table_keeps_declared_nullability() {
        let dialect = Postgres;
        let remote = remote(&[]);
        let local = table(&[("age", simple(types::INTEGER))]);
        let rec = upsert_table(&dialect, &remote, true, &local, &[]).unwrap();
        assert_eq!(rec.migrations.len(), 1);
        assert!(matches!(&rec.migrations[0], Migration::AddColumn { column, sql_type }
            if column == "age" && sql_type == "bigint not null"));
    }

    #[test]
    fn new_column_on_nonempty_table_is_forced_nullable() {
        let dialect = Postgres;
        let remote = remote(&[("id", "bigint", false)]);
        let local = table(&[("age", simple(types::INTEGER))]);
        let rec = upsert_table(&dialect, &remote, false, &local, &[]).unwrap();
        assert!(matches!(&rec.migrations[0], Migration::AddColumn { sql_type, .. }
            if sql_type == "bigint"));
    }

    #[test]
    fn exact_match_is_a_no_op() {
        let dialect = Postgres;
        let remote = remote(&[("age", "bigint", false)]);
        let local = table(&[("age", simple(types::INTEGER))]);
        let rec = upsert_table(&dialect, &remote, false, &local, &[]).unwrap();
        assert!(rec.migrations.is_empty());
        assert_eq!(rec.columns["age"].column, "age");
    }

    #[test]
    fn nullable_relax_issues_migration() {
        let dialect = Postgres;
        let remote = remote(&[("age", "bigint", false)]);
        let local = table(&[("age", simple(types::INTEGER | types::NULL))]);
        let rec = upsert_table(&dialect, &remote, false, &local, &[]).unwrap();
        assert!(matches!(&rec.migrations[0], Migration::MakeNullable { column } if column == "age"));
    }

    #[test]
    fn type_split_replaces_canonical_with_two_tagged_columns() {
        let dialect = Postgres;
        let remote = remote(&[("age", "bigint", false)]);
        let local = table(&[("age", simple(types::STRING))]);
        let rec = upsert_table(&dialect, &remote, false, &local, &[]).unwrap();

        assert!(rec
            .migrations
            .iter()
            .any(|m| matches!(m, Migration::AddColumn { column, .. } if column == "age__i")));
        assert!(rec
            .migrations
            .iter()
            .any(|m| matches!(m, Migration::AddColumn { column, .. } if column == "age__s")));
        assert!(rec
            .migrations
            .iter()
            .any(|m| matches!(m, Migration::MigrateData { from, to } if from == "age" && to == "age__i")));
        assert!(rec
            .migrations
            .iter()
            .any(|m| matches!(m, Migration::DropColumn { column } if column == "age")));
        assert_eq!(rec.columns["age"].column, "age__s");
        assert!(rec.mappings.iter().any(|m| m.raw == "age" && m.mapped == "age__i"));
        assert!(rec.mappings.iter().any(|m| m.raw == "age" && m.mapped == "age__s"));
    }

    #[test]
    fn multi_type_split_adds_a_third_tagged_column() {
        let dialect = Postgres;
        let remote = remote(&[("age__i", "bigint", true), ("age__s", "text", true)]);
        let local = table(&[("age", simple(types::BOOLEAN))]);
        let existing = vec![
            Mapping {
                raw: "age".to_string(),
                mapped: "age__i".to_string(),
            },
            Mapping {
                raw: "age".to_string(),
                mapped: "age__s".to_string(),
            },
        ];
        let rec = upsert_table(&dialect, &remote, false, &local, &existing).unwrap();
        assert!(matches!(&rec.migrations[0], Migration::AddColumn { column, .. } if column == "age__b"));
        assert_eq!(rec.columns["age"].column, "age__b");
    }

    #[test]
    fn raw_name_colliding_with_existing_canonical_is_fatal() {
        let dialect = Postgres;
        let remote = remote(&[("weird_name", "bigint", false)]);
        let local = table(&[("Weird Name", simple(types::INTEGER))]);
        let result = upsert_table(&dialect, &remote, false, &local, &[]);
        assert!(matches!(result, Err(Error::NameCollision { .. })));
    }

    #[test]
    fn renamed_raw_on_empty_table_registers_a_mapping() {
        let dialect = Postgres;
        let remote = remote(&[]);
        let local = table(&[("Weird Name", simple(types::INTEGER))]);
        let rec = upsert_table(&dialect, &remote, true, &local, &[]).unwrap();
        assert_eq!(rec.columns["Weird Name"].column, "weird_name");
        assert!(rec
            .mappings
            .iter()
            .any(|m| m.raw == "Weird Name" && m.mapped == "weird_name"));
    }
}
