//! The `TableSchema`/`Subtable` data model (spec.md §3).

use schema_types::SimpleSchema;
use std::collections::BTreeMap;

/// A recorded rename from a raw field name to a canonical or type-tagged
/// column name (spec.md §4.5). Populated by schema reconciliation
/// (`pg_sync::upsert_schema`), not by the denester — a freshly denested
/// `TableSchema` always starts with an empty `mappings` list; callers that
/// track a stream across multiple flushes must carry the previous
/// `mappings` forward themselves.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Mapping {
    pub raw: String,
    pub mapped: String,
}

/// One relational table: the root table of a stream, or a subtable derived
/// from an array-valued path.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct TableSchema {
    pub name: String,
    /// `None` for the root table; `Some(level)` for a subtable, where
    /// `level` is the nesting depth of array ancestors (0-based).
    pub level: Option<usize>,
    /// Composite primary key column names, in order. For the root table
    /// these are the stream's `key_properties` (or `["_sdc_primary_key"]`
    /// if synthesized). For a subtable these are
    /// `_sdc_source_key_<k>`... followed by `_sdc_level_<i>_id`...
    pub key_properties: Vec<String>,
    pub mappings: Vec<Mapping>,
    #[serde(with = "column_map_serde")]
    pub columns: BTreeMap<String, SimpleSchema>,
}

impl TableSchema {
    pub fn is_root(&self) -> bool {
        self.level.is_none()
    }

    pub fn source_key_columns(&self) -> impl Iterator<Item = &str> {
        self.key_properties
            .iter()
            .map(String::as_str)
            .filter(|c| c.starts_with("_sdc_source_key_"))
    }

    pub fn level_id_columns(&self) -> impl Iterator<Item = &str> {
        self.key_properties
            .iter()
            .map(String::as_str)
            .filter(|c| c.starts_with("_sdc_level_") && c.ends_with("_id"))
    }
}

mod column_map_serde {
    use schema_types::{SimpleSchema, Types};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::collections::BTreeMap;

    #[derive(Serialize, Deserialize)]
    struct Col {
        types: Vec<String>,
        format: Option<String>,
    }

    pub fn serialize<S: Serializer>(
        map: &BTreeMap<String, SimpleSchema>,
        ser: S,
    ) -> Result<S::Ok, S::Error> {
        let as_cols: BTreeMap<&String, Col> = map
            .iter()
            .map(|(k, v)| {
                (
                    k,
                    Col {
                        types: v.types.iter().map(str::to_string).collect(),
                        format: v.format.clone(),
                    },
                )
            })
            .collect();
        as_cols.serialize(ser)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        de: D,
    ) -> Result<BTreeMap<String, SimpleSchema>, D::Error> {
        let cols: BTreeMap<String, Col> = BTreeMap::deserialize(de)?;
        Ok(cols
            .into_iter()
            .map(|(k, v)| {
                let types = v.types.iter().collect::<Types>();
                (
                    k,
                    SimpleSchema {
                        types,
                        format: v.format,
                    },
                )
            })
            .collect())
    }
}
