//! The per-vendor SQL dialect strategy behind `to_sql`/`from_sql` and
//! identifier canonicalization (spec.md §4.1, §4.5). `spec.md` treats the
//! dialect layer as an external collaborator; this trait is the seam it
//! plugs into. `pg_sync::dialect::Postgres` is the sole production impl.

use crate::types::{self, Types};
use regex::Regex;
use std::sync::OnceLock;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("unrecognized SQL type {0:?}")]
    UnknownSqlType(String),
}

/// A simplified schema node, as produced by [`crate::simplify::simplify`].
/// Carries just enough of the JSON-Schema node to pick a SQL column type.
#[derive(Debug, Clone, PartialEq)]
pub struct SimpleSchema {
    pub types: Types,
    pub format: Option<String>,
}

impl SimpleSchema {
    pub fn is_nullable(&self) -> bool {
        self.types.overlaps(types::NULL)
    }

    pub fn make_nullable(&self) -> SimpleSchema {
        SimpleSchema {
            types: self.types | types::NULL,
            format: self.format.clone(),
        }
    }

    pub fn shorthand(&self) -> &'static str {
        crate::shorthand::sql_shorthand(self.types, self.format.as_deref())
    }
}

pub trait SqlDialect: Send + Sync {
    /// Concrete SQL column type for a simplified schema node.
    fn to_sql(&self, schema: &SimpleSchema) -> String;

    /// Schema node implied by a SQL type name round-tripped from the remote
    /// catalog.
    fn from_sql(&self, type_name: &str, is_nullable: bool) -> Result<SimpleSchema, Error>;

    /// Vendor canonicalization of a raw stream field name into a legal
    /// column identifier: lowercasing, illegal-character substitution,
    /// truncation to `max_identifier_length`.
    fn canonicalize_identifier(&self, raw: &str) -> Result<String, Error>;

    fn max_identifier_length(&self) -> usize;
}

fn illegal_run() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[^a-z0-9_]+").unwrap())
}

/// Shared canonicalization routine: lowercase, substitute runs of illegal
/// characters with a single `_`, ensure it starts with a letter or
/// underscore, then truncate to `max_len`. Mirrors the original
/// `target-postgres`'s `canonicalize_identifier` (`sql_base.py:482`), which
/// is applied to the denester's already-flattened column name and only
/// lowercases/truncates — it never rejects or collapses a `__` the
/// denester put there on purpose (spec.md §4.2). A raw stream field that
/// happens to contain `__` canonicalizes the same way; any resulting
/// ambiguity with a denester-produced path is caught by `upsert_table`'s
/// name-collision rule (spec.md §4.5 rule 1, §9), not rejected here.
pub fn canonicalize(raw: &str, max_len: usize) -> Result<String, Error> {
    let lowered = raw.to_lowercase();
    let substituted = illegal_run().replace_all(&lowered, "_").into_owned();
    let prefixed = match substituted.chars().next() {
        Some(c) if c.is_ascii_digit() => format!("_{}", substituted),
        Some(_) => substituted,
        None => "_".to_string(),
    };
    let truncated: String = prefixed.chars().take(max_len).collect();
    Ok(truncated)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonicalize_is_idempotent() {
        let raw = "Weird Column-Name!!1";
        let once = canonicalize(raw, 63).unwrap();
        let twice = canonicalize(&once, 63).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn canonicalize_preserves_the_denesters_own_separator() {
        // `address__zip` is the denester's own flattened column name, not a
        // raw field somebody wrote with double underscores; canonicalize
        // must pass it through unchanged rather than reject or collapse it.
        assert_eq!(canonicalize("address__zip", 63).unwrap(), "address__zip");
    }

    #[test]
    fn canonicalize_truncates() {
        let long = "x".repeat(100);
        assert_eq!(canonicalize(&long, 10).unwrap().len(), 10);
    }
}
