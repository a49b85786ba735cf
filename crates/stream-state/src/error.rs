//! Error kinds for C3/C4 (spec.md §7). `BackendFailure` and
//! `ActivationFailure` belong to `pg_sync`; only the two kinds a buffer or
//! tracker can itself raise live here.

use crate::validate;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("stream {stream:?}: key_properties changed from {old:?} to {new:?}")]
    SchemaDrift {
        stream: String,
        old: Vec<String>,
        new: Vec<String>,
    },
    #[error("{} invalid record(s) exceeded threshold", .0.len())]
    InvalidRecordsExceeded(Vec<InvalidRecord>),
}

/// One rejected record, retained verbatim so a fatal error can report every
/// violation at once (spec.md §8 scenario 6).
#[derive(Debug, Clone)]
pub struct InvalidRecord {
    pub record: serde_json::Value,
    pub errors: Vec<validate::Error>,
}
