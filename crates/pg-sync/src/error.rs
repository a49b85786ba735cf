//! Error kinds for C5/C6 (spec.md §7): `BackendFailure` and
//! `ActivationFailure`, plus the fatal schema-reconciliation outcomes named
//! by the decision table in §4.5.

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(
        "column {raw:?} canonicalizes to {canonical:?}, which already exists on table {table:?} under a different raw name"
    )]
    NameCollision {
        table: String,
        raw: String,
        canonical: String,
    },

    #[error("stream {stream:?}: remote key_properties {remote:?} do not match stream key_properties {local:?}")]
    KeyPropertyMismatch {
        stream: String,
        remote: Vec<String>,
        local: Vec<String>,
    },

    #[error("no reconciliation rule matched for column {column:?} on table {table:?}")]
    UnknownReconciliation { table: String, column: String },

    #[error("table comment metadata missing for {0:?}")]
    MissingTableMetadata(String),

    #[error(transparent)]
    Dialect(#[from] schema_types::dialect::Error),

    #[error(transparent)]
    Denest(#[from] denest::SchemaError),

    #[error("backend failure")]
    BackendFailure(#[from] sqlx::Error),

    #[error("activation failed for stream {stream:?}")]
    ActivationFailure {
        stream: String,
        #[source]
        source: sqlx::Error,
    },
}
