//! Unifies every library crate's error type at the orchestrator boundary
//! (spec.md §7), grounded on `examples/estuary-flow/crates/agent/src/drafts.rs`'s
//! transparent-wrapping pattern.

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("malformed tap input")]
    Line(#[from] tap_protocol::LineError),

    #[error(transparent)]
    Buffer(#[from] stream_state::Error),

    #[error(transparent)]
    PgSync(#[from] pg_sync::Error),

    #[error("invalid schema for stream {stream:?}")]
    Schema {
        stream: String,
        #[source]
        source: schema_types::SimplifyError,
    },

    #[error("{message_type} for unknown stream {stream:?} (no prior SCHEMA)")]
    UnknownStream {
        stream: String,
        message_type: &'static str,
    },
}
