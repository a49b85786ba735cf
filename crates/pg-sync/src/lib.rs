//! PostgreSQL backing-store integration (spec.md C5/C6): connection
//! pooling, the remote-schema cache, schema reconciliation, CSV row
//! serialization, batch writes, and table-version activation.

pub mod activate;
pub mod batch;
pub mod csv_rows;
pub mod dialect;
pub mod error;
pub mod pool;
pub mod remote_schema;
pub mod upsert_schema;

pub use error::Error;
