//! The Denester (spec.md C2): flattens a schema into a root table plus
//! subtables, and flattens records in lockstep.

pub mod path;
pub mod record;
pub mod schema;
pub mod table;

pub use record::{denest_records, RecordsMap, Row};
pub use schema::{denest_schema, Error as SchemaError};
pub use table::{Mapping, TableSchema};
