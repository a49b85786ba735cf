//! JSON-Schema utilities (spec.md C1): simplification of `$ref`/`allOf`/
//! `oneOf`/`anyOf`, type classification, and the vendor SQL dialect seam.

pub mod dialect;
pub mod shorthand;
pub mod simplify;
pub mod types;

pub use dialect::{Error as DialectError, SimpleSchema, SqlDialect};
pub use simplify::{simplify, Error as SimplifyError, Simplified};
pub use types::Types;
