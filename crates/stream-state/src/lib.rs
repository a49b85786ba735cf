//! Stream Buffer and Stream Tracker (spec.md C3/C4): per-stream record
//! accumulation and cross-stream STATE checkpoint correlation.

pub mod buffer;
pub mod error;
pub mod tracker;
pub mod validate;

pub use buffer::{Buffer, BufferConfig, BufferedRecord};
pub use error::{Error, InvalidRecord};
pub use tracker::{FlushCallback, Tracker};
