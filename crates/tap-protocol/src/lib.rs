//! The tap line protocol (spec.md C1/§6): parses a Singer-style
//! newline-delimited message stream into typed [`Message`] values.

pub mod lines;
pub mod message;

pub use lines::{Error as LineError, Line, MessageReader};
pub use message::{ActivateVersionMessage, Message, RecordMessage, SchemaMessage, StateMessage};
