//! `sdc-loader`'s internals, split into a library so integration tests can
//! drive the [`orchestrator::Orchestrator`] directly, the way
//! `examples/estuary-flow/crates/agent` separates its `lib.rs` from a thin
//! `main.rs`.

pub mod config;
pub mod error;
pub mod orchestrator;
pub mod telemetry;
