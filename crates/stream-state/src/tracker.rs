//! Stream Tracker (spec.md C4): tracks the set of active streams,
//! correlates STATE checkpoints with flush completion, and drives
//! force-flush at shutdown or `ACTIVATE_VERSION`.
//!
//! Design note 2 ("Cyclic ownership") is resolved with a one-way callback:
//! each stream registers a flush closure with the tracker at creation time
//! rather than the tracker holding a live reference into the orchestrator's
//! buffer map. The tracker never reaches back into a `Buffer`; it only
//! knows how many records are outstanding and how to ask a stream to flush.

use futures::future::BoxFuture;
use serde_json::Value;
use std::collections::{BTreeMap, VecDeque};

pub type FlushCallback = Box<dyn Fn() -> BoxFuture<'static, Result<usize, String>> + Send + Sync>;

struct PendingState {
    value: Value,
    /// Records ingested (across all streams) before this checkpoint
    /// arrived, still awaiting commit.
    outstanding: u64,
}

/// Tracks outstanding STATE checkpoints and registered per-stream flush
/// callbacks (spec.md §4.4).
#[derive(Default)]
pub struct Tracker {
    callbacks: BTreeMap<String, FlushCallback>,
    pending_records: u64,
    states: VecDeque<PendingState>,
}

impl Tracker {
    pub fn new() -> Self {
        Tracker::default()
    }

    /// Registers (or replaces) the flush callback for `stream`, supplied by
    /// the orchestrator once at stream creation.
    pub fn register(&mut self, stream: impl Into<String>, flush: FlushCallback) {
        self.callbacks.insert(stream.into(), flush);
    }

    /// Called once per ingested RECORD line, regardless of stream.
    pub fn record_ingested(&mut self) {
        self.pending_records += 1;
    }

    /// Called after a flush commits, with the number of records that batch
    /// committed. Reduces every outstanding checkpoint's count and releases
    /// any whose count has reached zero, in FIFO order.
    pub fn record_committed(&mut self, committed: u64) -> Vec<Value> {
        self.pending_records = self.pending_records.saturating_sub(committed);
        for state in &mut self.states {
            state.outstanding = state.outstanding.saturating_sub(committed);
        }
        self.drain_ready()
    }

    /// Routes a STATE line through the tracker (spec.md §6): queued behind
    /// however many records are currently outstanding, released only once
    /// every record ingested before it has committed.
    pub fn push_state(&mut self, value: Value) -> Vec<Value> {
        self.states.push_back(PendingState {
            value,
            outstanding: self.pending_records,
        });
        self.drain_ready()
    }

    fn drain_ready(&mut self) -> Vec<Value> {
        let mut released = Vec::new();
        while let Some(front) = self.states.front() {
            if front.outstanding == 0 {
                released.push(self.states.pop_front().unwrap().value);
            } else {
                break;
            }
        }
        released
    }

    /// Force-flushes every registered stream (end of input, or
    /// `ACTIVATE_VERSION`), in registration order. A failing stream does
    /// not stop the rest from being attempted (spec.md §5 "Cancellation").
    pub async fn force_flush_all(&mut self) -> Vec<(String, Result<usize, String>)> {
        let mut results = Vec::new();
        let streams: Vec<String> = self.callbacks.keys().cloned().collect();
        for stream in streams {
            let outcome = (self.callbacks[&stream])().await;
            results.push((stream, outcome));
        }
        results
    }

    pub fn outstanding_states(&self) -> usize {
        self.states.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn state_releases_only_after_outstanding_records_commit() {
        let mut tracker = Tracker::new();
        tracker.record_ingested();
        tracker.record_ingested();
        let released = tracker.push_state(json!({"bookmark": 1}));
        assert!(released.is_empty());

        let released = tracker.record_committed(1);
        assert!(released.is_empty());

        let released = tracker.record_committed(1);
        assert_eq!(released, vec![json!({"bookmark": 1})]);
    }

    #[test]
    fn states_release_in_fifo_order() {
        let mut tracker = Tracker::new();
        tracker.record_ingested();
        tracker.push_state(json!(1));
        tracker.record_ingested();
        tracker.push_state(json!(2));

        let released = tracker.record_committed(2);
        assert_eq!(released, vec![json!(1), json!(2)]);
    }

    #[tokio::test]
    async fn force_flush_all_attempts_every_stream_even_if_one_fails() {
        let mut tracker = Tracker::new();
        tracker.register(
            "a",
            Box::new(|| Box::pin(async { Err("boom".to_string()) })),
        );
        tracker.register("b", Box::new(|| Box::pin(async { Ok(3) })));

        let results = tracker.force_flush_all().await;
        assert_eq!(results.len(), 2);
        assert!(results.iter().any(|(s, r)| s == "a" && r.is_err()));
        assert!(results.iter().any(|(s, r)| s == "b" && r == &Ok(3)));
    }
}
