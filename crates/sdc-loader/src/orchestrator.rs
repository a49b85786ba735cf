//! The Orchestrator (spec.md C7): glues the tap line protocol to
//! `stream_state::Buffer`/`Tracker` and `pg_sync::batch`, reproducing the
//! line-dispatch loop of
//! `examples/original_source/target_postgres/target_tools.py::stream_to_target`
//! in an async, per-stream-parallel form.

use crate::config::Config;
use crate::error::Error;
use futures::FutureExt;
use pg_sync::batch::{self, MappingCache, PendingRecord};
use pg_sync::dialect::Postgres;
use pg_sync::remote_schema::SchemaCache;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use stream_state::{Buffer, Tracker};
use tap_protocol::{ActivateVersionMessage, Message, RecordMessage, SchemaMessage, StateMessage};
use tokio::sync::Mutex;

struct StreamHandle {
    buffer: Arc<Mutex<Buffer>>,
    mappings: Arc<Mutex<MappingCache>>,
}

/// Drives one tap session end to end. Owns every stream's buffer and
/// carried-forward column-mapping state; the [`Tracker`] only ever reaches
/// streams through the one-way callbacks registered here (design note 2).
pub struct Orchestrator {
    cache: Arc<SchemaCache>,
    config: Config,
    streams: HashMap<String, StreamHandle>,
    tracker: Tracker,
    lines_since_probe: usize,
}

impl Orchestrator {
    pub fn new(cache: Arc<SchemaCache>, config: Config) -> Self {
        Orchestrator {
            cache,
            config,
            streams: HashMap::new(),
            tracker: Tracker::new(),
            lines_since_probe: 0,
        }
    }

    /// Dispatches one parsed tap line (spec.md §6). Returns any STATE
    /// payloads now cleared to re-emit on stdout.
    pub async fn handle(&mut self, message: Message) -> Result<Vec<Value>, Error> {
        match message {
            Message::Schema(msg) => {
                self.handle_schema(msg).await?;
                Ok(Vec::new())
            }
            Message::Record(msg) => self.handle_record(msg).await,
            Message::ActivateVersion(msg) => self.handle_activate_version(msg).await,
            Message::State(msg) => Ok(self.handle_state(msg)),
        }
    }

    async fn handle_schema(&mut self, msg: SchemaMessage) -> Result<(), Error> {
        if let Some(handle) = self.streams.get(&msg.stream) {
            handle
                .buffer
                .lock()
                .await
                .update_schema(&msg.schema, msg.key_properties)?;
            return Ok(());
        }

        let buffer = Buffer::new(
            msg.stream.clone(),
            &msg.schema,
            msg.key_properties,
            self.config.buffer_config(),
        )
        .map_err(|source| Error::Schema {
            stream: msg.stream.clone(),
            source,
        })?;
        let buffer = Arc::new(Mutex::new(buffer));
        let mappings = Arc::new(Mutex::new(MappingCache::new()));

        let callback_cache = self.cache.clone();
        let callback_buffer = buffer.clone();
        let callback_mappings = mappings.clone();
        let callback_stream = msg.stream.clone();
        self.tracker.register(
            msg.stream.clone(),
            Box::new(move || {
                let cache = callback_cache.clone();
                let buffer = callback_buffer.clone();
                let mappings = callback_mappings.clone();
                let stream = callback_stream.clone();
                flush_one(cache, buffer, mappings, stream)
                    .map(|r| r.map_err(|e| e.to_string()))
                    .boxed()
            }),
        );

        self.streams.insert(
            msg.stream,
            StreamHandle { buffer, mappings },
        );
        Ok(())
    }

    async fn handle_record(&mut self, msg: RecordMessage) -> Result<Vec<Value>, Error> {
        let handle = self.streams.get(&msg.stream).ok_or_else(|| Error::UnknownStream {
            stream: msg.stream.clone(),
            message_type: "RECORD",
        })?;
        handle.buffer.lock().await.add_record_message(&msg)?;
        self.tracker.record_ingested();

        self.lines_since_probe += 1;
        if self.lines_since_probe < self.config.batch_detection_threshold {
            return Ok(Vec::new());
        }
        self.lines_since_probe = 0;
        self.probe_and_flush_full_streams().await
    }

    async fn handle_activate_version(&mut self, msg: ActivateVersionMessage) -> Result<Vec<Value>, Error> {
        let handle = self.streams.get(&msg.stream).ok_or_else(|| Error::UnknownStream {
            stream: msg.stream.clone(),
            message_type: "ACTIVATE_VERSION",
        })?;
        let committed = flush_one(
            self.cache.clone(),
            handle.buffer.clone(),
            handle.mappings.clone(),
            msg.stream.clone(),
        )
        .await?;
        let released = self.tracker.record_committed(committed as u64);

        pg_sync::activate::activate_version(&self.cache, &msg.stream, msg.version).await?;
        Ok(released)
    }

    fn handle_state(&mut self, msg: StateMessage) -> Vec<Value> {
        if !self.config.state_support {
            return vec![msg.value];
        }
        self.tracker.push_state(msg.value)
    }

    /// Probes every stream's buffer for fullness (spec.md §6
    /// `batch_detection_threshold`) and flushes the ones that have crossed
    /// a ceiling, releasing any STATE checkpoints their commit unblocks.
    async fn probe_and_flush_full_streams(&mut self) -> Result<Vec<Value>, Error> {
        let mut full = Vec::new();
        for (stream, handle) in &self.streams {
            if handle.buffer.lock().await.buffer_full() {
                full.push(stream.clone());
            }
        }

        let mut released = Vec::new();
        for stream in full {
            let handle = &self.streams[&stream];
            let committed = flush_one(
                self.cache.clone(),
                handle.buffer.clone(),
                handle.mappings.clone(),
                stream,
            )
            .await?;
            released.extend(self.tracker.record_committed(committed as u64));
        }
        Ok(released)
    }

    /// Force-flushes every stream (spec.md §5 "Cancellation", end of
    /// input). A failing stream doesn't stop the rest from being attempted;
    /// failures are returned for the caller to log and exit non-zero on.
    pub async fn shutdown(&mut self) -> (Vec<Value>, Vec<(String, String)>) {
        let results = self.tracker.force_flush_all().await;
        let mut failures = Vec::new();
        let mut committed_total = 0u64;
        for (stream, outcome) in results {
            match outcome {
                Ok(committed) => committed_total += committed as u64,
                Err(error) => failures.push((stream, error)),
            }
        }
        let released = self.tracker.record_committed(committed_total);
        (released, failures)
    }

    pub fn stream_count(&self) -> usize {
        self.streams.len()
    }
}

/// The actual flush body shared by the tracker callback, `ACTIVATE_VERSION`
/// handling, and buffer-fullness probing: drain the buffer, hand the rows
/// to the Batch Writer, and swap in whatever column mappings it produced.
async fn flush_one(
    cache: Arc<SchemaCache>,
    buffer: Arc<Mutex<Buffer>>,
    mappings: Arc<Mutex<MappingCache>>,
    stream: String,
) -> Result<usize, Error> {
    let mut buffer = buffer.lock().await;
    let drained = buffer.flush_buffer();
    if drained.is_empty() {
        return Ok(0);
    }
    let pending: Vec<PendingRecord> = drained
        .into_iter()
        .map(|r| PendingRecord {
            record: r.record,
            received_at: r.received_at,
            sequence: r.sequence,
            version: r.version,
        })
        .collect();
    let schema = buffer.schema().clone();
    let key_properties = buffer.key_properties().to_vec();
    let use_uuid_pk = buffer.use_uuid_pk();
    drop(buffer);

    let dialect = Postgres;
    let mut mappings = mappings.lock().await;
    let outcome = batch::flush_stream(
        &cache,
        &dialect,
        &stream,
        &schema,
        &key_properties,
        use_uuid_pk,
        &pending,
        &mut mappings,
    )
    .await?;
    Ok(outcome.rows_written as usize)
}
