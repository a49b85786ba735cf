//! Stream Buffer (spec.md C3): a per-stream validated record accumulator
//! with row-count/byte-size ceilings and table-version tracking.

use crate::error::{Error, InvalidRecord};
use crate::validate;
use chrono::{DateTime, Utc};
use schema_types::{simplify, Simplified};
use serde_json::{Map, Value};
use tap_protocol::RecordMessage;

/// The four buffer-sizing options from spec.md §6, reused as-is by every
/// stream's buffer (the orchestrator owns one copy, shared by reference).
#[derive(Debug, Clone)]
pub struct BufferConfig {
    pub invalid_records_detect: bool,
    pub invalid_records_threshold: usize,
    pub max_batch_rows: usize,
    pub max_batch_size: usize,
}

impl Default for BufferConfig {
    fn default() -> Self {
        BufferConfig {
            invalid_records_detect: true,
            invalid_records_threshold: 0,
            max_batch_rows: 200_000,
            max_batch_size: 100 * 1024 * 1024,
        }
    }
}

/// A buffered record, augmented just enough to survive until the Batch
/// Writer injects the remaining metadata columns at flush time (spec.md
/// §4.6 step 2). `received_at` and `sequence` are captured here, at ingest
/// time, rather than recomputed later, since both may default from
/// wall-clock values that must be stable for this particular line.
#[derive(Debug, Clone)]
pub struct BufferedRecord {
    pub record: Map<String, Value>,
    pub received_at: DateTime<Utc>,
    pub sequence: i64,
    pub version: Option<i64>,
}

/// Per-stream validated record accumulator (spec.md §4.3).
pub struct Buffer {
    stream: String,
    schema: Simplified,
    key_properties: Vec<String>,
    use_uuid_pk: bool,
    rows: Vec<BufferedRecord>,
    count: usize,
    size: usize,
    lifetime_max_version: Option<i64>,
    invalid_records: Vec<InvalidRecord>,
    config: BufferConfig,
}

impl Buffer {
    pub fn new(
        stream: impl Into<String>,
        schema: &Value,
        key_properties: Vec<String>,
        config: BufferConfig,
    ) -> Result<Self, simplify::Error> {
        let simplified = simplify::simplify(schema, schema)?;
        let use_uuid_pk = key_properties.is_empty();
        Ok(Buffer {
            stream: stream.into(),
            schema: simplified,
            key_properties,
            use_uuid_pk,
            rows: Vec::new(),
            count: 0,
            size: 0,
            lifetime_max_version: None,
            invalid_records: Vec::new(),
            config,
        })
    }

    pub fn key_properties(&self) -> &[String] {
        &self.key_properties
    }

    pub fn use_uuid_pk(&self) -> bool {
        self.use_uuid_pk
    }

    pub fn schema(&self) -> &Simplified {
        &self.schema
    }

    pub fn lifetime_max_version(&self) -> Option<i64> {
        self.lifetime_max_version
    }

    /// Re-simplifies and installs a new schema for this stream (spec.md
    /// §4.3). `key_properties` may not change once non-empty — a later
    /// SCHEMA naming a different non-empty set is `SchemaDrift`.
    pub fn update_schema(
        &mut self,
        schema: &Value,
        key_properties: Vec<String>,
    ) -> Result<(), Error> {
        if !self.key_properties.is_empty()
            && !key_properties.is_empty()
            && self.key_properties != key_properties
        {
            return Err(Error::SchemaDrift {
                stream: self.stream.clone(),
                old: self.key_properties.clone(),
                new: key_properties,
            });
        }
        let simplified = simplify::simplify(schema, schema).map_err(|e| Error::SchemaDrift {
            stream: self.stream.clone(),
            old: self.key_properties.clone(),
            new: vec![format!("<unsimplifiable: {e}>")],
        })?;
        self.schema = simplified;
        if !key_properties.is_empty() {
            self.key_properties = key_properties;
            self.use_uuid_pk = false;
        } else if self.key_properties.is_empty() {
            self.use_uuid_pk = true;
        }
        Ok(())
    }

    /// Ingests one RECORD line (spec.md §4.3 step-by-step).
    pub fn add_record_message(&mut self, msg: &RecordMessage) -> Result<(), Error> {
        if let Some(incoming) = msg.version {
            match self.lifetime_max_version {
                None => self.lifetime_max_version = Some(incoming),
                Some(current) if incoming > current => {
                    let dropped = self.rows.len();
                    tracing::warn!(
                        stream = %self.stream,
                        dropped,
                        old_version = current,
                        new_version = incoming,
                        "table version advanced; dropping buffered records from prior version"
                    );
                    self.flush_buffer();
                    self.lifetime_max_version = Some(incoming);
                }
                Some(current) if incoming < current => {
                    tracing::warn!(
                        stream = %self.stream,
                        stale_version = incoming,
                        current_version = current,
                        "dropping record from stale table version"
                    );
                    return Ok(());
                }
                _ => {}
            }
        }

        let record_value = Value::Object(msg.record.clone());
        let errors = validate::validate(&self.schema, &record_value);
        if !errors.is_empty() {
            self.invalid_records.push(InvalidRecord {
                record: record_value,
                errors,
            });
            if self.config.invalid_records_detect
                && self.invalid_records.len() > self.config.invalid_records_threshold
            {
                return Err(Error::InvalidRecordsExceeded(self.invalid_records.clone()));
            }
            return Ok(());
        }

        let received_at = msg
            .time_extracted
            .as_deref()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(Utc::now);
        let sequence = msg.sequence.unwrap_or_else(|| Utc::now().timestamp());

        let estimated_size = estimate_size(&msg.record);
        self.rows.push(BufferedRecord {
            record: msg.record.clone(),
            received_at,
            sequence,
            version: msg.version,
        });
        self.count += 1;
        self.size += estimated_size;
        Ok(())
    }

    pub fn buffer_full(&self) -> bool {
        self.count >= self.config.max_batch_rows
            || (self.count > 0 && self.size >= self.config.max_batch_size)
    }

    pub fn peek_buffer(&self) -> &[BufferedRecord] {
        &self.rows
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Drains the buffer and zeroes its counters. `lifetime_max_version`
    /// survives a flush — it tracks the stream's lifetime, not one batch.
    pub fn flush_buffer(&mut self) -> Vec<BufferedRecord> {
        self.count = 0;
        self.size = 0;
        self.invalid_records.clear();
        std::mem::take(&mut self.rows)
    }
}

/// A rough in-memory size estimate for ceiling accounting (spec.md §4.3).
/// Exactness doesn't matter, only that it's monotonic in record size;
/// re-serializing to measure the wire-equivalent byte count is cheap enough
/// at this batch scale and avoids hand-maintaining a separate size-walker.
fn estimate_size(record: &Map<String, Value>) -> usize {
    serde_json::to_vec(record).map(|v| v.len()).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn msg(record: Value, version: Option<i64>, sequence: Option<i64>) -> RecordMessage {
        RecordMessage {
            stream: "users".to_string(),
            record: record.as_object().unwrap().clone(),
            time_extracted: None,
            version,
            sequence,
        }
    }

    fn schema() -> Value {
        json!({
            "type": "object",
            "required": ["id"],
            "properties": {"id": {"type": "integer"}, "name": {"type": "string"}},
        })
    }

    #[test]
    fn accepts_and_counts_valid_records() {
        let mut buffer = Buffer::new(
            "users",
            &schema(),
            vec!["id".to_string()],
            BufferConfig::default(),
        )
        .unwrap();
        buffer
            .add_record_message(&msg(json!({"id": 1, "name": "A"}), None, Some(1)))
            .unwrap();
        assert_eq!(buffer.count(), 1);
        assert!(buffer.size() > 0);
    }

    #[test]
    fn stale_version_drops_without_changing_counters() {
        let mut buffer = Buffer::new(
            "users",
            &schema(),
            vec!["id".to_string()],
            BufferConfig::default(),
        )
        .unwrap();
        buffer
            .add_record_message(&msg(json!({"id": 1}), Some(5), Some(1)))
            .unwrap();
        let (count_before, size_before) = (buffer.count(), buffer.size());
        buffer
            .add_record_message(&msg(json!({"id": 2}), Some(4), Some(2)))
            .unwrap();
        assert_eq!(buffer.count(), count_before);
        assert_eq!(buffer.size(), size_before);
    }

    #[test]
    fn advancing_version_flushes_prior_records() {
        let mut buffer = Buffer::new(
            "users",
            &schema(),
            vec!["id".to_string()],
            BufferConfig::default(),
        )
        .unwrap();
        buffer
            .add_record_message(&msg(json!({"id": 1}), Some(1), Some(1)))
            .unwrap();
        buffer
            .add_record_message(&msg(json!({"id": 2}), Some(2), Some(2)))
            .unwrap();
        assert_eq!(buffer.count(), 1);
        assert_eq!(buffer.lifetime_max_version(), Some(2));
    }

    #[test]
    fn invalid_record_exceeding_threshold_is_fatal() {
        let mut config = BufferConfig::default();
        config.invalid_records_threshold = 0;
        let mut buffer =
            Buffer::new("users", &schema(), vec!["id".to_string()], config).unwrap();
        let result = buffer.add_record_message(&msg(json!({"name": "no id"}), None, None));
        assert!(matches!(result, Err(Error::InvalidRecordsExceeded(_))));
    }

    #[test]
    fn key_property_drift_is_fatal() {
        let mut buffer = Buffer::new(
            "users",
            &schema(),
            vec!["id".to_string()],
            BufferConfig::default(),
        )
        .unwrap();
        let result = buffer.update_schema(&schema(), vec!["other".to_string()]);
        assert!(matches!(result, Err(Error::SchemaDrift { .. })));
    }

    #[test]
    fn buffer_full_respects_row_ceiling() {
        let mut config = BufferConfig::default();
        config.max_batch_rows = 1;
        let mut buffer =
            Buffer::new("users", &schema(), vec!["id".to_string()], config).unwrap();
        assert!(!buffer.buffer_full());
        buffer
            .add_record_message(&msg(json!({"id": 1}), None, None))
            .unwrap();
        assert!(buffer.buffer_full());
    }

    #[test]
    fn flush_buffer_drains_and_resets_counters() {
        let mut buffer = Buffer::new(
            "users",
            &schema(),
            vec!["id".to_string()],
            BufferConfig::default(),
        )
        .unwrap();
        buffer
            .add_record_message(&msg(json!({"id": 1}), None, None))
            .unwrap();
        let drained = buffer.flush_buffer();
        assert_eq!(drained.len(), 1);
        assert_eq!(buffer.count(), 0);
        assert_eq!(buffer.size(), 0);
    }
}
