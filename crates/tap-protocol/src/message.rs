//! Line-protocol message types (spec.md §6). Field names and the
//! `SCREAMING_SNAKE_CASE` `type` tag follow the Singer tap-line convention
//! documented in `examples/original_source/target_postgres/singer_stream.py`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Message {
    #[serde(rename = "SCHEMA")]
    Schema(SchemaMessage),
    #[serde(rename = "RECORD")]
    Record(RecordMessage),
    #[serde(rename = "ACTIVATE_VERSION")]
    ActivateVersion(ActivateVersionMessage),
    #[serde(rename = "STATE")]
    State(StateMessage),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaMessage {
    pub stream: String,
    pub schema: Value,
    #[serde(default)]
    pub key_properties: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordMessage {
    pub stream: String,
    pub record: Map<String, Value>,
    pub time_extracted: Option<String>,
    pub version: Option<i64>,
    pub sequence: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivateVersionMessage {
    pub stream: String,
    pub version: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateMessage {
    pub value: Value,
}
