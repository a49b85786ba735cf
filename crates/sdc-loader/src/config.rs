//! The seven configuration options (spec.md §6), loaded from an optional
//! JSON file and overridable by CLI flags.

use serde::Deserialize;
use std::path::Path;
use stream_state::BufferConfig;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub invalid_records_detect: bool,
    pub invalid_records_threshold: usize,
    pub max_batch_rows: usize,
    pub max_batch_size: usize,
    pub batch_detection_threshold: usize,
    pub state_support: bool,
    pub disable_collection: bool,
    pub postgres_schema: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            invalid_records_detect: true,
            invalid_records_threshold: 0,
            max_batch_rows: 200_000,
            max_batch_size: 100 * 1024 * 1024,
            batch_detection_threshold: 5_000,
            state_support: true,
            disable_collection: false,
            postgres_schema: "public".to_string(),
        }
    }
}

impl Config {
    /// Reads `path` as JSON if given, else the all-defaults configuration.
    /// Unrecognized keys are ignored (forward-compatible with a tap's
    /// config file that also carries connector-specific options this
    /// loader doesn't read).
    pub fn load(path: Option<&Path>) -> anyhow::Result<Config> {
        let Some(path) = path else {
            return Ok(Config::default());
        };
        let raw = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("reading config file {}: {e}", path.display()))?;
        let config: Config = serde_json::from_str(&raw)
            .map_err(|e| anyhow::anyhow!("parsing config file {}: {e}", path.display()))?;
        Ok(config)
    }

    pub fn buffer_config(&self) -> BufferConfig {
        BufferConfig {
            invalid_records_detect: self.invalid_records_detect,
            invalid_records_threshold: self.invalid_records_threshold,
            max_batch_rows: self.max_batch_rows,
            max_batch_size: self.max_batch_size,
        }
    }
}
