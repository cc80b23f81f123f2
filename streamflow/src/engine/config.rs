//! Engine-wide configuration.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::errors::{Result, StreamflowError};
use crate::pipeline::PipelineConfig;

fn default_event_buffer() -> usize {
    1024
}

/// Configuration for a [`StreamEngine`](super::StreamEngine).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Config used by `create_pipeline` when none is given.
    #[serde(default)]
    pub default_pipeline: PipelineConfig,
    /// Maximum live pipelines; 0 means unlimited.
    #[serde(default)]
    pub max_pipelines: usize,
    /// Capacity of the engine's event broadcast channel.
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_pipeline: PipelineConfig::default(),
            max_pipelines: 0,
            event_buffer: default_event_buffer(),
        }
    }
}

impl EngineConfig {
    /// Creates the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the default pipeline config.
    #[must_use]
    pub fn with_default_pipeline(mut self, config: PipelineConfig) -> Self {
        self.default_pipeline = config;
        self
    }

    /// Sets the pipeline limit.
    #[must_use]
    pub fn with_max_pipelines(mut self, max: usize) -> Self {
        self.max_pipelines = max;
        self
    }

    /// Sets the event channel capacity.
    #[must_use]
    pub fn with_event_buffer(mut self, capacity: usize) -> Self {
        self.event_buffer = capacity;
        self
    }

    /// Parses and validates a JSON document.
    ///
    /// Missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads and validates a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }

    /// Checks value ranges.
    pub fn validate(&self) -> Result<()> {
        if self.event_buffer == 0 {
            return Err(StreamflowError::Config(
                "event_buffer must be greater than zero".to_string(),
            ));
        }
        self.default_pipeline
            .validate()
            .map_err(StreamflowError::Config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::BackpressureStrategy;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    #[test]
    fn test_defaults_fill_missing_fields() {
        let config = EngineConfig::from_json_str(r#"{"max_pipelines": 8}"#).unwrap();
        assert_eq!(config.max_pipelines, 8);
        assert_eq!(config.event_buffer, 1024);
        assert_eq!(config.default_pipeline, PipelineConfig::default());
    }

    #[test]
    fn test_nested_pipeline_config() {
        let config = EngineConfig::from_json_str(
            r#"{"default_pipeline": {"buffer_size": 16, "backpressure": "block"}}"#,
        )
        .unwrap();
        assert_eq!(config.default_pipeline.buffer_size, 16);
        assert_eq!(config.default_pipeline.backpressure, BackpressureStrategy::Block);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let err = EngineConfig::from_json_str(r#"{"event_buffer": 0}"#).unwrap_err();
        assert!(matches!(err, StreamflowError::Config(_)));

        let err = EngineConfig::from_json_str(r#"{"default_pipeline": {"buffer_size": 0}}"#)
            .unwrap_err();
        assert!(matches!(err, StreamflowError::Config(_)));

        let err = EngineConfig::from_json_str("not json").unwrap_err();
        assert!(matches!(err, StreamflowError::Serialization(_)));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"max_pipelines": 2, "event_buffer": 64}}"#).unwrap();

        let config = EngineConfig::from_file(file.path()).unwrap();
        assert_eq!(config.max_pipelines, 2);
        assert_eq!(config.event_buffer, 64);

        let missing = EngineConfig::from_file(file.path().with_extension("missing"));
        assert!(matches!(missing, Err(StreamflowError::Io(_))));
    }
}
