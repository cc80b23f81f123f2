//! Pipeline and stage configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// What happens when a push meets a full (or filling) buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackpressureStrategy {
    /// Reject pushes into a full buffer.
    #[default]
    Drop,
    /// Tolerate buffering up to the hard bound, then reject.
    Buffer,
    /// Wait for free space up to `block_timeout_ms`, then reject.
    Block,
    /// Above half capacity, admit pushes with probability `sample_rate`.
    Sample,
}

/// How processor failures affect the pipeline as a whole.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorPolicy {
    /// Record the failure in metrics and keep processing.
    #[default]
    Continue,
    /// Move the pipeline to `error` on the first processor failure.
    FailFast,
}

/// Configuration for one pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Hard bound on buffered items.
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
    /// Items drained per scheduler tick.
    #[serde(default = "default_parallelism")]
    pub parallelism: usize,
    /// Scheduler tick interval in milliseconds.
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    /// Backpressure strategy applied by `push`.
    #[serde(default)]
    pub backpressure: BackpressureStrategy,
    /// Longest a blocking push waits for space.
    #[serde(default = "default_block_timeout_ms")]
    pub block_timeout_ms: u64,
    /// Admission probability for the `sample` strategy.
    #[serde(default = "default_sample_rate")]
    pub sample_rate: f64,
    /// Failure handling policy.
    #[serde(default)]
    pub error_policy: ErrorPolicy,
    /// Number of terminal failures kept for inspection.
    #[serde(default = "default_failure_log_size")]
    pub failure_log_size: usize,
    /// Capacity of the sink output broadcast channel.
    #[serde(default = "default_output_channel_size")]
    pub output_channel_size: usize,
}

fn default_buffer_size() -> usize {
    1000
}

fn default_parallelism() -> usize {
    4
}

fn default_tick_interval_ms() -> u64 {
    10
}

fn default_block_timeout_ms() -> u64 {
    1000
}

fn default_sample_rate() -> f64 {
    0.5
}

fn default_failure_log_size() -> usize {
    100
}

fn default_output_channel_size() -> usize {
    1024
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            buffer_size: default_buffer_size(),
            parallelism: default_parallelism(),
            tick_interval_ms: default_tick_interval_ms(),
            backpressure: BackpressureStrategy::default(),
            block_timeout_ms: default_block_timeout_ms(),
            sample_rate: default_sample_rate(),
            error_policy: ErrorPolicy::default(),
            failure_log_size: default_failure_log_size(),
            output_channel_size: default_output_channel_size(),
        }
    }
}

impl PipelineConfig {
    /// Creates a configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the buffer size.
    #[must_use]
    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size;
        self
    }

    /// Sets the per-tick drain count.
    #[must_use]
    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism;
        self
    }

    /// Sets the tick interval.
    #[must_use]
    pub fn with_tick_interval_ms(mut self, ms: u64) -> Self {
        self.tick_interval_ms = ms;
        self
    }

    /// Sets the backpressure strategy.
    #[must_use]
    pub fn with_backpressure(mut self, strategy: BackpressureStrategy) -> Self {
        self.backpressure = strategy;
        self
    }

    /// Sets the blocking push timeout.
    #[must_use]
    pub fn with_block_timeout_ms(mut self, ms: u64) -> Self {
        self.block_timeout_ms = ms;
        self
    }

    /// Sets the sampling admission rate.
    #[must_use]
    pub fn with_sample_rate(mut self, rate: f64) -> Self {
        self.sample_rate = rate;
        self
    }

    /// Sets the error policy.
    #[must_use]
    pub fn with_error_policy(mut self, policy: ErrorPolicy) -> Self {
        self.error_policy = policy;
        self
    }

    /// Scheduler tick interval.
    #[must_use]
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.max(1))
    }

    /// Blocking push timeout.
    #[must_use]
    pub fn block_timeout(&self) -> Duration {
        Duration::from_millis(self.block_timeout_ms)
    }

    /// Checks the configuration for values the scheduler cannot run with.
    ///
    /// # Errors
    ///
    /// Returns a description of the first invalid field.
    pub fn validate(&self) -> Result<(), String> {
        if self.buffer_size == 0 {
            return Err("buffer_size must be greater than zero".to_string());
        }
        if self.parallelism == 0 {
            return Err("parallelism must be greater than zero".to_string());
        }
        if !(0.0..=1.0).contains(&self.sample_rate) {
            return Err(format!("sample_rate must be within [0, 1], got {}", self.sample_rate));
        }
        if self.output_channel_size == 0 {
            return Err("output_channel_size must be greater than zero".to_string());
        }
        Ok(())
    }
}

/// Configuration for one stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageConfig {
    /// Maximum concurrent invocations of this stage. The pipeline's own
    /// `parallelism` bounds how many items a tick drains.
    #[serde(default = "default_stage_parallelism")]
    pub parallelism: usize,
    /// Reported in [`StageInfo`](super::StageInfo) only; processors receive
    /// one item at a time.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Processor timeout in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Requeues allowed before an item fails terminally.
    #[serde(default = "default_retries")]
    pub retries: u32,
    /// Reported in [`StageInfo`](super::StageInfo) only; the pipeline's
    /// strategy governs `push`.
    #[serde(default)]
    pub backpressure_strategy: BackpressureStrategy,
    /// Stage that receives dead-lettered items.
    #[serde(default)]
    pub error_stage_id: Option<String>,
    /// Processor parameters.
    #[serde(default)]
    pub params: serde_json::Map<String, serde_json::Value>,
}

fn default_stage_parallelism() -> usize {
    1
}

fn default_batch_size() -> usize {
    1
}

fn default_timeout_ms() -> u64 {
    5000
}

fn default_retries() -> u32 {
    3
}

impl Default for StageConfig {
    fn default() -> Self {
        Self {
            parallelism: default_stage_parallelism(),
            batch_size: default_batch_size(),
            timeout_ms: default_timeout_ms(),
            retries: default_retries(),
            backpressure_strategy: BackpressureStrategy::default(),
            error_stage_id: None,
            params: serde_json::Map::new(),
        }
    }
}

impl StageConfig {
    /// Creates a configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the concurrency limit.
    #[must_use]
    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism;
        self
    }

    /// Sets the processor timeout.
    #[must_use]
    pub fn with_timeout_ms(mut self, ms: u64) -> Self {
        self.timeout_ms = ms;
        self
    }

    /// Sets the retry limit.
    #[must_use]
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    /// Sets the dead-letter stage.
    #[must_use]
    pub fn with_error_stage(mut self, stage_id: impl Into<String>) -> Self {
        self.error_stage_id = Some(stage_id.into());
        self
    }

    /// Adds a processor parameter.
    #[must_use]
    pub fn with_param(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.params.insert(key.into(), value);
        self
    }

    /// Replaces all parameters with the fields of a JSON object.
    ///
    /// Non-object values are ignored.
    #[must_use]
    pub fn with_params(mut self, params: serde_json::Value) -> Self {
        if let serde_json::Value::Object(map) = params {
            self.params = map;
        }
        self
    }

    /// Processor timeout.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_pipeline_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.buffer_size, 1000);
        assert_eq!(config.parallelism, 4);
        assert_eq!(config.tick_interval(), Duration::from_millis(10));
        assert_eq!(config.backpressure, BackpressureStrategy::Drop);
        assert_eq!(config.error_policy, ErrorPolicy::Continue);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_pipeline_config_from_partial_json() {
        let config: PipelineConfig =
            serde_json::from_value(json!({"buffer_size": 5, "backpressure": "block", "error_policy": "fail_fast"}))
                .unwrap();
        assert_eq!(config.buffer_size, 5);
        assert_eq!(config.backpressure, BackpressureStrategy::Block);
        assert_eq!(config.error_policy, ErrorPolicy::FailFast);
        assert_eq!(config.parallelism, 4);
    }

    #[test]
    fn test_pipeline_config_validation() {
        assert!(PipelineConfig::new().with_buffer_size(0).validate().is_err());
        assert!(PipelineConfig::new().with_parallelism(0).validate().is_err());
        assert!(PipelineConfig::new().with_sample_rate(1.5).validate().is_err());
    }

    #[test]
    fn test_stage_defaults_and_builders() {
        let config = StageConfig::new()
            .with_retries(1)
            .with_timeout_ms(50)
            .with_error_stage("dlq")
            .with_param("sizeMs", json!(100));

        assert_eq!(config.parallelism, 1);
        assert_eq!(config.retries, 1);
        assert_eq!(config.timeout(), Duration::from_millis(50));
        assert_eq!(config.error_stage_id.as_deref(), Some("dlq"));
        assert_eq!(config.params["sizeMs"], json!(100));
        assert_eq!(StageConfig::default().retries, 3);
    }
}
