//! Read-only metric views.

use serde::{Deserialize, Serialize};

/// Counters for one stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageMetrics {
    /// Stage id.
    pub stage_id: String,
    /// Stage name.
    pub name: String,
    /// Processor invocations, retries included.
    pub input_count: u64,
    /// Items produced by successful invocations.
    pub output_count: u64,
    /// Failed invocations.
    pub error_count: u64,
    /// Invocations that produced nothing.
    pub filtered_count: u64,
    /// Mean invocation latency.
    pub avg_latency_ms: f64,
    /// Outputs per second since pipeline start.
    pub throughput: f64,
}

/// Counters for one pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineMetrics {
    /// Pipeline id.
    pub pipeline_id: String,
    /// Accepted pushes and emits.
    pub total_input: u64,
    /// Items consumed by sink stages.
    pub total_output: u64,
    /// Processor failures, counted per attempt.
    pub total_errors: u64,
    /// Requeues.
    pub retried: u64,
    /// Terminal failures routed to an error-handler stage.
    pub dead_lettered: u64,
    /// Terminal failures discarded.
    pub dropped: u64,
    /// Items filtered out by some stage.
    pub filtered: u64,
    /// Pushes rejected by backpressure.
    pub backpressure_rejections: u64,
    /// Items currently buffered.
    pub buffered: usize,
    /// Mean end-to-end latency of an item walk.
    pub avg_latency_ms: f64,
    /// Sink outputs per second since start.
    pub throughput: f64,
    /// Seconds since the pipeline first started.
    pub uptime_secs: f64,
    /// Per-stage counters in declaration order.
    pub stages: Vec<StageMetrics>,
}

/// Engine-wide summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineStats {
    /// Pipelines currently registered.
    pub total_pipelines: usize,
    /// Pipelines in the running state.
    pub running_pipelines: usize,
    /// Sum of `total_input` across pipelines.
    pub total_input: u64,
    /// Sum of `total_output` across pipelines.
    pub total_output: u64,
    /// Sum of `total_errors` across pipelines.
    pub total_errors: u64,
    /// Mean throughput across pipelines.
    pub avg_throughput: f64,
    /// Processors in the registry.
    pub registered_processors: usize,
}
