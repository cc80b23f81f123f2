//! Lock-free counter cells.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use super::{throughput, PipelineMetrics, StageMetrics};

/// Running mean kept as a total and a sample count.
#[derive(Debug, Default)]
struct LatencyCell {
    total_us: AtomicU64,
    samples: AtomicU64,
}

impl LatencyCell {
    fn record(&self, elapsed: Duration) {
        let micros = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX);
        self.total_us.fetch_add(micros, Ordering::Relaxed);
        self.samples.fetch_add(1, Ordering::Relaxed);
    }

    #[allow(clippy::cast_precision_loss)]
    fn mean_ms(&self) -> f64 {
        let samples = self.samples.load(Ordering::Relaxed);
        if samples == 0 {
            return 0.0;
        }
        self.total_us.load(Ordering::Relaxed) as f64 / samples as f64 / 1000.0
    }

    fn reset(&self) {
        self.total_us.store(0, Ordering::Relaxed);
        self.samples.store(0, Ordering::Relaxed);
    }
}

/// Counters for one stage.
#[derive(Debug, Default)]
pub struct StageCounters {
    input: AtomicU64,
    output: AtomicU64,
    errors: AtomicU64,
    filtered: AtomicU64,
    latency: LatencyCell,
}

impl StageCounters {
    /// Creates zeroed counters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one invocation and its latency.
    pub fn record_invocation(&self, elapsed: Duration) {
        self.input.fetch_add(1, Ordering::Relaxed);
        self.latency.record(elapsed);
    }

    /// Records items produced by a successful invocation.
    pub fn record_outputs(&self, count: usize) {
        self.output
            .fetch_add(u64::try_from(count).unwrap_or(u64::MAX), Ordering::Relaxed);
    }

    /// Records a processor failure.
    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Records an invocation that produced nothing.
    pub fn record_filtered(&self) {
        self.filtered.fetch_add(1, Ordering::Relaxed);
    }

    /// Number of invocations.
    #[must_use]
    pub fn input(&self) -> u64 {
        self.input.load(Ordering::Relaxed)
    }

    /// Takes a snapshot; `elapsed_secs` is the time since pipeline start.
    #[must_use]
    pub fn snapshot(&self, stage_id: &str, name: &str, elapsed_secs: f64) -> StageMetrics {
        let output_count = self.output.load(Ordering::Relaxed);
        StageMetrics {
            stage_id: stage_id.to_string(),
            name: name.to_string(),
            input_count: self.input(),
            output_count,
            error_count: self.errors.load(Ordering::Relaxed),
            filtered_count: self.filtered.load(Ordering::Relaxed),
            avg_latency_ms: self.latency.mean_ms(),
            throughput: throughput(output_count, elapsed_secs),
        }
    }
}

/// Counters for one pipeline.
#[derive(Debug, Default)]
pub struct PipelineCounters {
    total_input: AtomicU64,
    total_output: AtomicU64,
    total_errors: AtomicU64,
    retried: AtomicU64,
    dead_lettered: AtomicU64,
    dropped: AtomicU64,
    filtered: AtomicU64,
    backpressure_rejections: AtomicU64,
    latency: LatencyCell,
}

impl PipelineCounters {
    /// Creates zeroed counters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an accepted push or emit.
    pub fn record_input(&self) {
        self.total_input.fetch_add(1, Ordering::Relaxed);
    }

    /// Records an item consumed by a sink.
    pub fn record_output(&self) {
        self.total_output.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a processor failure.
    pub fn record_error(&self) {
        self.total_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a requeue.
    pub fn record_retry(&self) {
        self.retried.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a terminal failure routed to an error-handler stage.
    pub fn record_dead_letter(&self) {
        self.dead_lettered.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a terminal failure with nowhere to go.
    pub fn record_drop(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Records an item filtered out by a stage.
    pub fn record_filtered(&self) {
        self.filtered.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a push rejected by backpressure.
    pub fn record_backpressure_rejection(&self) {
        self.backpressure_rejections.fetch_add(1, Ordering::Relaxed);
    }

    /// Records the end-to-end latency of one item walk.
    pub fn record_latency(&self, elapsed: Duration) {
        self.latency.record(elapsed);
    }

    /// Accepted inputs.
    #[must_use]
    pub fn total_input(&self) -> u64 {
        self.total_input.load(Ordering::Relaxed)
    }

    /// Sink outputs.
    #[must_use]
    pub fn total_output(&self) -> u64 {
        self.total_output.load(Ordering::Relaxed)
    }

    /// Processor failures.
    #[must_use]
    pub fn total_errors(&self) -> u64 {
        self.total_errors.load(Ordering::Relaxed)
    }

    /// Resets the latency mean, used when a pipeline restarts from idle.
    pub fn reset_latency(&self) {
        self.latency.reset();
    }

    /// Takes a snapshot without per-stage data.
    #[must_use]
    pub fn snapshot(&self, pipeline_id: &str, buffered: usize, elapsed_secs: f64) -> PipelineMetrics {
        let total_output = self.total_output();
        PipelineMetrics {
            pipeline_id: pipeline_id.to_string(),
            total_input: self.total_input(),
            total_output,
            total_errors: self.total_errors(),
            retried: self.retried.load(Ordering::Relaxed),
            dead_lettered: self.dead_lettered.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            filtered: self.filtered.load(Ordering::Relaxed),
            backpressure_rejections: self.backpressure_rejections.load(Ordering::Relaxed),
            buffered,
            avg_latency_ms: self.latency.mean_ms(),
            throughput: throughput(total_output, elapsed_secs),
            uptime_secs: elapsed_secs,
            stages: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_counters() {
        let counters = StageCounters::new();
        counters.record_invocation(Duration::from_millis(2));
        counters.record_invocation(Duration::from_millis(4));
        counters.record_outputs(3);
        counters.record_error();
        counters.record_filtered();

        let snap = counters.snapshot("s1", "stage", 1.5);
        assert_eq!(snap.input_count, 2);
        assert_eq!(snap.output_count, 3);
        assert_eq!(snap.error_count, 1);
        assert_eq!(snap.filtered_count, 1);
        assert!((snap.avg_latency_ms - 3.0).abs() < 1e-9);
        assert!((snap.throughput - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_pipeline_counters() {
        let counters = PipelineCounters::new();
        counters.record_input();
        counters.record_input();
        counters.record_output();
        counters.record_backpressure_rejection();
        counters.record_retry();
        counters.record_drop();

        let snap = counters.snapshot("p1", 1, 0.0);
        assert_eq!(snap.total_input, 2);
        assert_eq!(snap.total_output, 1);
        assert_eq!(snap.backpressure_rejections, 1);
        assert_eq!(snap.retried, 1);
        assert_eq!(snap.dropped, 1);
        assert_eq!(snap.buffered, 1);
        assert!(snap.throughput.abs() < f64::EPSILON);
    }

    #[test]
    fn test_empty_latency_is_zero() {
        let counters = PipelineCounters::new();
        assert!(counters.snapshot("p1", 0, 1.0).avg_latency_ms.abs() < f64::EPSILON);
    }
}
