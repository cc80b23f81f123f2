//! Live state of one pipeline.

use parking_lot::{Mutex, RwLock};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::broadcast;

use super::{
    BackpressureStrategy, FailureLog, FailureRecord, ItemBuffer, PipelineConfig, PipelineStage,
    SchedulerHandle, StageGraph, StageInfo,
};
use crate::context::{ItemEmitter, ProcessorContext, StateStore};
use crate::core::{PipelineStatus, StreamItem};
use crate::errors::{Result, StreamflowError};
use crate::events::{EventSink, PipelineEvent};
use crate::metrics::{PipelineCounters, PipelineMetrics, StageMetrics};
use crate::utils::{now_utc, Timestamp};

/// Serializable description of a pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineInfo {
    /// Pipeline id.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Lifecycle status.
    pub status: PipelineStatus,
    /// Configuration.
    pub config: PipelineConfig,
    /// Stages in declaration order.
    pub stages: Vec<StageInfo>,
    /// Items currently buffered.
    pub buffered: usize,
    /// Creation time.
    pub created_at: Timestamp,
    /// First start time.
    pub started_at: Option<Timestamp>,
}

#[derive(Debug, Default)]
struct Lifecycle {
    status: PipelineStatus,
    started_at: Option<Timestamp>,
    started_instant: Option<Instant>,
    scheduler: Option<SchedulerHandle>,
}

/// A pipeline's stages, buffer, state and counters.
///
/// Every lock here is scoped to this pipeline; nothing is shared across
/// pipelines. Lock order is lifecycle before graph.
pub struct PipelineRuntime {
    id: String,
    name: String,
    config: PipelineConfig,
    created_at: Timestamp,
    lifecycle: Mutex<Lifecycle>,
    graph: RwLock<Arc<StageGraph>>,
    pub(crate) buffer: ItemBuffer,
    pub(crate) state: Arc<StateStore>,
    pub(crate) counters: PipelineCounters,
    pub(crate) failures: FailureLog,
    outputs: broadcast::Sender<StreamItem>,
    events: Arc<dyn EventSink>,
}

impl PipelineRuntime {
    /// Creates an idle pipeline.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        config: PipelineConfig,
        events: Arc<dyn EventSink>,
    ) -> Arc<Self> {
        let (outputs, _) = broadcast::channel(config.output_channel_size.max(1));
        Arc::new(Self {
            id: id.into(),
            name: name.into(),
            buffer: ItemBuffer::new(config.buffer_size),
            failures: FailureLog::new(config.failure_log_size),
            config,
            created_at: now_utc(),
            lifecycle: Mutex::new(Lifecycle::default()),
            graph: RwLock::new(Arc::new(StageGraph::new())),
            state: Arc::new(StateStore::new()),
            counters: PipelineCounters::new(),
            outputs,
            events,
        })
    }

    /// Pipeline id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Display name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Configuration.
    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Current status.
    #[must_use]
    pub fn status(&self) -> PipelineStatus {
        self.lifecycle.lock().status
    }

    /// The pipeline's state arena.
    #[must_use]
    pub fn state(&self) -> &Arc<StateStore> {
        &self.state
    }

    /// The current stage graph.
    #[must_use]
    pub fn graph(&self) -> Arc<StageGraph> {
        Arc::clone(&self.graph.read())
    }

    /// Appends a stage.
    ///
    /// While running, the new graph must validate before it replaces the
    /// current one.
    ///
    /// # Errors
    ///
    /// Fails on a duplicate id, on an errored or completed pipeline, or if a
    /// running pipeline's graph would become invalid.
    pub fn add_stage(&self, stage: PipelineStage) -> Result<StageInfo> {
        let lifecycle = self.lifecycle.lock();
        if !lifecycle.status.accepts_work() {
            return Err(self.invalid_transition("add a stage", lifecycle.status));
        }

        let mut graph = self.graph.write();
        let mut next = StageGraph::clone(&graph);
        let stage_id = stage.id.clone();
        next.add(stage)?;
        if lifecycle.status.is_running() {
            next.validate(&self.id)?;
        }

        let info = next
            .get(&stage_id)
            .map(PipelineStage::info)
            .ok_or_else(|| StreamflowError::stage_not_found(&self.id, &stage_id))?;
        *graph = Arc::new(next);
        drop(graph);
        drop(lifecycle);

        tracing::debug!(pipeline_id = %self.id, stage_id = %stage_id, "Stage added");
        Ok(info)
    }

    /// Starts or resumes the scheduler.
    ///
    /// Starting a running pipeline is a no-op.
    ///
    /// # Errors
    ///
    /// Fails from `error`/`completed`, on an invalid graph, or outside a
    /// Tokio runtime.
    pub fn start(self: &Arc<Self>) -> Result<PipelineStatus> {
        let mut lifecycle = self.lifecycle.lock();
        let from = lifecycle.status;
        if from.is_running() {
            return Ok(from);
        }
        if !from.can_start() {
            return Err(self.invalid_transition("start", from));
        }
        self.graph().validate(&self.id)?;

        let previous = lifecycle.scheduler.take();
        lifecycle.scheduler = Some(SchedulerHandle::spawn(self, previous)?);
        lifecycle.status = PipelineStatus::Running;
        if lifecycle.started_at.is_none() {
            lifecycle.started_at = Some(now_utc());
            lifecycle.started_instant = Some(Instant::now());
        }
        drop(lifecycle);

        tracing::info!(pipeline_id = %self.id, from = %from, "Pipeline started");
        self.emit_event(&PipelineEvent::Started {
            pipeline_id: self.id.clone(),
            from,
        });
        Ok(PipelineStatus::Running)
    }

    /// Pauses the scheduler, keeping buffered items and state.
    ///
    /// # Errors
    ///
    /// Fails unless the pipeline is running.
    pub fn pause(&self) -> Result<PipelineStatus> {
        let mut lifecycle = self.lifecycle.lock();
        if !lifecycle.status.can_pause() {
            return Err(self.invalid_transition("pause", lifecycle.status));
        }
        // Kept so a later start can wait for the loop to finish its tick.
        if let Some(scheduler) = &lifecycle.scheduler {
            scheduler.cancel("paused");
        }
        lifecycle.status = PipelineStatus::Paused;
        drop(lifecycle);

        let buffered = self.buffer.len();
        tracing::info!(pipeline_id = %self.id, buffered, "Pipeline paused");
        self.emit_event(&PipelineEvent::Paused {
            pipeline_id: self.id.clone(),
            buffered,
        });
        Ok(PipelineStatus::Paused)
    }

    /// Stops the scheduler and completes the pipeline. Idempotent.
    pub fn stop(&self) -> PipelineStatus {
        let mut lifecycle = self.lifecycle.lock();
        if lifecycle.status.is_terminal() {
            return lifecycle.status;
        }
        if let Some(scheduler) = lifecycle.scheduler.take() {
            scheduler.cancel("stopped");
        }
        lifecycle.status = PipelineStatus::Completed;
        drop(lifecycle);

        tracing::info!(pipeline_id = %self.id, "Pipeline stopped");
        self.emit_event(&PipelineEvent::Stopped {
            pipeline_id: self.id.clone(),
        });
        PipelineStatus::Completed
    }

    /// Moves the pipeline to `error` after a processor failure under fail-fast.
    pub(crate) fn fail(&self, stage_id: &str, error: &StreamflowError) {
        let mut lifecycle = self.lifecycle.lock();
        if matches!(lifecycle.status, PipelineStatus::Error | PipelineStatus::Completed) {
            return;
        }
        if let Some(scheduler) = lifecycle.scheduler.take() {
            scheduler.cancel("fail-fast");
        }
        lifecycle.status = PipelineStatus::Error;
        drop(lifecycle);

        tracing::error!(pipeline_id = %self.id, stage_id, error = %error, "Pipeline failed");
        self.emit_event(&PipelineEvent::Failed {
            pipeline_id: self.id.clone(),
            stage_id: stage_id.to_string(),
            error: error.to_string(),
        });
    }

    /// Stops the pipeline and drops its buffer and state.
    pub(crate) fn teardown(&self) {
        self.stop();
        let discarded = self.buffer.clear();
        self.state.clear();
        tracing::info!(pipeline_id = %self.id, discarded, "Pipeline removed");
        self.emit_event(&PipelineEvent::Removed {
            pipeline_id: self.id.clone(),
        });
    }

    /// Buffers a payload without waiting.
    ///
    /// # Errors
    ///
    /// Fails on an errored or completed pipeline or when backpressure rejects the item.
    pub fn try_push(&self, payload: serde_json::Value, source: &str) -> Result<StreamItem> {
        self.check_accepting()?;
        self.sample_admission()?;

        let item = StreamItem::new(&self.id, source, payload);
        match self.buffer.try_push(item.clone()) {
            Ok(()) => {
                self.counters.record_input();
                Ok(item)
            }
            Err(_) => Err(self.reject_capacity()),
        }
    }

    /// Buffers a payload, applying the configured backpressure strategy.
    ///
    /// # Errors
    ///
    /// Fails on an errored or completed pipeline or when backpressure rejects the item.
    pub async fn push(&self, payload: serde_json::Value) -> Result<StreamItem> {
        if self.config.backpressure != BackpressureStrategy::Block {
            return self.try_push(payload, "push");
        }
        self.check_accepting()?;

        let item = StreamItem::new(&self.id, "push", payload);
        match self
            .buffer
            .push_wait(item.clone(), self.config.block_timeout())
            .await
        {
            Ok(()) => {
                self.counters.record_input();
                Ok(item)
            }
            Err(_) => Err(self.reject_capacity()),
        }
    }

    fn check_accepting(&self) -> Result<()> {
        let status = self.status();
        if !status.accepts_work() {
            return Err(self.invalid_transition("push", status));
        }
        Ok(())
    }

    fn sample_admission(&self) -> Result<()> {
        if self.config.backpressure != BackpressureStrategy::Sample {
            return Ok(());
        }
        let half_full = self.buffer.len() * 2 >= self.buffer.capacity();
        if half_full && !rand::thread_rng().gen_bool(self.config.sample_rate.clamp(0.0, 1.0)) {
            self.counters.record_backpressure_rejection();
            tracing::debug!(pipeline_id = %self.id, "Push sampled out");
            return Err(StreamflowError::ItemSampledOut {
                pipeline_id: self.id.clone(),
            });
        }
        Ok(())
    }

    fn reject_capacity(&self) -> StreamflowError {
        self.counters.record_backpressure_rejection();
        tracing::warn!(
            pipeline_id = %self.id,
            capacity = self.buffer.capacity(),
            strategy = ?self.config.backpressure,
            "Push rejected: buffer full"
        );
        StreamflowError::CapacityExceeded {
            pipeline_id: self.id.clone(),
            capacity: self.buffer.capacity(),
        }
    }

    fn invalid_transition(&self, action: &'static str, status: PipelineStatus) -> StreamflowError {
        StreamflowError::InvalidTransition {
            pipeline_id: self.id.clone(),
            action,
            status,
        }
    }

    /// Builds the context for one invocation of `stage`.
    pub(crate) fn processor_context(self: &Arc<Self>, stage: &PipelineStage) -> ProcessorContext {
        let emitter: Arc<dyn ItemEmitter> = Arc::clone(self) as Arc<dyn ItemEmitter>;
        ProcessorContext::new(
            self.id.clone(),
            stage.id.clone(),
            stage.config.params.clone(),
            Arc::clone(&self.state),
        )
        .with_emitter(emitter)
    }

    /// Hands an item that left the graph to subscribers.
    pub(crate) fn deliver(&self, item: StreamItem) {
        self.counters.record_output();
        // No subscribers is not an error.
        let _ = self.outputs.send(item);
    }

    pub(crate) fn record_failure(&self, record: FailureRecord) {
        self.failures.record(record);
    }

    pub(crate) fn emit_event(&self, event: &PipelineEvent) {
        self.events.try_emit(event);
    }

    /// Subscribes to items consumed by sink stages.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<StreamItem> {
        self.outputs.subscribe()
    }

    /// Recent terminal failures, oldest first.
    #[must_use]
    pub fn recent_failures(&self) -> Vec<FailureRecord> {
        self.failures.recent()
    }

    fn elapsed_secs(&self) -> f64 {
        self.lifecycle
            .lock()
            .started_instant
            .map_or(0.0, |t| t.elapsed().as_secs_f64())
    }

    /// Pipeline counters with per-stage detail.
    #[must_use]
    pub fn metrics(&self) -> PipelineMetrics {
        let elapsed = self.elapsed_secs();
        let mut metrics = self
            .counters
            .snapshot(&self.id, self.buffer.len(), elapsed);
        metrics.stages = self
            .graph()
            .stages()
            .iter()
            .map(|s| s.metrics(elapsed))
            .collect();
        metrics
    }

    /// Counters for one stage.
    ///
    /// # Errors
    ///
    /// Returns `StageNotFound` for an unknown stage id.
    pub fn stage_metrics(&self, stage_id: &str) -> Result<StageMetrics> {
        let elapsed = self.elapsed_secs();
        self.graph()
            .get(stage_id)
            .map(|s| s.metrics(elapsed))
            .ok_or_else(|| StreamflowError::stage_not_found(&self.id, stage_id))
    }

    /// Serializable description.
    #[must_use]
    pub fn info(&self) -> PipelineInfo {
        let (status, started_at) = {
            let lifecycle = self.lifecycle.lock();
            (lifecycle.status, lifecycle.started_at)
        };
        PipelineInfo {
            id: self.id.clone(),
            name: self.name.clone(),
            status,
            config: self.config.clone(),
            stages: self.graph().stages().iter().map(PipelineStage::info).collect(),
            buffered: self.buffer.len(),
            created_at: self.created_at,
            started_at,
        }
    }
}

impl ItemEmitter for PipelineRuntime {
    fn emit(&self, payload: serde_json::Value) -> Result<StreamItem> {
        self.try_push(payload, "emit")
    }
}

impl std::fmt::Debug for PipelineRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineRuntime")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("status", &self.status())
            .field("buffered", &self.buffer.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::CollectingEventSink;
    use crate::pipeline::StageDefinition;
    use crate::processors::PassthroughProcessor;
    use serde_json::json;

    fn runtime(config: PipelineConfig) -> (Arc<PipelineRuntime>, Arc<CollectingEventSink>) {
        let events = Arc::new(CollectingEventSink::new());
        let rt = PipelineRuntime::new("p1", "test", config, events.clone());
        (rt, events)
    }

    fn passthrough(id: &str) -> PipelineStage {
        PipelineStage::new(
            id.to_string(),
            StageDefinition::new(id, "passthrough"),
            "passthrough".to_string(),
            Arc::new(PassthroughProcessor),
        )
    }

    #[test]
    fn test_try_push_respects_capacity() {
        let (rt, _) = runtime(PipelineConfig::new().with_buffer_size(2));
        rt.try_push(json!(1), "push").unwrap();
        rt.try_push(json!(2), "push").unwrap();

        let err = rt.try_push(json!(3), "push").unwrap_err();
        assert!(matches!(err, StreamflowError::CapacityExceeded { capacity: 2, .. }));
        let metrics = rt.metrics();
        assert_eq!(metrics.total_input, 2);
        assert_eq!(metrics.backpressure_rejections, 1);
        assert_eq!(metrics.buffered, 2);
    }

    #[test]
    fn test_sample_strategy_with_zero_rate_rejects_when_half_full() {
        let config = PipelineConfig::new()
            .with_buffer_size(4)
            .with_backpressure(BackpressureStrategy::Sample)
            .with_sample_rate(0.0);
        let (rt, _) = runtime(config);
        rt.try_push(json!(1), "push").unwrap();
        rt.try_push(json!(2), "push").unwrap();

        let err = rt.try_push(json!(3), "push").unwrap_err();
        assert!(matches!(err, StreamflowError::ItemSampledOut { .. }));
        assert!(err.is_backpressure());
    }

    #[tokio::test]
    async fn test_block_strategy_times_out() {
        let config = PipelineConfig::new()
            .with_buffer_size(1)
            .with_backpressure(BackpressureStrategy::Block)
            .with_block_timeout_ms(20);
        let (rt, _) = runtime(config);
        rt.push(json!(1)).await.unwrap();
        assert!(rt.push(json!(2)).await.is_err());
    }

    #[tokio::test]
    async fn test_lifecycle_transitions() {
        let (rt, events) = runtime(PipelineConfig::default());
        rt.add_stage(passthrough("a")).unwrap();

        assert!(rt.pause().is_err());
        assert_eq!(rt.start().unwrap(), PipelineStatus::Running);
        assert_eq!(rt.start().unwrap(), PipelineStatus::Running);
        assert_eq!(rt.pause().unwrap(), PipelineStatus::Paused);
        assert_eq!(rt.start().unwrap(), PipelineStatus::Running);
        assert_eq!(rt.stop(), PipelineStatus::Completed);
        assert_eq!(rt.stop(), PipelineStatus::Completed);

        let err = rt.start().unwrap_err();
        assert!(matches!(err, StreamflowError::InvalidTransition { action: "start", .. }));
        assert!(rt.try_push(json!(1), "push").is_err());

        assert_eq!(
            events.event_types(),
            vec![
                "pipeline.started",
                "pipeline.paused",
                "pipeline.started",
                "pipeline.stopped"
            ]
        );
    }

    #[tokio::test]
    async fn test_start_rejects_empty_graph() {
        let (rt, _) = runtime(PipelineConfig::default());
        assert!(matches!(rt.start(), Err(StreamflowError::Validation(_))));
        assert_eq!(rt.status(), PipelineStatus::Idle);
    }

    #[test]
    fn test_start_outside_runtime_fails() {
        let (rt, _) = runtime(PipelineConfig::default());
        rt.add_stage(passthrough("a")).unwrap();
        assert!(matches!(rt.start(), Err(StreamflowError::Config(_))));
        assert_eq!(rt.status(), PipelineStatus::Idle);
    }

    #[test]
    fn test_emit_goes_through_buffer() {
        let (rt, _) = runtime(PipelineConfig::default());
        let item = ItemEmitter::emit(rt.as_ref(), json!({"x": 1})).unwrap();
        assert_eq!(item.metadata.source_label, "emit");
        assert_eq!(rt.metrics().buffered, 1);
    }

    #[test]
    fn test_info_lists_stages() {
        let (rt, _) = runtime(PipelineConfig::default());
        rt.add_stage(passthrough("a")).unwrap();
        rt.add_stage(passthrough("b")).unwrap();

        let info = rt.info();
        assert_eq!(info.status, PipelineStatus::Idle);
        assert_eq!(info.stages.len(), 2);
        assert_eq!(info.stages[0].next_stage_ids, vec!["b"]);
        assert!(rt.stage_metrics("missing").is_err());
    }
}
