//! The engine: a table of pipelines plus the processor registry.
//!
//! Every entry point looks its pipeline up by id and fails fast with
//! `PipelineNotFound` when it is unknown. Pipelines never share locks; the
//! table itself is a concurrent map.

mod config;

pub use config::EngineConfig;

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::context::PipelineFn;
use crate::core::{PipelineStatus, StreamItem};
use crate::errors::{Result, StreamflowError};
use crate::events::{
    BroadcastEventSink, EventSink, FanoutEventSink, LoggingEventSink, PipelineEvent,
};
use crate::metrics::{EngineStats, PipelineMetrics, StageMetrics};
use crate::pipeline::{
    FailureRecord, PipelineConfig, PipelineInfo, PipelineRuntime, PipelineStage, ProcessorRef,
    StageDefinition, StageInfo,
};
use crate::processors::{Processor, ProcessorRegistry};
use crate::utils::{generate_pipeline_id, generate_stage_id};

/// In-process stream-processing engine.
pub struct StreamEngine {
    config: EngineConfig,
    registry: ProcessorRegistry,
    pipelines: DashMap<String, Arc<PipelineRuntime>>,
    events: Arc<dyn EventSink>,
    broadcast: Arc<BroadcastEventSink>,
}

impl Default for StreamEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamEngine {
    /// Creates an engine with default configuration and logged events.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    /// Creates an engine with `config` and logged events.
    #[must_use]
    pub fn with_config(config: EngineConfig) -> Self {
        Self::with_event_sink(config, Arc::new(LoggingEventSink::default()))
    }

    /// Creates an engine that reports events to `sink` as well as to
    /// [`subscribe_events`](Self::subscribe_events) receivers.
    #[must_use]
    pub fn with_event_sink(config: EngineConfig, sink: Arc<dyn EventSink>) -> Self {
        let broadcast = Arc::new(BroadcastEventSink::new(config.event_buffer));
        let events = FanoutEventSink::new()
            .with_sink(sink)
            .with_sink(Arc::clone(&broadcast) as Arc<dyn EventSink>);
        Self {
            config,
            registry: ProcessorRegistry::with_builtins(),
            pipelines: DashMap::new(),
            events: Arc::new(events),
            broadcast,
        }
    }

    /// The engine configuration.
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The processor registry.
    #[must_use]
    pub fn registry(&self) -> &ProcessorRegistry {
        &self.registry
    }

    fn pipeline(&self, pipeline_id: &str) -> Result<Arc<PipelineRuntime>> {
        self.pipelines
            .get(pipeline_id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| StreamflowError::PipelineNotFound(pipeline_id.to_string()))
    }

    /// Creates an idle pipeline.
    ///
    /// `config` defaults to the engine's `default_pipeline`.
    ///
    /// # Errors
    ///
    /// Fails on an invalid config or when `max_pipelines` is reached.
    pub fn create_pipeline(
        &self,
        name: impl Into<String>,
        config: Option<PipelineConfig>,
    ) -> Result<PipelineInfo> {
        let config = config.unwrap_or_else(|| self.config.default_pipeline.clone());
        config.validate().map_err(StreamflowError::Config)?;
        if self.config.max_pipelines > 0 && self.pipelines.len() >= self.config.max_pipelines {
            return Err(StreamflowError::Config(format!(
                "pipeline limit of {} reached",
                self.config.max_pipelines
            )));
        }

        let id = generate_pipeline_id();
        let name = name.into();
        let runtime = PipelineRuntime::new(id.clone(), name.clone(), config, Arc::clone(&self.events));
        let info = runtime.info();
        self.pipelines.insert(id.clone(), runtime);

        tracing::info!(pipeline_id = %id, name = %name, "Pipeline created");
        self.events.try_emit(&PipelineEvent::Created {
            pipeline_id: id,
            name,
        });
        Ok(info)
    }

    /// Adds a stage to a pipeline.
    ///
    /// # Errors
    ///
    /// - `PipelineNotFound` / `ProcessorNotFound` for unknown names
    /// - `Validation` for a duplicate stage id
    /// - `InvalidTransition` on a completed pipeline
    pub fn add_stage(&self, pipeline_id: &str, definition: StageDefinition) -> Result<StageInfo> {
        let runtime = self.pipeline(pipeline_id)?;
        let (processor_name, processor) = match &definition.processor {
            ProcessorRef::Named(name) => (name.clone(), self.registry.get(name)?),
            ProcessorRef::Custom(processor) => {
                (processor.name().to_string(), Arc::clone(processor))
            }
        };
        let id = definition.id.clone().unwrap_or_else(generate_stage_id);
        runtime.add_stage(PipelineStage::new(id, definition, processor_name, processor))
    }

    /// Starts or resumes a pipeline.
    ///
    /// # Errors
    ///
    /// Fails for an unknown id, an invalid transition or an invalid graph.
    pub fn start(&self, pipeline_id: &str) -> Result<PipelineInfo> {
        let runtime = self.pipeline(pipeline_id)?;
        runtime.start()?;
        Ok(runtime.info())
    }

    /// Pauses a running pipeline.
    ///
    /// # Errors
    ///
    /// Fails for an unknown id or a pipeline that is not running.
    pub fn pause(&self, pipeline_id: &str) -> Result<PipelineInfo> {
        let runtime = self.pipeline(pipeline_id)?;
        runtime.pause()?;
        Ok(runtime.info())
    }

    /// Stops a pipeline for good.
    ///
    /// # Errors
    ///
    /// Fails for an unknown id.
    pub fn stop(&self, pipeline_id: &str) -> Result<PipelineInfo> {
        let runtime = self.pipeline(pipeline_id)?;
        runtime.stop();
        Ok(runtime.info())
    }

    /// Stops a pipeline and discards its stages, buffer and state.
    ///
    /// # Errors
    ///
    /// Fails for an unknown id.
    pub fn remove_pipeline(&self, pipeline_id: &str) -> Result<()> {
        let (_, runtime) = self
            .pipelines
            .remove(pipeline_id)
            .ok_or_else(|| StreamflowError::PipelineNotFound(pipeline_id.to_string()))?;
        runtime.teardown();
        Ok(())
    }

    /// Pushes a payload, applying the pipeline's backpressure strategy.
    ///
    /// # Errors
    ///
    /// Fails for an unknown id, a completed pipeline, or when backpressure
    /// rejects the item.
    pub async fn push(&self, pipeline_id: &str, payload: serde_json::Value) -> Result<StreamItem> {
        let runtime = self.pipeline(pipeline_id)?;
        runtime.push(payload).await
    }

    /// Pushes a payload without waiting for buffer space.
    ///
    /// # Errors
    ///
    /// As [`push`](Self::push).
    pub fn try_push(&self, pipeline_id: &str, payload: serde_json::Value) -> Result<StreamItem> {
        self.pipeline(pipeline_id)?.try_push(payload, "push")
    }

    /// Registers a processor under `name` for future `add_stage` calls.
    pub fn register_processor(&self, name: impl Into<String>, processor: Arc<dyn Processor>) {
        let name = name.into();
        tracing::debug!(processor = %name, "Processor registered");
        self.registry.register_as(name, processor);
    }

    /// Installs a user function in a pipeline's state.
    ///
    /// # Errors
    ///
    /// Fails for an unknown id.
    pub fn register_function(
        &self,
        pipeline_id: &str,
        key: impl Into<String>,
        function: PipelineFn,
    ) -> Result<()> {
        self.pipeline(pipeline_id)?
            .state()
            .register_function(key, function);
        Ok(())
    }

    /// Pipeline metrics, including every stage.
    ///
    /// # Errors
    ///
    /// Fails for an unknown id.
    pub fn get_metrics(&self, pipeline_id: &str) -> Result<PipelineMetrics> {
        Ok(self.pipeline(pipeline_id)?.metrics())
    }

    /// Metrics for one stage.
    ///
    /// # Errors
    ///
    /// Fails for an unknown pipeline or stage id.
    pub fn get_stage_metrics(&self, pipeline_id: &str, stage_id: &str) -> Result<StageMetrics> {
        self.pipeline(pipeline_id)?.stage_metrics(stage_id)
    }

    /// Totals across all pipelines.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn get_stats(&self) -> EngineStats {
        let snapshots: Vec<(PipelineStatus, PipelineMetrics)> = self
            .pipelines
            .iter()
            .map(|entry| (entry.status(), entry.metrics()))
            .collect();

        let total_pipelines = snapshots.len();
        let avg_throughput = if total_pipelines == 0 {
            0.0
        } else {
            snapshots.iter().map(|(_, m)| m.throughput).sum::<f64>() / total_pipelines as f64
        };

        EngineStats {
            total_pipelines,
            running_pipelines: snapshots.iter().filter(|(s, _)| s.is_running()).count(),
            total_input: snapshots.iter().map(|(_, m)| m.total_input).sum(),
            total_output: snapshots.iter().map(|(_, m)| m.total_output).sum(),
            total_errors: snapshots.iter().map(|(_, m)| m.total_errors).sum(),
            avg_throughput,
            registered_processors: self.registry.len(),
        }
    }

    /// Subscribes to items leaving a pipeline through its sinks.
    ///
    /// # Errors
    ///
    /// Fails for an unknown id.
    pub fn subscribe(&self, pipeline_id: &str) -> Result<broadcast::Receiver<StreamItem>> {
        Ok(self.pipeline(pipeline_id)?.subscribe())
    }

    /// Subscribes to events from every pipeline.
    #[must_use]
    pub fn subscribe_events(&self) -> broadcast::Receiver<PipelineEvent> {
        self.broadcast.subscribe()
    }

    /// Describes one pipeline.
    ///
    /// # Errors
    ///
    /// Fails for an unknown id.
    pub fn get_pipeline(&self, pipeline_id: &str) -> Result<PipelineInfo> {
        Ok(self.pipeline(pipeline_id)?.info())
    }

    /// Describes every pipeline, oldest first.
    #[must_use]
    pub fn list_pipelines(&self) -> Vec<PipelineInfo> {
        let mut infos: Vec<PipelineInfo> = self.pipelines.iter().map(|entry| entry.info()).collect();
        infos.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        infos
    }

    /// Recent terminal failures of a pipeline.
    ///
    /// # Errors
    ///
    /// Fails for an unknown id.
    pub fn recent_failures(&self, pipeline_id: &str) -> Result<Vec<FailureRecord>> {
        Ok(self.pipeline(pipeline_id)?.recent_failures())
    }

    /// Copy of a pipeline's state values.
    ///
    /// # Errors
    ///
    /// Fails for an unknown id.
    pub fn state_snapshot(
        &self,
        pipeline_id: &str,
    ) -> Result<serde_json::Map<String, serde_json::Value>> {
        Ok(self.pipeline(pipeline_id)?.state().snapshot())
    }

    /// Registered processor names, sorted.
    #[must_use]
    pub fn list_processors(&self) -> Vec<String> {
        self.registry.list()
    }
}

impl Drop for StreamEngine {
    fn drop(&mut self) {
        for entry in &self.pipelines {
            entry.stop();
        }
    }
}

impl std::fmt::Debug for StreamEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamEngine")
            .field("config", &self.config)
            .field("pipelines", &self.pipelines.len())
            .field("processors", &self.registry.len())
            .finish()
    }
}
