//! Test fixtures for processor and pipeline tests.

use std::sync::Arc;
use tokio::sync::broadcast;

use crate::context::{PipelineFn, ProcessorContext, StateStore};
use crate::core::StreamItem;
use crate::errors::Result;
use crate::events::CollectingEventSink;
use crate::pipeline::{
    run_tick, PipelineConfig, PipelineRuntime, PipelineStage, ProcessorRef, StageDefinition,
    StageInfo,
};
use crate::processors::ProcessorRegistry;
use crate::utils::generate_stage_id;

/// Builds a [`ProcessorContext`] for calling a processor directly.
#[derive(Debug, Default)]
pub struct TestContext {
    /// Stage params.
    pub params: serde_json::Map<String, serde_json::Value>,
    state: Arc<StateStore>,
}

impl TestContext {
    /// Creates an empty context builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a stage param.
    #[must_use]
    pub fn with_param(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.params.insert(key.into(), value);
        self
    }

    /// Seeds a state value.
    #[must_use]
    pub fn with_state(self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.state.set(key, value);
        self
    }

    /// Registers a function in state.
    #[must_use]
    pub fn with_function(self, key: impl Into<String>, function: PipelineFn) -> Self {
        self.state.register_function(key, function);
        self
    }

    /// The shared state, for assertions after processing.
    #[must_use]
    pub fn state(&self) -> &Arc<StateStore> {
        &self.state
    }

    /// Builds a context for `stage_id` in pipeline `test-pipeline`.
    #[must_use]
    pub fn build(&self, stage_id: &str) -> ProcessorContext {
        ProcessorContext::new(
            "test-pipeline",
            stage_id,
            self.params.clone(),
            Arc::clone(&self.state),
        )
    }
}

/// A pipeline driven tick by tick, without a scheduler task.
pub struct TestPipeline {
    runtime: Arc<PipelineRuntime>,
    registry: ProcessorRegistry,
    events: Arc<CollectingEventSink>,
    outputs: broadcast::Receiver<StreamItem>,
}

impl TestPipeline {
    /// Creates a pipeline with the default config.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(PipelineConfig::default())
    }

    /// Creates a pipeline with `config`.
    #[must_use]
    pub fn with_config(config: PipelineConfig) -> Self {
        let events = Arc::new(CollectingEventSink::new());
        let runtime = PipelineRuntime::new("test-pipeline", "test", config, events.clone());
        let outputs = runtime.subscribe();
        Self {
            runtime,
            registry: ProcessorRegistry::with_builtins(),
            events,
            outputs,
        }
    }

    /// The underlying runtime.
    #[must_use]
    pub fn runtime(&self) -> &Arc<PipelineRuntime> {
        &self.runtime
    }

    /// Events emitted so far.
    #[must_use]
    pub fn events(&self) -> &CollectingEventSink {
        &self.events
    }

    /// Adds a stage, resolving named processors against the built-ins.
    pub fn add_stage(&self, definition: StageDefinition) -> Result<StageInfo> {
        let (processor_name, processor) = match &definition.processor {
            ProcessorRef::Named(name) => (name.clone(), self.registry.get(name)?),
            ProcessorRef::Custom(processor) => {
                (processor.name().to_string(), Arc::clone(processor))
            }
        };
        let id = definition.id.clone().unwrap_or_else(generate_stage_id);
        self.runtime
            .add_stage(PipelineStage::new(id, definition, processor_name, processor))
    }

    /// Registers a function in the pipeline state.
    pub fn register_function(&self, key: impl Into<String>, function: PipelineFn) {
        self.runtime.state().register_function(key, function);
    }

    /// Buffers a payload.
    pub fn push(&self, payload: serde_json::Value) -> Result<StreamItem> {
        self.runtime.try_push(payload, "push")
    }

    /// Runs ticks until the buffer is empty or `max_ticks` have run.
    ///
    /// Returns the number of ticks run.
    pub async fn run_until_idle(&self, max_ticks: usize) -> usize {
        let mut ticks = 0;
        while ticks < max_ticks && !self.runtime.buffer.is_empty() {
            run_tick(&self.runtime).await;
            ticks += 1;
        }
        ticks
    }

    /// Takes every sink output delivered since the last call.
    pub fn take_outputs(&mut self) -> Vec<StreamItem> {
        let mut items = Vec::new();
        while let Ok(item) = self.outputs.try_recv() {
            items.push(item);
        }
        items
    }
}

impl Default for TestPipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for TestPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestPipeline")
            .field("runtime", &self.runtime)
            .finish_non_exhaustive()
    }
}
