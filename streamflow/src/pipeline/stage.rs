//! Stage definitions and their runtime form.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Semaphore;

use super::StageConfig;
use crate::core::StageType;
use crate::metrics::{StageCounters, StageMetrics};
use crate::processors::Processor;

/// Where a stage's processor comes from.
#[derive(Debug, Clone)]
pub enum ProcessorRef {
    /// Look the processor up in the engine registry.
    Named(String),
    /// Use this processor directly.
    Custom(Arc<dyn Processor>),
}

/// Input to `add_stage`.
#[derive(Debug, Clone)]
pub struct StageDefinition {
    /// Explicit id; generated when absent.
    pub id: Option<String>,
    /// Display name.
    pub name: String,
    /// Stage type.
    pub stage_type: StageType,
    /// The processor.
    pub processor: ProcessorRef,
    /// Stage configuration.
    pub config: StageConfig,
    /// Downstream ids. `None` chains to the next stage added.
    pub next_stage_ids: Option<Vec<String>>,
}

impl StageDefinition {
    /// Creates a transform stage backed by a registered processor.
    #[must_use]
    pub fn new(name: impl Into<String>, processor: impl Into<String>) -> Self {
        Self {
            id: None,
            name: name.into(),
            stage_type: StageType::default(),
            processor: ProcessorRef::Named(processor.into()),
            config: StageConfig::default(),
            next_stage_ids: None,
        }
    }

    /// Creates a transform stage backed by a custom processor.
    #[must_use]
    pub fn custom(name: impl Into<String>, processor: Arc<dyn Processor>) -> Self {
        Self {
            processor: ProcessorRef::Custom(processor),
            ..Self::new(name, String::new())
        }
    }

    /// Sets the stage id.
    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Sets the stage type.
    #[must_use]
    pub fn with_type(mut self, stage_type: StageType) -> Self {
        self.stage_type = stage_type;
        self
    }

    /// Sets the configuration.
    #[must_use]
    pub fn with_config(mut self, config: StageConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets explicit downstream ids.
    #[must_use]
    pub fn with_next<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.next_stage_ids = Some(ids.into_iter().map(Into::into).collect());
        self
    }

    /// Marks the stage as a leaf that is never auto-chained.
    #[must_use]
    pub fn leaf(mut self) -> Self {
        self.next_stage_ids = Some(Vec::new());
        self
    }
}

/// A stage as held by a running pipeline.
///
/// Cloning shares the processor, counters and concurrency permits.
#[derive(Debug, Clone)]
pub struct PipelineStage {
    /// Stage id.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Stage type.
    pub stage_type: StageType,
    /// Registry name of the processor, or its own name for custom processors.
    pub processor_name: String,
    /// Stage configuration.
    pub config: StageConfig,
    /// Downstream stage ids.
    pub next_stage_ids: Vec<String>,
    pub(crate) auto_chain: bool,
    pub(crate) processor: Arc<dyn Processor>,
    pub(crate) counters: Arc<StageCounters>,
    pub(crate) permits: Arc<Semaphore>,
}

impl PipelineStage {
    /// Builds a runtime stage from a resolved processor.
    #[must_use]
    pub fn new(
        id: String,
        definition: StageDefinition,
        processor_name: String,
        processor: Arc<dyn Processor>,
    ) -> Self {
        let permits = Arc::new(Semaphore::new(definition.config.parallelism.max(1)));
        Self {
            id,
            name: definition.name,
            stage_type: definition.stage_type,
            processor_name,
            config: definition.config,
            auto_chain: definition.next_stage_ids.is_none(),
            next_stage_ids: definition.next_stage_ids.unwrap_or_default(),
            processor,
            counters: Arc::new(StageCounters::new()),
            permits,
        }
    }

    /// Returns true if outputs of this stage leave the pipeline.
    #[must_use]
    pub fn is_sink(&self) -> bool {
        self.stage_type == StageType::Sink || self.next_stage_ids.is_empty()
    }

    /// Snapshot of this stage's counters.
    #[must_use]
    pub fn metrics(&self, elapsed_secs: f64) -> StageMetrics {
        self.counters.snapshot(&self.id, &self.name, elapsed_secs)
    }

    /// Serializable description of the stage.
    #[must_use]
    pub fn info(&self) -> StageInfo {
        StageInfo {
            id: self.id.clone(),
            name: self.name.clone(),
            stage_type: self.stage_type,
            processor: self.processor_name.clone(),
            config: self.config.clone(),
            next_stage_ids: self.next_stage_ids.clone(),
        }
    }
}

/// Serializable description of a stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageInfo {
    /// Stage id.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Stage type.
    pub stage_type: StageType,
    /// Processor name.
    pub processor: String,
    /// Stage configuration.
    pub config: StageConfig,
    /// Downstream stage ids.
    pub next_stage_ids: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processors::PassthroughProcessor;

    #[test]
    fn test_definition_builders() {
        let def = StageDefinition::new("big", "filter")
            .with_id("s1")
            .with_type(StageType::Filter)
            .with_next(["s2"]);

        assert_eq!(def.id.as_deref(), Some("s1"));
        assert_eq!(def.stage_type, StageType::Filter);
        assert_eq!(def.next_stage_ids, Some(vec!["s2".to_string()]));
        assert!(matches!(def.processor, ProcessorRef::Named(ref n) if n == "filter"));
    }

    #[test]
    fn test_runtime_stage_modes() {
        let auto = PipelineStage::new(
            "a".to_string(),
            StageDefinition::new("a", "passthrough"),
            "passthrough".to_string(),
            Arc::new(PassthroughProcessor),
        );
        assert!(auto.auto_chain);
        assert!(auto.is_sink());

        let leaf = PipelineStage::new(
            "b".to_string(),
            StageDefinition::new("b", "passthrough").leaf(),
            "passthrough".to_string(),
            Arc::new(PassthroughProcessor),
        );
        assert!(!leaf.auto_chain);
        assert_eq!(leaf.info().processor, "passthrough");
    }
}
