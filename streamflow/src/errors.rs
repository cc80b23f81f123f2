//! Error types for the streamflow engine.
//!
//! Configuration errors (unknown ids, invalid transitions, graph problems) fail
//! fast at the call that referenced them. Runtime faults raised by processors
//! are represented by [`ProcessorError`] and never reach the caller of `push`.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

use crate::core::PipelineStatus;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StreamflowError>;

/// The main error type for streamflow operations.
#[derive(Debug, Error)]
pub enum StreamflowError {
    /// The pipeline buffer is full.
    #[error("Capacity exceeded for pipeline '{pipeline_id}': buffer holds {capacity} items")]
    CapacityExceeded {
        /// The pipeline that rejected the item.
        pipeline_id: String,
        /// The configured buffer size.
        capacity: usize,
    },

    /// The item was rejected by the `sample` backpressure strategy.
    #[error("Item sampled out by backpressure on pipeline '{pipeline_id}'")]
    ItemSampledOut {
        /// The pipeline that rejected the item.
        pipeline_id: String,
    },

    /// A processor exceeded its stage timeout.
    #[error("Processor for stage '{stage_id}' timed out after {timeout_ms}ms")]
    ProcessorTimeout {
        /// The stage whose processor timed out.
        stage_id: String,
        /// The configured timeout.
        timeout_ms: u64,
    },

    /// A processor raised an error.
    #[error("Processor for stage '{stage_id}' failed: {source}")]
    ProcessorFailure {
        /// The stage whose processor failed.
        stage_id: String,
        /// The underlying processor error.
        #[source]
        source: ProcessorError,
    },

    /// No pipeline with the given id exists.
    #[error("Pipeline not found: {0}")]
    PipelineNotFound(String),

    /// No stage with the given id exists in the pipeline.
    #[error("Stage not found: {stage_id} (pipeline '{pipeline_id}')")]
    StageNotFound {
        /// The pipeline searched.
        pipeline_id: String,
        /// The missing stage id.
        stage_id: String,
    },

    /// No processor is registered under the given name.
    #[error("Processor not found: {0}")]
    ProcessorNotFound(String),

    /// The requested lifecycle transition is not allowed.
    #[error("Invalid transition for pipeline '{pipeline_id}': cannot {action} while {status}")]
    InvalidTransition {
        /// The pipeline.
        pipeline_id: String,
        /// The attempted action.
        action: &'static str,
        /// The status at the time of the call.
        status: PipelineStatus,
    },

    /// Pipeline or stage definition is invalid.
    #[error("{0}")]
    Validation(#[from] PipelineValidationError),

    /// The stage graph contains a cycle.
    #[error("{0}")]
    CycleDetected(#[from] CycleDetectedError),

    /// Engine limits or config values are invalid.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl StreamflowError {
    /// Creates a stage-not-found error.
    #[must_use]
    pub fn stage_not_found(pipeline_id: impl Into<String>, stage_id: impl Into<String>) -> Self {
        Self::StageNotFound {
            pipeline_id: pipeline_id.into(),
            stage_id: stage_id.into(),
        }
    }

    /// Returns true for errors caused by backpressure.
    #[must_use]
    pub fn is_backpressure(&self) -> bool {
        matches!(self, Self::CapacityExceeded { .. } | Self::ItemSampledOut { .. })
    }
}

/// Errors raised by processors while handling one item.
#[derive(Debug, Error)]
pub enum ProcessorError {
    /// The processor needs a function that is not in the state arena.
    #[error("Function '{0}' is not registered in the pipeline state")]
    FunctionNotFound(String),

    /// A registered function has the wrong shape for this processor.
    #[error("Function '{key}' is not a {expected} function")]
    FunctionMismatch {
        /// The state key.
        key: String,
        /// The expected function kind.
        expected: &'static str,
    },

    /// A stage parameter is missing or has the wrong type.
    #[error("Invalid parameter '{name}': {reason}")]
    InvalidParam {
        /// The parameter name.
        name: String,
        /// Why it was rejected.
        reason: String,
    },

    /// A payload did not have the expected shape.
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    /// A running numeric result would leave the finite `f64` range.
    #[error("Numeric overflow in '{0}'")]
    NumericOverflow(String),

    /// Reading or writing pipeline state failed.
    #[error("State error: {0}")]
    State(#[from] serde_json::Error),

    /// An error returned by user code.
    #[error(transparent)]
    User(#[from] anyhow::Error),
}

impl ProcessorError {
    /// Creates an invalid parameter error.
    #[must_use]
    pub fn invalid_param(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidParam {
            name: name.into(),
            reason: reason.into(),
        }
    }
}

/// Metadata about a contract error for better diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ContractErrorInfo {
    /// Error code (e.g., "GRAPH-CYCLE").
    pub code: String,
    /// Short summary of the error.
    pub summary: String,
    /// Hint for fixing the error.
    pub fix_hint: Option<String>,
    /// Additional context key-value pairs.
    #[serde(default)]
    pub context: HashMap<String, String>,
}

impl ContractErrorInfo {
    /// Creates a new contract error info.
    #[must_use]
    pub fn new(code: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            summary: summary.into(),
            fix_hint: None,
            context: HashMap::new(),
        }
    }

    /// Sets the fix hint.
    #[must_use]
    pub fn with_fix_hint(mut self, hint: impl Into<String>) -> Self {
        self.fix_hint = Some(hint.into());
        self
    }

    /// Adds a single context entry.
    #[must_use]
    pub fn with_context_entry(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }
}

/// Error raised when a pipeline or stage definition is rejected.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct PipelineValidationError {
    /// The error message.
    pub message: String,
    /// The stages involved in the error.
    pub stages: Vec<String>,
    /// Optional contract error info.
    pub error_info: Option<ContractErrorInfo>,
}

impl PipelineValidationError {
    /// Creates a new pipeline validation error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            stages: Vec::new(),
            error_info: None,
        }
    }

    /// Sets the stages involved.
    #[must_use]
    pub fn with_stages(mut self, stages: Vec<String>) -> Self {
        self.stages = stages;
        self
    }

    /// Sets the contract error info.
    #[must_use]
    pub fn with_error_info(mut self, info: ContractErrorInfo) -> Self {
        self.error_info = Some(info);
        self
    }
}

/// Error raised when the downstream links of a pipeline form a cycle.
#[derive(Debug, Clone, Error)]
#[error("Cycle detected in stage graph: {}", cycle_path.join(" -> "))]
pub struct CycleDetectedError {
    /// The path of stage ids forming the cycle.
    pub cycle_path: Vec<String>,
    /// Contract error info.
    pub error_info: ContractErrorInfo,
}

impl CycleDetectedError {
    /// Creates a new cycle detected error.
    #[must_use]
    pub fn new(cycle_path: Vec<String>) -> Self {
        let info = ContractErrorInfo::new(
            "GRAPH-CYCLE",
            format!("Stage graph contains a cycle: {}", cycle_path.join(" -> ")),
        )
        .with_fix_hint("Remove one of the downstream links in the cycle to break it.");

        Self {
            cycle_path,
            error_info: info,
        }
    }
}
