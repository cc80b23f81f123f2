//! The view a processor gets of its stage and pipeline.

use std::sync::Arc;

use super::{PipelineFn, StateStore};
use crate::core::StreamItem;
use crate::errors::{ProcessorError, Result, StreamflowError};

/// Re-enters a pipeline's buffer with a new payload.
pub trait ItemEmitter: Send + Sync {
    /// Pushes a new item without waiting for buffer space.
    ///
    /// # Errors
    ///
    /// Returns a backpressure error if the buffer cannot accept the item.
    fn emit(&self, payload: serde_json::Value) -> Result<StreamItem>;
}

/// Context passed to a processor for one invocation.
///
/// Parameter lookup checks the stage's own `params` first and falls back to
/// the live pipeline state under the same key.
#[derive(Clone)]
pub struct ProcessorContext {
    pipeline_id: String,
    stage_id: String,
    params: serde_json::Map<String, serde_json::Value>,
    state: Arc<StateStore>,
    emitter: Option<Arc<dyn ItemEmitter>>,
}

impl ProcessorContext {
    /// Creates a context with no emitter attached.
    #[must_use]
    pub fn new(
        pipeline_id: impl Into<String>,
        stage_id: impl Into<String>,
        params: serde_json::Map<String, serde_json::Value>,
        state: Arc<StateStore>,
    ) -> Self {
        Self {
            pipeline_id: pipeline_id.into(),
            stage_id: stage_id.into(),
            params,
            state,
            emitter: None,
        }
    }

    /// Attaches an emitter.
    #[must_use]
    pub fn with_emitter(mut self, emitter: Arc<dyn ItemEmitter>) -> Self {
        self.emitter = Some(emitter);
        self
    }

    /// The owning pipeline id.
    #[must_use]
    pub fn pipeline_id(&self) -> &str {
        &self.pipeline_id
    }

    /// The stage being invoked.
    #[must_use]
    pub fn stage_id(&self) -> &str {
        &self.stage_id
    }

    /// The pipeline state arena.
    #[must_use]
    pub fn state(&self) -> &StateStore {
        &self.state
    }

    /// Looks up a parameter, falling back to pipeline state.
    #[must_use]
    pub fn param(&self, name: &str) -> Option<serde_json::Value> {
        self.params
            .get(name)
            .cloned()
            .or_else(|| self.state.get(name))
    }

    /// Looks up a string parameter.
    #[must_use]
    pub fn param_str(&self, name: &str) -> Option<String> {
        self.param(name)
            .and_then(|v| v.as_str().map(ToString::to_string))
    }

    /// Looks up a non-negative integer parameter.
    ///
    /// # Errors
    ///
    /// Returns an error if the parameter is present but not an unsigned integer.
    pub fn param_u64(&self, name: &str) -> std::result::Result<Option<u64>, ProcessorError> {
        match self.param(name) {
            None | Some(serde_json::Value::Null) => Ok(None),
            Some(v) => v
                .as_u64()
                .map(Some)
                .ok_or_else(|| ProcessorError::invalid_param(name, "expected a non-negative integer")),
        }
    }

    /// Looks up the function named by parameter `param`, or by `default_key`.
    ///
    /// # Errors
    ///
    /// Returns [`ProcessorError::FunctionNotFound`] if nothing is registered.
    pub fn function(&self, param: &str, default_key: &str) -> std::result::Result<PipelineFn, ProcessorError> {
        let key = self.param_str(param).unwrap_or_else(|| default_key.to_string());
        self.state
            .function(&key)
            .ok_or(ProcessorError::FunctionNotFound(key))
    }

    /// Pushes a new item into this pipeline's buffer.
    ///
    /// # Errors
    ///
    /// Fails if no emitter is attached or the buffer rejects the item.
    pub fn emit(&self, payload: serde_json::Value) -> Result<StreamItem> {
        match &self.emitter {
            Some(emitter) => emitter.emit(payload),
            None => Err(StreamflowError::Config(format!(
                "stage '{}' has no emitter attached",
                self.stage_id
            ))),
        }
    }
}

impl std::fmt::Debug for ProcessorContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessorContext")
            .field("pipeline_id", &self.pipeline_id)
            .field("stage_id", &self.stage_id)
            .field("params", &self.params)
            .field("has_emitter", &self.emitter.is_some())
            .finish()
    }
}
