//! Lifecycle events published by the engine.

use serde::{Deserialize, Serialize};

use crate::core::PipelineStatus;

/// A pipeline or item lifecycle event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PipelineEvent {
    /// A pipeline was created.
    Created {
        /// Pipeline id.
        pipeline_id: String,
        /// Pipeline name.
        name: String,
    },
    /// A pipeline started or resumed.
    Started {
        /// Pipeline id.
        pipeline_id: String,
        /// Status before the transition.
        from: PipelineStatus,
    },
    /// A pipeline was paused.
    Paused {
        /// Pipeline id.
        pipeline_id: String,
        /// Items still buffered.
        buffered: usize,
    },
    /// A pipeline was stopped.
    Stopped {
        /// Pipeline id.
        pipeline_id: String,
    },
    /// A pipeline entered the error state.
    Failed {
        /// Pipeline id.
        pipeline_id: String,
        /// Stage whose failure triggered the transition.
        stage_id: String,
        /// Error message.
        error: String,
    },
    /// A pipeline was removed.
    Removed {
        /// Pipeline id.
        pipeline_id: String,
    },
    /// An item was requeued after a processor failure.
    ItemRetried {
        /// Pipeline id.
        pipeline_id: String,
        /// Stage that failed.
        stage_id: String,
        /// Item id.
        item_id: String,
        /// Retry count after the increment.
        retry_count: u32,
    },
    /// An item was routed to an error-handler stage.
    ItemDeadLettered {
        /// Pipeline id.
        pipeline_id: String,
        /// Stage that failed.
        stage_id: String,
        /// Item id.
        item_id: String,
        /// The error-handler stage.
        error_stage_id: String,
    },
    /// An item was discarded after exhausting retries.
    ItemDropped {
        /// Pipeline id.
        pipeline_id: String,
        /// Stage that failed.
        stage_id: String,
        /// Item id.
        item_id: String,
        /// Error message of the last attempt.
        error: String,
    },
}

impl PipelineEvent {
    /// Dotted event name, e.g. `pipeline.started`.
    #[must_use]
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Created { .. } => "pipeline.created",
            Self::Started { .. } => "pipeline.started",
            Self::Paused { .. } => "pipeline.paused",
            Self::Stopped { .. } => "pipeline.stopped",
            Self::Failed { .. } => "pipeline.error",
            Self::Removed { .. } => "pipeline.removed",
            Self::ItemRetried { .. } => "item.retried",
            Self::ItemDeadLettered { .. } => "item.dead_lettered",
            Self::ItemDropped { .. } => "item.dropped",
        }
    }

    /// The pipeline the event belongs to.
    #[must_use]
    pub fn pipeline_id(&self) -> &str {
        match self {
            Self::Created { pipeline_id, .. }
            | Self::Started { pipeline_id, .. }
            | Self::Paused { pipeline_id, .. }
            | Self::Stopped { pipeline_id }
            | Self::Failed { pipeline_id, .. }
            | Self::Removed { pipeline_id }
            | Self::ItemRetried { pipeline_id, .. }
            | Self::ItemDeadLettered { pipeline_id, .. }
            | Self::ItemDropped { pipeline_id, .. } => pipeline_id,
        }
    }

    /// Event data as JSON.
    #[must_use]
    pub fn to_data(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_names() {
        let event = PipelineEvent::Failed {
            pipeline_id: "p1".to_string(),
            stage_id: "s1".to_string(),
            error: "boom".to_string(),
        };
        assert_eq!(event.event_type(), "pipeline.error");
        assert_eq!(event.pipeline_id(), "p1");
        assert_eq!(event.to_data()["type"], "failed");
    }

    #[test]
    fn test_item_event_data() {
        let event = PipelineEvent::ItemRetried {
            pipeline_id: "p1".to_string(),
            stage_id: "s1".to_string(),
            item_id: "i1".to_string(),
            retry_count: 2,
        };
        let data = event.to_data();
        assert_eq!(data["retry_count"], 2);
        assert_eq!(event.event_type(), "item.retried");
    }
}
