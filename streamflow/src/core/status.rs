//! Pipeline status and stage type enums.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The role a stage plays in the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageType {
    /// Entry point for fresh items.
    Source,
    /// Reshapes items.
    #[default]
    Transform,
    /// Drops items that do not match.
    Filter,
    /// Maintains running aggregates.
    Aggregate,
    /// Combines several upstream branches.
    Join,
    /// Groups items by time.
    Window,
    /// Consumes items; never auto-chained downstream.
    Sink,
}

impl fmt::Display for StageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Source => write!(f, "source"),
            Self::Transform => write!(f, "transform"),
            Self::Filter => write!(f, "filter"),
            Self::Aggregate => write!(f, "aggregate"),
            Self::Join => write!(f, "join"),
            Self::Window => write!(f, "window"),
            Self::Sink => write!(f, "sink"),
        }
    }
}

/// Lifecycle state of a pipeline.
///
/// ```text
/// idle ──start──▶ running ──pause──▶ paused ──start──▶ running
///                    │
///                    ├── processor failure (fail-fast) ──▶ error
///                    └── stop ──▶ completed
/// ```
///
/// `stop` is accepted from every state and `completed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStatus {
    /// Created, never started.
    #[default]
    Idle,
    /// Scheduler is draining the buffer.
    Running,
    /// Scheduler cancelled; buffer and state kept.
    Paused,
    /// Halted by a fail-fast processor failure.
    Error,
    /// Stopped for good.
    Completed,
}

impl fmt::Display for PipelineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Running => write!(f, "running"),
            Self::Paused => write!(f, "paused"),
            Self::Error => write!(f, "error"),
            Self::Completed => write!(f, "completed"),
        }
    }
}

impl PipelineStatus {
    /// Returns true if `start` may move this status to `Running`.
    #[must_use]
    pub fn can_start(&self) -> bool {
        matches!(self, Self::Idle | Self::Paused)
    }

    /// Returns true if `pause` may move this status to `Paused`.
    #[must_use]
    pub fn can_pause(&self) -> bool {
        matches!(self, Self::Running)
    }

    /// Returns true if no further transitions are possible.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed)
    }

    /// Returns true if the pipeline may take new items or stages.
    ///
    /// An errored pipeline can never drain again, so it rejects work too.
    #[must_use]
    pub fn accepts_work(&self) -> bool {
        matches!(self, Self::Idle | Self::Running | Self::Paused)
    }

    /// Returns true if the scheduler should be ticking.
    #[must_use]
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_type_display() {
        assert_eq!(StageType::Source.to_string(), "source");
        assert_eq!(StageType::Window.to_string(), "window");
        assert_eq!(StageType::Sink.to_string(), "sink");
    }

    #[test]
    fn test_pipeline_status_transitions() {
        assert!(PipelineStatus::Idle.can_start());
        assert!(PipelineStatus::Paused.can_start());
        assert!(!PipelineStatus::Error.can_start());
        assert!(!PipelineStatus::Completed.can_start());

        assert!(PipelineStatus::Running.can_pause());
        assert!(!PipelineStatus::Idle.can_pause());

        assert!(PipelineStatus::Completed.is_terminal());
        assert!(!PipelineStatus::Error.is_terminal());
    }

    #[test]
    fn test_accepts_work() {
        assert!(PipelineStatus::Idle.accepts_work());
        assert!(PipelineStatus::Running.accepts_work());
        assert!(PipelineStatus::Paused.accepts_work());
        assert!(!PipelineStatus::Error.accepts_work());
        assert!(!PipelineStatus::Completed.accepts_work());
    }

    #[test]
    fn test_status_serialize() {
        let json = serde_json::to_string(&PipelineStatus::Running).unwrap();
        assert_eq!(json, r#""running""#);

        let ty: StageType = serde_json::from_str(r#""aggregate""#).unwrap();
        assert_eq!(ty, StageType::Aggregate);
    }
}
