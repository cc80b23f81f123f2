//! Event sink trait and implementations.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, warn, Level};

use super::PipelineEvent;

/// Receives lifecycle events.
///
/// `try_emit` is called inline on the processing path and must not block or
/// panic.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Emits an event asynchronously.
    async fn emit(&self, event: PipelineEvent) {
        self.try_emit(&event);
    }

    /// Emits an event without blocking.
    fn try_emit(&self, event: &PipelineEvent);
}

/// Discards all events.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpEventSink;

#[async_trait]
impl EventSink for NoOpEventSink {
    fn try_emit(&self, _event: &PipelineEvent) {}
}

/// Logs events through `tracing`.
///
/// Item failures are logged at `warn` regardless of the configured level.
#[derive(Debug, Clone)]
pub struct LoggingEventSink {
    level: Level,
}

impl Default for LoggingEventSink {
    fn default() -> Self {
        Self { level: Level::INFO }
    }
}

impl LoggingEventSink {
    /// Creates a sink logging at `level`.
    #[must_use]
    pub fn new(level: Level) -> Self {
        Self { level }
    }

    /// Creates a debug-level sink.
    #[must_use]
    pub fn debug() -> Self {
        Self::new(Level::DEBUG)
    }
}

#[async_trait]
impl EventSink for LoggingEventSink {
    fn try_emit(&self, event: &PipelineEvent) {
        let event_type = event.event_type();
        let pipeline_id = event.pipeline_id();
        match event {
            PipelineEvent::Failed { .. } | PipelineEvent::ItemDropped { .. } => {
                warn!(event_type, pipeline_id, event_data = ?event, "Event: {}", event_type);
            }
            _ if self.level == Level::DEBUG => {
                debug!(event_type, pipeline_id, event_data = ?event, "Event: {}", event_type);
            }
            _ => {
                info!(event_type, pipeline_id, event_data = ?event, "Event: {}", event_type);
            }
        }
    }
}

/// Forwards every event to each inner sink in order.
#[derive(Clone, Default)]
pub struct FanoutEventSink {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl FanoutEventSink {
    /// Creates a sink with no targets.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a target sink.
    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Number of target sinks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    /// Returns true if there are no targets.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl std::fmt::Debug for FanoutEventSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FanoutEventSink")
            .field("sinks", &self.sinks.len())
            .finish()
    }
}

#[async_trait]
impl EventSink for FanoutEventSink {
    fn try_emit(&self, event: &PipelineEvent) {
        for sink in &self.sinks {
            sink.try_emit(event);
        }
    }
}

/// Collects events in memory, for tests.
#[derive(Debug, Default)]
pub struct CollectingEventSink {
    events: parking_lot::RwLock<Vec<PipelineEvent>>,
}

impl CollectingEventSink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// All collected events.
    #[must_use]
    pub fn events(&self) -> Vec<PipelineEvent> {
        self.events.read().clone()
    }

    /// Event names in arrival order.
    #[must_use]
    pub fn event_types(&self) -> Vec<&'static str> {
        self.events.read().iter().map(PipelineEvent::event_type).collect()
    }

    /// Returns the number of collected events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    /// Returns true if nothing was collected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }

    /// Clears all collected events.
    pub fn clear(&self) {
        self.events.write().clear();
    }

    /// Events whose name starts with `type_prefix`.
    #[must_use]
    pub fn events_of_type(&self, type_prefix: &str) -> Vec<PipelineEvent> {
        self.events
            .read()
            .iter()
            .filter(|e| e.event_type().starts_with(type_prefix))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl EventSink for CollectingEventSink {
    fn try_emit(&self, event: &PipelineEvent) {
        self.events.write().push(event.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stopped(id: &str) -> PipelineEvent {
        PipelineEvent::Stopped {
            pipeline_id: id.to_string(),
        }
    }

    #[tokio::test]
    async fn test_noop_and_logging_sinks() {
        NoOpEventSink.emit(stopped("p1")).await;
        LoggingEventSink::default().try_emit(&stopped("p1"));
        LoggingEventSink::debug().emit(stopped("p1")).await;
    }

    #[tokio::test]
    async fn test_collecting_sink() {
        let sink = CollectingEventSink::new();
        assert!(sink.is_empty());

        sink.emit(stopped("p1")).await;
        sink.try_emit(&PipelineEvent::Removed {
            pipeline_id: "p1".to_string(),
        });

        assert_eq!(sink.len(), 2);
        assert_eq!(sink.event_types(), vec!["pipeline.stopped", "pipeline.removed"]);
        assert_eq!(sink.events_of_type("pipeline.rem").len(), 1);

        sink.clear();
        assert!(sink.is_empty());
    }

    #[test]
    fn test_fanout_reaches_every_sink() {
        let a = Arc::new(CollectingEventSink::new());
        let b = Arc::new(CollectingEventSink::new());
        let fanout = FanoutEventSink::new()
            .with_sink(a.clone())
            .with_sink(b.clone());
        assert_eq!(fanout.len(), 2);

        fanout.try_emit(&stopped("p1"));
        assert_eq!(a.len(), 1);
        assert_eq!(b.len(), 1);
    }
}
