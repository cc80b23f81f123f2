//! Lifecycle events for observability.
//!
//! The engine reports pipeline transitions and item failures through an
//! [`EventSink`]. Events are also published on a broadcast channel that
//! callers can subscribe to.

mod broadcast;
mod event;
mod sink;

pub use broadcast::{BroadcastEventSink, BroadcastMetrics};
pub use event::PipelineEvent;
pub use sink::{
    CollectingEventSink, EventSink, FanoutEventSink, LoggingEventSink, NoOpEventSink,
};
