//! Event sink that fans events out to subscribers.

use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::broadcast;

use super::{EventSink, PipelineEvent};

/// Delivery counters for a [`BroadcastEventSink`].
#[derive(Debug, Default)]
pub struct BroadcastMetrics {
    emitted: AtomicU64,
    dropped: AtomicU64,
}

impl BroadcastMetrics {
    fn record_emit(&self) {
        self.emitted.fetch_add(1, Ordering::Relaxed);
    }

    fn record_drop(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Events delivered to at least one subscriber.
    #[must_use]
    pub fn emitted(&self) -> u64 {
        self.emitted.load(Ordering::Relaxed)
    }

    /// Events published while nobody was subscribed.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Drop rate as a percentage.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn drop_rate(&self) -> f64 {
        let emitted = self.emitted();
        let dropped = self.dropped();
        let total = emitted + dropped;
        if total == 0 {
            0.0
        } else {
            (dropped as f64 / total as f64) * 100.0
        }
    }
}

/// Publishes events on a bounded broadcast channel.
///
/// Slow subscribers lag and lose the oldest events rather than slowing the
/// processing path.
#[derive(Debug)]
pub struct BroadcastEventSink {
    tx: broadcast::Sender<PipelineEvent>,
    metrics: BroadcastMetrics,
}

impl BroadcastEventSink {
    /// Creates a sink buffering up to `capacity` events per subscriber.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            tx,
            metrics: BroadcastMetrics::default(),
        }
    }

    /// Subscribes to events published from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.tx.subscribe()
    }

    /// Current subscriber count.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Delivery counters.
    #[must_use]
    pub fn metrics(&self) -> &BroadcastMetrics {
        &self.metrics
    }
}

#[async_trait]
impl EventSink for BroadcastEventSink {
    fn try_emit(&self, event: &PipelineEvent) {
        if self.tx.send(event.clone()).is_ok() {
            self.metrics.record_emit();
        } else {
            self.metrics.record_drop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn removed() -> PipelineEvent {
        PipelineEvent::Removed {
            pipeline_id: "p1".to_string(),
        }
    }

    #[test]
    fn test_without_subscribers_counts_drops() {
        let sink = BroadcastEventSink::new(4);
        sink.try_emit(&removed());
        assert_eq!(sink.metrics().dropped(), 1);
        assert!((sink.metrics().drop_rate() - 100.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_subscriber_receives_events() {
        let sink = BroadcastEventSink::new(4);
        let mut rx = sink.subscribe();
        assert_eq!(sink.subscriber_count(), 1);

        sink.emit(removed()).await;
        assert_eq!(rx.recv().await.unwrap(), removed());
        assert_eq!(sink.metrics().emitted(), 1);
    }
}
