//! Mock processors for testing.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::context::ProcessorContext;
use crate::core::StreamItem;
use crate::errors::ProcessorError;
use crate::processors::{Processor, ProcessorOutput};

/// A processor that records calls and replaces payloads with a fixed value.
///
/// With no payload set it passes items through unchanged.
#[derive(Debug)]
pub struct MockProcessor {
    name: String,
    payload: Mutex<Option<serde_json::Value>>,
    call_count: AtomicUsize,
    stages: Mutex<Vec<String>>,
}

impl MockProcessor {
    /// Creates a pass-through mock.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            payload: Mutex::new(None),
            call_count: AtomicUsize::new(0),
            stages: Mutex::new(Vec::new()),
        }
    }

    /// Sets the payload every output will carry.
    pub fn set_payload(&self, payload: serde_json::Value) {
        *self.payload.lock() = Some(payload);
    }

    /// Returns the number of invocations.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    /// Stage ids seen on each invocation.
    #[must_use]
    pub fn recorded_stages(&self) -> Vec<String> {
        self.stages.lock().clone()
    }

    /// Resets call tracking.
    pub fn reset(&self) {
        self.call_count.store(0, Ordering::SeqCst);
        self.stages.lock().clear();
    }
}

#[async_trait]
impl Processor for MockProcessor {
    fn name(&self) -> &str {
        &self.name
    }

    async fn process(
        &self,
        item: StreamItem,
        ctx: &ProcessorContext,
    ) -> Result<ProcessorOutput, ProcessorError> {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        self.stages.lock().push(ctx.stage_id().to_string());
        let payload = self.payload.lock().clone();
        Ok(match payload {
            Some(payload) => item.with_payload(payload).into(),
            None => item.into(),
        })
    }
}

/// A processor that fails a fixed number of times, then passes items through.
#[derive(Debug)]
pub struct FailingProcessor {
    name: String,
    error: String,
    remaining: Option<AtomicUsize>,
    attempts: AtomicUsize,
}

impl FailingProcessor {
    /// Creates a processor that always fails.
    #[must_use]
    pub fn new(name: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            error: error.into(),
            remaining: None,
            attempts: AtomicUsize::new(0),
        }
    }

    /// Creates a processor that fails `times` invocations and then succeeds.
    #[must_use]
    pub fn failing_times(name: impl Into<String>, error: impl Into<String>, times: usize) -> Self {
        Self {
            remaining: Some(AtomicUsize::new(times)),
            ..Self::new(name, error)
        }
    }

    /// Returns the number of invocations.
    #[must_use]
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    fn should_fail(&self) -> bool {
        match &self.remaining {
            None => true,
            Some(remaining) => remaining
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok(),
        }
    }
}

#[async_trait]
impl Processor for FailingProcessor {
    fn name(&self) -> &str {
        &self.name
    }

    async fn process(
        &self,
        item: StreamItem,
        _ctx: &ProcessorContext,
    ) -> Result<ProcessorOutput, ProcessorError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.should_fail() {
            return Err(ProcessorError::User(anyhow::anyhow!("{}", self.error)));
        }
        Ok(item.into())
    }
}

/// A processor that sleeps before passing items through.
#[derive(Debug)]
pub struct SlowProcessor {
    name: String,
    delay: Duration,
}

impl SlowProcessor {
    /// Creates a slow processor.
    #[must_use]
    pub fn new(name: impl Into<String>, delay: Duration) -> Self {
        Self {
            name: name.into(),
            delay,
        }
    }

    /// Creates a slow processor with a delay in milliseconds.
    #[must_use]
    pub fn with_delay_ms(name: impl Into<String>, ms: u64) -> Self {
        Self::new(name, Duration::from_millis(ms))
    }
}

#[async_trait]
impl Processor for SlowProcessor {
    fn name(&self) -> &str {
        &self.name
    }

    async fn process(
        &self,
        item: StreamItem,
        _ctx: &ProcessorContext,
    ) -> Result<ProcessorOutput, ProcessorError> {
        tokio::time::sleep(self.delay).await;
        Ok(item.into())
    }
}

/// A processor that records every item it sees.
#[derive(Debug)]
pub struct RecordingProcessor {
    name: String,
    items: Mutex<Vec<RecordedItem>>,
}

/// One recorded invocation.
#[derive(Debug, Clone)]
pub struct RecordedItem {
    /// Stage id from the context.
    pub stage_id: String,
    /// The item as received.
    pub item: StreamItem,
}

impl RecordingProcessor {
    /// Creates a recording processor.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            items: Mutex::new(Vec::new()),
        }
    }

    /// All recorded invocations.
    #[must_use]
    pub fn items(&self) -> Vec<RecordedItem> {
        self.items.lock().clone()
    }

    /// Recorded payloads in arrival order.
    #[must_use]
    pub fn payloads(&self) -> Vec<serde_json::Value> {
        self.items.lock().iter().map(|r| r.item.payload.clone()).collect()
    }

    /// Returns the number of invocations.
    #[must_use]
    pub fn count(&self) -> usize {
        self.items.lock().len()
    }

    /// Clears the recording.
    pub fn clear(&self) {
        self.items.lock().clear();
    }
}

#[async_trait]
impl Processor for RecordingProcessor {
    fn name(&self) -> &str {
        &self.name
    }

    async fn process(
        &self,
        item: StreamItem,
        ctx: &ProcessorContext,
    ) -> Result<ProcessorOutput, ProcessorError> {
        self.items.lock().push(RecordedItem {
            stage_id: ctx.stage_id().to_string(),
            item: item.clone(),
        });
        Ok(item.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::TestContext;
    use serde_json::json;

    fn item(payload: serde_json::Value) -> StreamItem {
        StreamItem::new("p1", "test", payload)
    }

    #[tokio::test]
    async fn test_mock_processor() {
        let mock = MockProcessor::new("mock");
        let ctx = TestContext::new().build("s1");

        let out = mock.process(item(json!(1)), &ctx).await.unwrap();
        assert_eq!(out.into_items()[0].payload, json!(1));

        mock.set_payload(json!("fixed"));
        let out = mock.process(item(json!(2)), &ctx).await.unwrap();
        assert_eq!(out.into_items()[0].payload, json!("fixed"));
        assert_eq!(mock.call_count(), 2);
        assert_eq!(mock.recorded_stages(), vec!["s1", "s1"]);

        mock.reset();
        assert_eq!(mock.call_count(), 0);
    }

    #[tokio::test]
    async fn test_failing_processor_recovers() {
        let flaky = FailingProcessor::failing_times("flaky", "nope", 2);
        let ctx = TestContext::new().build("s1");

        assert!(flaky.process(item(json!(1)), &ctx).await.is_err());
        assert!(flaky.process(item(json!(1)), &ctx).await.is_err());
        assert!(flaky.process(item(json!(1)), &ctx).await.is_ok());
        assert_eq!(flaky.attempts(), 3);

        let always = FailingProcessor::new("always", "nope");
        let err = always.process(item(json!(1)), &ctx).await.unwrap_err();
        assert_eq!(err.to_string(), "nope");
    }

    #[tokio::test]
    async fn test_slow_processor() {
        let slow = SlowProcessor::with_delay_ms("slow", 20);
        let ctx = TestContext::new().build("s1");
        let started = std::time::Instant::now();
        slow.process(item(json!(1)), &ctx).await.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(20));
    }

    #[tokio::test]
    async fn test_recording_processor() {
        let rec = RecordingProcessor::new("rec");
        let ctx = TestContext::new().build("s9");
        rec.process(item(json!("a")), &ctx).await.unwrap();
        rec.process(item(json!("b")), &ctx).await.unwrap();

        assert_eq!(rec.count(), 2);
        assert_eq!(rec.payloads(), vec![json!("a"), json!("b")]);
        assert_eq!(rec.items()[0].stage_id, "s9");
        rec.clear();
        assert_eq!(rec.count(), 0);
    }
}
