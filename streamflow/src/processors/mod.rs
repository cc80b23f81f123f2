//! Stage processors and the registry that names them.
//!
//! A processor is the behavior behind a stage: it receives one item plus a
//! [`ProcessorContext`] and returns zero, one or many items. Built-in kinds
//! are registered under fixed names; custom behavior plugs in through the
//! [`Processor`] trait.

mod builtin;
mod registry;

pub use builtin::{
    AggregateProcessor, Aggregation, AggregationOp, DeduplicateProcessor, EnrichProcessor,
    FilterProcessor, FlatMapProcessor, MapProcessor, MergeProcessor, PassthroughProcessor,
    SplitProcessor, WindowKind, WindowProcessor,
};
pub use registry::ProcessorRegistry;

use async_trait::async_trait;
use std::fmt::Debug;

use crate::context::ProcessorContext;
use crate::core::StreamItem;
use crate::errors::ProcessorError;

/// What a processor produced for one input item.
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessorOutput {
    /// Nothing to propagate; the item stops here.
    Filtered,
    /// A single item.
    One(StreamItem),
    /// Zero or more items. An empty list behaves like [`ProcessorOutput::Filtered`].
    Many(Vec<StreamItem>),
}

impl ProcessorOutput {
    /// Returns true if nothing will be propagated.
    #[must_use]
    pub fn is_filtered(&self) -> bool {
        match self {
            Self::Filtered => true,
            Self::One(_) => false,
            Self::Many(items) => items.is_empty(),
        }
    }

    /// Flattens the output into a list of items.
    #[must_use]
    pub fn into_items(self) -> Vec<StreamItem> {
        match self {
            Self::Filtered => Vec::new(),
            Self::One(item) => vec![item],
            Self::Many(items) => items,
        }
    }
}

impl From<StreamItem> for ProcessorOutput {
    fn from(item: StreamItem) -> Self {
        Self::One(item)
    }
}

impl From<Option<StreamItem>> for ProcessorOutput {
    fn from(item: Option<StreamItem>) -> Self {
        item.map_or(Self::Filtered, Self::One)
    }
}

/// Trait for stage processors.
///
/// Implementations must be safe to invoke concurrently for different items;
/// any cross-item state belongs in the pipeline's state store.
#[async_trait]
pub trait Processor: Send + Sync + Debug {
    /// Returns the name the processor is registered under.
    fn name(&self) -> &str;

    /// Processes one item.
    async fn process(
        &self,
        item: StreamItem,
        ctx: &ProcessorContext,
    ) -> Result<ProcessorOutput, ProcessorError>;
}

/// A processor backed by a synchronous closure.
pub struct FnProcessor<F>
where
    F: Fn(StreamItem, &ProcessorContext) -> Result<ProcessorOutput, ProcessorError> + Send + Sync,
{
    name: String,
    func: F,
}

impl<F> FnProcessor<F>
where
    F: Fn(StreamItem, &ProcessorContext) -> Result<ProcessorOutput, ProcessorError> + Send + Sync,
{
    /// Creates a new function-based processor.
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            func,
        }
    }
}

impl<F> Debug for FnProcessor<F>
where
    F: Fn(StreamItem, &ProcessorContext) -> Result<ProcessorOutput, ProcessorError> + Send + Sync,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnProcessor").field("name", &self.name).finish()
    }
}

#[async_trait]
impl<F> Processor for FnProcessor<F>
where
    F: Fn(StreamItem, &ProcessorContext) -> Result<ProcessorOutput, ProcessorError> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn process(
        &self,
        item: StreamItem,
        ctx: &ProcessorContext,
    ) -> Result<ProcessorOutput, ProcessorError> {
        (self.func)(item, ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::StateStore;
    use serde_json::json;
    use std::sync::Arc;

    fn test_ctx() -> ProcessorContext {
        ProcessorContext::new("p1", "s1", serde_json::Map::new(), Arc::new(StateStore::new()))
    }

    #[tokio::test]
    async fn test_fn_processor() {
        let processor = FnProcessor::new("double", |item: StreamItem, _ctx: &ProcessorContext| {
            let n = item.payload.as_i64().unwrap_or(0);
            Ok(item.with_payload(json!(n * 2)).into())
        });
        assert_eq!(processor.name(), "double");

        let item = StreamItem::new("p1", "push", json!(21));
        let output = processor.process(item, &test_ctx()).await.unwrap();
        let items = output.into_items();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].payload, json!(42));
    }

    #[test]
    fn test_output_filtered() {
        assert!(ProcessorOutput::Filtered.is_filtered());
        assert!(ProcessorOutput::Many(Vec::new()).is_filtered());
        assert!(ProcessorOutput::from(None).is_filtered());

        let item = StreamItem::new("p1", "push", json!(1));
        assert!(!ProcessorOutput::from(item).is_filtered());
    }
}
