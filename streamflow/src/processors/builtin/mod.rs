//! Built-in processor kinds.

mod aggregate;
mod dedupe;
mod transform;
mod window;

pub use aggregate::{AggregateProcessor, Aggregation, AggregationOp};
pub use dedupe::DeduplicateProcessor;
pub use transform::{
    EnrichProcessor, FilterProcessor, FlatMapProcessor, MapProcessor, MergeProcessor,
    PassthroughProcessor, SplitProcessor,
};
pub use window::{WindowKind, WindowProcessor};

/// Renders a payload field as a state-key fragment.
fn key_fragment(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
pub(crate) fn test_ctx(params: serde_json::Value) -> crate::context::ProcessorContext {
    use std::sync::Arc;
    let params = params.as_object().cloned().unwrap_or_default();
    crate::context::ProcessorContext::new(
        "p1",
        "s1",
        params,
        Arc::new(crate::context::StateStore::new()),
    )
}
