//! Stateless built-ins driven by user functions in pipeline state.

use async_trait::async_trait;

use crate::context::{PipelineFn, ProcessorContext};
use crate::core::StreamItem;
use crate::errors::ProcessorError;
use crate::processors::{Processor, ProcessorOutput};

/// Parameter naming the state key of the user function.
const FUNCTION_PARAM: &str = "function";

fn mismatch(key: &str, expected: &'static str) -> ProcessorError {
    ProcessorError::FunctionMismatch {
        key: key.to_string(),
        expected,
    }
}

fn function_key(ctx: &ProcessorContext, default_key: &str) -> String {
    ctx.param_str(FUNCTION_PARAM)
        .unwrap_or_else(|| default_key.to_string())
}

/// Forwards every item unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughProcessor;

#[async_trait]
impl Processor for PassthroughProcessor {
    fn name(&self) -> &str {
        "passthrough"
    }

    async fn process(
        &self,
        item: StreamItem,
        _ctx: &ProcessorContext,
    ) -> Result<ProcessorOutput, ProcessorError> {
        Ok(ProcessorOutput::One(item))
    }
}

/// Replaces the payload with the result of a map function.
#[derive(Debug, Clone, Copy, Default)]
pub struct MapProcessor;

#[async_trait]
impl Processor for MapProcessor {
    fn name(&self) -> &str {
        "map"
    }

    async fn process(
        &self,
        item: StreamItem,
        ctx: &ProcessorContext,
    ) -> Result<ProcessorOutput, ProcessorError> {
        let PipelineFn::Map(f) = ctx.function(FUNCTION_PARAM, "map")? else {
            return Err(mismatch(&function_key(ctx, "map"), "map"));
        };
        let payload = f(&item.payload)?;
        Ok(ProcessorOutput::One(item.with_payload(payload)))
    }
}

/// Fans one item into many, with ids `"{parent}-{index}"`.
#[derive(Debug, Clone, Copy, Default)]
pub struct FlatMapProcessor;

#[async_trait]
impl Processor for FlatMapProcessor {
    fn name(&self) -> &str {
        "flatMap"
    }

    async fn process(
        &self,
        item: StreamItem,
        ctx: &ProcessorContext,
    ) -> Result<ProcessorOutput, ProcessorError> {
        let PipelineFn::FlatMap(f) = ctx.function(FUNCTION_PARAM, "flatMap")? else {
            return Err(mismatch(&function_key(ctx, "flatMap"), "flatMap"));
        };
        let children = f(&item.payload)?
            .into_iter()
            .enumerate()
            .map(|(index, payload)| item.derive_child(index, payload))
            .collect();
        Ok(ProcessorOutput::Many(children))
    }
}

/// Drops items whose predicate evaluates false.
#[derive(Debug, Clone, Copy, Default)]
pub struct FilterProcessor;

#[async_trait]
impl Processor for FilterProcessor {
    fn name(&self) -> &str {
        "filter"
    }

    async fn process(
        &self,
        item: StreamItem,
        ctx: &ProcessorContext,
    ) -> Result<ProcessorOutput, ProcessorError> {
        let PipelineFn::Predicate(f) = ctx.function(FUNCTION_PARAM, "filter")? else {
            return Err(mismatch(&function_key(ctx, "filter"), "predicate"));
        };
        if f(&item.payload) {
            Ok(ProcessorOutput::One(item))
        } else {
            Ok(ProcessorOutput::Filtered)
        }
    }
}

/// Merges the result of an async lookup into an object payload.
///
/// Lookup fields overwrite payload fields with the same name.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnrichProcessor;

#[async_trait]
impl Processor for EnrichProcessor {
    fn name(&self) -> &str {
        "enrich"
    }

    async fn process(
        &self,
        item: StreamItem,
        ctx: &ProcessorContext,
    ) -> Result<ProcessorOutput, ProcessorError> {
        let PipelineFn::Lookup(lookup) = ctx.function(FUNCTION_PARAM, "enrich")? else {
            return Err(mismatch(&function_key(ctx, "enrich"), "lookup"));
        };
        let serde_json::Value::Object(mut payload) = item.payload.clone() else {
            return Err(ProcessorError::InvalidPayload(
                "enrich requires an object payload".to_string(),
            ));
        };
        match lookup.lookup(&item.payload).await? {
            serde_json::Value::Object(extra) => payload.extend(extra),
            serde_json::Value::Null => {}
            other => {
                return Err(ProcessorError::InvalidPayload(format!(
                    "lookup returned a non-object value: {other}"
                )))
            }
        }
        Ok(ProcessorOutput::One(
            item.with_payload(serde_json::Value::Object(payload)),
        ))
    }
}

/// Tags the item with the label chosen by a classifier.
///
/// Routing on the label is left to downstream stages.
#[derive(Debug, Clone, Copy, Default)]
pub struct SplitProcessor;

#[async_trait]
impl Processor for SplitProcessor {
    fn name(&self) -> &str {
        "split"
    }

    async fn process(
        &self,
        mut item: StreamItem,
        ctx: &ProcessorContext,
    ) -> Result<ProcessorOutput, ProcessorError> {
        let PipelineFn::Classifier(f) = ctx.function(FUNCTION_PARAM, "split")? else {
            return Err(mismatch(&function_key(ctx, "split"), "classifier"));
        };
        if let Some(label) = f(&item.payload) {
            item.add_tag(label);
        }
        Ok(ProcessorOutput::One(item))
    }
}

/// Structural pass-through placed where branches rejoin.
#[derive(Debug, Clone, Copy, Default)]
pub struct MergeProcessor;

#[async_trait]
impl Processor for MergeProcessor {
    fn name(&self) -> &str {
        "merge"
    }

    async fn process(
        &self,
        item: StreamItem,
        _ctx: &ProcessorContext,
    ) -> Result<ProcessorOutput, ProcessorError> {
        Ok(ProcessorOutput::One(item))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::MockEnrichmentLookup;
    use crate::processors::builtin::test_ctx;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn item(payload: serde_json::Value) -> StreamItem {
        StreamItem::new("p1", "push", payload)
    }

    #[tokio::test]
    async fn test_map_uses_registered_function() {
        let ctx = test_ctx(json!({}));
        ctx.state().register_function(
            "map",
            PipelineFn::map(|v| Ok(json!({"doubled": v["n"].as_i64().unwrap_or(0) * 2}))),
        );

        let out = MapProcessor.process(item(json!({"n": 4})), &ctx).await.unwrap();
        assert_eq!(out.into_items()[0].payload, json!({"doubled": 8}));
    }

    #[tokio::test]
    async fn test_map_propagates_user_error() {
        let ctx = test_ctx(json!({"function": "explode"}));
        ctx.state()
            .register_function("explode", PipelineFn::map(|_| Err(anyhow::anyhow!("boom"))));

        let err = MapProcessor.process(item(json!(1)), &ctx).await.unwrap_err();
        assert_eq!(err.to_string(), "boom");
    }

    #[tokio::test]
    async fn test_map_rejects_wrong_function_kind() {
        let ctx = test_ctx(json!({}));
        ctx.state().register_function("map", PipelineFn::predicate(|_| true));

        let err = MapProcessor.process(item(json!(1)), &ctx).await.unwrap_err();
        assert!(matches!(err, ProcessorError::FunctionMismatch { expected: "map", .. }));
    }

    #[tokio::test]
    async fn test_flat_map_derives_child_ids() {
        let ctx = test_ctx(json!({}));
        ctx.state().register_function(
            "flatMap",
            PipelineFn::flat_map(|v| Ok(v.as_array().cloned().unwrap_or_default())),
        );

        let parent = item(json!([1, 2, 3]));
        let parent_id = parent.id.clone();
        let children = FlatMapProcessor.process(parent, &ctx).await.unwrap().into_items();

        assert_eq!(children.len(), 3);
        assert_eq!(children[2].id, format!("{parent_id}-2"));
        assert_eq!(children[2].payload, json!(3));
    }

    #[tokio::test]
    async fn test_filter_is_deterministic() {
        let ctx = test_ctx(json!({}));
        ctx.state().register_function(
            "filter",
            PipelineFn::predicate(|v| v["amount"].as_f64().unwrap_or(0.0) > 1000.0),
        );

        for _ in 0..2 {
            let kept = FilterProcessor.process(item(json!({"amount": 2000})), &ctx).await.unwrap();
            assert!(!kept.is_filtered());
            let dropped = FilterProcessor.process(item(json!({"amount": 500})), &ctx).await.unwrap();
            assert!(dropped.is_filtered());
        }
    }

    #[tokio::test]
    async fn test_filter_without_function_fails() {
        let ctx = test_ctx(json!({}));
        let err = FilterProcessor.process(item(json!(1)), &ctx).await.unwrap_err();
        assert!(matches!(err, ProcessorError::FunctionNotFound(key) if key == "filter"));
    }

    #[tokio::test]
    async fn test_enrich_merges_lookup() {
        let mut lookup = MockEnrichmentLookup::new();
        lookup
            .expect_lookup()
            .times(1)
            .returning(|_| Ok(json!({"tier": "gold", "id": 99})));

        let ctx = test_ctx(json!({}));
        ctx.state().register_function("enrich", PipelineFn::lookup(lookup));

        let out = EnrichProcessor
            .process(item(json!({"id": 1, "name": "acme"})), &ctx)
            .await
            .unwrap();
        assert_eq!(
            out.into_items()[0].payload,
            json!({"id": 99, "name": "acme", "tier": "gold"})
        );
    }

    #[tokio::test]
    async fn test_enrich_rejects_scalar_payload() {
        let mut lookup = MockEnrichmentLookup::new();
        lookup.expect_lookup().never();

        let ctx = test_ctx(json!({}));
        ctx.state().register_function("enrich", PipelineFn::lookup(lookup));

        let err = EnrichProcessor.process(item(json!(5)), &ctx).await.unwrap_err();
        assert!(matches!(err, ProcessorError::InvalidPayload(_)));
    }

    #[tokio::test]
    async fn test_split_tags_item() {
        let ctx = test_ctx(json!({}));
        ctx.state().register_function(
            "split",
            PipelineFn::classifier(|v| {
                (v["priority"].as_u64().unwrap_or(0) > 5).then(|| "high".to_string())
            }),
        );

        let high = SplitProcessor.process(item(json!({"priority": 9})), &ctx).await.unwrap();
        assert!(high.into_items()[0].has_tag("high"));

        let low = SplitProcessor.process(item(json!({"priority": 1})), &ctx).await.unwrap();
        assert!(low.into_items()[0].metadata.tags.is_empty());
    }

    #[tokio::test]
    async fn test_merge_and_passthrough_forward() {
        let ctx = test_ctx(json!({}));
        let original = item(json!({"a": 1}));

        let merged = MergeProcessor.process(original.clone(), &ctx).await.unwrap();
        assert_eq!(merged, ProcessorOutput::One(original.clone()));

        let passed = PassthroughProcessor.process(original.clone(), &ctx).await.unwrap();
        assert_eq!(passed, ProcessorOutput::One(original));
    }
}
