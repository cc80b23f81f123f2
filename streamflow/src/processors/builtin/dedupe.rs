//! Time-bounded duplicate suppression.

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::collections::HashMap;

use super::key_fragment;
use crate::context::ProcessorContext;
use crate::core::StreamItem;
use crate::errors::ProcessorError;
use crate::processors::{Processor, ProcessorOutput};

/// Default time a key is remembered.
pub const DEFAULT_DEDUPE_WINDOW_MS: u64 = 60_000;

/// Hashes a whole payload into a stable dedupe key.
fn payload_hash(payload: &serde_json::Value) -> String {
    let json = serde_json::to_string(payload).unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(json.as_bytes());
    let result = hasher.finalize();
    format!("sha:{}", hex::encode(&result[..16]))
}

/// Passes the first item per key and drops repeats seen within `windowMs`.
///
/// The key is the `keyField` payload field when configured and present,
/// otherwise a hash of the whole payload. Keys expire `windowMs` after they
/// were first seen; expired keys are purged before every membership check.
/// State lives under `dedupe:{stage}`.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeduplicateProcessor;

#[async_trait]
impl Processor for DeduplicateProcessor {
    fn name(&self) -> &str {
        "deduplicate"
    }

    async fn process(
        &self,
        item: StreamItem,
        ctx: &ProcessorContext,
    ) -> Result<ProcessorOutput, ProcessorError> {
        let window_ms = ctx.param_u64("windowMs")?.unwrap_or(DEFAULT_DEDUPE_WINDOW_MS);
        let window_ms = i64::try_from(window_ms).unwrap_or(i64::MAX);
        let key = ctx
            .param_str("keyField")
            .and_then(|field| item.field(&field).map(key_fragment))
            .unwrap_or_else(|| payload_hash(&item.payload));
        let now = item.timestamp_ms();

        let state_key = format!("dedupe:{}", ctx.stage_id());
        let fresh = ctx
            .state()
            .update_typed::<HashMap<String, i64>, _, _>(&state_key, |seen| {
                seen.retain(|_, first_seen| now.saturating_sub(*first_seen) < window_ms);
                if seen.contains_key(&key) {
                    false
                } else {
                    seen.insert(key.clone(), now);
                    true
                }
            })?;

        if fresh {
            Ok(ProcessorOutput::One(item))
        } else {
            tracing::trace!(stage_id = %ctx.stage_id(), key = %key, "Duplicate suppressed");
            Ok(ProcessorOutput::Filtered)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processors::builtin::test_ctx;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    fn at(ms: i64, payload: serde_json::Value) -> StreamItem {
        let ts = Utc.timestamp_millis_opt(ms).single().unwrap();
        StreamItem::new("p1", "push", payload).with_created_at(ts)
    }

    async fn passes(ctx: &ProcessorContext, ms: i64, payload: serde_json::Value) -> bool {
        !DeduplicateProcessor
            .process(at(ms, payload), ctx)
            .await
            .unwrap()
            .is_filtered()
    }

    #[tokio::test]
    async fn test_duplicate_within_window_is_dropped() {
        let ctx = test_ctx(json!({"keyField": "id", "windowMs": 1000}));

        assert!(passes(&ctx, 0, json!({"id": "a", "v": 1})).await);
        assert!(!passes(&ctx, 500, json!({"id": "a", "v": 2})).await);
        assert!(passes(&ctx, 500, json!({"id": "b"})).await);
    }

    #[tokio::test]
    async fn test_key_expires_after_window() {
        let ctx = test_ctx(json!({"keyField": "id", "windowMs": 1000}));

        assert!(passes(&ctx, 0, json!({"id": 7})).await);
        assert!(!passes(&ctx, 999, json!({"id": 7})).await);
        assert!(passes(&ctx, 1000, json!({"id": 7})).await);
    }

    #[tokio::test]
    async fn test_expired_keys_are_purged() {
        let ctx = test_ctx(json!({"keyField": "id", "windowMs": 10}));
        passes(&ctx, 0, json!({"id": 1})).await;
        passes(&ctx, 0, json!({"id": 2})).await;
        passes(&ctx, 100, json!({"id": 3})).await;

        let seen: HashMap<String, i64> = ctx.state().get_typed("dedupe:s1").unwrap().unwrap();
        assert_eq!(seen.len(), 1);
        assert!(seen.contains_key("3"));
    }

    #[tokio::test]
    async fn test_whole_payload_hash_without_key_field() {
        let ctx = test_ctx(json!({}));
        assert!(passes(&ctx, 0, json!({"a": 1})).await);
        assert!(!passes(&ctx, 1, json!({"a": 1})).await);
        assert!(passes(&ctx, 2, json!({"a": 2})).await);
    }

    #[test]
    fn test_payload_hash_is_stable() {
        let a = payload_hash(&json!({"x": [1, 2]}));
        assert_eq!(a, payload_hash(&json!({"x": [1, 2]})));
        assert!(a.starts_with("sha:"));
        assert_eq!(a.len(), 4 + 32);
    }
}
