//! The unit of data flowing through a pipeline.

use serde::{Deserialize, Serialize};

use crate::utils::{derived_item_id, generate_item_id, now_utc, Timestamp};

/// Routing and retry bookkeeping attached to every item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemMetadata {
    /// Where the item entered the engine (`push`, `emit`, ...).
    pub source_label: String,
    /// The owning pipeline.
    pub pipeline_id: String,
    /// The stage that last produced the item, or the stage to resume at after a requeue.
    pub stage_id: Option<String>,
    /// Shared by an item and everything derived from it.
    pub correlation_id: String,
    /// Number of requeues at the current stage.
    pub retry_count: u32,
    /// Free-form labels; `split` adds routing labels here.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Message of the failure that dead-lettered the item.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl ItemMetadata {
    /// Creates metadata for a fresh item.
    #[must_use]
    pub fn new(pipeline_id: impl Into<String>, source_label: impl Into<String>) -> Self {
        Self {
            source_label: source_label.into(),
            pipeline_id: pipeline_id.into(),
            stage_id: None,
            correlation_id: generate_item_id(),
            retry_count: 0,
            tags: Vec::new(),
            last_error: None,
        }
    }
}

/// One discrete unit of payload data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamItem {
    /// Item id.
    pub id: String,
    /// User payload.
    pub payload: serde_json::Value,
    /// Routing and retry metadata.
    pub metadata: ItemMetadata,
    /// Creation time; windowing and deduplication use this as event time.
    pub created_at: Timestamp,
}

impl StreamItem {
    /// Creates a new item for a pipeline.
    #[must_use]
    pub fn new(
        pipeline_id: impl Into<String>,
        source_label: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            id: generate_item_id(),
            payload,
            metadata: ItemMetadata::new(pipeline_id, source_label),
            created_at: now_utc(),
        }
    }

    /// Sets the creation time.
    #[must_use]
    pub fn with_created_at(mut self, created_at: Timestamp) -> Self {
        self.created_at = created_at;
        self
    }

    /// Returns a copy carrying a new payload but the same id and metadata.
    #[must_use]
    pub fn with_payload(&self, payload: serde_json::Value) -> Self {
        Self {
            id: self.id.clone(),
            payload,
            metadata: self.metadata.clone(),
            created_at: self.created_at,
        }
    }

    /// Returns the `index`-th child of this item, id `"{id}-{index}"`.
    #[must_use]
    pub fn derive_child(&self, index: usize, payload: serde_json::Value) -> Self {
        Self {
            id: derived_item_id(&self.id, index),
            payload,
            metadata: self.metadata.clone(),
            created_at: self.created_at,
        }
    }

    /// Adds a tag unless it is already present.
    pub fn add_tag(&mut self, tag: impl Into<String>) {
        let tag = tag.into();
        if !self.metadata.tags.contains(&tag) {
            self.metadata.tags.push(tag);
        }
    }

    /// Returns true if the item carries `tag`.
    #[must_use]
    pub fn has_tag(&self, tag: &str) -> bool {
        self.metadata.tags.iter().any(|t| t == tag)
    }

    /// Looks up a top-level payload field.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&serde_json::Value> {
        self.payload.get(name)
    }

    /// Event time in milliseconds since the Unix epoch.
    #[must_use]
    pub fn timestamp_ms(&self) -> i64 {
        self.created_at.timestamp_millis()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_new_item_metadata() {
        let item = StreamItem::new("p1", "push", json!({"a": 1}));
        assert_eq!(item.metadata.pipeline_id, "p1");
        assert_eq!(item.metadata.source_label, "push");
        assert_eq!(item.metadata.retry_count, 0);
        assert!(item.metadata.stage_id.is_none());
        assert_eq!(item.field("a"), Some(&json!(1)));
    }

    #[test]
    fn test_derive_child_keeps_correlation() {
        let item = StreamItem::new("p1", "push", json!([1, 2]));
        let child = item.derive_child(1, json!(2));
        assert_eq!(child.id, format!("{}-1", item.id));
        assert_eq!(child.metadata.correlation_id, item.metadata.correlation_id);
    }

    #[test]
    fn test_tags_are_unique() {
        let mut item = StreamItem::new("p1", "push", json!(null));
        item.add_tag("route:high");
        item.add_tag("route:high");
        assert_eq!(item.metadata.tags.len(), 1);
        assert!(item.has_tag("route:high"));
    }

    #[test]
    fn test_with_payload_keeps_id() {
        let item = StreamItem::new("p1", "push", json!(1));
        let next = item.with_payload(json!(2));
        assert_eq!(next.id, item.id);
        assert_eq!(next.payload, json!(2));
    }
}
