//! User functions held in a pipeline's state arena.

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

/// Payload transformation used by `map`.
pub type MapFn = Arc<dyn Fn(&serde_json::Value) -> anyhow::Result<serde_json::Value> + Send + Sync>;

/// One-to-many transformation used by `flatMap`.
pub type FlatMapFn =
    Arc<dyn Fn(&serde_json::Value) -> anyhow::Result<Vec<serde_json::Value>> + Send + Sync>;

/// Predicate used by `filter`.
pub type PredicateFn = Arc<dyn Fn(&serde_json::Value) -> bool + Send + Sync>;

/// Classifier used by `split`; `None` leaves the item unlabelled.
pub type ClassifierFn = Arc<dyn Fn(&serde_json::Value) -> Option<String> + Send + Sync>;

/// Asynchronous lookup used by `enrich`.
///
/// The returned object is merged into the item payload.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EnrichmentLookup: Send + Sync {
    /// Looks up extra fields for a payload.
    async fn lookup(&self, payload: &serde_json::Value) -> anyhow::Result<serde_json::Value>;
}

/// A function registered in a pipeline's state arena.
#[derive(Clone)]
pub enum PipelineFn {
    /// `map` transformation.
    Map(MapFn),
    /// `flatMap` transformation.
    FlatMap(FlatMapFn),
    /// `filter` predicate.
    Predicate(PredicateFn),
    /// `split` classifier.
    Classifier(ClassifierFn),
    /// `enrich` lookup.
    Lookup(Arc<dyn EnrichmentLookup>),
}

impl PipelineFn {
    /// Wraps a map closure.
    pub fn map<F>(f: F) -> Self
    where
        F: Fn(&serde_json::Value) -> anyhow::Result<serde_json::Value> + Send + Sync + 'static,
    {
        Self::Map(Arc::new(f))
    }

    /// Wraps a flatMap closure.
    pub fn flat_map<F>(f: F) -> Self
    where
        F: Fn(&serde_json::Value) -> anyhow::Result<Vec<serde_json::Value>> + Send + Sync + 'static,
    {
        Self::FlatMap(Arc::new(f))
    }

    /// Wraps a predicate closure.
    pub fn predicate<F>(f: F) -> Self
    where
        F: Fn(&serde_json::Value) -> bool + Send + Sync + 'static,
    {
        Self::Predicate(Arc::new(f))
    }

    /// Wraps a classifier closure.
    pub fn classifier<F>(f: F) -> Self
    where
        F: Fn(&serde_json::Value) -> Option<String> + Send + Sync + 'static,
    {
        Self::Classifier(Arc::new(f))
    }

    /// Wraps a lookup implementation.
    pub fn lookup(lookup: impl EnrichmentLookup + 'static) -> Self {
        Self::Lookup(Arc::new(lookup))
    }

    /// Short name of the function kind.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Map(_) => "map",
            Self::FlatMap(_) => "flatMap",
            Self::Predicate(_) => "predicate",
            Self::Classifier(_) => "classifier",
            Self::Lookup(_) => "lookup",
        }
    }
}

impl fmt::Debug for PipelineFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PipelineFn").field(&self.kind()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_kinds() {
        assert_eq!(PipelineFn::map(|v| Ok(v.clone())).kind(), "map");
        assert_eq!(PipelineFn::flat_map(|v| Ok(vec![v.clone()])).kind(), "flatMap");
        assert_eq!(PipelineFn::predicate(|_| true).kind(), "predicate");
        assert_eq!(PipelineFn::classifier(|_| None).kind(), "classifier");
    }

    #[tokio::test]
    async fn test_mock_lookup() {
        let mut lookup = MockEnrichmentLookup::new();
        lookup
            .expect_lookup()
            .returning(|_| Ok(json!({"region": "eu"})));

        let f = PipelineFn::lookup(lookup);
        let PipelineFn::Lookup(inner) = f else {
            panic!("expected lookup");
        };
        let result = inner.lookup(&json!({"id": 1})).await.unwrap();
        assert_eq!(result, json!({"region": "eu"}));
    }
}
