//! Name to processor table.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use super::builtin::{
    AggregateProcessor, DeduplicateProcessor, EnrichProcessor, FilterProcessor,
    FlatMapProcessor, MapProcessor, MergeProcessor, PassthroughProcessor, SplitProcessor,
    WindowProcessor,
};
use super::Processor;
use crate::errors::{Result, StreamflowError};

/// Registry of processors available to `add_stage`.
///
/// Registering a name that already exists replaces the previous processor;
/// stages already added keep the instance they resolved.
#[derive(Default)]
pub struct ProcessorRegistry {
    processors: RwLock<HashMap<String, Arc<dyn Processor>>>,
}

impl ProcessorRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry with every built-in processor registered.
    #[must_use]
    pub fn with_builtins() -> Self {
        let registry = Self::new();
        registry.register(Arc::new(PassthroughProcessor));
        registry.register(Arc::new(MapProcessor));
        registry.register(Arc::new(FlatMapProcessor));
        registry.register(Arc::new(FilterProcessor));
        registry.register(Arc::new(AggregateProcessor));
        registry.register(Arc::new(WindowProcessor));
        registry.register(Arc::new(DeduplicateProcessor));
        registry.register(Arc::new(EnrichProcessor));
        registry.register(Arc::new(SplitProcessor));
        registry.register(Arc::new(MergeProcessor));
        registry
    }

    /// Registers a processor under its own name.
    pub fn register(&self, processor: Arc<dyn Processor>) {
        let name = processor.name().to_string();
        self.register_as(name, processor);
    }

    /// Registers a processor under an explicit name.
    pub fn register_as(&self, name: impl Into<String>, processor: Arc<dyn Processor>) {
        let name = name.into();
        tracing::debug!(processor = %name, "Registered processor");
        self.processors.write().insert(name, processor);
    }

    /// Looks up a processor.
    ///
    /// # Errors
    ///
    /// Returns [`StreamflowError::ProcessorNotFound`] if `name` is unknown.
    pub fn get(&self, name: &str) -> Result<Arc<dyn Processor>> {
        self.processors
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| StreamflowError::ProcessorNotFound(name.to_string()))
    }

    /// Checks if a processor is registered.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.processors.read().contains_key(name)
    }

    /// Lists registered names, sorted.
    #[must_use]
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.processors.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Returns the number of registered processors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.processors.read().len()
    }

    /// Returns true if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.processors.read().is_empty()
    }
}

impl std::fmt::Debug for ProcessorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessorRegistry")
            .field("processors", &self.list())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processors::{FnProcessor, ProcessorOutput};

    #[test]
    fn test_builtins_registered() {
        let registry = ProcessorRegistry::with_builtins();
        for name in [
            "passthrough", "map", "flatMap", "filter", "aggregate", "window", "deduplicate",
            "enrich", "split", "merge",
        ] {
            assert!(registry.contains(name), "missing {name}");
        }
        assert_eq!(registry.len(), 10);
    }

    #[test]
    fn test_register_and_lookup() {
        let registry = ProcessorRegistry::new();
        assert!(registry.is_empty());

        registry.register(Arc::new(FnProcessor::new("noop", |item, _ctx| {
            Ok(ProcessorOutput::One(item))
        })));
        assert_eq!(registry.get("noop").unwrap().name(), "noop");
        assert_eq!(registry.list(), vec!["noop"]);
    }

    #[test]
    fn test_unknown_processor() {
        let registry = ProcessorRegistry::new();
        let err = registry.get("nope").unwrap_err();
        assert!(matches!(err, StreamflowError::ProcessorNotFound(name) if name == "nope"));
    }
}
