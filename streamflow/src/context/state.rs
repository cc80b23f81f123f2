//! Per-pipeline state arena.

use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::any::Any;
use std::collections::HashMap;

use super::PipelineFn;

/// A typed value living in the arena, rendered as JSON only on reads.
trait TypedSlot: Any + Send + Sync {
    fn to_json(&self) -> Result<serde_json::Value, serde_json::Error>;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Serialize + Send + Sync + 'static> TypedSlot for T {
    fn to_json(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::to_value(self)
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

enum Slot {
    Json(serde_json::Value),
    Typed(Box<dyn TypedSlot>),
}

impl Slot {
    fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Json(v) => v.clone(),
            Self::Typed(t) => t.as_ref().to_json().unwrap_or(serde_json::Value::Null),
        }
    }
}

/// Key/value state shared by all stages of one pipeline.
///
/// Values set by callers are JSON. Values written through
/// [`StateStore::update_typed`] stay typed in place and are converted to
/// JSON only by reads such as [`StateStore::get`] and
/// [`StateStore::snapshot`], so an update costs the same regardless of how
/// large the value has grown. `update_typed` holds the write lock for the
/// full read-modify-write so concurrent items never interleave inside one
/// update.
///
/// User functions used by the built-in processors live in a separate table
/// because they cannot be represented as JSON.
#[derive(Default)]
pub struct StateStore {
    values: RwLock<HashMap<String, Slot>>,
    functions: RwLock<HashMap<String, PipelineFn>>,
}

impl StateStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Gets a value.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<serde_json::Value> {
        self.values.read().get(key).map(Slot::to_json)
    }

    /// Sets a value, overwriting any previous one.
    pub fn set(&self, key: impl Into<String>, value: serde_json::Value) {
        self.values.write().insert(key.into(), Slot::Json(value));
    }

    /// Removes a value.
    pub fn remove(&self, key: &str) -> Option<serde_json::Value> {
        self.values.write().remove(key).map(|slot| slot.to_json())
    }

    /// Checks if a key exists.
    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.values.read().contains_key(key)
    }

    /// Returns the number of values.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.read().len()
    }

    /// Returns true if no values are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.read().is_empty()
    }

    /// Returns all keys starting with `prefix`, sorted.
    #[must_use]
    pub fn keys_with_prefix(&self, prefix: &str) -> Vec<String> {
        let mut keys: Vec<String> = self
            .values
            .read()
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        keys.sort();
        keys
    }

    /// Deserializes a value.
    ///
    /// # Errors
    ///
    /// Returns an error if the stored value does not match `T`.
    pub fn get_typed<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, serde_json::Error> {
        self.get(key).map(serde_json::from_value).transpose()
    }

    /// Atomically reads, mutates and keeps a typed value.
    ///
    /// A missing key starts from `T::default()`. A JSON value, or a typed
    /// value of another type, is converted into `T` once and kept typed
    /// from then on.
    ///
    /// # Errors
    ///
    /// Returns an error if the stored value does not match `T`.
    pub fn update_typed<T, R, F>(&self, key: &str, f: F) -> Result<R, serde_json::Error>
    where
        T: Default + Serialize + DeserializeOwned + Send + Sync + 'static,
        F: FnOnce(&mut T) -> R,
    {
        let mut values = self.values.write();
        if let Some(Slot::Typed(slot)) = values.get_mut(key) {
            if let Some(current) = slot.as_mut().as_any_mut().downcast_mut::<T>() {
                return Ok(f(current));
            }
        }

        let mut current: T = match values.get(key) {
            Some(slot) => serde_json::from_value(slot.to_json())?,
            None => T::default(),
        };
        let result = f(&mut current);
        values.insert(key.to_string(), Slot::Typed(Box::new(current)));
        Ok(result)
    }

    /// Returns a copy of all values as a JSON object.
    #[must_use]
    pub fn snapshot(&self) -> serde_json::Map<String, serde_json::Value> {
        self.values
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.to_json()))
            .collect()
    }

    /// Registers a user function under `key`.
    pub fn register_function(&self, key: impl Into<String>, function: PipelineFn) {
        self.functions.write().insert(key.into(), function);
    }

    /// Looks up a user function.
    #[must_use]
    pub fn function(&self, key: &str) -> Option<PipelineFn> {
        self.functions.read().get(key).cloned()
    }

    /// Returns the registered function keys, sorted.
    #[must_use]
    pub fn function_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.functions.read().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Drops all values and functions.
    pub fn clear(&self) {
        self.values.write().clear();
        self.functions.write().clear();
    }
}

impl std::fmt::Debug for StateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateStore")
            .field("values", &self.len())
            .field("functions", &self.function_keys())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Default, Serialize, Deserialize, PartialEq)]
    struct Counter {
        n: u64,
    }

    #[test]
    fn test_get_set_remove() {
        let store = StateStore::new();
        assert!(store.is_empty());

        store.set("a", json!(1));
        assert_eq!(store.get("a"), Some(json!(1)));
        assert!(store.contains_key("a"));

        assert_eq!(store.remove("a"), Some(json!(1)));
        assert!(store.get("a").is_none());
    }

    #[test]
    fn test_update_typed_starts_from_default() {
        let store = StateStore::new();
        for _ in 0..3 {
            store
                .update_typed::<Counter, _, _>("c", |c| c.n += 1)
                .unwrap();
        }
        let counter: Counter = store.get_typed("c").unwrap().unwrap();
        assert_eq!(counter, Counter { n: 3 });
    }

    #[test]
    fn test_update_typed_rejects_mismatched_value() {
        let store = StateStore::new();
        store.set("c", json!("not a counter"));
        let result = store.update_typed::<Counter, _, _>("c", |c| c.n);
        assert!(result.is_err());
    }

    #[test]
    fn test_update_typed_keeps_value_in_place() {
        let store = StateStore::new();
        store.set("c", json!({"n": 5}));
        store
            .update_typed::<Counter, _, _>("c", |c| c.n += 1)
            .unwrap();
        for _ in 0..1000 {
            store
                .update_typed::<Counter, _, _>("c", |c| c.n += 1)
                .unwrap();
        }

        assert_eq!(store.get("c"), Some(json!({"n": 1006})));
        assert_eq!(store.snapshot()["c"], json!({"n": 1006}));

        store.set("c", json!({"n": 0}));
        let n = store.update_typed::<Counter, _, _>("c", |c| c.n).unwrap();
        assert_eq!(n, 0);
        assert_eq!(store.remove("c"), Some(json!({"n": 0})));
    }

    #[test]
    fn test_keys_with_prefix_sorted() {
        let store = StateStore::new();
        store.set("agg:b", json!(1));
        store.set("agg:a", json!(1));
        store.set("window:x", json!(1));
        assert_eq!(store.keys_with_prefix("agg:"), vec!["agg:a", "agg:b"]);
    }

    #[test]
    fn test_functions_table() {
        let store = StateStore::new();
        store.register_function("double", PipelineFn::map(|v| Ok(json!(v.as_i64().unwrap_or(0) * 2))));
        assert!(store.function("double").is_some());
        assert_eq!(store.function_keys(), vec!["double"]);

        store.clear();
        assert!(store.function("double").is_none());
    }
}
