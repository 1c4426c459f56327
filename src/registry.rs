//! Keyed factories for user-defined types, and a priority-ordered setup-function
//! registry.
//!
//! This replaces the introspection-heavy "reload every module and scan its classes"
//! approach: callers explicitly register a factory under a type name once, at
//! startup, and the scheduler looks it up by the `"type"` field of a declarative
//! config blob.

use std::collections::HashMap;

use serde_json::Value;

use crate::error::{OrchestratorError, Result};

type Factory<T> = Box<dyn Fn(&Value) -> Result<T> + Send + Sync>;

/// Maps a type name (as it appears in a `{"type": "..."}` config blob) to a factory
/// function that builds the corresponding value from the rest of the blob.
pub struct TypeRegistry<T> {
    factories: HashMap<String, Factory<T>>,
}

impl<T> Default for TypeRegistry<T> {
    fn default() -> Self {
        TypeRegistry {
            factories: HashMap::new(),
        }
    }
}

impl<T> TypeRegistry<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, type_name: impl Into<String>, factory: F)
    where
        F: Fn(&Value) -> Result<T> + Send + Sync + 'static,
    {
        self.factories.insert(type_name.into(), Box::new(factory));
    }

    pub fn build(&self, type_name: &str, config: &Value) -> Result<T> {
        let factory = self
            .factories
            .get(type_name)
            .ok_or_else(|| OrchestratorError::UnknownType(type_name.to_string()))?;
        factory(config)
    }

    pub fn is_registered(&self, type_name: &str) -> bool {
        self.factories.contains_key(type_name)
    }
}

/// A priority-ordered collection of setup callbacks, invoked highest-priority-first.
/// Supplants decorator-based registration: callers call `register(priority, f)`
/// explicitly rather than relying on import-time side effects scanning for a marker
/// attribute.
#[derive(Default)]
pub struct SetupRegistry<F> {
    entries: Vec<(i32, F)>,
}

impl<F> SetupRegistry<F> {
    pub fn new() -> Self {
        SetupRegistry { entries: Vec::new() }
    }

    pub fn register(&mut self, priority: i32, setup_fn: F) {
        self.entries.push((priority, setup_fn));
    }

    /// Entries in descending-priority order, ties broken by registration order.
    pub fn ordered(&self) -> impl Iterator<Item = &F> {
        let mut indexed: Vec<(usize, &(i32, F))> = self.entries.iter().enumerate().collect();
        indexed.sort_by(|a, b| b.1 .0.cmp(&a.1 .0).then(a.0.cmp(&b.0)));
        indexed.into_iter().map(|(_, (_, f))| f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn builds_registered_type() {
        let mut reg: TypeRegistry<i64> = TypeRegistry::new();
        reg.register("doubled", |v: &Value| Ok(v.as_i64().unwrap_or(0) * 2));
        assert_eq!(reg.build("doubled", &json!(21)).unwrap(), 42);
    }

    #[test]
    fn unregistered_type_errors() {
        let reg: TypeRegistry<i64> = TypeRegistry::new();
        let err = reg.build("missing", &json!(1)).unwrap_err();
        assert!(matches!(err, OrchestratorError::UnknownType(_)));
    }

    #[test]
    fn setup_registry_orders_by_priority_then_registration() {
        let mut reg: SetupRegistry<&'static str> = SetupRegistry::new();
        reg.register(0, "low");
        reg.register(10, "high");
        reg.register(10, "high-second");
        let order: Vec<&&str> = reg.ordered().collect();
        assert_eq!(order, vec![&"high", &"high-second", &"low"]);
    }
}
