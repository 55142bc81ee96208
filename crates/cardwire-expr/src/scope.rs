//! Script scope.
//!
//! A scope is the complete set of names a script can read. Anything not
//! inserted here does not exist as far as the script is concerned.

use cardwire_core::path::resolve;
use serde_json::Value;
use std::collections::BTreeMap;

/// Named values visible to a script.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScriptScope {
    bindings: BTreeMap<String, Value>,
}

impl ScriptScope {
    /// Create an empty scope.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a binding (builder form).
    #[must_use]
    pub fn with(mut self, name: &str, value: Value) -> Self {
        self.insert(name, value);
        self
    }

    /// Add or replace a binding.
    pub fn insert(&mut self, name: &str, value: Value) {
        self.bindings.insert(name.to_string(), value);
    }

    /// Whether a binding exists.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.bindings.contains_key(name)
    }

    /// Binding names.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.bindings.keys().map(String::as_str)
    }

    /// Resolve a path whose first segment names a binding.
    ///
    /// `readings[0].value` looks up `readings`, then `[0].value` inside it.
    #[must_use]
    pub fn get_path(&self, path: &str) -> Option<&Value> {
        let split = path.find(['.', '[']).unwrap_or(path.len());
        let (root, rest) = path.split_at(split);
        let value = self.bindings.get(root)?;
        let rest = rest.strip_prefix('.').unwrap_or(rest);
        resolve(value, rest)
    }
}
