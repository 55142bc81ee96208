//! Binding registry and dependency graph.
//!
//! The registry owns every live [`ReactiveBinding`] and answers the question
//! "which bindings must refresh when `instance.property` changes".

use crate::binding::{BindingState, ReactiveBinding};
use crate::error::BindingError;
use cardwire_core::CascadePolicy;
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

/// Registry counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistryStats {
    /// Registered bindings.
    pub total: usize,
    /// Bindings in the running state.
    pub running: usize,
    /// Bindings that were stopped but not yet removed.
    pub stopped: usize,
    /// Bindings that talk to an HTTP-style source.
    pub http: usize,
}

/// Why a binding was selected for refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Affected {
    /// It declares the property in `depends_on`.
    Declared,
    /// Its source configuration references the property.
    Referenced,
    /// Nothing references the property and it is an HTTP binding.
    HttpFallback,
}

/// All live bindings, keyed by id.
#[derive(Debug, Default)]
pub struct BindingRegistry {
    bindings: RwLock<BTreeMap<String, Arc<ReactiveBinding>>>,
}

impl BindingRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a binding. Ids must be unique.
    pub fn register(&self, binding: ReactiveBinding) -> Result<Arc<ReactiveBinding>, BindingError> {
        let mut bindings = self.bindings.write().expect("binding registry lock poisoned");
        if bindings.contains_key(binding.id()) {
            return Err(BindingError::Duplicate(binding.id().to_string()));
        }
        let binding = Arc::new(binding);
        bindings.insert(binding.id().to_string(), Arc::clone(&binding));
        tracing::debug!(binding = %binding.id(), instance = %binding.instance_id(), "binding registered");
        Ok(binding)
    }

    /// Look up a binding.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<Arc<ReactiveBinding>> {
        self.bindings
            .read()
            .expect("binding registry lock poisoned")
            .get(id)
            .cloned()
    }

    /// Stop and remove a binding.
    pub fn remove(&self, id: &str) -> Option<Arc<ReactiveBinding>> {
        let removed = self
            .bindings
            .write()
            .expect("binding registry lock poisoned")
            .remove(id);
        if let Some(binding) = &removed {
            binding.stop();
        }
        removed
    }

    /// Stop and remove every binding of `instance_id`.
    pub fn remove_instance(&self, instance_id: &str) -> usize {
        let removed: Vec<_> = {
            let mut bindings = self.bindings.write().expect("binding registry lock poisoned");
            let ids: Vec<String> = bindings
                .values()
                .filter(|b| b.instance_id() == instance_id)
                .map(|b| b.id().to_string())
                .collect();
            ids.iter().filter_map(|id| bindings.remove(id)).collect()
        };
        for binding in &removed {
            binding.stop();
        }
        removed.len()
    }

    /// Bindings feeding `instance_id`.
    #[must_use]
    pub fn bindings_for_instance(&self, instance_id: &str) -> Vec<Arc<ReactiveBinding>> {
        self.bindings
            .read()
            .expect("binding registry lock poisoned")
            .values()
            .filter(|b| b.instance_id() == instance_id)
            .cloned()
            .collect()
    }

    /// Every binding, ordered by id.
    #[must_use]
    pub fn all(&self) -> Vec<Arc<ReactiveBinding>> {
        self.bindings
            .read()
            .expect("binding registry lock poisoned")
            .values()
            .cloned()
            .collect()
    }

    /// Running bindings.
    #[must_use]
    pub fn active(&self) -> Vec<Arc<ReactiveBinding>> {
        self.bindings
            .read()
            .expect("binding registry lock poisoned")
            .values()
            .filter(|b| b.state() == BindingState::Running)
            .cloned()
            .collect()
    }

    /// Bindings that should refresh after `instance.property` changed.
    ///
    /// Declared dependencies are consulted first, then `{{ }}` references in
    /// the source configuration. When neither matches, the `HttpFallback`
    /// policy selects every HTTP-style binding.
    #[must_use]
    pub fn affected_by(
        &self,
        instance: &str,
        property: &str,
        policy: CascadePolicy,
    ) -> Vec<(Arc<ReactiveBinding>, Affected)> {
        let bindings = self.bindings.read().expect("binding registry lock poisoned");
        let matched: Vec<_> = bindings
            .values()
            .filter_map(|b| {
                if b.declares(instance, property) {
                    Some((Arc::clone(b), Affected::Declared))
                } else if b.references(instance, property) {
                    Some((Arc::clone(b), Affected::Referenced))
                } else {
                    None
                }
            })
            .collect();
        if !matched.is_empty() || policy == CascadePolicy::ExplicitOnly {
            return matched;
        }

        let fallback: Vec<_> = bindings
            .values()
            .filter(|b| b.provider_kind().is_http())
            .map(|b| (Arc::clone(b), Affected::HttpFallback))
            .collect();
        if !fallback.is_empty() {
            tracing::info!(
                instance,
                property,
                count = fallback.len(),
                "no binding references the property, refreshing all HTTP bindings"
            );
        }
        fallback
    }

    /// Drop bindings that are stopped. Returns how many were removed.
    pub fn cleanup(&self) -> usize {
        let mut bindings = self.bindings.write().expect("binding registry lock poisoned");
        let before = bindings.len();
        bindings.retain(|_, b| b.state() != BindingState::Stopped);
        before - bindings.len()
    }

    /// Stop and remove everything.
    pub fn clear(&self) {
        let drained: Vec<_> = {
            let mut bindings = self.bindings.write().expect("binding registry lock poisoned");
            std::mem::take(&mut *bindings).into_values().collect()
        };
        for binding in drained {
            binding.stop();
        }
    }

    /// Number of registered bindings.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bindings.read().expect("binding registry lock poisoned").len()
    }

    /// Whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Registry counts.
    #[must_use]
    pub fn stats(&self) -> RegistryStats {
        let bindings = self.bindings.read().expect("binding registry lock poisoned");
        let mut stats = RegistryStats {
            total: bindings.len(),
            ..RegistryStats::default()
        };
        for binding in bindings.values() {
            match binding.state() {
                BindingState::Running => stats.running += 1,
                BindingState::Stopped => stats.stopped += 1,
                BindingState::Idle => {}
            }
            if binding.provider_kind().is_http() {
                stats.http += 1;
            }
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binding::PropertyRef;
    use crate::mapping::MappingRule;
    use crate::pipeline::DataPipeline;
    use crate::provider::DataProvider;
    use crate::providers::{HttpProvider, StaticProvider};
    use crate::source::DataSourceConfig;
    use cardwire_core::{ComponentDataRequirement, DataFieldRequirement, ValueType};
    use serde_json::json;

    fn requirement() -> Arc<ComponentDataRequirement> {
        Arc::new(
            ComponentDataRequirement::new("Text")
                .with_field("text", DataFieldRequirement::value(ValueType::Any, "text")),
        )
    }

    fn make(id: &str, instance: &str, provider: Arc<dyn DataProvider>) -> ReactiveBinding {
        let pipeline =
            DataPipeline::new(id, provider, requirement()).with_rule(MappingRule::new("", "text"));
        ReactiveBinding::new(id, instance, pipeline)
    }

    fn static_binding(id: &str, instance: &str) -> ReactiveBinding {
        make(id, instance, Arc::new(StaticProvider::new(json!("hi"))))
    }

    fn http_binding(id: &str, instance: &str) -> ReactiveBinding {
        let provider = HttpProvider::new("https://api.example.com/data").expect("valid url");
        make(id, instance, Arc::new(provider))
    }

    #[test]
    fn test_register_rejects_duplicates() {
        let registry = BindingRegistry::new();
        registry.register(static_binding("a", "w1")).expect("first");
        assert_eq!(
            registry.register(static_binding("a", "w2")).map(|_| ()),
            Err(BindingError::Duplicate("a".into()))
        );
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_instance_queries() {
        let registry = BindingRegistry::new();
        registry.register(static_binding("a", "w1")).expect("registers");
        registry.register(static_binding("b", "w1")).expect("registers");
        registry.register(static_binding("c", "w2")).expect("registers");
        assert_eq!(registry.bindings_for_instance("w1").len(), 2);
        assert_eq!(registry.remove_instance("w1"), 2);
        assert_eq!(registry.len(), 1);
        assert!(registry.get("c").is_some());
    }

    #[test]
    fn test_declared_before_referenced() {
        let registry = BindingRegistry::new();
        registry
            .register(static_binding("declared", "chart").with_dependency(PropertyRef::new("picker", "room")))
            .expect("registers");
        let config: DataSourceConfig = serde_json::from_value(json!({
            "kind": "http",
            "url": "https://api.example.com/{{ picker.room }}"
        }))
        .expect("valid");
        registry
            .register(http_binding("templated", "table").with_source_config(&config))
            .expect("registers");
        registry.register(http_binding("unrelated", "gauge")).expect("registers");

        let affected = registry.affected_by("picker", "room", CascadePolicy::HttpFallback);
        let ids: Vec<_> = affected.iter().map(|(b, why)| (b.id().to_string(), *why)).collect();
        assert_eq!(
            ids,
            vec![
                ("declared".to_string(), Affected::Declared),
                ("templated".to_string(), Affected::Referenced),
            ]
        );
    }

    #[test]
    fn test_http_fallback_policy() {
        let registry = BindingRegistry::new();
        registry.register(static_binding("s", "w1")).expect("registers");
        registry.register(http_binding("h", "w2")).expect("registers");

        let fallback = registry.affected_by("button", "label", CascadePolicy::HttpFallback);
        assert_eq!(fallback.len(), 1);
        assert_eq!(fallback[0].0.id(), "h");
        assert_eq!(fallback[0].1, Affected::HttpFallback);

        assert!(registry
            .affected_by("button", "label", CascadePolicy::ExplicitOnly)
            .is_empty());
    }

    #[tokio::test]
    async fn test_remove_stops_and_cleanup() {
        let registry = BindingRegistry::new();
        let a = registry.register(static_binding("a", "w1")).expect("registers");
        let b = registry.register(static_binding("b", "w1")).expect("registers");
        a.start().expect("starts");
        b.start().expect("starts");
        assert_eq!(registry.active().len(), 2);

        let removed = registry.remove("a").expect("present");
        assert_eq!(removed.state(), BindingState::Stopped);

        b.stop();
        let stats = registry.stats();
        assert_eq!(stats.total, 1);
        assert_eq!(stats.stopped, 1);
        assert_eq!(registry.cleanup(), 1);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_clear_stops_everything() {
        let registry = BindingRegistry::new();
        let a = registry.register(http_binding("a", "w1")).expect("registers");
        a.start().expect("starts");
        registry.clear();
        assert!(registry.is_empty());
        assert_eq!(a.state(), BindingState::Stopped);
    }
}
