//! The interaction manager.
//!
//! Holds the interaction configs and the live state map of every widget
//! instance. Dispatching an event selects the enabled configs for that event
//! (highest priority first), checks `dataChange` gates, and runs each
//! response in order.
//!
//! A successful modify then:
//! 1. publishes a property change on the bus
//! 2. refreshes the bindings that depend on the property
//! 3. dispatches `dataChange` to the target instance, up to the configured
//!    cascade depth
//!
//! Every state mutation goes through one synchronous function holding the
//! state lock, so two writes never interleave.

use crate::config::{
    ActionKind, InteractionConfig, InteractionResponse, JumpConfig, JumpKind, JumpTarget,
    ModifyConfig, UpdateMode,
};
use crate::error::InteractionError;
use crate::event::{EventPayload, InteractionEvent};
use crate::navigator::{LogNavigator, NavigationRequest, Navigator};
use crate::result::{HistoryEntry, InteractionResult, StateChange};
use cardwire_core::path::resolve;
use cardwire_core::value::to_text;
use cardwire_core::{
    AccessContext, AccessLevel, AccessSource, CascadePolicy, ChangeSource, DenialReason, FieldMap,
    Notification, NotificationBus, RuntimeConfig, WhitelistManager,
};
use cardwire_data::BindingRegistry;
use serde_json::Value;
use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, RwLock};
use std::time::SystemTime;

/// Dispatched events kept in the history.
pub const HISTORY_CAPACITY: usize = 100;

#[derive(Debug, Clone)]
struct InstanceRecord {
    widget_type: String,
    configs: Vec<InteractionConfig>,
    initial: FieldMap,
    state: FieldMap,
}

enum Applied {
    Changed { old: Option<Value>, new: Value },
    Unchanged,
}

/// Event → condition → response engine for all widget instances.
pub struct InteractionManager {
    whitelist: Arc<WhitelistManager>,
    bus: Arc<NotificationBus>,
    bindings: Arc<BindingRegistry>,
    navigator: Arc<dyn Navigator>,
    origin: String,
    cascade_policy: CascadePolicy,
    max_cascade_depth: usize,
    access_level: AccessLevel,
    instances: RwLock<BTreeMap<String, InstanceRecord>>,
    history: Mutex<VecDeque<HistoryEntry>>,
}

impl fmt::Debug for InteractionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InteractionManager")
            .field("instances", &self.registered_instances())
            .field("origin", &self.origin)
            .field("cascade_policy", &self.cascade_policy)
            .finish_non_exhaustive()
    }
}

impl InteractionManager {
    /// Create a manager with a logging navigator and default settings.
    #[must_use]
    pub fn new(
        whitelist: Arc<WhitelistManager>,
        bus: Arc<NotificationBus>,
        bindings: Arc<BindingRegistry>,
    ) -> Self {
        let defaults = RuntimeConfig::default();
        Self {
            whitelist,
            bus,
            bindings,
            navigator: Arc::new(LogNavigator),
            origin: defaults.origin,
            cascade_policy: defaults.cascade_policy,
            max_cascade_depth: defaults.max_cascade_depth,
            access_level: AccessLevel::Protected,
            instances: RwLock::new(BTreeMap::new()),
            history: Mutex::new(VecDeque::with_capacity(HISTORY_CAPACITY)),
        }
    }

    /// Use `navigator` for jumps.
    #[must_use]
    pub fn with_navigator(mut self, navigator: Arc<dyn Navigator>) -> Self {
        self.navigator = navigator;
        self
    }

    /// Take origin and cascade settings from `config`.
    #[must_use]
    pub fn with_config(mut self, config: &RuntimeConfig) -> Self {
        self.origin = config.origin.clone();
        self.cascade_policy = config.cascade_policy;
        self.max_cascade_depth = config.max_cascade_depth;
        self
    }

    /// Clearance used for interaction-driven writes.
    #[must_use]
    pub const fn with_access_level(mut self, level: AccessLevel) -> Self {
        self.access_level = level;
        self
    }

    // -------------------------------------------------------------------------
    // Registration
    // -------------------------------------------------------------------------

    /// Register (or re-register) an instance of `widget_type`.
    pub fn register(
        &self,
        instance_id: &str,
        widget_type: &str,
        configs: Vec<InteractionConfig>,
        initial_state: FieldMap,
    ) {
        let count = configs.len();
        self.instances
            .write()
            .expect("interaction state lock poisoned")
            .insert(
                instance_id.to_string(),
                InstanceRecord {
                    widget_type: widget_type.to_string(),
                    configs,
                    initial: initial_state.clone(),
                    state: initial_state,
                },
            );
        tracing::debug!(instance = %instance_id, %widget_type, configs = count, "instance registered");
    }

    /// Remove an instance. Returns whether it was registered.
    pub fn unregister(&self, instance_id: &str) -> bool {
        let removed = self
            .instances
            .write()
            .expect("interaction state lock poisoned")
            .remove(instance_id)
            .is_some();
        if removed {
            tracing::debug!(instance = %instance_id, "instance unregistered");
        }
        removed
    }

    /// Replace an instance's interaction configs.
    pub fn update_configs(
        &self,
        instance_id: &str,
        configs: Vec<InteractionConfig>,
    ) -> Result<(), InteractionError> {
        self.with_record(instance_id, |record| {
            record.configs = configs;
            Ok(())
        })
    }

    /// An instance's interaction configs.
    #[must_use]
    pub fn configs(&self, instance_id: &str) -> Option<Vec<InteractionConfig>> {
        self.instances
            .read()
            .expect("interaction state lock poisoned")
            .get(instance_id)
            .map(|r| r.configs.clone())
    }

    /// Widget type of an instance.
    #[must_use]
    pub fn widget_type(&self, instance_id: &str) -> Option<String> {
        self.instances
            .read()
            .expect("interaction state lock poisoned")
            .get(instance_id)
            .map(|r| r.widget_type.clone())
    }

    /// Registered instance ids.
    #[must_use]
    pub fn registered_instances(&self) -> Vec<String> {
        self.instances
            .read()
            .expect("interaction state lock poisoned")
            .keys()
            .cloned()
            .collect()
    }

    /// Whether an instance is registered.
    #[must_use]
    pub fn has_instance(&self, instance_id: &str) -> bool {
        self.instances
            .read()
            .expect("interaction state lock poisoned")
            .contains_key(instance_id)
    }

    // -------------------------------------------------------------------------
    // State
    // -------------------------------------------------------------------------

    /// Snapshot of an instance's state.
    #[must_use]
    pub fn state(&self, instance_id: &str) -> Option<FieldMap> {
        self.instances
            .read()
            .expect("interaction state lock poisoned")
            .get(instance_id)
            .map(|r| r.state.clone())
    }

    /// Value at `path` inside an instance's state.
    #[must_use]
    pub fn property(&self, instance_id: &str, path: &str) -> Option<Value> {
        let instances = self.instances.read().expect("interaction state lock poisoned");
        let state = &instances.get(instance_id)?.state;
        let split = path.find(['.', '[']).unwrap_or(path.len());
        let (root, rest) = path.split_at(split);
        let value = state.get(root)?;
        resolve(value, rest.strip_prefix('.').unwrap_or(rest)).cloned()
    }

    /// Resolve `instance.path` against live state.
    #[must_use]
    pub fn lookup(&self, reference: &str) -> Option<Value> {
        let (instance, path) = reference.trim().split_once('.')?;
        self.property(instance, path)
    }

    /// Restore an instance's registered initial state.
    pub fn reset_state(&self, instance_id: &str) -> Result<(), InteractionError> {
        self.with_record(instance_id, |record| {
            record.state = record.initial.clone();
            Ok(())
        })?;
        tracing::debug!(instance = %instance_id, "state reset");
        Ok(())
    }

    /// Merge binding output into an instance's state without whitelist
    /// checks. Data fields belong to the widget itself.
    ///
    /// Returns the fields whose value actually changed, read under the same
    /// lock as the write.
    pub fn apply_data(
        &self,
        instance_id: &str,
        fields: &FieldMap,
    ) -> Result<Vec<StateChange>, InteractionError> {
        self.with_record(instance_id, |record| {
            let mut changes = Vec::new();
            for (name, value) in fields {
                let old = record.state.insert(name.clone(), value.clone());
                if old.as_ref() != Some(value) {
                    changes.push(StateChange {
                        property: name.clone(),
                        old_value: old,
                        new_value: value.clone(),
                    });
                }
            }
            Ok(changes)
        })
    }

    /// Host-side write through the whitelist.
    ///
    /// Returns the previous value. The change is propagated like an
    /// interaction-driven modify.
    pub fn set_property(
        &self,
        instance_id: &str,
        property: &str,
        value: Value,
    ) -> Result<Option<Value>, InteractionError> {
        let context = AccessContext::write(AccessSource::System).at_level(AccessLevel::Private);
        match self.update_state(instance_id, property, |_| Some(value), &context)? {
            Applied::Changed { old, new } => {
                self.propagate(instance_id, property, old.clone(), new, ChangeSource::Host, 0);
                Ok(old)
            }
            Applied::Unchanged => Ok(None),
        }
    }

    /// The single state mutation path. `apply` runs under the write lock.
    fn with_record<T, F>(&self, instance_id: &str, apply: F) -> Result<T, InteractionError>
    where
        F: FnOnce(&mut InstanceRecord) -> Result<T, InteractionError>,
    {
        let mut instances = self.instances.write().expect("interaction state lock poisoned");
        let record = instances
            .get_mut(instance_id)
            .ok_or_else(|| InteractionError::UnknownInstance(instance_id.to_string()))?;
        apply(record)
    }

    /// Whitelisted write of one property.
    fn update_state<F>(
        &self,
        instance_id: &str,
        property: &str,
        compute: F,
        context: &AccessContext,
    ) -> Result<Applied, InteractionError>
    where
        F: FnOnce(Option<&Value>) -> Option<Value>,
    {
        self.with_record(instance_id, |record| {
            let Some(proposed) = compute(record.state.get(property)) else {
                return Ok(Applied::Unchanged);
            };
            let access = self.whitelist.expose_property(
                &record.widget_type,
                instance_id,
                property,
                Some(&proposed),
                context,
            );
            if !access.allowed {
                return Err(InteractionError::Denied {
                    instance: instance_id.to_string(),
                    property: property.to_string(),
                    reason: access.reason.unwrap_or(DenialReason::NotWhitelisted),
                });
            }
            let new = access.value.unwrap_or(proposed);
            let old = record.state.insert(property.to_string(), new.clone());
            Ok(Applied::Changed { old, new })
        })
    }

    // -------------------------------------------------------------------------
    // Dispatch
    // -------------------------------------------------------------------------

    /// Dispatch `event` to `instance_id` and return every response outcome,
    /// including those of cascaded `dataChange` dispatches.
    pub fn trigger_event(
        &self,
        instance_id: &str,
        event: &InteractionEvent,
        payload: &EventPayload,
    ) -> Vec<InteractionResult> {
        self.dispatch(instance_id, event, payload, 0)
    }

    fn dispatch(
        &self,
        instance_id: &str,
        event: &InteractionEvent,
        payload: &EventPayload,
        depth: usize,
    ) -> Vec<InteractionResult> {
        let Some(configs) = self.configs(instance_id) else {
            tracing::warn!(instance = %instance_id, %event, "event for unregistered instance");
            return vec![InteractionResult::failed(
                instance_id,
                ActionKind::Dispatch,
                InteractionError::UnknownInstance(instance_id.to_string()).to_string(),
            )];
        };

        let mut selected: Vec<&InteractionConfig> = configs
            .iter()
            .filter(|c| c.enabled && c.event == *event && gate(c, payload))
            .collect();
        selected.sort_by(|a, b| b.priority.cmp(&a.priority));

        let mut results = Vec::new();
        for config in selected {
            for response in &config.responses {
                let outcome =
                    catch_unwind(AssertUnwindSafe(|| self.execute(instance_id, response, depth)));
                let (own, cascaded) = outcome.unwrap_or_else(|_| {
                    tracing::error!(instance = %instance_id, "interaction response panicked");
                    (
                        InteractionResult::failed(
                            instance_id,
                            response.action(),
                            "response handler panicked",
                        ),
                        Vec::new(),
                    )
                });
                self.publish_result(instance_id, &own);
                results.push(own);
                results.extend(cascaded);
            }
        }

        self.record(HistoryEntry {
            instance_id: instance_id.to_string(),
            event: event.clone(),
            timestamp: SystemTime::now(),
            responses: results.len(),
            failures: results.iter().filter(|r| !r.success).count(),
            depth,
        });
        results
    }

    fn execute(
        &self,
        instance_id: &str,
        response: &InteractionResponse,
        depth: usize,
    ) -> (InteractionResult, Vec<InteractionResult>) {
        match response {
            InteractionResponse::Jump { config } => (self.jump(instance_id, config), Vec::new()),
            InteractionResponse::Modify { config } => self.modify(instance_id, config, depth),
        }
    }

    fn modify(
        &self,
        source_id: &str,
        config: &ModifyConfig,
        depth: usize,
    ) -> (InteractionResult, Vec<InteractionResult>) {
        let target = config.target_component_id.as_str();
        let property = config.target_property.as_str();
        let context = AccessContext::write(AccessSource::Interaction)
            .by(source_id)
            .at_level(self.access_level);
        let applied = self.update_state(
            target,
            property,
            |current| combine(config.update_mode, current, &config.update_value),
            &context,
        );

        match applied {
            Ok(Applied::Changed { old, new }) => {
                let result =
                    InteractionResult::succeeded(target, ActionKind::Modify, old.clone(), Some(new.clone()));
                let cascaded =
                    self.propagate(target, property, old, new, ChangeSource::Interaction, depth);
                (result, cascaded)
            }
            Ok(Applied::Unchanged) => {
                tracing::debug!(%target, %property, "nothing to combine with, modify skipped");
                (
                    InteractionResult::succeeded(target, ActionKind::Modify, None, None),
                    Vec::new(),
                )
            }
            Err(err) => {
                tracing::warn!(source = %source_id, error = %err, "modify rejected");
                if matches!(err, InteractionError::Denied { .. }) {
                    self.bus.publish(&Notification::InteractionRejected {
                        instance_id: source_id.to_string(),
                        reason: err.to_string(),
                    });
                }
                (
                    InteractionResult::failed(target, ActionKind::Modify, err.to_string()),
                    Vec::new(),
                )
            }
        }
    }

    fn jump(&self, source_id: &str, config: &JumpConfig) -> InteractionResult {
        let Some(destination) = config.destination() else {
            return InteractionResult::failed(source_id, ActionKind::Jump, "jump has no destination");
        };
        let external = config.jump_type == JumpKind::External;
        let absolute = if external {
            destination.to_string()
        } else {
            join_origin(&self.origin, destination)
        };

        let primary = if config.target == JumpTarget::Blank {
            self.navigator
                .open_new(&absolute, config.window_features.as_deref())
        } else {
            self.navigator.navigate(&NavigationRequest {
                url: destination.to_string(),
                target: config.target,
                external,
                features: config.window_features.clone(),
            })
        };

        let outcome = primary.or_else(|first| {
            tracing::warn!(url = %absolute, error = %first, "navigation failed, opening a new context");
            self.navigator
                .open_new(&absolute, None)
                .map_err(|second| format!("{first}; fallback: {second}"))
        });
        match outcome {
            Ok(()) => InteractionResult::succeeded(
                source_id,
                ActionKind::Jump,
                None,
                Some(Value::String(absolute)),
            ),
            Err(message) => InteractionResult::failed(source_id, ActionKind::Jump, message),
        }
    }

    fn propagate(
        &self,
        instance_id: &str,
        property: &str,
        old: Option<Value>,
        new: Value,
        source: ChangeSource,
        depth: usize,
    ) -> Vec<InteractionResult> {
        self.bus.publish(&Notification::PropertyChange {
            instance_id: instance_id.to_string(),
            property: property.to_string(),
            old_value: old.clone(),
            new_value: new.clone(),
            source,
        });
        self.refresh_bindings(instance_id, property);

        if !self.listens_for_changes(instance_id) {
            return Vec::new();
        }
        if depth >= self.max_cascade_depth {
            tracing::warn!(
                instance = %instance_id,
                %property,
                depth,
                "cascade depth limit reached, dataChange not dispatched"
            );
            return Vec::new();
        }
        self.dispatch(
            instance_id,
            &InteractionEvent::DataChange,
            &EventPayload::change(property, old, new),
            depth + 1,
        )
    }

    /// Trigger every binding affected by a change of `instance.property`.
    /// Returns how many were triggered.
    pub fn refresh_bindings(&self, instance_id: &str, property: &str) -> usize {
        let mut triggered = 0;
        for (binding, why) in self
            .bindings
            .affected_by(instance_id, property, self.cascade_policy)
        {
            match binding.trigger() {
                Ok(()) => {
                    triggered += 1;
                    tracing::debug!(binding = %binding.id(), reason = ?why, "binding refreshed");
                }
                Err(err) => tracing::debug!(binding = %binding.id(), error = %err, "binding not refreshed"),
            }
        }
        triggered
    }

    fn listens_for_changes(&self, instance_id: &str) -> bool {
        self.instances
            .read()
            .expect("interaction state lock poisoned")
            .get(instance_id)
            .is_some_and(|r| {
                r.configs
                    .iter()
                    .any(|c| c.enabled && c.event == InteractionEvent::DataChange)
            })
    }

    fn publish_result(&self, instance_id: &str, result: &InteractionResult) {
        let result = serde_json::to_value(result).unwrap_or(Value::Null);
        self.bus.publish(&Notification::InteractionResult {
            instance_id: instance_id.to_string(),
            result,
        });
    }

    // -------------------------------------------------------------------------
    // History
    // -------------------------------------------------------------------------

    fn record(&self, entry: HistoryEntry) {
        let mut history = self.history.lock().expect("interaction history lock poisoned");
        if history.len() == HISTORY_CAPACITY {
            history.pop_front();
        }
        history.push_back(entry);
    }

    /// Dispatched events, oldest first.
    #[must_use]
    pub fn history(&self) -> Vec<HistoryEntry> {
        self.history
            .lock()
            .expect("interaction history lock poisoned")
            .iter()
            .cloned()
            .collect()
    }

    /// Forget the history.
    pub fn clear_history(&self) {
        self.history
            .lock()
            .expect("interaction history lock poisoned")
            .clear();
    }

    /// Drop every instance and the history.
    pub fn clear(&self) {
        self.instances
            .write()
            .expect("interaction state lock poisoned")
            .clear();
        self.clear_history();
    }
}

/// `dataChange` gates: the watched property and the condition.
fn gate(config: &InteractionConfig, payload: &EventPayload) -> bool {
    if config.event != InteractionEvent::DataChange {
        return true;
    }
    if let Some(watched) = &config.watched_property {
        if payload.property.as_deref() != Some(watched.as_str()) {
            return false;
        }
    }
    let passes = config.condition.as_ref().map_or(true, |c| c.evaluate(payload));
    if !passes {
        tracing::debug!(config = ?config.name, "condition not met, interaction skipped");
    }
    passes
}

/// New value for a modify. `None` means there is nothing to do.
fn combine(mode: UpdateMode, current: Option<&Value>, update: &Value) -> Option<Value> {
    match mode {
        UpdateMode::Replace => Some(update.clone()),
        UpdateMode::Append => {
            current.map(|c| Value::String(format!("{}{}", to_text(c), to_text(update))))
        }
        UpdateMode::Prepend => {
            current.map(|c| Value::String(format!("{}{}", to_text(update), to_text(c))))
        }
    }
}

fn join_origin(origin: &str, path: &str) -> String {
    let origin = origin.trim_end_matches('/');
    if path.starts_with('/') {
        format!("{origin}{path}")
    } else {
        format!("{origin}/{path}")
    }
}
