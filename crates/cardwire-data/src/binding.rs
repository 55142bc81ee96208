//! Reactive bindings.
//!
//! A [`ReactiveBinding`] pairs a [`DataPipeline`] with its triggers and the
//! consumer callbacks of one widget instance.
//!
//! ```text
//! idle --start--> running --stop--> stopped
//!                  |   ^
//!                  +---+ trigger (manual, timer, push)
//! ```
//!
//! All triggers wake a single driver task per binding. A wake-up that
//! arrives while an execution is in flight is stored as one pending re-run,
//! so a fast timer can never stack up concurrent fetches. Every start bumps
//! a generation counter; results and ticks from an older generation are
//! discarded.
//!
//! A refresh of a push-only binding re-maps the last pushed message.

use crate::error::{BindingError, PipelineError};
use crate::pipeline::DataPipeline;
use crate::provider::{ProviderKind, PushSink, Subscription};
use crate::source::DataSourceConfig;
use cardwire_core::{FieldMap, TriggerKind};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::time::{Duration, SystemTime};
use tokio::runtime::Handle;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// Lifecycle state of a binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BindingState {
    /// Created, not started.
    #[default]
    Idle,
    /// Accepting triggers.
    Running,
    /// Stopped for good.
    Stopped,
}

/// An update trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TriggerConfig {
    /// Refresh on [`ReactiveBinding::trigger`].
    Manual,
    /// Fixed-interval polling.
    Timer {
        /// Period in milliseconds.
        #[serde(rename = "interval")]
        interval_ms: u64,
        /// Fire once right after start.
        #[serde(default)]
        immediate: bool,
    },
    /// Provider-initiated pushes.
    Push,
}

impl TriggerConfig {
    /// Timer trigger with the given period.
    #[must_use]
    pub fn timer(interval: Duration, immediate: bool) -> Self {
        Self::Timer {
            interval_ms: u64::try_from(interval.as_millis()).unwrap_or(u64::MAX),
            immediate,
        }
    }

    /// Trigger kind.
    #[must_use]
    pub const fn kind(&self) -> TriggerKind {
        match self {
            Self::Manual => TriggerKind::Manual,
            Self::Timer { .. } => TriggerKind::Timer,
            Self::Push => TriggerKind::Push,
        }
    }
}

/// A property of a widget instance, written `instance.property`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PropertyRef {
    /// Widget instance id.
    pub instance: String,
    /// Property path inside the instance state.
    pub property: String,
}

impl PropertyRef {
    /// Reference `property` of `instance`.
    #[must_use]
    pub fn new(instance: &str, property: &str) -> Self {
        Self {
            instance: instance.to_string(),
            property: property.to_string(),
        }
    }

    /// Parse `instance.property`. The property part may itself be a path.
    #[must_use]
    pub fn parse(text: &str) -> Option<Self> {
        let (instance, property) = text.trim().split_once('.')?;
        if instance.is_empty() || property.is_empty() {
            return None;
        }
        Some(Self::new(instance, property))
    }

    /// Whether a change to `property` of `instance` touches this reference.
    ///
    /// A change to `filter` touches `filter.room` and `filter[0]`.
    #[must_use]
    pub fn is_touched_by(&self, instance: &str, property: &str) -> bool {
        if self.instance != instance {
            return false;
        }
        match self.property.strip_prefix(property) {
            Some("") => true,
            Some(rest) => rest.starts_with('.') || rest.starts_with('['),
            None => false,
        }
    }
}

impl fmt::Display for PropertyRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.instance, self.property)
    }
}

impl TryFrom<String> for PropertyRef {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value).ok_or_else(|| format!("expected 'instance.property', got '{value}'"))
    }
}

impl From<PropertyRef> for String {
    fn from(value: PropertyRef) -> Self {
        value.to_string()
    }
}

/// Binding statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BindingStats {
    /// Trigger firings accepted while running.
    pub triggers_fired: u64,
    /// Updates delivered to `on_update`.
    pub updates: u64,
    /// Identical results not delivered.
    pub skipped: u64,
    /// Failed executions.
    pub errors: u64,
    /// When the last update was delivered.
    pub last_update: Option<SystemTime>,
    /// Message of the last failure.
    pub last_error: Option<String>,
}

type UpdateHandler = Arc<dyn Fn(&FieldMap) + Send + Sync>;
type ErrorHandler = Arc<dyn Fn(&PipelineError) + Send + Sync>;

#[derive(Default)]
struct Handlers {
    update: Option<UpdateHandler>,
    error: Option<ErrorHandler>,
}

#[derive(Default)]
struct Control {
    state: BindingState,
    generation: u64,
    driver: Option<JoinHandle<()>>,
    timers: Vec<JoinHandle<()>>,
    subscription: Option<Subscription>,
}

struct Shared {
    id: String,
    pipeline: DataPipeline,
    skip_unchanged: AtomicBool,
    control: Mutex<Control>,
    wake: Notify,
    pushed: Mutex<Option<Value>>,
    last_pushed: Mutex<Option<Value>>,
    last_fields: Mutex<Option<FieldMap>>,
    handlers: RwLock<Handlers>,
    stats: Mutex<BindingStats>,
}

impl Shared {
    fn is_live(&self, generation: u64) -> bool {
        let control = self.control.lock().expect("binding control lock poisoned");
        control.state == BindingState::Running && control.generation == generation
    }

    fn fire(&self) {
        self.stats.lock().expect("binding stats lock poisoned").triggers_fired += 1;
        self.wake.notify_one();
    }

    async fn run_once(&self, generation: u64) {
        let pushed = self.pushed.lock().expect("binding push lock poisoned").take();
        let result = match pushed {
            Some(raw) => {
                let result = self.pipeline.execute_with(&raw);
                *self.last_pushed.lock().expect("binding push lock poisoned") = Some(raw);
                result
            }
            None if !self.pipeline.provider().supports_fetch() => {
                let cached = self
                    .last_pushed
                    .lock()
                    .expect("binding push lock poisoned")
                    .clone();
                let Some(raw) = cached else {
                    tracing::debug!(binding = %self.id, "nothing pushed yet, refresh skipped");
                    return;
                };
                self.pipeline.execute_with(&raw)
            }
            None => self.pipeline.execute().await,
        };
        if !self.is_live(generation) {
            tracing::debug!(binding = %self.id, "discarding result of a stopped binding");
            return;
        }
        match result {
            Ok(fields) => self.deliver(fields),
            Err(err) => self.fail(&err),
        }
    }

    fn deliver(&self, fields: FieldMap) {
        {
            let mut last = self.last_fields.lock().expect("binding fields lock poisoned");
            if self.skip_unchanged.load(Ordering::Relaxed) && last.as_ref() == Some(&fields) {
                self.stats.lock().expect("binding stats lock poisoned").skipped += 1;
                return;
            }
            *last = Some(fields.clone());
        }
        {
            let mut stats = self.stats.lock().expect("binding stats lock poisoned");
            stats.updates += 1;
            stats.last_update = Some(SystemTime::now());
        }
        let handler = self
            .handlers
            .read()
            .expect("binding handlers lock poisoned")
            .update
            .clone();
        if let Some(handler) = handler {
            if catch_unwind(AssertUnwindSafe(|| handler(&fields))).is_err() {
                tracing::error!(binding = %self.id, "update handler panicked");
            }
        }
    }

    fn fail(&self, err: &PipelineError) {
        tracing::warn!(binding = %self.id, error = %err, "binding update failed");
        {
            let mut stats = self.stats.lock().expect("binding stats lock poisoned");
            stats.errors += 1;
            stats.last_error = Some(err.to_string());
        }
        let handler = self
            .handlers
            .read()
            .expect("binding handlers lock poisoned")
            .error
            .clone();
        if let Some(handler) = handler {
            if catch_unwind(AssertUnwindSafe(|| handler(err))).is_err() {
                tracing::error!(binding = %self.id, "error handler panicked");
            }
        }
    }
}

async fn drive(shared: Arc<Shared>, generation: u64) {
    loop {
        shared.wake.notified().await;
        if !shared.is_live(generation) {
            return;
        }
        shared.run_once(generation).await;
    }
}

async fn tick(shared: Arc<Shared>, generation: u64, period: Duration, immediate: bool) {
    let start = if immediate {
        Instant::now()
    } else {
        Instant::now() + period
    };
    let mut ticker = tokio::time::interval_at(start, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        ticker.tick().await;
        if !shared.is_live(generation) {
            return;
        }
        shared.fire();
    }
}

/// The live pairing of a pipeline, its triggers and a consumer.
///
/// Dropping a binding stops it.
pub struct ReactiveBinding {
    instance_id: String,
    triggers: Vec<TriggerConfig>,
    depends_on: Vec<PropertyRef>,
    text_references: Vec<PropertyRef>,
    shared: Arc<Shared>,
}

impl fmt::Debug for ReactiveBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReactiveBinding")
            .field("id", &self.shared.id)
            .field("instance_id", &self.instance_id)
            .field("state", &self.state())
            .field("triggers", &self.triggers)
            .finish_non_exhaustive()
    }
}

impl ReactiveBinding {
    /// Create an idle binding for `instance_id`.
    #[must_use]
    pub fn new(id: &str, instance_id: &str, pipeline: DataPipeline) -> Self {
        Self {
            instance_id: instance_id.to_string(),
            triggers: Vec::new(),
            depends_on: Vec::new(),
            text_references: Vec::new(),
            shared: Arc::new(Shared {
                id: id.to_string(),
                pipeline,
                skip_unchanged: AtomicBool::new(false),
                control: Mutex::new(Control::default()),
                wake: Notify::new(),
                pushed: Mutex::new(None),
                last_pushed: Mutex::new(None),
                last_fields: Mutex::new(None),
                handlers: RwLock::new(Handlers::default()),
                stats: Mutex::new(BindingStats::default()),
            }),
        }
    }

    /// Add a trigger.
    #[must_use]
    pub fn with_trigger(mut self, trigger: TriggerConfig) -> Self {
        self.triggers.push(trigger);
        self
    }

    /// Declare a property this binding reads.
    #[must_use]
    pub fn with_dependency(mut self, dependency: PropertyRef) -> Self {
        if !self.depends_on.contains(&dependency) {
            self.depends_on.push(dependency);
        }
        self
    }

    /// Record the `{{ instance.property }}` references in `config`.
    #[must_use]
    pub fn with_source_config(mut self, config: &DataSourceConfig) -> Self {
        for reference in config.template_references() {
            match PropertyRef::parse(&reference) {
                Some(r) if !self.text_references.contains(&r) => self.text_references.push(r),
                Some(_) => {}
                None => tracing::debug!(%reference, "template reference is not a widget property"),
            }
        }
        self
    }

    /// Do not deliver a result equal to the previous one.
    #[must_use]
    pub fn with_skip_unchanged(self, skip: bool) -> Self {
        self.shared.skip_unchanged.store(skip, Ordering::Relaxed);
        self
    }

    /// Set the update callback.
    pub fn on_update<F>(&self, handler: F)
    where
        F: Fn(&FieldMap) + Send + Sync + 'static,
    {
        self.shared
            .handlers
            .write()
            .expect("binding handlers lock poisoned")
            .update = Some(Arc::new(handler));
    }

    /// Set the error callback.
    pub fn on_error<F>(&self, handler: F)
    where
        F: Fn(&PipelineError) + Send + Sync + 'static,
    {
        self.shared
            .handlers
            .write()
            .expect("binding handlers lock poisoned")
            .error = Some(Arc::new(handler));
    }

    /// Binding id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.shared.id
    }

    /// Widget instance the binding feeds.
    #[must_use]
    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// Configured triggers.
    #[must_use]
    pub fn triggers(&self) -> &[TriggerConfig] {
        &self.triggers
    }

    /// The pipeline.
    #[must_use]
    pub fn pipeline(&self) -> &DataPipeline {
        &self.shared.pipeline
    }

    /// Kind of the bound provider.
    #[must_use]
    pub fn provider_kind(&self) -> ProviderKind {
        self.shared.pipeline.provider().kind()
    }

    /// Explicitly declared dependencies.
    #[must_use]
    pub fn dependencies(&self) -> &[PropertyRef] {
        &self.depends_on
    }

    /// References found in the source configuration text.
    #[must_use]
    pub fn text_references(&self) -> &[PropertyRef] {
        &self.text_references
    }

    /// Whether a declared dependency covers the property.
    #[must_use]
    pub fn declares(&self, instance: &str, property: &str) -> bool {
        self.depends_on
            .iter()
            .any(|r| r.is_touched_by(instance, property))
    }

    /// Whether the source configuration text references the property.
    #[must_use]
    pub fn references(&self, instance: &str, property: &str) -> bool {
        self.text_references
            .iter()
            .any(|r| r.is_touched_by(instance, property))
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> BindingState {
        self.shared
            .control
            .lock()
            .expect("binding control lock poisoned")
            .state
    }

    /// Statistics snapshot.
    #[must_use]
    pub fn stats(&self) -> BindingStats {
        self.shared
            .stats
            .lock()
            .expect("binding stats lock poisoned")
            .clone()
    }

    /// Last delivered field map.
    #[must_use]
    pub fn last_fields(&self) -> Option<FieldMap> {
        self.shared
            .last_fields
            .lock()
            .expect("binding fields lock poisoned")
            .clone()
    }

    /// Timer tasks still alive.
    #[must_use]
    pub fn active_timers(&self) -> usize {
        self.shared
            .control
            .lock()
            .expect("binding control lock poisoned")
            .timers
            .iter()
            .filter(|t| !t.is_finished())
            .count()
    }

    /// Provider subscriptions still alive.
    #[must_use]
    pub fn active_subscriptions(&self) -> usize {
        self.shared
            .control
            .lock()
            .expect("binding control lock poisoned")
            .subscription
            .as_ref()
            .map_or(0, |s| usize::from(s.is_active()))
    }

    fn timer_period(&self, interval_ms: u64) -> Result<Duration, BindingError> {
        let min = self
            .shared
            .pipeline
            .requirement()
            .update_config
            .min_interval
            .unwrap_or(0);
        let period = interval_ms.max(min);
        if period == 0 {
            return Err(BindingError::UnsupportedTrigger {
                trigger: "timer".into(),
                reason: "interval must be positive".into(),
            });
        }
        if period != interval_ms {
            tracing::debug!(
                binding = %self.shared.id,
                requested_ms = interval_ms,
                period_ms = period,
                "timer interval raised to the widget minimum"
            );
        }
        Ok(Duration::from_millis(period))
    }

    /// Validate the triggers and return the timer schedules.
    fn check_triggers(&self) -> Result<Vec<(Duration, bool)>, BindingError> {
        let supported = &self.shared.pipeline.requirement().update_config.supported_triggers;
        let mut timers = Vec::new();
        for trigger in &self.triggers {
            if !supported.contains(&trigger.kind()) {
                tracing::warn!(
                    binding = %self.shared.id,
                    trigger = ?trigger.kind(),
                    "widget does not list this trigger kind"
                );
            }
            match trigger {
                TriggerConfig::Push if !self.shared.pipeline.provider().supports_push() => {
                    return Err(BindingError::UnsupportedTrigger {
                        trigger: "push".into(),
                        reason: format!("{} provider cannot push", self.provider_kind()),
                    });
                }
                TriggerConfig::Timer {
                    interval_ms,
                    immediate,
                } => timers.push((self.timer_period(*interval_ms)?, *immediate)),
                _ => {}
            }
        }
        Ok(timers)
    }

    /// Start the binding.
    ///
    /// Starting a running binding does nothing. A stopped binding cannot be
    /// restarted.
    pub fn start(&self) -> Result<(), BindingError> {
        let handle = Handle::try_current().map_err(|_| BindingError::NoRuntime)?;
        let generation = {
            let mut control = self.shared.control.lock().expect("binding control lock poisoned");
            match control.state {
                BindingState::Stopped => return Err(BindingError::Stopped(self.shared.id.clone())),
                BindingState::Running => return Ok(()),
                BindingState::Idle => {}
            }
            self.shared.pipeline.validate()?;
            let timers = self.check_triggers()?;

            control.generation += 1;
            let generation = control.generation;
            control.state = BindingState::Running;
            control.driver = Some(handle.spawn(drive(Arc::clone(&self.shared), generation)));
            for (period, immediate) in timers {
                control.timers.push(handle.spawn(tick(
                    Arc::clone(&self.shared),
                    generation,
                    period,
                    immediate,
                )));
            }
            generation
        };

        if self.triggers.contains(&TriggerConfig::Push) {
            // Subscribe without holding the control lock: a provider may push
            // synchronously from inside `subscribe`.
            let subscription = match self.shared.pipeline.provider().subscribe(self.push_sink(generation)) {
                Ok(subscription) => subscription,
                Err(err) => {
                    self.halt(BindingState::Idle);
                    return Err(BindingError::Pipeline(err.into()));
                }
            };
            let mut control = self.shared.control.lock().expect("binding control lock poisoned");
            if control.generation == generation {
                control.subscription = Some(subscription);
            }
        }

        tracing::info!(
            binding = %self.shared.id,
            instance = %self.instance_id,
            triggers = self.triggers.len(),
            "binding started"
        );
        Ok(())
    }

    fn push_sink(&self, generation: u64) -> PushSink {
        let weak: Weak<Shared> = Arc::downgrade(&self.shared);
        Arc::new(move |payload: Value| {
            let Some(shared) = weak.upgrade() else {
                return;
            };
            if shared.is_live(generation) {
                *shared.pushed.lock().expect("binding push lock poisoned") = Some(payload);
                shared.fire();
            }
        })
    }

    /// Request a refresh. Coalesced with any refresh already pending.
    pub fn trigger(&self) -> Result<(), BindingError> {
        if self.state() != BindingState::Running {
            return Err(BindingError::NotRunning(self.shared.id.clone()));
        }
        self.shared.fire();
        Ok(())
    }

    /// Stop the binding and release its timers and subscription.
    ///
    /// Safe to call repeatedly and from inside a callback.
    pub fn stop(&self) {
        if self.state() == BindingState::Stopped {
            return;
        }
        self.halt(BindingState::Stopped);
        tracing::info!(binding = %self.shared.id, "binding stopped");
    }

    fn halt(&self, next: BindingState) {
        let (driver, timers, subscription) = {
            let mut control = self.shared.control.lock().expect("binding control lock poisoned");
            control.state = next;
            control.generation += 1;
            (
                control.driver.take(),
                std::mem::take(&mut control.timers),
                control.subscription.take(),
            )
        };
        if let Some(subscription) = subscription {
            subscription.unsubscribe();
        }
        for timer in timers {
            timer.abort();
        }
        if let Some(driver) = driver {
            driver.abort();
        }
        self.shared.pushed.lock().expect("binding push lock poisoned").take();
    }
}

impl Drop for ReactiveBinding {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProviderError;
    use crate::mapping::MappingRule;
    use crate::provider::DataProvider;
    use crate::providers::StaticProvider;
    use async_trait::async_trait;
    use cardwire_core::{ComponentDataRequirement, DataFieldRequirement, UpdateConfig, ValueType};
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    fn requirement(min_interval: Option<u64>) -> Arc<ComponentDataRequirement> {
        Arc::new(
            ComponentDataRequirement::new("Counter")
                .with_field("n", DataFieldRequirement::value(ValueType::Number, "counter"))
                .with_update_config(UpdateConfig {
                    supported_triggers: vec![TriggerKind::Manual, TriggerKind::Timer, TriggerKind::Push],
                    recommended_interval: None,
                    min_interval,
                }),
        )
    }

    fn counting(delay: Option<Duration>) -> (Arc<AtomicUsize>, Arc<dyn DataProvider>) {
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        let mut provider = StaticProvider::from_fn(move || json!({"n": c.fetch_add(1, Ordering::SeqCst) + 1}));
        if let Some(delay) = delay {
            provider = provider.with_delay(delay);
        }
        (count, Arc::new(provider))
    }

    fn binding(provider: Arc<dyn DataProvider>, min_interval: Option<u64>) -> ReactiveBinding {
        let pipeline = DataPipeline::new("p", provider, requirement(min_interval))
            .with_rule(MappingRule::new("n", "n"));
        ReactiveBinding::new("b", "counter-1", pipeline)
    }

    fn collect(binding: &ReactiveBinding) -> Arc<Mutex<Vec<FieldMap>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = Arc::clone(&seen);
        binding.on_update(move |fields| s.lock().expect("test lock").push(fields.clone()));
        seen
    }

    /// Push-capable double that records its sinks.
    #[derive(Default)]
    struct Pushy {
        sinks: Arc<Mutex<Vec<PushSink>>>,
        active: Arc<AtomicUsize>,
        push_only: bool,
    }

    impl fmt::Debug for Pushy {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("Pushy")
        }
    }

    impl Pushy {
        fn push(&self, value: Value) {
            let sinks = self.sinks.lock().expect("test lock").clone();
            for sink in sinks {
                sink(value.clone());
            }
        }
    }

    #[async_trait]
    impl DataProvider for Pushy {
        fn kind(&self) -> ProviderKind {
            ProviderKind::WebSocket
        }

        async fn fetch(&self) -> Result<Value, ProviderError> {
            Err(ProviderError::Unsupported {
                kind: "websocket",
                operation: "fetch",
            })
        }

        fn supports_fetch(&self) -> bool {
            !self.push_only
        }

        fn supports_push(&self) -> bool {
            true
        }

        fn subscribe(&self, sink: PushSink) -> Result<Subscription, ProviderError> {
            self.sinks.lock().expect("test lock").push(sink);
            self.active.fetch_add(1, Ordering::SeqCst);
            let sinks = Arc::clone(&self.sinks);
            let active = Arc::clone(&self.active);
            Ok(Subscription::new(move || {
                sinks.lock().expect("test lock").clear();
                active.fetch_sub(1, Ordering::SeqCst);
            }))
        }
    }

    // =========================================================================
    // PropertyRef
    // =========================================================================

    #[test]
    fn test_property_ref_parse_and_touch() {
        let r = PropertyRef::parse("filter.room.name").expect("valid");
        assert_eq!(r.instance, "filter");
        assert_eq!(r.property, "room.name");
        assert!(r.is_touched_by("filter", "room"));
        assert!(r.is_touched_by("filter", "room.name"));
        assert!(!r.is_touched_by("filter", "ro"));
        assert!(!r.is_touched_by("other", "room"));
        assert_eq!(PropertyRef::parse("nodot"), None);
        assert_eq!(r.to_string(), "filter.room.name");
    }

    #[test]
    fn test_trigger_config_serde() {
        let t: TriggerConfig =
            serde_json::from_value(json!({"type": "timer", "interval": 5000})).expect("valid");
        assert_eq!(t, TriggerConfig::timer(Duration::from_secs(5), false));
        assert_eq!(t.kind(), TriggerKind::Timer);
        let p: PropertyRef = serde_json::from_value(json!("slider.value")).expect("valid");
        assert_eq!(p, PropertyRef::new("slider", "value"));
    }

    #[test]
    fn test_text_references_from_source() {
        let config: DataSourceConfig = serde_json::from_value(json!({
            "kind": "http",
            "url": "https://api.example.com/{{ picker.device }}",
            "params": {"from": "{{ range.start | default(0) }}"}
        }))
        .expect("valid");
        let (_, provider) = counting(None);
        let b = binding(provider, None).with_source_config(&config);
        assert!(b.references("picker", "device"));
        assert!(b.references("range", "start"));
        assert!(!b.declares("picker", "device"));
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    #[test]
    fn test_start_requires_runtime() {
        let (_, provider) = counting(None);
        assert_eq!(binding(provider, None).start(), Err(BindingError::NoRuntime));
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_trigger_delivers() {
        let (_, provider) = counting(None);
        let b = binding(provider, None).with_trigger(TriggerConfig::Manual);
        let seen = collect(&b);
        assert_eq!(b.trigger(), Err(BindingError::NotRunning("b".into())));

        b.start().expect("starts");
        assert_eq!(b.state(), BindingState::Running);
        b.trigger().expect("running");
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(seen.lock().expect("test lock").len(), 1);
        assert_eq!(b.last_fields().and_then(|f| f.get("n").cloned()), Some(json!(1)));
        assert_eq!(b.stats().updates, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_triggers_coalesce() {
        let (count, provider) = counting(Some(Duration::from_millis(100)));
        let b = binding(provider, None);
        let seen = collect(&b);
        b.start().expect("starts");

        b.trigger().expect("running");
        tokio::time::sleep(Duration::from_millis(10)).await;
        for _ in 0..4 {
            b.trigger().expect("running");
        }
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert_eq!(count.load(Ordering::SeqCst), 2);
        assert_eq!(seen.lock().expect("test lock").len(), 2);
        assert_eq!(b.stats().triggers_fired, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_fires_immediately_and_periodically() {
        let (_, provider) = counting(None);
        let b = binding(provider, None).with_trigger(TriggerConfig::timer(Duration::from_secs(1), true));
        let seen = collect(&b);
        b.start().expect("starts");
        assert_eq!(b.active_timers(), 1);
        tokio::time::sleep(Duration::from_millis(2500)).await;
        assert_eq!(seen.lock().expect("test lock").len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_clamped_to_min_interval() {
        let (count, provider) = counting(None);
        let b = binding(provider, Some(1000)).with_trigger(TriggerConfig::timer(Duration::from_millis(10), false));
        b.start().expect("starts");
        tokio::time::sleep(Duration::from_millis(2500)).await;
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_interval_rejected() {
        let (_, provider) = counting(None);
        let b = binding(provider, None).with_trigger(TriggerConfig::timer(Duration::ZERO, false));
        assert!(matches!(b.start(), Err(BindingError::UnsupportedTrigger { .. })));
        assert_eq!(b.state(), BindingState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_double_stop_releases_everything() {
        let pushy = Arc::new(Pushy::default());
        let active = Arc::clone(&pushy.active);
        let b = binding(pushy, None)
            .with_trigger(TriggerConfig::timer(Duration::from_secs(1), false))
            .with_trigger(TriggerConfig::Push);
        b.start().expect("starts");
        assert_eq!(b.active_timers(), 1);
        assert_eq!(b.active_subscriptions(), 1);

        b.stop();
        b.stop();
        assert_eq!(b.state(), BindingState::Stopped);
        assert_eq!(b.active_timers(), 0);
        assert_eq!(b.active_subscriptions(), 0);
        assert_eq!(active.load(Ordering::SeqCst), 0);
        assert_eq!(b.start(), Err(BindingError::Stopped("b".into())));
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_updates_after_stop() {
        let (_, provider) = counting(Some(Duration::from_millis(100)));
        let b = binding(provider, None);
        let seen = collect(&b);
        b.start().expect("starts");
        b.trigger().expect("running");
        tokio::time::sleep(Duration::from_millis(10)).await;
        b.stop();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(seen.lock().expect("test lock").is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_from_callback() {
        let (count, provider) = counting(None);
        let b = Arc::new(binding(provider, None).with_trigger(TriggerConfig::timer(Duration::from_secs(1), true)));
        let weak = Arc::downgrade(&b);
        b.on_update(move |_| {
            if let Some(b) = weak.upgrade() {
                b.stop();
            }
        });
        b.start().expect("starts");
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(b.state(), BindingState::Stopped);
        assert_eq!(b.active_timers(), 0);
    }

    // =========================================================================
    // Push
    // =========================================================================

    #[tokio::test(start_paused = true)]
    async fn test_push_maps_message() {
        let pushy = Arc::new(Pushy::default());
        let b = binding(Arc::clone(&pushy) as Arc<dyn DataProvider>, None).with_trigger(TriggerConfig::Push);
        let seen = collect(&b);
        b.start().expect("starts");

        pushy.push(json!({"n": 41}));
        pushy.push(json!({"n": 42}));
        tokio::time::sleep(Duration::from_millis(10)).await;

        let seen = seen.lock().expect("test lock");
        assert_eq!(seen.last().and_then(|f| f.get("n")), Some(&json!(42)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_trigger_on_push_only_binding_replays_last_message() {
        let pushy = Arc::new(Pushy {
            push_only: true,
            ..Pushy::default()
        });
        let b = binding(Arc::clone(&pushy) as Arc<dyn DataProvider>, None)
            .with_trigger(TriggerConfig::Push);
        let seen = collect(&b);
        let errors = Arc::new(AtomicUsize::new(0));
        let e = Arc::clone(&errors);
        b.on_error(move |_| {
            e.fetch_add(1, Ordering::SeqCst);
        });
        b.start().expect("starts");

        b.trigger().expect("running");
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(seen.lock().expect("test lock").is_empty());

        pushy.push(json!({"n": 7}));
        tokio::time::sleep(Duration::from_millis(10)).await;
        b.trigger().expect("running");
        tokio::time::sleep(Duration::from_millis(10)).await;

        let seen = seen.lock().expect("test lock");
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[1].get("n"), Some(&json!(7)));
        assert_eq!(errors.load(Ordering::SeqCst), 0);
        assert_eq!(b.stats().errors, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_push_requires_capable_provider() {
        let (_, provider) = counting(None);
        let b = binding(provider, None).with_trigger(TriggerConfig::Push);
        assert!(matches!(b.start(), Err(BindingError::UnsupportedTrigger { .. })));
    }

    // =========================================================================
    // Delivery
    // =========================================================================

    #[tokio::test(start_paused = true)]
    async fn test_skip_unchanged() {
        let provider = Arc::new(StaticProvider::new(json!({"n": 1})));
        let b = binding(provider, None).with_skip_unchanged(true);
        let seen = collect(&b);
        b.start().expect("starts");
        for _ in 0..3 {
            b.trigger().expect("running");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(seen.lock().expect("test lock").len(), 1);
        assert_eq!(b.stats().skipped, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_errors_reach_error_callback() {
        let b = binding(Arc::new(Pushy::default()), None);
        let errors = Arc::new(Mutex::new(Vec::new()));
        let e = Arc::clone(&errors);
        b.on_error(move |err| e.lock().expect("test lock").push(err.to_string()));
        b.start().expect("starts");
        b.trigger().expect("running");
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(errors.lock().expect("test lock").len(), 1);
        let stats = b.stats();
        assert_eq!(stats.errors, 1);
        assert!(stats.last_error.is_some_and(|m| m.contains("fetch")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_handler_keeps_binding_alive() {
        let (count, provider) = counting(None);
        let b = binding(provider, None);
        b.on_update(|_| panic!("consumer bug"));
        b.start().expect("starts");
        b.trigger().expect("running");
        tokio::time::sleep(Duration::from_millis(10)).await;
        b.trigger().expect("running");
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }
}
