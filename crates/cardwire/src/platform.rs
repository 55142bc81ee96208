//! The platform: one explicit context object owning every Cardwire service.
//!
//! A [`Platform`] replaces ambient global registries. Consumers receive the
//! services they need from it, and tests build as many independent
//! platforms as they like.

use cardwire_core::{
    ComponentDataRequirement, ConfigError, FieldMap, Notification, NotificationBus,
    RequirementRegistry, RuntimeConfig, SchemaError, WhitelistManager,
};
use cardwire_data::{
    BindingError, BindingRegistry, DataPipeline, PipelineError, PropertyLookup, ReactiveBinding,
    TemplatedProvider,
};
use cardwire_interact::{EventPayload, InteractionEvent, InteractionManager, Navigator};
use cardwire_yaml::{DataBinding, InstanceDefinition, Manifest, ManifestError, WidgetDefinition};
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Errors raised while wiring the platform.
#[derive(Debug, Error)]
pub enum PlatformError {
    /// The runtime configuration is invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The manifest is invalid.
    #[error(transparent)]
    Manifest(#[from] ManifestError),

    /// A requirement failed validation. The fallback was stored instead.
    #[error(transparent)]
    Schema(#[from] SchemaError),

    /// A pipeline could not be built.
    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    /// A binding could not be registered or started.
    #[error(transparent)]
    Binding(#[from] BindingError),

    /// No requirement is registered for the widget type.
    #[error("widget type '{0}' has no registered requirement")]
    UnknownWidget(String),

    /// The instance is not registered.
    #[error("instance '{0}' is not registered")]
    UnknownInstance(String),
}

/// What [`Platform::load_manifest`] wired up.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LoadReport {
    /// Widget types registered.
    pub widgets: usize,
    /// Instances registered.
    pub instances: usize,
    /// Data bindings registered.
    pub bindings: usize,
    /// Non-fatal problems, such as requirements replaced by the fallback.
    pub warnings: Vec<String>,
}

/// One pipeline execution from [`Platform::run_once`].
#[derive(Debug, Clone, PartialEq)]
pub struct RunOutcome {
    /// Binding id.
    pub binding_id: String,
    /// Instance the binding feeds.
    pub instance_id: String,
    /// Delivered fields, or why the pipeline failed.
    pub result: Result<FieldMap, PipelineError>,
}

/// Every Cardwire service, created by [`init`](Self::init) and emptied by
/// [`reset`](Self::reset).
pub struct Platform {
    config: RuntimeConfig,
    requirements: Arc<RequirementRegistry>,
    whitelist: Arc<WhitelistManager>,
    bus: Arc<NotificationBus>,
    bindings: Arc<BindingRegistry>,
    interactions: Arc<InteractionManager>,
}

impl fmt::Debug for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Platform")
            .field("config", &self.config)
            .field("requirements", &self.requirements.len())
            .field("bindings", &self.bindings.len())
            .field("instances", &self.interactions.registered_instances())
            .finish_non_exhaustive()
    }
}

impl Platform {
    /// Validate `config` and create empty services. Jumps are logged only.
    pub fn init(config: RuntimeConfig) -> Result<Self, PlatformError> {
        Self::build(config, None)
    }

    /// Like [`init`](Self::init), with a host navigator for jumps.
    pub fn init_with_navigator(
        config: RuntimeConfig,
        navigator: Arc<dyn Navigator>,
    ) -> Result<Self, PlatformError> {
        Self::build(config, Some(navigator))
    }

    /// Initialise from the manifest's runtime section and load it.
    pub fn from_manifest(manifest: &Manifest) -> Result<Self, PlatformError> {
        let platform = Self::init(manifest.runtime_config())?;
        let report = platform.load_manifest(manifest)?;
        for warning in &report.warnings {
            tracing::warn!(manifest = %manifest.name, %warning, "manifest loaded with warnings");
        }
        Ok(platform)
    }

    fn build(
        config: RuntimeConfig,
        navigator: Option<Arc<dyn Navigator>>,
    ) -> Result<Self, PlatformError> {
        config.validate()?;
        let whitelist = Arc::new(WhitelistManager::new(config.mode, config.audit_limits()));
        let bus = Arc::new(NotificationBus::new());
        let bindings = Arc::new(BindingRegistry::new());
        let mut interactions = InteractionManager::new(
            Arc::clone(&whitelist),
            Arc::clone(&bus),
            Arc::clone(&bindings),
        )
        .with_config(&config);
        if let Some(navigator) = navigator {
            interactions = interactions.with_navigator(navigator);
        }
        tracing::info!(mode = ?config.mode, "platform initialised");
        Ok(Self {
            config,
            requirements: Arc::new(RequirementRegistry::new()),
            whitelist,
            bus,
            bindings,
            interactions: Arc::new(interactions),
        })
    }

    /// Stop every binding and empty every service. The configuration is
    /// kept.
    pub fn reset(&self) {
        self.bindings.clear();
        self.interactions.clear();
        self.requirements.clear();
        self.whitelist.reset();
        self.bus.clear();
        tracing::info!("platform reset");
    }

    /// Runtime configuration.
    #[must_use]
    pub const fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Requirement registry.
    #[must_use]
    pub const fn requirements(&self) -> &Arc<RequirementRegistry> {
        &self.requirements
    }

    /// Whitelist manager.
    #[must_use]
    pub const fn whitelist(&self) -> &Arc<WhitelistManager> {
        &self.whitelist
    }

    /// Notification bus.
    #[must_use]
    pub const fn bus(&self) -> &Arc<NotificationBus> {
        &self.bus
    }

    /// Binding registry.
    #[must_use]
    pub const fn bindings(&self) -> &Arc<BindingRegistry> {
        &self.bindings
    }

    /// Interaction manager.
    #[must_use]
    pub const fn interactions(&self) -> &Arc<InteractionManager> {
        &self.interactions
    }

    /// Current state of an instance.
    #[must_use]
    pub fn state(&self, instance_id: &str) -> Option<FieldMap> {
        self.interactions.state(instance_id)
    }

    /// A property of an instance, with nested paths such as `rows[0].name`.
    #[must_use]
    pub fn property(&self, instance_id: &str, path: &str) -> Option<Value> {
        self.interactions.property(instance_id, path)
    }

    // -------------------------------------------------------------------------
    // Wiring
    // -------------------------------------------------------------------------

    /// Register a widget type's whitelist and requirement.
    ///
    /// A requirement that fails validation is replaced by the fallback and
    /// reported as [`PlatformError::Schema`]; the whitelist stays registered.
    pub fn register_widget(
        &self,
        widget_type: &str,
        definition: &WidgetDefinition,
    ) -> Result<Arc<ComponentDataRequirement>, PlatformError> {
        self.whitelist
            .register_whitelist(widget_type, definition.whitelist.clone());
        let requirement = definition.build_requirement(widget_type)?;
        Ok(self.requirements.register(widget_type, requirement)?)
    }

    /// Register an instance and, if it has one, its data binding.
    pub fn add_instance(
        &self,
        instance: &InstanceDefinition,
    ) -> Result<Option<Arc<ReactiveBinding>>, PlatformError> {
        if !self.requirements.contains(&instance.widget_type) {
            return Err(PlatformError::UnknownWidget(instance.widget_type.clone()));
        }
        self.interactions.register(
            &instance.id,
            &instance.widget_type,
            instance.interactions.clone(),
            instance.state.clone(),
        );
        instance
            .data
            .as_ref()
            .map(|data| self.bind_source(&instance.id, data))
            .transpose()
    }

    /// Build and register the binding `{instance_id}:data` from a manifest
    /// data section. `{{ instance.property }}` templates in the source are
    /// rendered against live state on every fetch.
    pub fn bind_source(
        &self,
        instance_id: &str,
        data: &DataBinding,
    ) -> Result<Arc<ReactiveBinding>, PlatformError> {
        let widget_type = self
            .interactions
            .widget_type(instance_id)
            .ok_or_else(|| PlatformError::UnknownInstance(instance_id.to_string()))?;
        let requirement = self
            .requirements
            .get(&widget_type)
            .ok_or(PlatformError::UnknownWidget(widget_type))?;

        let manager = Arc::downgrade(&self.interactions);
        let lookup: PropertyLookup =
            Arc::new(move |reference: &str| manager.upgrade()?.lookup(reference));
        let provider = TemplatedProvider::new(data.source.clone(), self.config.clone(), lookup);

        let id = format!("{instance_id}:data");
        let mut pipeline = DataPipeline::new(&id, Arc::new(provider), requirement)
            .with_rules(data.mapping.iter().cloned())
            .with_policy(data.validation);
        for step in &data.preprocess {
            pipeline = pipeline.with_preprocess(step)?;
        }

        let mut binding = ReactiveBinding::new(&id, instance_id, pipeline)
            .with_source_config(&data.source)
            .with_skip_unchanged(data.skip_unchanged);
        for trigger in &data.triggers {
            binding = binding.with_trigger(*trigger);
        }
        for dependency in &data.depends_on {
            binding = binding.with_dependency(dependency.clone());
        }
        self.attach(binding)
    }

    /// Route a binding's output into its instance's state and register it.
    ///
    /// Each update merges the fields into state, publishes a `DataUpdate`
    /// and dispatches `dataChange` for every field whose value changed.
    pub fn attach(&self, binding: ReactiveBinding) -> Result<Arc<ReactiveBinding>, PlatformError> {
        let manager = Arc::downgrade(&self.interactions);
        let bus = Arc::downgrade(&self.bus);
        let instance = binding.instance_id().to_string();
        binding.on_update(move |fields| {
            if let (Some(manager), Some(bus)) = (manager.upgrade(), bus.upgrade()) {
                deliver(&manager, &bus, &instance, fields);
            }
        });
        let binding_id = binding.id().to_string();
        binding.on_error(move |err| {
            tracing::warn!(binding = %binding_id, error = %err, "binding update failed");
        });
        Ok(self.bindings.register(binding)?)
    }

    /// Register every widget and instance of `manifest`.
    ///
    /// The manifest is validated first; nothing is registered when it has
    /// problems.
    pub fn load_manifest(&self, manifest: &Manifest) -> Result<LoadReport, PlatformError> {
        manifest.validate()?;
        let mut report = LoadReport::default();
        for (widget_type, definition) in &manifest.widgets {
            match self.register_widget(widget_type, definition) {
                Ok(_) => {}
                Err(PlatformError::Schema(err)) => {
                    report.warnings.push(format!("{widget_type}: {err}"));
                }
                Err(err) => return Err(err),
            }
            report.widgets += 1;
        }
        for instance in &manifest.instances {
            if self.add_instance(instance)?.is_some() {
                report.bindings += 1;
            }
            report.instances += 1;
        }
        tracing::info!(
            manifest = %manifest.name,
            widgets = report.widgets,
            instances = report.instances,
            bindings = report.bindings,
            "manifest loaded"
        );
        Ok(report)
    }

    // -------------------------------------------------------------------------
    // Running
    // -------------------------------------------------------------------------

    /// Start every registered binding. Must be called inside a tokio
    /// runtime. Returns how many bindings were started.
    pub fn start(&self) -> Result<usize, PlatformError> {
        let bindings = self.bindings.all();
        for binding in &bindings {
            binding.start()?;
        }
        Ok(bindings.len())
    }

    /// Stop every binding. Stopped bindings cannot be restarted.
    pub fn stop(&self) {
        for binding in self.bindings.all() {
            binding.stop();
        }
    }

    /// Execute each pipeline once, bypassing triggers, and deliver the
    /// output like a triggered update. `instance` limits the run to one
    /// instance's bindings.
    pub async fn run_once(&self, instance: Option<&str>) -> Vec<RunOutcome> {
        let mut outcomes = Vec::new();
        for binding in self.bindings.all() {
            if instance.is_some_and(|id| id != binding.instance_id()) {
                continue;
            }
            let result = binding.pipeline().execute().await;
            match &result {
                Ok(fields) => deliver(&self.interactions, &self.bus, binding.instance_id(), fields),
                Err(err) => {
                    tracing::warn!(binding = %binding.id(), error = %err, "pipeline run failed");
                }
            }
            outcomes.push(RunOutcome {
                binding_id: binding.id().to_string(),
                instance_id: binding.instance_id().to_string(),
                result,
            });
        }
        outcomes
    }
}

fn deliver(
    manager: &InteractionManager,
    bus: &NotificationBus,
    instance_id: &str,
    fields: &FieldMap,
) {
    let changes = match manager.apply_data(instance_id, fields) {
        Ok(changes) => changes,
        Err(err) => {
            tracing::warn!(instance = %instance_id, error = %err, "data update dropped");
            return;
        }
    };
    bus.publish(&Notification::DataUpdate {
        instance_id: instance_id.to_string(),
        fields: fields.clone(),
    });

    let listens = manager.configs(instance_id).is_some_and(|configs| {
        configs
            .iter()
            .any(|c| c.enabled && c.event == InteractionEvent::DataChange)
    });
    if !listens {
        return;
    }
    for change in changes {
        let payload = EventPayload::change(&change.property, change.old_value, change.new_value);
        manager.trigger_event(instance_id, &InteractionEvent::DataChange, &payload);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cardwire_core::{AccessLogFilter, ChangeSource};
    use cardwire_data::{MappingRule, StaticProvider};
    use cardwire_test::{text_requirement, text_whitelist, BusRecorder, PLANT_BOARD};
    use serde_json::json;

    fn text_widget() -> WidgetDefinition {
        let mut definition = WidgetDefinition::new(text_requirement());
        definition.whitelist = text_whitelist();
        definition
    }

    fn text_binding(id: &str, instance: &str, payload: Value) -> ReactiveBinding {
        let pipeline = DataPipeline::new(
            id,
            Arc::new(StaticProvider::new(payload)),
            Arc::new(text_requirement()),
        )
        .with_rule(MappingRule::new("", "text"));
        ReactiveBinding::new(id, instance, pipeline)
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    #[test]
    fn test_init_rejects_invalid_config() {
        let config = RuntimeConfig {
            audit_log_capacity: 0,
            ..RuntimeConfig::default()
        };
        let err = Platform::init(config).expect_err("invalid");
        assert!(matches!(err, PlatformError::Config(_)));
        assert!(err.to_string().contains("audit_log_capacity"));
    }

    #[test]
    fn test_platforms_are_independent() {
        let a = Platform::init(RuntimeConfig::default()).expect("init");
        let b = Platform::init(RuntimeConfig::default()).expect("init");
        a.register_widget("text", &text_widget()).expect("registers");
        assert!(a.requirements().contains("text"));
        assert!(!b.requirements().contains("text"));
    }

    #[test]
    fn test_reset_empties_every_service() {
        let platform = Platform::init(RuntimeConfig::default()).expect("init");
        let manifest = Manifest::from_yaml(PLANT_BOARD).expect("parses");
        platform.load_manifest(&manifest).expect("loads");
        platform
            .interactions()
            .trigger_event("picker", &InteractionEvent::Click, &EventPayload::new());
        assert!(!platform.whitelist().access_log(&AccessLogFilter::default()).is_empty());

        platform.reset();
        assert!(platform.requirements().is_empty());
        assert!(platform.bindings().is_empty());
        assert!(platform.interactions().registered_instances().is_empty());
        assert!(platform.interactions().history().is_empty());
        assert!(platform.whitelist().whitelist("picker").is_none());
        assert!(platform.whitelist().access_log(&AccessLogFilter::default()).is_empty());

        // reusable after reset
        let report = platform.load_manifest(&manifest).expect("reloads");
        assert_eq!(report.instances, 3);
    }

    // =========================================================================
    // Wiring
    // =========================================================================

    #[test]
    fn test_load_manifest_report() {
        let platform = Platform::init(RuntimeConfig::default()).expect("init");
        let manifest = Manifest::from_yaml(PLANT_BOARD).expect("parses");
        let report = platform.load_manifest(&manifest).expect("loads");
        assert_eq!(
            report,
            LoadReport {
                widgets: 3,
                instances: 3,
                bindings: 1,
                warnings: Vec::new(),
            }
        );
        assert!(platform.bindings().get("card:data").is_some());
        assert_eq!(platform.property("picker", "selection"), Some(json!("a")));
    }

    #[test]
    fn test_invalid_manifest_registers_nothing() {
        let platform = Platform::init(RuntimeConfig::default()).expect("init");
        let broken = PLANT_BOARD.replace("type: banner\n", "type: ghost\n");
        let manifest = Manifest::from_yaml(&broken).expect("parses");
        let err = platform.load_manifest(&manifest).expect_err("invalid");
        assert!(matches!(err, PlatformError::Manifest(ManifestError::Invalid(_))));
        assert!(platform.requirements().is_empty());
        assert!(platform.interactions().registered_instances().is_empty());
    }

    #[test]
    fn test_add_instance_requires_widget() {
        let platform = Platform::init(RuntimeConfig::default()).expect("init");
        let instance = InstanceDefinition {
            id: "t1".into(),
            widget_type: "text".into(),
            state: FieldMap::new(),
            data: None,
            interactions: Vec::new(),
        };
        assert!(matches!(
            platform.add_instance(&instance),
            Err(PlatformError::UnknownWidget(t)) if t == "text"
        ));
        platform.register_widget("text", &text_widget()).expect("registers");
        assert!(platform.add_instance(&instance).expect("adds").is_none());
        assert!(platform.interactions().has_instance("t1"));
    }

    #[test]
    fn test_bind_source_requires_instance() {
        let platform = Platform::init(RuntimeConfig::default()).expect("init");
        let manifest = Manifest::from_yaml(PLANT_BOARD).expect("parses");
        let data = manifest
            .instance("card")
            .and_then(|i| i.data.clone())
            .expect("card has data");
        assert!(matches!(
            platform.bind_source("card", &data),
            Err(PlatformError::UnknownInstance(_))
        ));
    }

    #[test]
    fn test_attach_rejects_duplicate_binding() {
        let platform = Platform::init(RuntimeConfig::default()).expect("init");
        platform
            .attach(text_binding("b", "t1", json!("x")))
            .expect("first");
        assert!(matches!(
            platform.attach(text_binding("b", "t2", json!("y"))),
            Err(PlatformError::Binding(BindingError::Duplicate(_)))
        ));
    }

    // =========================================================================
    // Delivery
    // =========================================================================

    #[tokio::test]
    async fn test_run_once_delivers_into_state() {
        let platform = Platform::init(RuntimeConfig::default()).expect("init");
        platform.register_widget("text", &text_widget()).expect("registers");
        platform
            .interactions()
            .register("t1", "text", Vec::new(), FieldMap::new());
        platform
            .attach(text_binding("t1:data", "t1", json!("hello")))
            .expect("attaches");
        let recorder = BusRecorder::attach(platform.bus());

        let outcomes = platform.run_once(None).await;
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].binding_id, "t1:data");
        assert_eq!(platform.property("t1", "text"), Some(json!("hello")));
        assert_eq!(
            recorder.all(),
            vec![Notification::DataUpdate {
                instance_id: "t1".into(),
                fields: outcomes[0].result.clone().expect("succeeds"),
            }]
        );
    }

    #[tokio::test]
    async fn test_run_once_filters_by_instance() {
        let platform = Platform::init(RuntimeConfig::default()).expect("init");
        platform.register_widget("text", &text_widget()).expect("registers");
        for id in ["t1", "t2"] {
            platform
                .interactions()
                .register(id, "text", Vec::new(), FieldMap::new());
            platform
                .attach(text_binding(&format!("{id}:data"), id, json!(id)))
                .expect("attaches");
        }
        let outcomes = platform.run_once(Some("t2")).await;
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].instance_id, "t2");
        assert_eq!(platform.property("t1", "text"), None);
    }

    #[tokio::test]
    async fn test_run_once_reports_unregistered_instance() {
        let platform = Platform::init(RuntimeConfig::default()).expect("init");
        platform
            .attach(text_binding("orphan", "nobody", json!("x")))
            .expect("attaches");
        let recorder = BusRecorder::attach(platform.bus());
        let outcomes = platform.run_once(None).await;
        // the pipeline itself succeeded; delivery was dropped
        assert!(outcomes[0].result.is_ok());
        assert!(recorder.all().is_empty());
    }

    #[tokio::test]
    async fn test_delivery_after_modify_sees_modified_value() {
        use cardwire_interact::{InteractionConfig, ModifyConfig, UpdateMode};

        let platform = Platform::init(RuntimeConfig::default()).expect("init");
        platform.register_widget("text", &text_widget()).expect("registers");
        let mut log = FieldMap::new();
        log.insert("text".into(), json!(""));
        platform.interactions().register("log", "text", Vec::new(), log);
        platform.interactions().register(
            "t1",
            "text",
            vec![InteractionConfig::new(InteractionEvent::DataChange)
                .watching("text")
                .with_response(
                    ModifyConfig::new("log", "text", json!("+")).with_mode(UpdateMode::Append),
                )],
            FieldMap::new(),
        );
        platform.interactions().register(
            "editor",
            "text",
            vec![InteractionConfig::new(InteractionEvent::Click)
                .with_response(ModifyConfig::new("t1", "text", json!("edited")))],
            FieldMap::new(),
        );
        platform
            .attach(text_binding("t1:data", "t1", json!("ok")))
            .expect("attaches");

        platform.run_once(None).await;
        assert_eq!(platform.property("log", "text"), Some(json!("+")));

        platform
            .interactions()
            .trigger_event("editor", &InteractionEvent::Click, &EventPayload::new());
        assert_eq!(platform.property("t1", "text"), Some(json!("edited")));
        assert_eq!(platform.property("log", "text"), Some(json!("++")));

        // the delivery overwrites the edit, which is a change again
        platform.run_once(None).await;
        assert_eq!(platform.property("t1", "text"), Some(json!("ok")));
        assert_eq!(platform.property("log", "text"), Some(json!("+++")));

        platform.run_once(None).await;
        assert_eq!(platform.property("log", "text"), Some(json!("+++")));
    }

    #[test]
    fn test_host_write_cascades_through_manifest() {
        let platform = Platform::init(RuntimeConfig::default()).expect("init");
        let manifest = Manifest::from_yaml(PLANT_BOARD).expect("parses");
        platform.load_manifest(&manifest).expect("loads");
        let recorder = BusRecorder::attach(platform.bus());

        platform
            .interactions()
            .set_property("card", "status", json!("critical"))
            .expect("writes");
        assert_eq!(platform.property("banner", "text"), Some(json!("ALERT")));
        let changes = recorder.property_changes();
        assert_eq!(changes.len(), 2);
        assert_eq!(changes[1], ("banner".into(), "text".into(), json!("ALERT")));
        assert!(recorder.all().iter().any(|n| matches!(
            n,
            Notification::PropertyChange { source: ChangeSource::Host, .. }
        )));
    }
}
