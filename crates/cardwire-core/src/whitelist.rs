//! Property exposure whitelist.
//!
//! The whitelist is the only legal channel for one widget to read or write
//! another widget's state. Every widget type registers the properties it
//! exposes; every registration also carries the global baseline properties
//! (`deviceId`, `metricsList`).
//!
//! An access goes through three gates, in order:
//!
//! 1. the property is whitelisted at a level the request accepts
//! 2. the access context is allowed to see it
//! 3. the value coerces to the declared type (null and mismatches fall back
//!    to the entry's default)
//!
//! Every attempt, allowed or denied, lands in a bounded audit log.

use crate::config::RuntimeMode;
use crate::value::{is_truthy, number, to_number, to_text, FieldMap};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::sync::{Mutex, RwLock};
use std::time::SystemTime;

/// Baseline property exposing the bound device id.
pub const BASELINE_DEVICE_ID: &str = "deviceId";
/// Baseline property exposing the bound metric list.
pub const BASELINE_METRICS_LIST: &str = "metricsList";

/// Visibility level of a property.
///
/// Levels are ordered `Public < Protected < Private`. A property satisfies a
/// request when its own level is less than or equal to the requested one.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum AccessLevel {
    /// Visible to everyone.
    #[default]
    Public = 0,
    /// Visible to protected and private requests.
    Protected = 1,
    /// Visible to private requests only.
    Private = 2,
}

impl AccessLevel {
    /// Check whether a property at this level satisfies a `required` request.
    #[must_use]
    pub fn satisfies(self, required: Self) -> bool {
        self <= required
    }
}

/// Declared type of an exposed property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PropertyType {
    /// Text.
    String,
    /// Number.
    Number,
    /// Boolean.
    Boolean,
    /// JSON object.
    Object,
    /// JSON array.
    Array,
    /// No coercion.
    #[default]
    Any,
}

impl PropertyType {
    /// Coerce `value` to this type.
    ///
    /// Returns `None` when the value cannot be coerced.
    #[must_use]
    pub fn coerce(self, value: &Value) -> Option<Value> {
        match self {
            Self::String => Some(Value::String(to_text(value))),
            Self::Number => to_number(value).map(number),
            Self::Boolean => Some(Value::Bool(is_truthy(value))),
            Self::Object => value.is_object().then(|| value.clone()),
            Self::Array => value.is_array().then(|| value.clone()),
            Self::Any => Some(value.clone()),
        }
    }
}

/// One whitelisted property.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertyWhitelistEntry {
    /// Property name on the widget.
    #[serde(default)]
    pub property_name: String,
    /// Visibility level.
    #[serde(default)]
    pub access_level: AccessLevel,
    /// Declared type.
    #[serde(default, rename = "type")]
    pub property_type: PropertyType,
    /// Writes are denied when set.
    #[serde(default)]
    pub readonly: bool,
    /// Visible to interaction-driven access.
    #[serde(default = "default_true")]
    pub visible_in_interaction: bool,
    /// Visible to debug tooling (development mode only).
    #[serde(default = "default_true")]
    pub visible_in_debug: bool,
    /// Name under which the property is listed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    /// Value substituted for null or mismatched input.
    #[serde(default)]
    pub default_value: Value,
    /// Description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

const fn default_true() -> bool {
    true
}

impl PropertyWhitelistEntry {
    /// Create a public, writable, visible entry.
    #[must_use]
    pub fn new(name: &str, property_type: PropertyType) -> Self {
        Self {
            property_name: name.to_string(),
            access_level: AccessLevel::Public,
            property_type,
            readonly: false,
            visible_in_interaction: true,
            visible_in_debug: true,
            alias: None,
            default_value: Value::Null,
            description: None,
        }
    }

    /// Set the access level.
    #[must_use]
    pub const fn with_level(mut self, level: AccessLevel) -> Self {
        self.access_level = level;
        self
    }

    /// Mark as read-only.
    #[must_use]
    pub const fn readonly(mut self) -> Self {
        self.readonly = true;
        self
    }

    /// Hide from interaction access.
    #[must_use]
    pub const fn hidden_from_interaction(mut self) -> Self {
        self.visible_in_interaction = false;
        self
    }

    /// Hide from debug access.
    #[must_use]
    pub const fn hidden_from_debug(mut self) -> Self {
        self.visible_in_debug = false;
        self
    }

    /// Set an alias.
    #[must_use]
    pub fn with_alias(mut self, alias: &str) -> Self {
        self.alias = Some(alias.to_string());
        self
    }

    /// Set the default value.
    #[must_use]
    pub fn with_default(mut self, value: Value) -> Self {
        self.default_value = value;
        self
    }

    /// Name under which the entry is listed.
    #[must_use]
    pub fn listed_name(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.property_name)
    }

    fn baselines() -> [Self; 2] {
        [
            Self::new(BASELINE_DEVICE_ID, PropertyType::String).with_default(Value::String(
                String::new(),
            )),
            Self::new(BASELINE_METRICS_LIST, PropertyType::Array)
                .with_default(Value::Array(Vec::new())),
        ]
    }
}

/// All whitelisted properties of one widget type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentWhitelist {
    /// Entries by property name.
    pub properties: BTreeMap<String, PropertyWhitelistEntry>,
    /// Disabled whitelists deny everything.
    pub enabled: bool,
}

impl ComponentWhitelist {
    fn with_baselines() -> Self {
        Self {
            properties: PropertyWhitelistEntry::baselines()
                .into_iter()
                .map(|e| (e.property_name.clone(), e))
                .collect(),
            enabled: true,
        }
    }
}

/// Origin of an access attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessSource {
    /// The interaction manager.
    Interaction,
    /// Debug tooling.
    Debug,
    /// The platform itself.
    System,
    /// Anything outside the platform.
    External,
}

impl fmt::Display for AccessSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Interaction => "interaction",
            Self::Debug => "debug",
            Self::System => "system",
            Self::External => "external",
        };
        f.write_str(s)
    }
}

/// Kind of access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessKind {
    /// Read the value.
    Read,
    /// Write the value.
    Write,
    /// Subscribe to changes.
    Watch,
}

/// Who is accessing what, and why.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccessContext {
    /// Identifier of the accessor (usually a widget instance id).
    pub accessor_id: Option<String>,
    /// Kind of access.
    pub access: AccessKind,
    /// Origin.
    pub source: AccessSource,
    /// Level the accessor is cleared for.
    pub level: AccessLevel,
    /// When the access was attempted.
    pub timestamp: SystemTime,
}

impl AccessContext {
    /// A read at public level from `source`.
    #[must_use]
    pub fn read(source: AccessSource) -> Self {
        Self {
            accessor_id: None,
            access: AccessKind::Read,
            source,
            level: AccessLevel::Public,
            timestamp: SystemTime::now(),
        }
    }

    /// A write at public level from `source`.
    #[must_use]
    pub fn write(source: AccessSource) -> Self {
        Self {
            access: AccessKind::Write,
            ..Self::read(source)
        }
    }

    /// Set the accessor id.
    #[must_use]
    pub fn by(mut self, accessor_id: &str) -> Self {
        self.accessor_id = Some(accessor_id.to_string());
        self
    }

    /// Set the clearance level.
    #[must_use]
    pub const fn at_level(mut self, level: AccessLevel) -> Self {
        self.level = level;
        self
    }
}

/// Why an access was denied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DenialReason {
    /// No whitelist is registered for the widget type.
    WhitelistMissing,
    /// The widget type's whitelist is disabled.
    WhitelistDisabled,
    /// The property is not whitelisted.
    NotWhitelisted,
    /// The property's level is above the requested level.
    InsufficientLevel,
    /// The access context may not see the property.
    ContextDenied,
    /// A write targeted a read-only property.
    Readonly,
    /// The value could not be coerced and there is no usable default.
    TypeMismatch,
}

impl fmt::Display for DenialReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::WhitelistMissing => "component whitelist not found",
            Self::WhitelistDisabled => "component whitelist disabled",
            Self::NotWhitelisted => "property not in whitelist",
            Self::InsufficientLevel => "insufficient access level",
            Self::ContextDenied => "insufficient context permission",
            Self::Readonly => "property is read-only",
            Self::TypeMismatch => "value type validation failed",
        };
        f.write_str(s)
    }
}

/// Outcome of an access attempt.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccessResult {
    /// Whether the access is allowed.
    pub allowed: bool,
    /// The coerced value, when allowed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    /// Why the access was denied.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<DenialReason>,
}

impl AccessResult {
    const fn denied(reason: DenialReason) -> Self {
        Self {
            allowed: false,
            value: None,
            reason: Some(reason),
        }
    }

    const fn allowed(value: Value) -> Self {
        Self {
            allowed: true,
            value: Some(value),
            reason: None,
        }
    }
}

/// One audit-log record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccessLogEntry {
    /// Widget type.
    pub widget_type: String,
    /// Widget instance.
    pub instance_id: String,
    /// Property.
    pub property: String,
    /// Context of the attempt.
    pub context: AccessContext,
    /// Whether it was allowed.
    pub allowed: bool,
    /// Denial reason.
    pub reason: Option<DenialReason>,
}

/// Filter for [`WhitelistManager::access_log`].
#[derive(Debug, Clone, Default)]
pub struct AccessLogFilter {
    /// Only this widget instance.
    pub instance_id: Option<String>,
    /// Only this property.
    pub property: Option<String>,
    /// Only allowed (`Some(true)`) or denied (`Some(false)`) attempts.
    pub allowed: Option<bool>,
    /// Only this source.
    pub source: Option<AccessSource>,
}

impl AccessLogFilter {
    fn matches(&self, entry: &AccessLogEntry) -> bool {
        self.instance_id
            .as_ref()
            .map_or(true, |id| *id == entry.instance_id)
            && self.property.as_ref().map_or(true, |p| *p == entry.property)
            && self.allowed.map_or(true, |a| a == entry.allowed)
            && self.source.map_or(true, |s| s == entry.context.source)
    }
}

/// Audit log size limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuditLimits {
    /// Trim once the log grows beyond this many entries.
    pub capacity: usize,
    /// How many of the oldest entries a trim drops.
    pub trim: usize,
}

impl Default for AuditLimits {
    fn default() -> Self {
        Self {
            capacity: 1000,
            trim: 100,
        }
    }
}

/// Registry of whitelists keyed by widget type, with its audit log.
#[derive(Debug)]
pub struct WhitelistManager {
    whitelists: RwLock<BTreeMap<String, ComponentWhitelist>>,
    log: Mutex<VecDeque<AccessLogEntry>>,
    mode: RwLock<RuntimeMode>,
    limits: AuditLimits,
}

impl Default for WhitelistManager {
    fn default() -> Self {
        Self::new(RuntimeMode::default(), AuditLimits::default())
    }
}

impl WhitelistManager {
    /// Create a manager.
    #[must_use]
    pub fn new(mode: RuntimeMode, limits: AuditLimits) -> Self {
        Self {
            whitelists: RwLock::new(BTreeMap::new()),
            log: Mutex::new(VecDeque::new()),
            mode: RwLock::new(mode),
            limits,
        }
    }

    /// Current runtime mode.
    #[must_use]
    pub fn mode(&self) -> RuntimeMode {
        *self.mode.read().expect("whitelist mode lock poisoned")
    }

    /// Switch the runtime mode.
    pub fn set_mode(&self, mode: RuntimeMode) {
        *self.mode.write().expect("whitelist mode lock poisoned") = mode;
    }

    /// Register properties for a widget type.
    ///
    /// Registrations merge: properties from earlier registrations survive,
    /// a later entry with the same name replaces the earlier one, and the
    /// baseline properties are always present.
    pub fn register_whitelist(&self, widget_type: &str, entries: Vec<PropertyWhitelistEntry>) {
        let mut whitelists = self.whitelists.write().expect("whitelist lock poisoned");
        let whitelist = whitelists
            .entry(widget_type.to_string())
            .or_insert_with(ComponentWhitelist::with_baselines);
        for (name, entry) in named_entries(entries) {
            whitelist.properties.insert(name, entry);
        }
        for baseline in PropertyWhitelistEntry::baselines() {
            whitelist
                .properties
                .entry(baseline.property_name.clone())
                .or_insert(baseline);
        }
        tracing::debug!(
            widget_type = %widget_type,
            properties = whitelist.properties.len(),
            "whitelist registered"
        );
    }

    /// Enable or disable a widget type's whitelist.
    pub fn set_enabled(&self, widget_type: &str, enabled: bool) {
        if let Some(w) = self
            .whitelists
            .write()
            .expect("whitelist lock poisoned")
            .get_mut(widget_type)
        {
            w.enabled = enabled;
        }
    }

    /// Get a copy of a widget type's whitelist.
    #[must_use]
    pub fn whitelist(&self, widget_type: &str) -> Option<ComponentWhitelist> {
        self.whitelists
            .read()
            .expect("whitelist lock poisoned")
            .get(widget_type)
            .cloned()
    }

    /// Check if `property` is whitelisted for requests at `required` level.
    #[must_use]
    pub fn is_whitelisted(&self, widget_type: &str, property: &str, required: AccessLevel) -> bool {
        self.whitelists
            .read()
            .expect("whitelist lock poisoned")
            .get(widget_type)
            .filter(|w| w.enabled)
            .and_then(|w| w.properties.get(property))
            .is_some_and(|entry| entry.access_level.satisfies(required))
    }

    /// Gate and coerce an access to `property` of a widget instance.
    ///
    /// `value` is the raw current (or proposed) value; `None` and `null`
    /// both read as "no value", which resolves to the entry's default and is
    /// a type mismatch when the entry has none. The attempt is always logged.
    pub fn expose_property(
        &self,
        widget_type: &str,
        instance_id: &str,
        property: &str,
        value: Option<&Value>,
        context: &AccessContext,
    ) -> AccessResult {
        let result = self.evaluate(widget_type, property, value, context);
        if let Some(reason) = result.reason {
            tracing::debug!(
                widget_type = %widget_type,
                instance = %instance_id,
                property = %property,
                source = %context.source,
                %reason,
                "property access denied"
            );
        }
        self.append_log(AccessLogEntry {
            widget_type: widget_type.to_string(),
            instance_id: instance_id.to_string(),
            property: property.to_string(),
            context: context.clone(),
            allowed: result.allowed,
            reason: result.reason,
        });
        result
    }

    /// Read a property out of an instance's state map.
    pub fn get_exposed_property(
        &self,
        widget_type: &str,
        instance_id: &str,
        property: &str,
        state: &FieldMap,
        context: &AccessContext,
    ) -> AccessResult {
        self.expose_property(widget_type, instance_id, property, state.get(property), context)
    }

    fn evaluate(
        &self,
        widget_type: &str,
        property: &str,
        value: Option<&Value>,
        context: &AccessContext,
    ) -> AccessResult {
        let whitelists = self.whitelists.read().expect("whitelist lock poisoned");
        let Some(whitelist) = whitelists.get(widget_type) else {
            return AccessResult::denied(DenialReason::WhitelistMissing);
        };
        if !whitelist.enabled {
            return AccessResult::denied(DenialReason::WhitelistDisabled);
        }
        let Some(entry) = whitelist.properties.get(property) else {
            return AccessResult::denied(DenialReason::NotWhitelisted);
        };
        if !entry.access_level.satisfies(context.level) {
            return AccessResult::denied(DenialReason::InsufficientLevel);
        }
        if !self.context_allows(entry, context.source) {
            return AccessResult::denied(DenialReason::ContextDenied);
        }
        if context.access == AccessKind::Write && entry.readonly {
            return AccessResult::denied(DenialReason::Readonly);
        }

        let fallback = || Some(entry.default_value.clone()).filter(|d| !d.is_null());
        let coerced = match value {
            None | Some(Value::Null) => fallback(),
            Some(raw) => entry.property_type.coerce(raw).or_else(fallback),
        };
        coerced.map_or(
            AccessResult::denied(DenialReason::TypeMismatch),
            AccessResult::allowed,
        )
    }

    fn context_allows(&self, entry: &PropertyWhitelistEntry, source: AccessSource) -> bool {
        match source {
            AccessSource::Interaction => entry.visible_in_interaction,
            AccessSource::Debug => entry.visible_in_debug && self.mode() != RuntimeMode::Production,
            AccessSource::System => true,
            AccessSource::External => entry.access_level == AccessLevel::Public,
        }
    }

    /// Properties visible at `level` from `source`, keyed by listed name.
    #[must_use]
    pub fn whitelisted_properties(
        &self,
        widget_type: &str,
        level: AccessLevel,
        source: AccessSource,
    ) -> BTreeMap<String, PropertyWhitelistEntry> {
        let whitelists = self.whitelists.read().expect("whitelist lock poisoned");
        let Some(whitelist) = whitelists.get(widget_type).filter(|w| w.enabled) else {
            return BTreeMap::new();
        };
        whitelist
            .properties
            .values()
            .filter(|e| e.access_level.satisfies(level) && self.context_allows(e, source))
            .map(|e| (e.listed_name().to_string(), e.clone()))
            .collect()
    }

    /// Re-apply the baseline properties to every registered whitelist.
    pub fn refresh_all(&self) {
        let mut whitelists = self.whitelists.write().expect("whitelist lock poisoned");
        for whitelist in whitelists.values_mut() {
            for baseline in PropertyWhitelistEntry::baselines() {
                whitelist
                    .properties
                    .entry(baseline.property_name.clone())
                    .or_insert(baseline);
            }
        }
    }

    /// Widget types whose whitelist lacks a baseline property.
    #[must_use]
    pub fn validate_baselines(&self) -> Vec<String> {
        self.whitelists
            .read()
            .expect("whitelist lock poisoned")
            .iter()
            .filter(|(_, w)| {
                !w.properties.contains_key(BASELINE_DEVICE_ID)
                    || !w.properties.contains_key(BASELINE_METRICS_LIST)
            })
            .map(|(name, _)| name.clone())
            .collect()
    }

    fn append_log(&self, entry: AccessLogEntry) {
        let mut log = self.log.lock().expect("audit log lock poisoned");
        log.push_back(entry);
        if log.len() > self.limits.capacity {
            let trim = self.limits.trim.min(log.len());
            log.drain(..trim);
        }
    }

    /// Audit-log entries matching `filter`, oldest first.
    #[must_use]
    pub fn access_log(&self, filter: &AccessLogFilter) -> Vec<AccessLogEntry> {
        self.log
            .lock()
            .expect("audit log lock poisoned")
            .iter()
            .filter(|e| filter.matches(e))
            .cloned()
            .collect()
    }

    /// Number of audit-log entries.
    #[must_use]
    pub fn access_log_len(&self) -> usize {
        self.log.lock().expect("audit log lock poisoned").len()
    }

    /// Empty the audit log.
    pub fn clear_access_log(&self) {
        self.log.lock().expect("audit log lock poisoned").clear();
    }

    /// Drop every whitelist and the audit log.
    pub fn reset(&self) {
        self.whitelists
            .write()
            .expect("whitelist lock poisoned")
            .clear();
        self.clear_access_log();
    }
}

fn named_entries(entries: Vec<PropertyWhitelistEntry>) -> Vec<(String, PropertyWhitelistEntry)> {
    entries
        .into_iter()
        .filter(|e| !e.property_name.is_empty())
        .map(|e| (e.property_name.clone(), e))
        .collect()
}
