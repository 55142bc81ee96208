//! Declarative data source configuration.
//!
//! [`DataSourceConfig`] is the serializable description of a provider. String
//! fields may embed `{{ instance.property }}` templates; a
//! [`TemplatedProvider`] renders them against live widget state on every
//! fetch, so a binding re-executed after a property change sees the new
//! value.

use crate::error::ProviderError;
use crate::provider::{DataProvider, ProviderKind, PushSink, Subscription};
use crate::providers::{
    HttpMethod, HttpProvider, ReconnectConfig, ReqwestTransport, ScriptProvider, StaticProvider,
    TelemetryProvider, TelemetryQuery, WebSocketProvider,
};
use async_trait::async_trait;
use cardwire_core::value::to_text;
use cardwire_core::{FieldMap, RuntimeConfig};
use cardwire_expr::{template_dependencies, ExecutionLimits, Script, ScriptScope};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Serializable provider description, tagged by `kind`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum DataSourceConfig {
    /// Literal payload.
    Static {
        /// Payload.
        data: Value,
        /// Artificial delay.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        delay_ms: Option<u64>,
    },
    /// Sandboxed script.
    Script {
        /// Script text.
        script: String,
        /// Names the script may read.
        #[serde(default, skip_serializing_if = "FieldMap::is_empty")]
        context: FieldMap,
        /// Timeout override.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timeout_ms: Option<u64>,
    },
    /// HTTP request.
    Http {
        /// Request URL.
        url: String,
        /// Method.
        #[serde(default)]
        method: HttpMethod,
        /// Headers.
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        headers: BTreeMap<String, String>,
        /// Query parameters (GET only).
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        params: BTreeMap<String, Value>,
        /// Body (non-GET only).
        #[serde(default, skip_serializing_if = "Option::is_none")]
        body: Option<Value>,
        /// Timeout override.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timeout_ms: Option<u64>,
        /// Extra attempts after a failure.
        #[serde(default)]
        retries: u32,
        /// Delay between attempts.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        retry_delay_ms: Option<u64>,
    },
    /// Device telemetry.
    Telemetry {
        /// API base URL.
        base_url: String,
        /// Access token.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        token: Option<String>,
        /// What to read.
        query: TelemetryQuery,
    },
    /// WebSocket stream.
    WebSocket {
        /// Stream URL.
        url: String,
        /// Topic to subscribe to after connecting.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        topic: Option<String>,
        /// Heartbeat period.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        heartbeat_ms: Option<u64>,
        /// Heartbeat payload.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        heartbeat_message: Option<String>,
        /// Reconnection policy.
        #[serde(default)]
        reconnect: ReconnectConfig,
    },
}

impl DataSourceConfig {
    /// Provider kind.
    #[must_use]
    pub const fn kind(&self) -> ProviderKind {
        match self {
            Self::Static { .. } => ProviderKind::Static,
            Self::Script { .. } => ProviderKind::Script,
            Self::Http { .. } => ProviderKind::Http,
            Self::Telemetry { .. } => ProviderKind::Telemetry,
            Self::WebSocket { .. } => ProviderKind::WebSocket,
        }
    }

    /// `{{ ... }}` template paths used anywhere in the configuration.
    #[must_use]
    pub fn template_references(&self) -> Vec<String> {
        let Ok(mut value) = serde_json::to_value(self) else {
            return Vec::new();
        };
        if let Value::Object(fields) = &mut value {
            // script text is not a template
            fields.remove("script");
        }
        template_dependencies(&value.to_string())
    }

    /// Build the provider, using `runtime` for unset timeouts.
    pub fn build(&self, runtime: &RuntimeConfig) -> Result<Arc<dyn DataProvider>, ProviderError> {
        let provider: Arc<dyn DataProvider> = match self {
            Self::Static { data, delay_ms } => {
                let mut provider = StaticProvider::new(data.clone());
                if let Some(ms) = delay_ms {
                    provider = provider.with_delay(Duration::from_millis(*ms));
                }
                Arc::new(provider)
            }
            Self::Script {
                script,
                context,
                timeout_ms,
            } => {
                let scope = context
                    .iter()
                    .fold(ScriptScope::new(), |scope, (k, v)| scope.with(k, v.clone()));
                let timeout = timeout_ms.map_or(runtime.script_timeout(), Duration::from_millis);
                Arc::new(
                    ScriptProvider::new(script)?
                        .with_scope(scope)
                        .with_timeout(timeout),
                )
            }
            Self::Http {
                url,
                method,
                headers,
                params,
                body,
                timeout_ms,
                retries,
                retry_delay_ms,
            } => {
                let mut provider = HttpProvider::new(url)?
                    .with_method(*method)
                    .with_timeout(timeout_ms.map_or(runtime.http_timeout(), Duration::from_millis))
                    .with_retries(
                        *retries,
                        Duration::from_millis(retry_delay_ms.unwrap_or(1000)),
                    );
                for (name, value) in headers {
                    provider = provider.with_header(name, value);
                }
                for (name, value) in params {
                    provider = provider.with_param(name, value.clone());
                }
                if let Some(body) = body {
                    provider = provider.with_body(body.clone());
                }
                Arc::new(provider)
            }
            Self::Telemetry {
                base_url,
                token,
                query,
            } => {
                let mut transport =
                    ReqwestTransport::new(base_url)?.with_timeout(runtime.http_timeout());
                if let Some(token) = token {
                    transport = transport.with_token(token);
                }
                Arc::new(TelemetryProvider::new(query.clone(), Arc::new(transport)))
            }
            Self::WebSocket {
                url,
                topic,
                heartbeat_ms,
                heartbeat_message,
                reconnect,
            } => {
                let mut provider = WebSocketProvider::new(url).with_reconnect(reconnect.clone());
                if let Some(topic) = topic {
                    provider = provider.with_topic(topic);
                }
                if heartbeat_ms.is_some() || heartbeat_message.is_some() {
                    let period = heartbeat_ms.map_or(
                        crate::providers::DEFAULT_HEARTBEAT,
                        Duration::from_millis,
                    );
                    provider = provider
                        .with_heartbeat(period, heartbeat_message.as_deref().unwrap_or("ping"));
                }
                Arc::new(provider)
            }
        };
        Ok(provider)
    }

    /// Substitute every `{{ path | transforms }}` template using `lookup`.
    ///
    /// A string that is exactly one template takes the looked-up value with
    /// its type; templates embedded in longer strings are stringified.
    /// Unresolvable templates render as `null` or the empty string.
    pub fn render(&self, lookup: &dyn Fn(&str) -> Option<Value>) -> Result<Self, ProviderError> {
        let mut value =
            serde_json::to_value(self).map_err(|e| ProviderError::Decode(e.to_string()))?;
        if let Value::Object(fields) = &mut value {
            for (key, field) in fields.iter_mut() {
                // script text uses the same braces for its own syntax
                if key == "script" && self.kind() == ProviderKind::Script {
                    continue;
                }
                *field = render_value(field.take(), lookup);
            }
        }
        serde_json::from_value(value).map_err(|e| {
            ProviderError::InvalidConfig(format!("rendered configuration is invalid: {e}"))
        })
    }
}

fn render_value(value: Value, lookup: &dyn Fn(&str) -> Option<Value>) -> Value {
    match value {
        Value::String(text) if text.contains("{{") => render_text(&text, lookup),
        Value::Array(items) => Value::Array(items.into_iter().map(|v| render_value(v, lookup)).collect()),
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| (k, render_value(v, lookup)))
                .collect(),
        ),
        other => other,
    }
}

fn render_text(text: &str, lookup: &dyn Fn(&str) -> Option<Value>) -> Value {
    let trimmed = text.trim();
    if trimmed.starts_with("{{")
        && trimmed.ends_with("}}")
        && trimmed[2..].find("{{").is_none()
    {
        return evaluate_template(&trimmed[2..trimmed.len() - 2], lookup).unwrap_or(Value::Null);
    }

    let mut out = String::new();
    let mut rest = text;
    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find("}}") else {
            out.push_str(&rest[start..]);
            return Value::String(out);
        };
        if let Some(value) = evaluate_template(&after[..end], lookup) {
            if !value.is_null() {
                out.push_str(&to_text(&value));
            }
        }
        rest = &after[end + 2..];
    }
    out.push_str(rest);
    Value::String(out)
}

fn evaluate_template(inner: &str, lookup: &dyn Fn(&str) -> Option<Value>) -> Option<Value> {
    let (path, transforms) = inner.split_once('|').unwrap_or((inner, ""));
    let value = lookup(path.trim());
    if value.is_none() {
        tracing::debug!(path = %path.trim(), "template reference did not resolve");
    }
    let value = value?;
    if transforms.trim().is_empty() {
        return Some(value);
    }
    let script = Script::compile(&format!("value | {transforms}"))
        .map_err(|err| tracing::warn!(template = %inner, error = %err, "invalid template"))
        .ok()?;
    script
        .run(&ScriptScope::new().with("value", value), ExecutionLimits::default())
        .map_err(|err| tracing::warn!(template = %inner, error = %err, "template failed"))
        .ok()
}

/// Resolves `instance.property` paths against live widget state.
pub type PropertyLookup = Arc<dyn Fn(&str) -> Option<Value> + Send + Sync>;

/// Provider rebuilt from a templated configuration on every use.
pub struct TemplatedProvider {
    config: DataSourceConfig,
    runtime: RuntimeConfig,
    lookup: PropertyLookup,
}

impl fmt::Debug for TemplatedProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TemplatedProvider")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl TemplatedProvider {
    /// Render `config` through `lookup` before every fetch or subscribe.
    #[must_use]
    pub fn new(config: DataSourceConfig, runtime: RuntimeConfig, lookup: PropertyLookup) -> Self {
        Self {
            config,
            runtime,
            lookup,
        }
    }

    /// Unrendered configuration.
    #[must_use]
    pub const fn config(&self) -> &DataSourceConfig {
        &self.config
    }

    fn current(&self) -> Result<Arc<dyn DataProvider>, ProviderError> {
        self.config.render(&*self.lookup)?.build(&self.runtime)
    }
}

#[async_trait]
impl DataProvider for TemplatedProvider {
    fn kind(&self) -> ProviderKind {
        self.config.kind()
    }

    async fn fetch(&self) -> Result<Value, ProviderError> {
        self.current()?.fetch().await
    }

    fn supports_fetch(&self) -> bool {
        self.config.kind() != ProviderKind::WebSocket
    }

    fn supports_push(&self) -> bool {
        self.config.kind() == ProviderKind::WebSocket
    }

    fn subscribe(&self, sink: PushSink) -> Result<Subscription, ProviderError> {
        self.current()?.subscribe(sink)
    }

    fn validate_config(&self) -> Result<(), ProviderError> {
        self.current()?.validate_config()
    }
}
