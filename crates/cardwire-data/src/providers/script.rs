use crate::error::ProviderError;
use crate::provider::{DataProvider, ProviderKind};
use async_trait::async_trait;
use cardwire_expr::{ExecutionError, ExecutionLimits, Script, ScriptScope};
use serde_json::Value;
use std::time::Duration;

/// Default wall-clock budget for one run.
pub(crate) const DEFAULT_SCRIPT_TIMEOUT: Duration = Duration::from_millis(5000);

/// Provider that evaluates a sandboxed script.
///
/// The script sees only the names bound in its scope. Forbidden identifiers
/// are rejected when the provider is built, and every run is bounded by a
/// step budget and the configured timeout.
#[derive(Debug, Clone)]
pub struct ScriptProvider {
    script: Script,
    scope: ScriptScope,
    timeout: Duration,
    max_steps: usize,
}

impl ScriptProvider {
    /// Compile `source`.
    pub fn new(source: &str) -> Result<Self, ProviderError> {
        let script = Script::compile(source).map_err(|e| ProviderError::Script(e.to_string()))?;
        Ok(Self {
            script,
            scope: ScriptScope::new(),
            timeout: DEFAULT_SCRIPT_TIMEOUT,
            max_steps: ExecutionLimits::default().max_steps,
        })
    }

    /// Replace the scope.
    #[must_use]
    pub fn with_scope(mut self, scope: ScriptScope) -> Self {
        self.scope = scope;
        self
    }

    /// Bind one name.
    #[must_use]
    pub fn with_binding(mut self, name: &str, value: Value) -> Self {
        self.scope.insert(name, value);
        self
    }

    /// Set the timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the step budget.
    #[must_use]
    pub const fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps;
        self
    }

    /// Script text.
    #[must_use]
    pub fn source(&self) -> &str {
        self.script.source()
    }

    /// Run synchronously.
    pub fn run(&self) -> Result<Value, ProviderError> {
        let limits = ExecutionLimits::with_timeout(self.timeout).with_max_steps(self.max_steps);
        self.script
            .run(&self.scope, limits)
            .map_err(|err| match err {
                ExecutionError::Timeout => ProviderError::Timeout(self.timeout),
                other => ProviderError::Script(other.to_string()),
            })
    }
}

#[async_trait]
impl DataProvider for ScriptProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Script
    }

    async fn fetch(&self) -> Result<Value, ProviderError> {
        self.run()
    }

    fn validate_config(&self) -> Result<(), ProviderError> {
        if self.timeout.is_zero() {
            return Err(ProviderError::InvalidConfig("script timeout must be positive".into()));
        }
        match self
            .script
            .references()
            .into_iter()
            .find(|name| !self.scope.contains(name))
        {
            Some(missing) => Err(ProviderError::InvalidConfig(format!(
                "script reads '{missing}' which is not bound"
            ))),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_runs_against_scope() {
        let provider = ScriptProvider::new("{{ rows | where(v > 1) | count }}")
            .expect("compiles")
            .with_binding("rows", json!([{"v": 1}, {"v": 2}, {"v": 3}]));
        assert!(provider.validate_config().is_ok());
        assert_eq!(provider.fetch().await, Ok(json!(2)));
    }

    #[test]
    fn test_forbidden_rejected_before_run() {
        let err = ScriptProvider::new("window.location").expect_err("forbidden");
        assert_eq!(err, ProviderError::Script("forbidden identifier: window".into()));
    }

    #[tokio::test]
    async fn test_error_carries_script_message() {
        let provider = ScriptProvider::new("missing | count").expect("compiles");
        assert!(provider.validate_config().is_err());
        assert_eq!(
            provider.fetch().await,
            Err(ProviderError::Script("'missing' is not available in this scope".into()))
        );
    }

    #[tokio::test]
    async fn test_timeout() {
        let provider = ScriptProvider::new("1 | add(1)")
            .expect("compiles")
            .with_timeout(Duration::ZERO);
        assert_eq!(provider.fetch().await, Err(ProviderError::Timeout(Duration::ZERO)));
    }

    #[tokio::test]
    async fn test_step_budget() {
        let provider = ScriptProvider::new("big | sum")
            .expect("compiles")
            .with_binding("big", Value::Array(vec![json!(1); 100]))
            .with_max_steps(10);
        assert_eq!(
            provider.fetch().await,
            Err(ProviderError::Script("step limit of 10 exceeded".into()))
        );
    }
}
