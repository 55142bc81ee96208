//! Compiled scripts.
//!
//! A [`Script`] is an expression that has been parsed and scanned once and
//! can then run any number of times against different scopes.
//!
//! ```
//! use cardwire_expr::{ExecutionLimits, Script, ScriptScope};
//! use serde_json::json;
//!
//! let script = Script::compile("{{ readings | pluck(temp) | mean | round(1) }}").unwrap();
//! let scope = ScriptScope::new().with("readings", json!([{"temp": 20}, {"temp": 21.5}]));
//! assert_eq!(script.run(&scope, ExecutionLimits::default()).unwrap(), json!(20.8));
//! ```

use crate::error::{ExecutionError, ExpressionError};
use crate::executor::{ExecutionLimits, ExpressionExecutor};
use crate::expression::{Expression, ExpressionParser};
use crate::scope::ScriptScope;
use serde_json::Value;

/// A parsed, scanned script.
#[derive(Debug, Clone, PartialEq)]
pub struct Script {
    source: String,
    expression: Expression,
}

impl Script {
    /// Parse and scan a script.
    pub fn compile(source: &str) -> Result<Self, ExpressionError> {
        let expression = ExpressionParser::new().parse(source)?;
        Ok(Self {
            source: source.to_string(),
            expression,
        })
    }

    /// Original script text.
    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Parsed expression.
    #[must_use]
    pub const fn expression(&self) -> &Expression {
        &self.expression
    }

    /// Scope names the script reads.
    #[must_use]
    pub fn references(&self) -> Vec<String> {
        self.expression.references()
    }

    /// Run against a scope.
    ///
    /// Every name the script reads must be bound in `scope`.
    pub fn run(&self, scope: &ScriptScope, limits: ExecutionLimits) -> Result<Value, ExecutionError> {
        if let Some(missing) = self.references().into_iter().find(|r| !scope.contains(r)) {
            return Err(ExecutionError::NotInScope(missing));
        }
        let result = ExpressionExecutor::new(limits).execute(&self.expression, scope);
        if let Err(err) = &result {
            tracing::debug!(script = %self.source, error = %err, "script failed");
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn test_compile_and_run() {
        let script = Script::compile("value | scale(0.1) | round(1)").expect("compiles");
        assert_eq!(script.references(), vec!["value"]);
        let scope = ScriptScope::new().with("value", json!(235));
        assert_eq!(script.run(&scope, ExecutionLimits::default()), Ok(json!(23.5)));
    }

    #[test]
    fn test_unbound_name_not_in_scope() {
        let script = Script::compile("document.cookie").expect("compiles");
        assert!(matches!(
            script.run(&ScriptScope::new(), ExecutionLimits::default()),
            Err(ExecutionError::NotInScope(name)) if name == "document"
        ));
        let script = Script::compile("rows | join(users, on=id)").expect("compiles");
        let scope = ScriptScope::new().with("rows", json!([]));
        assert_eq!(
            script.run(&scope, ExecutionLimits::default()),
            Err(ExecutionError::NotInScope("users".into()))
        );
    }

    #[test]
    fn test_forbidden_rejected_at_compile() {
        assert!(matches!(
            Script::compile("{{ fetch }}"),
            Err(ExpressionError::Forbidden(name)) if name == "fetch"
        ));
        assert!(matches!(
            Script::compile("data | get(globalThis)"),
            Err(ExpressionError::Forbidden(_))
        ));
    }

    proptest! {
        #[test]
        fn prop_numeric_literal_round_trips(n in -1_000_000i64..1_000_000) {
            let script = Script::compile(&n.to_string()).expect("compiles");
            prop_assert_eq!(
                script.run(&ScriptScope::new(), ExecutionLimits::default()),
                Ok(json!(n))
            );
        }

        #[test]
        fn prop_sum_matches_iterator(values in prop::collection::vec(-1000i64..1000, 0..50)) {
            let script = Script::compile("values | sum").expect("compiles");
            let scope = ScriptScope::new().with("values", json!(values));
            let expected: i64 = values.iter().sum();
            prop_assert_eq!(script.run(&scope, ExecutionLimits::default()), Ok(json!(expected)));
        }

        #[test]
        fn prop_compile_never_panics(s in ".{0,64}") {
            let _ = Script::compile(&s);
        }
    }
}
