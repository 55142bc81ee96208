//! Sandboxed scripts for Cardwire.
//!
//! Scripted data sources, mapping transforms and relationship calculators
//! are written in a small pipe-expression language:
//!
//! ```text
//! {{ readings | where(temp > 20) | sort(ts, desc=true) | limit(10) }}
//! {{ value | round(1) | suffix(" °C") }}
//! ```
//!
//! Scripts can only read names bound in a [`ScriptScope`], never reach the
//! host, and run under [`ExecutionLimits`].

mod error;
pub mod executor;
pub mod expression;
pub mod scope;
pub mod script;

pub use error::{ExecutionError, ExpressionError, ScriptError};
pub use executor::{ExecutionLimits, ExpressionExecutor};
pub use expression::{
    forbidden_identifier, template_dependencies, CompareOp, Expression, ExpressionParser, Source,
    Transform, FORBIDDEN_IDENTIFIERS,
};
pub use scope::ScriptScope;
pub use script::Script;
