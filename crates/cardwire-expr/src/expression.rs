//! Pipe-expression language.
//!
//! Syntax: `{{ source | transform | transform }}` (the braces are optional).
//!
//! The source is either a path rooted at a scope binding (`readings`,
//! `device.metrics[0]`) or a JSON literal (`[1, 2, 3]`, `{"a": 1}`, `"text"`,
//! `42`, `true`, `null`). Transforms are applied left to right.

use crate::error::ExpressionError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Identifiers that are rejected anywhere outside string literals.
///
/// The language has no way to reach any of these, but scripts written for
/// browser sandboxes often try; rejecting them early gives a clear error.
pub const FORBIDDEN_IDENTIFIERS: &[&str] = &[
    "eval",
    "Function",
    "fetch",
    "window",
    "document",
    "global",
    "globalThis",
    "require",
    "import",
    "process",
    "XMLHttpRequest",
    "WebSocket",
];

/// Where an expression starts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Source {
    /// A path whose first segment names a scope binding.
    Path(String),
    /// A literal value.
    Literal(Value),
}

impl Source {
    /// Scope binding the source reads, if any.
    #[must_use]
    pub fn root(&self) -> Option<&str> {
        match self {
            Self::Path(path) => Some(root_of(path)),
            Self::Literal(_) => None,
        }
    }
}

fn root_of(path: &str) -> &str {
    path.split(['.', '[']).next().unwrap_or(path)
}

/// Comparison operator for `where`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompareOp {
    /// `==`
    Eq,
    /// `!=`
    Ne,
    /// `>`
    Gt,
    /// `<`
    Lt,
    /// `>=`
    Gte,
    /// `<=`
    Lte,
    /// `contains`
    Contains,
    /// `starts_with`
    StartsWith,
    /// `ends_with`
    EndsWith,
}

/// A transform operation in the expression pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Transform {
    /// Keep rows whose field equals a value: `filter(status=active)`
    Filter {
        /// Field to filter on
        field: String,
        /// Value to match
        value: String,
    },
    /// Keep rows by comparison: `where(temp > 20)`
    Where {
        /// Field to compare
        field: String,
        /// Operator
        op: CompareOp,
        /// Right-hand side
        value: Value,
    },
    /// Project fields: `select(id, name)`
    Select {
        /// Fields to keep
        fields: Vec<String>,
    },
    /// Sort rows: `sort(field, desc=true)`
    Sort {
        /// Field to sort by (empty sorts scalars)
        field: String,
        /// Sort descending
        desc: bool,
    },
    /// First n rows: `limit(n)`
    Limit {
        /// Maximum number of rows
        n: usize,
    },
    /// Skip n rows: `offset(n)`
    Offset {
        /// Rows to skip
        n: usize,
    },
    /// First element
    First,
    /// Last element
    Last,
    /// Number of rows, keys or characters
    Count,
    /// Sum: `sum` or `sum(field)`
    Sum {
        /// Field to sum, or the elements themselves
        field: Option<String>,
    },
    /// Average: `mean` or `mean(field)`
    Mean {
        /// Field to average
        field: Option<String>,
    },
    /// Minimum: `min` or `min(field)`
    Min {
        /// Field
        field: Option<String>,
    },
    /// Maximum: `max` or `max(field)`
    Max {
        /// Field
        field: Option<String>,
    },
    /// Field of every row: `pluck(field)`
    Pluck {
        /// Field
        field: String,
    },
    /// Nested value: `get(a.b[0])`
    Get {
        /// Path
        path: String,
    },
    /// Group rows: `group_by(field)`
    GroupBy {
        /// Field
        field: String,
    },
    /// Remove duplicates: `distinct` or `distinct(field)`
    Distinct {
        /// Field
        field: Option<String>,
    },
    /// Flatten one level of nested arrays
    Flatten,
    /// Flatten an object into dotted keys
    FlattenKeys,
    /// Reverse rows
    Reverse,
    /// Pivot rows: `pivot(row, col, value)`
    Pivot {
        /// Row key field
        row: String,
        /// Column key field
        col: String,
        /// Value field
        value: String,
    },
    /// Join with another scope binding: `join(other, on=field)`
    Join {
        /// Other binding
        other: String,
        /// Join field
        on: String,
    },
    /// Round a number: `round(2)`
    Round {
        /// Decimal places
        digits: u32,
    },
    /// Multiply a number: `scale(0.1)`
    Scale {
        /// Factor
        factor: f64,
    },
    /// Add to a number: `add(-273.15)`
    Add {
        /// Addend
        n: f64,
    },
    /// Multiply by 100
    Percentage,
    /// Format with fixed decimals: `fixed(1)`
    Fixed {
        /// Decimal places
        digits: u32,
    },
    /// Replace null: `default(0)`
    Default {
        /// Replacement
        value: Value,
    },
    /// Convert to text
    ToText,
    /// Convert to number
    ToNumber,
    /// Uppercase text
    Upper,
    /// Lowercase text
    Lower,
    /// Prepend text: `prefix("T: ")`
    Prefix {
        /// Text
        text: String,
    },
    /// Append text: `suffix(" °C")`
    Suffix {
        /// Text
        text: String,
    },
    /// Object keys
    Keys,
    /// Object values
    Values,
}

/// Parsed expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Expression {
    /// Source of the pipeline
    pub source: Source,
    /// Chain of transforms
    pub transforms: Vec<Transform>,
}

impl Expression {
    /// Scope bindings the expression reads.
    #[must_use]
    pub fn references(&self) -> Vec<String> {
        let mut refs: Vec<String> = self.source.root().map(String::from).into_iter().collect();
        for transform in &self.transforms {
            if let Transform::Join { other, .. } = transform {
                let root = root_of(other).to_string();
                if !refs.contains(&root) {
                    refs.push(root);
                }
            }
        }
        refs
    }
}

/// Expression parser.
#[derive(Debug, Default)]
pub struct ExpressionParser;

impl ExpressionParser {
    /// Create a new parser.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Parse an expression string.
    pub fn parse(&self, input: &str) -> Result<Expression, ExpressionError> {
        let input = input.trim();
        let inner = input
            .strip_prefix("{{")
            .and_then(|s| s.strip_suffix("}}"))
            .map_or(input, str::trim);

        if let Some(name) = forbidden_identifier(inner) {
            return Err(ExpressionError::Forbidden(name.to_string()));
        }

        let parts = split_top_level(inner, '|')?;
        let (head, rest) = parts
            .split_first()
            .ok_or(ExpressionError::EmptyExpression)?;
        if head.is_empty() {
            return Err(ExpressionError::EmptyExpression);
        }

        let source = parse_source(head)?;
        let transforms = rest
            .iter()
            .map(|part| self.parse_transform(part))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Expression { source, transforms })
    }

    fn parse_transform(&self, input: &str) -> Result<Transform, ExpressionError> {
        let input = input.trim();
        let (name, args) = match input.find('(') {
            Some(pos) => {
                let args = input[pos + 1..]
                    .strip_suffix(')')
                    .ok_or_else(|| ExpressionError::Syntax(format!("unclosed call: {input}")))?;
                (input[..pos].trim(), Some(args.trim()))
            }
            None => (input, None),
        };
        let args = args.unwrap_or("");
        let optional = || (!args.is_empty()).then(|| args.to_string());

        let transform = match name {
            "filter" => {
                let (field, value) = parse_key_value(args)?;
                Transform::Filter { field, value }
            }
            "where" => parse_where(args)?,
            "select" => Transform::Select {
                fields: split_args(args)?,
            },
            "sort" => {
                let parts = split_args(args)?;
                let field = parts.first().cloned().unwrap_or_default();
                let desc = parts.iter().skip(1).any(|p| p.replace(' ', "") == "desc=true");
                Transform::Sort { field, desc }
            }
            "limit" => Transform::Limit {
                n: parse_number_arg(name, args)?,
            },
            "offset" => Transform::Offset {
                n: parse_number_arg(name, args)?,
            },
            "first" => Transform::First,
            "last" => Transform::Last,
            "count" => Transform::Count,
            "sum" => Transform::Sum { field: optional() },
            "mean" | "avg" => Transform::Mean { field: optional() },
            "min" => Transform::Min { field: optional() },
            "max" => Transform::Max { field: optional() },
            "pluck" => Transform::Pluck {
                field: required_arg(name, args)?,
            },
            "get" => Transform::Get {
                path: required_arg(name, args)?,
            },
            "group_by" => Transform::GroupBy {
                field: required_arg(name, args)?,
            },
            "distinct" => Transform::Distinct { field: optional() },
            "flatten" => Transform::Flatten,
            "flatten_keys" => Transform::FlattenKeys,
            "reverse" => Transform::Reverse,
            "pivot" => {
                let parts = split_args(args)?;
                match parts.as_slice() {
                    [row, col, value] => Transform::Pivot {
                        row: row.clone(),
                        col: col.clone(),
                        value: value.clone(),
                    },
                    _ => return Err(ExpressionError::InvalidArgument(name.to_string())),
                }
            }
            "join" => {
                let parts = split_args(args)?;
                let other = parts.first().cloned().unwrap_or_default();
                let on = parts
                    .get(1)
                    .and_then(|s| s.strip_prefix("on="))
                    .map(str::trim)
                    .unwrap_or("")
                    .to_string();
                if other.is_empty() || on.is_empty() {
                    return Err(ExpressionError::InvalidArgument(name.to_string()));
                }
                Transform::Join { other, on }
            }
            "round" => Transform::Round {
                digits: if args.is_empty() {
                    0
                } else {
                    parse_number_arg(name, args)?
                },
            },
            "fixed" => Transform::Fixed {
                digits: parse_number_arg(name, args)?,
            },
            "scale" => Transform::Scale {
                factor: parse_number_arg(name, args)?,
            },
            "add" => Transform::Add {
                n: parse_number_arg(name, args)?,
            },
            "percentage" => Transform::Percentage,
            "default" => Transform::Default {
                value: parse_literal(args)
                    .ok_or_else(|| ExpressionError::InvalidArgument(name.to_string()))?,
            },
            "to_text" | "string" => Transform::ToText,
            "to_number" | "number" => Transform::ToNumber,
            "upper" => Transform::Upper,
            "lower" => Transform::Lower,
            "prefix" => Transform::Prefix {
                text: parse_text_arg(name, args)?,
            },
            "suffix" => Transform::Suffix {
                text: parse_text_arg(name, args)?,
            },
            "keys" => Transform::Keys,
            "values" => Transform::Values,
            _ => return Err(ExpressionError::UnknownTransform(name.to_string())),
        };
        Ok(transform)
    }
}

fn parse_source(head: &str) -> Result<Source, ExpressionError> {
    if let Some(value) = parse_literal(head) {
        return Ok(Source::Literal(value));
    }
    let valid = head
        .chars()
        .all(|c| c.is_alphanumeric() || matches!(c, '_' | '.' | '[' | ']' | '$'));
    if !valid || head.starts_with(['.', '[']) {
        return Err(ExpressionError::Syntax(format!("invalid source: {head}")));
    }
    Ok(Source::Path(head.to_string()))
}

/// Parse a JSON literal. Returns `None` for anything that is not one.
fn parse_literal(text: &str) -> Option<Value> {
    let text = text.trim();
    let first = text.chars().next()?;
    let literal_start =
        matches!(first, '[' | '{' | '"' | '-') || first.is_ascii_digit() || text == "true"
            || text == "false"
            || text == "null";
    if !literal_start {
        return None;
    }
    serde_json::from_str(text).ok()
}

fn parse_key_value(input: &str) -> Result<(String, String), ExpressionError> {
    let (key, value) = input
        .split_once('=')
        .ok_or_else(|| ExpressionError::InvalidArgument(input.to_string()))?;
    let value = value.trim();
    let value = value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(value);
    Ok((key.trim().to_string(), value.to_string()))
}

fn parse_where(args: &str) -> Result<Transform, ExpressionError> {
    // longest operators first so `>=` is not read as `>`
    const OPS: &[(&str, CompareOp)] = &[
        (">=", CompareOp::Gte),
        ("<=", CompareOp::Lte),
        ("==", CompareOp::Eq),
        ("!=", CompareOp::Ne),
        (">", CompareOp::Gt),
        ("<", CompareOp::Lt),
        (" contains ", CompareOp::Contains),
        (" starts_with ", CompareOp::StartsWith),
        (" ends_with ", CompareOp::EndsWith),
    ];
    for (token, op) in OPS {
        if let Some((field, value)) = args.split_once(token) {
            let field = field.trim();
            if field.is_empty() {
                break;
            }
            let raw = value.trim();
            let value = parse_literal(raw).unwrap_or_else(|| Value::String(raw.to_string()));
            return Ok(Transform::Where {
                field: field.to_string(),
                op: *op,
                value,
            });
        }
    }
    Err(ExpressionError::InvalidArgument(format!("where({args})")))
}

fn required_arg(name: &str, args: &str) -> Result<String, ExpressionError> {
    if args.is_empty() {
        Err(ExpressionError::InvalidArgument(name.to_string()))
    } else {
        Ok(args.to_string())
    }
}

fn parse_number_arg<T: std::str::FromStr>(name: &str, args: &str) -> Result<T, ExpressionError> {
    args.trim()
        .parse()
        .map_err(|_| ExpressionError::InvalidArgument(name.to_string()))
}

fn parse_text_arg(name: &str, args: &str) -> Result<String, ExpressionError> {
    match parse_literal(args) {
        Some(Value::String(s)) => Ok(s),
        _ => Err(ExpressionError::InvalidArgument(name.to_string())),
    }
}

fn split_args(args: &str) -> Result<Vec<String>, ExpressionError> {
    Ok(split_top_level(args, ',')?
        .into_iter()
        .filter(|s| !s.is_empty())
        .collect())
}

/// Split on `sep` outside string literals, brackets and parentheses.
fn split_top_level(input: &str, sep: char) -> Result<Vec<String>, ExpressionError> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut depth = 0i32;
    let mut in_string = false;
    let mut escaped = false;

    for ch in input.chars() {
        if in_string {
            current.push(ch);
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        match ch {
            '"' => {
                in_string = true;
                current.push(ch);
            }
            '(' | '[' | '{' => {
                depth += 1;
                current.push(ch);
            }
            ')' | ']' | '}' => {
                depth -= 1;
                if depth < 0 {
                    return Err(ExpressionError::Syntax(format!("unbalanced '{ch}'")));
                }
                current.push(ch);
            }
            c if c == sep && depth == 0 => {
                parts.push(current.trim().to_string());
                current.clear();
            }
            _ => current.push(ch),
        }
    }
    if in_string {
        return Err(ExpressionError::Syntax("unterminated string".to_string()));
    }
    if depth != 0 {
        return Err(ExpressionError::Syntax("unbalanced brackets".to_string()));
    }
    parts.push(current.trim().to_string());
    Ok(parts)
}

/// First forbidden identifier appearing outside string literals.
#[must_use]
pub fn forbidden_identifier(input: &str) -> Option<&'static str> {
    let mut word = String::new();
    let mut in_string = false;
    let mut escaped = false;

    let mut check = |word: &mut String| {
        let found = FORBIDDEN_IDENTIFIERS.iter().copied().find(|f| *f == word);
        word.clear();
        found
    };

    for ch in input.chars() {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        if ch.is_alphanumeric() || ch == '_' || ch == '$' {
            word.push(ch);
            continue;
        }
        if let Some(found) = check(&mut word) {
            return Some(found);
        }
        if ch == '"' {
            in_string = true;
        }
    }
    check(&mut word)
}

/// Source paths referenced by `{{ ... }}` templates inside `text`.
///
/// `"temp of {{ card-1.status | upper }}"` references `card-1.status`.
#[must_use]
pub fn template_dependencies(text: &str) -> Vec<String> {
    let mut deps = Vec::new();
    let mut rest = text;
    while let Some(start) = rest.find("{{") {
        let after = &rest[start + 2..];
        let Some(end) = after.find("}}") else {
            break;
        };
        let inner = &after[..end];
        let path = inner.split('|').next().unwrap_or("").trim();
        if !path.is_empty()
            && !path.contains(char::is_whitespace)
            && parse_literal(path).is_none()
            && !deps.iter().any(|d| d == path)
        {
            deps.push(path.to_string());
        }
        rest = &after[end + 2..];
    }
    deps
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(input: &str) -> Result<Expression, ExpressionError> {
        ExpressionParser::new().parse(input)
    }

    #[test]
    fn test_parse_simple_source() {
        let expr = parse("data.transactions").expect("valid");
        assert_eq!(expr.source, Source::Path("data.transactions".into()));
        assert!(expr.transforms.is_empty());
    }

    #[test]
    fn test_parse_with_braces() {
        let expr = parse("{{ readings[0].value }}").expect("valid");
        assert_eq!(expr.source, Source::Path("readings[0].value".into()));
        assert_eq!(expr.references(), vec!["readings"]);
    }

    #[test]
    fn test_parse_literal_sources() {
        assert_eq!(
            parse("[1, 2, 3] | sum").expect("valid").source,
            Source::Literal(json!([1, 2, 3]))
        );
        assert_eq!(
            parse(r#"{"a": "x|y"} | get(a)"#).expect("valid").source,
            Source::Literal(json!({"a": "x|y"}))
        );
        assert_eq!(parse("42").expect("valid").source, Source::Literal(json!(42)));
        assert!(parse("42").expect("valid").references().is_empty());
    }

    #[test]
    fn test_parse_chain() {
        let expr = parse("{{ rows | filter(status=done) | sort(ts, desc=true) | limit(5) | count }}")
            .expect("valid");
        assert_eq!(
            expr.transforms,
            vec![
                Transform::Filter {
                    field: "status".into(),
                    value: "done".into()
                },
                Transform::Sort {
                    field: "ts".into(),
                    desc: true
                },
                Transform::Limit { n: 5 },
                Transform::Count,
            ]
        );
    }

    #[test]
    fn test_parse_where_operators() {
        let expr = parse("rows | where(temp >= 20.5) | where(name contains \"pump\")").expect("valid");
        assert_eq!(
            expr.transforms[0],
            Transform::Where {
                field: "temp".into(),
                op: CompareOp::Gte,
                value: json!(20.5)
            }
        );
        assert_eq!(
            expr.transforms[1],
            Transform::Where {
                field: "name".into(),
                op: CompareOp::Contains,
                value: json!("pump")
            }
        );
    }

    #[test]
    fn test_parse_scalar_transforms() {
        let expr = parse(r#"value | round(2) | scale(0.1) | prefix("T: ") | default(0)"#)
            .expect("valid");
        assert_eq!(
            expr.transforms,
            vec![
                Transform::Round { digits: 2 },
                Transform::Scale { factor: 0.1 },
                Transform::Prefix { text: "T: ".into() },
                Transform::Default { value: json!(0) },
            ]
        );
    }

    #[test]
    fn test_parse_join_references() {
        let expr = parse("orders | join(customers, on=customer_id)").expect("valid");
        assert_eq!(expr.references(), vec!["orders", "customers"]);
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(parse(""), Err(ExpressionError::EmptyExpression));
        assert_eq!(parse("{{ }}"), Err(ExpressionError::EmptyExpression));
        assert!(matches!(
            parse("data | explode()"),
            Err(ExpressionError::UnknownTransform(_))
        ));
        assert!(matches!(
            parse("data | limit(x)"),
            Err(ExpressionError::InvalidArgument(_))
        ));
        assert!(matches!(parse("data | limit(3"), Err(ExpressionError::Syntax(_))));
        assert!(matches!(parse("a b"), Err(ExpressionError::Syntax(_))));
    }

    #[test]
    fn test_forbidden_identifiers() {
        assert_eq!(
            parse("window.location"),
            Err(ExpressionError::Forbidden("window".into()))
        );
        assert_eq!(
            parse("data | get(eval)"),
            Err(ExpressionError::Forbidden("eval".into()))
        );
        // inside a string literal it is just text
        assert!(parse(r#"data | prefix("eval ")"#).is_ok());
        // substrings of longer identifiers are fine
        assert!(parse("evaluation").is_ok());
    }

    #[test]
    fn test_template_dependencies() {
        let deps = template_dependencies(
            "/api?room={{ selector.room }}&unit={{ unit-card.unit | lower }}&n={{ 5 }}{{ selector.room }}",
        );
        assert_eq!(deps, vec!["selector.room", "unit-card.unit"]);
        assert!(template_dependencies("no templates").is_empty());
    }
}
