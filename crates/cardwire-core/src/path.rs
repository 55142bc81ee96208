//! Path-based extraction from arbitrary JSON payloads.
//!
//! Paths use dot notation with optional bracketed indices: `a.b[2].c`.
//!
//! - `DataPath` - Parsed path (keys and indices)
//! - `resolve` - Extract a value, `None` when anything along the way is missing
//! - `available_paths` - Bounded enumeration of every reachable path
//! - `suggest_path` - Best-effort guess of a path for a target field name
//!
//! # Example
//!
//! ```
//! use cardwire_core::path::resolve;
//! use serde_json::json;
//!
//! let data = json!({"sensor": {"readings": [1, 2, 3]}});
//! assert_eq!(resolve(&data, "sensor.readings[1]"), Some(&json!(2)));
//! assert_eq!(resolve(&data, "sensor.missing"), None);
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Maximum keys visited per object level during enumeration.
pub const MAX_OBJECT_KEYS: usize = 20;
/// Maximum items visited per array level during enumeration.
pub const MAX_ARRAY_ITEMS: usize = 10;
/// Maximum number of paths returned by [`available_paths`], root included.
pub const MAX_TOTAL_PATHS: usize = 100;

/// One step of a [`DataPath`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PathSegment {
    /// Object key (`a` in `a.b`).
    Key(String),
    /// Array index (`2` in `a[2]`).
    Index(usize),
    /// Bracket contents that are not an index (`-1` in `a[-1]`). Never resolves.
    Invalid(String),
}

impl fmt::Display for PathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Key(key) => write!(f, "{key}"),
            Self::Index(index) => write!(f, "[{index}]"),
            Self::Invalid(raw) => write!(f, "[{raw}]"),
        }
    }
}

/// A parsed data path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct DataPath {
    segments: Vec<PathSegment>,
}

impl DataPath {
    /// Parse a path string.
    ///
    /// Parsing never fails: empty keys are skipped and bracket contents
    /// that are not non-negative integers become [`PathSegment::Invalid`].
    #[must_use]
    pub fn parse(path: &str) -> Self {
        let mut segments = Vec::new();
        let mut current = String::new();
        let mut bracket = String::new();
        let mut in_brackets = false;

        for ch in path.chars() {
            match ch {
                '[' => {
                    if !current.is_empty() {
                        segments.push(PathSegment::Key(std::mem::take(&mut current)));
                    }
                    in_brackets = true;
                    bracket.clear();
                }
                ']' if in_brackets => {
                    in_brackets = false;
                    let raw = std::mem::take(&mut bracket);
                    segments.push(raw.trim().parse::<usize>().map_or_else(
                        |_| PathSegment::Invalid(raw.trim().to_string()),
                        PathSegment::Index,
                    ));
                }
                '.' if !in_brackets => {
                    if !current.is_empty() {
                        segments.push(PathSegment::Key(std::mem::take(&mut current)));
                    }
                }
                _ if in_brackets => bracket.push(ch),
                _ => current.push(ch),
            }
        }
        if !current.is_empty() {
            segments.push(PathSegment::Key(current));
        }

        Self { segments }
    }

    /// Create an empty (root) path.
    #[must_use]
    pub const fn root() -> Self {
        Self {
            segments: Vec::new(),
        }
    }

    /// Get path segments.
    #[must_use]
    pub fn segments(&self) -> &[PathSegment] {
        &self.segments
    }

    /// Check if this is the root path.
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    /// Append a key segment.
    #[must_use]
    pub fn key(&self, key: &str) -> Self {
        let mut segments = self.segments.clone();
        segments.push(PathSegment::Key(key.to_string()));
        Self { segments }
    }

    /// Append an index segment.
    #[must_use]
    pub fn index(&self, index: usize) -> Self {
        let mut segments = self.segments.clone();
        segments.push(PathSegment::Index(index));
        Self { segments }
    }

    /// Last key of the path, if the path ends with a key.
    #[must_use]
    pub fn leaf_key(&self) -> Option<&str> {
        match self.segments.last() {
            Some(PathSegment::Key(key)) => Some(key),
            _ => None,
        }
    }

    /// Resolve this path against `data`.
    #[must_use]
    pub fn resolve<'a>(&self, data: &'a Value) -> Option<&'a Value> {
        self.segments
            .iter()
            .try_fold(data, |current, segment| match (segment, current) {
                (PathSegment::Index(index), Value::Array(items)) => items.get(*index),
                (PathSegment::Key(key), Value::Object(map)) => map.get(key),
                // `items.0` addresses an array the same way `items[0]` does
                (PathSegment::Key(key), Value::Array(items)) => {
                    key.parse::<usize>().ok().and_then(|i| items.get(i))
                }
                _ => None,
            })
    }
}

impl fmt::Display for DataPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.segments.iter().enumerate() {
            match segment {
                PathSegment::Key(key) if i > 0 => write!(f, ".{key}")?,
                other => write!(f, "{other}")?,
            }
        }
        Ok(())
    }
}

impl From<&str> for DataPath {
    fn from(s: &str) -> Self {
        Self::parse(s)
    }
}

/// How a resolved array is post-processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArrayMode {
    /// Return arrays as they are.
    #[default]
    None,
    /// Pick the element at the given index from a non-empty array result.
    Pick(usize),
}

/// Resolve `path` against `data`.
///
/// An empty path returns `data` itself. Missing keys, out-of-range indices
/// and indexing into non-containers all yield `None`.
#[must_use]
pub fn resolve<'a>(data: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return Some(data);
    }
    DataPath::parse(path).resolve(data)
}

/// Resolve with array post-processing.
#[must_use]
pub fn resolve_with<'a>(data: &'a Value, path: &str, mode: ArrayMode) -> Option<&'a Value> {
    let value = resolve(data, path)?;
    match (mode, value) {
        (ArrayMode::Pick(index), Value::Array(items)) if !items.is_empty() => items.get(index),
        _ => Some(value),
    }
}

/// Check that `path` resolves to a value in `data`.
#[must_use]
pub fn is_valid_path(data: &Value, path: &str) -> bool {
    resolve(data, path).is_some()
}

/// JSON type name of a value (`null`, `boolean`, `number`, `string`, `array`, `object`).
#[must_use]
pub const fn detect_data_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// A path discovered by [`available_paths`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PathInfo {
    /// Path string, `""` for the root.
    pub path: String,
    /// JSON type of the value at this path.
    pub data_type: &'static str,
    /// The value itself, for scalars only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sample: Option<Value>,
}

/// Enumerate reachable paths in `data`.
///
/// The enumeration visits at most [`MAX_OBJECT_KEYS`] keys per object,
/// [`MAX_ARRAY_ITEMS`] items per array and returns at most
/// [`MAX_TOTAL_PATHS`] entries, starting with the root `""`.
#[must_use]
pub fn available_paths(data: &Value) -> Vec<PathInfo> {
    let mut paths = Vec::new();
    if data.is_null() {
        return paths;
    }
    paths.push(path_info(String::new(), data));
    collect_paths(data, "", &mut paths);
    paths
}

fn path_info(path: String, value: &Value) -> PathInfo {
    let sample = match value {
        Value::Array(_) | Value::Object(_) => None,
        scalar => Some(scalar.clone()),
    };
    PathInfo {
        path,
        data_type: detect_data_type(value),
        sample,
    }
}

fn collect_paths(data: &Value, prefix: &str, paths: &mut Vec<PathInfo>) {
    let children: Vec<(String, &Value)> = match data {
        Value::Array(items) => items
            .iter()
            .take(MAX_ARRAY_ITEMS)
            .enumerate()
            .map(|(i, item)| (format!("{prefix}[{i}]"), item))
            .collect(),
        Value::Object(map) => map
            .iter()
            .take(MAX_OBJECT_KEYS)
            .map(|(key, item)| {
                let path = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{prefix}.{key}")
                };
                (path, item)
            })
            .collect(),
        _ => return,
    };

    for (path, child) in children {
        if paths.len() >= MAX_TOTAL_PATHS {
            return;
        }
        paths.push(path_info(path.clone(), child));
        if child.is_array() || child.is_object() {
            collect_paths(child, &path, paths);
        }
    }
}

/// Suggest a path in `data` for a field called `target_field`.
///
/// An exact (case-insensitive) leaf match wins over a partial match.
#[must_use]
pub fn suggest_path(data: &Value, target_field: &str) -> Option<String> {
    let target = target_field.to_lowercase();
    let paths = available_paths(data);

    let exact = paths.iter().find(|info| {
        DataPath::parse(&info.path)
            .leaf_key()
            .is_some_and(|leaf| leaf.to_lowercase() == target)
    });
    if let Some(info) = exact {
        return Some(info.path.clone());
    }

    paths
        .iter()
        .filter(|info| !info.path.is_empty())
        .find(|info| info.path.to_lowercase().contains(&target))
        .map(|info| info.path.clone())
}
