//! Field-path resolver: extracts scalar values from nested provider JSON.
//!
//! Paths are dot-separated segments evaluated left to right over a working
//! set of candidate values that starts as `[root]`:
//!
//! | Segment     | Meaning                                                   |
//! |-------------|-----------------------------------------------------------|
//! | `name`      | project field `name` from every candidate                 |
//! | `name[]`    | project `name` and expand the array into the working set  |
//! | `name[Key]` | treat `name` as `[{Key, Value}]` and select `Value`       |
//!
//! `name[].sub` is simply an expansion followed by a projection, so
//! `A[].B[].C` flattens any depth of nesting. Absence is never an error: a
//! missing field, a null, or a non-object candidate just drops out.

use serde_json::Value;
use std::fmt;

/// One parsed path segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSegment {
    /// `name`
    Field(String),
    /// `name[]`
    Expand(String),
    /// `name[Key]`
    TagLookup { field: String, key: String },
}

/// A parsed field path, ready to be evaluated many times.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldPath {
    raw: String,
    segments: Vec<PathSegment>,
}

impl FieldPath {
    /// Parse a path. Parsing is total: malformed brackets are treated as
    /// plain field names, which simply never match.
    pub fn parse(path: &str) -> Self {
        let segments = path
            .split('.')
            .filter(|s| !s.is_empty())
            .map(parse_segment)
            .collect();
        Self {
            raw: path.to_string(),
            segments,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn segments(&self) -> &[PathSegment] {
        &self.segments
    }

    /// Evaluate and return every matched value, scalar or not, in order.
    pub fn resolve_raw<'a>(&self, root: &'a Value) -> Vec<&'a Value> {
        if self.segments.is_empty() || root.is_null() {
            return Vec::new();
        }
        let mut working: Vec<&'a Value> = vec![root];
        for segment in &self.segments {
            let mut next = Vec::new();
            for candidate in working {
                apply_segment(segment, candidate, &mut next);
            }
            if next.is_empty() {
                return Vec::new();
            }
            working = next;
        }
        working
    }

    /// Evaluate and return matched scalar values (string, number, bool).
    ///
    /// A final value that is an array of scalars contributes its elements.
    pub fn resolve(&self, root: &Value) -> Vec<Value> {
        let mut out = Vec::new();
        for value in self.resolve_raw(root) {
            match value {
                Value::Array(items) => {
                    out.extend(items.iter().filter(|v| is_scalar(v)).cloned());
                }
                v if is_scalar(v) => out.push(v.clone()),
                _ => {}
            }
        }
        out
    }

    /// Convenience: matched scalars rendered as strings.
    pub fn resolve_strings(&self, root: &Value) -> Vec<String> {
        self.resolve(root).iter().filter_map(scalar_to_string).collect()
    }

    /// Convenience: first matched scalar rendered as a string.
    pub fn resolve_first_string(&self, root: &Value) -> Option<String> {
        self.resolve(root).first().and_then(scalar_to_string)
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Resolve `path` against `root`, returning matched scalars in order.
///
/// Parses the path on every call; hot paths should hold a [`FieldPath`].
pub fn resolve_field_path(root: &Value, path: &str) -> Vec<Value> {
    FieldPath::parse(path).resolve(root)
}

/// Render a scalar JSON value as a string; `None` for non-scalars.
pub fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn is_scalar(value: &Value) -> bool {
    matches!(value, Value::String(_) | Value::Number(_) | Value::Bool(_))
}

fn parse_segment(segment: &str) -> PathSegment {
    if let Some(open) = segment.find('[')
        && segment.ends_with(']')
        && open > 0
    {
        let field = &segment[..open];
        let inner = &segment[open + 1..segment.len() - 1];
        if inner.is_empty() {
            return PathSegment::Expand(field.to_string());
        }
        return PathSegment::TagLookup {
            field: field.to_string(),
            key: inner.to_string(),
        };
    }
    PathSegment::Field(segment.to_string())
}

fn apply_segment<'a>(segment: &PathSegment, candidate: &'a Value, out: &mut Vec<&'a Value>) {
    match segment {
        PathSegment::Field(name) => {
            if let Some(v) = field(candidate, name) {
                out.push(v);
            }
        }
        PathSegment::Expand(name) => {
            if let Some(Value::Array(items)) = field(candidate, name) {
                out.extend(items.iter().filter(|v| !v.is_null()));
            }
        }
        PathSegment::TagLookup { field: name, key } => match field(candidate, name) {
            Some(Value::Array(items)) => {
                for item in items {
                    if let Some(v) = tag_value(item, key) {
                        out.push(v);
                    }
                }
            }
            // Map-shaped tags (`{"env": "prod"}`) are looked up directly.
            Some(Value::Object(map)) => {
                if let Some(v) = map.get(key).filter(|v| !v.is_null()) {
                    out.push(v);
                }
            }
            _ => {}
        },
    }
}

fn field<'a>(candidate: &'a Value, name: &str) -> Option<&'a Value> {
    candidate.as_object()?.get(name).filter(|v| !v.is_null())
}

fn tag_value<'a>(item: &'a Value, key: &str) -> Option<&'a Value> {
    let obj = item.as_object()?;
    let item_key = obj
        .get("Key")
        .or_else(|| obj.get("key"))
        .and_then(Value::as_str)?;
    if item_key != key {
        return None;
    }
    obj.get("Value")
        .or_else(|| obj.get("value"))
        .filter(|v| !v.is_null())
}
