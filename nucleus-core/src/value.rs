//! Atom Values
//!
//! Atoms are generic over the stored type, but several operations (watchers,
//! keyed `get`, `merge`, `change`) need to look inside the value. They do so
//! through its serialized JSON shape, which also decides the atom's
//! [`ValueKind`] once at construction time.
//!
//! # Value Kinds
//!
//! - `Scalar`: numbers, strings, booleans, null. Identity is value equality.
//! - `Record`: anything that serializes to a JSON object (structs, maps).
//! - `Sequence`: anything that serializes to a JSON array (`Vec`, tuples).
//!
//! Record and sequence atoms are "structural": they support path lookups
//! and watchers.

use std::fmt;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::error::AtomResult;

/// Bound for every type an atom can hold.
///
/// Blanket-implemented; there is nothing to implement by hand.
pub trait AtomValue: Clone + PartialEq + Serialize + DeserializeOwned + Send + Sync + 'static {}

impl<T> AtomValue for T where T: Clone + PartialEq + Serialize + DeserializeOwned + Send + Sync + 'static {}

/// Shape tag fixed at atom creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    /// A primitive value.
    Scalar,
    /// A keyed record (JSON object).
    Record,
    /// An ordered sequence (JSON array).
    Sequence,
}

impl ValueKind {
    /// Classify a serialized value.
    pub fn of(value: &Value) -> Self {
        match value {
            Value::Object(_) => ValueKind::Record,
            Value::Array(_) => ValueKind::Sequence,
            _ => ValueKind::Scalar,
        }
    }

    /// Whether path lookups and watchers are meaningful for this kind.
    pub fn is_structural(self) -> bool {
        !matches!(self, ValueKind::Scalar)
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueKind::Scalar => "scalar",
            ValueKind::Record => "record",
            ValueKind::Sequence => "sequence",
        };
        f.write_str(name)
    }
}

/// The user-facing type tag: `"array"`, `"object"`, or the primitive name.
pub fn type_tag(value: &Value) -> &'static str {
    match value {
        Value::Array(_) => "array",
        Value::Object(_) => "object",
        Value::String(_) => "string",
        Value::Number(_) => "number",
        Value::Bool(_) => "boolean",
        Value::Null => "null",
    }
}

/// Serialize any atom value into its JSON shape.
pub fn to_json<T: Serialize>(value: &T) -> AtomResult<Value> {
    Ok(serde_json::to_value(value)?)
}

/// Rebuild a typed value from its JSON shape.
pub fn from_json<T: DeserializeOwned>(value: Value) -> AtomResult<T> {
    Ok(serde_json::from_value(value)?)
}

/// Resolve a dotted path (`"address.city"`, `"items.0.name"`).
///
/// Object segments match keys, numeric segments index into arrays. An
/// empty path resolves to the value itself.
pub fn get_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return Some(value);
    }

    // Exact key match first, so keys that contain dots stay reachable.
    if let Some(found) = value.as_object().and_then(|map| map.get(path)) {
        return Some(found);
    }

    path.split('.').try_fold(value, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

/// Resolve a dotted path, cloning the result or falling back to `default`.
pub fn get_path_or(value: &Value, path: &str, default: Option<Value>) -> Option<Value> {
    get_path(value, path).cloned().or(default)
}

/// Spread `partial`'s top-level keys over `base`.
///
/// Returns `None` when either side is not an object.
pub fn shallow_merge(base: &Value, partial: Value) -> Option<Value> {
    let mut merged = base.as_object()?.clone();
    match partial {
        Value::Object(fields) => {
            for (key, value) in fields {
                merged.insert(key, value);
            }
            Some(Value::Object(merged))
        }
        _ => None,
    }
}
