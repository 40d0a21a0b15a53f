//! Attribute values, unknown placeholders, and sensitive-value wrapping.
//!
//! Attribute values travel as [`serde_json::Value`]. `null` and a missing
//! key both mean "unset". Values that reference outputs of resources not
//! yet applied are carried as the [`UNKNOWN_VALUE`] placeholder string,
//! which is the same marker the host uses for computed-later values.

use std::fmt;

use serde_json::Value;

/// An attribute map keyed by attribute name.
pub type AttrMap = serde_json::Map<String, Value>;

/// Placeholder for a value that is not known until apply.
pub const UNKNOWN_VALUE: &str = "74D93920-ED26-11E3-AC10-0800200C9A66";

/// Text printed instead of a sensitive value.
pub const REDACTED: &str = "(sensitive value)";

/// Build an unknown placeholder value.
pub fn unknown() -> Value {
    Value::String(UNKNOWN_VALUE.to_string())
}

/// Whether the value is the unknown placeholder.
pub fn is_unknown(value: &Value) -> bool {
    matches!(value, Value::String(s) if s == UNKNOWN_VALUE)
}

/// Whether the value or any nested element is the unknown placeholder.
pub fn contains_unknown(value: &Value) -> bool {
    match value {
        Value::String(_) => is_unknown(value),
        Value::Array(items) => items.iter().any(contains_unknown),
        Value::Object(map) => map.values().any(contains_unknown),
        _ => false,
    }
}

/// Whether the value counts as unset.
pub fn is_unset(value: Option<&Value>) -> bool {
    matches!(value, None | Some(Value::Null))
}

/// Look up a value, folding `null` into `None`.
pub fn get<'a>(map: &'a AttrMap, name: &str) -> Option<&'a Value> {
    map.get(name).filter(|v| !v.is_null())
}

/// Render a value compactly for diagnostics.
///
/// Strings are printed quoted, collections in JSON form.
pub fn render(value: &Value) -> String {
    if is_unknown(value) {
        return "(known after apply)".to_string();
    }
    match value {
        Value::Null => "null".to_string(),
        other => other.to_string(),
    }
}

/// A value carrying a redaction marker.
///
/// Equality and access operate on the wrapped value; every form of
/// stringification prints [`REDACTED`] when the marker is set.
#[derive(Clone, PartialEq, Eq)]
pub struct Sensitive<T> {
    value: T,
    redact: bool,
}

impl<T> Sensitive<T> {
    /// Wrap a value that must never be printed.
    pub fn new(value: T) -> Self {
        Self {
            value,
            redact: true,
        }
    }

    /// Wrap a value, redacting only when `redact` is set.
    pub fn marked(value: T, redact: bool) -> Self {
        Self { value, redact }
    }

    /// Whether the value is redacted when printed.
    pub fn is_redacted(&self) -> bool {
        self.redact
    }

    /// Borrow the wrapped value.
    pub fn expose(&self) -> &T {
        &self.value
    }

    /// Unwrap the value.
    pub fn into_inner(self) -> T {
        self.value
    }
}

impl Sensitive<Value> {
    /// Render the value for a message, honoring the marker.
    pub fn render(&self) -> String {
        if self.redact {
            REDACTED.to_string()
        } else {
            render(&self.value)
        }
    }
}

impl<T: fmt::Display> fmt::Display for Sensitive<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.redact {
            f.write_str(REDACTED)
        } else {
            self.value.fmt(f)
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Sensitive<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.redact {
            f.write_str(REDACTED)
        } else {
            self.value.fmt(f)
        }
    }
}
