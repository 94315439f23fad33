//! Transmissible error records and method rejections.
//!
//! Error values cannot cross the context boundary directly; only plain
//! structured data can. An [`ErrorRecord`] is the plain form: a name, a
//! message, an optional stack, and any extra fields a method chose to attach
//! (for example a custom `code`). Extra fields survive the round trip.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

fn default_error_name() -> String {
    "Error".to_string()
}

/// The plain-data form of an error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    /// Error class name (e.g. `"TypeError"`, `"DataCloneError"`).
    #[serde(default = "default_error_name")]
    pub name: String,
    /// Human-readable message.
    #[serde(default)]
    pub message: String,
    /// Where the error came from, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
    /// Any additional fields, copied verbatim.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ErrorRecord {
    /// Create a record with a name and a message.
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
            stack: None,
            extra: Map::new(),
        }
    }

    /// Attach a stack description.
    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = Some(stack.into());
        self
    }

    /// Attach an extra field.
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    /// Look up an extra field.
    pub fn field(&self, key: &str) -> Option<&Value> {
        self.extra.get(key)
    }

    /// The `code` extra field, when it is a string.
    pub fn code(&self) -> Option<&str> {
        self.field("code").and_then(Value::as_str)
    }
}

impl std::fmt::Display for ErrorRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.message.is_empty() {
            write!(f, "{}", self.name)
        } else {
            write!(f, "{}: {}", self.name, self.message)
        }
    }
}

impl std::error::Error for ErrorRecord {}

/// Why a local method did not fulfil.
///
/// A method may reject with an error (sent as an [`ErrorRecord`] and flagged
/// so the caller reconstructs it) or with any plain value (sent as is).
#[derive(Debug, Clone, PartialEq)]
pub enum Rejection {
    /// Rejected with an error.
    Error(ErrorRecord),
    /// Rejected with a plain value.
    Value(Value),
}

impl Rejection {
    /// Reject with a freshly built error record.
    pub fn error(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Error(ErrorRecord::new(name, message))
    }

    /// Reject with a plain value.
    pub fn value(value: impl Into<Value>) -> Self {
        Self::Value(value.into())
    }
}

impl From<ErrorRecord> for Rejection {
    fn from(record: ErrorRecord) -> Self {
        Self::Error(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_extra_fields_survive_roundtrip() {
        let record = ErrorRecord::new("RangeError", "out of range")
            .with_stack("at check()")
            .with_field("code", "E_RANGE")
            .with_field("limit", 10);
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["code"], "E_RANGE");
        assert_eq!(value["limit"], 10);

        let decoded: ErrorRecord = serde_json::from_value(value).unwrap();
        assert_eq!(decoded, record);
        assert_eq!(decoded.code(), Some("E_RANGE"));
    }

    #[test]
    fn test_missing_fields_default() {
        let decoded: ErrorRecord = serde_json::from_value(json!({})).unwrap();
        assert_eq!(decoded.name, "Error");
        assert_eq!(decoded.message, "");
        assert!(decoded.stack.is_none());
        assert!(decoded.extra.is_empty());
    }

    #[test]
    fn test_stack_omitted_when_absent() {
        let value = serde_json::to_value(ErrorRecord::new("Error", "boom")).unwrap();
        assert!(value.get("stack").is_none());
    }

    #[test]
    fn test_display() {
        assert_eq!(ErrorRecord::new("TypeError", "bad").to_string(), "TypeError: bad");
        assert_eq!(ErrorRecord::new("Error", "").to_string(), "Error");
    }
}
