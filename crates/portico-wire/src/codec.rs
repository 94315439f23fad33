//! Error codec: errors to transmissible records and back.
//!
//! A local method's failure crosses the boundary as an [`ErrorRecord`]
//! flagged with `returnValueIsError`; the caller rebuilds it into
//! [`CallError::Remote`], keeping every field the record carried.

use portico_types::error::{CallError, TransportError};
use portico_types::record::{ErrorRecord, Rejection};
use serde_json::Value;
use std::any::Any;

/// Error name used for panics caught inside a local method.
pub const PANIC_ERROR_NAME: &str = "Panic";

/// Convert any error into a record.
///
/// The name is the error's type name without its module path, the message
/// is its `Display` output, and the stack is its `source()` chain.
pub fn serialize_error<E>(error: &E) -> ErrorRecord
where
    E: std::error::Error + ?Sized,
{
    let type_name = std::any::type_name::<E>();
    let name = short_type_name(type_name);
    let mut record = ErrorRecord::new(name, error.to_string());

    let mut chain = Vec::new();
    let mut source = error.source();
    while let Some(cause) = source {
        chain.push(format!("caused by: {cause}"));
        source = cause.source();
    }
    if !chain.is_empty() {
        record.stack = Some(chain.join("\n"));
    }
    record
}

/// Reject with any error, converted by [`serialize_error`].
pub fn reject_with<E>(error: &E) -> Rejection
where
    E: std::error::Error + ?Sized,
{
    Rejection::Error(serialize_error(error))
}

/// Record for a send failure, named by the failure's code (for example
/// `DataCloneError`).
pub fn serialize_transport_error(error: &TransportError) -> ErrorRecord {
    ErrorRecord::new(error.code(), error.to_string())
}

/// Record for a panic payload caught at the call boundary.
pub fn panic_record(payload: Box<dyn Any + Send>) -> ErrorRecord {
    let message = if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "method panicked".to_string()
    };
    ErrorRecord::new(PANIC_ERROR_NAME, message)
}

/// Rebuild an error record from a received value.
///
/// Records that do not have the expected shape still produce an error: a
/// bare string becomes the message, anything else is kept under `value`.
pub fn deserialize_error(value: Value) -> ErrorRecord {
    match value {
        Value::Object(_) => match serde_json::from_value::<ErrorRecord>(value.clone()) {
            Ok(record) => record,
            Err(_) => ErrorRecord::new("Error", "").with_field("value", value),
        },
        Value::String(message) => ErrorRecord::new("Error", message),
        other => ErrorRecord::new("Error", "").with_field("value", other),
    }
}

/// Wire form of a rejection: `(returnValue, returnValueIsError)`.
pub fn encode_rejection(rejection: Rejection) -> (Value, bool) {
    match rejection {
        Rejection::Error(record) => match serde_json::to_value(&record) {
            Ok(value) => (value, true),
            Err(e) => (
                Value::String(format!("{}: {}", record.name, e)),
                false,
            ),
        },
        Rejection::Value(value) => (value, false),
    }
}

/// Caller-side error for a rejected reply.
pub fn decode_rejection(return_value: Value, is_error: bool) -> CallError {
    if is_error {
        CallError::Remote(deserialize_error(return_value))
    } else {
        CallError::Rejected(return_value)
    }
}

fn short_type_name(full: &str) -> String {
    // Strip generic parameters first so `a::B<c::D>` yields `B`.
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base).to_string()
}
