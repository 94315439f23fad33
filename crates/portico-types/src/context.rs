//! Execution context identities and delivered message envelopes.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identity of an execution context (a document, a frame, a worker).
///
/// Every delivered message carries the identity of the context that sent it,
/// which is how a receiver tells its peer apart from unrelated traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContextId(pub Uuid);

impl ContextId {
    /// Create a new random ContextId.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ContextId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ContextId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A message as observed by a listener on the receiving context.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    /// The context that posted the message.
    pub source: ContextId,
    /// The sender's origin, as reported by the transport (never by the sender).
    pub origin: String,
    /// Structured payload.
    pub data: serde_json::Value,
}

impl Envelope {
    /// Create a new envelope.
    pub fn new(source: ContextId, origin: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            source,
            origin: origin.into(),
            data,
        }
    }
}
