//! Wire protocol message types.
//!
//! Every Portico message is a structured record carrying a `portico`
//! discriminator field, so protocol traffic can share a transport with
//! unrelated messages. Anything that does not decode as a [`WireMessage`]
//! is simply not ours and is ignored.

use portico_types::context::Envelope;
use portico_types::error::TransportError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// How a call settled on the remote side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Resolution {
    /// The method returned a value.
    Fulfilled,
    /// The method failed.
    Rejected,
}

/// A protocol message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "portico", rename_all = "kebab-case")]
pub enum WireMessage {
    /// Initiator → responder: announce the initiator's methods.
    #[serde(rename_all = "camelCase")]
    Handshake {
        /// Methods the initiator exposes.
        method_names: Vec<String>,
    },
    /// Responder → initiator: acknowledge and announce the responder's methods.
    #[serde(rename_all = "camelCase")]
    HandshakeReply {
        /// Methods the responder exposes.
        method_names: Vec<String>,
    },
    /// Invoke a remote method.
    #[serde(rename_all = "camelCase")]
    Call {
        /// Correlation id, echoed in the reply.
        id: u64,
        /// Name of the remote method.
        method_name: String,
        /// Positional arguments.
        #[serde(default)]
        args: Vec<Value>,
    },
    /// Result of a call.
    #[serde(rename_all = "camelCase")]
    Reply {
        /// Correlation id of the originating call.
        id: u64,
        /// Whether the method fulfilled or rejected.
        resolution: Resolution,
        /// The returned (or rejected) value.
        #[serde(default)]
        return_value: Value,
        /// `return_value` is a serialized error record.
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        return_value_is_error: bool,
    },
}

impl WireMessage {
    /// The discriminator value, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Handshake { .. } => "handshake",
            Self::HandshakeReply { .. } => "handshake-reply",
            Self::Call { .. } => "call",
            Self::Reply { .. } => "reply",
        }
    }

    /// Convert to the structured payload handed to the transport.
    pub fn to_value(&self) -> Result<Value, TransportError> {
        serde_json::to_value(self).map_err(|e| TransportError::NotTransmissible {
            reason: e.to_string(),
        })
    }

    /// Decode a delivered payload. Returns `None` for foreign traffic.
    pub fn decode(data: &Value) -> Option<Self> {
        Self::deserialize(data).ok()
    }

    /// Decode the payload of a delivered envelope.
    pub fn from_envelope(envelope: &Envelope) -> Option<Self> {
        Self::decode(&envelope.data)
    }
}
