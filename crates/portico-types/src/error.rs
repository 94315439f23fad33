//! Error taxonomy for Portico connections and calls.
//!
//! Authentication failures (wrong sender, wrong origin, unknown correlation
//! id) are never errors: they are logged and the message is dropped. Every
//! other failure lands in one of the enums below, delivered through the
//! result of the affected connection or call.

use crate::record::ErrorRecord;
use serde_json::Value;
use thiserror::Error;

/// Code for calls or connections that were destroyed.
pub const ERR_CONNECTION_DESTROYED: &str = "ConnectionDestroyed";
/// Code for connections whose handshake did not complete in time.
pub const ERR_CONNECTION_TIMEOUT: &str = "ConnectionTimeout";
/// Code for the initiator running outside an embedded context.
pub const ERR_NOT_EMBEDDED: &str = "NotEmbedded";
/// Code for the responder given an embedded resource with nothing to load.
pub const ERR_NO_EMBEDDED_RESOURCE: &str = "NoEmbeddedResource";
/// Code (and error name) for payloads the transport cannot carry.
pub const ERR_DATA_CLONE: &str = "DataCloneError";

/// Errors raised by the message transport.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The payload cannot be carried across the context boundary.
    #[error("Payload could not be transmitted: {reason}")]
    NotTransmissible {
        /// Why the payload was refused.
        reason: String,
    },
    /// The target context does not exist.
    #[error("Unknown target context: {0}")]
    UnknownContext(String),
}

impl TransportError {
    /// Stable error code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotTransmissible { .. } => ERR_DATA_CLONE,
            Self::UnknownContext(_) => "UnknownContext",
        }
    }

    /// Whether this is the non-transmissible-payload condition.
    pub fn is_not_transmissible(&self) -> bool {
        matches!(self, Self::NotTransmissible { .. })
    }
}

/// Errors settling a connection's result.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConnectError {
    /// The connection was destroyed before the handshake completed.
    #[error("Connection destroyed")]
    ConnectionDestroyed,

    /// The handshake did not complete before the connect deadline.
    #[error("Connection to {peer} timed out after {timeout_ms}ms")]
    ConnectionTimeout {
        /// Which side we were waiting for (`"child"` or `"parent"`).
        peer: &'static str,
        /// The configured deadline.
        timeout_ms: u64,
    },

    /// The initiator was started in a context with no addressable parent.
    #[error("connect_to_host() must be called within an embedded context")]
    NotEmbedded,

    /// The embedded resource has neither a locator nor inline content, and
    /// no origin was configured.
    #[error("Embedded resource must have a src or inline content defined")]
    NoEmbeddedResource,

    /// The handshake could not be posted.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl ConnectError {
    /// Stable error code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::ConnectionDestroyed => ERR_CONNECTION_DESTROYED,
            Self::ConnectionTimeout { .. } => ERR_CONNECTION_TIMEOUT,
            Self::NotEmbedded => ERR_NOT_EMBEDDED,
            Self::NoEmbeddedResource => ERR_NO_EMBEDDED_RESOURCE,
            Self::Transport(e) => e.code(),
        }
    }
}

/// Errors settling a single remote call.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CallError {
    /// The call was attempted on, or outlived, a destroyed connection.
    #[error("Unable to send {method}() call due to destroyed connection")]
    ConnectionDestroyed {
        /// The method being called.
        method: String,
    },

    /// The remote never announced a method with this name.
    #[error("Remote does not expose a method named {0}()")]
    UnknownMethod(String),

    /// The remote method rejected with an error.
    #[error("{0}")]
    Remote(ErrorRecord),

    /// The remote method rejected with a plain value.
    #[error("Remote method rejected with {0}")]
    Rejected(Value),

    /// The call message could not be posted.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The reply value did not have the expected shape.
    #[error("Unexpected return value: {0}")]
    InvalidReturn(String),
}

impl CallError {
    /// Stable error code, when the failure has one.
    ///
    /// For remote errors this is the `code` field the method attached.
    pub fn code(&self) -> Option<&str> {
        match self {
            Self::ConnectionDestroyed { .. } => Some(ERR_CONNECTION_DESTROYED),
            Self::Remote(record) => record.code(),
            Self::Transport(e) => Some(e.code()),
            _ => None,
        }
    }

    /// The remote error record, if the remote rejected with an error.
    pub fn remote_error(&self) -> Option<&ErrorRecord> {
        match self {
            Self::Remote(record) => Some(record),
            _ => None,
        }
    }
}
