//! Per-handshake endpoint record.

use crate::channel::MessageChannel;
use crate::message::WireMessage;
use portico_types::context::{ContextId, Envelope};
use portico_types::error::TransportError;
use std::sync::Arc;

/// Who we talk to and how, for one handshake cycle.
///
/// Immutable once built; a new one is created every time a handshake
/// completes.
#[derive(Clone)]
pub struct EndpointInfo {
    /// Side label used in diagnostics (`"Parent"` or `"Child"`).
    pub local_name: &'static str,
    /// The local end of the transport.
    pub channel: Arc<dyn MessageChannel>,
    /// The remote context.
    pub remote: ContextId,
    /// Target origin asserted on every outbound message.
    pub origin_for_sending: String,
    /// Origin every inbound message must declare.
    pub origin_for_receiving: String,
    /// Emit protocol diagnostics.
    pub debug: bool,
}

impl EndpointInfo {
    /// Post a protocol message to the remote.
    pub fn send(&self, message: &WireMessage) -> Result<(), TransportError> {
        let data = message.to_value()?;
        self.channel
            .post(self.remote, data, &self.origin_for_sending)
    }

    /// Whether an envelope was sent by our remote.
    pub fn is_from_remote(&self, envelope: &Envelope) -> bool {
        envelope.source == self.remote
    }

    /// Whether an envelope declares the origin we require.
    pub fn origin_accepted(&self, envelope: &Envelope) -> bool {
        envelope.origin == self.origin_for_receiving
    }
}

impl std::fmt::Debug for EndpointInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EndpointInfo")
            .field("local_name", &self.local_name)
            .field("local", &self.channel.local_id())
            .field("remote", &self.remote)
            .field("origin_for_sending", &self.origin_for_sending)
            .field("origin_for_receiving", &self.origin_for_receiving)
            .finish()
    }
}

/// Whether a call receiver or sender is still bound to its connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachState {
    /// Serving calls and replies.
    Attached,
    /// Torn down; every entry point is a no-op or a destroyed-connection
    /// failure.
    Detached,
}
