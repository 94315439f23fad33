//! The transport seam.
//!
//! The protocol never talks to an event loop directly. It sees one
//! [`MessageChannel`] per local context: a way to post structured data to
//! another context, and a listener table it can subscribe to and
//! unsubscribe from. Delivery is asynchronous and carries no ordering
//! guarantee between unrelated messages.

use crate::origin::DocumentLocation;
use portico_types::context::{ContextId, Envelope};
use portico_types::error::TransportError;
use serde_json::Value;
use std::sync::Arc;

/// A message listener. Invoked once per delivered envelope.
pub type Listener = Arc<dyn Fn(&Envelope) + Send + Sync>;

/// Handle returned by [`MessageChannel::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

/// A local context's view of the transport.
pub trait MessageChannel: Send + Sync + 'static {
    /// This context's identity, as seen by receivers in `Envelope::source`.
    fn local_id(&self) -> ContextId;

    /// Location of this context's document.
    fn location(&self) -> DocumentLocation;

    /// The addressable parent context, or `None` for a top-level context.
    fn parent(&self) -> Option<ContextId>;

    /// Post `data` to `target`.
    ///
    /// The message is delivered only if `target_origin` is `*` or equals the
    /// target's origin; otherwise it is dropped without error. Fails with
    /// [`TransportError::NotTransmissible`] when the payload cannot cross.
    fn post(&self, target: ContextId, data: Value, target_origin: &str)
        -> Result<(), TransportError>;

    /// Add a listener for messages delivered to this context.
    fn subscribe(&self, listener: Listener) -> SubscriptionId;

    /// Remove a listener. Unknown ids are ignored.
    fn unsubscribe(&self, id: SubscriptionId);

    /// Whether `target` is known to be gone.
    fn is_closed(&self, target: ContextId) -> bool;
}

/// The host-side handle to an embedded context (a frame and its resource).
pub trait EmbeddedResource: Send + Sync + 'static {
    /// The embedded context, once its resource has loaded.
    fn context(&self) -> Option<ContextId>;

    /// Locator the resource was loaded from.
    fn src(&self) -> Option<String>;

    /// Whether the resource is inline content rather than a locator.
    fn has_inline_content(&self) -> bool;

    /// Whether the resource is still part of the live context tree.
    fn is_attached(&self) -> bool;
}
