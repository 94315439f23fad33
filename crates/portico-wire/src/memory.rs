//! In-process message transport.
//!
//! The [`MemoryBus`] models a tree of isolated contexts living in one
//! process. Each context owns a queue drained by its own tokio task, which
//! plays the role of that context's event loop: posting never runs a
//! listener inline, and listeners always run one message at a time.
//!
//! The transport, not the sender, stamps every envelope with the sender's
//! origin, and a message whose target origin does not match the receiver is
//! dropped, so origin authentication can be exercised for real.

use crate::channel::{EmbeddedResource, Listener, MessageChannel, SubscriptionId};
use crate::origin::{resolve_origin, DocumentLocation};
use dashmap::{DashMap, DashSet};
use portico_types::config::{ConnectConfig, DEFAULT_MAX_MESSAGE_BYTES};
use portico_types::context::{ContextId, Envelope};
use portico_types::error::TransportError;
use portico_types::ANY_ORIGIN;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock, Weak};
use tokio::sync::mpsc;
use tracing::{debug, trace};

struct ContextSlot {
    origin: String,
    location: DocumentLocation,
    parent: Option<ContextId>,
    listeners: RwLock<Vec<(SubscriptionId, Listener)>>,
    queue: mpsc::UnboundedSender<Envelope>,
    closed: AtomicBool,
}

impl ContextSlot {
    fn is_subscribed(&self, id: SubscriptionId) -> bool {
        self.listeners
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .any(|(sid, _)| *sid == id)
    }

    fn dispatch(&self, envelope: &Envelope) {
        // Listeners may subscribe or unsubscribe while we iterate.
        let snapshot: Vec<(SubscriptionId, Listener)> = self
            .listeners
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        for (id, listener) in snapshot {
            if self.closed.load(Ordering::SeqCst) {
                return;
            }
            if self.is_subscribed(id) {
                listener(envelope);
            }
        }
    }
}

struct BusInner {
    contexts: DashMap<ContextId, Arc<ContextSlot>>,
    closed: DashSet<ContextId>,
    max_message_bytes: usize,
    next_subscription: AtomicU64,
}

/// An in-process tree of contexts.
///
/// Contexts must be opened from within a tokio runtime: each one spawns the
/// task that delivers its messages.
#[derive(Clone)]
pub struct MemoryBus {
    inner: Arc<BusInner>,
}

impl MemoryBus {
    /// Create a bus with the default payload limit.
    pub fn new() -> Self {
        Self::with_max_message_bytes(DEFAULT_MAX_MESSAGE_BYTES)
    }

    /// Create a bus that refuses payloads larger than `max_message_bytes`
    /// once serialized.
    pub fn with_max_message_bytes(max_message_bytes: usize) -> Self {
        Self {
            inner: Arc::new(BusInner {
                contexts: DashMap::new(),
                closed: DashSet::new(),
                max_message_bytes,
                next_subscription: AtomicU64::new(1),
            }),
        }
    }

    /// Create a bus configured from a [`ConnectConfig`].
    pub fn from_config(config: &ConnectConfig) -> Self {
        Self::with_max_message_bytes(config.max_message_bytes)
    }

    /// Open a top-level context whose origin is its location's origin.
    pub fn open_top_level(&self, location: DocumentLocation) -> MemoryContext {
        let origin = location.origin();
        self.open_context(None, location, origin)
    }

    /// Open a context with an explicit parent and origin.
    pub fn open_context(
        &self,
        parent: Option<ContextId>,
        location: DocumentLocation,
        origin: impl Into<String>,
    ) -> MemoryContext {
        let id = ContextId::new();
        let slot = Self::spawn_slot(parent, location, origin.into());
        debug!(context = %id, origin = %slot.origin, "Memory bus: opened context");
        self.inner.contexts.insert(id, slot);
        MemoryContext {
            bus: self.clone(),
            id,
        }
    }

    /// Load a new document into an existing context.
    ///
    /// The context keeps its identity and parent. Its origin and location
    /// change, every listener is dropped, and messages still queued for the
    /// previous document are discarded.
    pub fn navigate(
        &self,
        id: ContextId,
        location: DocumentLocation,
        origin: impl Into<String>,
    ) -> Result<(), TransportError> {
        let previous = self.slot(id)?;
        let slot = Self::spawn_slot(previous.parent, location, origin.into());
        debug!(context = %id, origin = %slot.origin, "Memory bus: navigated context");
        self.inner.contexts.insert(id, slot);
        previous.closed.store(true, Ordering::SeqCst);
        previous
            .listeners
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
        Ok(())
    }

    fn spawn_slot(
        parent: Option<ContextId>,
        location: DocumentLocation,
        origin: String,
    ) -> Arc<ContextSlot> {
        let (tx, mut rx) = mpsc::unbounded_channel::<Envelope>();
        let slot = Arc::new(ContextSlot {
            origin,
            location,
            parent,
            listeners: RwLock::new(Vec::new()),
            queue: tx,
            closed: AtomicBool::new(false),
        });

        let weak: Weak<ContextSlot> = Arc::downgrade(&slot);
        tokio::spawn(async move {
            while let Some(envelope) = rx.recv().await {
                let Some(slot) = weak.upgrade() else {
                    break;
                };
                if slot.closed.load(Ordering::SeqCst) {
                    break;
                }
                slot.dispatch(&envelope);
            }
        });
        slot
    }

    /// Close a context: it stops receiving and its listeners are dropped.
    pub fn close(&self, id: ContextId) {
        if let Some((_, slot)) = self.inner.contexts.remove(&id) {
            self.inner.closed.insert(id);
            slot.closed.store(true, Ordering::SeqCst);
            slot.listeners
                .write()
                .unwrap_or_else(|e| e.into_inner())
                .clear();
            debug!(context = %id, "Memory bus: closed context");
        }
    }

    /// Deliver an envelope exactly as given, bypassing origin stamping.
    ///
    /// Lets tests impersonate a context declaring a different origin.
    pub fn inject(&self, target: ContextId, envelope: Envelope) -> Result<(), TransportError> {
        if self.inner.closed.contains(&target) {
            return Ok(());
        }
        let slot = self.slot(target)?;
        if !slot.closed.load(Ordering::SeqCst) {
            let _ = slot.queue.send(envelope);
        }
        Ok(())
    }

    /// Number of live contexts.
    pub fn context_count(&self) -> usize {
        self.inner.contexts.len()
    }

    fn slot(&self, id: ContextId) -> Result<Arc<ContextSlot>, TransportError> {
        self.inner
            .contexts
            .get(&id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| TransportError::UnknownContext(id.to_string()))
    }
}

impl Default for MemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

/// One context on a [`MemoryBus`].
#[derive(Clone)]
pub struct MemoryContext {
    bus: MemoryBus,
    id: ContextId,
}

impl MemoryContext {
    /// This context's identity.
    pub fn id(&self) -> ContextId {
        self.id
    }

    /// The origin the transport stamps on this context's messages.
    pub fn origin(&self) -> Option<String> {
        self.bus.slot(self.id).ok().map(|slot| slot.origin.clone())
    }

    /// The bus this context lives on.
    pub fn bus(&self) -> &MemoryBus {
        &self.bus
    }

    /// Drop every listener, as a document does when it navigates.
    pub fn reload(&self) {
        if let Ok(slot) = self.bus.slot(self.id) {
            slot.listeners
                .write()
                .unwrap_or_else(|e| e.into_inner())
                .clear();
        }
    }

    /// Number of listeners currently subscribed.
    pub fn listener_count(&self) -> usize {
        self.bus
            .slot(self.id)
            .map(|slot| slot.listeners.read().unwrap_or_else(|e| e.into_inner()).len())
            .unwrap_or(0)
    }

    /// Close this context.
    pub fn close(&self) {
        self.bus.close(self.id);
    }
}

impl MessageChannel for MemoryContext {
    fn local_id(&self) -> ContextId {
        self.id
    }

    fn location(&self) -> DocumentLocation {
        match self.bus.slot(self.id) {
            Ok(slot) => slot.location.clone(),
            Err(_) => DocumentLocation::new("about", "blank", None),
        }
    }

    fn parent(&self) -> Option<ContextId> {
        self.bus.slot(self.id).ok().and_then(|slot| slot.parent)
    }

    fn post(
        &self,
        target: ContextId,
        data: Value,
        target_origin: &str,
    ) -> Result<(), TransportError> {
        let size = serde_json::to_vec(&data)
            .map_err(|e| TransportError::NotTransmissible {
                reason: e.to_string(),
            })?
            .len();
        if size > self.bus.inner.max_message_bytes {
            return Err(TransportError::NotTransmissible {
                reason: format!(
                    "payload of {size} bytes exceeds the {} byte limit",
                    self.bus.inner.max_message_bytes
                ),
            });
        }

        let closed = &self.bus.inner.closed;
        if closed.contains(&self.id) || closed.contains(&target) {
            return Ok(());
        }
        let sender = self.bus.slot(self.id)?;
        let receiver = self.bus.slot(target)?;
        if target_origin != ANY_ORIGIN && target_origin != receiver.origin {
            trace!(
                target_origin,
                actual = %receiver.origin,
                "Memory bus: dropped message for mismatched target origin"
            );
            return Ok(());
        }

        let _ = receiver
            .queue
            .send(Envelope::new(self.id, sender.origin.clone(), data));
        Ok(())
    }

    fn subscribe(&self, listener: Listener) -> SubscriptionId {
        let id = SubscriptionId(
            self.bus
                .inner
                .next_subscription
                .fetch_add(1, Ordering::Relaxed),
        );
        if let Ok(slot) = self.bus.slot(self.id) {
            slot.listeners
                .write()
                .unwrap_or_else(|e| e.into_inner())
                .push((id, listener));
        }
        id
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        if let Ok(slot) = self.bus.slot(self.id) {
            slot.listeners
                .write()
                .unwrap_or_else(|e| e.into_inner())
                .retain(|(sid, _)| *sid != id);
        }
    }

    fn is_closed(&self, target: ContextId) -> bool {
        self.bus.inner.closed.contains(&target) || !self.bus.inner.contexts.contains_key(&target)
    }
}

impl std::fmt::Debug for MemoryContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryContext")
            .field("id", &self.id)
            .field("origin", &self.origin())
            .finish()
    }
}

#[derive(Default)]
struct FrameState {
    context: Option<ContextId>,
    src: Option<String>,
    inline: bool,
}

/// A frame element hosted by a parent context, implementing
/// [`EmbeddedResource`].
pub struct MemoryFrame {
    bus: MemoryBus,
    parent: ContextId,
    state: RwLock<FrameState>,
    attached: AtomicBool,
}

impl MemoryFrame {
    /// Create an empty frame inside `parent`.
    pub fn new(parent: &MemoryContext) -> Self {
        Self {
            bus: parent.bus.clone(),
            parent: parent.id,
            state: RwLock::new(FrameState::default()),
            attached: AtomicBool::new(true),
        }
    }

    /// Load a resource from a locator.
    ///
    /// A frame that already holds a context navigates it in place: the
    /// embedded context keeps its identity, takes the new origin, and loses
    /// every listener its previous document registered.
    pub fn load(&self, src: &str) -> Result<MemoryContext, TransportError> {
        let parent_location = self.bus.slot(self.parent)?.location.clone();
        let origin = resolve_origin(Some(src), &parent_location);
        let location = DocumentLocation::parse(src).unwrap_or(parent_location);
        self.show(location, origin, Some(src.to_string()), false)
    }

    /// Load inline content, which shares the parent's origin.
    pub fn load_inline(&self) -> Result<MemoryContext, TransportError> {
        let parent = self.bus.slot(self.parent)?;
        self.show(parent.location.clone(), parent.origin.clone(), None, true)
    }

    /// Remove the frame from its document, closing the embedded context.
    pub fn detach(&self) {
        self.attached.store(false, Ordering::SeqCst);
        let context = self
            .state
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .context
            .take();
        if let Some(id) = context {
            self.bus.close(id);
        }
    }

    fn show(
        &self,
        location: DocumentLocation,
        origin: String,
        src: Option<String>,
        inline: bool,
    ) -> Result<MemoryContext, TransportError> {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        let id = match state.context {
            Some(id) if self.bus.inner.contexts.contains_key(&id) => {
                self.bus.navigate(id, location, origin)?;
                id
            }
            _ => self.bus.open_context(Some(self.parent), location, origin).id,
        };
        state.context = Some(id);
        state.src = src;
        state.inline = inline;
        Ok(MemoryContext {
            bus: self.bus.clone(),
            id,
        })
    }
}

impl EmbeddedResource for MemoryFrame {
    fn context(&self) -> Option<ContextId> {
        self.state.read().unwrap_or_else(|e| e.into_inner()).context
    }

    fn src(&self) -> Option<String> {
        self.state
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .src
            .clone()
    }

    fn has_inline_content(&self) -> bool {
        self.state.read().unwrap_or_else(|e| e.into_inner()).inline
    }

    fn is_attached(&self) -> bool {
        self.attached.load(Ordering::SeqCst)
    }
}
