//! Call sender: proxies for the remote's methods.
//!
//! One listener per sender matches every reply against the table of pending
//! calls by correlation id, so concurrent calls answered out of order never
//! cross-resolve.

use crate::api::RemoteApi;
use crate::channel::{Listener, SubscriptionId};
use crate::codec::decode_rejection;
use crate::destructor::Destructor;
use crate::endpoint::{AttachState, EndpointInfo};
use crate::id::IdGenerator;
use crate::message::{Resolution, WireMessage};
use dashmap::DashMap;
use portico_types::context::Envelope;
use portico_types::error::CallError;
use serde_json::Value;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, Weak};
use std::task::{Context, Poll};
use tokio::sync::oneshot;

type ReplySender = oneshot::Sender<Result<Value, CallError>>;

struct PendingCall {
    method_name: String,
    reply: ReplySender,
}

pub(crate) struct SenderInner {
    info: EndpointInfo,
    ids: Arc<IdGenerator>,
    pending: DashMap<u64, PendingCall>,
    state: Mutex<AttachState>,
    subscription: Mutex<Option<SubscriptionId>>,
    destroy: Weak<Destructor>,
}

/// The outbound half of one handshake cycle.
pub struct CallSender {
    inner: Arc<SenderInner>,
}

impl CallSender {
    /// Install one proxy per name in `method_names` on `api`, replacing
    /// whatever proxies it held.
    ///
    /// When a proxy finds the remote gone it runs `destroy`, so the caller
    /// sees a destroyed connection instead of waiting forever.
    pub fn attach(
        api: &RemoteApi,
        info: EndpointInfo,
        method_names: &[String],
        ids: Arc<IdGenerator>,
        destroy: &Arc<Destructor>,
    ) -> Self {
        diag!(info.debug, info.local_name, "Connecting call sender");
        let inner = Arc::new(SenderInner {
            info,
            ids,
            pending: DashMap::new(),
            state: Mutex::new(AttachState::Attached),
            subscription: Mutex::new(None),
            destroy: Arc::downgrade(destroy),
        });

        let weak = Arc::downgrade(&inner);
        let listener: Listener = Arc::new(move |envelope: &Envelope| {
            if let Some(inner) = weak.upgrade() {
                inner.handle(envelope);
            }
        });
        let id = inner.info.channel.subscribe(listener);
        *inner
            .subscription
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(id);

        api.replace(
            method_names
                .iter()
                .map(|name| (name.clone(), MethodProxy::new(name.clone(), &inner))),
        );

        Self { inner }
    }

    /// Stop accepting calls and reject every call still awaiting a reply.
    pub fn detach(&self) {
        self.inner.detach();
    }

    /// Current attachment state.
    pub fn state(&self) -> AttachState {
        self.inner.state()
    }

    /// Number of calls awaiting a reply.
    pub fn pending_count(&self) -> usize {
        self.inner.pending.len()
    }
}

impl Drop for CallSender {
    fn drop(&mut self) {
        self.inner.detach();
    }
}

impl SenderInner {
    fn state(&self) -> AttachState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn detach(&self) {
        {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            if *state == AttachState::Detached {
                return;
            }
            *state = AttachState::Detached;
        }
        let subscription = self
            .subscription
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(id) = subscription {
            self.info.channel.unsubscribe(id);
        }

        // No call can register or post once the state says Detached.
        let ids: Vec<u64> = self.pending.iter().map(|entry| *entry.key()).collect();
        for id in ids {
            if let Some((_, call)) = self.pending.remove(&id) {
                let _ = call.reply.send(Err(CallError::ConnectionDestroyed {
                    method: call.method_name,
                }));
            }
        }
    }

    fn handle(&self, envelope: &Envelope) {
        let info = &self.info;
        if !info.is_from_remote(envelope) {
            return;
        }
        let Some(WireMessage::Reply {
            id,
            resolution,
            return_value,
            return_value_is_error,
        }) = WireMessage::from_envelope(envelope)
        else {
            return;
        };
        if !self.pending.contains_key(&id) {
            diag!(info.debug, info.local_name, id, "Ignoring reply for unknown call id");
            return;
        }
        if !info.origin_accepted(envelope) {
            diag!(
                info.debug,
                info.local_name,
                origin = %envelope.origin,
                expected = %info.origin_for_receiving,
                "Received reply from unexpected origin, ignoring"
            );
            return;
        }
        let Some((_, call)) = self.pending.remove(&id) else {
            return;
        };

        diag!(info.debug, info.local_name, method = %call.method_name, id, "Received reply");
        let result = match resolution {
            Resolution::Fulfilled => Ok(return_value),
            Resolution::Rejected => Err(decode_rejection(return_value, return_value_is_error)),
        };
        let _ = call.reply.send(result);
    }

    fn call(&self, method_name: &str, args: Vec<Value>) -> ReplyFuture {
        let info = &self.info;
        if info.channel.is_closed(info.remote) {
            if let Some(destructor) = self.destroy.upgrade() {
                destructor.destroy();
            }
        }

        let (tx, rx) = oneshot::channel();
        // Held across the post: a detach never lands between check and send.
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if *state == AttachState::Detached {
            drop(state);
            return ReplyFuture::failed(
                method_name,
                CallError::ConnectionDestroyed {
                    method: method_name.to_string(),
                },
            );
        }
        let id = self.ids.next_id();
        self.pending.insert(
            id,
            PendingCall {
                method_name: method_name.to_string(),
                reply: tx,
            },
        );

        diag!(info.debug, info.local_name, method = %method_name, id, "Sending call");
        let message = WireMessage::Call {
            id,
            method_name: method_name.to_string(),
            args,
        };
        let sent = info.send(&message);
        drop(state);
        if let Err(e) = sent {
            self.pending.remove(&id);
            return ReplyFuture::failed(method_name, CallError::Transport(e));
        }
        ReplyFuture::new(method_name, rx)
    }
}

/// A callable stand-in for one remote method.
#[derive(Clone)]
pub struct MethodProxy {
    name: String,
    inner: Arc<SenderInner>,
}

impl MethodProxy {
    fn new(name: String, inner: &Arc<SenderInner>) -> Self {
        Self {
            name,
            inner: Arc::clone(inner),
        }
    }

    /// The remote method's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Call the remote method with positional arguments.
    ///
    /// The call message is sent before this returns; the future settles when
    /// the matching reply arrives or the connection goes away.
    pub fn call(&self, args: Vec<Value>) -> ReplyFuture {
        self.inner.call(&self.name, args)
    }
}

impl std::fmt::Debug for MethodProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MethodProxy").field("name", &self.name).finish()
    }
}

/// Future resolving to the result of one remote call.
pub struct ReplyFuture {
    method_name: String,
    rx: oneshot::Receiver<Result<Value, CallError>>,
}

impl ReplyFuture {
    fn new(method_name: &str, rx: oneshot::Receiver<Result<Value, CallError>>) -> Self {
        Self {
            method_name: method_name.to_string(),
            rx,
        }
    }

    /// A future that is already settled with `error`.
    pub(crate) fn failed(method_name: &str, error: CallError) -> Self {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(Err(error));
        Self::new(method_name, rx)
    }
}

impl Future for ReplyFuture {
    type Output = Result<Value, CallError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            // The pending entry was dropped without an answer.
            Poll::Ready(Err(_)) => Poll::Ready(Err(CallError::ConnectionDestroyed {
                method: self.method_name.clone(),
            })),
            Poll::Pending => Poll::Pending,
        }
    }
}
