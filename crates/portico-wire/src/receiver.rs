//! Call receiver: serves local methods to the remote.

use crate::channel::{Listener, SubscriptionId};
use crate::codec::{encode_rejection, panic_record, serialize_transport_error};
use crate::endpoint::{AttachState, EndpointInfo};
use crate::message::{Resolution, WireMessage};
use crate::methods::{MethodResult, Methods};
use futures::future::{self, BoxFuture};
use futures::FutureExt;
use portico_types::context::Envelope;
use portico_types::record::Rejection;
use serde_json::Value;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};
use tracing::warn;

struct ReceiverInner {
    info: EndpointInfo,
    methods: Methods,
    state: Mutex<AttachState>,
    subscription: Mutex<Option<SubscriptionId>>,
}

/// Dispatches inbound calls from one remote to the local method registry.
pub struct CallReceiver {
    inner: Arc<ReceiverInner>,
}

impl CallReceiver {
    /// Start listening for calls described by `info`.
    ///
    /// Must be called within a tokio runtime; each call runs on its own task.
    pub fn attach(info: EndpointInfo, methods: Methods) -> Self {
        diag!(info.debug, info.local_name, "Connecting call receiver");
        let inner = Arc::new(ReceiverInner {
            info,
            methods,
            state: Mutex::new(AttachState::Attached),
            subscription: Mutex::new(None),
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

        Self { inner }
    }

    /// Stop listening. Replies to calls still running are swallowed.
    pub fn detach(&self) {
        self.inner.detach();
    }

    /// Current attachment state.
    pub fn state(&self) -> AttachState {
        self.inner.state()
    }
}

impl Drop for CallReceiver {
    fn drop(&mut self) {
        self.inner.detach();
    }
}

impl ReceiverInner {
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
    }

    fn handle(self: Arc<Self>, envelope: &Envelope) {
        let info = &self.info;
        if !info.is_from_remote(envelope) {
            return;
        }
        let Some(WireMessage::Call {
            id,
            method_name,
            args,
        }) = WireMessage::from_envelope(envelope)
        else {
            return;
        };
        if !info.origin_accepted(envelope) {
            diag!(
                info.debug,
                info.local_name,
                origin = %envelope.origin,
                expected = %info.origin_for_receiving,
                "Received call from unexpected origin, ignoring"
            );
            return;
        }
        if self.state() == AttachState::Detached {
            return;
        }

        diag!(info.debug, info.local_name, method = %method_name, id, "Received call");
        let invocation = self.invoke(&method_name, args);
        tokio::spawn(async move {
            let result = match AssertUnwindSafe(invocation).catch_unwind().await {
                Ok(result) => result,
                Err(payload) => Err(Rejection::Error(panic_record(payload))),
            };
            self.reply(id, &method_name, result);
        });
    }

    fn invoke(&self, method_name: &str, args: Vec<Value>) -> BoxFuture<'static, MethodResult> {
        let Some(method) = self.methods.get(method_name) else {
            return future::ready(Err(Rejection::error(
                "TypeError",
                format!("{method_name} is not a function"),
            )))
            .boxed();
        };
        // A method may panic before it ever returns a future.
        match std::panic::catch_unwind(AssertUnwindSafe(|| method(args))) {
            Ok(invocation) => invocation,
            Err(payload) => future::ready(Err(Rejection::Error(panic_record(payload)))).boxed(),
        }
    }

    fn reply(&self, id: u64, method_name: &str, result: MethodResult) {
        let info = &self.info;
        if self.state() == AttachState::Detached {
            diag!(
                info.debug,
                info.local_name,
                method = %method_name,
                "Unable to send reply due to destroyed connection"
            );
            return;
        }

        let message = match result {
            Ok(return_value) => WireMessage::Reply {
                id,
                resolution: Resolution::Fulfilled,
                return_value,
                return_value_is_error: false,
            },
            Err(rejection) => {
                let (return_value, return_value_is_error) = encode_rejection(rejection);
                WireMessage::Reply {
                    id,
                    resolution: Resolution::Rejected,
                    return_value,
                    return_value_is_error,
                }
            }
        };

        diag!(info.debug, info.local_name, method = %method_name, id, "Sending reply");
        match info.send(&message) {
            Ok(()) => {}
            Err(e) if e.is_not_transmissible() => {
                // The caller must still settle: report the send failure itself.
                let (return_value, return_value_is_error) =
                    encode_rejection(Rejection::Error(serialize_transport_error(&e)));
                let fallback = WireMessage::Reply {
                    id,
                    resolution: Resolution::Rejected,
                    return_value,
                    return_value_is_error,
                };
                if let Err(retry) = info.send(&fallback) {
                    warn!(
                        side = info.local_name,
                        method = %method_name,
                        error = %retry,
                        "Portico: failed to report untransmissible reply"
                    );
                }
            }
            Err(e) => {
                warn!(
                    side = info.local_name,
                    method = %method_name,
                    error = %e,
                    "Portico: failed to send reply"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::MessageChannel;
    use crate::memory::{MemoryBus, MemoryContext, MemoryFrame};
    use crate::origin::DocumentLocation;
    use portico_types::record::ErrorRecord;
    use serde_json::json;
    use std::time::Duration;
    use tokio::sync::mpsc;

    struct Harness {
        host: MemoryContext,
        child: MemoryContext,
        replies: mpsc::UnboundedReceiver<Envelope>,
        _frame: MemoryFrame,
    }

    fn harness(bus: MemoryBus) -> Harness {
        let host = bus.open_top_level(DocumentLocation::new("https", "host.example", None));
        let frame = MemoryFrame::new(&host);
        let child = frame.load("https://child.example").unwrap();
        let (tx, replies) = mpsc::unbounded_channel();
        host.subscribe(Arc::new(move |env: &Envelope| {
            let _ = tx.send(env.clone());
        }));
        Harness {
            host,
            child,
            replies,
            _frame: frame,
        }
    }

    fn child_info(h: &Harness) -> EndpointInfo {
        EndpointInfo {
            local_name: "Child",
            channel: Arc::new(h.child.clone()),
            remote: h.host.id(),
            origin_for_sending: "https://host.example".into(),
            origin_for_receiving: "https://host.example".into(),
            debug: true,
        }
    }

    fn explode() -> MethodResult {
        panic!("boom")
    }

    fn methods() -> Methods {
        Methods::new()
            .method("add", |(a, b): (i64, i64)| async move { Ok(a + b) })
            .raw("fail", |_| async {
                Err(Rejection::Error(
                    ErrorRecord::new("RangeError", "too big").with_field("code", "E_BIG"),
                ))
            })
            .raw("explode", |_| async { explode() })
            .raw("huge", |_| async { Ok(json!("x".repeat(4096))) })
    }

    fn call(h: &Harness, id: u64, method: &str, args: Value) {
        let msg = WireMessage::Call {
            id,
            method_name: method.into(),
            args: args.as_array().cloned().unwrap_or_default(),
        };
        h.host
            .post(h.child.id(), msg.to_value().unwrap(), "*")
            .unwrap();
    }

    async fn next_reply(h: &mut Harness) -> WireMessage {
        let env = tokio::time::timeout(Duration::from_secs(1), h.replies.recv())
            .await
            .expect("no reply")
            .expect("closed");
        WireMessage::from_envelope(&env).expect("not a protocol message")
    }

    #[tokio::test]
    async fn test_fulfilled_reply() {
        let mut h = harness(MemoryBus::new());
        let _receiver = CallReceiver::attach(child_info(&h), methods());
        call(&h, 1, "add", json!([2, 3]));
        assert_eq!(
            next_reply(&mut h).await,
            WireMessage::Reply {
                id: 1,
                resolution: Resolution::Fulfilled,
                return_value: json!(5),
                return_value_is_error: false,
            }
        );
    }

    #[tokio::test]
    async fn test_rejected_reply_carries_error_record() {
        let mut h = harness(MemoryBus::new());
        let _receiver = CallReceiver::attach(child_info(&h), methods());
        call(&h, 9, "fail", json!([]));
        match next_reply(&mut h).await {
            WireMessage::Reply {
                id,
                resolution,
                return_value,
                return_value_is_error,
            } => {
                assert_eq!(id, 9);
                assert_eq!(resolution, Resolution::Rejected);
                assert!(return_value_is_error);
                assert_eq!(return_value["name"], "RangeError");
                assert_eq!(return_value["code"], "E_BIG");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_panic_and_unknown_method_reject() {
        let mut h = harness(MemoryBus::new());
        let _receiver = CallReceiver::attach(child_info(&h), methods());

        call(&h, 1, "explode", json!([]));
        match next_reply(&mut h).await {
            WireMessage::Reply { return_value, .. } => {
                assert_eq!(return_value["name"], "Panic");
                assert_eq!(return_value["message"], "boom");
            }
            other => panic!("unexpected {other:?}"),
        }

        call(&h, 2, "missing", json!([]));
        match next_reply(&mut h).await {
            WireMessage::Reply {
                resolution,
                return_value,
                ..
            } => {
                assert_eq!(resolution, Resolution::Rejected);
                assert_eq!(return_value["message"], "missing is not a function");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_untransmissible_return_becomes_rejection() {
        let mut h = harness(MemoryBus::with_max_message_bytes(1024));
        let _receiver = CallReceiver::attach(child_info(&h), methods());
        call(&h, 4, "huge", json!([]));
        match next_reply(&mut h).await {
            WireMessage::Reply {
                id,
                resolution,
                return_value,
                return_value_is_error,
            } => {
                assert_eq!(id, 4);
                assert_eq!(resolution, Resolution::Rejected);
                assert!(return_value_is_error);
                assert_eq!(return_value["name"], "DataCloneError");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_wrong_origin_or_sender_is_ignored() {
        let mut h = harness(MemoryBus::new());
        let mut info = child_info(&h);
        info.origin_for_receiving = "https://other.example".into();
        let _receiver = CallReceiver::attach(info, methods());
        call(&h, 1, "add", json!([1, 1]));
        assert!(
            tokio::time::timeout(Duration::from_millis(50), h.replies.recv())
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn test_detach_unsubscribes_and_swallows() {
        let mut h = harness(MemoryBus::new());
        let receiver = CallReceiver::attach(child_info(&h), methods());
        assert_eq!(h.child.listener_count(), 1);
        receiver.detach();
        assert_eq!(receiver.state(), AttachState::Detached);
        assert_eq!(h.child.listener_count(), 0);

        call(&h, 1, "add", json!([1, 1]));
        assert!(
            tokio::time::timeout(Duration::from_millis(50), h.replies.recv())
                .await
                .is_err()
        );
    }
}
