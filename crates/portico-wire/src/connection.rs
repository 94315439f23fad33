//! The connection handle and the machinery both orchestrators share.
//!
//! A connection settles exactly once: with the remote proxy when the first
//! handshake completes, or with a failure (timeout, destruction). Later
//! handshakes on the responder side update the proxy in place and never
//! re-settle.

use crate::api::RemoteApi;
use crate::destructor::Destructor;
use crate::endpoint::EndpointInfo;
use crate::id::IdGenerator;
use crate::methods::Methods;
use crate::receiver::CallReceiver;
use crate::sender::CallSender;
use portico_types::error::ConnectError;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Lifecycle of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Waiting for the handshake.
    Pending,
    /// Handshake completed; calls flow.
    Connected,
    /// Torn down. Nothing is dispatched, sent, or settled any more.
    Destroyed,
}

type Outcome = Option<Result<RemoteApi, ConnectError>>;

/// Settle-once result cell.
pub(crate) struct Settlement {
    result: watch::Sender<Outcome>,
    state: Mutex<ConnectionState>,
}

impl Settlement {
    fn new() -> Self {
        let (result, _) = watch::channel(None);
        Self {
            result,
            state: Mutex::new(ConnectionState::Pending),
        }
    }

    fn settle(&self, outcome: Result<RemoteApi, ConnectError>) -> bool {
        self.result.send_if_modified(|slot| {
            if slot.is_some() {
                return false;
            }
            *slot = Some(outcome);
            true
        })
    }

    fn set_state(&self, next: ConnectionState) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if *state != ConnectionState::Destroyed {
            *state = next;
        }
    }

    fn state(&self) -> ConnectionState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// A connection to the other side, returned by
/// [`connect_to_embedded`](crate::connect_to_embedded) and
/// [`connect_to_host`](crate::connect_to_host).
///
/// Cloning is cheap; every clone observes the same result and destroys the
/// same connection.
#[derive(Clone)]
pub struct Connection {
    destructor: Arc<Destructor>,
    settlement: Arc<Settlement>,
}

impl Connection {
    /// Wait for the handshake to complete.
    ///
    /// Resolves with the remote proxy, or with the failure that ended the
    /// connection first. Every waiter sees the same outcome.
    pub async fn established(&self) -> Result<RemoteApi, ConnectError> {
        let mut rx = self.settlement.result.subscribe();
        let outcome = match rx.wait_for(Option::is_some).await {
            Ok(outcome) => outcome
                .clone()
                .unwrap_or(Err(ConnectError::ConnectionDestroyed)),
            Err(_) => Err(ConnectError::ConnectionDestroyed),
        };
        outcome
    }

    /// The outcome, if the connection has settled.
    pub fn try_result(&self) -> Option<Result<RemoteApi, ConnectError>> {
        self.settlement.result.borrow().clone()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        self.settlement.state()
    }

    /// Tear the connection down. Idempotent.
    pub fn destroy(&self) {
        self.destructor.destroy();
    }

    /// Whether [`destroy`](Self::destroy) has run, for any reason.
    pub fn is_destroyed(&self) -> bool {
        self.destructor.is_destroyed()
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("state", &self.state())
            .finish()
    }
}

/// The receiver/sender pair of one handshake cycle.
struct RpcPair {
    receiver: CallReceiver,
    sender: CallSender,
}

impl RpcPair {
    fn detach(&self) {
        self.receiver.detach();
        self.sender.detach();
    }
}

/// State shared by an orchestrator's listener, timer and teardown.
pub(crate) struct Session {
    pub(crate) side: &'static str,
    peer: &'static str,
    pub(crate) debug: bool,
    pub(crate) methods: Methods,
    pub(crate) destructor: Arc<Destructor>,
    api: RemoteApi,
    ids: Arc<IdGenerator>,
    settlement: Arc<Settlement>,
    pair: Mutex<Option<RpcPair>>,
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl Session {
    /// `side` labels our diagnostics; `peer` names the other side in
    /// timeout errors.
    pub(crate) fn new(
        side: &'static str,
        peer: &'static str,
        debug: bool,
        methods: Methods,
    ) -> Arc<Self> {
        Arc::new(Self {
            side,
            peer,
            debug,
            methods,
            destructor: Arc::new(Destructor::new()),
            api: RemoteApi::new(),
            ids: Arc::new(IdGenerator::new()),
            settlement: Arc::new(Settlement::new()),
            pair: Mutex::new(None),
            timer: Mutex::new(None),
        })
    }

    pub(crate) fn connection(&self) -> Connection {
        Connection {
            destructor: Arc::clone(&self.destructor),
            settlement: Arc::clone(&self.settlement),
        }
    }

    /// Start the connect deadline, if one is configured.
    pub(crate) fn arm_timeout(self: &Arc<Self>, timeout: Option<Duration>) {
        let Some(timeout) = timeout else {
            return;
        };
        let session = Arc::clone(self);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let error = ConnectError::ConnectionTimeout {
                peer: session.peer,
                timeout_ms: timeout.as_millis() as u64,
            };
            if session.settlement.settle(Err(error)) {
                warn!(
                    side = session.side,
                    timeout_ms = timeout.as_millis() as u64,
                    "Portico: connection to {} timed out",
                    session.peer
                );
                session.destructor.destroy();
            }
        });
        *self.timer.lock().unwrap_or_else(|e| e.into_inner()) = Some(handle);
    }

    pub(crate) fn cancel_timeout(&self) {
        let handle = self.timer.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(handle) = handle {
            handle.abort();
        }
    }

    /// Bind a fresh receiver/sender pair to `info`, replacing any previous
    /// pair and the proxies it installed.
    pub(crate) fn install(&self, info: EndpointInfo, remote_method_names: &[String]) {
        let previous = self.pair.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(previous) = previous {
            diag!(self.debug, self.side, "Replacing previous call receiver and sender");
            previous.detach();
        }

        let receiver = CallReceiver::attach(info.clone(), self.methods.clone());
        let sender = CallSender::attach(
            &self.api,
            info,
            remote_method_names,
            Arc::clone(&self.ids),
            &self.destructor,
        );
        let pair = RpcPair { receiver, sender };

        let mut slot = self.pair.lock().unwrap_or_else(|e| e.into_inner());
        if self.destructor.is_destroyed() {
            // Lost a race with destroy(): never leave a live pair behind.
            pair.detach();
        } else {
            *slot = Some(pair);
        }
    }

    /// Settle with the proxy. No-op after the first settlement.
    pub(crate) fn connected(&self) {
        if self.destructor.is_destroyed() {
            return;
        }
        self.settlement.set_state(ConnectionState::Connected);
        if self.settlement.settle(Ok(self.api.clone())) {
            info!(
                side = self.side,
                methods = ?self.api.method_names(),
                "Portico: connection established"
            );
        }
    }

    /// Release the pair and timer and settle with a destroyed-connection
    /// failure if still pending.
    pub(crate) fn teardown(&self) {
        self.cancel_timeout();
        let pair = self.pair.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(pair) = pair {
            pair.detach();
        }
        self.settlement.settle(Err(ConnectError::ConnectionDestroyed));
        self.settlement.set_state(ConnectionState::Destroyed);
        diag!(self.debug, self.side, "Connection destroyed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_settles_once() {
        let session = Session::new("Parent", "child", false, Methods::new());
        let connection = session.connection();
        assert!(connection.try_result().is_none());
        assert_eq!(connection.state(), ConnectionState::Pending);

        session.connected();
        assert_eq!(connection.state(), ConnectionState::Connected);
        assert!(connection.established().await.is_ok());

        // A later failure does not override the first outcome.
        session.teardown();
        assert!(matches!(connection.try_result(), Some(Ok(_))));
        assert_eq!(connection.state(), ConnectionState::Destroyed);
    }

    #[tokio::test]
    async fn test_teardown_before_connect_rejects() {
        let session = Session::new("Child", "parent", false, Methods::new());
        let connection = session.connection();
        let t = Arc::clone(&session);
        session.destructor.on_destroy(move || t.teardown());

        connection.destroy();
        assert!(connection.is_destroyed());
        assert_eq!(
            connection.established().await.unwrap_err(),
            ConnectError::ConnectionDestroyed
        );
        // Destroyed connections never become connected.
        session.connected();
        assert_eq!(connection.state(), ConnectionState::Destroyed);
    }

    #[tokio::test]
    async fn test_timeout_rejects_and_destroys() {
        let session = Session::new("Parent", "child", false, Methods::new());
        let connection = session.connection();
        session.arm_timeout(Some(Duration::from_millis(100)));

        let started = std::time::Instant::now();
        let err = connection.established().await.unwrap_err();
        assert!(started.elapsed() >= Duration::from_millis(100));
        assert_eq!(err.code(), "ConnectionTimeout");
        assert_eq!(err.to_string(), "Connection to child timed out after 100ms");
        assert!(connection.is_destroyed());
    }

    #[tokio::test]
    async fn test_cancelled_timeout_never_fires() {
        let session = Session::new("Parent", "child", false, Methods::new());
        let connection = session.connection();
        session.arm_timeout(Some(Duration::from_millis(100)));
        session.cancel_timeout();
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert!(connection.try_result().is_none());
        assert!(!connection.is_destroyed());
    }
}
