//! Responder side: the host connecting to a context it embeds.
//!
//! The host waits for the embedded context to announce itself with a
//! handshake. Every valid handshake, including ones sent after the embedded
//! context reloads, is answered and rebinds the call receiver and sender.

use crate::channel::{EmbeddedResource, Listener, MessageChannel, SubscriptionId};
use crate::connection::{Connection, Session};
use crate::endpoint::EndpointInfo;
use crate::message::WireMessage;
use crate::methods::Methods;
use crate::origin::{origin_for_sending, origin_matches, resolve_origin};
use portico_types::config::{ConnectConfig, DEFAULT_LIVENESS_INTERVAL_MS};
use portico_types::context::Envelope;
use portico_types::error::ConnectError;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, warn};

const SIDE: &str = "Parent";
const PEER: &str = "child";

/// Options for [`connect_to_embedded`].
#[derive(Debug, Clone)]
pub struct EmbeddedOptions {
    /// Methods exposed to the embedded context.
    pub methods: Methods,
    /// Origin the embedded context must declare. Derived from the embedded
    /// resource's locator when `None`.
    pub expected_origin: Option<String>,
    /// Handshake deadline.
    pub connect_timeout: Option<Duration>,
    /// Emit protocol diagnostics.
    pub debug_logging: bool,
    /// How often to check the embedded resource is still attached.
    pub liveness_interval: Duration,
}

impl Default for EmbeddedOptions {
    fn default() -> Self {
        Self {
            methods: Methods::new(),
            expected_origin: None,
            connect_timeout: None,
            debug_logging: false,
            liveness_interval: Duration::from_millis(DEFAULT_LIVENESS_INTERVAL_MS),
        }
    }
}

impl EmbeddedOptions {
    /// Options taken from a loaded config, exposing `methods`.
    pub fn from_config(config: &ConnectConfig, methods: Methods) -> Self {
        Self {
            methods,
            expected_origin: config.expected_origin.clone(),
            connect_timeout: config.connect_timeout,
            debug_logging: config.debug_logging,
            liveness_interval: config.liveness_interval(),
        }
    }
}

struct Responder {
    session: Arc<Session>,
    channel: Arc<dyn MessageChannel>,
    resource: Arc<dyn EmbeddedResource>,
    expected_origin: String,
    subscription: Mutex<Option<SubscriptionId>>,
    watchdog: Mutex<Option<JoinHandle<()>>>,
}

/// Connect to the context loaded in `resource`.
///
/// Fails immediately with [`ConnectError::NoEmbeddedResource`] if no origin
/// is configured and the resource has neither a locator nor inline content.
/// Everything after that is reported through the returned [`Connection`].
/// Must be called within a tokio runtime.
pub fn connect_to_embedded(
    channel: Arc<dyn MessageChannel>,
    resource: Arc<dyn EmbeddedResource>,
    options: EmbeddedOptions,
) -> Result<Connection, ConnectError> {
    let expected_origin = match options.expected_origin {
        Some(origin) => origin,
        None => {
            let src = resource.src().filter(|s| !s.trim().is_empty());
            if src.is_none() && !resource.has_inline_content() {
                return Err(ConnectError::NoEmbeddedResource);
            }
            resolve_origin(src.as_deref(), &channel.location())
        }
    };

    let session = Session::new(SIDE, PEER, options.debug_logging, options.methods);
    let connection = session.connection();
    session.arm_timeout(options.connect_timeout);

    let responder = Arc::new(Responder {
        session: Arc::clone(&session),
        channel: Arc::clone(&channel),
        resource,
        expected_origin,
        subscription: Mutex::new(None),
        watchdog: Mutex::new(None),
    });

    let weak = Arc::downgrade(&responder);
    let listener: Listener = Arc::new(move |envelope: &Envelope| {
        if let Some(responder) = weak.upgrade() {
            responder.handle_handshake(envelope);
        }
    });
    *responder
        .subscription
        .lock()
        .unwrap_or_else(|e| e.into_inner()) = Some(channel.subscribe(listener));

    // Liveness watchdog: the connection ends once the resource leaves the tree.
    let weak = Arc::downgrade(&responder);
    let period = options.liveness_interval.max(Duration::from_millis(1));
    let watchdog = tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        loop {
            ticker.tick().await;
            let Some(responder) = weak.upgrade() else {
                break;
            };
            if !responder.resource.is_attached() {
                info!(side = SIDE, "Portico: embedded resource detached, destroying connection");
                responder.session.destructor.destroy();
                break;
            }
        }
    });
    *responder.watchdog.lock().unwrap_or_else(|e| e.into_inner()) = Some(watchdog);

    let teardown = Arc::clone(&responder);
    session.destructor.on_destroy(move || teardown.teardown());

    diag!(session.debug, SIDE, origin = %responder.expected_origin, "Awaiting handshake");
    Ok(connection)
}

impl Responder {
    fn handle_handshake(&self, envelope: &Envelope) {
        let session = &self.session;
        let Some(child) = self.resource.context() else {
            return;
        };
        if envelope.source != child {
            return;
        }
        let Some(WireMessage::Handshake { method_names }) = WireMessage::from_envelope(envelope)
        else {
            return;
        };
        if !origin_matches(&self.expected_origin, &envelope.origin) {
            diag!(
                session.debug,
                SIDE,
                origin = %envelope.origin,
                expected = %self.expected_origin,
                "Received handshake from unexpected origin, ignoring"
            );
            return;
        }
        if session.destructor.is_destroyed() {
            return;
        }

        diag!(session.debug, SIDE, "Received handshake, sending reply");
        let info = EndpointInfo {
            local_name: SIDE,
            channel: Arc::clone(&self.channel),
            remote: child,
            origin_for_sending: origin_for_sending(&envelope.origin).to_string(),
            origin_for_receiving: envelope.origin.clone(),
            debug: session.debug,
        };
        let reply = WireMessage::HandshakeReply {
            method_names: session.methods.names(),
        };
        if let Err(e) = info.send(&reply) {
            warn!(side = SIDE, error = %e, "Portico: failed to send handshake reply");
        }

        session.install(info, &method_names);
        session.cancel_timeout();
        session.connected();
    }

    fn teardown(&self) {
        let subscription = self
            .subscription
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(id) = subscription {
            self.channel.unsubscribe(id);
        }
        let watchdog = self.watchdog.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(handle) = watchdog {
            handle.abort();
        }
        self.session.teardown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryBus, MemoryFrame};
    use crate::origin::DocumentLocation;
    use serde_json::json;
    use std::io;

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Captured {
        fn text(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
        }
    }

    /// Connect and complete one handshake with every log line captured.
    async fn handshake_logs(debug_logging: bool) -> String {
        let captured = Captured::default();
        let writer = captured.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let (_bus, host) = host_bus();
        let frame = Arc::new(MemoryFrame::new(&host));
        let child = frame.load("https://child.example/app").unwrap();
        let options = EmbeddedOptions {
            debug_logging,
            ..Default::default()
        };
        let connection = connect_to_embedded(Arc::new(host.clone()), frame, options).unwrap();
        let handshake = WireMessage::Handshake {
            method_names: vec![],
        };
        child
            .post(host.id(), handshake.to_value().unwrap(), "*")
            .unwrap();
        connection.established().await.unwrap();
        connection.destroy();
        captured.text()
    }

    fn host_bus() -> (MemoryBus, crate::memory::MemoryContext) {
        let bus = MemoryBus::new();
        let host = bus.open_top_level(DocumentLocation::new("https", "host.example", None));
        (bus, host)
    }

    #[tokio::test]
    async fn test_requires_src_or_inline_content() {
        let (_bus, host) = host_bus();
        let frame = Arc::new(MemoryFrame::new(&host));
        let err = connect_to_embedded(
            Arc::new(host.clone()),
            frame,
            EmbeddedOptions::default(),
        )
        .unwrap_err();
        assert_eq!(err, ConnectError::NoEmbeddedResource);
        assert_eq!(err.code(), "NoEmbeddedResource");
    }

    #[tokio::test]
    async fn test_explicit_origin_skips_resource_check() {
        let (_bus, host) = host_bus();
        let frame = Arc::new(MemoryFrame::new(&host));
        let options = EmbeddedOptions {
            expected_origin: Some("https://child.example".into()),
            ..Default::default()
        };
        let connection = connect_to_embedded(Arc::new(host.clone()), frame, options).unwrap();
        assert!(connection.try_result().is_none());
        assert_eq!(host.listener_count(), 1);
        connection.destroy();
        assert_eq!(host.listener_count(), 0);
    }

    #[tokio::test]
    async fn test_handshake_from_expected_origin_connects() {
        let (_bus, host) = host_bus();
        let frame = Arc::new(MemoryFrame::new(&host));
        let child = frame.load("https://child.example/app").unwrap();
        let options = EmbeddedOptions {
            methods: Methods::new().raw("ping", |_| async { Ok(json!("pong")) }),
            ..Default::default()
        };
        let connection =
            connect_to_embedded(Arc::new(host.clone()), frame.clone(), options).unwrap();

        let handshake = WireMessage::Handshake {
            method_names: vec!["greet".into()],
        };
        child
            .post(host.id(), handshake.to_value().unwrap(), "https://host.example")
            .unwrap();
        let api = connection.established().await.unwrap();
        assert_eq!(api.method_names(), vec!["greet"]);
        connection.destroy();
    }

    #[tokio::test]
    async fn test_destroy_before_handshake_rejects() {
        let (_bus, host) = host_bus();
        let frame = Arc::new(MemoryFrame::new(&host));
        frame.load("https://child.example").unwrap();
        let connection =
            connect_to_embedded(Arc::new(host.clone()), frame, EmbeddedOptions::default()).unwrap();
        let waiter = {
            let connection = connection.clone();
            tokio::spawn(async move { connection.established().await })
        };
        connection.destroy();
        assert_eq!(
            waiter.await.unwrap().unwrap_err(),
            ConnectError::ConnectionDestroyed
        );
    }

    #[tokio::test]
    async fn test_diagnostics_follow_debug_flag() {
        let quiet = handshake_logs(false).await;
        assert!(!quiet.contains("Received handshake"));
        assert!(!quiet.contains("Awaiting handshake"));
        // Lifecycle events are logged regardless.
        assert!(quiet.contains("Portico: connection established"));

        let verbose = handshake_logs(true).await;
        assert!(verbose.contains("Awaiting handshake"));
        assert!(verbose.contains("Received handshake, sending reply"));
        assert!(verbose.contains("side=\"Parent\""));
    }
}
