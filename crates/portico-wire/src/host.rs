//! Initiator side: an embedded context connecting to its host.

use crate::channel::{Listener, MessageChannel, SubscriptionId};
use crate::connection::{Connection, Session};
use crate::endpoint::EndpointInfo;
use crate::message::WireMessage;
use crate::methods::Methods;
use crate::origin::{origin_for_sending, origin_matches};
use portico_types::config::ConnectConfig;
use portico_types::context::{ContextId, Envelope};
use portico_types::error::ConnectError;
use portico_types::ANY_ORIGIN;
use std::sync::{Arc, Mutex};
use std::time::Duration;

const SIDE: &str = "Child";
const PEER: &str = "parent";

/// Options for [`connect_to_host`].
#[derive(Debug, Clone)]
pub struct HostOptions {
    /// Methods exposed to the host.
    pub methods: Methods,
    /// Origin the host must declare; `*` accepts any host.
    pub expected_host_origin: String,
    /// Handshake deadline.
    pub connect_timeout: Option<Duration>,
    /// Emit protocol diagnostics.
    pub debug_logging: bool,
}

impl Default for HostOptions {
    fn default() -> Self {
        Self {
            methods: Methods::new(),
            expected_host_origin: ANY_ORIGIN.to_string(),
            connect_timeout: None,
            debug_logging: false,
        }
    }
}

impl HostOptions {
    /// Options taken from a loaded config, exposing `methods`.
    pub fn from_config(config: &ConnectConfig, methods: Methods) -> Self {
        Self {
            methods,
            expected_host_origin: config
                .expected_origin
                .clone()
                .unwrap_or_else(|| ANY_ORIGIN.to_string()),
            connect_timeout: config.connect_timeout,
            debug_logging: config.debug_logging,
        }
    }
}

struct Initiator {
    session: Arc<Session>,
    channel: Arc<dyn MessageChannel>,
    parent: ContextId,
    expected_origin: String,
    subscription: Mutex<Option<SubscriptionId>>,
}

/// Connect from an embedded context to the host that embeds it.
///
/// Fails immediately with [`ConnectError::NotEmbedded`] when `channel` has
/// no parent, and with [`ConnectError::Transport`] when the handshake cannot
/// be posted. Must be called within a tokio runtime.
pub fn connect_to_host(
    channel: Arc<dyn MessageChannel>,
    options: HostOptions,
) -> Result<Connection, ConnectError> {
    let Some(parent) = channel.parent() else {
        return Err(ConnectError::NotEmbedded);
    };

    let session = Session::new(SIDE, PEER, options.debug_logging, options.methods);
    let connection = session.connection();
    session.arm_timeout(options.connect_timeout);

    let initiator = Arc::new(Initiator {
        session: Arc::clone(&session),
        channel: Arc::clone(&channel),
        parent,
        expected_origin: options.expected_host_origin,
        subscription: Mutex::new(None),
    });

    let weak = Arc::downgrade(&initiator);
    let listener: Listener = Arc::new(move |envelope: &Envelope| {
        if let Some(initiator) = weak.upgrade() {
            initiator.handle_handshake_reply(envelope);
        }
    });
    *initiator
        .subscription
        .lock()
        .unwrap_or_else(|e| e.into_inner()) = Some(channel.subscribe(listener));

    let teardown = Arc::clone(&initiator);
    session.destructor.on_destroy(move || {
        teardown.unsubscribe();
        teardown.session.teardown();
    });

    diag!(session.debug, SIDE, "Sending handshake");
    let handshake = WireMessage::Handshake {
        method_names: session.methods.names(),
    };
    let posted = handshake
        .to_value()
        .and_then(|data| channel.post(parent, data, &initiator.expected_origin));
    if let Err(e) = posted {
        session.destructor.destroy();
        return Err(ConnectError::Transport(e));
    }

    Ok(connection)
}

impl Initiator {
    fn unsubscribe(&self) -> bool {
        let subscription = self
            .subscription
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        match subscription {
            Some(id) => {
                self.channel.unsubscribe(id);
                true
            }
            None => false,
        }
    }

    fn handle_handshake_reply(&self, envelope: &Envelope) {
        let session = &self.session;
        if envelope.source != self.parent {
            return;
        }
        let Some(WireMessage::HandshakeReply { method_names }) =
            WireMessage::from_envelope(envelope)
        else {
            return;
        };
        if !origin_matches(&self.expected_origin, &envelope.origin) {
            diag!(
                session.debug,
                SIDE,
                origin = %envelope.origin,
                expected = %self.expected_origin,
                "Received handshake reply from unexpected origin, ignoring"
            );
            return;
        }
        if session.destructor.is_destroyed() || !self.unsubscribe() {
            return;
        }

        diag!(session.debug, SIDE, "Received handshake reply");
        // From here on the host's concrete origin is required, not the
        // configured expectation.
        let info = EndpointInfo {
            local_name: SIDE,
            channel: Arc::clone(&self.channel),
            remote: self.parent,
            origin_for_sending: origin_for_sending(&envelope.origin).to_string(),
            origin_for_receiving: envelope.origin.clone(),
            debug: session.debug,
        };
        session.install(info, &method_names);
        session.cancel_timeout();
        session.connected();
    }
}
