//! Portico protocol: RPC between a host context and a context it embeds.
//!
//! Two isolated contexts that can only exchange structured messages agree on
//! a handshake, then each exposes a set of named async methods the other can
//! call as if they were local.
//!
//! ## Architecture
//!
//! - **MessageChannel**: the transport seam (post, subscribe, unsubscribe)
//! - **MemoryBus**: in-process transport with per-context origins
//! - **connect_to_embedded** / **connect_to_host**: the two orchestrators
//! - **CallReceiver** / **CallSender**: serve local methods, proxy remote ones
//! - **RemoteApi**: the proxy object handed to callers
//! - **Destructor**: ordered, idempotent teardown

/// Protocol diagnostics, emitted only when the connection has debug logging on.
macro_rules! diag {
    ($enabled:expr, $side:expr, $($arg:tt)+) => {
        if $enabled {
            tracing::debug!(side = $side, $($arg)+);
        }
    };
}

pub mod api;
pub mod channel;
pub mod codec;
pub mod config;
pub mod connection;
pub mod destructor;
pub mod embedded;
pub mod endpoint;
pub mod host;
pub mod id;
pub mod memory;
pub mod message;
pub mod methods;
pub mod origin;
pub mod receiver;
pub mod sender;

pub use api::{MethodProxy, RemoteApi};
pub use channel::{EmbeddedResource, Listener, MessageChannel, SubscriptionId};
pub use config::{default_config_path, load_config, portico_home};
pub use connection::{Connection, ConnectionState};
pub use destructor::Destructor;
pub use embedded::{connect_to_embedded, EmbeddedOptions};
pub use host::{connect_to_host, HostOptions};
pub use memory::{MemoryBus, MemoryContext, MemoryFrame};
pub use message::{Resolution, WireMessage};
pub use methods::{MethodFn, MethodResult, Methods};
pub use origin::{resolve_origin, DocumentLocation};
pub use sender::ReplyFuture;

pub use portico_types::config::ConnectConfig;
pub use portico_types::context::{ContextId, Envelope};
pub use portico_types::error::{CallError, ConnectError, TransportError};
pub use portico_types::record::{ErrorRecord, Rejection};
