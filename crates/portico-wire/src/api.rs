//! The remote-facing proxy object.

use crate::sender::ReplyFuture;
use portico_types::error::{CallError, TransportError};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

pub use crate::sender::MethodProxy;

/// The remote side's methods, as callable proxies.
///
/// Cloning is cheap and every clone sees the same mapping. When the remote
/// re-announces its methods (a responder accepting a new handshake) the whole
/// mapping is swapped at once.
#[derive(Clone, Default)]
pub struct RemoteApi {
    methods: Arc<RwLock<HashMap<String, MethodProxy>>>,
}

impl RemoteApi {
    /// An empty proxy object.
    pub fn new() -> Self {
        Self::default()
    }

    /// The proxy for one remote method.
    pub fn method(&self, name: &str) -> Option<MethodProxy> {
        self.methods
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .cloned()
    }

    /// Names of every remote method, sorted.
    pub fn method_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .methods
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    /// Whether the remote exposes `name`.
    pub fn has_method(&self, name: &str) -> bool {
        self.methods
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(name)
    }

    /// Number of remote methods.
    pub fn len(&self) -> usize {
        self.methods.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Whether the remote exposes no methods.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Call a remote method by name with raw arguments.
    pub fn call(&self, name: &str, args: Vec<Value>) -> ReplyFuture {
        match self.method(name) {
            Some(proxy) => proxy.call(args),
            None => ReplyFuture::failed(name, CallError::UnknownMethod(name.to_string())),
        }
    }

    /// Call a remote method with typed arguments and return value.
    ///
    /// `args` must serialize to a list (a tuple or a `Vec`); a single
    /// non-list value is sent as the only argument.
    pub async fn invoke<A, R>(&self, name: &str, args: A) -> Result<R, CallError>
    where
        A: Serialize,
        R: DeserializeOwned,
    {
        let args = match serde_json::to_value(args) {
            Ok(Value::Array(list)) => list,
            Ok(Value::Null) => Vec::new(),
            Ok(other) => vec![other],
            Err(e) => {
                return Err(CallError::Transport(TransportError::NotTransmissible {
                    reason: e.to_string(),
                }))
            }
        };
        let value = self.call(name, args).await?;
        serde_json::from_value(value).map_err(|e| CallError::InvalidReturn(e.to_string()))
    }

    pub(crate) fn replace(&self, proxies: impl IntoIterator<Item = (String, MethodProxy)>) {
        let fresh: HashMap<String, MethodProxy> = proxies.into_iter().collect();
        *self.methods.write().unwrap_or_else(|e| e.into_inner()) = fresh;
    }
}

impl std::fmt::Debug for RemoteApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteApi")
            .field("methods", &self.method_names())
            .finish()
    }
}
