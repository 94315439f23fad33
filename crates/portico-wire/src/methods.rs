//! Local method registry.
//!
//! A [`Methods`] value is the name → procedure map a side exposes to its
//! remote. Procedures receive the positional argument list of a call and
//! resolve to a value or a [`Rejection`].

use crate::codec::reject_with;
use futures::future::BoxFuture;
use futures::FutureExt;
use portico_types::error::ERR_DATA_CLONE;
use portico_types::record::Rejection;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

/// Outcome of a local method.
pub type MethodResult = Result<Value, Rejection>;

/// A type-erased local method.
pub type MethodFn = Arc<dyn Fn(Vec<Value>) -> BoxFuture<'static, MethodResult> + Send + Sync>;

/// Methods exposed to the remote side.
#[derive(Clone, Default)]
pub struct Methods {
    methods: BTreeMap<String, MethodFn>,
}

impl Methods {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a method that works on the raw argument list.
    pub fn raw<F, Fut>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = MethodResult> + Send + 'static,
    {
        self.methods
            .insert(name.into(), Arc::new(move |args| f(args).boxed()));
        self
    }

    /// Register a typed method.
    ///
    /// The argument list is deserialized into `A`: use a tuple for
    /// positional arguments (`(i64, i64)`), or `Vec<T>` for variadic ones.
    /// Arguments of the wrong shape reject with a `TypeError`; a return
    /// value that cannot become structured data rejects with a
    /// `DataCloneError`.
    pub fn method<A, R, F, Fut>(self, name: impl Into<String>, f: F) -> Self
    where
        A: DeserializeOwned + Send + 'static,
        R: Serialize + Send + 'static,
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, Rejection>> + Send + 'static,
    {
        let name = name.into();
        let label = name.clone();
        let f = Arc::new(f);
        self.raw(name, move |args: Vec<Value>| {
            let f = Arc::clone(&f);
            let label = label.clone();
            async move {
                let parsed: A = serde_json::from_value(Value::Array(args)).map_err(|e| {
                    Rejection::error("TypeError", format!("Invalid arguments for {label}(): {e}"))
                })?;
                let value = f(parsed).await?;
                serde_json::to_value(value)
                    .map_err(|e| Rejection::error(ERR_DATA_CLONE, e.to_string()))
            }
        })
    }

    /// Register a typed method that fails with an ordinary Rust error.
    ///
    /// The error crosses as a record named after its type, with its
    /// `source()` chain as the stack.
    pub fn fallible<A, R, E, F, Fut>(self, name: impl Into<String>, f: F) -> Self
    where
        A: DeserializeOwned + Send + 'static,
        R: Serialize + Send + 'static,
        E: std::error::Error + Send + 'static,
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, E>> + Send + 'static,
    {
        self.method(name, move |args: A| {
            let invocation = f(args);
            async move { invocation.await.map_err(|e| reject_with(&e)) }
        })
    }

    /// Names of every registered method, sorted.
    pub fn names(&self) -> Vec<String> {
        self.methods.keys().cloned().collect()
    }

    /// Look up a method.
    pub fn get(&self, name: &str) -> Option<MethodFn> {
        self.methods.get(name).cloned()
    }

    /// Number of registered methods.
    pub fn len(&self) -> usize {
        self.methods.len()
    }

    /// Whether no method is registered.
    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }
}

impl std::fmt::Debug for Methods {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Methods")
            .field("names", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_raw_method_receives_args_in_order() {
        let methods = Methods::new().raw("echo", |args| async move { Ok(Value::Array(args)) });
        let echo = methods.get("echo").unwrap();
        let out = echo(vec![json!(1), json!("two"), json!([3])]).await.unwrap();
        assert_eq!(out, json!([1, "two", [3]]));
    }

    #[tokio::test]
    async fn test_typed_method() {
        let methods =
            Methods::new().method("add", |(a, b): (i64, i64)| async move { Ok(a + b) });
        let add = methods.get("add").unwrap();
        assert_eq!(add(vec![json!(2), json!(40)]).await.unwrap(), json!(42));
    }

    #[tokio::test]
    async fn test_typed_method_rejects_bad_arguments() {
        let methods =
            Methods::new().method("add", |(a, b): (i64, i64)| async move { Ok(a + b) });
        let add = methods.get("add").unwrap();
        match add(vec![json!("x")]).await {
            Err(Rejection::Error(record)) => {
                assert_eq!(record.name, "TypeError");
                assert!(record.message.contains("add()"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unserializable_return_is_data_clone_error() {
        use std::collections::HashMap;
        // Non-string map keys cannot become structured data.
        let methods = Methods::new().method("bad", |_: Vec<Value>| async move {
            let mut map = HashMap::new();
            map.insert((1, 2), "pair");
            Ok(map)
        });
        let bad = methods.get("bad").unwrap();
        match bad(vec![]).await {
            Err(Rejection::Error(record)) => assert_eq!(record.name, "DataCloneError"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_fallible_method_rejects_with_error_record() {
        let methods = Methods::new().fallible("port", |(raw,): (String,)| async move {
            raw.parse::<u16>()
        });
        let port = methods.get("port").unwrap();
        assert_eq!(port(vec![json!("8080")]).await.unwrap(), json!(8080));
        match port(vec![json!("eighty")]).await {
            Err(Rejection::Error(record)) => {
                assert_eq!(record.name, "ParseIntError");
                assert_eq!(record.message, "invalid digit found in string");
                assert!(record.stack.is_none());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_names_sorted_and_debug() {
        let methods = Methods::new()
            .raw("zeta", |_| async { Ok(Value::Null) })
            .raw("alpha", |_| async { Ok(Value::Null) });
        assert_eq!(methods.names(), vec!["alpha", "zeta"]);
        assert_eq!(methods.len(), 2);
        assert!(!methods.is_empty());
        assert!(format!("{methods:?}").contains("alpha"));
        assert!(Methods::new().is_empty());
    }
}
