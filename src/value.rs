//! # Argument Marshaling
//!
//! This module defines the two value trees the bridge walks: [`Arg`], the
//! "live" form that procedure bodies and call sites manipulate and which may
//! embed callables, and [`Value`], the "wire" form that actually crosses the
//! transport and is always `Serialize`/`Deserialize`. [`marshal`] rewrites
//! callables into placeholder tokens on the way out; [`unmarshal`] rewrites
//! placeholder tokens back into invocation proxies on the way in.
//!
//! The split exists because a callable has no meaningful serialized form; a
//! dynamically typed value tree is replaced here with a concrete sum type
//! per node kind instead.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::BridgeError;
use crate::registry::CallbackRegistry;

/// A remotely invokable value. Implemented by user-supplied callback closures
/// (captured from worker procedures or main-side call sites) and by
/// [`crate::dispatcher::CallbackProxy`], the stand-in created when a
/// placeholder is unmarshaled.
#[async_trait]
pub trait Callback: Send + Sync {
    /// Invoke the callable with the given (already-unmarshaled) arguments and
    /// await its (not-yet-marshaled) result.
    async fn call(&self, args: Arg) -> Result<Arg, BridgeError>;
}

/// Wraps a plain async closure as a [`Callback`], so call sites can pass
/// `Arg::callback(|args| async move { .. })` instead of hand-writing a type.
pub struct FnCallback<F>(pub F);

#[async_trait]
impl<F, Fut> Callback for FnCallback<F>
where
    F: Fn(Arg) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = Result<Arg, BridgeError>> + Send,
{
    async fn call(&self, args: Arg) -> Result<Arg, BridgeError> {
        (self.0)(args).await
    }
}

/// The live argument/result tree. May embed [`Callback`] values; these do not
/// survive serialization and are rewritten to [`Value::Placeholder`] tokens by
/// [`marshal`] before anything is posted to the transport.
#[derive(Clone)]
pub enum Arg {
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    /// A raw byte buffer. Passes through marshaling unchanged and is recorded
    /// in the transfer list (see [`marshal`]).
    Bytes(Vec<u8>),
    Sequence(Vec<Arg>),
    Record(HashMap<String, Arg>),
    /// A callable reference. Registered under a fresh token when marshaled.
    Callback(Arc<dyn Callback>),
}

impl std::fmt::Debug for Arg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Arg::Null => f.write_str("Null"),
            Arg::Bool(b) => f.debug_tuple("Bool").field(b).finish(),
            Arg::Number(n) => f.debug_tuple("Number").field(n).finish(),
            Arg::String(s) => f.debug_tuple("String").field(s).finish(),
            Arg::Bytes(b) => f.debug_tuple("Bytes").field(b).finish(),
            Arg::Sequence(s) => f.debug_tuple("Sequence").field(s).finish(),
            Arg::Record(r) => f.debug_tuple("Record").field(r).finish(),
            Arg::Callback(_) => f.write_str("Callback(..)"),
        }
    }
}

impl Arg {
    pub fn callback<F, Fut>(f: F) -> Self
    where
        F: Fn(Arg) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<Arg, BridgeError>> + Send + 'static,
    {
        Arg::Callback(Arc::new(FnCallback(f)))
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Arg::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Arg::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_sequence(&self) -> Option<&[Arg]> {
        match self {
            Arg::Sequence(s) => Some(s.as_slice()),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Arg::Bytes(b) => Some(b.as_slice()),
            _ => None,
        }
    }

    pub fn as_callback(&self) -> Option<&Arc<dyn Callback>> {
        match self {
            Arg::Callback(cb) => Some(cb),
            _ => None,
        }
    }

    pub fn as_record(&self) -> Option<&HashMap<String, Arg>> {
        match self {
            Arg::Record(r) => Some(r),
            _ => None,
        }
    }
}

impl From<f64> for Arg {
    fn from(n: f64) -> Self {
        Arg::Number(n)
    }
}

impl From<i64> for Arg {
    fn from(n: i64) -> Self {
        Arg::Number(n as f64)
    }
}

impl From<String> for Arg {
    fn from(s: String) -> Self {
        Arg::String(s)
    }
}

impl From<&str> for Arg {
    fn from(s: &str) -> Self {
        Arg::String(s.to_string())
    }
}

impl From<bool> for Arg {
    fn from(b: bool) -> Self {
        Arg::Bool(b)
    }
}

impl From<Vec<u8>> for Arg {
    fn from(b: Vec<u8>) -> Self {
        Arg::Bytes(b)
    }
}

/// The wire-form argument/result tree. Every variant is serializable; a
/// placeholder stands in for whatever callable occupied this position in the
/// corresponding [`Arg`] tree on the sending side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Bytes(Vec<u8>),
    Sequence(Vec<Value>),
    Record(HashMap<String, Value>),
    /// `"{request_id}:{random}"`, minted by [`CallbackRegistry::register_callback`].
    Placeholder(String),
}

impl Value {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s.as_str()),
            _ => None,
        }
    }
}

/// Rewrite an [`Arg`] tree into its wire [`Value`] form, registering any
/// callables under `request_id` and appending the byte length of every raw
/// buffer encountered to `transferables`.
///
/// Buffers pass through unchanged; Rust's move semantics already give a
/// channel-backed transport "moved, not copied" behavior for free once the
/// buffer is placed in the outgoing envelope, so `transferables` here is pure
/// bookkeeping (size in bytes, for logging and for transport adapters that
/// want to special-case large payloads), not an ownership transfer mechanism.
pub fn marshal(
    value: Arg,
    request_id: u64,
    registry: &CallbackRegistry,
    transferables: &mut Vec<usize>,
) -> Value {
    match value {
        Arg::Null => Value::Null,
        Arg::Bool(b) => Value::Bool(b),
        Arg::Number(n) => Value::Number(n),
        Arg::String(s) => Value::String(s),
        Arg::Bytes(b) => {
            transferables.push(b.len());
            Value::Bytes(b)
        }
        Arg::Sequence(items) => Value::Sequence(
            items
                .into_iter()
                .map(|item| marshal(item, request_id, registry, transferables))
                .collect(),
        ),
        Arg::Record(fields) => Value::Record(
            fields
                .into_iter()
                .map(|(k, v)| (k, marshal(v, request_id, registry, transferables)))
                .collect(),
        ),
        Arg::Callback(callback) => {
            let token = registry.register_callback(request_id, callback);
            Value::Placeholder(token)
        }
    }
}

/// Rewrite a wire [`Value`] tree back into its live [`Arg`] form, resolving
/// every placeholder to a memoized [`Callback`] proxy for `(request_id,
/// token)` via `make_proxy`.
pub fn unmarshal(
    value: Value,
    request_id: u64,
    registry: &CallbackRegistry,
    make_proxy: &(dyn Fn(u64, String) -> Arc<dyn Callback> + Send + Sync),
) -> Arg {
    match value {
        Value::Null => Arg::Null,
        Value::Bool(b) => Arg::Bool(b),
        Value::Number(n) => Arg::Number(n),
        Value::String(s) => Arg::String(s),
        Value::Bytes(b) => Arg::Bytes(b),
        Value::Sequence(items) => Arg::Sequence(
            items
                .into_iter()
                .map(|item| unmarshal(item, request_id, registry, make_proxy))
                .collect(),
        ),
        Value::Record(fields) => Arg::Record(
            fields
                .into_iter()
                .map(|(k, v)| (k, unmarshal(v, request_id, registry, make_proxy)))
                .collect(),
        ),
        Value::Placeholder(token) => {
            let proxy = registry.get_or_create_proxy(request_id, token, make_proxy);
            Arg::Callback(proxy)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_registry() -> CallbackRegistry {
        CallbackRegistry::new()
    }

    #[test]
    fn scalars_round_trip_through_marshal_and_unmarshal() {
        let registry = sample_registry();
        let mut transferables = Vec::new();
        let wire = marshal(Arg::from(42.0), 1, &registry, &mut transferables);
        assert_eq!(wire, Value::Number(42.0));
        assert!(transferables.is_empty());
    }

    #[test]
    fn nested_records_and_sequences_round_trip() {
        let registry = sample_registry();
        let mut fields = HashMap::new();
        fields.insert("a".to_string(), Arg::from(1.0));
        fields.insert(
            "b".to_string(),
            Arg::Record({
                let mut inner = HashMap::new();
                inner.insert("c".to_string(), Arg::from("hello"));
                inner
            }),
        );
        fields.insert(
            "d".to_string(),
            Arg::Sequence(vec![Arg::from(1.0), Arg::from(2.0), Arg::from(3.0)]),
        );
        let mut transferables = Vec::new();
        let wire = marshal(Arg::Record(fields), 7, &registry, &mut transferables);

        match wire {
            Value::Record(record) => {
                assert_eq!(record.get("a"), Some(&Value::Number(1.0)));
                assert_eq!(
                    record.get("d"),
                    Some(&Value::Sequence(vec![
                        Value::Number(1.0),
                        Value::Number(2.0),
                        Value::Number(3.0)
                    ]))
                );
            }
            other => panic!("expected record, got {:?}", other),
        }
    }

    #[test]
    fn raw_buffers_pass_through_and_are_listed_as_transferables() {
        let registry = sample_registry();
        let mut transferables = Vec::new();
        let wire = marshal(
            Arg::Bytes(vec![1, 2, 3, 4]),
            3,
            &registry,
            &mut transferables,
        );
        assert_eq!(wire, Value::Bytes(vec![1, 2, 3, 4]));
        assert_eq!(transferables, vec![4]);
    }

    #[test]
    fn callback_marshals_to_a_placeholder_bound_to_the_request() {
        let registry = sample_registry();
        let mut transferables = Vec::new();
        let callback = Arg::callback(|args| async move { Ok(args) });
        let wire = marshal(callback, 5, &registry, &mut transferables);
        match wire {
            Value::Placeholder(token) => assert!(token.starts_with("5:")),
            other => panic!("expected placeholder, got {:?}", other),
        }
    }
}
