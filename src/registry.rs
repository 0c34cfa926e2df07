//! # Callback Registry
//!
//! Tracks two directions of callable identity for a single endpoint:
//!
//! - `callbacks`: callables this side marshaled out, keyed by the placeholder
//!   token it minted for them. Looked up when a `CallbackCall` envelope
//!   arrives naming that token.
//! - `proxies`: placeholder tokens this side has already unmarshaled into a
//!   [`CallbackProxy`][crate::dispatcher::CallbackProxy], memoized so that
//!   unmarshaling the same token twice within a request yields the same
//!   callback identity rather than a fresh proxy each time.
//!
//! Both maps are scoped by `request_id` and swept via [`CallbackRegistry::clear`]
//! once a call settles, since tokens are only meaningful for the lifetime of
//! the request that minted them.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use crate::value::Callback;

type CallbackKey = (u64, String);

#[derive(Default)]
struct Inner {
    callbacks: HashMap<CallbackKey, Arc<dyn Callback>>,
    proxies: HashMap<CallbackKey, Arc<dyn Callback>>,
}

/// Shared, lock-protected table of live callback identities, keyed by
/// `(request_id, token)`. Cheap to clone; all state lives behind the `Arc`.
#[derive(Clone)]
pub struct CallbackRegistry {
    inner: Arc<Mutex<Inner>>,
}

impl CallbackRegistry {
    pub fn new() -> Self {
        CallbackRegistry {
            inner: Arc::new(Mutex::new(Inner::default())),
        }
    }

    /// Register `callback` under a freshly minted token scoped to
    /// `request_id` and return that token for embedding in a
    /// [`crate::value::Value::Placeholder`].
    pub fn register_callback(&self, request_id: u64, callback: Arc<dyn Callback>) -> String {
        let token = mint_token(request_id);
        let mut inner = self.inner.lock().expect("callback registry poisoned");
        inner
            .callbacks
            .insert((request_id, token.clone()), callback);
        token
    }

    /// Look up a previously registered callback by its wire token. Returns
    /// `None` for an unknown token, which callers treat as "drop the call
    /// silently" per the dispatcher's handling of unrecognized callback ids.
    pub fn lookup_callback(&self, request_id: u64, token: &str) -> Option<Arc<dyn Callback>> {
        let inner = self.inner.lock().expect("callback registry poisoned");
        inner.callbacks.get(&(request_id, token.to_string())).cloned()
    }

    /// Resolve a placeholder token to a proxy, constructing one via `make`
    /// only the first time this `(request_id, token)` pair is seen so that
    /// repeated references to the same placeholder within a request resolve
    /// to the same callback identity.
    pub fn get_or_create_proxy(
        &self,
        request_id: u64,
        token: String,
        make: &(dyn Fn(u64, String) -> Arc<dyn Callback> + Send + Sync),
    ) -> Arc<dyn Callback> {
        let key = (request_id, token.clone());
        let mut inner = self.inner.lock().expect("callback registry poisoned");
        if let Some(existing) = inner.proxies.get(&key) {
            return existing.clone();
        }
        let proxy = make(request_id, token);
        inner.proxies.insert(key, proxy.clone());
        proxy
    }

    /// Drop every callback and proxy scoped to `request_id`. Called once a
    /// call's top-level `Result`/`Error` has been delivered, since tokens
    /// minted for that call can never be referenced again.
    pub fn clear(&self, request_id: u64) {
        let mut inner = self.inner.lock().expect("callback registry poisoned");
        inner.callbacks.retain(|(id, _), _| *id != request_id);
        inner.proxies.retain(|(id, _), _| *id != request_id);
    }
}

impl Default for CallbackRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn mint_token(request_id: u64) -> String {
    format!("{request_id}:{}", Uuid::new_v4())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Arg;

    #[tokio::test]
    async fn registered_callback_is_found_by_its_own_token() {
        let registry = CallbackRegistry::new();
        let callback = Arc::new(crate::value::FnCallback(|args: Arg| async move { Ok(args) }));
        let token = registry.register_callback(1, callback);
        assert!(registry.lookup_callback(1, &token).is_some());
        assert!(registry.lookup_callback(2, &token).is_none());
    }

    #[test]
    fn unknown_token_resolves_to_none() {
        let registry = CallbackRegistry::new();
        assert!(registry.lookup_callback(1, "no-such-token").is_none());
    }

    #[test]
    fn proxy_lookup_is_memoized_per_request_and_token() {
        let registry = CallbackRegistry::new();
        let mut calls = 0usize;
        let make = |_request_id: u64, _token: String| -> Arc<dyn Callback> {
            Arc::new(crate::value::FnCallback(|args: Arg| async move { Ok(args) }))
        };
        let first = registry.get_or_create_proxy(1, "t".to_string(), &make);
        let second = registry.get_or_create_proxy(1, "t".to_string(), &make);
        assert!(Arc::ptr_eq(&first, &second));
        let _ = &mut calls;
    }

    #[test]
    fn clear_drops_all_state_for_a_request() {
        let registry = CallbackRegistry::new();
        let callback = Arc::new(crate::value::FnCallback(|args: Arg| async move { Ok(args) }));
        let token = registry.register_callback(9, callback);
        registry.clear(9);
        assert!(registry.lookup_callback(9, &token).is_none());
    }
}
