//! Per-request key-value side channel.
//!
//! A [`Context`] travels with the request through its `http::Extensions` and
//! lives exactly as long as the request. Middleware and handlers may attach
//! arbitrary values; the engine itself only writes the two reserved keys
//! [`HOST_KEY`] and [`ERROR_KEY`].
use std::{
    any::Any,
    collections::HashMap,
    sync::{Arc, Mutex, PoisonError},
};

use crate::core::handler::HttpRequest;

/// Reserved key holding the original `Host` of the request.
pub const HOST_KEY: &str = "proxy.host";

/// Reserved key holding the fault message after pipeline recovery.
pub const ERROR_KEY: &str = "proxy.error";

type Value = Arc<dyn Any + Send + Sync>;

/// Cheaply cloneable per-request store. All clones share the same underlying
/// map; callers touching it from concurrent tasks get interior locking.
#[derive(Clone, Default)]
pub struct Context {
    store: Arc<Mutex<HashMap<String, Value>>>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch the context of a request, installing a fresh one if absent.
    pub fn ensure(req: &mut HttpRequest) -> Context {
        if let Some(ctx) = req.extensions().get::<Context>() {
            return ctx.clone();
        }
        let ctx = Context::new();
        req.extensions_mut().insert(ctx.clone());
        ctx
    }

    /// Fetch the context of a request without installing one.
    pub fn of(req: &HttpRequest) -> Option<Context> {
        req.extensions().get::<Context>().cloned()
    }

    pub fn set<V: Any + Send + Sync>(&self, key: impl Into<String>, value: V) {
        self.lock().insert(key.into(), Arc::new(value));
    }

    /// Typed read. Returns `None` when the key is absent or holds another type.
    pub fn get<V: Any + Send + Sync>(&self, key: &str) -> Option<Arc<V>> {
        let value = self.lock().get(key).cloned()?;
        value.downcast::<V>().ok()
    }

    /// String read; empty-handed for non-string values.
    pub fn get_string(&self, key: &str) -> Option<String> {
        self.get::<String>(key).map(|s| s.as_ref().clone())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.lock().contains_key(key)
    }

    pub fn delete(&self, key: &str) -> bool {
        self.lock().remove(key).is_some()
    }

    /// Snapshot of the currently stored keys.
    pub fn keys(&self) -> Vec<String> {
        self.lock().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Value>> {
        self.store.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context").field("keys", &self.keys()).finish()
    }
}
