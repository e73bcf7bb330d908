//! Per-request context — matched path parameters and type-erased extensions.
//!
//! A [`Context`] is handed to every route handler. Plugins use the
//! [`Extensions`] map to inject per-request state; the bundled store plugin
//! puts a [`StoreHandle`](crate::store::StoreHandle) there so downstream
//! layers (the cache decorator, or the handler itself) can reach the
//! key/value store.

use std::{
    any::{Any, TypeId},
    collections::HashMap,
    sync::Arc,
};

use crate::store::{Store, StoreHandle};
use crate::Request;

/// Type-erased request extensions map — injects per-request state into
/// handlers without requiring handlers to know about each other's types.
#[derive(Default)]
pub struct Extensions {
    map: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
}

impl Extensions {
    /// Create a new empty extensions map.
    pub fn new() -> Self {
        Self {
            map: HashMap::new(),
        }
    }

    /// Insert a value, replacing any previous value of the same type.
    pub fn insert<T>(&mut self, value: T)
    where
        T: Send + Sync + 'static,
    {
        self.map.insert(TypeId::of::<T>(), Box::new(value));
    }

    /// Get a value by type.
    pub fn get<T>(&self) -> Option<&T>
    where
        T: Send + Sync + 'static,
    {
        self.map
            .get(&TypeId::of::<T>())
            .and_then(|value| value.downcast_ref::<T>())
    }

    /// Remove and return a value by type.
    pub fn remove<T>(&mut self) -> Option<T>
    where
        T: Send + Sync + 'static,
    {
        self.map
            .remove(&TypeId::of::<T>())
            .and_then(|value| value.downcast::<T>().ok())
            .map(|value| *value)
    }
}

/// Wildcard values extracted from the matched route rule.
#[derive(Default, Debug, Clone)]
pub struct PathParams {
    map: HashMap<String, String>,
}

impl PathParams {
    /// Create a new empty parameter map.
    pub fn new() -> Self {
        Self {
            map: HashMap::new(),
        }
    }

    /// Insert a wildcard value.
    pub fn insert(&mut self, key: String, value: String) {
        self.map.insert(key, value);
    }

    /// Get a wildcard value by name.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.map.get(key).map(|value| value.as_str())
    }

    /// Returns `true` if no wildcards were captured.
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

/// Per-request context carrying the request, matched path parameters, and
/// plugin-injected extensions.
pub struct Context {
    request: Request,
    params: PathParams,
    extensions: Extensions,
}

impl Context {
    /// Create a context with no path parameters.
    pub fn new(request: Request) -> Self {
        Self::with_params(request, PathParams::new())
    }

    /// Create a context from a request and the parameters the router matched.
    pub fn with_params(request: Request, params: PathParams) -> Self {
        Self {
            request,
            params,
            extensions: Extensions::new(),
        }
    }

    /// The underlying HTTP request.
    pub fn request(&self) -> &Request {
        &self.request
    }

    /// Wildcard values captured by the matched route.
    pub fn params(&self) -> &PathParams {
        &self.params
    }

    /// Plugin-injected request extensions.
    pub fn extensions(&self) -> &Extensions {
        &self.extensions
    }

    /// Mutable access to the extensions map, for plugins that inject state.
    pub fn extensions_mut(&mut self) -> &mut Extensions {
        &mut self.extensions
    }

    /// The key/value store injected by the store plugin, if this route
    /// declared the store keyword.
    pub fn store(&self) -> Option<Arc<dyn Store>> {
        self.extensions
            .get::<StoreHandle>()
            .map(|handle| handle.0.clone())
    }

    /// Deserialize the request body as JSON.
    pub fn json<T>(&self) -> Result<T, serde_json::Error>
    where
        T: serde::de::DeserializeOwned,
    {
        serde_json::from_slice(self.request.body())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;

    fn make_request() -> Request {
        let raw = b"GET /x HTTP/1.1\r\nHost: localhost\r\n\r\n";
        Request::parse(raw).unwrap().0
    }

    #[test]
    fn extensions_insert_get_remove() {
        let mut ext = Extensions::new();
        ext.insert(42u32);
        assert_eq!(ext.get::<u32>(), Some(&42));
        assert_eq!(ext.remove::<u32>(), Some(42));
        assert_eq!(ext.get::<u32>(), None);
    }

    #[test]
    fn store_accessor_reads_injected_handle() {
        let mut ctx = Context::new(make_request());
        assert!(ctx.store().is_none());

        let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
        ctx.extensions_mut().insert(StoreHandle(store));
        assert!(ctx.store().is_some());
    }

    #[test]
    fn params_round_trip() {
        let mut params = PathParams::new();
        params.insert("id".to_owned(), "42".to_owned());
        let ctx = Context::with_params(make_request(), params);
        assert_eq!(ctx.params().get("id"), Some("42"));
    }
}
