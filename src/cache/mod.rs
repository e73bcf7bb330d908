//! Route-result caching — the get-or-compute-and-store handler decorator.
//!
//! [`CachePlugin`] wraps the handlers of routes that declare the store
//! keyword in their config. For each request it derives a cache key from the
//! matched route, looks the key up in the injected
//! [`Store`](crate::store::Store), and either serves the stored response or
//! runs the handler and stores its result.
//!
//! ## Cache key
//!
//! The default key is the route's assigned name, falling back to its raw
//! rule. Whenever the request carries distinguishing parameters — matched
//! wildcard values, query pairs, or any header on the vary allow-list
//! (default: `range`) — the key becomes the URL reconstructed from the rule
//! with wildcards substituted and the remaining parameters appended as a
//! sorted query string. Distinct wildcard or query values therefore produce
//! distinct entries.
//!
//! ## Consistency
//!
//! There is no locking around the get-then-set sequence: concurrent requests
//! for the same uncached key may both miss and both recompute, and the last
//! write wins. That race is accepted, not guarded against.
//!
//! ## Errors
//!
//! Store and codec failures are not recovered from: they surface as
//! `500 Internal Server Error`, logged at `error`. The decorator never
//! silently bypasses the store.

use std::any::Any;
use std::collections::BTreeMap;
use std::sync::Arc;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::context::Context;
use crate::plugin::{Plugin, PluginError};
use crate::router::{Handler, RouteInfo, Router};
use crate::{Response, StatusCode};

/// Request headers folded into the cache key by default.
const DEFAULT_VARY_HEADERS: &[&str] = &["range"];

/// Caching decorator plugin.
///
/// Per-route configuration keywords (all overridable at construction):
///
/// | Keyword          | Default          | Meaning                                  |
/// |------------------|------------------|------------------------------------------|
/// | store keyword    | `store`          | declaring it opts the route into caching |
/// | expire keyword   | `cache_expire`   | entry TTL in seconds, 0 = never expire   |
/// | compress keyword | `cache_compress` | store compression level 0–9, 0 = none    |
///
/// Install after the [`StorePlugin`](crate::plugin::StorePlugin) so the
/// store handle is injected before this decorator looks for it.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use routecache::{CachePlugin, Response, Router, StatusCode};
/// use routecache::plugin::StorePlugin;
/// use routecache::store::InMemoryStore;
///
/// let mut router = Router::new();
/// router.install(StorePlugin::new(Arc::new(InMemoryStore::new()))).unwrap();
/// router.install(CachePlugin::new()).unwrap();
///
/// router
///     .get("/articles/:slug", |_ctx| async { Response::new(StatusCode::Ok) })
///     .config("store", "")
///     .config("cache_expire", "3600")
///     .config("cache_compress", "3");
/// ```
pub struct CachePlugin {
    store_keyword: String,
    expire_keyword: String,
    compress_keyword: String,
    vary_headers: Vec<String>,
}

impl Default for CachePlugin {
    fn default() -> Self {
        Self::new()
    }
}

impl CachePlugin {
    /// Create a cache plugin with the default keywords and vary allow-list.
    pub fn new() -> Self {
        Self {
            store_keyword: "store".to_owned(),
            expire_keyword: "cache_expire".to_owned(),
            compress_keyword: "cache_compress".to_owned(),
            vary_headers: DEFAULT_VARY_HEADERS
                .iter()
                .map(|h| h.to_string())
                .collect(),
        }
    }

    /// Override the keyword that opts a route into caching. Must match the
    /// keyword the store plugin injects under.
    #[must_use]
    pub fn store_keyword(mut self, keyword: impl Into<String>) -> Self {
        self.store_keyword = keyword.into();
        self
    }

    /// Override the per-route expire-time keyword.
    #[must_use]
    pub fn expire_keyword(mut self, keyword: impl Into<String>) -> Self {
        self.expire_keyword = keyword.into();
        self
    }

    /// Override the per-route compression-level keyword.
    #[must_use]
    pub fn compress_keyword(mut self, keyword: impl Into<String>) -> Self {
        self.compress_keyword = keyword.into();
        self
    }

    /// Add a request header to the vary allow-list folded into cache keys.
    #[must_use]
    pub fn vary_header(mut self, header: impl Into<String>) -> Self {
        self.vary_headers.push(header.into());
        self
    }
}

impl Plugin for CachePlugin {
    fn name(&self) -> &'static str {
        "cache"
    }

    /// Reject installation when another cache plugin claims the same
    /// expire-time or compression-level keyword.
    fn setup(&self, router: &Router) -> Result<(), PluginError> {
        for other in router.plugins() {
            let Some(other) = other.as_any().downcast_ref::<CachePlugin>() else {
                continue;
            };
            if other.expire_keyword == self.expire_keyword {
                return Err(PluginError::Conflict {
                    plugin: self.name(),
                    keyword: self.expire_keyword.clone(),
                });
            }
            if other.compress_keyword == self.compress_keyword {
                return Err(PluginError::Conflict {
                    plugin: self.name(),
                    keyword: self.compress_keyword.clone(),
                });
            }
        }
        Ok(())
    }

    fn apply(&self, handler: Handler, route: &RouteInfo) -> Handler {
        // Routes that do not declare the store keyword are left untouched.
        // Checked once here, not per dispatch.
        if !route.config().contains(&self.store_keyword) {
            return handler;
        }

        let expire_secs = route
            .config()
            .get_parsed::<u64>(&self.expire_keyword)
            .unwrap_or(0);
        let compress_level = route
            .config()
            .get_parsed::<u32>(&self.compress_keyword)
            .unwrap_or(0);

        debug!(
            rule = %route.rule(),
            expire_secs,
            compress_level,
            "route-result caching enabled"
        );

        let route = route.clone();
        let vary_headers = self.vary_headers.clone();

        Arc::new(move |ctx: Context| {
            let handler = handler.clone();
            let route = route.clone();
            let vary_headers = vary_headers.clone();

            Box::pin(async move {
                let key = cache_key(&route, &ctx, &vary_headers);

                let Some(store) = ctx.store() else {
                    error!(%key, "no store handle in request context; is the store plugin installed?");
                    return Response::new(StatusCode::InternalServerError)
                        .body("cache store not available");
                };

                match store.get(&key).await {
                    Ok(Some(raw)) => {
                        return match CachedResponse::decode(&raw) {
                            Ok(cached) => {
                                debug!(%key, "cache hit");
                                cached.into_response()
                            }
                            Err(e) => {
                                error!(%key, error = %e, "cache entry decode failed");
                                Response::new(StatusCode::InternalServerError)
                                    .body("cache entry decode failed")
                            }
                        };
                    }
                    Ok(None) => debug!(%key, "cache miss"),
                    Err(e) => {
                        error!(%key, error = %e, "store get failed");
                        return Response::new(StatusCode::InternalServerError)
                            .body(format!("store get failed: {e}"));
                    }
                }

                let response = handler(ctx).await;

                let encoded = match CachedResponse::encode(&response) {
                    Ok(encoded) => encoded,
                    Err(e) => {
                        error!(%key, error = %e, "cache entry encode failed");
                        return Response::new(StatusCode::InternalServerError)
                            .body("cache entry encode failed");
                    }
                };

                if let Err(e) = store.set(&key, encoded, expire_secs, compress_level).await {
                    error!(%key, error = %e, "store set failed");
                    return Response::new(StatusCode::InternalServerError)
                        .body(format!("store set failed: {e}"));
                }

                response
            })
        })
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Derive the cache key for one request against a matched route.
///
/// Parameters that distinguish the request are collected into a sorted map:
/// wildcard values the route actually captured, every query pair, and any
/// allow-listed header present. With no parameters the key is the route name
/// or, unnamed, the raw rule; otherwise it is the reconstructed URL.
fn cache_key(route: &RouteInfo, ctx: &Context, vary_headers: &[String]) -> String {
    let mut url_params: BTreeMap<String, String> = BTreeMap::new();

    for name in route.param_names() {
        if let Some(value) = ctx.params().get(&name) {
            url_params.insert(name, value.to_owned());
        }
    }

    for (key, value) in ctx.request().query_params() {
        url_params.insert(key.to_owned(), value.to_owned());
    }

    for header in vary_headers {
        if let Some(value) = ctx.request().headers().get(header) {
            url_params.insert(header.clone(), value.to_owned());
        }
    }

    if url_params.is_empty() {
        route
            .name()
            .map(str::to_owned)
            .unwrap_or_else(|| route.rule().to_owned())
    } else {
        route.url_for(&url_params)
    }
}

/// Serialized form of a handler response, as stored in the key/value store.
#[derive(Serialize, Deserialize)]
struct CachedResponse {
    status: StatusCode,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
}

impl CachedResponse {
    fn encode(response: &Response) -> Result<Bytes, serde_json::Error> {
        let entry = Self {
            status: response.status(),
            headers: response
                .headers()
                .iter()
                .map(|(name, value)| (name.to_owned(), value.to_owned()))
                .collect(),
            body: response.body_ref().to_vec(),
        };
        serde_json::to_vec(&entry).map(Bytes::from)
    }

    fn decode(raw: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(raw)
    }

    fn into_response(self) -> Response {
        let mut response = Response::new(self.status).body_bytes(self.body);
        for (name, value) in self.headers {
            response.add_header(name, value);
        }
        response
    }
}
