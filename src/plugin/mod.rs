//! Plugin hook — handler wrapping at route-registration time.
//!
//! A [`Plugin`] installed on the [`Router`](crate::Router) gets two chances
//! to act:
//!
//! - [`Plugin::setup`] runs once at install time, with access to the plugins
//!   installed before it. This is where configuration conflicts are rejected.
//! - [`Plugin::apply`] runs once per route (the first time the route is
//!   dispatched), receiving the downstream [`Handler`] and an immutable
//!   [`RouteInfo`] snapshot. It returns the handler unchanged or a wrapper
//!   around it.
//!
//! Plugins are applied in reverse installation order, so the first-installed
//! plugin ends up outermost. The bundled [`StorePlugin`] relies on this: it
//! must inject the store handle before the cache decorator (installed after
//! it) looks for one.

use std::any::Any;
use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

use crate::context::Context;
use crate::router::{Handler, RouteInfo, Router};
use crate::store::{Store, StoreHandle};

/// Errors surfaced by [`Router::install`](crate::Router::install).
#[derive(Debug, Error)]
pub enum PluginError {
    /// Two installed plugins claim the same per-route configuration keyword.
    /// Never recovered automatically; fix the installation.
    #[error("conflicting {plugin} plugin configuration: keyword `{keyword}` is already in use")]
    Conflict {
        plugin: &'static str,
        keyword: String,
    },
}

/// A router plugin that may wrap route handlers.
pub trait Plugin: Send + Sync + 'static {
    /// Short identifier used in logs and error messages.
    fn name(&self) -> &'static str;

    /// Validate this plugin against the ones already installed.
    ///
    /// The default implementation accepts unconditionally.
    fn setup(&self, router: &Router) -> Result<(), PluginError> {
        let _ = router;
        Ok(())
    }

    /// Wrap (or pass through) the handler for one route.
    fn apply(&self, handler: Handler, route: &RouteInfo) -> Handler;

    /// Upcast for downcasting in other plugins' conflict checks.
    fn as_any(&self) -> &dyn Any;
}

/// Injects a [`StoreHandle`] into the request context for routes that
/// declare the store keyword in their config.
///
/// This is the provider half of the caching pair: it makes the key/value
/// store reachable from handlers, and the cache decorator only engages on
/// routes where this keyword is declared.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use routecache::plugin::StorePlugin;
/// use routecache::store::InMemoryStore;
///
/// let plugin = StorePlugin::new(Arc::new(InMemoryStore::new()));
/// assert_eq!(plugin.store_keyword(), "store");
/// ```
pub struct StorePlugin {
    store: Arc<dyn Store>,
    keyword: String,
}

impl StorePlugin {
    /// Create a store plugin with the default keyword `"store"`.
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            keyword: "store".to_owned(),
        }
    }

    /// Override the per-route keyword that opts a route into store injection.
    #[must_use]
    pub fn keyword(mut self, keyword: impl Into<String>) -> Self {
        self.keyword = keyword.into();
        self
    }

    /// The keyword routes must declare to receive the store handle.
    pub fn store_keyword(&self) -> &str {
        &self.keyword
    }
}

impl Plugin for StorePlugin {
    fn name(&self) -> &'static str {
        "store"
    }

    fn setup(&self, router: &Router) -> Result<(), PluginError> {
        for other in router.plugins() {
            let Some(other) = other.as_any().downcast_ref::<StorePlugin>() else {
                continue;
            };
            if other.keyword == self.keyword {
                return Err(PluginError::Conflict {
                    plugin: self.name(),
                    keyword: self.keyword.clone(),
                });
            }
        }
        Ok(())
    }

    fn apply(&self, handler: Handler, route: &RouteInfo) -> Handler {
        if !route.config().contains(&self.keyword) {
            return handler;
        }

        debug!(rule = %route.rule(), keyword = %self.keyword, "store handle enabled for route");

        let store = self.store.clone();
        Arc::new(move |mut ctx: Context| {
            ctx.extensions_mut().insert(StoreHandle(store.clone()));
            handler(ctx)
        })
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;
    use crate::{Response, Router, StatusCode};

    fn memory_store() -> Arc<dyn Store> {
        Arc::new(InMemoryStore::new())
    }

    #[test]
    fn duplicate_store_keyword_conflicts() {
        let mut router = Router::new();
        router.install(StorePlugin::new(memory_store())).unwrap();

        let err = router
            .install(StorePlugin::new(memory_store()))
            .unwrap_err();
        assert!(matches!(err, PluginError::Conflict { .. }));
    }

    #[test]
    fn distinct_store_keywords_coexist() {
        let mut router = Router::new();
        router.install(StorePlugin::new(memory_store())).unwrap();
        router
            .install(StorePlugin::new(memory_store()).keyword("sessions"))
            .unwrap();
        assert_eq!(router.plugins().len(), 2);
    }

    #[tokio::test]
    async fn handle_injected_only_for_declaring_routes() {
        let mut router = Router::new();
        router.install(StorePlugin::new(memory_store())).unwrap();

        router
            .get("/with", |ctx: crate::Context| async move {
                if ctx.store().is_some() {
                    Response::new(StatusCode::Ok)
                } else {
                    Response::new(StatusCode::InternalServerError)
                }
            })
            .config("store", "");
        router.get("/without", |ctx: crate::Context| async move {
            if ctx.store().is_some() {
                Response::new(StatusCode::InternalServerError)
            } else {
                Response::new(StatusCode::Ok)
            }
        });

        let raw = b"GET /with HTTP/1.1\r\nHost: x\r\n\r\n";
        let req = crate::Request::parse(raw).unwrap().0;
        assert_eq!(router.route(req).await.status(), StatusCode::Ok);

        let raw = b"GET /without HTTP/1.1\r\nHost: x\r\n\r\n";
        let req = crate::Request::parse(raw).unwrap().0;
        assert_eq!(router.route(req).await.status(), StatusCode::Ok);
    }
}
