//! # routecache
//!
//! Route-result caching for a from-scratch async HTTP/1.1 framework.
//!
//! The crate bundles a small router/server and two plugins that together
//! cache handler results in a memcache-style key/value store:
//!
//! - [`plugin::StorePlugin`] injects a store handle into requests whose
//!   route declares the store keyword.
//! - [`CachePlugin`] wraps those routes' handlers: it derives a cache key
//!   from the route (name or rule), the matched wildcard values, the query
//!   parameters, and an allow-list of headers, then serves the stored
//!   response on a hit or runs the handler and stores the result on a miss.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use routecache::{CachePlugin, Response, Router, Server, StatusCode};
//! use routecache::plugin::StorePlugin;
//! use routecache::store::InMemoryStore;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut router = Router::new();
//!
//!     // The store plugin must be installed first so the handle is
//!     // available before the cache decorator looks for it.
//!     router.install(StorePlugin::new(Arc::new(InMemoryStore::new())))?;
//!     router.install(CachePlugin::new())?;
//!
//!     // Cached for an hour per distinct `name`, compression level 3.
//!     router
//!         .get("/hello/:name", |ctx: routecache::Context| async move {
//!             let name = ctx.params().get("name").unwrap_or("world").to_owned();
//!             Response::new(StatusCode::Ok).body(format!("Hello, {name}!"))
//!         })
//!         .config("store", "")
//!         .config("cache_expire", "3600")
//!         .config("cache_compress", "3");
//!
//!     let server = Server::bind("127.0.0.1:8080").await?;
//!     server.run(router).await?;
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod context;
pub mod http;
pub mod plugin;
pub mod router;
pub mod server;
pub mod store;

// ── Convenience re-exports ────────────────────────────────────────────────────
pub use cache::CachePlugin;
pub use context::Context;
pub use http::{Headers, Method, Request, Response, StatusCode};
pub use plugin::{Plugin, PluginError};
pub use router::Router;
pub use server::{Server, ServerError};
pub use store::{InMemoryStore, Store};
