//! Runnable demo: two cached routes backed by the in-memory store.
//!
//! ```sh
//! cargo run --example cached_routes
//! curl http://127.0.0.1:8080/time            # recomputed every 5 seconds
//! curl http://127.0.0.1:8080/greet/alice     # cached forever per name
//! ```

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use routecache::plugin::StorePlugin;
use routecache::store::InMemoryStore;
use routecache::{CachePlugin, Response, Router, Server, StatusCode};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug")),
        )
        .init();

    let mut router = Router::new();

    // Store plugin first: it injects the handle the cache decorator uses.
    router.install(StorePlugin::new(Arc::new(InMemoryStore::new())))?;
    router.install(CachePlugin::new())?;

    // Identical output for 5 seconds at a time proves the cache is serving.
    router
        .get("/time", |_ctx| async {
            let now = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .expect("clock before epoch");
            Response::new(StatusCode::Ok).body(format!("computed at {:?}\n", now))
        })
        .name("time")
        .config("store", "")
        .config("cache_expire", "5");

    // One entry per distinct `name` wildcard, never expiring.
    router
        .get("/greet/:name", |ctx: routecache::Context| async move {
            let name = ctx.params().get("name").unwrap_or("world").to_owned();
            Response::new(StatusCode::Ok).body(format!("Hello, {name}!\n"))
        })
        .config("store", "")
        .config("cache_compress", "3");

    // Not declared for caching: recomputed on every request.
    router.get("/uncached", |_ctx| async {
        Response::new(StatusCode::Ok).body("fresh every time\n")
    });

    let server = Server::bind("127.0.0.1:8080").await?;
    println!("Listening on http://{}", server.local_addr());
    server.run(router).await?;
    Ok(())
}
