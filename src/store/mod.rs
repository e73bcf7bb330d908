//! Key/value store interface — the external caching service consumed by the
//! route-result cache.
//!
//! [`Store`] mirrors the narrow surface of a memcache-style client: `get` by
//! key and `set` with an expire time (seconds, 0 = never) and a compression
//! level (0–9, 0 = none). Compression and entry eviction are the store's own
//! concern; this crate only passes the parameters through.
//!
//! [`InMemoryStore`] is the bundled backend: a tokio `RwLock` over a map
//! with lazy TTL expiry against [`tokio::time::Instant`], so tests can drive
//! expiry with the paused test clock.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use bytes::Bytes;
use thiserror::Error;
use tokio::sync::RwLock;
use tokio::time::{Duration, Instant};

/// Errors produced by a store backend.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Boxed future returned by [`Store`] methods, keeping the trait object-safe.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + Send + 'a>>;

/// A memcache-compatible key/value store.
///
/// Implementations are shared across tokio tasks behind `Arc<dyn Store>`,
/// so both methods take `&self`.
pub trait Store: Send + Sync {
    /// Look up a value by key. `Ok(None)` means the key is absent or expired.
    fn get(&self, key: &str) -> StoreFuture<'_, Option<Bytes>>;

    /// Store a value under `key`.
    ///
    /// `expire_secs` of 0 means the entry never expires. `compress_level`
    /// (0–9) is forwarded to the backend; 0 means no compression.
    fn set(
        &self,
        key: &str,
        value: Bytes,
        expire_secs: u64,
        compress_level: u32,
    ) -> StoreFuture<'_, ()>;
}

/// A cloneable handle to the store, injected into request extensions by the
/// store plugin so handlers and the cache decorator can reach it.
#[derive(Clone)]
pub struct StoreHandle(pub Arc<dyn Store>);

struct Entry {
    value: Bytes,
    expires_at: Option<Instant>,
    // Recorded for parity with external backends; the in-memory store does
    // not compress.
    #[allow(dead_code)]
    compress_level: u32,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|deadline| now >= deadline)
    }
}

/// In-process store backend with per-entry TTL.
///
/// # Examples
///
/// ```
/// use bytes::Bytes;
/// use routecache::store::{InMemoryStore, Store};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let store = InMemoryStore::new();
/// store.set("k", Bytes::from_static(b"v"), 0, 0).await.unwrap();
/// assert_eq!(store.get("k").await.unwrap(), Some(Bytes::from_static(b"v")));
/// # }
/// ```
#[derive(Default)]
pub struct InMemoryStore {
    entries: RwLock<HashMap<String, Entry>>,
}

impl InMemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every entry. Handy in test teardown.
    pub async fn flush(&self) {
        self.entries.write().await.clear();
    }

    /// Number of live (non-expired) entries.
    pub async fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .read()
            .await
            .values()
            .filter(|entry| !entry.is_expired(now))
            .count()
    }

    /// Returns `true` if the store holds no live entries.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl Store for InMemoryStore {
    fn get(&self, key: &str) -> StoreFuture<'_, Option<Bytes>> {
        let key = key.to_owned();
        Box::pin(async move {
            let mut entries = self.entries.write().await;
            match entries.get(&key) {
                Some(entry) if entry.is_expired(Instant::now()) => {
                    entries.remove(&key);
                    Ok(None)
                }
                Some(entry) => Ok(Some(entry.value.clone())),
                None => Ok(None),
            }
        })
    }

    fn set(
        &self,
        key: &str,
        value: Bytes,
        expire_secs: u64,
        compress_level: u32,
    ) -> StoreFuture<'_, ()> {
        let key = key.to_owned();
        Box::pin(async move {
            let expires_at =
                (expire_secs > 0).then(|| Instant::now() + Duration::from_secs(expire_secs));
            self.entries.write().await.insert(
                key,
                Entry {
                    value,
                    expires_at,
                    compress_level,
                },
            );
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn get_missing_key() {
        let store = InMemoryStore::new();
        assert_eq!(store.get("nope").await.unwrap(), None);
    }

    #[tokio::test]
    async fn set_then_get() {
        let store = InMemoryStore::new();
        store
            .set("greeting", Bytes::from_static(b"hello"), 0, 0)
            .await
            .unwrap();
        assert_eq!(
            store.get("greeting").await.unwrap(),
            Some(Bytes::from_static(b"hello"))
        );
    }

    #[tokio::test]
    async fn overwrite_is_last_write_wins() {
        let store = InMemoryStore::new();
        store.set("k", Bytes::from_static(b"a"), 0, 0).await.unwrap();
        store.set("k", Bytes::from_static(b"b"), 0, 0).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some(Bytes::from_static(b"b")));
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn entry_expires_after_ttl() {
        let store = InMemoryStore::new();
        store.set("k", Bytes::from_static(b"v"), 2, 0).await.unwrap();

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(store.get("k").await.unwrap().is_some());

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(store.get("k").await.unwrap(), None);
        assert!(store.is_empty().await);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_expire_never_expires() {
        let store = InMemoryStore::new();
        store.set("k", Bytes::from_static(b"v"), 0, 0).await.unwrap();
        tokio::time::advance(Duration::from_secs(60 * 60 * 24)).await;
        assert!(store.get("k").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn flush_drops_everything() {
        let store = InMemoryStore::new();
        store.set("a", Bytes::from_static(b"1"), 0, 3).await.unwrap();
        store.set("b", Bytes::from_static(b"2"), 0, 0).await.unwrap();
        store.flush().await;
        assert!(store.is_empty().await);
    }
}
