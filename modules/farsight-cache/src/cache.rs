//! Shared TTL cache for adapter results.
//!
//! Stores both successful item fetches and typed negatives (NOTFOUND,
//! NOTPERMITTED) under `(source, method, scope, type, query)` keys. Lookups
//! that race an in-flight fill wait for it instead of duplicating the remote
//! call; a miss hands the caller a [`FillToken`] that must be completed (or
//! dropped) exactly once to release the waiters.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tracing::debug;

use farsight_common::{Item, Method, Query, QueryError, Scope};

const SHARD_COUNT: usize = 16;

/// Cache address: one per (source, method, scope, type, query) combination.
/// LIST keys carry an empty query.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub source: String,
    pub method: Method,
    pub scope: Scope,
    pub item_type: String,
    pub query: String,
}

impl CacheKey {
    pub fn new(
        source: impl Into<String>,
        method: Method,
        scope: Scope,
        item_type: impl Into<String>,
        query: impl Into<String>,
    ) -> Self {
        Self {
            source: source.into(),
            method,
            scope,
            item_type: item_type.into(),
            query: query.into(),
        }
    }

    pub fn for_query(source: &str, query: &Query) -> Self {
        Self::new(
            source,
            query.method,
            query.scope.clone(),
            query.item_type.clone(),
            query.query.clone(),
        )
    }

    /// The same address under a different method/query, used when one fetch
    /// populates GET, LIST and SEARCH entries at once.
    pub fn with_method(&self, method: Method, query: impl Into<String>) -> Self {
        Self {
            source: self.source.clone(),
            method,
            scope: self.scope.clone(),
            item_type: self.item_type.clone(),
            query: query.into(),
        }
    }

    fn shard(&self) -> usize {
        let mut hasher = DefaultHasher::new();
        self.hash(&mut hasher);
        (hasher.finish() as usize) % SHARD_COUNT
    }
}

struct Entry {
    expires_at: Instant,
    payload: Result<Vec<Item>, QueryError>,
}

enum Slot {
    Ready(Entry),
    InFlight { seq: u64, tx: watch::Sender<()> },
}

struct Inner {
    shards: Vec<Mutex<HashMap<CacheKey, Slot>>>,
    default_ttl: Duration,
    next_seq: AtomicU64,
}

/// Concurrency-safe, sharded TTL cache. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct Cache {
    inner: Arc<Inner>,
}

/// Outcome of a cache lookup.
pub enum Lookup {
    /// Fresh entry, including cached negatives.
    Hit(Result<Vec<Item>, QueryError>),
    /// The caller owns the fill for this key until the token is completed
    /// or dropped.
    Miss(FillToken),
}

impl Cache {
    pub fn new(default_ttl: Duration) -> Self {
        let shards = (0..SHARD_COUNT).map(|_| Mutex::new(HashMap::new())).collect();
        Self {
            inner: Arc::new(Inner {
                shards,
                default_ttl,
                next_seq: AtomicU64::new(1),
            }),
        }
    }

    pub fn default_ttl(&self) -> Duration {
        self.inner.default_ttl
    }

    /// Look up a key. On a miss the returned token marks the fill as
    /// in-flight: concurrent lookups of the same key wait for it rather than
    /// issuing their own remote call. `ignore_cache` skips both the read and
    /// the wait but still returns a token so the fresh result is stored.
    pub async fn lookup(&self, key: &CacheKey, ignore_cache: bool) -> Lookup {
        if ignore_cache {
            return Lookup::Miss(FillToken {
                cache: self.clone(),
                key: key.clone(),
                seq: None,
                done: false,
            });
        }

        loop {
            enum Step {
                Hit(Result<Vec<Item>, QueryError>),
                Miss(FillToken),
                Wait(watch::Receiver<()>),
            }

            let step = {
                let mut shard = self.shard_for(key);
                match shard.get(key) {
                    Some(Slot::Ready(entry)) if entry.expires_at > Instant::now() => {
                        Step::Hit(clone_payload(&entry.payload))
                    }
                    Some(Slot::InFlight { tx, .. }) => Step::Wait(tx.subscribe()),
                    _ => {
                        // Absent or expired: this caller becomes the filler.
                        let seq = self.inner.next_seq.fetch_add(1, Ordering::Relaxed);
                        let (tx, _rx) = watch::channel(());
                        shard.insert(key.clone(), Slot::InFlight { seq, tx });
                        Step::Miss(FillToken {
                            cache: self.clone(),
                            key: key.clone(),
                            seq: Some(seq),
                            done: false,
                        })
                    }
                }
            };

            match step {
                Step::Hit(payload) => return Lookup::Hit(payload),
                Step::Miss(token) => return Lookup::Miss(token),
                Step::Wait(mut rx) => {
                    // Wakes on completion (sender dropped with the slot) or
                    // abandonment; either way, re-examine the slot.
                    let _ = rx.changed().await;
                }
            }
        }
    }

    /// Append one item under a key, starting a fresh entry when none exists.
    /// LIST fills call this once per item while also storing each item under
    /// its singular GET key.
    pub fn store_item(&self, key: &CacheKey, item: Item, ttl: Duration) {
        let mut shard = self.shard_for(key);
        let now = Instant::now();
        match shard.get_mut(key) {
            Some(Slot::Ready(entry)) if entry.expires_at > now => {
                match &mut entry.payload {
                    Ok(items) => items.push(item),
                    // A fresh store supersedes a cached negative.
                    Err(_) => entry.payload = Ok(vec![item]),
                }
                entry.expires_at = now + ttl;
            }
            _ => {
                shard.insert(
                    key.clone(),
                    Slot::Ready(Entry {
                        expires_at: now + ttl,
                        payload: Ok(vec![item]),
                    }),
                );
            }
        }
    }

    /// Replace the entry under a key with a full item list.
    pub fn store_items(&self, key: &CacheKey, items: Vec<Item>, ttl: Duration) {
        let mut shard = self.shard_for(key);
        shard.insert(
            key.clone(),
            Slot::Ready(Entry {
                expires_at: Instant::now() + ttl,
                payload: Ok(items),
            }),
        );
    }

    /// Cache a typed negative so the miss is authoritative for the TTL window.
    pub fn store_error(&self, key: &CacheKey, error: QueryError, ttl: Duration) {
        let mut shard = self.shard_for(key);
        shard.insert(
            key.clone(),
            Slot::Ready(Entry {
                expires_at: Instant::now() + ttl,
                payload: Err(error),
            }),
        );
    }

    /// Invalidate every entry. Called when the adapter set is re-registered.
    pub fn clear(&self) {
        for shard in &self.inner.shards {
            shard.lock().expect("cache shard poisoned").clear();
        }
        debug!("Cache cleared");
    }

    fn shard_for(&self, key: &CacheKey) -> std::sync::MutexGuard<'_, HashMap<CacheKey, Slot>> {
        self.inner.shards[key.shard()]
            .lock()
            .expect("cache shard poisoned")
    }

    fn finish_fill(
        &self,
        key: &CacheKey,
        seq: Option<u64>,
        outcome: Option<(Result<Vec<Item>, QueryError>, Duration)>,
    ) {
        let mut shard = self.shard_for(key);
        let owns_slot = match (shard.get(key), seq) {
            (Some(Slot::InFlight { seq: current, .. }), Some(mine)) => *current == mine,
            _ => false,
        };
        match outcome {
            Some((payload, ttl)) => {
                // A token without an in-flight marker (ignore_cache) stores
                // unconditionally; a marker-owning token must still own its
                // slot, otherwise a concurrent bulk fill already superseded it.
                if seq.is_none() || owns_slot {
                    shard.insert(
                        key.clone(),
                        Slot::Ready(Entry {
                            expires_at: Instant::now() + ttl,
                            payload,
                        }),
                    );
                }
            }
            None => {
                if owns_slot {
                    // Abandon: drop the marker so a waiter can claim the fill.
                    shard.remove(key);
                }
            }
        }
    }
}

fn clone_payload(payload: &Result<Vec<Item>, QueryError>) -> Result<Vec<Item>, QueryError> {
    match payload {
        Ok(items) => Ok(items.clone()),
        Err(e) => Err(e.clone()),
    }
}

/// Grant to fill one cache key. Completing (or dropping) the token releases
/// every lookup waiting on the key; completion stores the outcome, a plain
/// drop releases without storing so a failed fill cannot wedge later callers.
pub struct FillToken {
    cache: Cache,
    key: CacheKey,
    /// The in-flight marker this token owns; None for ignore-cache fills.
    seq: Option<u64>,
    done: bool,
}

impl FillToken {
    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    pub fn complete_items(mut self, items: Vec<Item>, ttl: Duration) {
        self.done = true;
        self.cache.finish_fill(&self.key, self.seq, Some((Ok(items), ttl)));
    }

    pub fn complete_item(self, item: Item, ttl: Duration) {
        self.complete_items(vec![item], ttl);
    }

    pub fn complete_error(mut self, error: QueryError, ttl: Duration) {
        self.done = true;
        self.cache.finish_fill(&self.key, self.seq, Some((Err(error), ttl)));
    }

    /// Release waiters without storing anything. Required before re-looking
    /// up the same key (a held token self-deadlocks the second lookup).
    pub fn abandon(mut self) {
        self.done = true;
        self.cache.finish_fill(&self.key, self.seq, None);
    }
}

impl Drop for FillToken {
    fn drop(&mut self) {
        if !self.done {
            self.cache.finish_fill(&self.key, self.seq, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use farsight_common::ErrorKind;
    use serde_json::Map;

    fn test_item(unique: &str) -> Item {
        Item::new(
            "test-type",
            Scope::account("acct"),
            "id",
            &[unique],
            Map::new(),
        )
        .unwrap()
    }

    fn test_key(query: &str) -> CacheKey {
        CacheKey::new(
            "test-source",
            Method::Get,
            Scope::account("acct"),
            "test-type",
            query,
        )
    }

    fn ttl() -> Duration {
        Duration::from_secs(60)
    }

    #[tokio::test]
    async fn miss_then_hit() {
        let cache = Cache::new(ttl());
        let key = test_key("a");

        match cache.lookup(&key, false).await {
            Lookup::Miss(token) => token.complete_item(test_item("a"), ttl()),
            Lookup::Hit(_) => panic!("expected miss"),
        }

        match cache.lookup(&key, false).await {
            Lookup::Hit(Ok(items)) => {
                assert_eq!(items.len(), 1);
                assert_eq!(items[0].unique_attribute_value().unwrap(), "a");
            }
            _ => panic!("expected hit"),
        }
    }

    #[tokio::test]
    async fn negative_is_a_valid_hit() {
        let cache = Cache::new(ttl());
        let key = test_key("missing");
        cache.store_error(&key, QueryError::not_found("no such thing"), ttl());

        match cache.lookup(&key, false).await {
            Lookup::Hit(Err(e)) => assert_eq!(e.kind(), ErrorKind::NotFound),
            _ => panic!("expected cached negative"),
        }
    }

    #[tokio::test]
    async fn entries_expire() {
        let cache = Cache::new(ttl());
        let key = test_key("a");
        cache.store_item(&key, test_item("a"), Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(30)).await;

        match cache.lookup(&key, false).await {
            Lookup::Miss(token) => token.abandon(),
            Lookup::Hit(_) => panic!("expired entry must not hit"),
        }
    }

    #[tokio::test]
    async fn waiter_sees_the_in_flight_fill() {
        let cache = Cache::new(ttl());
        let key = test_key("a");

        let token = match cache.lookup(&key, false).await {
            Lookup::Miss(token) => token,
            Lookup::Hit(_) => panic!("expected miss"),
        };

        let waiter_cache = cache.clone();
        let waiter_key = key.clone();
        let waiter = tokio::spawn(async move {
            match waiter_cache.lookup(&waiter_key, false).await {
                Lookup::Hit(Ok(items)) => items.len(),
                _ => panic!("waiter expected the filled entry"),
            }
        });

        // Let the waiter park on the in-flight marker before completing.
        tokio::time::sleep(Duration::from_millis(20)).await;
        token.complete_item(test_item("a"), ttl());

        assert_eq!(waiter.await.unwrap(), 1);
    }

    #[tokio::test]
    async fn dropped_token_releases_waiters() {
        let cache = Cache::new(ttl());
        let key = test_key("a");

        let token = match cache.lookup(&key, false).await {
            Lookup::Miss(token) => token,
            Lookup::Hit(_) => panic!("expected miss"),
        };

        let waiter_cache = cache.clone();
        let waiter_key = key.clone();
        let waiter = tokio::spawn(async move {
            match waiter_cache.lookup(&waiter_key, false).await {
                // After the filler bails, the waiter inherits the fill.
                Lookup::Miss(token) => token.abandon(),
                Lookup::Hit(_) => panic!("nothing was stored"),
            }
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        drop(token);

        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter must not deadlock")
            .unwrap();
    }

    #[tokio::test]
    async fn ignore_cache_bypasses_but_still_stores() {
        let cache = Cache::new(ttl());
        let key = test_key("a");
        cache.store_item(&key, test_item("stale"), ttl());

        match cache.lookup(&key, true).await {
            Lookup::Miss(token) => token.complete_item(test_item("fresh"), ttl()),
            Lookup::Hit(_) => panic!("ignore_cache must bypass the read"),
        }

        match cache.lookup(&key, false).await {
            Lookup::Hit(Ok(items)) => {
                assert_eq!(items[0].unique_attribute_value().unwrap(), "fresh")
            }
            _ => panic!("fresh result must have been stored"),
        }
    }

    #[tokio::test]
    async fn store_item_appends_under_list_key() {
        let cache = Cache::new(ttl());
        let key = CacheKey::new(
            "test-source",
            Method::List,
            Scope::account("acct"),
            "test-type",
            "",
        );
        cache.store_item(&key, test_item("a"), ttl());
        cache.store_item(&key, test_item("b"), ttl());

        match cache.lookup(&key, false).await {
            Lookup::Hit(Ok(items)) => assert_eq!(items.len(), 2),
            _ => panic!("expected accumulated list"),
        }
    }

    #[tokio::test]
    async fn clear_empties_everything() {
        let cache = Cache::new(ttl());
        let key = test_key("a");
        cache.store_item(&key, test_item("a"), ttl());
        cache.clear();

        match cache.lookup(&key, false).await {
            Lookup::Miss(token) => token.abandon(),
            Lookup::Hit(_) => panic!("cleared cache must miss"),
        }
    }
}
