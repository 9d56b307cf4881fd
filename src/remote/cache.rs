use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::future::{BoxFuture, FutureExt, Shared};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::error::FetchError;
use crate::clock::{Clock, SystemClock};
use crate::config::{CacheConfig, RetryConfig};
use crate::state::Storage;

/// Share of the ceiling evicted in one pass
const EVICTION_FRACTION: f64 = 0.2;

/// One cached lookup result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry<T> {
    pub key: String,
    pub data: T,
    /// Insertion time (ms); expiry and eviction order are based on it
    pub timestamp: i64,
    pub access_count: u64,
    pub last_accessed: i64,
}

/// Persisted form of the whole cache
#[derive(Debug, Serialize, Deserialize)]
struct Snapshot<T> {
    version: u32,
    entries: Vec<CacheEntry<T>>,
}

type SharedFetch<T> = Shared<BoxFuture<'static, Result<T, FetchError>>>;

struct InFlight<T> {
    id: u64,
    future: SharedFetch<T>,
}

struct CacheState<T> {
    entries: HashMap<String, CacheEntry<T>>,
    in_flight: HashMap<String, InFlight<T>>,
    // Bumped by clear(); flights from an older generation are not stored
    generation: u64,
    next_request: u64,
    // Incremented for every snapshot taken, so writes can be ordered
    snapshot_seq: u64,
}

/// Serialized cache contents, taken under the state lock and written after it
struct PendingSnapshot {
    seq: u64,
    json: String,
}

struct Inner<T> {
    config: CacheConfig,
    retry: RetryConfig,
    clock: Arc<dyn Clock>,
    storage: Option<Arc<dyn Storage>>,
    state: Mutex<CacheState<T>>,
    // Sequence number of the last snapshot written to storage
    written: Mutex<u64>,
}

/// Memoizing, request-coalescing cache over read-only remote lookups.
///
/// - A live entry is returned without I/O.
/// - Concurrent fetches of the same key share one loader run.
/// - Transient failures are retried with linear backoff; others propagate.
/// - At the size ceiling the oldest 20% of entries go in one batch.
/// - With a storage backend, the full cache is snapshotted after every change
///   and restored (minus expired entries) on construction.
///
/// Cloning is cheap and shares the same cache.
pub struct RemoteCache<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for RemoteCache<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> RemoteCache<T>
where
    T: Clone + Send + Sync + Serialize + DeserializeOwned + 'static,
{
    /// In-memory cache on the wall clock
    pub fn new(config: CacheConfig, retry: RetryConfig) -> Self {
        Self::build(config, retry, Arc::new(SystemClock), None)
    }

    pub fn with_clock(config: CacheConfig, retry: RetryConfig, clock: Arc<dyn Clock>) -> Self {
        Self::build(config, retry, clock, None)
    }

    /// Cache persisted under `<namespace>-v<version>` in `storage`
    pub fn persistent(
        config: CacheConfig,
        retry: RetryConfig,
        clock: Arc<dyn Clock>,
        storage: Arc<dyn Storage>,
    ) -> Self {
        Self::build(config, retry, clock, Some(storage))
    }

    fn build(
        config: CacheConfig,
        retry: RetryConfig,
        clock: Arc<dyn Clock>,
        storage: Option<Arc<dyn Storage>>,
    ) -> Self {
        let inner = Inner {
            config,
            retry,
            clock,
            storage,
            state: Mutex::new(CacheState {
                entries: HashMap::new(),
                in_flight: HashMap::new(),
                generation: 0,
                next_request: 0,
                snapshot_seq: 0,
            }),
            written: Mutex::new(0),
        };

        let restored = inner.restore();
        if !restored.is_empty() {
            info!("📦 Restored {} cached lookups", restored.len());
        }
        inner.lock().entries = restored;

        Self {
            inner: Arc::new(inner),
        }
    }

    /// Return the cached value for `key`, or load it.
    ///
    /// `loader` is invoked once per attempt. Callers that arrive while a load
    /// for the same key is running wait for that load instead of starting
    /// another one, and all of them see the same result.
    pub async fn fetch<F, Fut>(&self, key: &str, loader: F) -> Result<T, FetchError>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, FetchError>> + Send + 'static,
    {
        let pending = {
            let mut state = self.inner.lock();
            let now = self.inner.clock.now_ms();

            match state.entries.get_mut(key) {
                Some(entry) if self.inner.is_live(entry, now) => {
                    entry.access_count += 1;
                    entry.last_accessed = now;
                    debug!(key, "cache hit");
                    return Ok(entry.data.clone());
                }
                Some(_) => {
                    debug!(key, "cache entry expired");
                    state.entries.remove(key);
                }
                None => {}
            }

            if let Some(flight) = state.in_flight.get(key) {
                debug!(key, "joining in-flight request");
                flight.future.clone()
            } else {
                debug!(key, "cache miss");
                let id = state.next_request;
                state.next_request += 1;
                let generation = state.generation;

                let inner = Arc::clone(&self.inner);
                let owned_key = key.to_string();
                let future = async move {
                    let result = load_with_retry(&owned_key, &loader, &inner.retry).await;
                    if let Some(pending) = inner.settle(&owned_key, id, generation, &result) {
                        write_in_background(&inner, pending).await;
                    }
                    result
                }
                .boxed()
                .shared();

                state.in_flight.insert(
                    key.to_string(),
                    InFlight {
                        id,
                        future: future.clone(),
                    },
                );
                future
            }
        };

        pending.await
    }

    /// Live entry for `key` without touching its access stats
    pub fn peek(&self, key: &str) -> Option<CacheEntry<T>> {
        let now = self.inner.clock.now_ms();
        self.inner
            .lock()
            .entries
            .get(key)
            .filter(|entry| self.inner.is_live(entry, now))
            .cloned()
    }

    /// Drop one entry. Returns whether it was present.
    pub fn invalidate(&self, key: &str) -> bool {
        let pending = {
            let mut state = self.inner.lock();
            if state.entries.remove(key).is_none() {
                return false;
            }
            self.inner.snapshot(&mut state)
        };
        if let Some(pending) = pending {
            self.inner.write_snapshot(pending);
        }
        true
    }

    /// Stored entries, including expired ones not yet purged
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every entry, every in-flight tracker and the persisted snapshot
    pub fn clear(&self) {
        let seq = {
            let mut state = self.inner.lock();
            state.entries.clear();
            state.in_flight.clear();
            state.generation += 1;
            state.snapshot_seq += 1;
            state.snapshot_seq
        };

        if let Some(storage) = &self.inner.storage {
            let mut written = self.inner.written();
            if let Err(e) = storage.remove(&self.inner.config.storage_key()) {
                warn!("⚠️  Could not remove cache snapshot: {}", e);
            }
            // Snapshots taken before the clear must not bring entries back
            *written = (*written).max(seq);
        }
        info!("🧹 Remote cache cleared");
    }
}

impl<T> Inner<T>
where
    T: Clone + Serialize + DeserializeOwned,
{
    fn lock(&self) -> MutexGuard<'_, CacheState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn written(&self) -> MutexGuard<'_, u64> {
        self.written.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn ttl_ms(&self) -> i64 {
        i64::try_from(self.config.ttl().as_millis()).unwrap_or(i64::MAX)
    }

    fn is_live(&self, entry: &CacheEntry<T>, now: i64) -> bool {
        now.saturating_sub(entry.timestamp) < self.ttl_ms()
    }

    fn max_entries(&self) -> usize {
        self.config.max_entries.max(1)
    }

    /// Record the outcome of a finished load.
    ///
    /// Returns the snapshot to write once the state lock is released.
    fn settle(
        &self,
        key: &str,
        id: u64,
        generation: u64,
        result: &Result<T, FetchError>,
    ) -> Option<PendingSnapshot> {
        let mut state = self.lock();

        if state.in_flight.get(key).is_some_and(|flight| flight.id == id) {
            state.in_flight.remove(key);
        }

        if state.generation != generation {
            debug!(key, "cache cleared while loading, dropping result");
            return None;
        }

        let data = result.as_ref().ok()?;
        let now = self.clock.now_ms();
        self.insert(&mut state, key, data.clone(), now);
        self.snapshot(&mut state)
    }

    fn insert(&self, state: &mut CacheState<T>, key: &str, data: T, now: i64) {
        state.entries.retain(|_, entry| self.is_live(entry, now));

        let max = self.max_entries();
        if !state.entries.contains_key(key) && state.entries.len() >= max {
            let batch = (max as f64 * EVICTION_FRACTION).ceil() as usize;
            let excess = state.entries.len() + 1 - max;
            let evict = batch.max(excess).max(1);
            evict_oldest(&mut state.entries, evict);
            debug!(evicted = evict, "cache at capacity, evicted oldest entries");
        }

        state.entries.insert(
            key.to_string(),
            CacheEntry {
                key: key.to_string(),
                data,
                timestamp: now,
                access_count: 0,
                last_accessed: now,
            },
        );
    }

    /// Serialize the full cache; `None` without a storage backend
    fn snapshot(&self, state: &mut CacheState<T>) -> Option<PendingSnapshot> {
        self.storage.as_ref()?;

        let mut entries: Vec<CacheEntry<T>> = state.entries.values().cloned().collect();
        entries.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.key.cmp(&b.key)));
        let snapshot = Snapshot {
            version: self.config.version,
            entries,
        };

        state.snapshot_seq += 1;
        match serde_json::to_string(&snapshot) {
            Ok(json) => Some(PendingSnapshot {
                seq: state.snapshot_seq,
                json,
            }),
            Err(e) => {
                warn!("⚠️  Could not serialize cache snapshot: {}", e);
                None
            }
        }
    }

    /// Write a snapshot unless a newer one already landed. Failures are logged only.
    fn write_snapshot(&self, pending: PendingSnapshot) {
        let Some(storage) = &self.storage else {
            return;
        };

        let mut written = self.written();
        if pending.seq <= *written {
            debug!(seq = pending.seq, "skipping outdated cache snapshot");
            return;
        }
        match storage.set(&self.config.storage_key(), &pending.json) {
            Ok(()) => *written = pending.seq,
            Err(e) => warn!("⚠️  Could not persist cache snapshot: {}", e),
        }
    }

    /// Load the persisted snapshot, skipping anything already expired
    fn restore(&self) -> HashMap<String, CacheEntry<T>> {
        let Some(storage) = &self.storage else {
            return HashMap::new();
        };

        let key = self.config.storage_key();
        let raw = match storage.get(&key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return HashMap::new(),
            Err(e) => {
                warn!("⚠️  Could not read cache snapshot {}: {}", key, e);
                return HashMap::new();
            }
        };

        let snapshot: Snapshot<T> = match serde_json::from_str(&raw) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!("⚠️  Cache snapshot {} is corrupt, starting empty: {}", key, e);
                return HashMap::new();
            }
        };
        if snapshot.version != self.config.version {
            warn!("⚠️  Cache snapshot {} has version {}, ignoring", key, snapshot.version);
            return HashMap::new();
        }

        let now = self.clock.now_ms();
        let mut entries: HashMap<String, CacheEntry<T>> = snapshot
            .entries
            .into_iter()
            .filter(|entry| self.is_live(entry, now))
            .map(|entry| (entry.key.clone(), entry))
            .collect();

        let max = self.max_entries();
        if entries.len() > max {
            let excess = entries.len() - max;
            evict_oldest(&mut entries, excess);
        }
        entries
    }
}

/// Write a snapshot on the blocking pool; storage backends do synchronous I/O
async fn write_in_background<T>(inner: &Arc<Inner<T>>, pending: PendingSnapshot)
where
    T: Clone + Send + Sync + Serialize + DeserializeOwned + 'static,
{
    let writer = Arc::clone(inner);
    if let Err(e) = tokio::task::spawn_blocking(move || writer.write_snapshot(pending)).await {
        warn!("⚠️  Cache snapshot writer failed: {}", e);
    }
}

fn evict_oldest<T>(entries: &mut HashMap<String, CacheEntry<T>>, count: usize) {
    let mut by_age: Vec<(i64, String)> = entries
        .values()
        .map(|entry| (entry.timestamp, entry.key.clone()))
        .collect();
    by_age.sort();

    for (_, key) in by_age.into_iter().take(count) {
        entries.remove(&key);
    }
}

/// Run `loader` until it succeeds, fails for good, or attempts run out
async fn load_with_retry<T, F, Fut>(key: &str, loader: &F, retry: &RetryConfig) -> Result<T, FetchError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, FetchError>>,
{
    let max_attempts = retry.max_attempts.max(1);
    let timeout = retry.request_timeout();
    let mut attempt = 1;

    loop {
        let outcome = match tokio::time::timeout(timeout, loader()).await {
            Ok(outcome) => outcome,
            Err(_) => Err(FetchError::Timeout(timeout)),
        };

        match outcome {
            Ok(data) => return Ok(data),
            Err(e) if e.is_transient() && attempt < max_attempts => {
                let delay = retry.base_delay() * attempt;
                warn!(key, attempt, "⚠️  Fetch failed, retrying in {:?}: {}", delay, e);
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => {
                warn!(key, attempt, "❌ Fetch failed: {}", e);
                return Err(e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::state::{MemoryStorage, StorageError};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::time::Instant;

    const START: i64 = 1_700_000_000_000;

    fn config(max_entries: usize) -> CacheConfig {
        CacheConfig {
            ttl_secs: 60,
            max_entries,
            namespace: "test-cache".to_string(),
            version: 1,
        }
    }

    fn retry() -> RetryConfig {
        RetryConfig {
            max_attempts: 3,
            base_delay_ms: 100,
            request_timeout_ms: 10_000,
        }
    }

    fn cache(max_entries: usize) -> (RemoteCache<String>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(START));
        let cache = RemoteCache::with_clock(config(max_entries), retry(), clock.clone());
        (cache, clock)
    }

    /// Loader that counts calls and returns `value`
    fn counting(
        calls: &Arc<AtomicUsize>,
        value: &str,
    ) -> impl Fn() -> BoxFuture<'static, Result<String, FetchError>> + Send + Sync + 'static {
        let calls = Arc::clone(calls);
        let value = value.to_string();
        move || {
            calls.fetch_add(1, Ordering::SeqCst);
            let value = value.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                Ok(value)
            }
            .boxed()
        }
    }

    /// Loader that counts calls, records their times and always fails with `error`
    fn failing(
        calls: &Arc<Mutex<Vec<Instant>>>,
        error: FetchError,
    ) -> impl Fn() -> BoxFuture<'static, Result<String, FetchError>> + Send + Sync + 'static {
        let calls = Arc::clone(calls);
        move || {
            calls.lock().unwrap().push(Instant::now());
            let error = error.clone();
            async move { Err(error) }.boxed()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_hit_skips_loader() {
        let (cache, _) = cache(10);
        let calls = Arc::new(AtomicUsize::new(0));

        assert_eq!(cache.fetch("subject:6", counting(&calls, "charizard")).await.unwrap(), "charizard");
        assert_eq!(cache.fetch("subject:6", counting(&calls, "other")).await.unwrap(), "charizard");
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let entry = cache.peek("subject:6").unwrap();
        assert_eq!(entry.access_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_fetches_coalesce() {
        let (cache, _) = cache(10);
        let calls = Arc::new(AtomicUsize::new(0));

        let (a, b, c) = tokio::join!(
            cache.fetch("subject:25", counting(&calls, "pikachu")),
            cache.fetch("subject:25", counting(&calls, "pikachu")),
            cache.fetch("subject:25", counting(&calls, "pikachu")),
        );

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(a.unwrap(), "pikachu");
        assert_eq!(b.unwrap(), "pikachu");
        assert_eq!(c.unwrap(), "pikachu");
    }

    #[tokio::test(start_paused = true)]
    async fn test_different_keys_are_independent() {
        let (cache, _) = cache(10);
        let calls = Arc::new(AtomicUsize::new(0));

        let (a, b) = tokio::join!(
            cache.fetch("subject:1", counting(&calls, "bulbasaur")),
            cache.fetch("subject:4", counting(&calls, "charmander")),
        );

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(a.unwrap(), "bulbasaur");
        assert_eq!(b.unwrap(), "charmander");
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_entry_is_a_miss() {
        let (cache, clock) = cache(10);
        let calls = Arc::new(AtomicUsize::new(0));

        cache.fetch("k", counting(&calls, "v1")).await.unwrap();
        clock.advance(59_999);
        assert_eq!(cache.fetch("k", counting(&calls, "v2")).await.unwrap(), "v1");

        clock.advance(1);
        assert!(cache.peek("k").is_none());
        assert_eq!(cache.fetch("k", counting(&calls, "v2")).await.unwrap(), "v2");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_eviction_keeps_cache_under_ceiling() {
        let (cache, clock) = cache(10);
        let calls = Arc::new(AtomicUsize::new(0));

        for i in 0..10 {
            cache.fetch(&format!("k{i}"), counting(&calls, "v")).await.unwrap();
            clock.advance(10);
        }
        assert_eq!(cache.len(), 10);

        // Reaching the ceiling evicts the oldest 20% in one pass
        cache.fetch("k10", counting(&calls, "v")).await.unwrap();
        assert_eq!(cache.len(), 9);
        assert!(cache.peek("k0").is_none());
        assert!(cache.peek("k1").is_none());
        assert!(cache.peek("k2").is_some());
        assert!(cache.peek("k10").is_some());

        for i in 11..40 {
            clock.advance(10);
            cache.fetch(&format!("k{i}"), counting(&calls, "v")).await.unwrap();
            assert!(cache.len() <= 10);
        }
        assert!(cache.peek("k39").is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_eviction_with_tiny_ceiling() {
        let (cache, clock) = cache(1);
        let calls = Arc::new(AtomicUsize::new(0));

        cache.fetch("a", counting(&calls, "1")).await.unwrap();
        clock.advance(1);
        cache.fetch("b", counting(&calls, "2")).await.unwrap();

        assert_eq!(cache.len(), 1);
        assert!(cache.peek("a").is_none());
        assert!(cache.peek("b").is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failure_retried_then_surfaced() {
        let (cache, _) = cache(10);
        let calls = Arc::new(Mutex::new(Vec::new()));
        let unavailable = FetchError::status(503, "service unavailable");

        let result = cache.fetch("subject:6", failing(&calls, unavailable.clone())).await;
        assert_eq!(result, Err(unavailable));

        let times = calls.lock().unwrap().clone();
        assert_eq!(times.len(), 3);
        assert_eq!(times[1] - times[0], Duration::from_millis(100));
        assert_eq!(times[2] - times[1], Duration::from_millis(200));

        // Failures are not cached
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_client_error_is_not_retried() {
        let (cache, _) = cache(10);
        let calls = Arc::new(Mutex::new(Vec::new()));
        let missing = FetchError::status(404, "not found");

        let result = cache.fetch("subject:missingno", failing(&calls, missing.clone())).await;
        assert_eq!(result, Err(missing.clone()));
        assert_eq!(calls.lock().unwrap().len(), 1);

        // The in-flight tracker is gone, so the next fetch tries again
        let _ = cache.fetch("subject:missingno", failing(&calls, missing)).await;
        assert_eq!(calls.lock().unwrap().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovers_after_transient_failure() {
        let (cache, _) = cache(10);
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);

        let loader = move || {
            let attempt = counter.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt == 0 {
                    Err(FetchError::Network("connection reset".to_string()))
                } else {
                    Ok("eevee".to_string())
                }
            }
        };

        assert_eq!(cache.fetch("subject:133", loader).await.unwrap(), "eevee");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(cache.peek("subject:133").is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_attempts_time_out() {
        let (cache, _) = cache(10);
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);

        let loader = move || {
            counter.fetch_add(1, Ordering::SeqCst);
            async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok("too late".to_string())
            }
        };

        let result = cache.fetch("slow", loader).await;
        assert_eq!(result, Err(FetchError::Timeout(Duration::from_secs(10))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_snapshot_restored_across_instances() {
        let clock = Arc::new(ManualClock::new(START));
        let storage = Arc::new(MemoryStorage::new("test"));
        let calls = Arc::new(AtomicUsize::new(0));

        let first: RemoteCache<String> =
            RemoteCache::persistent(config(10), retry(), clock.clone(), storage.clone());
        first.fetch("subject:6", counting(&calls, "charizard")).await.unwrap();
        assert!(storage.get("test-cache-v1").unwrap().is_some());

        let second: RemoteCache<String> =
            RemoteCache::persistent(config(10), retry(), clock.clone(), storage.clone());
        assert_eq!(second.fetch("subject:6", counting(&calls, "stale")).await.unwrap(), "charizard");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restore_skips_expired_entries() {
        let clock = Arc::new(ManualClock::new(START));
        let storage = Arc::new(MemoryStorage::new("test"));
        let calls = Arc::new(AtomicUsize::new(0));

        let first: RemoteCache<String> =
            RemoteCache::persistent(config(10), retry(), clock.clone(), storage.clone());
        first.fetch("old", counting(&calls, "old")).await.unwrap();
        clock.advance(30_000);
        first.fetch("fresh", counting(&calls, "fresh")).await.unwrap();
        clock.advance(40_000);

        let second: RemoteCache<String> =
            RemoteCache::persistent(config(10), retry(), clock.clone(), storage.clone());
        assert_eq!(second.len(), 1);
        assert!(second.peek("fresh").is_some());
        assert!(second.peek("old").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_corrupt_snapshot_starts_empty() {
        let clock = Arc::new(ManualClock::new(START));
        let storage = Arc::new(MemoryStorage::new("test"));
        storage.set("test-cache-v1", "{\"version\":1,\"entries\":[{").unwrap();

        let cache: RemoteCache<String> = RemoteCache::persistent(config(10), retry(), clock, storage);
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_version_bump_ignores_old_snapshot() {
        let clock = Arc::new(ManualClock::new(START));
        let storage = Arc::new(MemoryStorage::new("test"));
        let calls = Arc::new(AtomicUsize::new(0));

        let v1: RemoteCache<String> =
            RemoteCache::persistent(config(10), retry(), clock.clone(), storage.clone());
        v1.fetch("k", counting(&calls, "v")).await.unwrap();

        let mut bumped = config(10);
        bumped.version = 2;
        let v2: RemoteCache<String> = RemoteCache::persistent(bumped, retry(), clock, storage);
        assert!(v2.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_drops_entries_and_snapshot() {
        let clock = Arc::new(ManualClock::new(START));
        let storage = Arc::new(MemoryStorage::new("test"));
        let calls = Arc::new(AtomicUsize::new(0));

        let cache: RemoteCache<String> =
            RemoteCache::persistent(config(10), retry(), clock, storage.clone());
        cache.fetch("k", counting(&calls, "v")).await.unwrap();

        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(storage.get("test-cache-v1").unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_result_of_flight_cleared_midway_is_not_stored() {
        let (cache, _) = cache(10);
        let calls = Arc::new(AtomicUsize::new(0));

        let fetch = cache.fetch("k", counting(&calls, "v"));
        let clear = async {
            tokio::task::yield_now().await;
            cache.clear();
        };
        let (result, ()) = tokio::join!(fetch, clear);

        assert_eq!(result.unwrap(), "v");
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalidate() {
        let (cache, _) = cache(10);
        let calls = Arc::new(AtomicUsize::new(0));

        cache.fetch("k", counting(&calls, "v")).await.unwrap();
        assert!(cache.invalidate("k"));
        assert!(!cache.invalidate("k"));
        cache.fetch("k", counting(&calls, "v")).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    /// Storage that records whether the cache state was locked during each write
    struct LockCheckingStorage {
        inner: MemoryStorage,
        cache: std::sync::OnceLock<RemoteCache<String>>,
        unlocked_writes: Mutex<Vec<bool>>,
    }

    impl Storage for LockCheckingStorage {
        fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
            self.inner.get(key)
        }

        fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
            if let Some(cache) = self.cache.get() {
                let unlocked = cache.inner.state.try_lock().is_ok();
                self.unlocked_writes.lock().unwrap().push(unlocked);
            }
            self.inner.set(key, value)
        }

        fn remove(&self, key: &str) -> Result<(), StorageError> {
            self.inner.remove(key)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_snapshot_written_without_holding_cache_lock() {
        let clock = Arc::new(ManualClock::new(START));
        let storage = Arc::new(LockCheckingStorage {
            inner: MemoryStorage::new("test"),
            cache: std::sync::OnceLock::new(),
            unlocked_writes: Mutex::new(Vec::new()),
        });
        let calls = Arc::new(AtomicUsize::new(0));

        let cache: RemoteCache<String> =
            RemoteCache::persistent(config(10), retry(), clock, storage.clone());
        assert!(storage.cache.set(cache.clone()).is_ok());

        cache.fetch("a", counting(&calls, "1")).await.unwrap();
        cache.fetch("b", counting(&calls, "2")).await.unwrap();
        assert!(cache.invalidate("a"));

        let writes = storage.unlocked_writes.lock().unwrap().clone();
        assert_eq!(writes, vec![true, true, true]);
        assert!(storage.inner.get("test-cache-v1").unwrap().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_outdated_snapshot_never_overwrites_newer() {
        let clock = Arc::new(ManualClock::new(START));
        let storage = Arc::new(MemoryStorage::new("test"));
        let calls = Arc::new(AtomicUsize::new(0));

        let cache: RemoteCache<String> =
            RemoteCache::persistent(config(10), retry(), clock.clone(), storage.clone());
        cache.fetch("a", counting(&calls, "1")).await.unwrap();

        let (older, newer) = {
            let mut state = cache.inner.lock();
            let older = cache.inner.snapshot(&mut state).unwrap();
            state.entries.remove("a");
            let newer = cache.inner.snapshot(&mut state).unwrap();
            (older, newer)
        };
        cache.inner.write_snapshot(newer);
        cache.inner.write_snapshot(older);

        let restored: RemoteCache<String> =
            RemoteCache::persistent(config(10), retry(), clock, storage);
        assert!(restored.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_snapshot_taken_before_clear_is_dropped() {
        let clock = Arc::new(ManualClock::new(START));
        let storage = Arc::new(MemoryStorage::new("test"));
        let calls = Arc::new(AtomicUsize::new(0));

        let cache: RemoteCache<String> =
            RemoteCache::persistent(config(10), retry(), clock, storage.clone());
        cache.fetch("a", counting(&calls, "1")).await.unwrap();

        let stale = {
            let mut state = cache.inner.lock();
            cache.inner.snapshot(&mut state).unwrap()
        };
        cache.clear();
        cache.inner.write_snapshot(stale);

        assert_eq!(storage.get("test-cache-v1").unwrap(), None);
    }
}
