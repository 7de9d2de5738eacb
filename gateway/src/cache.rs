//! Cache-aside store with TTL and single-flight population.
//!
//! Concurrent misses on one key share a single factory run (a "flight").
//! Each caller can stop waiting on its own; when the last waiter leaves an
//! unfinished flight, the flight's cancellation token fires and the slot is
//! released so the next caller starts over.

use std::any::Any;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use fxgate_common::{GatewayError, Result};

type Value = Arc<dyn Any + Send + Sync>;
type FlightResult = Shared<BoxFuture<'static, Result<Value>>>;

/// Cached value.
struct CacheEntry {
    value: Value,
    expires_at: Instant,
}

impl CacheEntry {
    fn new(value: Value, ttl: Duration) -> Self {
        Self {
            value,
            expires_at: Instant::now() + ttl,
        }
    }

    fn is_live(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

/// One in-progress factory run and the callers waiting on it.
struct Flight {
    id: u64,
    result: FlightResult,
    cancel: CancellationToken,
    waiters: Mutex<Waiters>,
}

struct Waiters {
    count: usize,
    closed: bool,
}

impl Flight {
    /// Register another waiter. Fails once the flight has been abandoned.
    fn try_join(&self) -> bool {
        let mut waiters = self.waiters.lock();
        if waiters.closed {
            return false;
        }
        waiters.count += 1;
        true
    }

    /// Unregister a waiter. Returns true if it was the last one and the
    /// result is not ready yet.
    fn leave(&self) -> bool {
        let mut waiters = self.waiters.lock();
        waiters.count = waiters.count.saturating_sub(1);
        if waiters.count > 0 || waiters.closed {
            return false;
        }
        waiters.closed = true;
        self.result.peek().is_none()
    }
}

#[derive(Default)]
struct CacheInner {
    entries: DashMap<String, CacheEntry>,
    flights: DashMap<String, Arc<Flight>>,
    next_flight: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    fetches: AtomicU64,
}

/// A caller's membership in a flight; leaving is tied to drop.
struct FlightWaiter {
    inner: Arc<CacheInner>,
    key: String,
    flight: Arc<Flight>,
}

impl FlightWaiter {
    fn result(&self) -> FlightResult {
        self.flight.result.clone()
    }
}

impl Drop for FlightWaiter {
    fn drop(&mut self) {
        if self.flight.leave() {
            self.flight.cancel.cancel();
            let id = self.flight.id;
            self.inner.flights.remove_if(&self.key, |_, flight| flight.id == id);
            debug!(key = %self.key, "All waiters left, fetch cancelled");
        }
    }
}

enum Joined {
    Ready(Value),
    Waiting(FlightWaiter),
}

/// Thread-safe, type-erased cache with per-entry TTL.
///
/// Cloning is cheap and clones share the same store.
#[derive(Clone, Default)]
pub struct RateCache {
    inner: Arc<CacheInner>,
}

impl RateCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the live value under `key`, or run `factory` to produce and
    /// store one for `ttl`.
    ///
    /// Concurrent callers missing the same key share one factory run and
    /// all receive its value or its error. Errors are never cached.
    /// `cancel` only ends this caller's wait; the factory receives a token
    /// of its own that fires once no caller is waiting any more.
    pub async fn get_or_create<T, F, Fut>(
        &self,
        key: &str,
        ttl: Duration,
        cancel: &CancellationToken,
        factory: F,
    ) -> Result<Arc<T>>
    where
        T: Send + Sync + 'static,
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        if let Some(value) = self.lookup(key) {
            self.inner.hits.fetch_add(1, Ordering::Relaxed);
            debug!(key, "Cache hit");
            return downcast(key, value);
        }
        self.inner.misses.fetch_add(1, Ordering::Relaxed);
        debug!(key, "Cache miss");

        let waiter = match self.join_or_start(key, ttl, factory) {
            Joined::Ready(value) => return downcast(key, value),
            Joined::Waiting(waiter) => waiter,
        };

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(GatewayError::Cancelled),
            result = waiter.result() => result,
        };
        drop(waiter);

        downcast(key, result?)
    }

    /// Get a live value without populating the cache.
    ///
    /// Returns `None` on a miss or if the value is not a `T`.
    pub fn get<T: Send + Sync + 'static>(&self, key: &str) -> Option<Arc<T>> {
        self.lookup(key)?.downcast::<T>().ok()
    }

    /// Store `value` under `key` for `ttl`, replacing any previous value.
    pub fn set<T: Send + Sync + 'static>(&self, key: &str, value: T, ttl: Duration) {
        let value: Value = Arc::new(value);
        self.inner
            .entries
            .insert(key.to_string(), CacheEntry::new(value, ttl));
    }

    /// Remove a value from the cache.
    pub fn remove(&self, key: &str) {
        self.inner.entries.remove(key);
    }

    /// Clear all cached values. Flights in progress are not affected.
    pub fn clear(&self) {
        self.inner.entries.clear();
    }

    /// Number of stored entries, expired ones included.
    pub fn len(&self) -> usize {
        self.inner.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.entries.is_empty()
    }

    /// Evict expired entries.
    pub fn evict_expired(&self) {
        let now = Instant::now();
        self.inner.entries.retain(|_, entry| entry.is_live(now));
    }

    /// Get cache statistics.
    pub fn stats(&self) -> CacheStats {
        let now = Instant::now();
        let total = self.inner.entries.len();
        let live = self
            .inner
            .entries
            .iter()
            .filter(|e| e.is_live(now))
            .count();

        CacheStats {
            total_entries: total,
            live_entries: live,
            expired_entries: total.saturating_sub(live),
            in_flight: self.inner.flights.len(),
            hits: self.inner.hits.load(Ordering::Relaxed),
            misses: self.inner.misses.load(Ordering::Relaxed),
            fetches: self.inner.fetches.load(Ordering::Relaxed),
        }
    }

    /// Live value under `key`. Expired entries are evicted on the way.
    fn lookup(&self, key: &str) -> Option<Value> {
        let now = Instant::now();
        if let Some(entry) = self.inner.entries.get(key) {
            if entry.is_live(now) {
                return Some(entry.value.clone());
            }
            drop(entry);
            self.inner
                .entries
                .remove_if(key, |_, entry| !entry.is_live(now));
            debug!(key, "Cache entry expired");
        }
        None
    }

    fn join_or_start<T, F, Fut>(&self, key: &str, ttl: Duration, factory: F) -> Joined
    where
        T: Send + Sync + 'static,
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let slot = self.inner.flights.entry(key.to_string());

        if let Entry::Occupied(running) = &slot {
            if running.get().try_join() {
                debug!(key, "Joining in-flight fetch");
                return Joined::Waiting(self.waiter(key, running.get().clone()));
            }
        }

        // A flight may have stored the value since our lookup.
        if let Some(value) = self.lookup(key) {
            return Joined::Ready(value);
        }

        let flight = self.start_flight(key, ttl, factory);
        slot.insert(flight.clone());
        Joined::Waiting(self.waiter(key, flight))
    }

    fn start_flight<T, F, Fut>(&self, key: &str, ttl: Duration, factory: F) -> Arc<Flight>
    where
        T: Send + Sync + 'static,
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let id = self.inner.next_flight.fetch_add(1, Ordering::Relaxed);
        self.inner.fetches.fetch_add(1, Ordering::Relaxed);

        let cancel = CancellationToken::new();
        let fetch = factory(cancel.clone());
        let inner = Arc::downgrade(&self.inner);
        let key = key.to_string();

        let result = async move {
            let result = fetch.await.map(|value| Arc::new(value) as Value);
            if let Some(inner) = inner.upgrade() {
                if let Ok(value) = &result {
                    inner
                        .entries
                        .insert(key.clone(), CacheEntry::new(value.clone(), ttl));
                }
                inner.flights.remove_if(&key, |_, flight| flight.id == id);
            }
            result
        }
        .boxed()
        .shared();

        Arc::new(Flight {
            id,
            result,
            cancel,
            waiters: Mutex::new(Waiters {
                count: 1,
                closed: false,
            }),
        })
    }

    fn waiter(&self, key: &str, flight: Arc<Flight>) -> FlightWaiter {
        FlightWaiter {
            inner: self.inner.clone(),
            key: key.to_string(),
            flight,
        }
    }
}

fn downcast<T: Send + Sync + 'static>(key: &str, value: Value) -> Result<Arc<T>> {
    value.downcast::<T>().map_err(|_| {
        GatewayError::Internal(format!("Cache entry '{}' holds an unexpected type", key))
    })
}

/// Cache statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub total_entries: usize,
    pub live_entries: usize,
    pub expired_entries: usize,
    /// Keys with a factory run in progress.
    pub in_flight: usize,
    pub hits: u64,
    pub misses: u64,
    /// Factory runs started.
    pub fetches: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use tokio_test::{assert_pending, assert_ready_ok};

    const TTL: Duration = Duration::from_secs(10);

    fn counted<T: Send + 'static>(
        calls: &Arc<AtomicUsize>,
        value: Result<T>,
    ) -> impl FnOnce(CancellationToken) -> futures::future::Ready<Result<T>> {
        let calls = calls.clone();
        move |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            futures::future::ready(value)
        }
    }

    fn delayed<T: Send + 'static>(
        calls: &Arc<AtomicUsize>,
        delay: Duration,
        value: Result<T>,
    ) -> impl FnOnce(CancellationToken) -> BoxFuture<'static, Result<T>> {
        let calls = calls.clone();
        move |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move {
                tokio::time::sleep(delay).await;
                value
            }
            .boxed()
        }
    }

    #[tokio::test]
    async fn test_hit_skips_factory() {
        let cache = RateCache::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let none = CancellationToken::new();

        for _ in 0..3 {
            let value = cache
                .get_or_create("k", TTL, &none, counted(&calls, Ok(42u32)))
                .await
                .unwrap();
            assert_eq!(*value, 42);
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let stats = cache.stats();
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.fetches, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_entry_is_refetched() {
        let cache = RateCache::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let none = CancellationToken::new();

        cache
            .get_or_create("k", TTL, &none, counted(&calls, Ok(1u32)))
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(9)).await;
        let value = cache
            .get_or_create("k", TTL, &none, counted(&calls, Ok(2u32)))
            .await
            .unwrap();
        assert_eq!(*value, 1);

        tokio::time::advance(Duration::from_secs(1)).await;
        let value = cache
            .get_or_create("k", TTL, &none, counted(&calls, Ok(2u32)))
            .await
            .unwrap();
        assert_eq!(*value, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failed_factory_is_not_cached() {
        let cache = RateCache::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let none = CancellationToken::new();

        let first = cache
            .get_or_create::<u32, _, _>(
                "k",
                TTL,
                &none,
                counted(&calls, Err(GatewayError::upstream("down"))),
            )
            .await;
        assert_eq!(first.unwrap_err(), GatewayError::upstream("down"));
        assert!(cache.is_empty());

        let second = cache
            .get_or_create("k", TTL, &none, counted(&calls, Ok(5u32)))
            .await
            .unwrap();
        assert_eq!(*second, 5);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_misses_share_one_fetch() {
        let cache = RateCache::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let none = CancellationToken::new();

        let (a, b) = tokio::join!(
            cache.get_or_create("k", TTL, &none, delayed(&calls, Duration::from_millis(100), Ok(1u32))),
            cache.get_or_create("k", TTL, &none, delayed(&calls, Duration::from_millis(100), Ok(2u32))),
        );

        let (a, b) = (a.unwrap(), b.unwrap());
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(*a, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.stats().in_flight, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_misses_share_one_error() {
        let cache = RateCache::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let none = CancellationToken::new();
        let error = GatewayError::upstream("circuit open");

        let (a, b) = tokio::join!(
            cache.get_or_create::<u32, _, _>(
                "k",
                TTL,
                &none,
                delayed(&calls, Duration::from_millis(100), Err(error.clone()))
            ),
            cache.get_or_create::<u32, _, _>(
                "k",
                TTL,
                &none,
                delayed(&calls, Duration::from_millis(100), Ok(2))
            ),
        );

        assert_eq!(a.unwrap_err(), error);
        assert_eq!(b.unwrap_err(), error);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_caller_joins_running_flight() {
        let cache = RateCache::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let none = CancellationToken::new();

        let mut first = tokio_test::task::spawn(cache.get_or_create(
            "k",
            TTL,
            &none,
            delayed(&calls, Duration::from_millis(50), Ok(1u32)),
        ));
        assert_pending!(first.poll());
        assert_eq!(cache.stats().in_flight, 1);

        let second = cache
            .get_or_create("k", TTL, &none, counted(&calls, Ok(2u32)))
            .await
            .unwrap();
        assert_eq!(*second, 1);

        let first = assert_ready_ok!(first.poll());
        assert_eq!(*first, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_caller_does_not_stop_others() {
        let cache = RateCache::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let cancel_a = CancellationToken::new();
        let none = CancellationToken::new();

        let (a, b, _) = tokio::join!(
            cache.get_or_create("k", TTL, &cancel_a, delayed(&calls, Duration::from_millis(100), Ok(1u32))),
            cache.get_or_create("k", TTL, &none, counted(&calls, Ok(2u32))),
            async {
                tokio::time::sleep(Duration::from_millis(10)).await;
                cancel_a.cancel();
            },
        );

        assert_eq!(a.unwrap_err(), GatewayError::Cancelled);
        assert_eq!(*b.unwrap(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.get::<u32>("k").as_deref(), Some(&1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_flight_is_cancelled_and_replaced() {
        let cache = RateCache::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let flight_token = Arc::new(Mutex::new(None::<CancellationToken>));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let seen = flight_token.clone();
        let result = cache
            .get_or_create::<u32, _, _>("k", TTL, &cancel, move |token| {
                *seen.lock() = Some(token.clone());
                async move {
                    token.cancelled().await;
                    Err(GatewayError::Cancelled)
                }
            })
            .await;

        assert_eq!(result.unwrap_err(), GatewayError::Cancelled);
        let token = flight_token.lock().clone().unwrap();
        assert!(token.is_cancelled());
        assert_eq!(cache.stats().in_flight, 0);

        let value = cache
            .get_or_create("k", TTL, &CancellationToken::new(), counted(&calls, Ok(7u32)))
            .await
            .unwrap();
        assert_eq!(*value, 7);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_type_mismatch_is_internal_error() {
        let cache = RateCache::new();
        let calls = Arc::new(AtomicUsize::new(0));
        cache.set("k", 5u32, TTL);

        let result = cache
            .get_or_create::<String, _, _>(
                "k",
                TTL,
                &CancellationToken::new(),
                counted(&calls, Ok("five".to_string())),
            )
            .await;

        assert!(matches!(result, Err(GatewayError::Internal(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(cache.get::<String>("k").is_none());
        assert_eq!(cache.get::<u32>("k").as_deref(), Some(&5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stats_and_eviction() {
        let cache = RateCache::new();
        cache.set("short", 1u32, Duration::from_secs(1));
        cache.set("long", 2u32, Duration::from_secs(100));

        tokio::time::advance(Duration::from_secs(2)).await;

        let stats = cache.stats();
        assert_eq!(stats.total_entries, 2);
        assert_eq!(stats.live_entries, 1);
        assert_eq!(stats.expired_entries, 1);

        cache.evict_expired();
        assert_eq!(cache.len(), 1);
        assert!(cache.get::<u32>("short").is_none());

        cache.remove("long");
        assert!(cache.is_empty());

        cache.set("a", 1u32, TTL);
        cache.clear();
        assert!(cache.is_empty());
    }
}
