//! CacheStore: thread-safe memoized key-value store
//!
//! Lock order is flights before entries wherever both are held. The
//! loader always runs with no lock held.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;
use std::time::{Duration, Instant};

use ahash::RandomState;
use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::flight::LoadSlot;
use crate::lru::LruCache;
use crate::stats::CacheStats;

/// Why an entry left the cache, as reported to the eviction listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalCause {
    /// Removed by `invalidate` or a bulk clear.
    Explicit,
    /// Overwritten by a `put` or a later load for the same key.
    Replaced,
    /// A configured TTL elapsed.
    Expired,
    /// Evicted to keep the table within capacity.
    Capacity,
}

type EvictionListener<K, V> = Arc<dyn Fn(&K, V, RemovalCause) + Send + Sync>;

/// Contract surface of a memoizing cache.
///
/// The loader is supplied per call, not at construction, and is only
/// invoked on a miss.
pub trait Cache<K, V> {
    /// Retrieve the value for `key`, calling `loader` to compute it on a
    /// miss. The result of a successful load is cached.
    fn get<F, E>(&self, key: &K, loader: F) -> Result<V>
    where
        F: FnOnce(&K) -> std::result::Result<V, E>,
        E: Into<Box<dyn std::error::Error + Send + Sync>>;

    /// Unconditionally install `value` for `key`.
    fn put(&self, key: K, value: V);

    /// Remove the entry for `key`, if present.
    fn invalidate(&self, key: &K);

    /// Remove the entries for every key in `keys`.
    fn invalidate_keys<I>(&self, keys: I)
    where
        I: IntoIterator<Item = K>;

    /// Remove every entry present at the time of the call.
    fn invalidate_all(&self);
}

struct Entry<V> {
    value: V,
    written: Instant,
    touched: Instant,
}

impl<V> Entry<V> {
    fn new(value: V) -> Self {
        let now = Instant::now();
        Self {
            value,
            written: now,
            touched: now,
        }
    }

    fn is_expired(
        &self,
        now: Instant,
        after_write: Option<Duration>,
        after_access: Option<Duration>,
    ) -> bool {
        if let Some(ttl) = after_write {
            if now.duration_since(self.written) >= ttl {
                return true;
            }
        }
        if let Some(ttl) = after_access {
            if now.duration_since(self.touched) >= ttl {
                return true;
            }
        }
        false
    }
}

/// Builder for [`CacheStore`] construction-time options.
///
/// Defaults: unbounded capacity, no TTLs, no eviction listener.
pub struct CacheBuilder<K, V> {
    capacity: Option<usize>,
    expire_after_write: Option<Duration>,
    expire_after_access: Option<Duration>,
    listener: Option<EvictionListener<K, V>>,
}

impl<K, V> CacheBuilder<K, V> {
    /// Create a builder with default options.
    pub fn new() -> Self {
        Self {
            capacity: None,
            expire_after_write: None,
            expire_after_access: None,
            listener: None,
        }
    }

    /// Bound the cache to at most `capacity` resident entries, evicting
    /// in least-recently-used order beyond it.
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = Some(capacity);
        self
    }

    /// Expire entries a fixed duration after they were installed.
    pub fn expire_after_write(mut self, ttl: Duration) -> Self {
        self.expire_after_write = Some(ttl);
        self
    }

    /// Expire entries a fixed duration after they were last read.
    pub fn expire_after_access(mut self, ttl: Duration) -> Self {
        self.expire_after_access = Some(ttl);
        self
    }

    /// Receive every removed entry together with its [`RemovalCause`].
    /// The listener is invoked outside the cache's internal locks.
    pub fn eviction_listener<F>(mut self, listener: F) -> Self
    where
        F: Fn(&K, V, RemovalCause) + Send + Sync + 'static,
    {
        self.listener = Some(Arc::new(listener));
        self
    }

    /// Build the store.
    pub fn build(self) -> CacheStore<K, V>
    where
        K: Hash + Eq + Clone,
    {
        CacheStore {
            entries: Mutex::new(LruCache::new(self.capacity)),
            flights: Mutex::new(HashMap::with_hasher(RandomState::new())),
            stats: CacheStats::new(),
            expire_after_write: self.expire_after_write,
            expire_after_access: self.expire_after_access,
            listener: self.listener,
        }
    }
}

impl<K, V> Default for CacheBuilder<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

/// Thread-safe key-value store with memoized loading and invalidation.
///
/// Concurrent `get` calls for the same missing key share one load episode:
/// the first caller runs the loader, every other caller blocks on the
/// episode and receives the same outcome. `put` and `invalidate` fence any
/// in-flight episode for their key, so its result is delivered to joined
/// callers but never installed into the table.
pub struct CacheStore<K, V> {
    entries: Mutex<LruCache<K, Entry<V>>>,
    flights: Mutex<HashMap<K, Arc<LoadSlot<V>>, RandomState>>,
    stats: CacheStats,
    expire_after_write: Option<Duration>,
    expire_after_access: Option<Duration>,
    listener: Option<EvictionListener<K, V>>,
}

enum Claim<V> {
    Hit(V),
    Join(Arc<LoadSlot<V>>),
    Own(Arc<LoadSlot<V>>),
}

enum Probe<V> {
    Hit(V),
    Expired,
    Absent,
}

impl<K, V> CacheStore<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    /// Create a store bounded to `capacity` entries, with no TTLs.
    pub fn new(capacity: usize) -> Self {
        Self::builder().capacity(capacity).build()
    }

    /// Start building a store with explicit options.
    pub fn builder() -> CacheBuilder<K, V> {
        CacheBuilder::new()
    }

    /// Retrieve the value for `key`, calling `loader` on a miss.
    ///
    /// At most one loader runs per key at a time; concurrent callers for
    /// the same missing key block until that load resolves and share its
    /// outcome. Loader failures propagate to every such caller as
    /// [`Error::Load`] and are not cached. If the loader panics, the
    /// episode fails for all joined callers with [`Error::LoadAborted`]
    /// and the panic resumes in the owning caller.
    ///
    /// The loader must not call `get` on this store with the same key;
    /// doing so deadlocks on the episode it is itself serving.
    pub fn get<F, E>(&self, key: &K, loader: F) -> Result<V>
    where
        F: FnOnce(&K) -> std::result::Result<V, E>,
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        if let Some(value) = self.lookup(key) {
            return Ok(value);
        }

        let (claim, expired) = self.claim(key);
        if let Some(value) = expired {
            self.stats.record_expiration();
            self.notify(key, value, RemovalCause::Expired);
        }

        match claim {
            Claim::Hit(value) => {
                self.stats.record_hit();
                Ok(value)
            }
            Claim::Join(slot) => {
                self.stats.record_miss();
                slot.wait()
            }
            Claim::Own(slot) => {
                self.stats.record_miss();
                let mut guard = AbortGuard {
                    store: self,
                    key,
                    slot: &slot,
                    armed: true,
                };
                let outcome = loader(key).map_err(Error::load);
                guard.armed = false;
                self.resolve(key, &slot, outcome)
            }
        }
    }

    /// Unconditionally install `value` for `key`, replacing any current
    /// entry. A put wins over a concurrently completing load for the same
    /// key: the load still resolves for its callers, but its result is
    /// not installed over this value.
    pub fn put(&self, key: K, value: V) {
        let (replaced, evicted) = {
            let mut flights = self.flights.lock();
            if let Some(slot) = flights.remove(&key) {
                slot.fence();
            }
            let mut entries = self.entries.lock();
            let (replaced, evicted) = entries.insert(key.clone(), Entry::new(value));
            (
                replaced.map(|entry| entry.value),
                evicted.map(|(k, entry)| (k, entry.value)),
            )
        };
        self.stats.record_insert();
        if let Some(old) = replaced {
            self.notify(&key, old, RemovalCause::Replaced);
        }
        if let Some((victim, old)) = evicted {
            self.stats.record_eviction();
            self.notify(&victim, old, RemovalCause::Capacity);
        }
    }

    /// Remove the entry for `key`. A `get` issued after this returns will
    /// never observe a value installed before it, including the result of
    /// a load that was in flight when it was called. Absent keys are a
    /// no-op.
    pub fn invalidate(&self, key: &K) {
        let removed = {
            let mut flights = self.flights.lock();
            if let Some(slot) = flights.remove(key) {
                slot.fence();
            }
            let mut entries = self.entries.lock();
            entries.remove(key)
        };
        if let Some(entry) = removed {
            self.notify(key, entry.value, RemovalCause::Explicit);
        }
    }

    /// Invalidate every key in `keys`. Duplicates are idempotent.
    pub fn invalidate_keys<I>(&self, keys: I)
    where
        I: IntoIterator<Item = K>,
    {
        for key in keys {
            self.invalidate(&key);
        }
    }

    /// Remove every entry present at the time of the call and fence every
    /// in-flight load. Entries installed concurrently with the clear may
    /// survive; no pre-call entry does.
    pub fn invalidate_all(&self) {
        let drained = {
            let mut flights = self.flights.lock();
            for slot in flights.values() {
                slot.fence();
            }
            flights.clear();
            let mut entries = self.entries.lock();
            entries.drain()
        };
        for (key, entry) in drained {
            self.notify(&key, entry.value, RemovalCause::Explicit);
        }
    }

    /// Whether a live entry for `key` is resident, without touching its
    /// recency or access clock.
    pub fn contains_key(&self, key: &K) -> bool {
        let entries = self.entries.lock();
        entries.peek(key).is_some_and(|entry| {
            !entry.is_expired(
                Instant::now(),
                self.expire_after_write,
                self.expire_after_access,
            )
        })
    }

    /// Number of resident entries. Expiry is lazy, so TTL-expired entries
    /// remain counted until they are next touched.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether the entry table is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Instrumentation counters for this store.
    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    /// Hit fast path: entry table only, no flights lock.
    fn lookup(&self, key: &K) -> Option<V> {
        let now = Instant::now();
        let mut expired_value = None;
        let probe = {
            let mut entries = self.entries.lock();
            let probe = match entries.get_mut(key) {
                Some(entry)
                    if entry.is_expired(now, self.expire_after_write, self.expire_after_access) =>
                {
                    Probe::Expired
                }
                Some(entry) => {
                    entry.touched = now;
                    Probe::Hit(entry.value.clone())
                }
                None => Probe::Absent,
            };
            if matches!(probe, Probe::Expired) {
                expired_value = entries.remove(key).map(|entry| entry.value);
            }
            probe
        };

        if let Some(value) = expired_value {
            self.stats.record_expiration();
            self.notify(key, value, RemovalCause::Expired);
        }
        match probe {
            Probe::Hit(value) => {
                self.stats.record_hit();
                Some(value)
            }
            _ => None,
        }
    }

    /// Join the in-flight episode for `key`, or claim ownership of a new
    /// one. Re-checks the entry table under the flights lock so that a
    /// `put` committed after the fast-path miss wins over a new episode.
    /// Also returns the value of an entry dropped here because it expired.
    fn claim(&self, key: &K) -> (Claim<V>, Option<V>) {
        let mut flights = self.flights.lock();
        if let Some(slot) = flights.get(key) {
            return (Claim::Join(Arc::clone(slot)), None);
        }

        let mut expired_value = None;
        {
            let mut entries = self.entries.lock();
            let now = Instant::now();
            let mut stale = false;
            match entries.get_mut(key) {
                Some(entry)
                    if entry.is_expired(now, self.expire_after_write, self.expire_after_access) =>
                {
                    stale = true;
                }
                Some(entry) => {
                    entry.touched = now;
                    return (Claim::Hit(entry.value.clone()), None);
                }
                None => {}
            }
            if stale {
                expired_value = entries.remove(key).map(|entry| entry.value);
            }
        }

        let slot = Arc::new(LoadSlot::new());
        flights.insert(key.clone(), Arc::clone(&slot));
        (Claim::Own(slot), expired_value)
    }

    /// Owner side of episode completion: detach the slot, install the
    /// result if the episode was not fenced, and wake the joiners.
    fn resolve(&self, key: &K, slot: &Arc<LoadSlot<V>>, outcome: Result<V>) -> Result<V> {
        let mut replaced = None;
        let mut evicted = None;
        {
            let mut flights = self.flights.lock();
            let attached = flights
                .get(key)
                .is_some_and(|current| Arc::ptr_eq(current, slot));
            if attached {
                flights.remove(key);
            }
            if attached && !slot.is_fenced() {
                if let Ok(value) = &outcome {
                    let mut entries = self.entries.lock();
                    let (r, e) = entries.insert(key.clone(), Entry::new(value.clone()));
                    replaced = r.map(|entry| entry.value);
                    evicted = e.map(|(k, entry)| (k, entry.value));
                    self.stats.record_insert();
                }
            }
        }

        if outcome.is_err() {
            self.stats.record_load_failure();
        }
        slot.complete(outcome.clone());

        if let Some(old) = replaced {
            self.notify(key, old, RemovalCause::Replaced);
        }
        if let Some((victim, old)) = evicted {
            self.stats.record_eviction();
            self.notify(&victim, old, RemovalCause::Capacity);
        }
        outcome
    }

    fn notify(&self, key: &K, value: V, cause: RemovalCause) {
        if let Some(listener) = &self.listener {
            listener(key, value, cause);
        }
    }
}

impl<K, V> Cache<K, V> for CacheStore<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    fn get<F, E>(&self, key: &K, loader: F) -> Result<V>
    where
        F: FnOnce(&K) -> std::result::Result<V, E>,
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        CacheStore::get(self, key, loader)
    }

    fn put(&self, key: K, value: V) {
        CacheStore::put(self, key, value)
    }

    fn invalidate(&self, key: &K) {
        CacheStore::invalidate(self, key)
    }

    fn invalidate_keys<I>(&self, keys: I)
    where
        I: IntoIterator<Item = K>,
    {
        CacheStore::invalidate_keys(self, keys)
    }

    fn invalidate_all(&self) {
        CacheStore::invalidate_all(self)
    }
}

/// Fails the episode for every joiner if the loader unwinds in the owner.
struct AbortGuard<'a, K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    store: &'a CacheStore<K, V>,
    key: &'a K,
    slot: &'a Arc<LoadSlot<V>>,
    armed: bool,
}

impl<K, V> Drop for AbortGuard<'_, K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        {
            let mut flights = self.store.flights.lock();
            let attached = flights
                .get(self.key)
                .is_some_and(|current| Arc::ptr_eq(current, self.slot));
            if attached {
                flights.remove(self.key);
            }
        }
        self.slot.complete(Err(Error::LoadAborted));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{mpsc, Barrier};
    use std::thread;
    use std::time::Duration;

    fn ok(value: &'static str) -> std::result::Result<&'static str, io::Error> {
        Ok(value)
    }

    #[test]
    fn test_get_loads_on_miss_then_hits() {
        let cache: CacheStore<u32, &str> = CacheStore::new(10);
        let calls = AtomicUsize::new(0);

        let first = cache
            .get(&1, |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                ok("value")
            })
            .unwrap();
        let second = cache
            .get(&1, |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                ok("other")
            })
            .unwrap();

        assert_eq!(first, "value");
        assert_eq!(second, "value");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.stats().hits(), 1);
        assert_eq!(cache.stats().misses(), 1);
    }

    #[test]
    fn test_single_flight_one_loader_call() {
        let cache: Arc<CacheStore<u32, usize>> = Arc::new(CacheStore::new(10));
        let calls = Arc::new(AtomicUsize::new(0));
        let barrier = Arc::new(Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let calls = Arc::clone(&calls);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    cache.get(&7, |_| {
                        // Hold the episode open long enough for the
                        // stragglers to join rather than hit the table.
                        thread::sleep(Duration::from_millis(50));
                        let marker = calls.fetch_add(1, Ordering::SeqCst);
                        Ok::<_, io::Error>(marker)
                    })
                })
            })
            .collect();

        let values: Vec<usize> = handles
            .into_iter()
            .map(|h| h.join().unwrap().unwrap())
            .collect();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(values.iter().all(|&v| v == 0));
    }

    #[test]
    fn test_invalidate_fences_inflight_load() {
        let cache: Arc<CacheStore<u32, &str>> = Arc::new(CacheStore::new(10));
        let (started_tx, started_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel::<()>();

        let owner = {
            let cache = Arc::clone(&cache);
            thread::spawn(move || {
                cache.get(&1, move |_| {
                    started_tx.send(()).unwrap();
                    release_rx.recv().unwrap();
                    ok("stale")
                })
            })
        };

        started_rx.recv().unwrap();
        cache.invalidate(&1);
        release_tx.send(()).unwrap();

        // The owner still observes its own load's value.
        assert_eq!(owner.join().unwrap().unwrap(), "stale");

        // But the fenced result was never installed: the next get loads.
        let calls = AtomicUsize::new(0);
        let fresh = cache
            .get(&1, |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                ok("fresh")
            })
            .unwrap();
        assert_eq!(fresh, "fresh");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_put_wins_over_inflight_load() {
        let cache: Arc<CacheStore<u32, &str>> = Arc::new(CacheStore::new(10));
        let (started_tx, started_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel::<()>();

        let owner = {
            let cache = Arc::clone(&cache);
            thread::spawn(move || {
                cache.get(&1, move |_| {
                    started_tx.send(()).unwrap();
                    release_rx.recv().unwrap();
                    ok("loaded")
                })
            })
        };

        started_rx.recv().unwrap();
        cache.put(1, "direct");
        release_tx.send(()).unwrap();

        assert_eq!(owner.join().unwrap().unwrap(), "loaded");

        // The put value survives the load completion.
        let value = cache.get(&1, |_| ok("reloaded")).unwrap();
        assert_eq!(value, "direct");
    }

    #[test]
    fn test_put_visible_without_loader() {
        let cache: CacheStore<u32, &str> = CacheStore::new(10);
        let calls = AtomicUsize::new(0);

        cache.put(1, "direct");
        assert!(cache.contains_key(&1));
        let value = cache
            .get(&1, |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                ok("loaded")
            })
            .unwrap();

        assert_eq!(value, "direct");
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_invalidate_absent_is_noop() {
        let cache: CacheStore<u32, &str> = CacheStore::new(10);
        cache.invalidate(&1);
        cache.invalidate(&1);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_invalidate_keys_idempotent() {
        let cache: CacheStore<u32, &str> = CacheStore::new(10);
        cache.put(1, "a");
        cache.put(2, "b");
        cache.put(3, "c");

        cache.invalidate_keys(vec![1, 2, 2, 9]);

        assert_eq!(cache.len(), 1);
        let calls = AtomicUsize::new(0);
        cache
            .get(&1, |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                ok("a2")
            })
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.get(&3, |_| ok("c2")).unwrap(), "c");
    }

    #[test]
    fn test_invalidate_all_leaves_no_survivors() {
        let cache: CacheStore<u32, usize> = CacheStore::new(10);
        for key in 0..5 {
            cache.put(key, 100 + key as usize);
        }

        cache.invalidate_all();
        assert!(cache.is_empty());

        let calls = AtomicUsize::new(0);
        for key in 0..5 {
            let marker = calls.fetch_add(1, Ordering::SeqCst);
            let value = cache.get(&key, |_| Ok::<_, io::Error>(marker)).unwrap();
            assert_eq!(value, marker);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn test_invalidate_all_fences_inflight_load() {
        let cache: Arc<CacheStore<u32, &str>> = Arc::new(CacheStore::new(10));
        let (started_tx, started_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel::<()>();

        let owner = {
            let cache = Arc::clone(&cache);
            thread::spawn(move || {
                cache.get(&1, move |_| {
                    started_tx.send(()).unwrap();
                    release_rx.recv().unwrap();
                    ok("stale")
                })
            })
        };

        started_rx.recv().unwrap();
        cache.invalidate_all();
        release_tx.send(()).unwrap();
        owner.join().unwrap().unwrap();

        let calls = AtomicUsize::new(0);
        cache
            .get(&1, |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                ok("fresh")
            })
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_load_failure_not_cached() {
        let cache: CacheStore<u32, &str> = CacheStore::new(10);

        let err = cache
            .get(&1, |_| {
                Err::<&str, _>(io::Error::new(io::ErrorKind::Other, "backend down"))
            })
            .unwrap_err();
        assert_eq!(err.to_string(), "load failed: backend down");
        assert_eq!(cache.stats().load_failures(), 1);

        // The slot was released and nothing poisoned: a retry succeeds.
        let value = cache.get(&1, |_| ok("recovered")).unwrap();
        assert_eq!(value, "recovered");
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_failure_shared_with_joiners_and_isolated_per_key() {
        let cache: Arc<CacheStore<u32, &str>> = Arc::new(CacheStore::new(10));
        let (started_tx, started_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel::<()>();

        let owner = {
            let cache = Arc::clone(&cache);
            thread::spawn(move || {
                cache.get(&1, move |_| {
                    started_tx.send(()).unwrap();
                    release_rx.recv().unwrap();
                    Err::<&str, _>(io::Error::new(io::ErrorKind::Other, "key 1 broke"))
                })
            })
        };

        started_rx.recv().unwrap();

        // Joins the episode that is about to fail.
        let joiner = {
            let cache = Arc::clone(&cache);
            thread::spawn(move || cache.get(&1, |_| ok("never runs")))
        };

        // An unrelated key is unaffected while key 1 is blocked.
        assert_eq!(cache.get(&2, |_| ok("fine")).unwrap(), "fine");

        release_tx.send(()).unwrap();
        let owner_err = owner.join().unwrap().unwrap_err();
        let joiner_err = joiner.join().unwrap().unwrap_err();
        assert_eq!(owner_err.to_string(), "load failed: key 1 broke");
        assert_eq!(joiner_err.to_string(), owner_err.to_string());

        assert_eq!(cache.get(&1, |_| ok("recovered")).unwrap(), "recovered");
    }

    #[test]
    fn test_owner_panic_aborts_episode() {
        let cache: Arc<CacheStore<u32, &str>> = Arc::new(CacheStore::new(10));
        let (started_tx, started_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel::<()>();

        let owner = {
            let cache = Arc::clone(&cache);
            thread::spawn(move || {
                let _ = cache.get(&1, move |_| -> std::result::Result<&'static str, io::Error> {
                    started_tx.send(()).unwrap();
                    release_rx.recv().unwrap();
                    panic!("loader blew up");
                });
            })
        };

        started_rx.recv().unwrap();
        let joiner = {
            let cache = Arc::clone(&cache);
            thread::spawn(move || cache.get(&1, |_| ok("never runs")))
        };

        release_tx.send(()).unwrap();
        assert!(owner.join().is_err());
        let err = joiner.join().unwrap().unwrap_err();
        assert!(matches!(err, Error::LoadAborted));

        // The slot was released: a later get starts a fresh episode.
        assert_eq!(cache.get(&1, |_| ok("fresh")).unwrap(), "fresh");
    }

    #[test]
    fn test_capacity_eviction_notifies_listener() {
        let events: Arc<Mutex<Vec<(u32, &str, RemovalCause)>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        let cache: CacheStore<u32, &str> = CacheStore::builder()
            .capacity(2)
            .eviction_listener(move |key, value, cause| {
                sink.lock().push((*key, value, cause));
            })
            .build();

        cache.put(1, "a");
        cache.put(2, "b");
        cache.put(3, "c");

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.stats().evictions(), 1);
        assert_eq!(*events.lock(), vec![(1, "a", RemovalCause::Capacity)]);

        let calls = AtomicUsize::new(0);
        cache
            .get(&1, |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                ok("a2")
            })
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_explicit_and_replaced_listener_causes() {
        let events: Arc<Mutex<Vec<(u32, &str, RemovalCause)>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        let cache: CacheStore<u32, &str> = CacheStore::builder()
            .capacity(10)
            .eviction_listener(move |key, value, cause| {
                sink.lock().push((*key, value, cause));
            })
            .build();

        cache.put(1, "a");
        cache.put(1, "b");
        cache.invalidate(&1);
        cache.invalidate(&1);

        assert_eq!(
            *events.lock(),
            vec![(1, "a", RemovalCause::Replaced), (1, "b", RemovalCause::Explicit)]
        );
    }

    #[test]
    fn test_expiry_notifies_listener() {
        let events: Arc<Mutex<Vec<(u32, &str, RemovalCause)>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        let cache: CacheStore<u32, &str> = CacheStore::builder()
            .capacity(10)
            .expire_after_write(Duration::from_millis(30))
            .eviction_listener(move |key, value, cause| {
                sink.lock().push((*key, value, cause));
            })
            .build();

        cache.put(1, "a");
        thread::sleep(Duration::from_millis(40));

        // The expired entry is dropped on the next touch.
        assert_eq!(cache.get(&1, |_| ok("new")).unwrap(), "new");
        assert_eq!(*events.lock(), vec![(1, "a", RemovalCause::Expired)]);
    }

    #[test]
    fn test_expire_after_write() {
        let cache: CacheStore<u32, &str> = CacheStore::builder()
            .capacity(10)
            .expire_after_write(Duration::from_millis(30))
            .build();

        cache.put(1, "a");
        assert_eq!(cache.get(&1, |_| ok("new")).unwrap(), "a");

        thread::sleep(Duration::from_millis(40));
        assert!(!cache.contains_key(&1));

        let calls = AtomicUsize::new(0);
        let value = cache
            .get(&1, |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                ok("new")
            })
            .unwrap();
        assert_eq!(value, "new");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.stats().expirations(), 1);
    }

    #[test]
    fn test_expire_after_access_refreshes_on_read() {
        let cache: CacheStore<u32, &str> = CacheStore::builder()
            .capacity(10)
            .expire_after_access(Duration::from_millis(60))
            .build();

        cache.put(1, "a");
        thread::sleep(Duration::from_millis(35));
        // Read inside the window slides it forward.
        assert_eq!(cache.get(&1, |_| ok("new")).unwrap(), "a");
        thread::sleep(Duration::from_millis(35));
        assert_eq!(cache.get(&1, |_| ok("new")).unwrap(), "a");

        thread::sleep(Duration::from_millis(80));
        let calls = AtomicUsize::new(0);
        cache
            .get(&1, |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                ok("new")
            })
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_trait_object_free_generic_use() {
        fn warm<C: Cache<u32, &'static str>>(cache: &C) -> Result<&'static str> {
            cache.put(5, "warm");
            cache.get(&5, |_| ok("cold"))
        }

        let cache: CacheStore<u32, &str> = CacheStore::new(4);
        assert_eq!(warm(&cache).unwrap(), "warm");
    }

    #[test]
    fn test_unbounded_builder_default() {
        let cache: CacheStore<u32, u32> = CacheStore::builder().build();
        for key in 0..500 {
            cache.put(key, key * 2);
        }
        assert_eq!(cache.len(), 500);
        assert_eq!(cache.stats().evictions(), 0);
    }
}
