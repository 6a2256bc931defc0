//! A bounded, time-limited cache of built values with at most one build in
//! flight per key.

use std::{
    collections::HashMap,
    hash::Hash,
    num::NonZeroUsize,
    sync::Arc,
    time::{Duration, Instant},
};

use lru::LruCache;
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use tracing::debug;

use crate::index::OwnersIndex;

/// Cache of ownership indexes, one per change revision and target branch.
pub type OwnersCache = ResultCache<CacheKey, OwnersIndex>;

const BRANCH_PREFIX: &str = "refs/heads/";

/// Identifies the index for one patchset of a change.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub change_id: u64,
    pub patchset: u32,
    pub branch: String,
}

impl CacheKey {
    /// `branch` may be given with or without its `refs/heads/` prefix.
    pub fn new(change_id: u64, patchset: u32, branch: &str) -> Self {
        Self {
            change_id,
            patchset,
            branch: branch.strip_prefix(BRANCH_PREFIX).unwrap_or(branch).to_owned(),
        }
    }
}

struct Entry<V> {
    value: Arc<V>,
    created: Instant,
}

struct State<K: Hash + Eq, V> {
    // `None` when either limit is zero: nothing is kept.
    entries: Option<LruCache<K, Entry<V>>>,
    building: HashMap<K, Arc<OnceCell<Arc<V>>>>,
    max_age: Duration,
}

impl<K: Hash + Eq, V> State<K, V> {
    fn lookup(&mut self, key: &K) -> Option<Arc<V>> {
        let max_age = self.max_age;
        let entries = self.entries.as_mut()?;
        let found = entries
            .get(key)
            .map(|entry| (entry.created.elapsed() <= max_age, entry.value.clone()));
        match found {
            Some((true, value)) => Some(value),
            Some((false, _)) => {
                entries.pop(key);
                None
            }
            None => None,
        }
    }

    fn store(&mut self, key: K, value: Arc<V>) {
        if let Some(entries) = self.entries.as_mut() {
            entries.put(
                key,
                Entry {
                    value,
                    created: Instant::now(),
                },
            );
        }
    }
}

/// Values are built by the caller-supplied closure on a miss. Concurrent
/// misses on one key wait for a single build; misses on different keys build
/// in parallel. A failed build leaves the key unresolved for the next caller.
pub struct ResultCache<K: Hash + Eq, V> {
    state: Mutex<State<K, V>>,
}

impl<K: Hash + Eq + Clone, V> ResultCache<K, V> {
    pub fn new(max_entries: usize, max_age: Duration) -> Self {
        let cache = Self {
            state: Mutex::new(State {
                entries: None,
                building: HashMap::new(),
                max_age,
            }),
        };
        cache.configure(max_entries, max_age);
        cache
    }

    /// Change the limits. Shrinking evicts least recently used entries;
    /// a zero limit drops everything and disables storage.
    pub fn configure(&self, max_entries: usize, max_age: Duration) {
        let mut state = self.state.lock();
        state.max_age = max_age;
        match NonZeroUsize::new(max_entries).filter(|_| !max_age.is_zero()) {
            Some(capacity) => {
                if let Some(entries) = state.entries.as_mut() {
                    entries.resize(capacity);
                } else {
                    state.entries = Some(LruCache::new(capacity));
                }
            }
            None => state.entries = None,
        }
    }

    /// Number of stored entries, expired ones included until they're next
    /// looked up.
    pub fn len(&self) -> usize {
        self.state.lock().entries.as_ref().map_or(0, LruCache::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        if let Some(entries) = self.state.lock().entries.as_mut() {
            entries.clear();
        }
    }

    /// The stored, unexpired value for `key`, if any.
    pub fn get(&self, key: &K) -> Option<Arc<V>> {
        self.state.lock().lookup(key)
    }

    pub fn get_or_insert_with(&self, key: K, build: impl FnOnce() -> V) -> Arc<V> {
        match self.get_or_try_insert_with(key, || Ok::<_, std::convert::Infallible>(build())) {
            Ok(value) => value,
            Err(never) => match never {},
        }
    }

    /// Return the value for `key`, building it with `build` on a miss. If
    /// another caller is already building the same key, wait for its result.
    pub fn get_or_try_insert_with<E>(
        &self,
        key: K,
        build: impl FnOnce() -> Result<V, E>,
    ) -> Result<Arc<V>, E> {
        let slot = {
            let mut state = self.state.lock();
            if let Some(value) = state.lookup(&key) {
                return Ok(value);
            }
            state.building.entry(key.clone()).or_default().clone()
        };

        // The lock is released while building so other keys aren't held up.
        let result = slot.get_or_try_init(|| build().map(Arc::new)).cloned();

        let mut state = self.state.lock();
        if state
            .building
            .get(&key)
            .map_or(false, |current| Arc::ptr_eq(current, &slot))
        {
            state.building.remove(&key);
        }
        match &result {
            Ok(value) => state.store(key, value.clone()),
            Err(_) => debug!("cache build failed; key left unresolved"),
        }
        result
    }

    /// Store `value` for `key`, replacing any entry already there.
    pub fn insert(&self, key: K, value: V) -> Arc<V> {
        let value = Arc::new(value);
        self.state.lock().store(key, value.clone());
        value
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{
            atomic::{AtomicUsize, Ordering},
            Barrier,
        },
        thread,
    };

    use super::*;

    fn cache(max_entries: usize, max_age: Duration) -> ResultCache<&'static str, usize> {
        ResultCache::new(max_entries, max_age)
    }

    #[test]
    fn test_cache_key_strips_branch_prefix() {
        assert_eq!(CacheKey::new(7, 2, "refs/heads/main"), CacheKey::new(7, 2, "main"));
        assert_eq!(CacheKey::new(7, 2, "refs/tags/v1").branch, "refs/tags/v1");
        assert_ne!(CacheKey::new(7, 2, "main"), CacheKey::new(7, 3, "main"));
    }

    #[test]
    fn test_builds_once_per_key() {
        let cache = cache(10, Duration::from_secs(60));
        let builds = AtomicUsize::new(0);
        let build = || builds.fetch_add(1, Ordering::SeqCst) + 100;

        assert_eq!(*cache.get_or_insert_with("a", build), 100);
        assert_eq!(*cache.get_or_insert_with("a", build), 100);
        assert_eq!(*cache.get_or_insert_with("b", build), 101);
        assert_eq!(builds.load(Ordering::SeqCst), 2);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(&"a").as_deref(), Some(&100));
    }

    #[test]
    fn test_expired_entries_rebuild() {
        let cache = cache(10, Duration::from_millis(20));
        let builds = AtomicUsize::new(0);
        let build = || builds.fetch_add(1, Ordering::SeqCst);

        cache.get_or_insert_with("a", build);
        thread::sleep(Duration::from_millis(40));
        assert_eq!(cache.get(&"a"), None);
        cache.get_or_insert_with("a", build);
        assert_eq!(builds.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_evicts_least_recently_used() {
        let cache = cache(2, Duration::from_secs(60));
        cache.get_or_insert_with("a", || 1);
        cache.get_or_insert_with("b", || 2);
        cache.get(&"a");
        cache.get_or_insert_with("c", || 3);

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(&"b"), None);
        assert_eq!(cache.get(&"a").as_deref(), Some(&1));
        assert_eq!(cache.get(&"c").as_deref(), Some(&3));

        cache.configure(1, Duration::from_secs(60));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_zero_limits_never_store() {
        for (max_entries, max_age) in [(0, Duration::from_secs(60)), (10, Duration::ZERO)] {
            let cache = cache(max_entries, max_age);
            let builds = AtomicUsize::new(0);
            let build = || builds.fetch_add(1, Ordering::SeqCst);

            cache.get_or_insert_with("a", build);
            cache.get_or_insert_with("a", build);
            assert_eq!(builds.load(Ordering::SeqCst), 2);
            assert!(cache.is_empty());
        }
    }

    #[test]
    fn test_failed_build_does_not_poison() {
        let cache = cache(10, Duration::from_secs(60));
        let failed = cache.get_or_try_insert_with("a", || Err("boom"));
        assert_eq!(failed.map(|v| *v), Err("boom"));
        assert!(cache.is_empty());

        let value = cache.get_or_try_insert_with("a", || Ok::<_, &str>(5));
        assert_eq!(value.map(|v| *v), Ok(5));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_failed_build_releases_slot() {
        let cache = cache(10, Duration::from_secs(60));
        for key in ["a", "b", "c"] {
            assert!(cache.get_or_try_insert_with(key, || Err::<usize, _>("boom")).is_err());
        }
        assert!(cache.state.lock().building.is_empty());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_insert_replaces_entry() {
        let cache = cache(10, Duration::from_secs(60));
        cache.get_or_insert_with("a", || 1);
        assert_eq!(*cache.insert("a", 2), 2);
        assert_eq!(*cache.get_or_insert_with("a", || 3), 2);
        assert_eq!(cache.len(), 1);

        let disabled = self::cache(0, Duration::from_secs(60));
        assert_eq!(*disabled.insert("a", 1), 1);
        assert!(disabled.is_empty());
    }

    #[test]
    fn test_concurrent_misses_share_one_build() {
        let cache = cache(10, Duration::from_secs(60));
        let builds = AtomicUsize::new(0);
        let barrier = Barrier::new(8);

        let values = thread::scope(|s| {
            let (cache, builds, barrier) = (&cache, &builds, &barrier);
            let handles = (0..8)
                .map(|_| {
                    s.spawn(move || {
                        barrier.wait();
                        cache.get_or_insert_with("a", || {
                            thread::sleep(Duration::from_millis(50));
                            builds.fetch_add(1, Ordering::SeqCst)
                        })
                    })
                })
                .collect::<Vec<_>>();
            handles
                .into_iter()
                .map(|h| h.join().unwrap())
                .collect::<Vec<_>>()
        });

        assert_eq!(builds.load(Ordering::SeqCst), 1);
        assert!(values.iter().all(|v| Arc::ptr_eq(v, &values[0])));
    }

    #[test]
    fn test_distinct_keys_build_in_parallel() {
        let cache = cache(10, Duration::from_secs(60));
        let barrier = Barrier::new(2);

        // Each build waits for the other to start, so this only finishes if
        // the two builds overlap.
        thread::scope(|s| {
            for key in ["a", "b"] {
                let cache = &cache;
                let barrier = &barrier;
                s.spawn(move || {
                    cache.get_or_insert_with(key, || {
                        barrier.wait();
                        1
                    })
                });
            }
        });
        assert_eq!(cache.len(), 2);
    }
}
