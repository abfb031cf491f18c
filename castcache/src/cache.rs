use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use tracing::{debug, warn};

/// Bookkeeping around one cached value.
#[derive(Debug)]
pub struct CacheEntry<V> {
    value: V,
    created: Instant,
    last_access: Instant,
    access_count: u64,
    pins: u32,
}

impl<V> CacheEntry<V> {
    fn new(value: V) -> Self {
        let now = Instant::now();
        Self {
            value,
            created: now,
            last_access: now,
            access_count: 0,
            pins: 0,
        }
    }

    pub fn created(&self) -> Instant {
        self.created
    }

    pub fn last_access(&self) -> Instant {
        self.last_access
    }

    pub fn access_count(&self) -> u64 {
        self.access_count
    }

    pub fn is_pinned(&self) -> bool {
        self.pins > 0
    }
}

type EvictCallback<K, V> = Box<dyn Fn(&K, &V) + Send>;

/// LRU cache with pin counts and an eviction callback.
///
/// Not thread-safe by itself; see [`SharedLruCache`] for the shared form.
pub struct LruCache<K, V> {
    capacity: usize,
    entries: HashMap<K, CacheEntry<V>>,
    on_evict: Option<EvictCallback<K, V>>,
}

impl<K: Eq + Hash + Clone, V> LruCache<K, V> {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: HashMap::new(),
            on_evict: None,
        }
    }

    /// Register a callback invoked with each evicted entry, before removal.
    /// Used to release resources the cached value points at.
    pub fn with_evict_callback(mut self, callback: impl Fn(&K, &V) + Send + 'static) -> Self {
        self.on_evict = Some(Box::new(callback));
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    /// Look up a value, refreshing its recency.
    pub fn get(&mut self, key: &K) -> Option<&V> {
        let entry = self.entries.get_mut(key)?;
        entry.last_access = Instant::now();
        entry.access_count += 1;
        Some(&entry.value)
    }

    /// Look up without touching recency. For metrics and tests.
    pub fn peek(&self, key: &K) -> Option<&V> {
        self.entries.get(key).map(|e| &e.value)
    }

    pub fn entry_info(&self, key: &K) -> Option<&CacheEntry<V>> {
        self.entries.get(key)
    }

    /// Insert a value, evicting least-recently-used unpinned entries if the
    /// cache is over capacity. Returns the previous value for the key.
    pub fn insert(&mut self, key: K, value: V) -> Option<V> {
        let previous = self
            .entries
            .insert(key.clone(), CacheEntry::new(value))
            .map(|e| e.value);
        self.enforce_capacity(&key);
        previous
    }

    pub fn remove(&mut self, key: &K) -> Option<V> {
        self.entries.remove(key).map(|e| e.value)
    }

    /// Mark an entry as referenced by an in-flight action. Pinned entries
    /// survive eviction; every `pin` needs a matching `unpin`.
    pub fn pin(&mut self, key: &K) -> bool {
        match self.entries.get_mut(key) {
            Some(entry) => {
                entry.pins += 1;
                true
            }
            None => false,
        }
    }

    pub fn unpin(&mut self, key: &K) {
        match self.entries.get_mut(key) {
            Some(entry) if entry.pins > 0 => entry.pins -= 1,
            Some(_) => warn!("unpin without matching pin"),
            // Entry removed explicitly while pinned guards were alive.
            None => {}
        }
    }

    /// Drop entries older than `max_age` (by creation time). Pinned entries
    /// are kept. Returns the number removed.
    pub fn expire_older_than(&mut self, max_age: std::time::Duration) -> usize {
        let cutoff = Instant::now();
        let expired: Vec<K> = self
            .entries
            .iter()
            .filter(|(_, e)| !e.is_pinned() && cutoff.duration_since(e.created) > max_age)
            .map(|(k, _)| k.clone())
            .collect();

        for key in &expired {
            if let Some(entry) = self.entries.remove(key) {
                if let Some(cb) = &self.on_evict {
                    cb(key, &entry.value);
                }
            }
        }
        expired.len()
    }

    fn enforce_capacity(&mut self, newcomer: &K) {
        while self.entries.len() > self.capacity {
            // Oldest unpinned entry by last access. The entry just inserted
            // is exempt: evicting it would make the insert a silent no-op.
            let victim = self
                .entries
                .iter()
                .filter(|(k, e)| !e.is_pinned() && *k != newcomer)
                .min_by_key(|(_, e)| e.last_access)
                .map(|(k, _)| k.clone());

            let Some(key) = victim else {
                // Everything else is pinned. Over-capacity is the lesser evil.
                debug!(
                    len = self.entries.len(),
                    capacity = self.capacity,
                    "cache over capacity but fully pinned, skipping eviction"
                );
                return;
            };

            if let Some(entry) = self.entries.remove(&key) {
                if let Some(cb) = &self.on_evict {
                    cb(&key, &entry.value);
                }
            }
        }
    }
}

/// Thread-safe wrapper, cloneable across workers.
pub struct SharedLruCache<K, V> {
    inner: Arc<Mutex<LruCache<K, V>>>,
}

impl<K, V> Clone for SharedLruCache<K, V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K: Eq + Hash + Clone, V> SharedLruCache<K, V> {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(LruCache::new(capacity))),
        }
    }

    pub fn from_cache(cache: LruCache<K, V>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(cache)),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LruCache<K, V>> {
        // A poisoned cache mutex only means another worker panicked mid-op;
        // the map itself stays structurally valid.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn insert(&self, key: K, value: V) -> Option<V> {
        self.lock().insert(key, value)
    }

    pub fn remove(&self, key: &K) -> Option<V> {
        self.lock().remove(key)
    }

    pub fn contains(&self, key: &K) -> bool {
        self.lock().contains(key)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn expire_older_than(&self, max_age: std::time::Duration) -> usize {
        self.lock().expire_older_than(max_age)
    }

    /// Pin an entry for the lifetime of the returned guard.
    pub fn pin(&self, key: &K) -> Option<PinGuard<K, V>> {
        if self.lock().pin(key) {
            Some(PinGuard {
                cache: self.clone(),
                key: key.clone(),
            })
        } else {
            None
        }
    }
}

impl<K: Eq + Hash + Clone, V: Clone> SharedLruCache<K, V> {
    pub fn get(&self, key: &K) -> Option<V> {
        self.lock().get(key).cloned()
    }
}

/// RAII pin: the entry stays eviction-exempt until the guard drops.
pub struct PinGuard<K: Eq + Hash + Clone, V> {
    cache: SharedLruCache<K, V>,
    key: K,
}

impl<K: Eq + Hash + Clone, V> PinGuard<K, V> {
    pub fn key(&self) -> &K {
        &self.key
    }
}

impl<K: Eq + Hash + Clone, V> Drop for PinGuard<K, V> {
    fn drop(&mut self) {
        self.cache.lock().unpin(&self.key);
    }
}
