//! Single-flight caches for memoized work
//!
//! Several components memoize expensive results keyed by identity: content
//! hashes by file location, directory manifests by out path, sub-repository
//! views by boundary. Concurrent requests for the same key must run the
//! computation once; requests for different keys proceed in parallel.

use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Memo with per-key initialization locks
///
/// Failed initializations are not cached; the next caller retries. A value
/// computed across a [`clear`](Self::clear) is returned to its caller but not
/// memoized.
pub struct SingleFlight<K, V> {
    /// Completed values
    values: RwLock<HashMap<K, V>>,
    /// Per-key lock held while a value is being computed
    locks: RwLock<HashMap<K, Arc<Mutex<()>>>>,
    /// Bumped by `clear`, only while `values` is write-locked
    generation: AtomicU64,
}

impl<K, V> SingleFlight<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new() -> Self {
        Self {
            values: RwLock::new(HashMap::new()),
            locks: RwLock::new(HashMap::new()),
            generation: AtomicU64::new(0),
        }
    }

    fn key_lock(&self, key: &K) -> Arc<Mutex<()>> {
        {
            let map = self.locks.read();
            if let Some(lock) = map.get(key) {
                return lock.clone();
            }
        }

        let mut map = self.locks.write();
        // Another thread may have inserted the lock in between
        map.entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Completed value for `key`, if any
    pub fn get(&self, key: &K) -> Option<V> {
        self.values.read().get(key).cloned()
    }

    /// Return the memoized value or run `init` exactly once per key.
    pub fn get_or_try_init<E, F>(&self, key: &K, init: F) -> Result<V, E>
    where
        F: FnOnce() -> Result<V, E>,
    {
        self.get_fresh_or_try_init(key, |_| true, init)
    }

    /// Like [`get_or_try_init`](Self::get_or_try_init), but a memoized value
    /// rejected by `is_fresh` is recomputed and replaced.
    pub fn get_fresh_or_try_init<E, P, F>(&self, key: &K, is_fresh: P, init: F) -> Result<V, E>
    where
        P: Fn(&V) -> bool,
        F: FnOnce() -> Result<V, E>,
    {
        if let Some(value) = self.values.read().get(key) {
            if is_fresh(value) {
                return Ok(value.clone());
            }
        }

        let lock = self.key_lock(key);
        let _guard = lock.lock();

        // Double-check: the holder of the key lock may have just finished
        if let Some(value) = self.values.read().get(key) {
            if is_fresh(value) {
                return Ok(value.clone());
            }
        }

        let generation = self.generation.load(Ordering::Acquire);
        let value = init()?;
        let mut values = self.values.write();
        if self.generation.load(Ordering::Acquire) == generation {
            values.insert(key.clone(), value.clone());
        }
        Ok(value)
    }

    pub fn remove(&self, key: &K) -> Option<V> {
        self.values.write().remove(key)
    }

    /// Drop every memoized value. Initializations still running are not
    /// memoized when they finish. Key locks are kept so a caller arriving
    /// afterwards waits for the running initialization of its key.
    pub fn clear(&self) {
        let mut values = self.values.write();
        self.generation.fetch_add(1, Ordering::AcqRel);
        values.clear();
    }

    pub fn len(&self) -> usize {
        self.values.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.read().is_empty()
    }

    pub fn keys(&self) -> Vec<K> {
        self.values.read().keys().cloned().collect()
    }
}

impl<K, V> Default for SingleFlight<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}
