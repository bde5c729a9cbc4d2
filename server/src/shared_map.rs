//! A keyed container with a reader/writer locking discipline.
//!
//! Readers proceed in parallel; writers are exclusive. Call sites that need a
//! consistent view across multiple entries take a [`SharedMap::snapshot`]
//! instead of holding the lock open, which also keeps guards from ever living
//! across an `.await`.

use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock};

/// Thread-safe ordered map used for the global registries, per-player pending
/// pings, and per-match frame histories.
#[derive(Debug)]
pub struct SharedMap<K, V> {
    inner: RwLock<BTreeMap<K, V>>,
}

impl<K, V> Default for SharedMap<K, V> {
    fn default() -> Self {
        Self {
            inner: RwLock::new(BTreeMap::new()),
        }
    }
}

impl<K: Ord + Clone, V: Clone> SharedMap<K, V> {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(BTreeMap::new()),
        }
    }

    /// Inserts `value`, replacing any previous entry for `key`.
    pub fn insert_or_assign(&self, key: K, value: V) {
        self.write().insert(key, value);
    }

    /// Removes `key`, returning whether an entry existed.
    pub fn erase(&self, key: &K) -> bool {
        self.write().remove(key).is_some()
    }

    /// Returns a clone of the value for `key`, if present.
    pub fn find(&self, key: &K) -> Option<V> {
        self.read().get(key).cloned()
    }

    pub fn contains(&self, key: &K) -> bool {
        self.read().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Returns the existing value for `key`, inserting `value` first if the
    /// key is absent. One write lock covers the check and the insert, so two
    /// racing callers agree on a single winner.
    pub fn find_or_insert(&self, key: K, value: V) -> V {
        self.write().entry(key).or_insert(value).clone()
    }

    /// Returns a consistent copy of the whole map.
    pub fn snapshot(&self) -> BTreeMap<K, V> {
        self.read().clone()
    }

    /// Keeps only the entries for which `pred` returns true.
    pub fn retain(&self, mut pred: impl FnMut(&K, &V) -> bool) {
        self.write().retain(|k, v| pred(k, v));
    }

    pub fn clear(&self) {
        self.write().clear();
    }

    /// Runs `f` over every entry under the read lock.
    pub fn for_each_read(&self, mut f: impl FnMut(&K, &V)) {
        for (k, v) in self.read().iter() {
            f(k, v);
        }
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, BTreeMap<K, V>> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, BTreeMap<K, V>> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }
}
