//! In-process run coordination
//!
//! `KeyedLocks` serializes the fold step per (user, period); `InFlight`
//! admits at most one run per (user, fingerprint). Cross-process safety comes
//! from the store's version check, not from these.

use std::collections::{HashMap, HashSet};
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Async mutexes keyed by value, created on demand
pub struct KeyedLocks<K> {
    locks: Mutex<HashMap<K, Arc<AsyncMutex<()>>>>,
}

impl<K> Default for KeyedLocks<K> {
    fn default() -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
        }
    }
}

impl<K: Clone + Ord + Hash> KeyedLocks<K> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock every key, in sorted order so overlapping key sets cannot deadlock
    pub async fn lock_all(&self, keys: impl IntoIterator<Item = K>) -> Vec<OwnedMutexGuard<()>> {
        let mut keys: Vec<K> = keys.into_iter().collect();
        keys.sort();
        keys.dedup();

        let mut guards = Vec::with_capacity(keys.len());
        for key in keys {
            let lock = self.lock_for(key);
            guards.push(lock.lock_owned().await);
        }
        guards
    }

    fn lock_for(&self, key: K) -> Arc<AsyncMutex<()>> {
        let mut locks = lock_ignoring_poison(&self.locks);
        // Drop locks nobody holds or waits on
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        locks.entry(key).or_default().clone()
    }

    /// Number of keys currently tracked
    pub fn len(&self) -> usize {
        lock_ignoring_poison(&self.locks).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Set of keys with a run in progress
pub struct InFlight<K: Hash + Eq> {
    active: Arc<Mutex<HashSet<K>>>,
}

impl<K: Hash + Eq> Default for InFlight<K> {
    fn default() -> Self {
        Self {
            active: Arc::new(Mutex::new(HashSet::new())),
        }
    }
}

impl<K: Hash + Eq + Clone> InFlight<K> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `key`, or `None` when another run holds it
    pub fn try_acquire(&self, key: K) -> Option<InFlightGuard<K>> {
        let mut active = lock_ignoring_poison(&self.active);
        if !active.insert(key.clone()) {
            return None;
        }
        Some(InFlightGuard {
            active: Arc::clone(&self.active),
            key,
        })
    }

    pub fn contains(&self, key: &K) -> bool {
        lock_ignoring_poison(&self.active).contains(key)
    }
}

/// Releases the key on drop
pub struct InFlightGuard<K: Hash + Eq> {
    active: Arc<Mutex<HashSet<K>>>,
    key: K,
}

impl<K: Hash + Eq> Drop for InFlightGuard<K> {
    fn drop(&mut self) {
        lock_ignoring_poison(&self.active).remove(&self.key);
    }
}

/// The guarded maps stay consistent even if a holder panicked
fn lock_ignoring_poison<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
