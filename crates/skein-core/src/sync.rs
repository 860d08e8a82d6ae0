//! Per-key asynchronous mutual exclusion.
//!
//! [`KeyedLocks`] hands out one lock per string key so work on different
//! keys never contends. Entries are dropped from the map once the last
//! guard or waiter for a key goes away.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

type LockMap = DashMap<String, Arc<Mutex<()>>>;

/// A map of lazily created per-key mutexes.
#[derive(Default, Clone)]
pub struct KeyedLocks {
    locks: Arc<LockMap>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `key`.
    pub async fn lock(&self, key: &str) -> KeyGuard {
        let mutex = self
            .locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let guard = mutex.lock_owned().await;
        KeyGuard {
            guard: Some(guard),
            key: key.to_string(),
            locks: Arc::clone(&self.locks),
        }
    }

    /// Acquire `key` only if nobody holds it.
    pub fn try_lock(&self, key: &str) -> Option<KeyGuard> {
        let mutex = self
            .locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        match mutex.try_lock_owned() {
            Ok(guard) => Some(KeyGuard {
                guard: Some(guard),
                key: key.to_string(),
                locks: Arc::clone(&self.locks),
            }),
            Err(_) => {
                release_entry(&self.locks, key);
                None
            }
        }
    }

    /// Number of keys currently held or waited on.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

/// Exclusive access to one key. Released on drop.
pub struct KeyGuard {
    guard: Option<OwnedMutexGuard<()>>,
    key: String,
    locks: Arc<LockMap>,
}

impl KeyGuard {
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for KeyGuard {
    fn drop(&mut self) {
        // Release the mutex first so the strong count reflects only waiters.
        self.guard.take();
        release_entry(&self.locks, &self.key);
    }
}

fn release_entry(locks: &LockMap, key: &str) {
    locks.remove_if(key, |_, mutex| Arc::strong_count(mutex) == 1);
}
