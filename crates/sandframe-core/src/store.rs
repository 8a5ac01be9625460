//! Caller-side storage for uploaded datasets.
//!
//! An explicit, bounded map from opaque keys to snapshots. Entries expire
//! after a fixed time-to-live, and the least recently used entry is evicted
//! when the store is full.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use rustc_hash::FxHashMap;
use uuid::Uuid;

use crate::dataset::DatasetSnapshot;

/// Default number of datasets kept.
pub const DEFAULT_CAPACITY: usize = 64;

/// Default time-to-live for a stored dataset.
pub const DEFAULT_TTL: Duration = Duration::from_secs(60 * 60);

struct Entry {
    snapshot: Arc<DatasetSnapshot>,
    inserted: Instant,
    last_used: Instant,
}

/// Bounded, expiring store of dataset snapshots keyed by [`Uuid`].
pub struct SnapshotStore {
    capacity: usize,
    ttl: Duration,
    entries: Mutex<FxHashMap<Uuid, Entry>>,
}

impl Default for SnapshotStore {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY, DEFAULT_TTL)
    }
}

impl SnapshotStore {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            capacity: capacity.max(1),
            ttl,
            entries: Mutex::new(FxHashMap::default()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FxHashMap<Uuid, Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store a snapshot and return its key.
    pub fn insert(&self, snapshot: DatasetSnapshot) -> Uuid {
        let now = Instant::now();
        let key = Uuid::new_v4();
        let mut entries = self.lock();
        entries.retain(|_, e| now.duration_since(e.inserted) < self.ttl);
        while entries.len() >= self.capacity {
            let oldest = entries.iter().min_by_key(|(_, e)| e.last_used).map(|(k, _)| *k);
            match oldest {
                Some(oldest) => {
                    tracing::debug!(key = %oldest, "evicting least recently used dataset");
                    entries.remove(&oldest);
                }
                None => break,
            }
        }
        entries.insert(
            key,
            Entry {
                snapshot: Arc::new(snapshot),
                inserted: now,
                last_used: now,
            },
        );
        key
    }

    /// Look up a snapshot, refreshing its recency. Expired entries are dropped.
    pub fn get(&self, key: &Uuid) -> Option<Arc<DatasetSnapshot>> {
        let now = Instant::now();
        let mut entries = self.lock();
        let expired = entries
            .get(key)
            .is_some_and(|e| now.duration_since(e.inserted) >= self.ttl);
        if expired {
            tracing::debug!(%key, "dataset expired");
            entries.remove(key);
            return None;
        }
        let entry = entries.get_mut(key)?;
        entry.last_used = now;
        Some(Arc::clone(&entry.snapshot))
    }

    pub fn remove(&self, key: &Uuid) -> Option<Arc<DatasetSnapshot>> {
        self.lock().remove(key).map(|e| e.snapshot)
    }

    /// Drop every expired entry, returning how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|_, e| now.duration_since(e.inserted) < self.ttl);
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::ColumnSnapshot;

    fn snapshot(n: f64) -> DatasetSnapshot {
        DatasetSnapshot::new(vec![ColumnSnapshot::numeric("x", [n])]).unwrap()
    }

    #[test]
    fn test_insert_and_get() {
        let store = SnapshotStore::default();
        let key = store.insert(snapshot(1.0));
        assert_eq!(store.get(&key).unwrap().num_rows(), 1);
        assert!(store.get(&Uuid::new_v4()).is_none());
        assert!(store.remove(&key).is_some());
        assert!(store.is_empty());
    }

    #[test]
    fn test_lru_eviction() {
        let store = SnapshotStore::new(2, DEFAULT_TTL);
        let a = store.insert(snapshot(1.0));
        std::thread::sleep(Duration::from_millis(2));
        let b = store.insert(snapshot(2.0));
        std::thread::sleep(Duration::from_millis(2));
        assert!(store.get(&a).is_some());
        std::thread::sleep(Duration::from_millis(2));
        let c = store.insert(snapshot(3.0));

        assert_eq!(store.len(), 2);
        assert!(store.get(&b).is_none());
        assert!(store.get(&a).is_some());
        assert!(store.get(&c).is_some());
    }

    #[test]
    fn test_ttl_expiry() {
        let store = SnapshotStore::new(8, Duration::from_millis(20));
        let key = store.insert(snapshot(1.0));
        store.insert(snapshot(2.0));
        std::thread::sleep(Duration::from_millis(40));
        assert!(store.get(&key).is_none());
        assert_eq!(store.purge_expired(), 1);
        assert!(store.is_empty());
    }
}
