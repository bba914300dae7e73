//! Per-path write locking
//!
//! Readers go straight to disk. Writers to the same namespace path are
//! serialized through a per-path lock so two uploads of one file cannot
//! interleave their temp-file and rename steps.

use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Map size at which idle locks are swept on the next insert.
pub const DEFAULT_PRUNE_THRESHOLD: usize = 1024;

/// Lock key: user id plus normalized relative path.
pub type PathKey = String;

pub fn path_key(user: &str, normalized: &str) -> PathKey {
    format!("{user}/{normalized}")
}

/// Per-path lock manager.
///
/// Locks are created on first use and kept in a shared map. Once the map
/// reaches its high-water mark, inserting a new key first drops every lock
/// nobody holds. The mark doubles while most entries are still in use, so
/// the sweep cost stays amortized.
pub struct PathLockManager {
    locks: Arc<RwLock<HashMap<PathKey, Arc<Mutex<()>>>>>,
    threshold: usize,
    high_water: AtomicUsize,
}

impl PathLockManager {
    pub fn new() -> Self {
        Self::with_prune_threshold(DEFAULT_PRUNE_THRESHOLD)
    }

    pub fn with_prune_threshold(threshold: usize) -> Self {
        let threshold = threshold.max(1);
        Self {
            locks: Arc::new(RwLock::new(HashMap::new())),
            threshold,
            high_water: AtomicUsize::new(threshold),
        }
    }

    /// Get or create the lock for `key`.
    pub fn get_lock(&self, key: &str) -> Arc<Mutex<()>> {
        {
            let map = self.locks.read();
            if let Some(lock) = map.get(key) {
                return lock.clone();
            }
        }

        let mut map = self.locks.write();
        if !map.contains_key(key) && map.len() >= self.high_water.load(Ordering::Relaxed) {
            let pruned = retain_held(&mut map);
            let mark = self.threshold.max(map.len() * 2);
            self.high_water.store(mark, Ordering::Relaxed);
            debug!(pruned, live = map.len(), "Swept idle path locks");
        }
        // Another writer may have inserted it between the two map locks.
        map.entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Locks for several keys, deduplicated and in a fixed (sorted) order so
    /// callers that take them one after another cannot deadlock.
    pub fn get_locks(&self, keys: &[&str]) -> Vec<Arc<Mutex<()>>> {
        let mut sorted: Vec<&str> = keys.to_vec();
        sorted.sort_unstable();
        sorted.dedup();
        sorted.into_iter().map(|k| self.get_lock(k)).collect()
    }

    pub fn lock_count(&self) -> usize {
        self.locks.read().len()
    }
}

/// Drop locks nobody outside the table holds a handle to.
fn retain_held(map: &mut HashMap<PathKey, Arc<Mutex<()>>>) -> usize {
    let before = map.len();
    map.retain(|_, lock| Arc::strong_count(lock) > 1);
    before - map.len()
}

impl Default for PathLockManager {
    fn default() -> Self {
        Self::new()
    }
}
