//! Cache storage trait and in-memory implementation.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use super::key::CacheKey;
use super::traits::CacheEntry;

/// Trait for cache storage backends.
///
/// Storage is dumb: it never looks at timestamps. Expiry is decided by the
/// [`CacheLayer`](super::CacheLayer) on read.
pub trait CacheStorage: Send + Sync {
  /// Get a copy of the entry stored under `key`.
  fn get(&self, key: &CacheKey) -> Option<CacheEntry>;

  /// Store an entry, replacing whatever was there.
  fn insert(&self, key: CacheKey, entry: CacheEntry);

  /// Reset the timestamp of an existing entry. Returns false if absent.
  fn touch(&self, key: &CacheKey) -> bool;

  /// Remove one entry. Returns true if it existed.
  fn remove(&self, key: &CacheKey) -> bool;

  /// Remove every entry.
  fn clear(&self);

  /// Whether an entry exists for `key`, fresh or not.
  fn contains(&self, key: &CacheKey) -> bool;

  /// Snapshot of all keys with their entries.
  fn entries(&self) -> Vec<(CacheKey, CacheEntry)>;
}

/// Storage implementation that doesn't cache anything.
/// Used when caching is disabled - all operations are no-ops.
pub struct NoopStorage;

impl CacheStorage for NoopStorage {
  fn get(&self, _key: &CacheKey) -> Option<CacheEntry> {
    None // Always miss
  }

  fn insert(&self, _key: CacheKey, _entry: CacheEntry) {}

  fn touch(&self, _key: &CacheKey) -> bool {
    false
  }

  fn remove(&self, _key: &CacheKey) -> bool {
    false
  }

  fn clear(&self) {}

  fn contains(&self, _key: &CacheKey) -> bool {
    false
  }

  fn entries(&self) -> Vec<(CacheKey, CacheEntry)> {
    Vec::new()
  }
}

/// Process-local storage backed by a mutex-guarded map.
///
/// The lock is only held for the duration of a map operation, never across
/// an await point.
#[derive(Default)]
pub struct MemoryStorage {
  entries: Mutex<HashMap<CacheKey, CacheEntry>>,
}

impl MemoryStorage {
  pub fn new() -> Self {
    Self::default()
  }

  fn lock(&self) -> MutexGuard<'_, HashMap<CacheKey, CacheEntry>> {
    // A panic while holding the lock leaves the map itself consistent
    self
      .entries
      .lock()
      .unwrap_or_else(|poisoned| poisoned.into_inner())
  }
}

impl CacheStorage for MemoryStorage {
  fn get(&self, key: &CacheKey) -> Option<CacheEntry> {
    self.lock().get(key).cloned()
  }

  fn insert(&self, key: CacheKey, entry: CacheEntry) {
    self.lock().insert(key, entry);
  }

  fn touch(&self, key: &CacheKey) -> bool {
    match self.lock().get_mut(key) {
      Some(entry) => {
        entry.touch();
        true
      }
      None => false,
    }
  }

  fn remove(&self, key: &CacheKey) -> bool {
    self.lock().remove(key).is_some()
  }

  fn clear(&self) {
    self.lock().clear();
  }

  fn contains(&self, key: &CacheKey) -> bool {
    self.lock().contains_key(key)
  }

  fn entries(&self) -> Vec<(CacheKey, CacheEntry)> {
    self
      .lock()
      .iter()
      .map(|(key, entry)| (key.clone(), entry.clone()))
      .collect()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_memory_storage_roundtrip() {
    let storage = MemoryStorage::new();
    let key = CacheKey::get("/lessons/1");

    assert!(storage.get(&key).is_none());
    storage.insert(key.clone(), CacheEntry::new(json!({"id": 1}), None));

    let entry = storage.get(&key).expect("entry stored");
    assert_eq!(entry.data, json!({"id": 1}));
    assert!(storage.contains(&key));
  }

  #[test]
  fn test_insert_overwrites() {
    let storage = MemoryStorage::new();
    let key = CacheKey::get("/streak");

    storage.insert(key.clone(), CacheEntry::new(json!(3), None));
    storage.insert(key.clone(), CacheEntry::new(json!(4), Some("\"b\"".into())));

    let entry = storage.get(&key).expect("entry stored");
    assert_eq!(entry.data, json!(4));
    assert_eq!(entry.etag.as_deref(), Some("\"b\""));
    assert_eq!(storage.entries().len(), 1);
  }

  #[test]
  fn test_remove_and_clear() {
    let storage = MemoryStorage::new();
    let a = CacheKey::get("/a");
    let b = CacheKey::get("/b");
    storage.insert(a.clone(), CacheEntry::new(json!("a"), None));
    storage.insert(b.clone(), CacheEntry::new(json!("b"), None));

    assert!(storage.remove(&a));
    assert!(!storage.remove(&a));
    assert!(storage.contains(&b));

    storage.clear();
    assert!(storage.entries().is_empty());
  }

  #[test]
  fn test_noop_storage_always_misses() {
    let storage = NoopStorage;
    let key = CacheKey::get("/a");
    storage.insert(key.clone(), CacheEntry::new(json!(1), None));

    assert!(storage.get(&key).is_none());
    assert!(!storage.contains(&key));
    assert!(!storage.touch(&key));
  }
}
