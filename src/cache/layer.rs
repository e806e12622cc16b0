//! Cache layer that decides freshness on top of a storage backend.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

use super::key::CacheKey;
use super::storage::{CacheStorage, MemoryStorage};
use super::traits::CacheEntry;

/// Default time a cached response stays authoritative.
pub const DEFAULT_TTL: Duration = Duration::from_secs(5 * 60);

/// Outcome of looking a key up in the cache.
#[derive(Debug, Clone)]
pub enum Lookup {
  /// Entry exists and is within its TTL
  Fresh(CacheEntry),
  /// Entry exists but has expired
  Stale(CacheEntry),
  /// Nothing stored under the key
  Miss,
}

impl Lookup {
  /// The entry, if any, regardless of freshness.
  pub fn entry(&self) -> Option<&CacheEntry> {
    match self {
      Lookup::Fresh(entry) | Lookup::Stale(entry) => Some(entry),
      Lookup::Miss => None,
    }
  }

  pub fn into_entry(self) -> Option<CacheEntry> {
    match self {
      Lookup::Fresh(entry) | Lookup::Stale(entry) => Some(entry),
      Lookup::Miss => None,
    }
  }
}

/// Snapshot of the cache contents.
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
  /// Number of stored entries
  pub size: usize,
  /// Entries older than the layer's default TTL
  pub stale: usize,
  /// Display form of every key, sorted
  pub keys: Vec<String>,
  /// Write time of the oldest entry
  pub oldest_cached_at: Option<DateTime<Utc>>,
}

/// Cache layer that manages expiry on top of a storage backend.
///
/// Expiry is lazy: nothing is swept in the background, entries are judged
/// when read and only leave the store through [`CacheLayer::clear`].
pub struct CacheLayer {
  storage: Arc<dyn CacheStorage>,
  /// TTL applied when a call doesn't specify one
  ttl: Duration,
}

impl CacheLayer {
  /// Create a new cache layer with the given storage backend.
  pub fn new(storage: impl CacheStorage + 'static) -> Self {
    Self {
      storage: Arc::new(storage),
      ttl: DEFAULT_TTL,
    }
  }

  /// In-memory layer with the default TTL.
  pub fn in_memory() -> Self {
    Self::new(MemoryStorage::new())
  }

  /// Set the default TTL.
  pub fn with_ttl(mut self, ttl: Duration) -> Self {
    self.ttl = ttl;
    self
  }

  /// Look up `key`, judging freshness against `ttl` (or the default).
  pub fn lookup(&self, key: &CacheKey, ttl: Option<Duration>) -> Lookup {
    let ttl = ttl.unwrap_or(self.ttl);
    match self.storage.get(key) {
      Some(entry) if entry.is_stale(ttl) => Lookup::Stale(entry),
      Some(entry) => Lookup::Fresh(entry),
      None => Lookup::Miss,
    }
  }

  /// Store a response body under `key`.
  pub fn store(&self, key: CacheKey, data: Value, etag: Option<String>) {
    self.storage.insert(key, CacheEntry::new(data, etag));
  }

  /// Mark an existing entry as revalidated.
  pub fn touch(&self, key: &CacheKey) -> bool {
    self.storage.touch(key)
  }

  /// Remove one entry, or everything when `key` is `None`.
  pub fn clear(&self, key: Option<&CacheKey>) {
    match key {
      Some(key) => {
        self.storage.remove(key);
      }
      None => self.storage.clear(),
    }
  }

  /// Whether anything is stored under `key`, fresh or not.
  pub fn contains(&self, key: &CacheKey) -> bool {
    self.storage.contains(key)
  }

  pub fn stats(&self) -> CacheStats {
    let entries = self.storage.entries();

    let stale = entries
      .iter()
      .filter(|(_, entry)| entry.is_stale(self.ttl))
      .count();
    let oldest_cached_at = entries.iter().map(|(_, entry)| entry.cached_at).min();

    let mut keys: Vec<String> = entries.iter().map(|(key, _)| key.to_string()).collect();
    keys.sort();

    CacheStats {
      size: entries.len(),
      stale,
      keys,
      oldest_cached_at,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::storage::NoopStorage;
  use serde_json::json;

  #[tokio::test(start_paused = true)]
  async fn test_lookup_fresh_then_stale() {
    let cache = CacheLayer::in_memory();
    let key = CacheKey::get("/vocab");
    cache.store(key.clone(), json!(["casa"]), None);

    assert!(matches!(cache.lookup(&key, None), Lookup::Fresh(_)));

    tokio::time::advance(DEFAULT_TTL).await;
    let lookup = cache.lookup(&key, None);
    assert!(matches!(lookup, Lookup::Stale(_)));
    assert_eq!(lookup.entry().map(|e| &e.data), Some(&json!(["casa"])));
  }

  #[tokio::test(start_paused = true)]
  async fn test_per_call_ttl_overrides_default() {
    let cache = CacheLayer::in_memory();
    let key = CacheKey::get("/vocab");
    cache.store(key.clone(), json!(1), None);

    tokio::time::advance(Duration::from_secs(10)).await;
    assert!(matches!(
      cache.lookup(&key, Some(Duration::from_secs(5))),
      Lookup::Stale(_)
    ));
    assert!(matches!(cache.lookup(&key, None), Lookup::Fresh(_)));
  }

  #[test]
  fn test_lookup_miss() {
    let cache = CacheLayer::in_memory();
    assert!(matches!(
      cache.lookup(&CacheKey::get("/nothing"), None),
      Lookup::Miss
    ));
  }

  #[test]
  fn test_clear_single_key() {
    let cache = CacheLayer::in_memory();
    let a = CacheKey::get("/a");
    let b = CacheKey::get("/b");
    cache.store(a.clone(), json!(1), None);
    cache.store(b.clone(), json!(2), None);

    cache.clear(Some(&a));
    assert!(!cache.contains(&a));
    assert!(cache.contains(&b));
    assert_eq!(cache.stats().size, 1);
  }

  #[test]
  fn test_clear_everything() {
    let cache = CacheLayer::in_memory();
    cache.store(CacheKey::get("/a"), json!(1), None);
    cache.store(CacheKey::get("/b"), json!(2), None);

    cache.clear(None);
    assert_eq!(cache.stats().size, 0);
  }

  #[tokio::test(start_paused = true)]
  async fn test_stats_counts_stale_entries() {
    let cache = CacheLayer::in_memory().with_ttl(Duration::from_secs(60));
    cache.store(CacheKey::get("/old"), json!(1), None);
    tokio::time::advance(Duration::from_secs(61)).await;
    cache.store(CacheKey::get("/new"), json!(2), None);

    let stats = cache.stats();
    assert_eq!(stats.size, 2);
    assert_eq!(stats.stale, 1);
    assert_eq!(stats.keys, vec!["/new".to_string(), "/old".to_string()]);
    assert!(stats.oldest_cached_at.is_some());
  }

  #[test]
  fn test_stats_lists_hand_built_keys() {
    let cache = CacheLayer::in_memory();
    cache.store(
      CacheKey::Request {
        method: "PUT".into(),
        endpoint: "/streak".into(),
        body_digest: String::new(),
      },
      json!(3),
      None,
    );

    assert_eq!(cache.stats().keys, vec!["PUT /streak #".to_string()]);
  }

  #[test]
  fn test_disabled_cache_never_hits() {
    let cache = CacheLayer::new(NoopStorage);
    let key = CacheKey::get("/a");
    cache.store(key.clone(), json!(1), None);
    assert!(matches!(cache.lookup(&key, None), Lookup::Miss));
  }
}
