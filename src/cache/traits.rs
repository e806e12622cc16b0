//! Core types for the response cache.

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::time::Duration;
use tokio::time::Instant;

/// A cached response body plus the metadata needed to judge and revalidate it.
#[derive(Debug, Clone)]
pub struct CacheEntry {
  /// The decoded response body
  pub data: Value,
  /// When the entry was written (monotonic, drives TTL checks)
  pub timestamp: Instant,
  /// Wall-clock time of the write, for reporting
  pub cached_at: DateTime<Utc>,
  /// Validator returned by the server, sent back as `If-None-Match`
  pub etag: Option<String>,
}

impl CacheEntry {
  /// Create an entry stamped with the current time.
  pub fn new(data: Value, etag: Option<String>) -> Self {
    Self {
      data,
      timestamp: Instant::now(),
      cached_at: Utc::now(),
      etag,
    }
  }

  /// Time since the entry was written.
  pub fn age(&self) -> Duration {
    self.timestamp.elapsed()
  }

  /// Whether the entry has outlived `ttl`.
  pub fn is_stale(&self, ttl: Duration) -> bool {
    self.age() >= ttl
  }

  /// Mark the entry as just confirmed by the server.
  pub fn touch(&mut self) {
    self.timestamp = Instant::now();
    self.cached_at = Utc::now();
  }
}

/// Indicates where response data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// Fresh data from network
  Network,
  /// Data from cache, within TTL
  CacheFresh,
  /// Data from cache past its TTL, served while a refresh runs
  CacheStale,
  /// Offline mode - network unavailable, serving cached data
  Offline,
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[tokio::test(start_paused = true)]
  async fn test_entry_goes_stale_after_ttl() {
    let entry = CacheEntry::new(json!({"word": "ciao"}), None);
    assert!(!entry.is_stale(Duration::from_secs(60)));

    tokio::time::advance(Duration::from_secs(60)).await;
    assert!(entry.is_stale(Duration::from_secs(60)));
  }

  #[tokio::test(start_paused = true)]
  async fn test_touch_resets_age() {
    let mut entry = CacheEntry::new(json!(1), Some("\"v1\"".into()));
    tokio::time::advance(Duration::from_secs(30)).await;
    assert_eq!(entry.age(), Duration::from_secs(30));

    entry.touch();
    assert_eq!(entry.age(), Duration::ZERO);
  }
}
