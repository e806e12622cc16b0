//! Fixed-window rate limiting per endpoint prefix.
//!
//! Each configured prefix owns one counter. The first request after a window
//! ends opens a new window of `interval` and counts as one; further requests
//! inside the window are allowed until `max_requests` is reached.
//!
//! Counting in fixed windows means a client can send `max_requests` at the
//! very end of one window and another `max_requests` at the start of the next,
//! so up to twice the limit can pass in a short span around a boundary.

use serde::Deserialize;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

use crate::error::RequestError;

/// A limit applied to every endpoint starting with `prefix`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RateLimitRule {
  pub prefix: String,
  pub max_requests: u32,
  #[serde(rename = "interval_secs", with = "secs")]
  pub interval: Duration,
}

impl RateLimitRule {
  pub fn new(prefix: impl Into<String>, max_requests: u32, interval: Duration) -> Self {
    Self {
      prefix: prefix.into(),
      max_requests,
      interval,
    }
  }
}

/// Counter for one prefix bucket.
#[derive(Debug, Clone, Copy)]
struct RateLimitState {
  count: u32,
  reset_at: Instant,
}

/// Fixed-window limiter over a set of prefix rules.
#[derive(Debug, Default)]
pub struct RateLimiter {
  rules: Vec<RateLimitRule>,
  buckets: Mutex<HashMap<String, RateLimitState>>,
}

impl RateLimiter {
  pub fn new(rules: Vec<RateLimitRule>) -> Self {
    Self {
      rules,
      buckets: Mutex::new(HashMap::new()),
    }
  }

  /// Longest configured prefix matching `endpoint`.
  fn rule_for(&self, endpoint: &str) -> Option<&RateLimitRule> {
    self
      .rules
      .iter()
      .filter(|rule| endpoint.starts_with(&rule.prefix))
      .max_by_key(|rule| rule.prefix.len())
  }

  fn lock(&self) -> MutexGuard<'_, HashMap<String, RateLimitState>> {
    self
      .buckets
      .lock()
      .unwrap_or_else(|poisoned| poisoned.into_inner())
  }

  /// Count a request to `endpoint`, rejecting it if its bucket is full.
  ///
  /// Endpoints matching no rule are always allowed and never counted.
  pub fn check(&self, endpoint: &str) -> Result<(), RequestError> {
    let Some(rule) = self.rule_for(endpoint) else {
      return Ok(());
    };

    let now = Instant::now();
    let mut buckets = self.lock();
    let state = buckets
      .entry(rule.prefix.clone())
      .or_insert(RateLimitState {
        count: 0,
        reset_at: now,
      });

    if now >= state.reset_at {
      *state = RateLimitState {
        count: 1,
        reset_at: now + rule.interval,
      };
      return Ok(());
    }

    if state.count >= rule.max_requests {
      debug!(bucket = %rule.prefix, count = state.count, "rate limit reached");
      return Err(RequestError::RateLimited {
        bucket: rule.prefix.clone(),
        retry_after: state.reset_at - now,
      });
    }

    state.count += 1;
    Ok(())
  }

  /// Requests counted in the current window for `prefix`.
  pub fn count(&self, prefix: &str) -> u32 {
    let now = Instant::now();
    self
      .lock()
      .get(prefix)
      .filter(|state| now < state.reset_at)
      .map(|state| state.count)
      .unwrap_or(0)
  }
}

mod secs {
  use serde::{Deserialize, Deserializer};
  use std::time::Duration;

  pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
  where
    D: Deserializer<'de>,
  {
    u64::deserialize(deserializer).map(Duration::from_secs)
  }
}
