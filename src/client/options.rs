//! Per-call request configuration.

use reqwest::Method;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;

use crate::error::RequestError;

/// Retries after the first attempt when a call doesn't say otherwise.
pub const DEFAULT_RETRY_COUNT: u32 = 3;

/// Pause between attempts when a call doesn't say otherwise.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(1000);

/// How a call interacts with the response cache.
#[derive(Debug, Clone, Default)]
pub struct CacheOptions {
  /// How long a cached response stays authoritative (client default if unset)
  pub ttl: Option<Duration>,
  /// Skip the cache read and always dispatch
  pub bypass_cache: bool,
  /// Serve any cached copy at once and refresh it in the background
  pub stale_while_revalidate: bool,
}

/// Fixed-delay retry budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
  /// Attempts allowed after the first one
  pub count: u32,
  pub delay: Duration,
}

impl RetryPolicy {
  pub fn new(count: u32, delay: Duration) -> Self {
    Self { count, delay }
  }

  /// Make exactly one attempt.
  pub fn none() -> Self {
    Self {
      count: 0,
      delay: Duration::ZERO,
    }
  }
}

impl Default for RetryPolicy {
  fn default() -> Self {
    Self {
      count: DEFAULT_RETRY_COUNT,
      delay: DEFAULT_RETRY_DELAY,
    }
  }
}

/// Everything about a call besides its endpoint.
#[derive(Debug, Clone)]
pub struct RequestOptions {
  pub method: Method,
  pub headers: BTreeMap<String, String>,
  pub body: Option<Value>,
  pub cache: CacheOptions,
  /// Retry budget (client default if unset)
  pub retry: Option<RetryPolicy>,
}

impl Default for RequestOptions {
  fn default() -> Self {
    Self::new(Method::GET)
  }
}

impl RequestOptions {
  pub fn new(method: Method) -> Self {
    Self {
      method,
      headers: BTreeMap::new(),
      body: None,
      cache: CacheOptions::default(),
      retry: None,
    }
  }

  pub fn get() -> Self {
    Self::new(Method::GET)
  }

  pub fn post() -> Self {
    Self::new(Method::POST)
  }

  pub fn put() -> Self {
    Self::new(Method::PUT)
  }

  pub fn delete() -> Self {
    Self::new(Method::DELETE)
  }

  pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
    self.headers.insert(name.into(), value.into());
    self
  }

  /// Attach an already-built JSON body.
  pub fn body(mut self, body: Value) -> Self {
    self.body = Some(body);
    self
  }

  /// Serialize `body` as the JSON payload.
  pub fn json<B: Serialize + ?Sized>(self, body: &B) -> Result<Self, RequestError> {
    let value = serde_json::to_value(body)
      .map_err(|e| RequestError::InvalidRequest(format!("body is not serializable: {}", e)))?;
    Ok(self.body(value))
  }

  pub fn ttl(mut self, ttl: Duration) -> Self {
    self.cache.ttl = Some(ttl);
    self
  }

  pub fn bypass_cache(mut self) -> Self {
    self.cache.bypass_cache = true;
    self
  }

  pub fn stale_while_revalidate(mut self) -> Self {
    self.cache.stale_while_revalidate = true;
    self
  }

  pub fn retry(mut self, count: u32, delay: Duration) -> Self {
    self.retry = Some(RetryPolicy::new(count, delay));
    self
  }

  pub fn no_retry(mut self) -> Self {
    self.retry = Some(RetryPolicy::none());
    self
  }
}
