//! Error taxonomy for the request layer.

use std::time::Duration;
use thiserror::Error;

/// Everything that can go wrong while serving a request.
///
/// Cloneable so the same failure can sit in an [`ApiResponse`](crate::ApiResponse)
/// and be handed to every caller joined on a de-duplicated request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RequestError {
  /// No connectivity and nothing usable in the cache.
  #[error("network unavailable and no cached response for this request")]
  Offline,

  /// The fixed window for this endpoint prefix is exhausted.
  #[error("rate limit exceeded for '{bucket}', retry in {}ms", .retry_after.as_millis())]
  RateLimited { bucket: String, retry_after: Duration },

  /// The call never produced a response (connect, timeout, TLS, ...).
  #[error("transport error: {0}")]
  Transport(String),

  /// The server answered with a non-success status.
  #[error("request failed with status {status}: {message}")]
  Status { status: u16, message: String },

  /// The body could not be decoded as the expected JSON.
  #[error("failed to parse response: {0}")]
  Parse(String),

  /// The request cannot be expressed (bad endpoint, missing body, ...).
  #[error("invalid request: {0}")]
  InvalidRequest(String),
}

impl RequestError {
  /// Whether another attempt could plausibly succeed.
  pub fn is_retryable(&self) -> bool {
    matches!(
      self,
      RequestError::Transport(_) | RequestError::Status { .. } | RequestError::Parse(_)
    )
  }

  /// HTTP status carried by the error, if any.
  pub fn status(&self) -> Option<u16> {
    match self {
      RequestError::Status { status, .. } => Some(*status),
      RequestError::RateLimited { .. } => Some(429),
      _ => None,
    }
  }
}

impl From<reqwest::Error> for RequestError {
  fn from(e: reqwest::Error) -> Self {
    match e.status() {
      Some(status) => RequestError::Status {
        status: status.as_u16(),
        message: e.to_string(),
      },
      None if e.is_decode() => RequestError::Parse(e.to_string()),
      None => RequestError::Transport(e.to_string()),
    }
  }
}
