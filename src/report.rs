//! Best-effort forwarding of request failures to error monitoring.

use std::panic::{catch_unwind, AssertUnwindSafe};
use tracing::{error, warn};

use crate::error::RequestError;

/// Receives every failure that ends a request.
///
/// Reporting is fire-and-forget: implementations should hand the error off
/// and return quickly.
pub trait ErrorReporter: Send + Sync {
  fn report(&self, endpoint: &str, error: &RequestError);
}

/// Reporter that writes failures to the tracing log.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

impl ErrorReporter for TracingReporter {
  fn report(&self, endpoint: &str, error: &RequestError) {
    warn!(endpoint, %error, "request failed");
  }
}

/// Call `reporter`, containing any panic so the caller's response is unaffected.
pub(crate) fn report_quietly(reporter: &dyn ErrorReporter, endpoint: &str, err: &RequestError) {
  let outcome = catch_unwind(AssertUnwindSafe(|| reporter.report(endpoint, err)));
  if outcome.is_err() {
    error!(endpoint, "error reporter panicked");
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::Mutex;

  #[derive(Default)]
  struct Recording(Mutex<Vec<String>>);

  impl ErrorReporter for Recording {
    fn report(&self, endpoint: &str, error: &RequestError) {
      self.0.lock().unwrap().push(format!("{}: {}", endpoint, error));
    }
  }

  struct Exploding;

  impl ErrorReporter for Exploding {
    fn report(&self, _endpoint: &str, _error: &RequestError) {
      panic!("monitoring is down");
    }
  }

  #[test]
  fn test_report_reaches_reporter() {
    let reporter = Recording::default();
    report_quietly(&reporter, "/lessons", &RequestError::Offline);

    let seen = reporter.0.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert!(seen[0].starts_with("/lessons: network unavailable"));
  }

  #[test]
  fn test_panicking_reporter_is_contained() {
    report_quietly(&Exploding, "/lessons", &RequestError::Offline);
  }
}
