//! Connectivity signal shared between the client and whoever watches the network.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared online/offline flag.
///
/// Clones observe the same flag, so the application can flip it from a
/// connectivity watcher while clients read it on every request.
#[derive(Debug, Clone)]
pub struct NetworkStatus {
  online: Arc<AtomicBool>,
}

impl NetworkStatus {
  /// A status that starts out online.
  pub fn online() -> Self {
    Self {
      online: Arc::new(AtomicBool::new(true)),
    }
  }

  /// A status that starts out offline.
  pub fn offline() -> Self {
    Self {
      online: Arc::new(AtomicBool::new(false)),
    }
  }

  pub fn is_online(&self) -> bool {
    self.online.load(Ordering::Acquire)
  }

  pub fn set_online(&self, online: bool) {
    self.online.store(online, Ordering::Release);
  }
}

impl Default for NetworkStatus {
  fn default() -> Self {
    Self::online()
  }
}
