//! Caching, rate-limited, retrying request client for the Parla learning app.
//!
//! [`RequestClient::request`] is the single entry point: it serves GET
//! responses from an in-memory TTL cache, can return stale data while
//! refreshing it in the background, applies fixed-window rate limits per
//! endpoint prefix, retries transient failures with a fixed delay, and falls
//! back to cached data when the network is down. Every outcome, success or
//! failure, comes back as an [`ApiResponse`].
//!
//! # Example
//!
//! ```ignore
//! let client = RequestClient::builder(HttpTransport::new(Some(base), timeout)?)
//!   .rate_limit(RateLimitRule::new("/api/chat", 10, Duration::from_secs(60)))
//!   .build();
//!
//! let lessons: ApiResponse<Vec<Lesson>> = client
//!   .request("/lessons", RequestOptions::get().stale_while_revalidate())
//!   .await;
//!
//! if lessons.offline {
//!   // show the "you're offline" banner
//! }
//! ```

pub mod backend;
pub mod cache;
pub mod client;
pub mod config;
pub mod error;
pub mod logging;
pub mod network;
pub mod ratelimit;
pub mod report;
pub mod transport;

pub use backend::{Backend, BackendOperation, RestBackend, BACKEND_PREFIX};
pub use cache::{CacheKey, CacheSource, CacheStats};
pub use client::{ApiResponse, RequestClient, RequestOptions, RetryPolicy};
pub use error::RequestError;
pub use network::NetworkStatus;
pub use ratelimit::RateLimitRule;
pub use report::{ErrorReporter, TracingReporter};
pub use transport::{HttpTransport, Transport};
