//! In-memory response cache.
//!
//! This module provides the caching half of the request layer:
//! - Derives keys from method, endpoint and body ([`CacheKey`])
//! - Stores response bodies with write time and ETag ([`CacheEntry`])
//! - Judges freshness lazily against a TTL on every read ([`CacheLayer`])
//! - Keeps stale entries around for stale-while-revalidate and offline reads

mod key;
mod layer;
mod storage;
mod traits;

pub use key::CacheKey;
pub use layer::{CacheLayer, CacheStats, Lookup, DEFAULT_TTL};
pub use storage::{CacheStorage, MemoryStorage, NoopStorage};
pub use traits::{CacheEntry, CacheSource};
