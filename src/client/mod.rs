//! Request client that layers caching, rate limiting and retries over a transport.
//!
//! Every call runs through the same steps:
//!
//! 1. Offline: serve whatever is cached regardless of age, or fail with
//!    [`RequestError::Offline`].
//! 2. Cache check (GET only, unless bypassed): a fresh entry is returned as is.
//!    With stale-while-revalidate any entry is returned and a background
//!    refresh is spawned.
//! 3. Dispatch: rate limiter, then the backend (for `backend://` endpoints)
//!    or the transport. Successful GETs are written to the cache.
//! 4. Failure: retry with a fixed delay while budget remains and the network
//!    is up, then give up with an error envelope.
//!
//! Errors never escape [`RequestClient::request`]; they are reported and
//! folded into the returned [`ApiResponse`].

mod options;
mod response;

pub use options::{
  CacheOptions, RequestOptions, RetryPolicy, DEFAULT_RETRY_COUNT, DEFAULT_RETRY_DELAY,
};
pub use response::ApiResponse;

use futures::future::{BoxFuture, FutureExt, Shared};
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, warn};

use crate::backend::{is_backend_endpoint, Backend, BackendOperation};
use crate::cache::{CacheKey, CacheLayer, CacheSource, CacheStats, Lookup};
use crate::error::RequestError;
use crate::network::NetworkStatus;
use crate::ratelimit::{RateLimitRule, RateLimiter};
use crate::report::{report_quietly, ErrorReporter, TracingReporter};
use crate::transport::{OutgoingRequest, Transport, TransportResponse};

type Outcome = Result<TransportResponse, RequestError>;
type SharedDispatch = Shared<BoxFuture<'static, Outcome>>;

/// One logical dispatch, retried as a unit.
#[derive(Debug, Clone)]
struct Dispatch {
  key: CacheKey,
  request: OutgoingRequest,
  retry: RetryPolicy,
}

impl Dispatch {
  fn is_get(&self) -> bool {
    self.request.method == Method::GET
  }
}

struct Inner {
  cache: CacheLayer,
  limiter: RateLimiter,
  transport: Arc<dyn Transport>,
  backend: Option<Arc<dyn Backend>>,
  network: NetworkStatus,
  reporter: Arc<dyn ErrorReporter>,
  retry: RetryPolicy,
  dedupe_in_flight: bool,
  in_flight: Mutex<HashMap<CacheKey, SharedDispatch>>,
}

impl Inner {
  fn in_flight(&self) -> MutexGuard<'_, HashMap<CacheKey, SharedDispatch>> {
    self
      .in_flight
      .lock()
      .unwrap_or_else(|poisoned| poisoned.into_inner())
  }

  /// Single attempt against the backend or the transport.
  async fn send_once(&self, request: &OutgoingRequest) -> Outcome {
    if !is_backend_endpoint(&request.endpoint) {
      return self.transport.send(request).await;
    }

    let backend = self.backend.as_ref().ok_or_else(|| {
      RequestError::InvalidRequest(format!(
        "no backend configured for {}",
        request.endpoint
      ))
    })?;
    let operation =
      BackendOperation::parse(&request.method, &request.endpoint, request.body.as_ref())?;
    let body = backend.execute(&operation).await?;
    Ok(TransportResponse::ok(body))
  }

  /// Run a dispatch with its retry budget and write GET results to the cache.
  async fn dispatch_with_retry(&self, dispatch: &Dispatch) -> Outcome {
    let endpoint = dispatch.request.endpoint.as_str();
    let mut remaining = dispatch.retry.count;

    loop {
      self.limiter.check(endpoint)?;

      match self.send_once(&dispatch.request).await {
        Ok(response) => {
          if dispatch.is_get() {
            if response.is_not_modified() {
              self.cache.touch(&dispatch.key);
            } else {
              self
                .cache
                .store(dispatch.key.clone(), response.body.clone(), response.etag.clone());
            }
          }
          return Ok(response);
        }
        Err(err) if err.is_retryable() && remaining > 0 && self.network.is_online() => {
          warn!(
            endpoint,
            %err,
            remaining,
            delay_ms = dispatch.retry.delay.as_millis() as u64,
            "request failed, retrying"
          );
          tokio::time::sleep(dispatch.retry.delay).await;
          remaining -= 1;
        }
        Err(err) => return Err(err),
      }
    }
  }
}

/// Caching, rate-limited, retrying request client.
///
/// Cloning is cheap and clones share the cache, limiter and in-flight map.
#[derive(Clone)]
pub struct RequestClient {
  inner: Arc<Inner>,
}

impl RequestClient {
  /// Start building a client around `transport`.
  pub fn builder(transport: impl Transport + 'static) -> RequestClientBuilder {
    RequestClientBuilder::new(Arc::new(transport))
  }

  /// Issue a request and decode the payload into `T`.
  pub async fn request<T: DeserializeOwned>(
    &self,
    endpoint: &str,
    options: RequestOptions,
  ) -> ApiResponse<T> {
    let raw = self.request_value(endpoint, options).await;
    let succeeded = raw.is_ok();

    let response = raw.decode::<T>();
    if let (true, Some(err)) = (succeeded, &response.error) {
      report_quietly(self.inner.reporter.as_ref(), endpoint, err);
    }
    response
  }

  /// Issue a request and keep the payload as raw JSON.
  pub async fn request_value(&self, endpoint: &str, options: RequestOptions) -> ApiResponse<Value> {
    let key = CacheKey::derive(&options.method, endpoint, options.body.as_ref());
    let is_get = options.method == Method::GET;
    let ttl = options.cache.ttl;

    if !self.inner.network.is_online() {
      return match self.inner.cache.lookup(&key, ttl).into_entry() {
        Some(entry) => {
          debug!(%key, "offline, serving cached response");
          ApiResponse::offline_cached(entry.data)
        }
        None => self.fail(endpoint, RequestError::Offline, true),
      };
    }

    let lookup = if is_get {
      self.inner.cache.lookup(&key, ttl)
    } else {
      Lookup::Miss
    };
    let etag = lookup.entry().and_then(|entry| entry.etag.clone());

    let dispatch = Dispatch {
      key: key.clone(),
      request: OutgoingRequest {
        method: options.method,
        endpoint: endpoint.to_string(),
        headers: options.headers,
        body: options.body,
        if_none_match: etag,
      },
      retry: options.retry.unwrap_or(self.inner.retry),
    };

    if !options.cache.bypass_cache {
      let swr = options.cache.stale_while_revalidate;
      let served = match lookup {
        Lookup::Fresh(entry) => Some((entry, CacheSource::CacheFresh)),
        Lookup::Stale(entry) if swr => Some((entry, CacheSource::CacheStale)),
        _ => None,
      };

      if let Some((entry, source)) = served {
        debug!(%key, ?source, "cache hit");
        if swr {
          self.spawn_revalidation(dispatch);
        }
        return ApiResponse::cached(entry.data, source, None);
      }
    }

    match self.fetch(dispatch).await {
      Ok(response) if response.is_not_modified() => {
        match self.inner.cache.lookup(&key, None).into_entry() {
          Some(entry) => {
            ApiResponse::cached(entry.data, CacheSource::CacheFresh, Some(response.status))
          }
          None => ApiResponse::network(Value::Null, response.status),
        }
      }
      Ok(response) => ApiResponse::network(response.body, response.status),
      Err(err) => {
        let offline = !self.inner.network.is_online();
        self.fail(endpoint, err, offline)
      }
    }
  }

  /// Dispatch, joining an identical in-flight GET when de-duplication is on.
  ///
  /// Writes are never merged: two identical POSTs are two writes.
  async fn fetch(&self, dispatch: Dispatch) -> Outcome {
    if !self.inner.dedupe_in_flight || !dispatch.is_get() {
      return self.inner.dispatch_with_retry(&dispatch).await;
    }

    let shared = {
      let mut in_flight = self.inner.in_flight();
      match in_flight.get(&dispatch.key) {
        Some(existing) => {
          debug!(key = %dispatch.key, "joining in-flight request");
          existing.clone()
        }
        None => {
          let inner = Arc::clone(&self.inner);
          let key = dispatch.key.clone();
          let future = async move {
            let outcome = inner.dispatch_with_retry(&dispatch).await;
            inner.in_flight().remove(&dispatch.key);
            outcome
          }
          .boxed()
          .shared();
          in_flight.insert(key, future.clone());
          future
        }
      }
    };

    shared.await
  }

  /// Refresh a cache entry in the background; the result only lands in the cache.
  fn spawn_revalidation(&self, dispatch: Dispatch) {
    let client = self.clone();
    debug!(key = %dispatch.key, "revalidating in background");

    tokio::spawn(async move {
      let endpoint = dispatch.request.endpoint.clone();
      if let Err(err) = client.fetch(dispatch).await {
        report_quietly(client.inner.reporter.as_ref(), &endpoint, &err);
      }
    });
  }

  fn fail(&self, endpoint: &str, err: RequestError, offline: bool) -> ApiResponse<Value> {
    report_quietly(self.inner.reporter.as_ref(), endpoint, &err);
    ApiResponse::failure(err, offline)
  }

  /// Remove one cache entry, or all of them when `key` is `None`.
  pub fn clear_cache(&self, key: Option<&CacheKey>) {
    self.inner.cache.clear(key);
  }

  /// Whether a response is stored under `key`, fresh or not.
  pub fn is_in_cache(&self, key: &CacheKey) -> bool {
    self.inner.cache.contains(key)
  }

  pub fn cache_stats(&self) -> CacheStats {
    self.inner.cache.stats()
  }

  /// Connectivity flag this client consults.
  pub fn network(&self) -> &NetworkStatus {
    &self.inner.network
  }
}

/// Builder for [`RequestClient`].
pub struct RequestClientBuilder {
  transport: Arc<dyn Transport>,
  backend: Option<Arc<dyn Backend>>,
  cache: CacheLayer,
  rate_limits: Vec<RateLimitRule>,
  network: NetworkStatus,
  reporter: Arc<dyn ErrorReporter>,
  retry: RetryPolicy,
  dedupe_in_flight: bool,
}

impl RequestClientBuilder {
  fn new(transport: Arc<dyn Transport>) -> Self {
    Self {
      transport,
      backend: None,
      cache: CacheLayer::in_memory(),
      rate_limits: Vec::new(),
      network: NetworkStatus::default(),
      reporter: Arc::new(TracingReporter),
      retry: RetryPolicy::default(),
      dedupe_in_flight: false,
    }
  }

  /// Handle `backend://` endpoints with `backend`.
  pub fn backend(mut self, backend: impl Backend + 'static) -> Self {
    self.backend = Some(Arc::new(backend));
    self
  }

  /// Replace the cache layer (e.g. with a disabled one).
  pub fn cache(mut self, cache: CacheLayer) -> Self {
    self.cache = cache;
    self
  }

  /// Default TTL for cached responses.
  pub fn ttl(mut self, ttl: Duration) -> Self {
    self.cache = self.cache.with_ttl(ttl);
    self
  }

  pub fn rate_limit(mut self, rule: RateLimitRule) -> Self {
    self.rate_limits.push(rule);
    self
  }

  pub fn rate_limits(mut self, rules: impl IntoIterator<Item = RateLimitRule>) -> Self {
    self.rate_limits.extend(rules);
    self
  }

  pub fn network(mut self, network: NetworkStatus) -> Self {
    self.network = network;
    self
  }

  pub fn reporter(mut self, reporter: impl ErrorReporter + 'static) -> Self {
    self.reporter = Arc::new(reporter);
    self
  }

  /// Default retry budget for calls that don't set one.
  pub fn retry(mut self, retry: RetryPolicy) -> Self {
    self.retry = retry;
    self
  }

  /// Share one dispatch between concurrent identical requests.
  pub fn dedupe_in_flight(mut self, enabled: bool) -> Self {
    self.dedupe_in_flight = enabled;
    self
  }

  pub fn build(self) -> RequestClient {
    RequestClient {
      inner: Arc::new(Inner {
        cache: self.cache,
        limiter: RateLimiter::new(self.rate_limits),
        transport: self.transport,
        backend: self.backend,
        network: self.network,
        reporter: self.reporter,
        retry: self.retry,
        dedupe_in_flight: self.dedupe_in_flight,
        in_flight: Mutex::new(HashMap::new()),
      }),
    }
  }
}
