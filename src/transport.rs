//! Generic JSON transport over HTTP.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ETAG, IF_NONE_MATCH};
use reqwest::{Method, StatusCode};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::debug;
use url::Url;

use crate::error::RequestError;

/// A single attempt at an outbound call.
#[derive(Debug, Clone)]
pub struct OutgoingRequest {
  pub method: Method,
  pub endpoint: String,
  pub headers: BTreeMap<String, String>,
  pub body: Option<Value>,
  /// ETag of the cached copy, sent as `If-None-Match`
  pub if_none_match: Option<String>,
}

impl OutgoingRequest {
  pub fn new(method: Method, endpoint: impl Into<String>) -> Self {
    Self {
      method,
      endpoint: endpoint.into(),
      headers: BTreeMap::new(),
      body: None,
      if_none_match: None,
    }
  }
}

/// A successful answer from the transport.
#[derive(Debug, Clone, PartialEq)]
pub struct TransportResponse {
  pub status: u16,
  /// Decoded JSON body (`Null` when the body is empty)
  pub body: Value,
  pub etag: Option<String>,
}

impl TransportResponse {
  /// A 200 response carrying `body`.
  pub fn ok(body: Value) -> Self {
    Self {
      status: 200,
      body,
      etag: None,
    }
  }

  /// The server confirmed the cached copy is still current.
  pub fn is_not_modified(&self) -> bool {
    self.status == StatusCode::NOT_MODIFIED.as_u16()
  }
}

/// Performs one outbound call. Retrying and caching happen above this.
#[async_trait]
pub trait Transport: Send + Sync {
  async fn send(&self, request: &OutgoingRequest) -> Result<TransportResponse, RequestError>;
}

/// reqwest-backed transport for JSON REST endpoints.
#[derive(Clone)]
pub struct HttpTransport {
  client: reqwest::Client,
  /// Relative endpoints are joined onto this
  base_url: Option<Url>,
}

impl HttpTransport {
  pub fn new(base_url: Option<Url>, timeout: Duration) -> Result<Self, RequestError> {
    let client = reqwest::Client::builder()
      .timeout(timeout)
      .build()
      .map_err(|e| RequestError::Transport(format!("Failed to build HTTP client: {}", e)))?;

    Ok(Self { client, base_url })
  }

  /// Resolve an endpoint to an absolute URL.
  fn resolve(&self, endpoint: &str) -> Result<Url, RequestError> {
    if let Ok(url) = Url::parse(endpoint) {
      return Ok(url);
    }

    let base = self.base_url.as_ref().ok_or_else(|| {
      RequestError::InvalidRequest(format!(
        "relative endpoint '{}' needs a configured base_url",
        endpoint
      ))
    })?;

    base
      .join(endpoint.trim_start_matches('/'))
      .map_err(|e| RequestError::InvalidRequest(format!("bad endpoint '{}': {}", endpoint, e)))
  }
}

#[async_trait]
impl Transport for HttpTransport {
  async fn send(&self, request: &OutgoingRequest) -> Result<TransportResponse, RequestError> {
    let url = self.resolve(&request.endpoint)?;
    debug!(method = %request.method, %url, "sending request");

    let mut builder = self
      .client
      .request(request.method.clone(), url)
      .headers(header_map(&request.headers)?);

    if let Some(etag) = &request.if_none_match {
      builder = builder.header(IF_NONE_MATCH, etag);
    }
    if let Some(body) = &request.body {
      builder = builder.json(body);
    }

    let response = builder.send().await?;
    let status = response.status();
    let etag = response
      .headers()
      .get(ETAG)
      .and_then(|v| v.to_str().ok())
      .map(String::from);

    if status == StatusCode::NOT_MODIFIED {
      return Ok(TransportResponse {
        status: status.as_u16(),
        body: Value::Null,
        etag,
      });
    }

    let text = response.text().await?;

    if !status.is_success() {
      return Err(RequestError::Status {
        status: status.as_u16(),
        message: error_message(status, &text),
      });
    }

    Ok(TransportResponse {
      status: status.as_u16(),
      body: parse_body(&text)?,
      etag,
    })
  }
}

/// Decode a JSON body, treating an empty body as `null`.
pub(crate) fn parse_body(text: &str) -> Result<Value, RequestError> {
  if text.trim().is_empty() {
    return Ok(Value::Null);
  }
  serde_json::from_str(text).map_err(|e| RequestError::Parse(e.to_string()))
}

/// Pick a readable message out of an error body.
pub(crate) fn error_message(status: StatusCode, body: &str) -> String {
  let from_json = serde_json::from_str::<Value>(body).ok().and_then(|v| {
    ["message", "error_description", "error", "msg"]
      .iter()
      .find_map(|field| v.get(field).and_then(Value::as_str).map(String::from))
  });

  from_json.unwrap_or_else(|| {
    status
      .canonical_reason()
      .unwrap_or("unexpected status")
      .to_string()
  })
}

pub(crate) fn header_map(headers: &BTreeMap<String, String>) -> Result<HeaderMap, RequestError> {
  let mut map = HeaderMap::new();
  for (name, value) in headers {
    let name = HeaderName::from_bytes(name.as_bytes())
      .map_err(|e| RequestError::InvalidRequest(format!("bad header name '{}': {}", name, e)))?;
    let value = HeaderValue::from_str(value).map_err(|e| {
      RequestError::InvalidRequest(format!("bad header value for '{}': {}", name, e))
    })?;
    map.insert(name, value);
  }
  Ok(map)
}
