//! The envelope every request resolves to.

use serde::{de::DeserializeOwned, Serialize, Serializer};
use serde_json::Value;

use crate::cache::CacheSource;
use crate::error::RequestError;

/// Uniform result of a request, on every success and failure path.
///
/// `loading` is part of the contract for UI state holders; a returned
/// envelope is always settled, so the client never sets it.
#[derive(Debug, Clone, Serialize)]
pub struct ApiResponse<T> {
  pub data: Option<T>,
  #[serde(serialize_with = "serialize_error")]
  pub error: Option<RequestError>,
  pub loading: bool,
  pub from_cache: bool,
  pub status: Option<u16>,
  pub offline: bool,
  /// Finer-grained origin of `data`, `None` on failure
  #[serde(skip)]
  pub source: Option<CacheSource>,
}

impl<T> ApiResponse<T> {
  /// Fresh data straight from the network.
  pub(crate) fn network(data: T, status: u16) -> Self {
    Self {
      data: Some(data),
      error: None,
      loading: false,
      from_cache: false,
      status: Some(status),
      offline: false,
      source: Some(CacheSource::Network),
    }
  }

  /// Data served from the cache while online.
  pub(crate) fn cached(data: T, source: CacheSource, status: Option<u16>) -> Self {
    Self {
      data: Some(data),
      error: None,
      loading: false,
      from_cache: true,
      status,
      offline: false,
      source: Some(source),
    }
  }

  /// Data served from the cache because the network is unavailable.
  pub(crate) fn offline_cached(data: T) -> Self {
    Self {
      data: Some(data),
      error: None,
      loading: false,
      from_cache: true,
      status: None,
      offline: true,
      source: Some(CacheSource::Offline),
    }
  }

  /// Error envelope.
  pub(crate) fn failure(error: RequestError, offline: bool) -> Self {
    Self {
      data: None,
      status: error.status(),
      error: Some(error),
      loading: false,
      from_cache: false,
      offline,
      source: None,
    }
  }

  pub fn is_ok(&self) -> bool {
    self.error.is_none()
  }

  /// Collapse the envelope into a plain `Result`.
  pub fn into_result(self) -> Result<Option<T>, RequestError> {
    match self.error {
      Some(error) => Err(error),
      None => Ok(self.data),
    }
  }
}

impl ApiResponse<Value> {
  /// Deserialize the payload into `T`, turning a shape mismatch into a parse error.
  pub(crate) fn decode<T: DeserializeOwned>(self) -> ApiResponse<T> {
    let data = match self.data {
      Some(value) => match serde_json::from_value(value) {
        Ok(data) => Some(data),
        Err(e) => return ApiResponse::failure(RequestError::Parse(e.to_string()), self.offline),
      },
      None => None,
    };

    ApiResponse {
      data,
      error: self.error,
      loading: self.loading,
      from_cache: self.from_cache,
      status: self.status,
      offline: self.offline,
      source: self.source,
    }
  }
}

fn serialize_error<S: Serializer>(
  error: &Option<RequestError>,
  serializer: S,
) -> Result<S::Ok, S::Error> {
  match error {
    Some(error) => serializer.serialize_some(&error.to_string()),
    None => serializer.serialize_none(),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde::Deserialize;
  use serde_json::json;

  #[derive(Debug, Deserialize, PartialEq)]
  struct Streak {
    days: u32,
  }

  #[test]
  fn test_decode_typed_payload() {
    let response = ApiResponse::network(json!({"days": 12}), 200).decode::<Streak>();
    assert!(response.is_ok());
    assert_eq!(response.data, Some(Streak { days: 12 }));
    assert_eq!(response.source, Some(CacheSource::Network));
  }

  #[test]
  fn test_decode_mismatch_is_parse_error() {
    let response = ApiResponse::cached(json!({"days": "many"}), CacheSource::CacheFresh, None)
      .decode::<Streak>();
    assert!(response.data.is_none());
    assert!(matches!(response.error, Some(RequestError::Parse(_))));
    assert!(!response.from_cache);
  }

  #[test]
  fn test_failure_envelope() {
    let response: ApiResponse<Value> = ApiResponse::failure(RequestError::Offline, true);
    assert!(response.data.is_none());
    assert!(response.offline);
    assert!(!response.from_cache);
    assert!(!response.loading);
    assert_eq!(response.into_result(), Err(RequestError::Offline));
  }

  #[test]
  fn test_serializes_error_as_message() {
    let response: ApiResponse<Value> = ApiResponse::failure(
      RequestError::Status {
        status: 404,
        message: "Not Found".into(),
      },
      false,
    );
    let json = serde_json::to_value(&response).unwrap();
    assert_eq!(json["error"], "request failed with status 404: Not Found");
    assert_eq!(json["status"], 404);
    assert_eq!(json["data"], Value::Null);
  }
}
