//! Backend-as-a-service dispatch.
//!
//! Endpoints under [`BACKEND_PREFIX`] don't go through the generic transport.
//! They are mapped onto a small set of operations (current user, table CRUD)
//! and executed by a [`Backend`], here a PostgREST/GoTrue style REST API.

use async_trait::async_trait;
use reqwest::header::{HeaderValue, ACCEPT};
use reqwest::Method;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;
use url::Url;

use crate::error::RequestError;
use crate::transport::{error_message, parse_body};

/// Reserved endpoint prefix routed to the backend.
pub const BACKEND_PREFIX: &str = "backend://";

/// Whether `endpoint` belongs to the backend path space.
pub fn is_backend_endpoint(endpoint: &str) -> bool {
  endpoint.starts_with(BACKEND_PREFIX)
}

/// A single backend call derived from method and path.
#[derive(Debug, Clone, PartialEq)]
pub enum BackendOperation {
  /// `GET backend://auth/user`
  CurrentUser,
  /// `GET backend://<table>[?column=op.value&...]`
  ///
  /// Query pairs are passed through as PostgREST filters.
  List {
    table: String,
    filters: Vec<(String, String)>,
  },
  /// `GET backend://<table>/<id>`
  Get { table: String, id: String },
  /// `POST backend://<table>`
  Insert { table: String, row: Value },
  /// `PUT|PATCH backend://<table>/<id>`
  Update { table: String, id: String, row: Value },
  /// `DELETE backend://<table>/<id>`
  Delete { table: String, id: String },
}

impl BackendOperation {
  /// Map a request onto a backend operation.
  ///
  /// A query string is only accepted on a table listing; fragments are never
  /// accepted.
  pub fn parse(
    method: &Method,
    endpoint: &str,
    body: Option<&Value>,
  ) -> Result<Self, RequestError> {
    let rest = endpoint.strip_prefix(BACKEND_PREFIX).ok_or_else(|| {
      RequestError::InvalidRequest(format!("'{}' is not a backend endpoint", endpoint))
    })?;
    if rest.contains('#') {
      return Err(RequestError::InvalidRequest(format!(
        "backend endpoint '{}' cannot carry a fragment",
        endpoint
      )));
    }
    let (path, query) = match rest.split_once('?') {
      Some((path, query)) => (path, Some(query)),
      None => (rest, None),
    };
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

    let invalid = || {
      RequestError::InvalidRequest(format!(
        "no backend operation for {} {}",
        method, endpoint
      ))
    };
    let row = || {
      body.cloned().ok_or_else(|| {
        RequestError::InvalidRequest(format!("{} {} requires a body", method, endpoint))
      })
    };

    let operation = match (method.as_str(), segments.as_slice(), query) {
      ("GET", [table], Some(query)) if *table != "auth" => Self::List {
        table: table.to_string(),
        filters: url::form_urlencoded::parse(query.as_bytes())
          .map(|(k, v)| (k.into_owned(), v.into_owned()))
          .collect(),
      },
      (_, _, Some(_)) => {
        return Err(RequestError::InvalidRequest(format!(
          "query strings are only supported when listing a table, not {} {}",
          method, endpoint
        )))
      }
      ("GET", ["auth", "user"], None) => Self::CurrentUser,
      (_, ["auth", ..], None) => return Err(invalid()),
      ("GET", [table], None) => Self::List {
        table: table.to_string(),
        filters: Vec::new(),
      },
      ("POST", [table], None) => Self::Insert {
        table: table.to_string(),
        row: row()?,
      },
      ("GET", [table, id], None) => Self::Get {
        table: table.to_string(),
        id: id.to_string(),
      },
      ("PUT" | "PATCH", [table, id], None) => Self::Update {
        table: table.to_string(),
        id: id.to_string(),
        row: row()?,
      },
      ("DELETE", [table, id], None) => Self::Delete {
        table: table.to_string(),
        id: id.to_string(),
      },
      _ => return Err(invalid()),
    };

    Ok(operation)
  }
}

/// Executes backend operations.
#[async_trait]
pub trait Backend: Send + Sync {
  async fn execute(&self, operation: &BackendOperation) -> Result<Value, RequestError>;
}

/// REST client for a hosted backend (PostgREST tables, GoTrue auth).
#[derive(Clone)]
pub struct RestBackend {
  client: reqwest::Client,
  url: Url,
  api_key: String,
  /// User session token; the api key is used when absent
  access_token: Option<String>,
}

impl RestBackend {
  pub fn new(
    url: Url,
    api_key: String,
    access_token: Option<String>,
    timeout: Duration,
  ) -> Result<Self, RequestError> {
    let client = reqwest::Client::builder()
      .timeout(timeout)
      .build()
      .map_err(|e| RequestError::Transport(format!("Failed to build backend client: {}", e)))?;

    Ok(Self {
      client,
      url,
      api_key,
      access_token,
    })
  }

  fn endpoint(&self, segments: &[&str]) -> Result<Url, RequestError> {
    let mut url = self.url.clone();
    url
      .path_segments_mut()
      .map_err(|_| {
        RequestError::InvalidRequest(format!("backend url {} cannot be a base", self.url))
      })?
      .pop_if_empty()
      .extend(segments);
    Ok(url)
  }

  fn table_url(
    &self,
    table: &str,
    id: Option<&str>,
    filters: &[(String, String)],
  ) -> Result<Url, RequestError> {
    let mut url = self.endpoint(&["rest", "v1", table])?;
    {
      let mut query = url.query_pairs_mut();
      if let Some(id) = id {
        query.append_pair("id", &format!("eq.{}", id));
      }
      for (column, filter) in filters {
        query.append_pair(column, filter);
      }
      if !filters.iter().any(|(column, _)| column == "select") {
        query.append_pair("select", "*");
      }
    }
    Ok(url)
  }

  fn request(&self, method: Method, url: Url) -> reqwest::RequestBuilder {
    let token = self.access_token.as_deref().unwrap_or(&self.api_key);
    self
      .client
      .request(method, url)
      .header("apikey", &self.api_key)
      .bearer_auth(token)
  }
}

#[async_trait]
impl Backend for RestBackend {
  async fn execute(&self, operation: &BackendOperation) -> Result<Value, RequestError> {
    debug!(?operation, "executing backend operation");

    let builder = match operation {
      BackendOperation::CurrentUser => {
        self.request(Method::GET, self.endpoint(&["auth", "v1", "user"])?)
      }
      BackendOperation::List { table, filters } => {
        self.request(Method::GET, self.table_url(table, None, filters)?)
      }
      BackendOperation::Get { table, id } => self
        .request(Method::GET, self.table_url(table, Some(id), &[])?)
        .header(ACCEPT, HeaderValue::from_static("application/vnd.pgrst.object+json")),
      BackendOperation::Insert { table, row } => self
        .request(Method::POST, self.table_url(table, None, &[])?)
        .header("Prefer", "return=representation")
        .json(row),
      BackendOperation::Update { table, id, row } => self
        .request(Method::PATCH, self.table_url(table, Some(id), &[])?)
        .header("Prefer", "return=representation")
        .json(row),
      BackendOperation::Delete { table, id } => self
        .request(Method::DELETE, self.table_url(table, Some(id), &[])?)
        .header("Prefer", "return=representation"),
    };

    let response = builder.send().await?;
    let status = response.status();
    let text = response.text().await?;

    if !status.is_success() {
      return Err(RequestError::Status {
        status: status.as_u16(),
        message: error_message(status, &text),
      });
    }

    parse_body(&text)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;
  use wiremock::matchers::{body_json, header, method, path, query_param};
  use wiremock::{Mock, MockServer, ResponseTemplate};

  #[test]
  fn test_parse_operations() {
    let row = json!({"word": "gatto"});

    assert_eq!(
      BackendOperation::parse(&Method::GET, "backend://auth/user", None).unwrap(),
      BackendOperation::CurrentUser
    );
    assert_eq!(
      BackendOperation::parse(&Method::GET, "backend://flashcards", None).unwrap(),
      BackendOperation::List {
        table: "flashcards".into(),
        filters: Vec::new(),
      }
    );
    assert_eq!(
      BackendOperation::parse(&Method::GET, "backend://flashcards/7", None).unwrap(),
      BackendOperation::Get {
        table: "flashcards".into(),
        id: "7".into()
      }
    );
    assert_eq!(
      BackendOperation::parse(&Method::POST, "backend://flashcards", Some(&row)).unwrap(),
      BackendOperation::Insert {
        table: "flashcards".into(),
        row: row.clone()
      }
    );
    assert_eq!(
      BackendOperation::parse(&Method::PUT, "backend://flashcards/7/", Some(&row)).unwrap(),
      BackendOperation::Update {
        table: "flashcards".into(),
        id: "7".into(),
        row: row.clone()
      }
    );
    assert_eq!(
      BackendOperation::parse(&Method::DELETE, "backend://flashcards/7", None).unwrap(),
      BackendOperation::Delete {
        table: "flashcards".into(),
        id: "7".into()
      }
    );
  }

  #[test]
  fn test_parse_rejects_unmapped_requests() {
    for (m, endpoint) in [
      (Method::DELETE, "backend://flashcards"),
      (Method::POST, "backend://flashcards/7"),
      (Method::POST, "backend://auth/user"),
      (Method::GET, "backend://"),
      (Method::GET, "backend://a/b/c"),
      (Method::GET, "/flashcards"),
    ] {
      let err = BackendOperation::parse(&m, endpoint, Some(&json!({}))).unwrap_err();
      assert!(matches!(err, RequestError::InvalidRequest(_)), "{} {}", m, endpoint);
    }
  }

  #[test]
  fn test_list_keeps_query_as_filters() {
    let op =
      BackendOperation::parse(&Method::GET, "backend://lessons?level=eq.A1&order=position", None)
        .unwrap();
    assert_eq!(
      op,
      BackendOperation::List {
        table: "lessons".into(),
        filters: vec![
          ("level".into(), "eq.A1".into()),
          ("order".into(), "position".into()),
        ],
      }
    );
  }

  #[test]
  fn test_query_outside_listing_is_rejected() {
    for (m, endpoint) in [
      (Method::GET, "backend://lessons/3?select=title"),
      (Method::DELETE, "backend://lessons/3?cascade=true"),
      (Method::GET, "backend://auth/user?fields=id"),
      (Method::GET, "backend://lessons#top"),
    ] {
      let err = BackendOperation::parse(&m, endpoint, None).unwrap_err();
      assert!(matches!(err, RequestError::InvalidRequest(_)), "{} {}", m, endpoint);
    }
  }

  #[test]
  fn test_insert_requires_body() {
    let err = BackendOperation::parse(&Method::POST, "backend://flashcards", None).unwrap_err();
    assert!(!err.is_retryable());
  }

  fn backend_for(server: &MockServer, token: Option<&str>) -> RestBackend {
    RestBackend::new(
      Url::parse(&server.uri()).unwrap(),
      "anon-key".into(),
      token.map(String::from),
      Duration::from_secs(5),
    )
    .unwrap()
  }

  #[tokio::test]
  async fn test_list_table() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .and(path("/rest/v1/achievements"))
      .and(query_param("select", "*"))
      .and(header("apikey", "anon-key"))
      .and(header("authorization", "Bearer anon-key"))
      .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"id": 1}])))
      .mount(&server)
      .await;

    let backend = backend_for(&server, None);
    let rows = backend
      .execute(&BackendOperation::List {
        table: "achievements".into(),
        filters: Vec::new(),
      })
      .await
      .unwrap();
    assert_eq!(rows, json!([{"id": 1}]));
  }

  #[tokio::test]
  async fn test_list_forwards_filters() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .and(path("/rest/v1/lessons"))
      .and(query_param("level", "eq.A1"))
      .and(query_param("select", "id,title"))
      .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"id": 1, "title": "Ciao"}])))
      .expect(1)
      .mount(&server)
      .await;

    let backend = backend_for(&server, None);
    let op = BackendOperation::parse(
      &Method::GET,
      "backend://lessons?level=eq.A1&select=id,title",
      None,
    )
    .unwrap();
    let rows = backend.execute(&op).await.unwrap();
    assert_eq!(rows[0]["title"], "Ciao");
  }

  #[tokio::test]
  async fn test_get_by_id_filters_on_id() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .and(path("/rest/v1/profiles"))
      .and(query_param("id", "eq.42"))
      .and(header("accept", "application/vnd.pgrst.object+json"))
      .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": 42, "xp": 900})))
      .mount(&server)
      .await;

    let backend = backend_for(&server, None);
    let row = backend
      .execute(&BackendOperation::Get {
        table: "profiles".into(),
        id: "42".into(),
      })
      .await
      .unwrap();
    assert_eq!(row["xp"], 900);
  }

  #[tokio::test]
  async fn test_update_uses_patch_with_body() {
    let server = MockServer::start().await;
    Mock::given(method("PATCH"))
      .and(path("/rest/v1/profiles"))
      .and(query_param("id", "eq.42"))
      .and(header("prefer", "return=representation"))
      .and(body_json(json!({"streak": 5})))
      .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"id": 42, "streak": 5}])))
      .expect(1)
      .mount(&server)
      .await;

    let backend = backend_for(&server, None);
    backend
      .execute(&BackendOperation::Update {
        table: "profiles".into(),
        id: "42".into(),
        row: json!({"streak": 5}),
      })
      .await
      .unwrap();
  }

  #[tokio::test]
  async fn test_current_user_uses_access_token() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .and(path("/auth/v1/user"))
      .and(header("authorization", "Bearer session-token"))
      .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "u-1"})))
      .mount(&server)
      .await;

    let backend = backend_for(&server, Some("session-token"));
    let user = backend.execute(&BackendOperation::CurrentUser).await.unwrap();
    assert_eq!(user["id"], "u-1");
  }

  #[tokio::test]
  async fn test_backend_error_status() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
      .and(path("/rest/v1/profiles"))
      .respond_with(
        ResponseTemplate::new(401).set_body_json(json!({"message": "JWT expired"})),
      )
      .mount(&server)
      .await;

    let backend = backend_for(&server, None);
    let err = backend
      .execute(&BackendOperation::Delete {
        table: "profiles".into(),
        id: "1".into(),
      })
      .await
      .unwrap_err();

    assert_eq!(
      err,
      RequestError::Status {
        status: 401,
        message: "JWT expired".into()
      }
    );
  }
}
