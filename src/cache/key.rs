//! Cache key derivation.

use reqwest::Method;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fmt;

/// Identifier a response is stored under.
///
/// GET requests key on the endpoint alone, so two GETs to the same endpoint
/// share an entry even if they carry different headers or auth context.
/// Every other method keys on method, endpoint and a digest of the body.
/// The two variants never compare equal, whatever the endpoint text.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CacheKey {
  /// Key for a GET request
  Endpoint(String),
  /// Key for a mutating request
  Request {
    method: String,
    endpoint: String,
    body_digest: String,
  },
}

impl CacheKey {
  /// Derive the key for a logical request.
  pub fn derive(method: &Method, endpoint: &str, body: Option<&Value>) -> Self {
    if *method == Method::GET {
      return Self::Endpoint(endpoint.to_string());
    }

    Self::Request {
      method: method.as_str().to_string(),
      endpoint: endpoint.to_string(),
      body_digest: body_digest(body),
    }
  }

  /// Shorthand for the key of a GET to `endpoint`.
  pub fn get(endpoint: &str) -> Self {
    Self::Endpoint(endpoint.to_string())
  }
}

impl fmt::Display for CacheKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Endpoint(endpoint) => write!(f, "{}", endpoint),
      Self::Request {
        method,
        endpoint,
        body_digest,
      } => {
        let short = body_digest.get(..12).unwrap_or(body_digest.as_str());
        write!(f, "{} {} #{}", method, endpoint, short)
      }
    }
  }
}

/// SHA256 of the canonical body serialization for stable, fixed-length keys.
fn body_digest(body: Option<&Value>) -> String {
  let mut serialized = String::new();
  if let Some(value) = body {
    write_canonical(value, &mut serialized);
  }

  let mut hasher = Sha256::new();
  hasher.update(serialized.as_bytes());
  hex::encode(hasher.finalize())
}

/// Serialize with object keys sorted, so equal bodies hash identically
/// no matter how their maps were built.
fn write_canonical(value: &Value, out: &mut String) {
  match value {
    Value::Object(map) => {
      let mut fields: Vec<_> = map.iter().collect();
      fields.sort_by(|a, b| a.0.cmp(b.0));

      out.push('{');
      for (i, (name, field)) in fields.into_iter().enumerate() {
        if i > 0 {
          out.push(',');
        }
        out.push_str(&Value::String(name.clone()).to_string());
        out.push(':');
        write_canonical(field, out);
      }
      out.push('}');
    }
    Value::Array(items) => {
      out.push('[');
      for (i, item) in items.iter().enumerate() {
        if i > 0 {
          out.push(',');
        }
        write_canonical(item, out);
      }
      out.push(']');
    }
    scalar => out.push_str(&scalar.to_string()),
  }
}
