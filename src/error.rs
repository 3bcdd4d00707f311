//! Error taxonomy for the data-access layer.
//!
//! Every failure surfaced to a caller is one of four kinds:
//! - `Network`: the transport failed outright, no usable response.
//! - `Auth`: a 401 that refresh could not resolve, or refresh itself failed.
//! - `Validation`: a 4xx with (possibly empty) structured field errors,
//!   returned verbatim for the caller to render.
//! - `Server`: a 5xx.
//!
//! All variants carry owned strings rather than live error sources so that a
//! refresh outcome can fan out to every waiter through a shared future.

use std::collections::BTreeMap;

use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum ApiError {
  /// Transport failure: the request never produced a response.
  #[error("network error: {0}")]
  Network(String),

  /// The session is no longer trusted by the server and could not be renewed.
  #[error("authentication failed: {0}")]
  Auth(String),

  /// The server rejected the request contents. `fields` maps field names to
  /// their error messages; it is empty for 4xx responses without a structured
  /// error body (403, 404, ...).
  #[error("validation failed (status {status}): {message}")]
  Validation {
    status: u16,
    message: String,
    fields: BTreeMap<String, Vec<String>>,
  },

  /// The server failed to process an otherwise well-formed request.
  #[error("server error (status {status}): {message}")]
  Server { status: u16, message: String },
}

impl ApiError {
  pub fn is_network(&self) -> bool {
    matches!(self, ApiError::Network(_))
  }

  pub fn is_auth(&self) -> bool {
    matches!(self, ApiError::Auth(_))
  }

  pub fn is_validation(&self) -> bool {
    matches!(self, ApiError::Validation { .. })
  }

  pub fn is_server(&self) -> bool {
    matches!(self, ApiError::Server { .. })
  }

  /// Classify a non-2xx response by status and body.
  ///
  /// 401 is normally intercepted by the dispatcher's refresh-and-retry path
  /// before this runs; if one reaches classification anyway it maps to `Auth`.
  pub(crate) fn from_response(status: u16, body: &Value) -> ApiError {
    let message = body
      .get("message")
      .and_then(Value::as_str)
      .unwrap_or("request failed")
      .to_string();

    if status == 401 {
      return ApiError::Auth(message);
    }
    if status >= 500 {
      return ApiError::Server { status, message };
    }

    ApiError::Validation {
      status,
      message,
      fields: parse_field_errors(body),
    }
  }
}

/// Extract per-field errors from a response body shaped like
/// `{"errors": {"name": ["too short"], "email": "taken"}}`.
fn parse_field_errors(body: &Value) -> BTreeMap<String, Vec<String>> {
  let mut fields = BTreeMap::new();

  let Some(errors) = body.get("errors").and_then(Value::as_object) else {
    return fields;
  };

  for (field, messages) in errors {
    let collected: Vec<String> = match messages {
      Value::String(one) => vec![one.clone()],
      Value::Array(many) => many
        .iter()
        .filter_map(Value::as_str)
        .map(String::from)
        .collect(),
      _ => Vec::new(),
    };
    if !collected.is_empty() {
      fields.insert(field.clone(), collected);
    }
  }

  fields
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_classify_server_error() {
    let err = ApiError::from_response(503, &json!({"message": "maintenance"}));
    assert!(err.is_server());
    assert_eq!(err.to_string(), "server error (status 503): maintenance");
  }

  #[test]
  fn test_classify_validation_with_field_errors() {
    let body = json!({
      "message": "invalid input",
      "errors": {
        "name": ["must not be empty"],
        "email": "already taken"
      }
    });

    match ApiError::from_response(422, &body) {
      ApiError::Validation { status, fields, .. } => {
        assert_eq!(status, 422);
        assert_eq!(fields["name"], vec!["must not be empty"]);
        assert_eq!(fields["email"], vec!["already taken"]);
      }
      other => panic!("expected validation error, got {other:?}"),
    }
  }

  #[test]
  fn test_classify_4xx_without_error_body() {
    match ApiError::from_response(404, &Value::Null) {
      ApiError::Validation {
        status,
        message,
        fields,
      } => {
        assert_eq!(status, 404);
        assert_eq!(message, "request failed");
        assert!(fields.is_empty());
      }
      other => panic!("expected validation error, got {other:?}"),
    }
  }

  #[test]
  fn test_classify_401_maps_to_auth() {
    assert!(ApiError::from_response(401, &Value::Null).is_auth());
  }
}
