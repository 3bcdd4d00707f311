//! Raw request execution.
//!
//! The transport performs exactly one network call per `execute` and
//! normalizes the outcome: any HTTP status becomes an `ApiResponse`, only
//! transport-level failures become errors. Retry and auth logic live in the
//! dispatcher, never here.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;
use url::Url;

use crate::csrf::MemoryCsrf;
use crate::error::ApiError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
  Get,
  Post,
  Put,
  Patch,
  Delete,
}

impl Method {
  pub fn as_str(&self) -> &'static str {
    match self {
      Method::Get => "GET",
      Method::Post => "POST",
      Method::Put => "PUT",
      Method::Patch => "PATCH",
      Method::Delete => "DELETE",
    }
  }
}

/// Body encoding for a request.
#[derive(Debug, Clone)]
pub enum RequestBody {
  Empty,
  Json(Value),
  /// multipart/form-data, used by file-bearing mutations. Changes body
  /// encoding only; dispatch and cache contracts are untouched.
  Multipart(Vec<Part>),
}

/// One part of a multipart body.
#[derive(Debug, Clone)]
pub struct Part {
  pub name: String,
  pub value: PartValue,
}

#[derive(Debug, Clone)]
pub enum PartValue {
  Text(String),
  File {
    filename: String,
    content_type: String,
    data: Vec<u8>,
  },
}

impl Part {
  pub fn text(name: impl Into<String>, value: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      value: PartValue::Text(value.into()),
    }
  }

  pub fn file(
    name: impl Into<String>,
    filename: impl Into<String>,
    content_type: impl Into<String>,
    data: Vec<u8>,
  ) -> Self {
    Self {
      name: name.into(),
      value: PartValue::File {
        filename: filename.into(),
        content_type: content_type.into(),
        data,
      },
    }
  }
}

/// A fully-formed request descriptor.
#[derive(Debug, Clone)]
pub struct ApiRequest {
  pub method: Method,
  pub path: String,
  pub query: Vec<(String, String)>,
  pub body: RequestBody,
  pub headers: Vec<(String, String)>,
}

impl ApiRequest {
  pub fn new(method: Method, path: impl Into<String>) -> Self {
    Self {
      method,
      path: path.into(),
      query: Vec::new(),
      body: RequestBody::Empty,
      headers: Vec::new(),
    }
  }

  pub fn get(path: impl Into<String>) -> Self {
    Self::new(Method::Get, path)
  }

  pub fn post(path: impl Into<String>) -> Self {
    Self::new(Method::Post, path)
  }

  pub fn with_json(mut self, body: Value) -> Self {
    self.body = RequestBody::Json(body);
    self
  }

  pub fn with_multipart(mut self, parts: Vec<Part>) -> Self {
    self.body = RequestBody::Multipart(parts);
    self
  }

  pub fn with_query(mut self, query: Vec<(String, String)>) -> Self {
    self.query = query;
    self
  }

  pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
    self.headers.push((name.into(), value.into()));
    self
  }

  /// Whether this request mutates server state (drives CSRF attachment).
  pub fn is_mutating(&self) -> bool {
    !matches!(self.method, Method::Get)
  }

  /// Value of a header already attached to this request.
  pub fn header(&self, name: &str) -> Option<&str> {
    self
      .headers
      .iter()
      .find(|(n, _)| n.eq_ignore_ascii_case(name))
      .map(|(_, v)| v.as_str())
  }
}

/// Normalized response: status plus the parsed JSON body (`Null` when the
/// body is empty or not JSON).
#[derive(Debug, Clone)]
pub struct ApiResponse {
  pub status: u16,
  pub body: Value,
}

impl ApiResponse {
  pub fn ok(body: Value) -> Self {
    Self { status: 200, body }
  }

  pub fn with_status(status: u16, body: Value) -> Self {
    Self { status, body }
  }

  pub fn is_success(&self) -> bool {
    (200..300).contains(&self.status)
  }

  pub fn is_unauthorized(&self) -> bool {
    self.status == 401
  }

  /// Turn a completed dispatch into the caller-facing result.
  pub(crate) fn into_result(self) -> Result<ApiResponse, ApiError> {
    if self.is_success() {
      Ok(self)
    } else {
      Err(ApiError::from_response(self.status, &self.body))
    }
  }
}

/// Performs one raw network call; no retry or auth logic.
#[async_trait]
pub trait Transport: Send + Sync {
  /// Execute the request. `Ok` for any HTTP status; `Err` only when the
  /// transport itself failed and no response exists.
  async fn execute(&self, request: &ApiRequest) -> Result<ApiResponse, ApiError>;
}

/// reqwest-backed transport.
///
/// Runs with a cookie store so session cookies ride along automatically
/// (`credentials: include` semantics), and feeds the CSRF provider from
/// `Set-Cookie` headers on every response.
pub struct HttpTransport {
  http: reqwest::Client,
  base_url: Url,
  csrf: Arc<MemoryCsrf>,
  csrf_cookie: String,
}

impl HttpTransport {
  pub fn new(base_url: Url, csrf: Arc<MemoryCsrf>, csrf_cookie: String) -> Result<Self, ApiError> {
    let http = reqwest::Client::builder()
      .cookie_store(true)
      .build()
      .map_err(|e| ApiError::Network(format!("failed to build HTTP client: {e}")))?;

    Ok(Self {
      http,
      base_url,
      csrf,
      csrf_cookie,
    })
  }

  fn url_for(&self, request: &ApiRequest) -> Result<Url, ApiError> {
    let mut url = self
      .base_url
      .join(request.path.trim_start_matches('/'))
      .map_err(|e| ApiError::Network(format!("invalid request path {}: {e}", request.path)))?;

    if !request.query.is_empty() {
      url
        .query_pairs_mut()
        .extend_pairs(request.query.iter().map(|(k, v)| (k.as_str(), v.as_str())));
    }

    Ok(url)
  }

  /// Capture the double-submit cookie off the response, if present.
  fn capture_csrf(&self, headers: &reqwest::header::HeaderMap) {
    for value in headers.get_all(reqwest::header::SET_COOKIE) {
      let Ok(cookie) = value.to_str() else { continue };
      let Some(pair) = cookie.split(';').next() else {
        continue;
      };
      if let Some((name, token)) = pair.split_once('=') {
        if name.trim() == self.csrf_cookie {
          self.csrf.set_token(token.trim());
        }
      }
    }
  }

  fn build_form(parts: &[Part]) -> Result<reqwest::multipart::Form, ApiError> {
    let mut form = reqwest::multipart::Form::new();
    for part in parts {
      let built = match &part.value {
        PartValue::Text(text) => reqwest::multipart::Part::text(text.clone()),
        PartValue::File {
          filename,
          content_type,
          data,
        } => reqwest::multipart::Part::bytes(data.clone())
          .file_name(filename.clone())
          .mime_str(content_type)
          .map_err(|e| ApiError::Network(format!("invalid content type {content_type}: {e}")))?,
      };
      form = form.part(part.name.clone(), built);
    }
    Ok(form)
  }
}

#[async_trait]
impl Transport for HttpTransport {
  async fn execute(&self, request: &ApiRequest) -> Result<ApiResponse, ApiError> {
    let url = self.url_for(request)?;
    debug!(method = request.method.as_str(), %url, "executing request");

    let mut builder = match request.method {
      Method::Get => self.http.get(url),
      Method::Post => self.http.post(url),
      Method::Put => self.http.put(url),
      Method::Patch => self.http.patch(url),
      Method::Delete => self.http.delete(url),
    };

    for (name, value) in &request.headers {
      builder = builder.header(name, value);
    }

    builder = match &request.body {
      RequestBody::Empty => builder,
      RequestBody::Json(value) => builder.json(value),
      RequestBody::Multipart(parts) => builder.multipart(Self::build_form(parts)?),
    };

    let response = builder
      .send()
      .await
      .map_err(|e| ApiError::Network(e.to_string()))?;

    self.capture_csrf(response.headers());

    let status = response.status().as_u16();
    let bytes = response
      .bytes()
      .await
      .map_err(|e| ApiError::Network(e.to_string()))?;

    let body = if bytes.is_empty() {
      Value::Null
    } else {
      serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };

    Ok(ApiResponse { status, body })
  }
}
