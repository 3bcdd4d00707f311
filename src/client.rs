//! Public facade pairing the request pipeline with the query cache.
//!
//! One client instance owns the credential store, the refresh coordinator,
//! the dispatcher, and the cache; the host UI calls its operations and
//! renders the results. Resource types ("Checklists", "Controls", ...) are
//! caller-supplied strings, so no schema knowledge lives here.

use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::cache::{OperationKey, QueryCache, Subscription, Tag};
use crate::config::{Config, ConfigError};
use crate::csrf::{CsrfProvider, MemoryCsrf};
use crate::dispatch::RequestDispatcher;
use crate::error::ApiError;
use crate::mutation::MutationRunner;
use crate::refresh::RefreshCoordinator;
use crate::session::{apply_session_payload, CredentialState, Session};
use crate::transport::{ApiRequest, ApiResponse, HttpTransport, Method, Part, Transport};

/// Collection-read query parameters. Every field participates in the cache
/// key, so two reads that differ only in sort order are distinct entries.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct ListParams {
  #[serde(skip_serializing_if = "Option::is_none")]
  pub page: Option<u32>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub page_size: Option<u32>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub sort_by: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub sort_order: Option<SortOrder>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub search: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub search_by: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
  Asc,
  Desc,
}

impl SortOrder {
  fn as_str(&self) -> &'static str {
    match self {
      SortOrder::Asc => "asc",
      SortOrder::Desc => "desc",
    }
  }
}

impl ListParams {
  pub fn page(mut self, page: u32, page_size: u32) -> Self {
    self.page = Some(page);
    self.page_size = Some(page_size);
    self
  }

  pub fn sort(mut self, by: impl Into<String>, order: SortOrder) -> Self {
    self.sort_by = Some(by.into());
    self.sort_order = Some(order);
    self
  }

  pub fn search(mut self, term: impl Into<String>, by: impl Into<String>) -> Self {
    self.search = Some(term.into());
    self.search_by = Some(by.into());
    self
  }

  pub fn to_query(&self) -> Vec<(String, String)> {
    let mut query = Vec::new();
    if let Some(page) = self.page {
      query.push(("page".to_string(), page.to_string()));
    }
    if let Some(page_size) = self.page_size {
      query.push(("page_size".to_string(), page_size.to_string()));
    }
    if let Some(sort_by) = &self.sort_by {
      query.push(("sort_by".to_string(), sort_by.clone()));
    }
    if let Some(sort_order) = self.sort_order {
      query.push(("sort_order".to_string(), sort_order.as_str().to_string()));
    }
    if let Some(search) = &self.search {
      query.push(("search".to_string(), search.clone()));
    }
    if let Some(search_by) = &self.search_by {
      query.push(("search_by".to_string(), search_by.clone()));
    }
    query
  }
}

/// Default tagging for a list-shaped response: the collection tag plus one
/// specific tag per returned item. Accepts a bare array or an
/// `{"items": [...]}` envelope.
pub fn list_tags(resource: &str, body: &Value) -> Vec<Tag> {
  let mut tags = vec![Tag::list(resource)];

  let items = match body {
    Value::Array(items) => Some(items),
    Value::Object(map) => map.get("items").and_then(Value::as_array),
    _ => None,
  };

  if let Some(items) = items {
    for item in items {
      if let Some(id) = item_id(item) {
        tags.push(Tag::id(resource, id));
      }
    }
  }

  tags
}

fn item_id(item: &Value) -> Option<String> {
  match item.get("id")? {
    Value::String(id) => Some(id.clone()),
    Value::Number(id) => Some(id.to_string()),
    _ => None,
  }
}

/// The data-access layer's public entry point.
pub struct ApiClient {
  dispatcher: Arc<RequestDispatcher>,
  cache: Arc<QueryCache>,
  mutations: MutationRunner,
  state: Arc<CredentialState>,
}

impl ApiClient {
  /// Build a client with the HTTP transport against the configured base URL.
  pub fn new(config: &Config) -> Result<Self, ConfigError> {
    let csrf = Arc::new(MemoryCsrf::new());
    let transport = HttpTransport::new(
      config.api.base_url()?,
      Arc::clone(&csrf),
      config.api.csrf_cookie.clone(),
    )
    .map_err(|e| ConfigError::Http(e.to_string()))?;

    Ok(Self::with_transport(Arc::new(transport), csrf, config))
  }

  /// Build a client over any transport. This is the seam the tests use.
  pub fn with_transport(
    transport: Arc<dyn Transport>,
    csrf: Arc<dyn CsrfProvider>,
    config: &Config,
  ) -> Self {
    let state = Arc::new(CredentialState::new());
    let refresher = Arc::new(RefreshCoordinator::new(
      Arc::clone(&transport),
      Arc::clone(&state),
      config.auth.refresh_lookahead_secs,
    ));
    let dispatcher = Arc::new(RequestDispatcher::new(
      transport,
      refresher,
      csrf,
      Arc::clone(&state),
    ));
    let cache = Arc::new(QueryCache::new(Duration::from_secs(
      config.cache.gc_grace_secs,
    )));
    let mutations = MutationRunner::new(Arc::clone(&dispatcher), Arc::clone(&cache));

    Self {
      dispatcher,
      cache,
      mutations,
      state,
    }
  }

  pub fn cache(&self) -> &Arc<QueryCache> {
    &self.cache
  }

  pub async fn session(&self) -> Session {
    self.state.snapshot().await
  }

  // --------------------------------------------------------------------
  // Auth operations
  // --------------------------------------------------------------------

  pub async fn login(&self, email: &str, password: &str) -> Result<Session, ApiError> {
    let request = ApiRequest::post("/auth/login")
      .with_json(json!({"email": email, "password": password}));
    let response = self.dispatcher.dispatch(request).await?;
    apply_session_payload(&self.state, &response.body).await
  }

  /// Best-effort server-side logout; the local session is cleared no matter
  /// what the server answers.
  pub async fn logout(&self) {
    if let Err(err) = self
      .dispatcher
      .dispatch(ApiRequest::post("/auth/logout"))
      .await
    {
      debug!(error = %err, "logout call failed; clearing local session anyway");
    }
    self.state.clear().await;
  }

  // --------------------------------------------------------------------
  // Cached reads
  // --------------------------------------------------------------------

  /// Cached collection read. The response is tagged with the collection tag
  /// plus every returned item's id.
  pub async fn fetch_list(
    &self,
    resource: &str,
    path: &str,
    params: &ListParams,
  ) -> Result<(Value, Subscription), ApiError> {
    let key = OperationKey::new(format!("{resource}:list"), params);
    let request = ApiRequest::get(path).with_query(params.to_query());
    let resource = resource.to_string();
    self
      .cached(key, request, move |body| list_tags(&resource, body))
      .await
  }

  /// Cached single-entity read, tagged with the requested id only.
  pub async fn fetch_one(
    &self,
    resource: &str,
    path: &str,
    id: &str,
  ) -> Result<(Value, Subscription), ApiError> {
    let key = OperationKey::new(format!("{resource}:detail"), &json!({"id": id}));
    let tag = Tag::id(resource, id);
    self
      .cached(key, ApiRequest::get(path), move |_| vec![tag.clone()])
      .await
  }

  /// Escape hatch for reads with bespoke keys or tagging.
  pub async fn query<T>(
    &self,
    key: OperationKey,
    request: ApiRequest,
    tags_fn: T,
  ) -> Result<(Value, Subscription), ApiError>
  where
    T: Fn(&Value) -> Vec<Tag> + Send + Sync + 'static,
  {
    self.cached(key, request, tags_fn).await
  }

  async fn cached<T>(
    &self,
    key: OperationKey,
    request: ApiRequest,
    tags_fn: T,
  ) -> Result<(Value, Subscription), ApiError>
  where
    T: Fn(&Value) -> Vec<Tag> + Send + Sync + 'static,
  {
    let dispatcher = Arc::clone(&self.dispatcher);
    self
      .cache
      .fetch(
        key,
        move || {
          let dispatcher = Arc::clone(&dispatcher);
          let request = request.clone();
          async move { dispatcher.dispatch(request).await.map(|r| r.body) }
        },
        tags_fn,
      )
      .await
  }

  // --------------------------------------------------------------------
  // Writes
  // --------------------------------------------------------------------

  /// Create: the new item's id is unknown to cached lists, so the
  /// collection tag is declared.
  pub async fn create(
    &self,
    resource: &str,
    path: &str,
    body: Value,
  ) -> Result<ApiResponse, ApiError> {
    self
      .mutations
      .mutate(
        ApiRequest::post(path).with_json(body),
        vec![Tag::list(resource)],
      )
      .await
  }

  /// Update: only reads depending on this specific id are affected.
  pub async fn update(
    &self,
    resource: &str,
    path: &str,
    id: &str,
    body: Value,
  ) -> Result<ApiResponse, ApiError> {
    self
      .mutations
      .mutate(
        ApiRequest::new(Method::Patch, path).with_json(body),
        vec![Tag::id(resource, id)],
      )
      .await
  }

  /// Delete: affects both the collection and the specific id.
  pub async fn delete(
    &self,
    resource: &str,
    path: &str,
    id: &str,
  ) -> Result<ApiResponse, ApiError> {
    self
      .mutations
      .mutate(
        ApiRequest::new(Method::Delete, path),
        vec![Tag::list(resource), Tag::id(resource, id)],
      )
      .await
  }

  /// File-bearing write. Multipart changes the body encoding only; the
  /// dispatch and invalidation contracts are the same as any other write.
  pub async fn upload(
    &self,
    path: &str,
    parts: Vec<Part>,
    declared: Vec<Tag>,
  ) -> Result<ApiResponse, ApiError> {
    self
      .mutations
      .mutate(ApiRequest::post(path).with_multipart(parts), declared)
      .await
  }

  /// Escape hatch for writes with bespoke requests or tag sets.
  pub async fn mutate(
    &self,
    request: ApiRequest,
    declared: Vec<Tag>,
  ) -> Result<ApiResponse, ApiError> {
    self.mutations.mutate(request, declared).await
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::testing::{client_with, session_body, MockTransport};
  use crate::transport::RequestBody;
  use chrono::Utc;

  #[tokio::test]
  async fn test_structurally_equal_params_share_one_entry() {
    let transport = Arc::new(MockTransport::new());
    transport.respond_ok("/checklists", json!([{"id": "1"}]));
    let client = client_with(&transport);

    let params_a = ListParams::default().page(1, 20).sort("name", SortOrder::Asc);
    let params_b = ListParams::default().page(1, 20).sort("name", SortOrder::Asc);

    let (_v, _s1) = client
      .fetch_list("Checklists", "/checklists", &params_a)
      .await
      .unwrap();
    let (_v, _s2) = client
      .fetch_list("Checklists", "/checklists", &params_b)
      .await
      .unwrap();

    assert_eq!(transport.calls_to("/checklists"), 1);
  }

  #[tokio::test]
  async fn test_differing_sort_order_is_a_distinct_read() {
    let transport = Arc::new(MockTransport::new());
    transport.respond_ok("/checklists", json!([{"id": "1"}]));
    transport.respond_ok("/checklists", json!([{"id": "1"}]));
    let client = client_with(&transport);

    let asc = ListParams::default().sort("name", SortOrder::Asc);
    let desc = ListParams::default().sort("name", SortOrder::Desc);

    let (_v, _s1) = client
      .fetch_list("Checklists", "/checklists", &asc)
      .await
      .unwrap();
    let (_v, _s2) = client
      .fetch_list("Checklists", "/checklists", &desc)
      .await
      .unwrap();

    assert_eq!(transport.calls_to("/checklists"), 2);
    // Sort parameters made it onto the wire too.
    let first = &transport.requests()[0];
    assert!(first
      .query
      .contains(&("sort_order".to_string(), "asc".to_string())));
  }

  #[tokio::test]
  async fn test_create_forces_next_collection_read_to_network() {
    let transport = Arc::new(MockTransport::new());
    transport.respond_ok("/apps/A1/checklists", json!([{"id": "1"}]));
    transport.respond_ok("/apps/A1/checklists", json!({"id": "2"}));
    transport.respond_ok("/apps/A1/checklists", json!([{"id": "1"}, {"id": "2"}]));
    let client = client_with(&transport);
    let params = ListParams::default();

    let (value, sub) = client
      .fetch_list("Checklists", "/apps/A1/checklists", &params)
      .await
      .unwrap();
    assert_eq!(value, json!([{"id": "1"}]));
    drop(sub);

    client
      .create("Checklists", "/apps/A1/checklists", json!({"name": "new"}))
      .await
      .unwrap();

    // The cached collection was invalidated; this read hits the network
    // and returns the new item.
    let (value, _sub) = client
      .fetch_list("Checklists", "/apps/A1/checklists", &params)
      .await
      .unwrap();
    assert_eq!(value, json!([{"id": "1"}, {"id": "2"}]));
    assert_eq!(transport.calls_to("/apps/A1/checklists"), 3);
  }

  #[tokio::test]
  async fn test_update_spares_the_collection_but_hits_the_id() {
    let transport = Arc::new(MockTransport::new());
    transport.respond_ok("/checklists/9", json!({"id": "9", "name": "old"}));
    let client = client_with(&transport);

    let (_v, _sub) = client
      .fetch_one("Checklists", "/checklists/9", "9")
      .await
      .unwrap();

    transport.respond_ok("/checklists/9", json!({"id": "9", "name": "new"}));
    transport.respond_ok("/checklists/9", json!({"id": "9", "name": "new"}));
    client
      .update("Checklists", "/checklists/9", "9", json!({"name": "new"}))
      .await
      .unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;

    // Detail read refetched: original read + update + refetch.
    assert_eq!(transport.calls_to("/checklists/9"), 3);
  }

  #[tokio::test]
  async fn test_login_establishes_session() {
    let transport = Arc::new(MockTransport::new());
    transport.respond_ok("/auth/login", session_body(900));
    let client = client_with(&transport);

    let session = client.login("user@example.test", "hunter2").await.unwrap();

    assert!(session.authenticated);
    let remaining = session.access_expiry.unwrap() - Utc::now();
    assert!(remaining > chrono::Duration::seconds(800));
    assert_eq!(client.session().await.user, Some(json!({
      "id": "u1",
      "email": "user@example.test",
    })));
  }

  #[tokio::test]
  async fn test_logout_clears_session_even_when_server_errors() {
    let transport = Arc::new(MockTransport::new());
    transport.respond_ok("/auth/login", session_body(900));
    transport.respond("/auth/logout", 500, Value::Null);
    let client = client_with(&transport);

    client.login("user@example.test", "hunter2").await.unwrap();
    client.logout().await;

    assert!(!client.session().await.authenticated);
  }

  #[tokio::test]
  async fn test_upload_sends_multipart_and_invalidates() {
    let transport = Arc::new(MockTransport::new());
    transport.respond_ok("/checklists", json!([{"id": "1"}]));
    let client = client_with(&transport);

    let (_v, _sub) = client
      .fetch_list("Checklists", "/checklists", &ListParams::default())
      .await
      .unwrap();

    client
      .upload(
        "/checklists/1/evidence",
        vec![
          Part::text("kind", "screenshot"),
          Part::file("file", "proof.png", "image/png", vec![0x89, 0x50]),
        ],
        vec![Tag::id("Checklists", "1")],
      )
      .await
      .unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;

    let requests = transport.requests();
    let upload = requests
      .iter()
      .find(|r| r.path == "/checklists/1/evidence")
      .unwrap();
    assert!(matches!(upload.body, RequestBody::Multipart(_)));
    // The list carried item 1's tag, so it refetched.
    assert_eq!(transport.calls_to("/checklists"), 2);
  }

  #[test]
  fn test_list_tags_shapes() {
    let bare = json!([{"id": "1"}, {"id": 2}, {"name": "no id"}]);
    let tags = list_tags("Checklists", &bare);
    assert_eq!(
      tags,
      vec![
        Tag::list("Checklists"),
        Tag::id("Checklists", "1"),
        Tag::id("Checklists", "2"),
      ]
    );

    let envelope = json!({"items": [{"id": "7"}], "total": 1});
    assert_eq!(
      list_tags("Controls", &envelope),
      vec![Tag::list("Controls"), Tag::id("Controls", "7")]
    );

    assert_eq!(list_tags("Controls", &Value::Null), vec![Tag::list("Controls")]);
  }
}
