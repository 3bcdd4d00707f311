//! Shared test fixtures: a script-driven transport double and wiring helpers.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use crate::cache::QueryCache;
use crate::client::ApiClient;
use crate::config::Config;
use crate::csrf::MemoryCsrf;
use crate::dispatch::RequestDispatcher;
use crate::error::ApiError;
use crate::mutation::MutationRunner;
use crate::refresh::RefreshCoordinator;
use crate::session::CredentialState;
use crate::transport::{ApiRequest, ApiResponse, Transport};

/// Transport double. Responses are queued per path and consumed in order;
/// a path with no queued response answers 200 with a null body.
pub(crate) struct MockTransport {
  responses: Mutex<HashMap<String, VecDeque<(u16, Value)>>>,
  rotations: Mutex<HashMap<String, VecDeque<(String, Arc<MemoryCsrf>)>>>,
  requests: Mutex<Vec<ApiRequest>>,
  delay: Option<Duration>,
}

impl MockTransport {
  pub(crate) fn new() -> Self {
    Self {
      responses: Mutex::new(HashMap::new()),
      rotations: Mutex::new(HashMap::new()),
      requests: Mutex::new(Vec::new()),
      delay: None,
    }
  }

  /// Sleep before answering, to hold open a coalescing window.
  pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
    self.delay = Some(delay);
    self
  }

  pub(crate) fn respond(&self, path: &str, status: u16, body: Value) {
    self
      .responses
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .entry(path.to_string())
      .or_default()
      .push_back((status, body));
  }

  pub(crate) fn respond_ok(&self, path: &str, body: Value) {
    self.respond(path, 200, body);
  }

  /// Mirror the HTTP transport's Set-Cookie capture: the next answer for
  /// `path` also stores `token` in `csrf`.
  pub(crate) fn rotate_csrf_on(&self, path: &str, token: &str, csrf: &Arc<MemoryCsrf>) {
    self
      .rotations
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .entry(path.to_string())
      .or_default()
      .push_back((token.to_string(), Arc::clone(csrf)));
  }

  pub(crate) fn requests(&self) -> Vec<ApiRequest> {
    self
      .requests
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .clone()
  }

  pub(crate) fn paths(&self) -> Vec<String> {
    self.requests().into_iter().map(|r| r.path).collect()
  }

  pub(crate) fn calls_to(&self, path: &str) -> usize {
    self.requests().iter().filter(|r| r.path == path).count()
  }
}

#[async_trait]
impl Transport for MockTransport {
  async fn execute(&self, request: &ApiRequest) -> Result<ApiResponse, ApiError> {
    self
      .requests
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .push(request.clone());

    if let Some(delay) = self.delay {
      tokio::time::sleep(delay).await;
    }

    if let Some((token, csrf)) = self
      .rotations
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .get_mut(&request.path)
      .and_then(|queue| queue.pop_front())
    {
      csrf.set_token(token);
    }

    let next = self
      .responses
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .get_mut(&request.path)
      .and_then(|queue| queue.pop_front());

    match next {
      Some((status, body)) => Ok(ApiResponse::with_status(status, body)),
      None => Ok(ApiResponse::ok(Value::Null)),
    }
  }
}

/// A `/auth/login`-or-refresh payload expiring `ttl_secs` from now.
pub(crate) fn session_body(ttl_secs: i64) -> Value {
  json!({
    "user": {"id": "u1", "email": "user@example.test"},
    "access_exp": (Utc::now() + chrono::Duration::seconds(ttl_secs)).timestamp(),
  })
}

/// Dispatcher wired to the mock with a fresh credential store and CSRF slot.
pub(crate) fn dispatcher_with(
  transport: &Arc<MockTransport>,
) -> (RequestDispatcher, Arc<CredentialState>, Arc<MemoryCsrf>) {
  let state = Arc::new(CredentialState::new());
  let csrf = Arc::new(MemoryCsrf::new());
  let transport: Arc<dyn Transport> = transport.clone();
  let refresher = Arc::new(RefreshCoordinator::new(
    Arc::clone(&transport),
    Arc::clone(&state),
    180,
  ));
  let dispatcher = RequestDispatcher::new(
    transport,
    refresher,
    csrf.clone(),
    Arc::clone(&state),
  );
  (dispatcher, state, csrf)
}

/// Mutation runner plus the cache it invalidates into.
pub(crate) fn mutation_runner_with(
  transport: &Arc<MockTransport>,
) -> (MutationRunner, Arc<QueryCache>) {
  let (dispatcher, _state, _csrf) = dispatcher_with(transport);
  let cache = Arc::new(QueryCache::new(Duration::from_secs(60)));
  let runner = MutationRunner::new(Arc::new(dispatcher), Arc::clone(&cache));
  (runner, cache)
}

/// Full client facade backed by the mock.
pub(crate) fn client_with(transport: &Arc<MockTransport>) -> ApiClient {
  let transport: Arc<dyn Transport> = transport.clone();
  ApiClient::with_transport(
    transport,
    Arc::new(MemoryCsrf::new()),
    &Config::for_base_url("https://api.example.test/"),
  )
}
