//! Session state and its sole owner, the credential store.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::info;

use crate::error::ApiError;

/// Snapshot of the current authentication state.
///
/// Invariant: `authenticated == true` implies `access_expiry` is either
/// `None` (unknown) or was in the future at the last check.
#[derive(Debug, Clone, Default)]
pub struct Session {
  pub authenticated: bool,
  /// When the access credential expires, if the server reported it.
  pub access_expiry: Option<DateTime<Utc>>,
  /// Opaque user payload from the last login/refresh response.
  pub user: Option<Value>,
}

/// Owner of the process-wide session singleton.
///
/// All mutation goes through `set_authenticated` and `clear`; no other
/// component writes session fields directly. Constructed once and shared by
/// reference with the refresh coordinator and the dispatcher.
#[derive(Debug, Default)]
pub struct CredentialState {
  inner: Mutex<Session>,
}

impl CredentialState {
  pub fn new() -> Self {
    Self::default()
  }

  pub async fn snapshot(&self) -> Session {
    self.inner.lock().await.clone()
  }

  pub async fn is_authenticated(&self) -> bool {
    self.inner.lock().await.authenticated
  }

  /// Record a successful login/refresh outcome.
  pub async fn set_authenticated(&self, user: Option<Value>, access_expiry: Option<DateTime<Utc>>) {
    let mut session = self.inner.lock().await;
    session.authenticated = true;
    session.access_expiry = access_expiry;
    session.user = user;
    info!(expiry = ?access_expiry, "session authenticated");
  }

  /// Clear the session wholesale (logout or irrecoverable refresh failure).
  pub async fn clear(&self) {
    let mut session = self.inner.lock().await;
    if session.authenticated {
      info!("session cleared");
    }
    *session = Session::default();
  }
}

/// Body of a successful `/auth/login` or `/auth/refresh` response.
#[derive(Debug, Deserialize)]
struct SessionPayload {
  #[serde(default)]
  user: Option<Value>,
  /// Access-credential expiry as unix seconds.
  #[serde(default)]
  access_exp: Option<i64>,
}

/// Apply a session payload to the credential store, returning the new session.
pub(crate) async fn apply_session_payload(
  state: &CredentialState,
  body: &Value,
) -> Result<Session, ApiError> {
  let payload: SessionPayload = serde_json::from_value(body.clone())
    .map_err(|e| ApiError::Auth(format!("malformed session payload: {e}")))?;

  let expiry = payload
    .access_exp
    .and_then(|secs| DateTime::from_timestamp(secs, 0));

  state.set_authenticated(payload.user, expiry).await;
  Ok(state.snapshot().await)
}
