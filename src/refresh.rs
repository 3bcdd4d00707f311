//! Credential renewal with single-flight coalescing.

use chrono::{Duration, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::ApiError;
use crate::session::{apply_session_payload, CredentialState, Session};
use crate::transport::{ApiRequest, Transport};

pub(crate) const REFRESH_PATH: &str = "/auth/refresh";

type SharedRefresh = Shared<BoxFuture<'static, Result<Session, ApiError>>>;

/// Decides when credentials need renewal and guarantees at most one renewal
/// call is in flight at a time.
///
/// Concurrent callers attach to the same pending outcome rather than issuing
/// parallel renewal calls. A failed refresh is terminal for the current
/// session: the credential store is cleared and the pending slot torn down so
/// a later call can try again; the coordinator itself never retries.
pub struct RefreshCoordinator {
  transport: Arc<dyn Transport>,
  state: Arc<CredentialState>,
  pending: Arc<Mutex<Option<SharedRefresh>>>,
  lookahead: Duration,
}

impl RefreshCoordinator {
  pub fn new(
    transport: Arc<dyn Transport>,
    state: Arc<CredentialState>,
    lookahead_secs: i64,
  ) -> Self {
    Self {
      transport,
      state,
      pending: Arc::new(Mutex::new(None)),
      lookahead: Duration::seconds(lookahead_secs),
    }
  }

  /// The one expiry gate every dispatch path consults.
  ///
  /// True when the session is authenticated with a known expiry inside the
  /// lookahead window. Unknown expiry never triggers the proactive path; the
  /// reactive 401 path covers it.
  pub async fn needs_refresh(&self) -> bool {
    let session = self.state.snapshot().await;
    if !session.authenticated {
      return false;
    }
    match session.access_expiry {
      Some(expiry) => expiry - Utc::now() <= self.lookahead,
      None => false,
    }
  }

  /// Renew the session, coalescing with any renewal already in flight.
  pub async fn ensure_fresh(&self) -> Result<Session, ApiError> {
    let shared = {
      let mut pending = self.pending.lock().await;
      match pending.as_ref() {
        Some(inflight) => {
          debug!("attaching to in-flight session refresh");
          inflight.clone()
        }
        None => {
          let refresh = Self::run_refresh(
            Arc::clone(&self.transport),
            Arc::clone(&self.state),
            Arc::clone(&self.pending),
          )
          .boxed()
          .shared();
          *pending = Some(refresh.clone());
          refresh
        }
      }
    };

    shared.await
  }

  /// The single in-flight renewal. Clears the pending slot as its last step
  /// so outcomes never linger and a later call can start fresh.
  async fn run_refresh(
    transport: Arc<dyn Transport>,
    state: Arc<CredentialState>,
    pending: Arc<Mutex<Option<SharedRefresh>>>,
  ) -> Result<Session, ApiError> {
    let outcome = Self::call_refresh(transport.as_ref(), state.as_ref()).await;
    pending.lock().await.take();
    outcome
  }

  async fn call_refresh(
    transport: &dyn Transport,
    state: &CredentialState,
  ) -> Result<Session, ApiError> {
    debug!("renewing session credentials");
    let request = ApiRequest::post(REFRESH_PATH);

    let failure = match transport.execute(&request).await {
      Ok(response) if response.is_success() => {
        match apply_session_payload(state, &response.body).await {
          Ok(session) => {
            info!("session credentials renewed");
            return Ok(session);
          }
          Err(err) => err,
        }
      }
      Ok(response) => ApiError::Auth(format!(
        "session refresh rejected with status {}",
        response.status
      )),
      Err(err) => ApiError::Auth(format!("session refresh failed: {err}")),
    };

    // Any refresh failure is logout-equivalent.
    warn!(error = %failure, "session refresh failed; clearing session");
    state.clear().await;
    Err(failure)
  }
}
