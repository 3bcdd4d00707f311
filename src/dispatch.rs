//! The single entry point all reads and writes go through.

use std::sync::Arc;
use tracing::{debug, warn};

use crate::csrf::CsrfProvider;
use crate::error::ApiError;
use crate::refresh::RefreshCoordinator;
use crate::session::CredentialState;
use crate::transport::{ApiRequest, ApiResponse, Transport};

pub const CSRF_HEADER: &str = "X-CSRF-Token";

/// Orchestrates transport, refresh coordination, and CSRF attachment.
///
/// Guarantee: a caller never sees a stale-credential failure without at
/// least one renewal attempt having been made first, and a request is never
/// retried more than once.
pub struct RequestDispatcher {
  transport: Arc<dyn Transport>,
  refresher: Arc<RefreshCoordinator>,
  csrf: Arc<dyn CsrfProvider>,
  state: Arc<CredentialState>,
}

impl RequestDispatcher {
  pub fn new(
    transport: Arc<dyn Transport>,
    refresher: Arc<RefreshCoordinator>,
    csrf: Arc<dyn CsrfProvider>,
    state: Arc<CredentialState>,
  ) -> Self {
    Self {
      transport,
      refresher,
      csrf,
      state,
    }
  }

  pub async fn dispatch(&self, request: ApiRequest) -> Result<ApiResponse, ApiError> {
    // Proactive renewal: don't let the request race imminent expiry.
    if self.refresher.needs_refresh().await {
      if let Err(err) = self.refresher.ensure_fresh().await {
        // The original request was not blocked yet; proceed and let the
        // server's 401 drive the reactive path instead.
        warn!(error = %err, path = %request.path, "proactive refresh failed; proceeding with original request");
      }
    }

    let mut request = request;
    self.attach_csrf(&mut request);

    let response = self.transport.execute(&request).await?;
    if !response.is_unauthorized() {
      return response.into_result();
    }

    // Reactive renewal, then exactly one retry of the original request.
    debug!(path = %request.path, "request unauthorized; renewing credentials before retry");
    self.refresher.ensure_fresh().await?;

    // The refresh response may have rotated the double-submit cookie, so
    // the retry must not reuse the token from the first attempt.
    self.attach_csrf(&mut request);

    let retry = self.transport.execute(&request).await?;
    if retry.is_unauthorized() {
      // Second failure after retry is terminal.
      self.state.clear().await;
      return Err(ApiError::Auth(
        "request unauthorized after credential renewal".to_string(),
      ));
    }

    retry.into_result()
  }

  /// Attach the current CSRF token to a mutating request, replacing any
  /// token attached by an earlier attempt.
  fn attach_csrf(&self, request: &mut ApiRequest) {
    if !request.is_mutating() {
      return;
    }
    request
      .headers
      .retain(|(name, _)| !name.eq_ignore_ascii_case(CSRF_HEADER));
    match self.csrf.token() {
      Some(token) => request.headers.push((CSRF_HEADER.to_string(), token)),
      None => {
        warn!(path = %request.path, "no CSRF token resolvable for mutating request")
      }
    }
  }
}
