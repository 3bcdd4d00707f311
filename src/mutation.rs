//! Writes with declared-tag invalidation.

use std::sync::Arc;
use tracing::debug;

use crate::cache::{QueryCache, Tag};
use crate::dispatch::RequestDispatcher;
use crate::error::ApiError;
use crate::transport::{ApiRequest, ApiResponse};

/// Executes a write through the dispatcher, then invalidates the tags the
/// write declared, triggering refetch of affected cached reads.
pub struct MutationRunner {
  dispatcher: Arc<RequestDispatcher>,
  cache: Arc<QueryCache>,
}

impl MutationRunner {
  pub fn new(dispatcher: Arc<RequestDispatcher>, cache: Arc<QueryCache>) -> Self {
    Self { dispatcher, cache }
  }

  /// Run the write. Invalidation happens only on success: a failed write
  /// must not be assumed to have changed anything.
  pub async fn mutate(
    &self,
    request: ApiRequest,
    declared: Vec<Tag>,
  ) -> Result<ApiResponse, ApiError> {
    let response = self.dispatcher.dispatch(request).await?;

    if !declared.is_empty() {
      debug!(
        tags = %declared.iter().map(ToString::to_string).collect::<Vec<_>>().join(", "),
        "write succeeded; invalidating declared tags"
      );
      self.cache.invalidate(&declared);
    }

    Ok(response)
  }
}
