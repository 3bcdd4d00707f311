//! Per-entry state for cached reads.

use futures::future::{BoxFuture, Shared};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;

use crate::cache::tag::Tag;
use crate::error::ApiError;

/// Observable state of one cached read.
#[derive(Debug, Clone)]
pub enum QueryState {
  /// Not started (only observable before the first fetch begins).
  Idle,
  /// A fetch is in flight.
  Loading,
  /// Last fetch succeeded.
  Success(Value),
  /// Last fetch failed.
  Error(ApiError),
}

impl QueryState {
  pub fn is_loading(&self) -> bool {
    matches!(self, QueryState::Loading)
  }

  pub fn is_success(&self) -> bool {
    matches!(self, QueryState::Success(_))
  }

  pub fn is_error(&self) -> bool {
    matches!(self, QueryState::Error(_))
  }

  pub fn data(&self) -> Option<&Value> {
    match self {
      QueryState::Success(data) => Some(data),
      _ => None,
    }
  }

  pub fn error(&self) -> Option<&ApiError> {
    match self {
      QueryState::Error(e) => Some(e),
      _ => None,
    }
  }
}

/// Produces the fetch future for an entry; called again on every refetch.
pub(crate) type Fetcher =
  Arc<dyn Fn() -> BoxFuture<'static, Result<Value, ApiError>> + Send + Sync>;

/// Pure, declared tagging function: response body to dependency tags.
pub(crate) type TagsFn = Arc<dyn Fn(&Value) -> Vec<Tag> + Send + Sync>;

/// One in-flight fetch, shared by all coalesced callers.
pub(crate) type SharedFetch = Shared<BoxFuture<'static, Result<Value, ApiError>>>;

/// Internal record for one cached read.
pub(crate) struct CacheEntry {
  /// State broadcaster; subscribers hold receivers.
  pub(crate) state: watch::Sender<QueryState>,
  /// Recomputed wholesale on every successful (re)fetch.
  pub(crate) tags: HashSet<Tag>,
  pub(crate) subscribers: usize,
  /// Set by invalidation; a stale entry is never served from cache.
  pub(crate) stale: bool,
  /// Completed with zero subscribers; evictable right away.
  pub(crate) orphaned: bool,
  /// When the last subscriber left, for grace-period eviction.
  pub(crate) unsubscribed_at: Option<Instant>,
  pub(crate) fetcher: Fetcher,
  pub(crate) tags_fn: TagsFn,
  pub(crate) inflight: Option<SharedFetch>,
}

impl CacheEntry {
  pub(crate) fn new(fetcher: Fetcher, tags_fn: TagsFn) -> Self {
    let (state, _) = watch::channel(QueryState::Idle);
    Self {
      state,
      tags: HashSet::new(),
      subscribers: 0,
      stale: false,
      orphaned: false,
      unsubscribed_at: None,
      fetcher,
      tags_fn,
      inflight: None,
    }
  }

  pub(crate) fn current_state(&self) -> QueryState {
    self.state.borrow().clone()
  }
}
