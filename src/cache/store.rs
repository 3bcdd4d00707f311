//! Tag-indexed in-memory query cache.
//!
//! Stores the result of each distinct read operation keyed by its operation
//! identity, tags each entry with the resource identifiers it depends on, and
//! exposes invalidation by tag. Concurrent reads sharing an operation key
//! coalesce onto one in-flight fetch; subscribed entries refetch on
//! invalidation, unsubscribed ones are evicted lazily.

use futures::FutureExt;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::debug;

use crate::cache::entry::{CacheEntry, Fetcher, QueryState, SharedFetch, TagsFn};
use crate::cache::key::OperationKey;
use crate::cache::tag::Tag;
use crate::error::ApiError;

enum Plan {
  Hit(Value),
  Join(SharedFetch),
}

/// The cache. Shared as `Arc<QueryCache>`; all methods take `&Arc<Self>`
/// where a background refetch may outlive the call.
pub struct QueryCache {
  entries: Mutex<HashMap<OperationKey, CacheEntry>>,
  gc_grace: Duration,
}

impl QueryCache {
  pub fn new(gc_grace: Duration) -> Self {
    Self {
      entries: Mutex::new(HashMap::new()),
      gc_grace,
    }
  }

  fn entries(&self) -> MutexGuard<'_, HashMap<OperationKey, CacheEntry>> {
    // Lock is only held for map bookkeeping, never across an await.
    self.entries.lock().unwrap_or_else(PoisonError::into_inner)
  }

  pub fn len(&self) -> usize {
    self.entries().len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries().is_empty()
  }

  pub fn contains(&self, key: &OperationKey) -> bool {
    self.entries().contains_key(key)
  }

  /// Read-through fetch.
  ///
  /// Returns the entry's value together with a subscription observing its
  /// future transitions. A fresh entry is served as-is; a missing or stale
  /// one triggers a fetch, coalesced with any fetch already in flight for
  /// the same key.
  pub async fn fetch<F, Fut, T>(
    self: &Arc<Self>,
    key: OperationKey,
    fetcher: F,
    tags_fn: T,
  ) -> Result<(Value, Subscription), ApiError>
  where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, ApiError>> + Send + 'static,
    T: Fn(&Value) -> Vec<Tag> + Send + Sync + 'static,
  {
    let fetcher: Fetcher = Arc::new(move || fetcher().boxed());
    let tags_fn: TagsFn = Arc::new(tags_fn);

    let (plan, receiver) = {
      let mut entries = self.entries();
      self.sweep_locked(&mut entries);

      let entry = entries
        .entry(key.clone())
        .or_insert_with(|| CacheEntry::new(Arc::clone(&fetcher), Arc::clone(&tags_fn)));

      // Later invalidation-driven refetches use the newest declared
      // fetcher and tagging function for this operation.
      entry.fetcher = Arc::clone(&fetcher);
      entry.tags_fn = Arc::clone(&tags_fn);

      entry.subscribers += 1;
      entry.unsubscribed_at = None;
      entry.orphaned = false;
      let receiver = entry.state.subscribe();

      let plan = match entry.current_state() {
        QueryState::Success(value) if !entry.stale => Plan::Hit(value),
        _ => match &entry.inflight {
          Some(inflight) => Plan::Join(inflight.clone()),
          None => Plan::Join(self.begin_fetch_locked(&key, entry)),
        },
      };

      (plan, receiver)
    };

    let subscription = Subscription {
      cache: Arc::clone(self),
      key: key.clone(),
      receiver,
    };

    match plan {
      Plan::Hit(value) => {
        debug!(key = %key, "cache hit");
        Ok((value, subscription))
      }
      Plan::Join(shared) => {
        let value = shared.await?;
        Ok((value, subscription))
      }
    }
  }

  /// Mark every entry whose tag set intersects `tags` as stale. Entries with
  /// active subscribers refetch immediately; the rest are evicted lazily.
  pub fn invalidate(self: &Arc<Self>, tags: &[Tag]) {
    if tags.is_empty() {
      return;
    }
    let requested: HashSet<&Tag> = tags.iter().collect();

    let mut entries = self.entries();
    let mut refetches = Vec::new();

    for (key, entry) in entries.iter_mut() {
      if !entry.tags.iter().any(|tag| requested.contains(tag)) {
        continue;
      }
      entry.stale = true;
      if entry.subscribers > 0 && entry.inflight.is_none() {
        debug!(key = %key, "invalidated; refetching for active subscribers");
        refetches.push((key.clone(), ()));
      } else {
        debug!(key = %key, "invalidated; evicting lazily");
      }
    }

    for (key, ()) in refetches {
      if let Some(entry) = entries.get_mut(&key) {
        let shared = self.begin_fetch_locked(&key, entry);
        // Nobody awaits an invalidation-driven refetch; drive it ourselves.
        tokio::spawn(shared);
      }
    }

    self.sweep_locked(&mut entries);
  }

  /// Start a fetch for `entry`, recording it as the entry's in-flight call.
  fn begin_fetch_locked(
    self: &Arc<Self>,
    key: &OperationKey,
    entry: &mut CacheEntry,
  ) -> SharedFetch {
    let fetcher = Arc::clone(&entry.fetcher);
    let tags_fn = Arc::clone(&entry.tags_fn);
    let cache = Arc::clone(self);
    let key = key.clone();

    entry.stale = false;
    entry.state.send_replace(QueryState::Loading);

    let shared: SharedFetch = async move {
      let result = fetcher().await;
      cache.complete_fetch(&key, &tags_fn, result.clone());
      result
    }
    .boxed()
    .shared();

    entry.inflight = Some(shared.clone());
    shared
  }

  /// Record a fetch outcome: store the value, recompute tags wholesale
  /// (stale tags from a previous response must not persist), notify
  /// subscribers.
  ///
  /// A stale flag still set here means an invalidation landed while this
  /// fetch was in flight, so the stored outcome predates that write.
  /// Subscribed entries immediately begin a follow-up fetch; unsubscribed
  /// ones stay stale for the sweep and are never served.
  fn complete_fetch(
    self: &Arc<Self>,
    key: &OperationKey,
    tags_fn: &TagsFn,
    result: Result<Value, ApiError>,
  ) {
    let mut entries = self.entries();
    let Some(entry) = entries.get_mut(key) else {
      return;
    };
    entry.inflight = None;
    let invalidated_mid_flight = entry.stale;

    match result {
      Ok(value) => {
        entry.tags = tags_fn(&value).into_iter().collect();
        entry.state.send_replace(QueryState::Success(value));
      }
      Err(err) => {
        entry.state.send_replace(QueryState::Error(err));
      }
    }

    if entry.subscribers == 0 {
      // Populated for nobody; eligible for eviction right away.
      entry.orphaned = true;
      return;
    }

    if invalidated_mid_flight {
      debug!(key = %key, "invalidated while fetch was in flight; refetching");
      let shared = self.begin_fetch_locked(key, entry);
      tokio::spawn(shared);
    }
  }

  pub(crate) fn unsubscribe(&self, key: &OperationKey) {
    let mut entries = self.entries();
    if let Some(entry) = entries.get_mut(key) {
      entry.subscribers = entry.subscribers.saturating_sub(1);
      if entry.subscribers == 0 {
        entry.unsubscribed_at = Some(Instant::now());
      }
    }
  }

  /// Drop zero-subscriber entries that are stale, orphaned, or past the
  /// grace period. Runs at the top of fetch and invalidate.
  fn sweep_locked(&self, entries: &mut HashMap<OperationKey, CacheEntry>) {
    let now = Instant::now();
    entries.retain(|key, entry| {
      if entry.subscribers > 0 || entry.inflight.is_some() {
        return true;
      }
      let expired = entry.stale
        || entry.orphaned
        || entry
          .unsubscribed_at
          .map(|left| now.duration_since(left) >= self.gc_grace)
          .unwrap_or(false);
      if expired {
        debug!(key = %key, "evicting cache entry");
      }
      !expired
    });
  }
}

/// Observer handle for one cached read.
///
/// Holds the entry's state receiver; dropping the handle unsubscribes. An
/// unsubscribe before a fetch resolves does not cancel the underlying call
/// (it may be shared), but the entry becomes evictable once populated.
pub struct Subscription {
  cache: Arc<QueryCache>,
  key: OperationKey,
  receiver: watch::Receiver<QueryState>,
}

impl Subscription {
  pub fn key(&self) -> &OperationKey {
    &self.key
  }

  /// Current state of the underlying entry.
  pub fn state(&self) -> QueryState {
    self.receiver.borrow().clone()
  }

  /// Wait for the next state transition. Refetches after invalidation land
  /// here as `Loading` then `Success`/`Error`. Returns `None` once the entry
  /// has been evicted.
  pub async fn changed(&mut self) -> Option<QueryState> {
    match self.receiver.changed().await {
      Ok(()) => Some(self.receiver.borrow().clone()),
      Err(_) => None,
    }
  }
}

impl fmt::Debug for Subscription {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Subscription")
      .field("key", &self.key)
      .field("state", &self.state())
      .finish()
  }
}

impl Drop for Subscription {
  fn drop(&mut self) {
    self.cache.unsubscribe(&self.key);
  }
}
