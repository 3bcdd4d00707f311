//! Client-side data-access layer for a session-cookie HTTP API.
//!
//! Two pieces, composed by [`ApiClient`]:
//!
//! * a request pipeline that renews session credentials before they expire,
//!   coalesces concurrent renewals into one call, attaches CSRF tokens to
//!   mutating requests, and retries an unauthorized request exactly once
//!   after a reactive renewal;
//! * a tag-indexed query cache that deduplicates identical in-flight reads,
//!   serves fresh results without touching the network, and refetches or
//!   evicts entries when a write invalidates the tags they depend on.
//!
//! The layer is schema-agnostic: response bodies are `serde_json::Value`
//! and resource names are caller-supplied strings.

pub mod cache;
pub mod client;
pub mod config;
pub mod csrf;
pub mod dispatch;
pub mod error;
pub mod mutation;
pub mod refresh;
pub mod session;
pub mod transport;

#[cfg(test)]
mod testing;

pub use cache::{OperationKey, QueryCache, QueryState, Subscription, Tag, TagId};
pub use client::{list_tags, ApiClient, ListParams, SortOrder};
pub use config::{Config, ConfigError};
pub use csrf::{CsrfProvider, MemoryCsrf};
pub use dispatch::{RequestDispatcher, CSRF_HEADER};
pub use error::ApiError;
pub use mutation::MutationRunner;
pub use refresh::RefreshCoordinator;
pub use session::{CredentialState, Session};
pub use transport::{
  ApiRequest, ApiResponse, HttpTransport, Method, Part, PartValue, RequestBody, Transport,
};
