//! Cache keys derived from operation identity.

use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fmt;

/// Identity of one distinct read operation: operation name plus a digest of
/// its normalized arguments.
///
/// Arguments are serialized through `serde_json::Value`, whose object
/// representation keeps keys sorted, so two argument values that are
/// structurally equal hash identically regardless of construction order.
/// Pagination, sort, and filter parameters are part of the arguments, so two
/// reads that differ only in sort order are distinct entries.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OperationKey {
  operation: String,
  hash: String,
}

impl OperationKey {
  pub fn new<A: Serialize>(operation: impl Into<String>, args: &A) -> Self {
    // Argument types are plain data; a failed serialization degrades to the
    // operation's null-argument key.
    let value = serde_json::to_value(args).unwrap_or(Value::Null);
    Self::from_value(operation, &value)
  }

  pub fn from_value(operation: impl Into<String>, args: &Value) -> Self {
    let operation = operation.into();
    let canonical = args.to_string();

    // SHA256 hash for stable, fixed-length keys
    let mut hasher = Sha256::new();
    hasher.update(operation.as_bytes());
    hasher.update([0]);
    hasher.update(canonical.as_bytes());
    let hash = hex::encode(hasher.finalize());

    Self { operation, hash }
  }

  pub fn operation(&self) -> &str {
    &self.operation
  }
}

impl fmt::Display for OperationKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}:{}", self.operation, &self.hash[..16])
  }
}
