//! Double-submit CSRF token resolution.

use std::sync::{PoisonError, RwLock};

/// Resolves the double-submit token attached to mutating requests.
///
/// Stateless besides the read accessor; a missing token never blocks a
/// request (the server rejects it and the failure is surfaced normally).
pub trait CsrfProvider: Send + Sync {
  /// The current token, if one is known.
  fn token(&self) -> Option<String>;
}

/// In-memory token holder.
///
/// The HTTP transport feeds it from `Set-Cookie` response headers, so the
/// header value always mirrors the cookie the server last issued.
#[derive(Debug, Default)]
pub struct MemoryCsrf {
  token: RwLock<Option<String>>,
}

impl MemoryCsrf {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn set_token(&self, token: impl Into<String>) {
    let mut slot = self
      .token
      .write()
      .unwrap_or_else(PoisonError::into_inner);
    *slot = Some(token.into());
  }

  pub fn clear(&self) {
    let mut slot = self
      .token
      .write()
      .unwrap_or_else(PoisonError::into_inner);
    *slot = None;
  }
}

impl CsrfProvider for MemoryCsrf {
  fn token(&self) -> Option<String> {
    self
      .token
      .read()
      .unwrap_or_else(PoisonError::into_inner)
      .clone()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_token_roundtrip() {
    let csrf = MemoryCsrf::new();
    assert_eq!(csrf.token(), None);

    csrf.set_token("abc123");
    assert_eq!(csrf.token(), Some("abc123".to_string()));

    csrf.clear();
    assert_eq!(csrf.token(), None);
  }
}
