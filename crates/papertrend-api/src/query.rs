//! Query-string helpers shared by the handlers.

use papertrend_core::trend::{Scope, ScopeKey};

use crate::error::ApiError;

/// Default for `limit` when the caller gives none.
pub const DEFAULT_LIMIT: usize = 20;
/// Upper bound on `limit`.
pub const MAX_LIMIT: usize = 500;

/// Resolve `scope` / `scope_id` query params into a [`ScopeKey`].
///
/// A missing `scope` means global. Venue and category scopes need a
/// non-empty `scope_id`; the global scope ignores it.
pub fn scope_key(scope: Option<Scope>, scope_id: Option<String>) -> Result<ScopeKey, ApiError> {
  match scope.unwrap_or(Scope::Global) {
    Scope::Global => Ok(ScopeKey::global()),
    scope => {
      let scope_id = scope_id
        .map(|s| s.trim().to_owned())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ApiError::BadRequest(format!("scope_id is required for {scope} scope")))?;
      Ok(ScopeKey { scope, scope_id })
    }
  }
}

pub fn limit(requested: Option<usize>) -> usize {
  requested.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn global_is_the_default_scope() {
    assert_eq!(scope_key(None, Some("ignored".into())).unwrap(), ScopeKey::global());
  }

  #[test]
  fn venue_scope_needs_an_id() {
    assert!(matches!(scope_key(Some(Scope::Venue), None), Err(ApiError::BadRequest(_))));
    assert!(matches!(
      scope_key(Some(Scope::Category), Some("  ".into())),
      Err(ApiError::BadRequest(_))
    ));
    assert_eq!(
      scope_key(Some(Scope::Venue), Some("ICLR".into())).unwrap(),
      ScopeKey::venue("ICLR")
    );
  }

  #[test]
  fn limit_is_clamped() {
    assert_eq!(limit(None), DEFAULT_LIMIT);
    assert_eq!(limit(Some(0)), 1);
    assert_eq!(limit(Some(10_000)), MAX_LIMIT);
  }
}
