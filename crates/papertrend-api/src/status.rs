//! Handlers for cache status: freshness and the scope listing.

use std::sync::Arc;

use axum::{
  Json,
  extract::{Query, State},
};
use papertrend_core::{
  store::{Freshness, TrendReader},
  trend::{Scope, ScopeSummary},
};
use serde::Deserialize;

use crate::{error::ApiError, query::scope_key};

#[derive(Debug, Deserialize, Default)]
pub struct FreshnessParams {
  /// Omit for the newest commit across every scope.
  pub scope:    Option<Scope>,
  pub scope_id: Option<String>,
}

/// `GET /freshness[?scope=...][&scope_id=...]`
///
/// Always answers, even before the first commit: `last_updated` is then
/// `null`.
pub async fn freshness<S: TrendReader>(
  State(store): State<Arc<S>>,
  Query(params): Query<FreshnessParams>,
) -> Result<Json<Freshness>, ApiError> {
  let scope = match params.scope {
    Some(scope) => Some(scope_key(Some(scope), params.scope_id)?),
    None => None,
  };
  let freshness = store.freshness(scope).await.map_err(ApiError::store)?;
  Ok(Json(freshness))
}

/// `GET /scopes`
pub async fn scopes<S: TrendReader>(
  State(store): State<Arc<S>>,
) -> Result<Json<Vec<ScopeSummary>>, ApiError> {
  let scopes = store.list_scopes().await.map_err(ApiError::store)?;
  Ok(Json(scopes))
}
