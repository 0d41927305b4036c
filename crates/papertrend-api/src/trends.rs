//! Handlers for the trend reads.
//!
//! | Method | Path            | Notes                                        |
//! |--------|-----------------|----------------------------------------------|
//! | GET    | `/timeseries`   | Buckets for one scope, ordered by bucket     |
//! | GET    | `/keywords/top` | Ranked keywords, per bucket or scope-wide    |
//! | GET    | `/emerging`     | Emerging records, rising first               |
//!
//! Every endpoint takes `scope` (`global` by default) and `scope_id`.

use std::sync::Arc;

use axum::{
  Json,
  extract::{Query, State},
};
use papertrend_core::{
  store::{BucketRef, TrendReader},
  trend::{BucketSummary, EmergingRecord, Granularity, KeywordCount, Scope},
};
use serde::Deserialize;

use crate::{
  error::ApiError,
  query::{limit, scope_key},
};

// ─── Timeseries ─────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize, Default)]
pub struct TimeseriesParams {
  pub scope:       Option<Scope>,
  pub scope_id:    Option<String>,
  /// Defaults to `month`.
  pub granularity: Option<Granularity>,
}

/// `GET /timeseries[?scope=...][&scope_id=...][&granularity=...]`
pub async fn timeseries<S: TrendReader>(
  State(store): State<Arc<S>>,
  Query(params): Query<TimeseriesParams>,
) -> Result<Json<Vec<BucketSummary>>, ApiError> {
  let scope = scope_key(params.scope, params.scope_id)?;
  let granularity = params.granularity.unwrap_or(Granularity::Month);
  let buckets = store.timeseries(scope, granularity).await.map_err(ApiError::store)?;
  Ok(Json(buckets))
}

// ─── Top keywords ───────────────────────────────────────────────────────────

#[derive(Debug, Deserialize, Default)]
pub struct TopKeywordsParams {
  pub scope:       Option<Scope>,
  pub scope_id:    Option<String>,
  pub granularity: Option<Granularity>,
  /// Bucket label at `granularity`. Omit for scope-wide totals.
  pub bucket:      Option<String>,
  pub limit:       Option<usize>,
}

/// `GET /keywords/top[?scope=...][&scope_id=...][&granularity=...&bucket=...][&limit=...]`
pub async fn top_keywords<S: TrendReader>(
  State(store): State<Arc<S>>,
  Query(params): Query<TopKeywordsParams>,
) -> Result<Json<Vec<KeywordCount>>, ApiError> {
  let scope = scope_key(params.scope, params.scope_id)?;

  let bucket = match params.bucket {
    Some(bucket) => {
      let granularity = params.granularity.unwrap_or(Granularity::Month);
      granularity
        .bucket_start(&bucket)
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;
      Some(BucketRef { granularity, bucket })
    }
    None => None,
  };

  let ranked = store
    .top_keywords(scope, bucket, limit(params.limit))
    .await
    .map_err(ApiError::store)?;
  Ok(Json(ranked))
}

// ─── Emerging ───────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize, Default)]
pub struct EmergingParams {
  pub scope:    Option<Scope>,
  pub scope_id: Option<String>,
  pub limit:    Option<usize>,
}

/// `GET /emerging[?scope=...][&scope_id=...][&limit=...]`
pub async fn emerging<S: TrendReader>(
  State(store): State<Arc<S>>,
  Query(params): Query<EmergingParams>,
) -> Result<Json<Vec<EmergingRecord>>, ApiError> {
  let scope = scope_key(params.scope, params.scope_id)?;
  let records = store
    .emerging(scope, limit(params.limit))
    .await
    .map_err(ApiError::store)?;
  Ok(Json(records))
}
