//! Read-only JSON API over the trend cache.
//!
//! Exposes an axum [`Router`] backed by any
//! [`papertrend_core::store::TrendReader`]. Nothing here writes; auth, TLS,
//! and transport concerns are the caller's responsibility.
//!
//! # Mounting
//!
//! ```rust,ignore
//! .nest("/api", papertrend_api::api_router(store.clone()))
//! ```

pub mod error;
pub mod query;
pub mod status;
pub mod trends;

use std::sync::Arc;

use axum::{Router, routing::get};
use papertrend_core::store::TrendReader;

pub use error::ApiError;

/// Build a fully-materialised API router for `store`.
///
/// The returned `Router<()>` can be nested into any parent router regardless
/// of its own state type.
pub fn api_router<S>(store: Arc<S>) -> Router<()>
where
  S: TrendReader + 'static,
{
  Router::new()
    // Trends
    .route("/timeseries", get(trends::timeseries::<S>))
    .route("/keywords/top", get(trends::top_keywords::<S>))
    .route("/emerging", get(trends::emerging::<S>))
    // Status
    .route("/freshness", get(status::freshness::<S>))
    .route("/scopes", get(status::scopes::<S>))
    .with_state(store)
}

#[cfg(test)]
mod tests {
  use std::{convert::Infallible, future::Future};

  use axum::{
    body::Body,
    http::{Request, StatusCode},
  };
  use chrono::{DateTime, TimeZone, Utc};
  use papertrend_core::{
    store::{BucketRef, Freshness},
    trend::{
      BucketSummary, EmergingRecord, Granularity, KeywordCount, ScopeKey, ScopeSummary, Trend,
    },
  };
  use serde_json::Value;
  use tower::ServiceExt;

  use super::*;

  /// Echoes its arguments back so tests can see how the query was parsed.
  struct FakeReader;

  fn at() -> DateTime<Utc> { Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap() }

  impl TrendReader for FakeReader {
    type Error = Infallible;

    fn list_scopes(
      &self,
    ) -> impl Future<Output = Result<Vec<ScopeSummary>, Self::Error>> + Send + '_ {
      async move {
        Ok(vec![ScopeSummary {
          scope:        ScopeKey::global(),
          paper_count:  3,
          top_keywords: vec![KeywordCount { keyword: "diffusion model".into(), count: 2 }],
          updated_at:   at(),
        }])
      }
    }

    fn timeseries(
      &self,
      scope: ScopeKey,
      granularity: Granularity,
    ) -> impl Future<Output = Result<Vec<BucketSummary>, Self::Error>> + Send + '_ {
      async move {
        Ok(vec![BucketSummary {
          scope,
          granularity,
          bucket: "2024-02".into(),
          paper_count: 3,
          top_keywords: vec![],
          updated_at: at(),
        }])
      }
    }

    fn top_keywords(
      &self,
      scope: ScopeKey,
      bucket: Option<BucketRef>,
      limit: usize,
    ) -> impl Future<Output = Result<Vec<KeywordCount>, Self::Error>> + Send + '_ {
      async move {
        let label = bucket.map_or_else(|| "all-time".to_owned(), |b| b.bucket);
        Ok(vec![
          KeywordCount { keyword: scope.to_string(), count: limit as u64 },
          KeywordCount { keyword: label, count: 1 },
        ])
      }
    }

    fn emerging(
      &self,
      scope: ScopeKey,
      _limit: usize,
    ) -> impl Future<Output = Result<Vec<EmergingRecord>, Self::Error>> + Send + '_ {
      async move {
        Ok(vec![EmergingRecord {
          scope,
          keyword: "state space model".into(),
          granularity: Granularity::Month,
          growth_rate: f64::INFINITY,
          recent_count: 6,
          previous_count: 0,
          first_seen: "2024-01".into(),
          trend: Trend::Rising,
          updated_at: at(),
        }])
      }
    }

    fn freshness(
      &self,
      scope: Option<ScopeKey>,
    ) -> impl Future<Output = Result<Freshness, Self::Error>> + Send + '_ {
      async move {
        Ok(Freshness {
          last_updated: scope.is_none().then(at),
          last_run:     None,
        })
      }
    }
  }

  async fn get_json(uri: &str) -> (StatusCode, Value) {
    let req = Request::builder().uri(uri).body(Body::empty()).unwrap();
    let resp = api_router(Arc::new(FakeReader)).oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
  }

  // ── /timeseries ─────────────────────────────────────────────────────────────

  #[tokio::test]
  async fn timeseries_defaults_to_global_monthly() {
    let (status, body) = get_json("/timeseries").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body[0]["scope"]["scope"], "global");
    assert_eq!(body[0]["scope"]["scope_id"], "all");
    assert_eq!(body[0]["granularity"], "month");
  }

  #[tokio::test]
  async fn timeseries_for_a_venue_by_week() {
    let (status, body) = get_json("/timeseries?scope=venue&scope_id=ICLR&granularity=week").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body[0]["scope"]["scope_id"], "ICLR");
    assert_eq!(body[0]["granularity"], "week");
  }

  #[tokio::test]
  async fn venue_scope_without_id_is_rejected() {
    let (status, body) = get_json("/timeseries?scope=venue").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("scope_id"));
  }

  // ── /keywords/top ───────────────────────────────────────────────────────────

  #[tokio::test]
  async fn top_keywords_passes_bucket_and_limit() {
    let (status, body) =
      get_json("/keywords/top?scope=category&scope_id=cs.LG&granularity=day&bucket=2024-02-29&limit=5")
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body[0]["keyword"], "category:cs.LG");
    assert_eq!(body[0]["count"], 5);
    assert_eq!(body[1]["keyword"], "2024-02-29");
  }

  #[tokio::test]
  async fn top_keywords_without_bucket_is_scope_wide() {
    let (_, body) = get_json("/keywords/top").await;
    assert_eq!(body[0]["count"], query::DEFAULT_LIMIT as u64);
    assert_eq!(body[1]["keyword"], "all-time");
  }

  #[tokio::test]
  async fn malformed_bucket_is_rejected() {
    let (status, _) = get_json("/keywords/top?granularity=month&bucket=2024-13").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
  }

  // ── /emerging ───────────────────────────────────────────────────────────────

  #[tokio::test]
  async fn emerging_writes_unbounded_growth_as_inf() {
    let (status, body) = get_json("/emerging?scope=venue&scope_id=NeurIPS").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body[0]["growth_rate"], "inf");
    assert_eq!(body[0]["trend"], "rising");
    assert_eq!(body[0]["scope"]["scope_id"], "NeurIPS");
  }

  // ── status ──────────────────────────────────────────────────────────────────

  #[tokio::test]
  async fn freshness_with_and_without_scope() {
    let (status, body) = get_json("/freshness").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["last_updated"].is_string());
    assert!(body["last_run"].is_null());

    let (status, body) = get_json("/freshness?scope=global").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["last_updated"].is_null());
  }

  #[tokio::test]
  async fn scopes_lists_summaries() {
    let (status, body) = get_json("/scopes").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 1);
    assert_eq!(body[0]["paper_count"], 3);
    assert_eq!(body[0]["top_keywords"][0]["keyword"], "diffusion model");
  }
}
