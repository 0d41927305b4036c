//! The aggregation engine.
//!
//! [`aggregate`] is pure: it takes the previous watermark and a delta of
//! papers with their keywords, and returns the advanced watermark plus the
//! count changes to commit. Nothing is written here.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use papertrend_core::{
  Error as CoreError,
  paper::CanonicalPaper,
  store::{BucketRef, CacheDelta},
  trend::{Granularity, ScopeKey, TrendCacheEntry},
  watermark::AnalysisWatermark,
};
use strum::IntoEnumIterator;
use tracing::warn;

/// Day used to bucket `paper`, and whether it came from the fallback
/// timestamp.
///
/// `published_at` may be RFC 3339, `YYYY-MM-DDTHH:MM:SS`, or `YYYY-MM-DD`.
/// When absent, the founding record's `retrieved_at` (`first_seen_at`) is
/// used.
pub fn bucket_date(paper: &CanonicalPaper) -> papertrend_core::Result<(NaiveDate, bool)> {
  let Some(raw) = paper.published_at.as_deref().map(str::trim).filter(|s| !s.is_empty())
  else {
    return Ok((paper.first_seen_at.date_naive(), true));
  };

  if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
    return Ok((dt.with_timezone(&Utc).date_naive(), false));
  }
  if let Ok(dt) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S") {
    return Ok((dt.date(), false));
  }
  if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
    return Ok((date, false));
  }
  Err(CoreError::BucketFormat { paper_id: paper.paper_id, value: raw.to_owned() })
}

/// Observability counters for one aggregation call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AggregationStats {
  pub papers:               u64,
  /// Papers bucketed by `first_seen_at` for lack of `published_at`.
  pub timestamp_fallbacks:  u64,
  /// Papers left out of bucketed counts: `published_at` did not parse.
  pub bucket_format_errors: u64,
}

impl AggregationStats {
  pub fn absorb(&mut self, other: Self) {
    self.papers += other.papers;
    self.timestamp_fallbacks += other.timestamp_fallbacks;
    self.bucket_format_errors += other.bucket_format_errors;
  }
}

/// Fold `papers` into a cache delta.
///
/// Every paper counts towards the scope-wide paper count and keyword
/// totals. A paper whose timestamp does not parse is left out of every
/// bucket. Each keyword counts at most once per paper.
pub fn aggregate(
  previous: &AnalysisWatermark,
  papers: &[(CanonicalPaper, Vec<String>)],
  committed_at: DateTime<Utc>,
) -> (AnalysisWatermark, CacheDelta, AggregationStats) {
  let mut delta = CacheDelta::default();
  let mut stats = AggregationStats::default();

  for (paper, keywords) in papers {
    let keywords: BTreeSet<&str> = keywords.iter().map(String::as_str).collect();
    stats.papers += 1;
    delta.paper_count += 1;
    for keyword in &keywords {
      *delta.keyword_totals.entry((*keyword).to_owned()).or_default() += 1;
    }

    let date = match bucket_date(paper) {
      Ok((date, fallback)) => {
        if fallback {
          stats.timestamp_fallbacks += 1;
        }
        date
      }
      Err(e) => {
        warn!("{e}");
        stats.bucket_format_errors += 1;
        continue;
      }
    };

    for granularity in Granularity::iter() {
      let bucket = BucketRef { granularity, bucket: granularity.label(date) };
      *delta.bucket_papers.entry(bucket.clone()).or_default() += 1;
      let slot = delta.entries.entry(bucket).or_default();
      for keyword in &keywords {
        *slot.entry((*keyword).to_owned()).or_default() += 1;
      }
    }
  }

  let newest = papers.iter().map(|(p, _)| p.first_seen_at).max();
  (previous.advanced_to(newest, committed_at), delta, stats)
}

/// `(child, parent)` pairs whose bucket sums must agree.
pub const NESTING: [(Granularity, Granularity); 3] = [
  (Granularity::Day, Granularity::Month),
  (Granularity::Month, Granularity::Year),
  (Granularity::Day, Granularity::Week),
];

/// Compare every parent bucket with the sum of its child buckets.
///
/// Returns one [`CoreError::CacheConsistency`] per disagreeing
/// `(keyword, parent bucket)`.
pub fn check_consistency(
  scope: &ScopeKey,
  entries: &HashMap<Granularity, Vec<TrendCacheEntry>>,
) -> Vec<CoreError> {
  let empty = Vec::new();
  let mut violations = Vec::new();

  for (child, parent) in NESTING {
    let mut sums: BTreeMap<(String, String), u64> = BTreeMap::new();
    for entry in entries.get(&child).unwrap_or(&empty) {
      match child.parent_label(&entry.bucket, parent) {
        Ok(Some(label)) => {
          *sums.entry((entry.keyword.clone(), label)).or_default() += entry.count;
        }
        Ok(None) => {}
        Err(e) => warn!(%scope, "{e}"),
      }
    }

    let mut parents: BTreeMap<(String, String), u64> = entries
      .get(&parent)
      .unwrap_or(&empty)
      .iter()
      .map(|e| ((e.keyword.clone(), e.bucket.clone()), e.count))
      .collect();
    for key in sums.keys() {
      parents.entry(key.clone()).or_insert(0);
    }

    for ((keyword, bucket), parent_count) in parents {
      let child_sum = sums.get(&(keyword.clone(), bucket.clone())).copied().unwrap_or(0);
      if child_sum != parent_count {
        violations.push(CoreError::CacheConsistency {
          scope: scope.clone(),
          keyword,
          parent,
          child,
          bucket,
          parent_count,
          child_sum,
        });
      }
    }
  }
  violations
}
