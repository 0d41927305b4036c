//! Emerging-topic detection over the trend cache.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use papertrend_core::trend::{EmergingRecord, ScopeKey, Trend, TrendCacheEntry};

use crate::{EmergingConfig, Result};

/// Floor for the previous-window count in the growth ratio.
pub const EPSILON: f64 = 1e-9;

/// `recent / max(ε, previous)`, or `+∞` when the keyword is new in the
/// recent window.
pub fn growth_rate(recent: u64, previous: u64) -> f64 {
  if previous == 0 {
    return if recent > 0 { f64::INFINITY } else { 0.0 };
  }
  recent as f64 / (previous as f64).max(EPSILON)
}

pub fn classify(growth: f64, recent: u64, params: &EmergingConfig) -> Trend {
  if growth >= params.rising_threshold && recent >= params.min_support {
    Trend::Rising
  } else if growth <= params.declining_threshold {
    Trend::Declining
  } else {
    Trend::Stable
  }
}

#[derive(Default)]
struct Tally {
  recent:     u64,
  previous:   u64,
  first_seen: Option<(NaiveDate, String)>,
}

/// Classify every keyword observed in `entries`.
///
/// `entries` are the scope's cache rows at `params.granularity`. The recent
/// window ends at the latest bucket with a non-zero count and spans
/// `params.window` contiguous buckets; the previous window is the same
/// length immediately before it. Buckets missing from the cache count as
/// zero. Keywords never observed with a non-zero count yield no record.
pub fn detect(
  scope: &ScopeKey,
  entries: &[TrendCacheEntry],
  params: &EmergingConfig,
  now: DateTime<Utc>,
) -> Result<Vec<EmergingRecord>> {
  let g = params.granularity;
  let dated = entries
    .iter()
    .filter(|e| e.granularity == g)
    .map(|e| Ok((g.bucket_start(&e.bucket)?, e)))
    .collect::<Result<Vec<_>>>()?;

  let Some(latest) = dated.iter().filter(|(_, e)| e.count > 0).map(|(d, _)| *d).max() else {
    return Ok(Vec::new());
  };
  let window = i32::try_from(params.window.max(1)).unwrap_or(i32::MAX);
  let recent_start = g.shift(latest, 1 - window).unwrap_or(NaiveDate::MIN);
  let previous_start = g
    .shift(latest, 1 - window.saturating_mul(2))
    .unwrap_or(NaiveDate::MIN);

  let mut tallies: BTreeMap<&str, Tally> = BTreeMap::new();
  for (start, entry) in &dated {
    if entry.count == 0 {
      continue;
    }
    let tally = tallies.entry(entry.keyword.as_str()).or_default();
    if (recent_start..=latest).contains(start) {
      tally.recent += entry.count;
    } else if (previous_start..recent_start).contains(start) {
      tally.previous += entry.count;
    }
    if tally.first_seen.as_ref().is_none_or(|(d, _)| start < d) {
      tally.first_seen = Some((*start, entry.bucket.clone()));
    }
  }

  Ok(
    tallies
      .into_iter()
      .filter_map(|(keyword, t)| {
        let (_, first_seen) = t.first_seen?;
        let growth = growth_rate(t.recent, t.previous);
        Some(EmergingRecord {
          scope: scope.clone(),
          keyword: keyword.to_owned(),
          granularity: g,
          growth_rate: growth,
          recent_count: t.recent,
          previous_count: t.previous,
          first_seen,
          trend: classify(growth, t.recent, params),
          updated_at: now,
        })
      })
      .collect(),
  )
}
