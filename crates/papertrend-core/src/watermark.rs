//! The per-scope analysis watermark.
//!
//! A watermark is a value object: runs receive the previous one and return
//! a new one. It is persisted only together with the cache writes it
//! describes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Last-processed markers for one scope.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisWatermark {
  /// Greatest `first_seen_at` folded into the cache.
  pub max_timestamp: Option<DateTime<Utc>>,
  /// Canonical paper count in scope when the last full delta committed.
  pub paper_count:   Option<u64>,
  /// When the cache for this scope last committed.
  pub updated_at:    Option<DateTime<Utc>>,
}

impl AnalysisWatermark {
  /// No run has ever committed for this scope.
  pub fn is_empty(&self) -> bool {
    self.max_timestamp.is_none() && self.paper_count.is_none()
  }

  /// A copy advanced to include `timestamp`. The timestamp never moves
  /// backwards.
  pub fn advanced_to(
    &self,
    timestamp: Option<DateTime<Utc>>,
    committed_at: DateTime<Utc>,
  ) -> Self {
    Self {
      max_timestamp: self.max_timestamp.max(timestamp),
      paper_count:   self.paper_count,
      updated_at:    Some(committed_at),
    }
  }

  /// A copy recording that the whole delta for `paper_count` papers has
  /// been committed.
  pub fn completed(&self, paper_count: u64) -> Self {
    Self { paper_count: Some(paper_count), ..self.clone() }
  }
}

#[cfg(test)]
mod tests {
  use chrono::TimeZone;

  use super::*;

  #[test]
  fn advancing_never_moves_backwards() {
    let t1 = Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap();
    let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    let now = Utc::now();

    let wm = AnalysisWatermark::default().advanced_to(Some(t1), now);
    assert_eq!(wm.max_timestamp, Some(t1));

    let back = wm.advanced_to(Some(t0), now);
    assert_eq!(back.max_timestamp, Some(t1));

    let none = wm.advanced_to(None, now);
    assert_eq!(none.max_timestamp, Some(t1));
  }

  #[test]
  fn empty_until_first_commit() {
    let wm = AnalysisWatermark::default();
    assert!(wm.is_empty());
    assert!(!wm.completed(0).is_empty());
  }
}
