//! Pipeline run bookkeeping.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Serialize,
  Deserialize,
  Display,
  EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RunStatus {
  Completed,
  /// The feed was stale or unreachable; nothing ran.
  Skipped,
  /// Stopped by the time budget after committing some batches.
  Partial,
  Failed,
}

/// One row of the run log, written when a run ends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
  pub run_id:               Uuid,
  pub started_at:           DateTime<Utc>,
  pub finished_at:          DateTime<Utc>,
  pub status:               RunStatus,
  /// At least one paper fell back past an unavailable extractor.
  pub degraded:             bool,
  pub degraded_papers:      u64,
  /// Papers bucketed by `retrieved_at` because `published_at` was missing.
  pub timestamp_fallbacks:  u64,
  pub bucket_format_errors: u64,
  pub papers_processed:     u64,
  pub note:                 Option<String>,
}

impl RunRecord {
  pub fn started(started_at: DateTime<Utc>) -> Self {
    Self {
      run_id: Uuid::new_v4(),
      started_at,
      finished_at: started_at,
      status: RunStatus::Completed,
      degraded: false,
      degraded_papers: 0,
      timestamp_fallbacks: 0,
      bucket_format_errors: 0,
      papers_processed: 0,
      note: None,
    }
  }
}
