//! Structuring and analysis pipeline for papertrend.
//!
//! Turns the append-only raw feed into canonical papers
//! ([`structuring`]), decides what needs recomputing ([`gate`]), folds
//! keyword counts into the trend cache ([`aggregate`]), and classifies
//! emerging keywords ([`emerging`]). [`runner::Pipeline`] ties the stages
//! into one batch run over any [`papertrend_core::store::PipelineStore`].

pub mod aggregate;
pub mod emerging;
pub mod error;
pub mod fingerprint;
pub mod gate;
pub mod identity;
pub mod import;
pub mod keywords;
pub mod normalize;
pub mod runner;
pub mod structuring;
pub mod venue;

pub use error::{Error, Result};

use std::path::PathBuf;

use papertrend_core::trend::Granularity;
use serde::Deserialize;

// ─── Configuration ────────────────────────────────────────────────────────────

/// Runtime configuration, deserialised from `papertrend.toml` and
/// `PAPERTREND_*` environment variables.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct PipelineConfig {
  pub store_path:             PathBuf,
  /// Category scopes maintained alongside `global` and every venue.
  pub categories:             Vec<String>,
  /// Papers per aggregation commit.
  pub batch_size:             usize,
  /// Raw records per structuring commit.
  pub structuring_batch_size: usize,
  /// Size of the materialised top-keyword blobs.
  pub top_n:                  usize,
  pub keywords_per_paper:     usize,
  pub fuzzy_threshold:        f64,
  pub emerging:               EmergingConfig,
  /// Keyword extraction endpoint. Without one, extraction is unavailable
  /// and papers fall through to the frequency tier.
  pub extractor_url:          Option<String>,
  pub extractor_timeout_secs: u64,
  /// A feed whose newest record is older than this is treated as stale.
  pub max_feed_age_hours:     Option<u64>,
  pub time_budget_secs:       Option<u64>,
  pub host:                   String,
  pub port:                   u16,
}

impl Default for PipelineConfig {
  fn default() -> Self {
    Self {
      store_path:             PathBuf::from("~/.local/share/papertrend/papertrend.db"),
      categories:             ["cs.LG", "cs.CV", "cs.CL", "cs.AI"]
        .map(str::to_owned)
        .to_vec(),
      batch_size:             200,
      structuring_batch_size: 500,
      top_n:                  300,
      keywords_per_paper:     10,
      fuzzy_threshold:        0.92,
      emerging:               EmergingConfig::default(),
      extractor_url:          None,
      extractor_timeout_secs: 30,
      max_feed_age_hours:     None,
      time_budget_secs:       None,
      host:                   "127.0.0.1".to_owned(),
      port:                   8080,
    }
  }
}

/// Emerging-topic window parameters.
#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct EmergingConfig {
  pub granularity:         Granularity,
  /// Buckets per window; the recent and previous windows are adjacent.
  pub window:              u32,
  pub min_support:         u64,
  pub rising_threshold:    f64,
  pub declining_threshold: f64,
}

impl Default for EmergingConfig {
  fn default() -> Self {
    Self {
      granularity:         Granularity::Day,
      window:              7,
      min_support:         5,
      rising_threshold:    1.5,
      declining_threshold: 0.67,
    }
  }
}

#[cfg(test)]
mod tests;
