//! Error types for `papertrend-core`.
//!
//! Every variant except [`Error::WatermarkCommit`] is non-fatal for a run:
//! callers record it and carry on with the next record, tier, or schedule.

use thiserror::Error;
use uuid::Uuid;

use crate::trend::{Granularity, ScopeKey};

#[derive(Debug, Error)]
pub enum Error {
  /// The raw feed could not be read, or its newest record is too old.
  #[error("ingestion gap: {0}")]
  IngestionGap(String),

  #[error("raw record {raw_id} matches {} candidates ambiguously", candidates.len())]
  AmbiguousMatch { raw_id: i64, candidates: Vec<Uuid> },

  #[error("keyword extraction unavailable: {0}")]
  ExtractionUnavailable(String),

  #[error("unparseable timestamp {value:?} on paper {paper_id}")]
  BucketFormat { paper_id: Uuid, value: String },

  #[error("cache commit failed for {scope}: {reason}")]
  WatermarkCommit { scope: ScopeKey, reason: String },

  #[error(
    "cache inconsistency in {scope} for {keyword:?}: {child} sum over \
     {bucket} is {child_sum}, {parent} bucket holds {parent_count}"
  )]
  CacheConsistency {
    scope:        ScopeKey,
    keyword:      String,
    parent:       Granularity,
    child:        Granularity,
    bucket:       String,
    parent_count: u64,
    child_sum:    u64,
  },

  #[error("invalid bucket label {label:?} for granularity {granularity}")]
  InvalidBucketLabel { granularity: Granularity, label: String },

  #[error("unknown discriminant: {0:?}")]
  UnknownDiscriminant(String),

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
