//! Store traits for the three logical stores and their commit types.
//!
//! - [`RawFeed`]: the append-only raw record feed.
//! - [`CanonicalStore`]: canonical papers, source links, conflicts, and
//!   persisted per-paper keywords.
//! - [`TrendStore`] / [`TrendReader`]: the trend cache, watermarks, and run
//!   log. The serving layer depends on [`TrendReader`] only.
//!
//! Backends (e.g. `papertrend-store-sqlite`) implement all of them; the
//! pipeline depends on the traits, not on any concrete backend.

use std::{
  collections::{BTreeMap, HashMap, HashSet},
  future::Future,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
  paper::{CanonicalPaper, MatchConflict, PaperKeyword, SourceLink},
  record::{NewRawRecord, RawRecord},
  run::RunRecord,
  trend::{
    BucketSummary, EmergingRecord, Granularity, KeywordCount, ScopeKey,
    ScopeSummary, TrendCacheEntry,
  },
  watermark::AnalysisWatermark,
};

// ─── Query & commit types ────────────────────────────────────────────────────

/// Health of the raw feed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeedStatus {
  pub record_count:     u64,
  pub max_retrieved_at: Option<DateTime<Utc>>,
}

/// Change-detection signals for one scope.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScopeStats {
  pub paper_count:       u64,
  pub max_first_seen_at: Option<DateTime<Utc>>,
  /// Already-folded papers that have since left the scope or changed
  /// bucket. Any such paper forces a full rebuild.
  pub stale:             u64,
}

/// Everything one structuring batch writes, committed atomically.
#[derive(Debug, Clone, Default)]
pub struct StructuringBatch {
  /// New or refined papers, written as upserts.
  pub papers:             Vec<CanonicalPaper>,
  pub links:              Vec<SourceLink>,
  /// Conflicts to record (upserted by `raw_id`).
  pub conflicts:          Vec<MatchConflict>,
  /// Conflicts settled by this batch.
  pub resolved_conflicts: Vec<i64>,
}

impl StructuringBatch {
  pub fn is_empty(&self) -> bool {
    self.papers.is_empty()
      && self.links.is_empty()
      && self.conflicts.is_empty()
      && self.resolved_conflicts.is_empty()
  }
}

/// A `(granularity, bucket)` pair within a scope.
#[derive(
  Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct BucketRef {
  pub granularity: Granularity,
  pub bucket:      String,
}

/// Count changes for one scope, produced by aggregation.
///
/// In [`CommitMode::Add`] the numbers are increments; in
/// [`CommitMode::Replace`] they are absolute values.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheDelta {
  /// `bucket → keyword → count`.
  pub entries:        BTreeMap<BucketRef, BTreeMap<String, u64>>,
  /// `bucket → papers bucketed there`.
  pub bucket_papers:  BTreeMap<BucketRef, u64>,
  /// Scope-wide keyword totals, including unbucketable papers.
  pub keyword_totals: BTreeMap<String, u64>,
  /// Scope-wide paper count, including unbucketable papers.
  pub paper_count:    u64,
}

impl CacheDelta {
  pub fn is_empty(&self) -> bool {
    self.paper_count == 0 && self.entries.is_empty()
  }

  /// Fold `other` into `self` additively.
  pub fn absorb(&mut self, other: CacheDelta) {
    for (bucket, keywords) in other.entries {
      let slot = self.entries.entry(bucket).or_default();
      for (keyword, count) in keywords {
        *slot.entry(keyword).or_default() += count;
      }
    }
    for (bucket, count) in other.bucket_papers {
      *self.bucket_papers.entry(bucket).or_default() += count;
    }
    for (keyword, count) in other.keyword_totals {
      *self.keyword_totals.entry(keyword).or_default() += count;
    }
    self.paper_count += other.paper_count;
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitMode {
  /// Add the delta to existing counts and extend the processed ledger.
  Add,
  /// Overwrite every count in scope (zeroing rows the delta lacks) and
  /// replace the processed ledger.
  Replace,
}

/// One transactional cache write.
#[derive(Debug, Clone)]
pub struct CacheCommit {
  pub scope:     ScopeKey,
  pub mode:      CommitMode,
  pub delta:     CacheDelta,
  /// Papers folded into the cache by this commit.
  pub processed: Vec<Uuid>,
  /// Watermark to persist alongside the counts.
  pub watermark: AnalysisWatermark,
  /// Size of the materialised top-keyword blobs.
  pub top_n:     usize,
}

/// Freshness information for dashboards.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Freshness {
  pub last_updated: Option<DateTime<Utc>>,
  pub last_run:     Option<RunRecord>,
}

// ─── Raw feed ────────────────────────────────────────────────────────────────

/// The append-only raw record feed.
pub trait RawFeed: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  /// Append a record. Returns `None` if `(source, source_id)` already
  /// exists; the stored record is never modified.
  fn append(
    &self,
    record: NewRawRecord,
  ) -> impl Future<Output = Result<Option<RawRecord>, Self::Error>> + Send + '_;

  fn get_raw(
    &self,
    raw_id: i64,
  ) -> impl Future<Output = Result<Option<RawRecord>, Self::Error>> + Send + '_;

  /// Records with `retrieved_at` strictly after `after` (all when `None`),
  /// in insertion order.
  fn retrieved_after(
    &self,
    after: Option<DateTime<Utc>>,
    limit: usize,
  ) -> impl Future<Output = Result<Vec<RawRecord>, Self::Error>> + Send + '_;

  fn feed_status(
    &self,
  ) -> impl Future<Output = Result<FeedStatus, Self::Error>> + Send + '_;
}

// ─── Canonical store ─────────────────────────────────────────────────────────

/// Canonical papers, links, conflicts, and persisted keywords.
pub trait CanonicalStore: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  /// Raw records with `raw_id > after_raw_id` that are neither linked nor
  /// parked in an open [`MatchConflict`], in insertion order.
  fn unlinked_raw_records(
    &self,
    after_raw_id: i64,
    limit: usize,
  ) -> impl Future<Output = Result<Vec<RawRecord>, Self::Error>> + Send + '_;

  /// Every canonical paper, ordered by founding `raw_id`.
  fn load_papers(
    &self,
  ) -> impl Future<Output = Result<Vec<CanonicalPaper>, Self::Error>> + Send + '_;

  fn get_paper(
    &self,
    paper_id: Uuid,
  ) -> impl Future<Output = Result<Option<CanonicalPaper>, Self::Error>> + Send + '_;

  fn links_for(
    &self,
    paper_id: Uuid,
  ) -> impl Future<Output = Result<Vec<SourceLink>, Self::Error>> + Send + '_;

  /// Every source link, ordered by `raw_id`.
  fn all_links(
    &self,
  ) -> impl Future<Output = Result<Vec<SourceLink>, Self::Error>> + Send + '_;

  /// Write one structuring batch atomically.
  fn commit_structuring(
    &self,
    batch: StructuringBatch,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  fn conflicts(
    &self,
  ) -> impl Future<Output = Result<Vec<MatchConflict>, Self::Error>> + Send + '_;

  /// Aggregatable papers in `scope`, ordered by `(first_seen_at, paper_id)`.
  fn papers_in_scope(
    &self,
    scope: ScopeKey,
  ) -> impl Future<Output = Result<Vec<CanonicalPaper>, Self::Error>> + Send + '_;

  fn scope_stats(
    &self,
    scope: ScopeKey,
  ) -> impl Future<Output = Result<ScopeStats, Self::Error>> + Send + '_;

  /// Distinct canonical venue names referenced by aggregatable papers.
  fn venues_in_use(
    &self,
  ) -> impl Future<Output = Result<Vec<String>, Self::Error>> + Send + '_;

  fn stored_keywords(
    &self,
    paper_ids: Vec<Uuid>,
  ) -> impl Future<Output = Result<HashMap<Uuid, Vec<String>>, Self::Error>> + Send + '_;

  fn save_keywords(
    &self,
    keywords: Vec<PaperKeyword>,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;
}

// ─── Trend cache ─────────────────────────────────────────────────────────────

/// Read-only query surface consumed by the serving layer.
pub trait TrendReader: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  /// Every scope with a summary, ordered by scope.
  fn list_scopes(
    &self,
  ) -> impl Future<Output = Result<Vec<ScopeSummary>, Self::Error>> + Send + '_;

  /// Bucket summaries for `scope` at `granularity`, ordered by bucket.
  fn timeseries(
    &self,
    scope: ScopeKey,
    granularity: Granularity,
  ) -> impl Future<Output = Result<Vec<BucketSummary>, Self::Error>> + Send + '_;

  /// Ranked keywords for a bucket, or scope-wide when `bucket` is `None`.
  fn top_keywords(
    &self,
    scope: ScopeKey,
    bucket: Option<BucketRef>,
    limit: usize,
  ) -> impl Future<Output = Result<Vec<KeywordCount>, Self::Error>> + Send + '_;

  /// Emerging records ranked rising first, then by growth and volume.
  fn emerging(
    &self,
    scope: ScopeKey,
    limit: usize,
  ) -> impl Future<Output = Result<Vec<EmergingRecord>, Self::Error>> + Send + '_;

  /// Last commit time for `scope` (any scope when `None`) and the latest
  /// run record.
  fn freshness(
    &self,
    scope: Option<ScopeKey>,
  ) -> impl Future<Output = Result<Freshness, Self::Error>> + Send + '_;
}

/// Write side of the trend cache, used only by the pipeline.
pub trait TrendStore: TrendReader {
  fn watermark(
    &self,
    scope: ScopeKey,
  ) -> impl Future<Output = Result<AnalysisWatermark, <Self as TrendReader>::Error>>
  + Send
  + '_;

  /// Ids already folded into the cache for `scope`.
  fn processed_papers(
    &self,
    scope: ScopeKey,
  ) -> impl Future<Output = Result<HashSet<Uuid>, <Self as TrendReader>::Error>>
  + Send
  + '_;

  /// Apply counts, ledger, summaries, and watermark in one transaction.
  fn commit_cache(
    &self,
    commit: CacheCommit,
  ) -> impl Future<Output = Result<(), <Self as TrendReader>::Error>> + Send + '_;

  /// Every cache entry for `scope` at `granularity`.
  fn trend_entries(
    &self,
    scope: ScopeKey,
    granularity: Granularity,
  ) -> impl Future<Output = Result<Vec<TrendCacheEntry>, <Self as TrendReader>::Error>>
  + Send
  + '_;

  /// Upsert emerging records by `(scope, keyword)`. Existing records absent
  /// from `records` are left untouched.
  fn upsert_emerging(
    &self,
    records: Vec<EmergingRecord>,
  ) -> impl Future<Output = Result<(), <Self as TrendReader>::Error>> + Send + '_;

  fn record_run(
    &self,
    run: RunRecord,
  ) -> impl Future<Output = Result<(), <Self as TrendReader>::Error>> + Send + '_;
}

/// A backend holding all three logical stores.
pub trait PipelineStore: RawFeed + CanonicalStore + TrendStore {}

impl<T> PipelineStore for T where T: RawFeed + CanonicalStore + TrendStore {}
