//! End-to-end pipeline scenarios against an in-memory `SqliteStore`.

use std::{
  collections::{HashMap, HashSet},
  sync::atomic::{AtomicUsize, Ordering},
};

use chrono::{DateTime, TimeZone, Utc};
use papertrend_core::{
  Error as CoreError,
  paper::{CanonicalPaper, MatchConflict, MatchReason, PaperKeyword, QualityFlag, SourceLink},
  record::{NewRawRecord, RawRecord, Source},
  run::{RunRecord, RunStatus},
  store::{
    BucketRef, CacheCommit, CanonicalStore, FeedStatus, Freshness, RawFeed, ScopeStats,
    StructuringBatch, TrendReader, TrendStore,
  },
  trend::{
    BucketSummary, EmergingRecord, Granularity, KeywordCount, ScopeKey, ScopeSummary,
    TrendCacheEntry,
  },
  watermark::AnalysisWatermark,
};
use papertrend_store_sqlite::{Error as StoreError, SqliteStore};
use uuid::Uuid;

use crate::{
  Error, PipelineConfig,
  import::import_lines,
  runner::{Pipeline, RunOptions},
  structuring::{ConflictDecision, StructuringOptions, run_structuring},
  venue::PatternRegistry,
};

async fn store() -> SqliteStore {
  SqliteStore::open_in_memory()
    .await
    .expect("in-memory store")
}

fn at(month: u32, day: u32) -> DateTime<Utc> {
  Utc.with_ymd_and_hms(2024, month, day, 9, 0, 0).unwrap()
}

fn arxiv(id: &str, title: &str, day: u32) -> NewRawRecord {
  NewRawRecord {
    year: Some(2024),
    categories: vec!["cs.LG".into()],
    abstract_text: "Denoising score matching; denoising at scale.".into(),
    published_at: Some(format!("2024-02-{day:02}")),
    ..NewRawRecord::new(Source::Arxiv, id, title, at(2, day))
  }
}

async fn append_all(s: &SqliteStore, records: Vec<NewRawRecord>) {
  for rec in records {
    s.append(rec).await.unwrap().expect("new record");
  }
}

async fn structure(s: &SqliteStore) -> crate::structuring::StructuringReport {
  let registry = PatternRegistry::builtin().unwrap();
  run_structuring(s, &registry, &StructuringOptions::default()).await.unwrap()
}

fn pipeline(s: SqliteStore) -> Pipeline<SqliteStore> {
  let config = PipelineConfig { extractor_url: None, ..Default::default() };
  Pipeline::from_config(s, config).unwrap()
}

const RUN: RunOptions = RunOptions { force: false, structure: true };

// ── Structuring ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn shared_doi_yields_one_paper() {
  let s = store().await;
  append_all(&s, vec![
    NewRawRecord {
      doi: Some("10.5555/ddpm.2024".into()),
      ..arxiv("2402.00001", "Denoising Diffusion at Scale", 1)
    },
    NewRawRecord {
      doi: Some("https://doi.org/10.5555/DDPM.2024".into()),
      year: Some(2024),
      ..NewRawRecord::new(Source::OpenAlex, "W123", "Scaling denoising diffusion", at(2, 3))
    },
  ])
  .await;

  let report = structure(&s).await;
  assert_eq!((report.created, report.linked), (1, 1));

  let papers = s.load_papers().await.unwrap();
  assert_eq!(papers.len(), 1);
  let links = s.links_for(papers[0].paper_id).await.unwrap();
  assert_eq!(links.len(), 2);
  assert_eq!(links[1].match_reason, MatchReason::Doi);
}

#[tokio::test]
async fn openreview_record_joins_its_preprint() {
  let s = store().await;
  append_all(&s, vec![
    arxiv("2402.00001", "Sparse Mixture of Experts for Vision", 1),
    arxiv("2402.00002", "Retrieval Augmented Code Generation", 2),
    arxiv("2402.00003", "Graph Neural Networks under Distribution Shift", 3),
    NewRawRecord {
      year: Some(2024),
      venue_raw: Some("ICLR 2024".into()),
      ..NewRawRecord::new(
        Source::OpenReview,
        "or-abc",
        "Retrieval-Augmented Code Generation",
        at(2, 10),
      )
    },
  ])
  .await;

  let report = structure(&s).await;
  assert_eq!((report.created, report.linked, report.ambiguous), (3, 1, 0));

  let papers = s.load_papers().await.unwrap();
  assert_eq!(papers.len(), 3);
  let rag = papers
    .iter()
    .find(|p| p.canonical_title == "retrieval augmented code generation")
    .unwrap();
  assert_eq!(rag.venue.as_deref(), Some("ICLR"));
  assert_eq!(rag.venue_source, Some(Source::OpenReview));
  assert_eq!(rag.quality_flag, QualityFlag::Accepted);
  assert_eq!(rag.primary_source, Source::Arxiv);

  let links = s.links_for(rag.paper_id).await.unwrap();
  assert_eq!(links.len(), 2);
  assert_eq!(links[1].match_reason, MatchReason::ExactTitleYear);
}

#[tokio::test]
async fn restructuring_an_unchanged_feed_is_a_no_op() {
  let s = store().await;
  append_all(&s, vec![
    arxiv("2402.00001", "Sparse Mixture of Experts for Vision", 1),
    arxiv("2402.00001v2", "Sparse Mixture of Experts for Vision", 2),
    NewRawRecord::new(Source::Arxiv, "2402.09999", "   ", at(2, 4)),
  ])
  .await;

  let first = structure(&s).await;
  assert_eq!(first.processed, 3);
  assert_eq!(first.skipped_empty_title, 1);

  let second = structure(&s).await;
  assert_eq!(second.created + second.linked + second.ambiguous, 0);
  assert_eq!(second.fingerprint, first.fingerprint);
}

// ── Conflicts ───────────────────────────────────────────────────────────────

/// Two distinct papers plus one record within fuzzy range of both.
async fn ambiguous_feed() -> SqliteStore {
  let s = store().await;
  append_all(&s, vec![
    arxiv("2402.00001", "Diffusion Models Beat GANs on Image Synthesis", 1),
    arxiv("2402.00002", "Diffusion Models Beat GANs on Video Synthesis", 2),
    NewRawRecord {
      year: Some(2024),
      ..NewRawRecord::new(
        Source::OpenReview,
        "or-typo",
        "Diffusion Models Beat GANs on Viage Synthesis",
        at(2, 5),
      )
    },
  ])
  .await;
  s
}

#[tokio::test]
async fn ambiguous_record_is_parked_not_merged() {
  let s = ambiguous_feed().await;
  let report = structure(&s).await;
  assert_eq!((report.created, report.ambiguous), (2, 1));

  let papers = s.load_papers().await.unwrap();
  assert_eq!(papers.len(), 2);
  assert!(papers.iter().all(|p| p.quality_flag == QualityFlag::Ambiguous));

  let conflicts = s.conflicts().await.unwrap();
  assert_eq!(conflicts.len(), 1);
  assert_eq!(conflicts[0].candidates.len(), 2);

  // Parked records are not retried.
  let again = structure(&s).await;
  assert_eq!(again.processed, 0);
}

#[tokio::test]
async fn attaching_a_conflict_links_the_record() {
  let s = ambiguous_feed().await;
  structure(&s).await;
  let conflict = s.conflicts().await.unwrap().remove(0);
  let target = conflict.candidates[0];

  let p = pipeline(s);
  let link = p.resolve(conflict.raw_id, ConflictDecision::Attach(target)).await.unwrap();
  assert_eq!(link.paper_id, target);
  assert_eq!(link.match_reason, MatchReason::OperatorResolved);

  let s = p.store();
  assert!(s.conflicts().await.unwrap().is_empty());
  assert_eq!(s.links_for(target).await.unwrap().len(), 2);
  assert_eq!(s.load_papers().await.unwrap().len(), 2);
  assert!(matches!(
    p.resolve(conflict.raw_id, ConflictDecision::Distinct).await,
    Err(Error::NoConflict(_))
  ));
}

#[tokio::test]
async fn distinct_conflict_founds_a_paper() {
  let s = ambiguous_feed().await;
  structure(&s).await;
  let conflict = s.conflicts().await.unwrap().remove(0);

  let p = pipeline(s);
  let link = p.resolve(conflict.raw_id, ConflictDecision::Distinct).await.unwrap();
  assert_eq!(link.match_reason, MatchReason::Origin);
  assert_eq!(p.store().load_papers().await.unwrap().len(), 3);
  assert!(p.store().conflicts().await.unwrap().is_empty());
}

// ── Import ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn import_skips_duplicates_and_blank_lines() {
  let s = store().await;
  let feed = concat!(
    r#"{"source":"arxiv","source_id":"2402.00001","title":"A","retrieved_at":"2024-02-01T00:00:00Z"}"#,
    "\n\n",
    r#"{"source":"s2","source_id":"abc","title":"B","year":2024,"retrieved_at":"2024-02-02T00:00:00Z"}"#,
    "\n",
    r#"{"source":"arxiv","source_id":"2402.00001","title":"A again","retrieved_at":"2024-02-03T00:00:00Z"}"#,
    "\n",
  );
  let report = import_lines(&s, feed.as_bytes()).await.unwrap();
  assert_eq!((report.read, report.appended, report.duplicates), (3, 2, 1));
  assert_eq!(s.feed_status().await.unwrap().record_count, 2);
}

#[tokio::test]
async fn malformed_line_reports_its_number() {
  let s = store().await;
  let feed = concat!(
    r#"{"source":"arxiv","source_id":"1","title":"A","retrieved_at":"2024-02-01T00:00:00Z"}"#,
    "\n",
    "{not json}\n",
  );
  match import_lines(&s, feed.as_bytes()).await {
    Err(Error::Import { line, .. }) => assert_eq!(line, 2),
    other => panic!("expected import error, got {other:?}"),
  }
  assert_eq!(s.feed_status().await.unwrap().record_count, 1);
}

// ── Runs ────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn empty_feed_skips_the_run() {
  let p = pipeline(store().await);
  let report = p.run(RUN).await.unwrap();
  assert_eq!(report.run.status, RunStatus::Skipped);
  assert!(report.scopes.is_empty());

  let freshness = p.store().freshness(None).await.unwrap();
  assert_eq!(freshness.last_updated, None);
  assert_eq!(freshness.last_run.map(|r| r.status), Some(RunStatus::Skipped));
}

#[tokio::test]
async fn unavailable_extractor_degrades_but_completes() {
  let s = store().await;
  append_all(&s, vec![
    arxiv("2402.00001", "Sparse Mixture of Experts for Vision", 1),
    arxiv("2402.00002", "Retrieval Augmented Code Generation", 3),
  ])
  .await;

  let p = pipeline(s);
  let report = p.run(RUN).await.unwrap();
  assert_eq!(report.run.status, RunStatus::Completed);
  assert!(report.run.degraded);
  assert_eq!(report.run.degraded_papers, 2);
  assert_eq!(report.run.papers_processed, 2);

  let top = p
    .store()
    .top_keywords(ScopeKey::global(), None, 5)
    .await
    .unwrap();
  assert_eq!(top[0].keyword, "denoising");
  assert_eq!(top[0].count, 2);
}

#[tokio::test]
async fn february_days_add_up_to_the_month() {
  let s = store().await;
  append_all(&s, vec![
    arxiv("2402.00001", "Sparse Mixture of Experts for Vision", 1),
    arxiv("2402.00002", "Retrieval Augmented Code Generation", 3),
    arxiv("2402.00003", "Graph Neural Networks under Distribution Shift", 3),
    arxiv("2402.00004", "Tokenizer Free Language Modelling", 29),
  ])
  .await;

  let p = pipeline(s);
  let report = p.run(RUN).await.unwrap();
  assert!(report.scopes.iter().all(|r| r.violations == 0));

  let s = p.store();
  let days = s.trend_entries(ScopeKey::global(), Granularity::Day).await.unwrap();
  let months = s.trend_entries(ScopeKey::global(), Granularity::Month).await.unwrap();
  let feb_days: u64 = days
    .iter()
    .filter(|e| e.keyword == "denoising" && e.bucket.starts_with("2024-02"))
    .map(|e| e.count)
    .sum();
  let feb = months
    .iter()
    .find(|e| e.keyword == "denoising" && e.bucket == "2024-02")
    .unwrap();
  assert_eq!(feb_days, 4);
  assert_eq!(feb.count, feb_days);

  let series = s.timeseries(ScopeKey::global(), Granularity::Day).await.unwrap();
  let labels: Vec<_> = series.iter().map(|b| b.bucket.as_str()).collect();
  assert_eq!(labels, ["2024-02-01", "2024-02-03", "2024-02-29"]);
  assert_eq!(series[1].paper_count, 2);
}

#[tokio::test]
async fn watermark_advances_and_clean_scopes_are_skipped() {
  let s = store().await;
  append_all(&s, vec![arxiv("2402.00001", "Sparse Mixture of Experts for Vision", 1)]).await;
  let p = pipeline(s);

  let first = p.run(RUN).await.unwrap();
  let global = &first.scopes[0];
  assert_eq!(global.scope, ScopeKey::global());
  assert!(global.rebuild);
  let wm1 = p.store().watermark(ScopeKey::global()).await.unwrap();
  assert_eq!(wm1.paper_count, Some(1));
  assert_eq!(wm1.max_timestamp, Some(at(2, 1)));

  p.store()
    .append(arxiv("2402.00002", "Retrieval Augmented Code Generation", 9))
    .await
    .unwrap();
  let second = p.run(RUN).await.unwrap();
  let global = &second.scopes[0];
  assert!(global.dirty && !global.rebuild);
  assert_eq!(global.papers, 1);
  let wm2 = p.store().watermark(ScopeKey::global()).await.unwrap();
  assert_eq!(wm2.paper_count, Some(2));
  assert_eq!(wm2.max_timestamp, Some(at(2, 9)));
  assert!(wm2.updated_at >= wm1.updated_at);

  let third = p.run(RUN).await.unwrap();
  assert!(third.scopes.iter().all(|r| !r.dirty));
  assert_eq!(p.store().watermark(ScopeKey::global()).await.unwrap(), wm2);

  // A forced rebuild reproduces the same counts.
  let forced = p.run(RunOptions { force: true, ..RUN }).await.unwrap();
  assert!(forced.scopes[0].rebuild);
  let top = p.store().top_keywords(ScopeKey::global(), None, 1).await.unwrap();
  assert_eq!(top[0].count, 2);
}

#[tokio::test]
async fn venue_scopes_follow_canonical_venues() {
  let s = store().await;
  append_all(&s, vec![
    arxiv("2402.00001", "Sparse Mixture of Experts for Vision", 1),
    NewRawRecord {
      year: Some(2024),
      venue_raw: Some("ICLR 2024".into()),
      published_at: Some("2024-02-12".into()),
      abstract_text: "Denoising for retrieval.".into(),
      ..NewRawRecord::new(Source::OpenReview, "or-1", "Retrieval Heads in Transformers", at(2, 12))
    },
  ])
  .await;

  let p = pipeline(s);
  let report = p.run(RUN).await.unwrap();
  let iclr = report
    .scopes
    .iter()
    .find(|r| r.scope == ScopeKey::venue("ICLR"))
    .expect("venue scope");
  assert_eq!(iclr.papers, 1);

  let scopes = p.store().list_scopes().await.unwrap();
  let global = scopes.iter().find(|s| s.scope == ScopeKey::global()).unwrap();
  assert_eq!(global.paper_count, 2);
  let cat = scopes
    .iter()
    .find(|s| s.scope == ScopeKey::category("cs.LG"))
    .unwrap();
  assert_eq!(cat.paper_count, 1);
}

// ── Papers leaving a scope ──────────────────────────────────────────────────

async fn denoising_total(s: &SqliteStore, scope: ScopeKey) -> u64 {
  s.top_keywords(scope, None, 10)
    .await
    .unwrap()
    .into_iter()
    .find(|k| k.keyword == "denoising")
    .map_or(0, |k| k.count)
}

#[tokio::test]
async fn withdrawn_paper_is_removed_from_the_cache() {
  let s = store().await;
  append_all(&s, vec![
    arxiv("2402.00001", "Sparse Mixture of Experts for Vision", 1),
    arxiv("2402.00002", "Retrieval Augmented Code Generation", 3),
  ])
  .await;
  let p = pipeline(s.clone());
  p.run(RUN).await.unwrap();
  assert_eq!(denoising_total(&s, ScopeKey::global()).await, 2);

  s.append(NewRawRecord {
    comments: Some("This paper has been withdrawn".into()),
    ..arxiv("2402.00001v2", "Sparse Mixture of Experts for Vision", 10)
  })
  .await
  .unwrap();

  let second = p.run(RUN).await.unwrap();
  let global = &second.scopes[0];
  assert_eq!(global.scope, ScopeKey::global());
  assert!(global.dirty && global.rebuild);

  let summaries = s.list_scopes().await.unwrap();
  let summary = summaries.iter().find(|x| x.scope == ScopeKey::global()).unwrap();
  assert_eq!(summary.paper_count, 1);
  assert_eq!(denoising_total(&s, ScopeKey::global()).await, 1);
  assert_eq!(denoising_total(&s, ScopeKey::category("cs.LG")).await, 1);

  let months = s.trend_entries(ScopeKey::global(), Granularity::Month).await.unwrap();
  let feb = months.iter().find(|e| e.keyword == "denoising" && e.bucket == "2024-02").unwrap();
  assert_eq!(feb.count, 1);

  let wm = s.watermark(ScopeKey::global()).await.unwrap();
  assert_eq!(wm.paper_count, Some(1));

  let third = p.run(RUN).await.unwrap();
  assert!(third.scopes.iter().all(|r| !r.dirty));
}

#[tokio::test]
async fn late_publication_date_moves_the_bucket() {
  let s = store().await;
  let doi = "10.5555/late.2024";
  append_all(&s, vec![NewRawRecord {
    doi: Some(doi.into()),
    year: Some(2024),
    abstract_text: "Denoising for control.".into(),
    ..NewRawRecord::new(Source::OpenAlex, "W9", "Late Dated Diffusion Policies", at(3, 5))
  }])
  .await;
  let p = pipeline(s.clone());
  p.run(RUN).await.unwrap();

  let months = |series: Vec<BucketSummary>| {
    series
      .into_iter()
      .filter(|b| b.paper_count > 0)
      .map(|b| b.bucket)
      .collect::<Vec<_>>()
  };
  let before = s.timeseries(ScopeKey::global(), Granularity::Month).await.unwrap();
  assert_eq!(months(before), ["2024-03"]);

  s.append(NewRawRecord {
    doi: Some(doi.into()),
    published_at: Some("2024-01-20".into()),
    ..arxiv("2401.00009", "Late Dated Diffusion Policies", 20)
  })
  .await
  .unwrap();
  let second = p.run(RUN).await.unwrap();
  assert!(second.scopes[0].rebuild);

  let after = s.timeseries(ScopeKey::global(), Granularity::Month).await.unwrap();
  assert_eq!(months(after), ["2024-01"]);
}

// ── Interrupted runs ────────────────────────────────────────────────────────

/// A `SqliteStore` whose cache commits start failing once `allowed` is
/// used up.
struct FlakyCache {
  inner:   SqliteStore,
  allowed: AtomicUsize,
}

impl FlakyCache {
  fn new(inner: SqliteStore, allowed: usize) -> Self {
    Self { inner, allowed: AtomicUsize::new(allowed) }
  }

  fn allow(&self, commits: usize) { self.allowed.store(commits, Ordering::SeqCst); }
}

impl RawFeed for FlakyCache {
  type Error = StoreError;

  async fn append(&self, record: NewRawRecord) -> Result<Option<RawRecord>, StoreError> {
    self.inner.append(record).await
  }

  async fn get_raw(&self, raw_id: i64) -> Result<Option<RawRecord>, StoreError> {
    self.inner.get_raw(raw_id).await
  }

  async fn retrieved_after(
    &self,
    after: Option<DateTime<Utc>>,
    limit: usize,
  ) -> Result<Vec<RawRecord>, StoreError> {
    self.inner.retrieved_after(after, limit).await
  }

  async fn feed_status(&self) -> Result<FeedStatus, StoreError> {
    self.inner.feed_status().await
  }
}

impl CanonicalStore for FlakyCache {
  type Error = StoreError;

  async fn unlinked_raw_records(
    &self,
    after_raw_id: i64,
    limit: usize,
  ) -> Result<Vec<RawRecord>, StoreError> {
    self.inner.unlinked_raw_records(after_raw_id, limit).await
  }

  async fn load_papers(&self) -> Result<Vec<CanonicalPaper>, StoreError> {
    self.inner.load_papers().await
  }

  async fn get_paper(&self, paper_id: Uuid) -> Result<Option<CanonicalPaper>, StoreError> {
    self.inner.get_paper(paper_id).await
  }

  async fn links_for(&self, paper_id: Uuid) -> Result<Vec<SourceLink>, StoreError> {
    self.inner.links_for(paper_id).await
  }

  async fn all_links(&self) -> Result<Vec<SourceLink>, StoreError> {
    self.inner.all_links().await
  }

  async fn commit_structuring(&self, batch: StructuringBatch) -> Result<(), StoreError> {
    self.inner.commit_structuring(batch).await
  }

  async fn conflicts(&self) -> Result<Vec<MatchConflict>, StoreError> {
    self.inner.conflicts().await
  }

  async fn papers_in_scope(&self, scope: ScopeKey) -> Result<Vec<CanonicalPaper>, StoreError> {
    self.inner.papers_in_scope(scope).await
  }

  async fn scope_stats(&self, scope: ScopeKey) -> Result<ScopeStats, StoreError> {
    self.inner.scope_stats(scope).await
  }

  async fn venues_in_use(&self) -> Result<Vec<String>, StoreError> {
    self.inner.venues_in_use().await
  }

  async fn stored_keywords(
    &self,
    paper_ids: Vec<Uuid>,
  ) -> Result<HashMap<Uuid, Vec<String>>, StoreError> {
    self.inner.stored_keywords(paper_ids).await
  }

  async fn save_keywords(&self, keywords: Vec<PaperKeyword>) -> Result<(), StoreError> {
    self.inner.save_keywords(keywords).await
  }
}

impl TrendReader for FlakyCache {
  type Error = StoreError;

  async fn list_scopes(&self) -> Result<Vec<ScopeSummary>, StoreError> {
    self.inner.list_scopes().await
  }

  async fn timeseries(
    &self,
    scope: ScopeKey,
    granularity: Granularity,
  ) -> Result<Vec<BucketSummary>, StoreError> {
    self.inner.timeseries(scope, granularity).await
  }

  async fn top_keywords(
    &self,
    scope: ScopeKey,
    bucket: Option<BucketRef>,
    limit: usize,
  ) -> Result<Vec<KeywordCount>, StoreError> {
    self.inner.top_keywords(scope, bucket, limit).await
  }

  async fn emerging(&self, scope: ScopeKey, limit: usize) -> Result<Vec<EmergingRecord>, StoreError> {
    self.inner.emerging(scope, limit).await
  }

  async fn freshness(&self, scope: Option<ScopeKey>) -> Result<Freshness, StoreError> {
    self.inner.freshness(scope).await
  }
}

impl TrendStore for FlakyCache {
  async fn watermark(&self, scope: ScopeKey) -> Result<AnalysisWatermark, StoreError> {
    self.inner.watermark(scope).await
  }

  async fn processed_papers(&self, scope: ScopeKey) -> Result<HashSet<Uuid>, StoreError> {
    self.inner.processed_papers(scope).await
  }

  async fn commit_cache(&self, commit: CacheCommit) -> Result<(), StoreError> {
    let granted = self
      .allowed
      .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
      .is_ok();
    if !granted {
      return Err(StoreError::DateParse("disk I/O error".into()));
    }
    self.inner.commit_cache(commit).await
  }

  async fn trend_entries(
    &self,
    scope: ScopeKey,
    granularity: Granularity,
  ) -> Result<Vec<TrendCacheEntry>, StoreError> {
    self.inner.trend_entries(scope, granularity).await
  }

  async fn upsert_emerging(&self, records: Vec<EmergingRecord>) -> Result<(), StoreError> {
    self.inner.upsert_emerging(records).await
  }

  async fn record_run(&self, run: RunRecord) -> Result<(), StoreError> {
    self.inner.record_run(run).await
  }
}

fn flaky_pipeline(s: SqliteStore, allowed: usize) -> Pipeline<FlakyCache> {
  let config = PipelineConfig { extractor_url: None, batch_size: 1, ..Default::default() };
  Pipeline::from_config(FlakyCache::new(s, allowed), config).unwrap()
}

fn nonzero(mut entries: Vec<TrendCacheEntry>) -> Vec<TrendCacheEntry> {
  entries.retain(|e| e.count > 0);
  entries.sort_by(|a, b| (&a.bucket, &a.keyword).cmp(&(&b.bucket, &b.keyword)));
  entries
}

#[tokio::test]
async fn exhausted_time_budget_keeps_committed_state() {
  let s = store().await;
  append_all(&s, vec![
    arxiv("2402.00001", "Sparse Mixture of Experts for Vision", 1),
    arxiv("2402.00002", "Retrieval Augmented Code Generation", 3),
  ])
  .await;
  let p = pipeline(s.clone());
  p.run(RUN).await.unwrap();
  let committed = s.watermark(ScopeKey::global()).await.unwrap();

  s.append(arxiv("2402.00003", "Graph Neural Networks under Distribution Shift", 9))
    .await
    .unwrap();
  let config =
    PipelineConfig { extractor_url: None, time_budget_secs: Some(0), ..Default::default() };
  let hurried = Pipeline::from_config(s.clone(), config).unwrap();
  let report = hurried.run(RUN).await.unwrap();
  assert_eq!(report.run.status, RunStatus::Partial);
  assert_eq!(report.run.note.as_deref(), Some("time budget exhausted"));
  assert!(report.scopes.iter().all(|r| r.commits == 0));

  assert_eq!(s.watermark(ScopeKey::global()).await.unwrap(), committed);
  assert_eq!(denoising_total(&s, ScopeKey::global()).await, 2);
  let fresh = s.freshness(None).await.unwrap();
  assert_eq!(fresh.last_run.map(|r| r.status), Some(RunStatus::Partial));

  // The next unhurried run picks up where the budget cut off.
  let resumed = p.run(RUN).await.unwrap();
  assert_eq!(resumed.run.status, RunStatus::Completed);
  assert_eq!(resumed.scopes[0].papers, 1);
  assert_eq!(denoising_total(&s, ScopeKey::global()).await, 3);
}

#[tokio::test]
async fn failed_cache_commit_leaves_the_watermark() {
  let s = store().await;
  append_all(&s, vec![arxiv("2402.00001", "Sparse Mixture of Experts for Vision", 1)]).await;
  let p = flaky_pipeline(s.clone(), 0);

  let err = p.run(RUN).await.unwrap_err();
  assert!(matches!(
    err,
    Error::Core(CoreError::WatermarkCommit { ref scope, .. }) if *scope == ScopeKey::global()
  ));

  assert!(s.watermark(ScopeKey::global()).await.unwrap().is_empty());
  assert!(s.processed_papers(ScopeKey::global()).await.unwrap().is_empty());
  assert_eq!(denoising_total(&s, ScopeKey::global()).await, 0);
  let last = s.freshness(None).await.unwrap().last_run.expect("run recorded");
  assert_eq!(last.status, RunStatus::Failed);
}

#[tokio::test]
async fn replay_after_interrupted_scope_matches_a_rebuild() {
  let s = store().await;
  append_all(&s, vec![
    arxiv("2402.00001", "Sparse Mixture of Experts for Vision", 1),
    arxiv("2402.00002", "Retrieval Augmented Code Generation", 3),
  ])
  .await;
  let p = flaky_pipeline(s.clone(), usize::MAX);
  p.run(RUN).await.unwrap();

  append_all(&s, vec![
    arxiv("2402.00003", "Graph Neural Networks under Distribution Shift", 9),
    arxiv("2402.00004", "Tokenizer Free Language Modelling", 11),
  ])
  .await;
  // One batch of the global scope lands, the next commit fails.
  p.store().allow(1);
  p.run(RUN).await.unwrap_err();
  assert_eq!(s.processed_papers(ScopeKey::global()).await.unwrap().len(), 3);
  assert_eq!(denoising_total(&s, ScopeKey::global()).await, 3);

  p.store().allow(usize::MAX);
  let replay = p.run(RUN).await.unwrap();
  assert_eq!(replay.run.status, RunStatus::Completed);
  let global = &replay.scopes[0];
  assert!(!global.rebuild);
  assert_eq!(global.papers, 1);

  let replayed = nonzero(s.trend_entries(ScopeKey::global(), Granularity::Day).await.unwrap());
  assert_eq!(denoising_total(&s, ScopeKey::global()).await, 4);

  p.run(RunOptions { force: true, ..RUN }).await.unwrap();
  let rebuilt = nonzero(s.trend_entries(ScopeKey::global(), Granularity::Day).await.unwrap());
  assert_eq!(replayed, rebuilt);
  assert_eq!(denoising_total(&s, ScopeKey::global()).await, 4);
}
