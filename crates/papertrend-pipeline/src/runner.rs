//! One batch run of the pipeline: feed check, structuring, gated
//! aggregation per scope, consistency self-check, and emerging-topic
//! detection.

use std::{
  collections::{HashMap, HashSet},
  time::{Duration, Instant},
};

use chrono::{DateTime, Utc};
use papertrend_core::{
  Error as CoreError,
  capability::{ExtractionInput, KeywordTier, VenueRegistry},
  paper::{CanonicalPaper, KeywordMethod, PaperKeyword, SourceLink},
  run::{RunRecord, RunStatus},
  store::{CacheCommit, CommitMode, FeedStatus, PipelineStore},
  trend::{Granularity, ScopeKey},
};
use serde::Serialize;
use strum::IntoEnumIterator;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
  Error, PipelineConfig, Result,
  aggregate::{AggregationStats, aggregate, bucket_date, check_consistency},
  emerging,
  error::store_err,
  gate::{compute_delta, is_dirty, needs_rebuild},
  keywords::KeywordChain,
  structuring::{
    ConflictDecision, StructuringOptions, StructuringReport, resolve_conflict,
    run_structuring,
  },
  venue::PatternRegistry,
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunOptions {
  /// Rebuild every scope from the canonical store.
  pub force:     bool,
  /// Structure unlinked raw records before analysing.
  pub structure: bool,
}

/// What happened to one scope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScopeReport {
  pub scope:      ScopeKey,
  pub dirty:      bool,
  pub rebuild:    bool,
  pub papers:     u64,
  pub commits:    u64,
  pub violations: usize,
  pub emerging:   usize,
}

impl ScopeReport {
  fn clean(scope: ScopeKey) -> Self {
    Self {
      scope,
      dirty: false,
      rebuild: false,
      papers: 0,
      commits: 0,
      violations: 0,
      emerging: 0,
    }
  }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
  pub run:         RunRecord,
  pub structuring: Option<StructuringReport>,
  pub scopes:      Vec<ScopeReport>,
}

/// Per-run state shared across scopes.
#[derive(Default)]
struct RunState {
  /// Keywords chosen for each paper this run; a paper in several scopes is
  /// extracted once.
  keywords: HashMap<Uuid, Vec<String>>,
  deadline: Option<Instant>,
  stopped:  bool,
}

impl RunState {
  fn out_of_time(&mut self) -> bool {
    if self.deadline.is_some_and(|d| Instant::now() >= d) {
      self.stopped = true;
    }
    self.stopped
  }
}

/// The pipeline over one backend.
pub struct Pipeline<S> {
  store:    S,
  registry: Box<dyn VenueRegistry>,
  chain:    KeywordChain,
  config:   PipelineConfig,
}

impl<S: PipelineStore> Pipeline<S> {
  pub fn new(
    store: S,
    registry: Box<dyn VenueRegistry>,
    chain: KeywordChain,
    config: PipelineConfig,
  ) -> Self {
    Self { store, registry, chain, config }
  }

  /// Built-in venue patterns and the configured keyword chain.
  pub fn from_config(store: S, config: PipelineConfig) -> Result<Self> {
    let registry = PatternRegistry::builtin()?;
    let chain = KeywordChain::from_config(&config)?;
    Ok(Self::new(store, Box::new(registry), chain, config))
  }

  pub fn store(&self) -> &S { &self.store }

  pub fn config(&self) -> &PipelineConfig { &self.config }

  fn structuring_options(&self) -> StructuringOptions {
    StructuringOptions {
      batch_size:      self.config.structuring_batch_size,
      fuzzy_threshold: self.config.fuzzy_threshold,
    }
  }

  pub async fn structure(&self) -> Result<StructuringReport> {
    run_structuring(&self.store, self.registry.as_ref(), &self.structuring_options()).await
  }

  pub async fn resolve(&self, raw_id: i64, decision: ConflictDecision) -> Result<SourceLink> {
    resolve_conflict(&self.store, self.registry.as_ref(), raw_id, decision).await
  }

  /// Fail with [`CoreError::IngestionGap`] when the raw feed is unreachable,
  /// empty, or older than `max_feed_age_hours`.
  pub async fn check_feed(&self, now: DateTime<Utc>) -> Result<FeedStatus> {
    let status = self
      .store
      .feed_status()
      .await
      .map_err(|e| CoreError::IngestionGap(format!("raw feed unreachable: {e}")))?;
    let Some(newest) = status.max_retrieved_at.filter(|_| status.record_count > 0) else {
      return Err(CoreError::IngestionGap("raw feed is empty".into()).into());
    };
    if let Some(hours) = self.config.max_feed_age_hours {
      let age = now.signed_duration_since(newest);
      if age > chrono::Duration::hours(i64::try_from(hours).unwrap_or(i64::MAX)) {
        return Err(
          CoreError::IngestionGap(format!(
            "newest raw record is {}h old (limit {hours}h)",
            age.num_hours()
          ))
          .into(),
        );
      }
    }
    Ok(status)
  }

  /// Run the pipeline once and record the outcome in the run log.
  ///
  /// A stale feed skips the run without error. Any other failure is
  /// recorded as `failed` and returned; cache commits made before it stay.
  pub async fn run(&self, opts: RunOptions) -> Result<RunReport> {
    let mut run = RunRecord::started(Utc::now());
    info!(run_id = %run.run_id, force = opts.force, "run started");

    match self.check_feed(run.started_at).await {
      Ok(_) => {}
      Err(Error::Core(CoreError::IngestionGap(reason))) => {
        warn!(%reason, "skipping run");
        run.status = RunStatus::Skipped;
        run.note = Some(format!("ingestion gap: {reason}"));
        self.finish(&mut run).await?;
        return Ok(RunReport { run, structuring: None, scopes: Vec::new() });
      }
      Err(e) => return Err(e),
    }

    let mut state = RunState {
      deadline: self
        .config
        .time_budget_secs
        .map(|secs| Instant::now() + Duration::from_secs(secs)),
      ..Default::default()
    };

    let outcome = async {
      let structuring = if opts.structure { Some(self.structure().await?) } else { None };
      let scopes = self.analyze_with(opts.force, &mut run, &mut state).await?;
      Ok::<_, Error>((structuring, scopes))
    }
    .await;

    match outcome {
      Ok((structuring, scopes)) => {
        if state.stopped {
          run.status = RunStatus::Partial;
          run.note = Some("time budget exhausted".into());
        }
        self.finish(&mut run).await?;
        Ok(RunReport { run, structuring, scopes })
      }
      Err(e) => {
        run.status = RunStatus::Failed;
        run.note = Some(e.to_string());
        if let Err(log_err) = self.finish(&mut run).await {
          warn!(error = %log_err, "could not record failed run");
        }
        Err(e)
      }
    }
  }

  async fn finish(&self, run: &mut RunRecord) -> Result<()> {
    run.finished_at = Utc::now();
    info!(
      run_id = %run.run_id,
      status = %run.status,
      degraded = run.degraded,
      degraded_papers = run.degraded_papers,
      timestamp_fallbacks = run.timestamp_fallbacks,
      bucket_format_errors = run.bucket_format_errors,
      papers = run.papers_processed,
      "run finished"
    );
    self.store.record_run(run.clone()).await.map_err(store_err)
  }

  /// `global`, each configured category, then each venue in use, then any
  /// previously materialised scope that has since emptied out.
  async fn scopes(&self) -> Result<Vec<ScopeKey>> {
    let mut scopes = vec![ScopeKey::global()];
    scopes.extend(self.config.categories.iter().map(|c| ScopeKey::category(c.clone())));
    let venues = self.store.venues_in_use().await.map_err(store_err)?;
    scopes.extend(venues.into_iter().map(ScopeKey::venue));
    for summary in self.store.list_scopes().await.map_err(store_err)? {
      if !scopes.contains(&summary.scope) {
        scopes.push(summary.scope);
      }
    }
    Ok(scopes)
  }

  async fn analyze_with(
    &self,
    force: bool,
    run: &mut RunRecord,
    state: &mut RunState,
  ) -> Result<Vec<ScopeReport>> {
    let mut reports = Vec::new();
    for scope in self.scopes().await? {
      if state.out_of_time() {
        warn!(%scope, "time budget exhausted before scope");
        break;
      }
      reports.push(self.analyze_scope(scope, force, run, state).await?);
    }
    Ok(reports)
  }

  async fn analyze_scope(
    &self,
    scope: ScopeKey,
    force: bool,
    run: &mut RunRecord,
    state: &mut RunState,
  ) -> Result<ScopeReport> {
    let wm = self.store.watermark(scope.clone()).await.map_err(store_err)?;
    let stats = self.store.scope_stats(scope.clone()).await.map_err(store_err)?;
    if !force && !is_dirty(&wm, &stats) {
      debug!(%scope, "scope is clean");
      return Ok(ScopeReport::clean(scope));
    }

    let papers = self.store.papers_in_scope(scope.clone()).await.map_err(store_err)?;
    let processed = if needs_rebuild(&wm, &stats, force) {
      if !force && !wm.is_empty() {
        warn!(%scope, stale = stats.stale, "papers left the scope or changed bucket; rebuilding");
      }
      HashSet::new()
    } else {
      self.store.processed_papers(scope.clone()).await.map_err(store_err)?
    };
    let delta = compute_delta(&wm, &stats, papers, &processed, force);
    let mut report = ScopeReport {
      rebuild: delta.rebuild,
      papers: delta.papers.len() as u64,
      dirty: true,
      ..ScopeReport::clean(scope.clone())
    };
    info!(%scope, papers = report.papers, rebuild = delta.rebuild, "aggregating");

    let mut totals = AggregationStats::default();
    if delta.rebuild {
      let mut pairs = Vec::with_capacity(delta.papers.len());
      for chunk in delta.papers.chunks(self.config.batch_size.max(1)) {
        if state.out_of_time() {
          warn!(%scope, "time budget exhausted mid-rebuild; nothing committed");
          return Ok(report);
        }
        pairs.extend(self.keywords_for(chunk, run, state).await?);
      }
      let (next, cache, folded) = aggregate(&wm, &pairs, Utc::now());
      totals.absorb(folded);
      self
        .commit(CacheCommit {
          scope:     scope.clone(),
          mode:      CommitMode::Replace,
          delta:     cache,
          processed: pairs.iter().map(|(p, _)| p.paper_id).collect(),
          watermark: next.completed(stats.paper_count),
          top_n:     self.config.top_n,
        })
        .await?;
      report.commits += 1;
    } else {
      let chunks: Vec<&[CanonicalPaper]> =
        delta.papers.chunks(self.config.batch_size.max(1)).collect();
      let mut current = wm.clone();
      if chunks.is_empty() {
        // Nothing new to fold; settle the gate on the current count.
        self
          .commit(CacheCommit {
            scope:     scope.clone(),
            mode:      CommitMode::Add,
            delta:     Default::default(),
            processed: Vec::new(),
            watermark: current.advanced_to(None, Utc::now()).completed(stats.paper_count),
            top_n:     self.config.top_n,
          })
          .await?;
        report.commits += 1;
      }
      for (i, chunk) in chunks.iter().enumerate() {
        if state.out_of_time() {
          warn!(%scope, committed = report.commits, "time budget exhausted mid-scope");
          return Ok(report);
        }
        let pairs = self.keywords_for(chunk, run, state).await?;
        let (next, cache, folded) = aggregate(&current, &pairs, Utc::now());
        totals.absorb(folded);
        let next = if i + 1 == chunks.len() { next.completed(stats.paper_count) } else { next };
        self
          .commit(CacheCommit {
            scope:     scope.clone(),
            mode:      CommitMode::Add,
            delta:     cache,
            processed: chunk.iter().map(|p| p.paper_id).collect(),
            watermark: next.clone(),
            top_n:     self.config.top_n,
          })
          .await?;
        current = next;
        report.commits += 1;
        debug!(%scope, batch = i + 1, of = chunks.len(), "batch committed");
      }
    }

    if totals.timestamp_fallbacks > 0 {
      warn!(%scope, count = totals.timestamp_fallbacks, "bucketed by retrieval time for lack of published_at");
    }
    if totals.bucket_format_errors > 0 {
      warn!(%scope, count = totals.bucket_format_errors, "papers excluded from buckets: unparseable published_at");
    }

    let (violations, emerging) = self.post_commit(&scope).await?;
    report.violations = violations;
    report.emerging = emerging;
    Ok(report)
  }

  /// Self-check the committed cache and refresh emerging records.
  async fn post_commit(&self, scope: &ScopeKey) -> Result<(usize, usize)> {
    let mut entries = HashMap::new();
    for g in Granularity::iter() {
      let rows = self.store.trend_entries(scope.clone(), g).await.map_err(store_err)?;
      entries.insert(g, rows);
    }

    let violations = check_consistency(scope, &entries);
    for v in &violations {
      warn!(alert = "cache_consistency", "{v}; a full rebuild is recommended");
    }

    let params = &self.config.emerging;
    let rows = entries.get(&params.granularity).map(Vec::as_slice).unwrap_or(&[]);
    let records = emerging::detect(scope, rows, params, Utc::now())?;
    let n = records.len();
    if n > 0 {
      self.store.upsert_emerging(records).await.map_err(store_err)?;
    }
    Ok((violations.len(), n))
  }

  async fn commit(&self, commit: CacheCommit) -> Result<()> {
    let scope = commit.scope.clone();
    self.store.commit_cache(commit).await.map_err(|e| {
      Error::Core(CoreError::WatermarkCommit { scope, reason: e.to_string() })
    })
  }

  /// Keywords for each paper of `chunk`, extracting only papers not seen
  /// earlier in this run. Fresh extractions are persisted.
  async fn keywords_for(
    &self,
    chunk: &[CanonicalPaper],
    run: &mut RunRecord,
    state: &mut RunState,
  ) -> Result<Vec<(CanonicalPaper, Vec<String>)>> {
    let missing: Vec<Uuid> = chunk
      .iter()
      .map(|p| p.paper_id)
      .filter(|id| !state.keywords.contains_key(id))
      .collect();

    if !missing.is_empty() {
      let stored = self.store.stored_keywords(missing.clone()).await.map_err(store_err)?;
      let mut fresh = Vec::new();
      for paper in chunk.iter().filter(|p| missing.contains(&p.paper_id)) {
        let text = paper.extraction_text();
        let input = ExtractionInput {
          paper_id: paper.paper_id,
          text:     &text,
          stored:   stored.get(&paper.paper_id).map(Vec::as_slice).unwrap_or(&[]),
        };
        let outcome = self.chain.keywords_for(input).await;

        if outcome.degraded {
          run.degraded = true;
          run.degraded_papers += 1;
        }
        if outcome.tier == Some(KeywordTier::Extracted) {
          fresh.extend(outcome.terms.iter().map(|t| PaperKeyword {
            paper_id: paper.paper_id,
            keyword:  t.term.clone(),
            method:   KeywordMethod::Extracted,
            score:    t.score,
          }));
        }
        match bucket_date(paper) {
          Ok((_, true)) => run.timestamp_fallbacks += 1,
          Ok(_) => {}
          Err(_) => run.bucket_format_errors += 1,
        }
        run.papers_processed += 1;
        state.keywords.insert(paper.paper_id, outcome.keywords());
      }
      if !fresh.is_empty() {
        self.store.save_keywords(fresh).await.map_err(store_err)?;
      }
    }

    Ok(
      chunk
        .iter()
        .map(|p| (p.clone(), state.keywords.get(&p.paper_id).cloned().unwrap_or_default()))
        .collect(),
    )
  }
}
