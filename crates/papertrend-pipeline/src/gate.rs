//! The analysis gate: should a scope be re-aggregated, and over which
//! papers?

use std::collections::HashSet;

use papertrend_core::{paper::CanonicalPaper, store::ScopeStats, watermark::AnalysisWatermark};
use uuid::Uuid;

/// Whether the cache for a scope is behind the canonical store.
///
/// Dirty when papers newer than the watermark exist, or when the scope's
/// paper count differs from the one last committed (catching backdated
/// inserts the timestamp cannot see), or when folded papers went stale. A
/// scope that never committed is dirty iff it has papers.
pub fn is_dirty(wm: &AnalysisWatermark, stats: &ScopeStats) -> bool {
  if wm.is_empty() {
    return stats.paper_count > 0;
  }
  if stats.stale > 0 {
    return true;
  }
  let newer = match (stats.max_first_seen_at, wm.max_timestamp) {
    (Some(current), Some(seen)) => current > seen,
    (Some(_), None) => true,
    (None, _) => false,
  };
  newer || wm.paper_count != Some(stats.paper_count)
}

/// The papers one aggregation run must fold in.
#[derive(Debug, Clone, PartialEq)]
pub struct Delta {
  pub papers:  Vec<CanonicalPaper>,
  /// Recompute every bucket from scratch instead of adding.
  pub rebuild: bool,
}

/// Whether additive folding cannot bring the cache up to date.
///
/// Counts only ever grow under `Add`, so a scope that lost papers (fewer
/// than last committed, or ledger members that left the scope or changed
/// bucket) must be recomputed from scratch.
pub fn needs_rebuild(wm: &AnalysisWatermark, stats: &ScopeStats, force: bool) -> bool {
  force
    || wm.is_empty()
    || stats.stale > 0
    || wm.paper_count.is_some_and(|committed| stats.paper_count < committed)
}

/// Select the delta for a scope.
///
/// `papers` is every aggregatable paper in scope, ordered by
/// `(first_seen_at, paper_id)`. When [`needs_rebuild`] holds the delta is
/// everything. Otherwise it is every paper not yet in the processed ledger:
/// newer than the watermark, backdated, or left over by an interrupted run.
pub fn compute_delta(
  wm: &AnalysisWatermark,
  stats: &ScopeStats,
  papers: Vec<CanonicalPaper>,
  processed: &HashSet<Uuid>,
  force: bool,
) -> Delta {
  if needs_rebuild(wm, stats, force) {
    return Delta { papers, rebuild: true };
  }
  let papers = papers
    .into_iter()
    .filter(|p| !processed.contains(&p.paper_id))
    .collect();
  Delta { papers, rebuild: false }
}

#[cfg(test)]
mod tests {
  use chrono::{DateTime, TimeZone, Utc};
  use papertrend_core::{paper::QualityFlag, record::Source};

  use super::*;

  fn at(day: u32) -> DateTime<Utc> { Utc.with_ymd_and_hms(2024, 2, day, 0, 0, 0).unwrap() }

  fn paper(id: &str, day: u32) -> CanonicalPaper {
    CanonicalPaper {
      paper_id:        CanonicalPaper::id_for(Source::Arxiv, id),
      canonical_title: id.into(),
      display_title:   id.into(),
      abstract_text:   String::new(),
      authors:         vec![],
      year:            Some(2024),
      venue:           None,
      venue_source:    None,
      domain:          None,
      quality_flag:    QualityFlag::Unknown,
      categories:      vec![],
      doi:             None,
      arxiv_id:        None,
      openalex_id:     None,
      published_at:    None,
      first_seen_at:   at(day),
      primary_source:  Source::Arxiv,
      origin_raw_id:   day.into(),
    }
  }

  fn stats(paper_count: u64, day: u32) -> ScopeStats {
    ScopeStats { paper_count, max_first_seen_at: Some(at(day)), stale: 0 }
  }

  fn committed(day: u32, count: u64) -> AnalysisWatermark {
    AnalysisWatermark::default().advanced_to(Some(at(day)), at(day)).completed(count)
  }

  #[test]
  fn empty_watermark_is_dirty_only_with_papers() {
    let wm = AnalysisWatermark::default();
    assert!(!is_dirty(&wm, &ScopeStats::default()));
    assert!(is_dirty(&wm, &stats(1, 1)));
  }

  #[test]
  fn newer_papers_make_a_scope_dirty() {
    let wm = committed(3, 2);
    assert!(!is_dirty(&wm, &stats(2, 3)));
    assert!(is_dirty(&wm, &stats(2, 4)));
  }

  #[test]
  fn count_change_catches_backdated_papers() {
    let wm = committed(3, 2);
    assert!(is_dirty(&wm, &stats(3, 3)));
  }

  #[test]
  fn delta_excludes_the_ledger() {
    let wm = committed(3, 2);
    let (a, b, c) = (paper("a", 1), paper("b", 2), paper("c", 1));
    let ledger: HashSet<Uuid> = [a.paper_id, b.paper_id].into();

    let delta = compute_delta(&wm, &stats(3, 2), vec![a, c.clone(), b], &ledger, false);
    assert!(!delta.rebuild);
    assert_eq!(delta.papers, vec![c]);
  }

  #[test]
  fn force_and_first_run_rebuild() {
    let papers = vec![paper("a", 1)];
    let ledger: HashSet<Uuid> = [papers[0].paper_id].into();

    let forced = compute_delta(&committed(1, 1), &stats(1, 1), papers.clone(), &ledger, true);
    assert!(forced.rebuild);
    assert_eq!(forced.papers.len(), 1);

    let first =
      compute_delta(&AnalysisWatermark::default(), &stats(1, 1), papers, &HashSet::new(), false);
    assert!(first.rebuild);
  }

  #[test]
  fn departed_papers_force_a_rebuild() {
    let wm = committed(3, 2);
    let ledger: HashSet<Uuid> = [paper("a", 1).paper_id].into();

    let stale = ScopeStats { stale: 1, ..stats(2, 3) };
    assert!(is_dirty(&wm, &stale));
    let delta = compute_delta(&wm, &stale, vec![paper("a", 1)], &ledger, false);
    assert!(delta.rebuild);
    assert_eq!(delta.papers.len(), 1);

    let shrunk = stats(1, 3);
    assert!(is_dirty(&wm, &shrunk));
    assert!(needs_rebuild(&wm, &shrunk, false));
    assert!(!needs_rebuild(&wm, &stats(3, 3), false));
  }
}
