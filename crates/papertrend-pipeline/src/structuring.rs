//! The structuring engine: raw records in, canonical papers and source
//! links out.
//!
//! Raw records are visited in insertion order. Each one either founds a new
//! paper, attaches to an existing one (refining its fields monotonically),
//! or is parked as a [`MatchConflict`] for an operator. Each batch commits
//! in one transaction.

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use papertrend_core::{
  Error as CoreError,
  capability::VenueRegistry,
  paper::{CanonicalPaper, MatchConflict, MatchReason, QualityFlag, SourceLink},
  record::{RawRecord, Source},
  store::{CanonicalStore, RawFeed, StructuringBatch},
};
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
  Error, Result,
  error::store_err,
  fingerprint::structuring_fingerprint,
  identity::{IdentityIndex, Resolution, resolve_identity},
  normalize::{normalize_arxiv_id, normalize_doi, normalize_openalex_id, normalize_title},
  venue::{classify_domain, detect_quality, resolve_venue},
};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StructuringOptions {
  /// Raw records per committed batch.
  pub batch_size:      usize,
  pub fuzzy_threshold: f64,
}

impl Default for StructuringOptions {
  fn default() -> Self { Self { batch_size: 500, fuzzy_threshold: 0.92 } }
}

/// Counters for one structuring pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StructuringReport {
  pub processed:           u64,
  pub created:             u64,
  pub linked:              u64,
  pub ambiguous:           u64,
  pub skipped_empty_title: u64,
  pub batches:             u64,
  /// SHA-256 over the canonical and link sets after the pass.
  pub fingerprint:         String,
}

// ─── Paper construction & refinement ─────────────────────────────────────────

fn non_empty(s: &str) -> Option<&str> {
  let s = s.trim();
  (!s.is_empty()).then_some(s)
}

/// Fill `slot` when empty; replace it only when `higher` is set.
fn refine<T>(slot: &mut Option<T>, incoming: Option<T>, higher: bool) {
  if let Some(value) = incoming
    && (slot.is_none() || higher)
  {
    *slot = Some(value);
  }
}

fn refine_text(slot: &mut String, incoming: &str, higher: bool) {
  if let Some(value) = non_empty(incoming)
    && (slot.trim().is_empty() || higher)
  {
    *slot = value.to_owned();
  }
}

/// A new canonical paper founded by `raw`, and its origin link.
pub fn found_paper(
  raw: &RawRecord,
  canonical_title: String,
  registry: &dyn VenueRegistry,
  now: DateTime<Utc>,
) -> (CanonicalPaper, SourceLink) {
  let venue = resolve_venue(raw, registry);
  let quality_flag = detect_quality(raw, venue.is_some());
  let domain = classify_domain(raw).or(venue.as_ref().and_then(|v| v.domain));

  let mut categories: Vec<String> = Vec::new();
  for c in &raw.categories {
    if !categories.contains(c) {
      categories.push(c.clone());
    }
  }

  let paper = CanonicalPaper {
    paper_id: CanonicalPaper::id_for(raw.source, &raw.source_id),
    canonical_title,
    display_title: raw.title.trim().to_owned(),
    abstract_text: raw.abstract_text.trim().to_owned(),
    authors: raw.authors.clone(),
    year: raw.year,
    venue_source: venue.as_ref().map(|_| raw.source),
    venue: venue.map(|v| v.canonical_name),
    domain,
    quality_flag,
    categories,
    doi: raw.doi.as_deref().and_then(normalize_doi),
    arxiv_id: raw.native_arxiv_id().and_then(normalize_arxiv_id),
    openalex_id: raw.native_openalex_id().and_then(normalize_openalex_id),
    published_at: raw.published_at.clone(),
    first_seen_at: raw.retrieved_at,
    primary_source: raw.source,
    origin_raw_id: raw.raw_id,
  };
  let link = SourceLink {
    raw_id:           raw.raw_id,
    paper_id:         paper.paper_id,
    source:           raw.source,
    confidence_score: MatchReason::Origin.base_confidence(),
    match_reason:     MatchReason::Origin,
    linked_at:        now,
  };
  (paper, link)
}

/// Merge `raw` into `paper` under the monotonic-refinement rule: empty
/// fields are filled, populated ones change only for a strictly
/// higher-priority source, and nothing is ever reset to unknown.
pub fn merge_into(paper: &mut CanonicalPaper, raw: &RawRecord, registry: &dyn VenueRegistry) {
  let higher = raw.source.priority() > paper.primary_source.priority();

  let title_before = paper.display_title.clone();
  refine_text(&mut paper.display_title, &raw.title, higher);
  if paper.display_title != title_before {
    let canonical = normalize_title(&paper.display_title);
    if !canonical.is_empty() {
      paper.canonical_title = canonical;
    }
  }
  refine_text(&mut paper.abstract_text, &raw.abstract_text, higher);
  if !raw.authors.is_empty() && (paper.authors.is_empty() || higher) {
    paper.authors = raw.authors.clone();
  }
  refine(&mut paper.year, raw.year, higher);
  refine(&mut paper.published_at, raw.published_at.clone(), higher);
  refine(&mut paper.doi, raw.doi.as_deref().and_then(normalize_doi), higher);
  refine(
    &mut paper.arxiv_id,
    raw.native_arxiv_id().and_then(normalize_arxiv_id),
    higher,
  );
  refine(
    &mut paper.openalex_id,
    raw.native_openalex_id().and_then(normalize_openalex_id),
    higher,
  );

  let venue = resolve_venue(raw, registry);
  let venue_detected = venue.is_some();
  if let Some(venue) = venue {
    let outranks = paper
      .venue_source
      .is_none_or(|s: Source| raw.source.priority() > s.priority());
    if paper.venue.is_none() || outranks {
      paper.venue = Some(venue.canonical_name);
      paper.venue_source = Some(raw.source);
      if paper.domain.is_none() {
        paper.domain = venue.domain;
      }
    }
  }
  refine(&mut paper.domain, classify_domain(raw), higher);

  for c in &raw.categories {
    if !paper.categories.contains(c) {
      paper.categories.push(c.clone());
    }
  }
  paper.quality_flag = paper.quality_flag.refine(detect_quality(raw, venue_detected));
  if higher {
    paper.primary_source = raw.source;
  }
}

// ─── The pass ────────────────────────────────────────────────────────────────

/// Working state across batches.
struct Canon {
  papers: HashMap<Uuid, CanonicalPaper>,
  index:  IdentityIndex,
  dirty:  BTreeSet<Uuid>,
}

impl Canon {
  fn touch(&mut self, paper_id: Uuid) {
    if let Some(paper) = self.papers.get(&paper_id) {
      self.index.upsert(paper);
      self.dirty.insert(paper_id);
    }
  }

  fn take_dirty(&mut self) -> Vec<CanonicalPaper> {
    std::mem::take(&mut self.dirty)
      .into_iter()
      .filter_map(|id| self.papers.get(&id).cloned())
      .collect()
  }
}

/// Structure every unlinked raw record.
///
/// Re-running over an unchanged feed writes nothing and reproduces the same
/// fingerprint.
pub async fn run_structuring<S>(
  store: &S,
  registry: &dyn VenueRegistry,
  opts: &StructuringOptions,
) -> Result<StructuringReport>
where
  S: CanonicalStore,
{
  let existing = store.load_papers().await.map_err(store_err)?;
  let mut canon = Canon {
    index:  IdentityIndex::build(&existing),
    papers: existing.into_iter().map(|p| (p.paper_id, p)).collect(),
    dirty:  BTreeSet::new(),
  };
  let mut report = StructuringReport::default();
  let mut cursor = 0;

  loop {
    let raws = store
      .unlinked_raw_records(cursor, opts.batch_size.max(1))
      .await
      .map_err(store_err)?;
    if raws.is_empty() {
      break;
    }

    let now = Utc::now();
    let mut batch = StructuringBatch::default();
    for raw in &raws {
      cursor = raw.raw_id;
      report.processed += 1;

      let title = normalize_title(&raw.title);
      if title.is_empty() {
        debug!(raw_id = raw.raw_id, "skipping record with empty title");
        report.skipped_empty_title += 1;
        continue;
      }

      match resolve_identity(raw, &title, &canon.index, opts.fuzzy_threshold) {
        Resolution::New => {
          let (paper, link) = found_paper(raw, title, registry, now);
          debug!(raw_id = raw.raw_id, paper_id = %paper.paper_id, "new paper");
          let paper_id = paper.paper_id;
          canon.papers.insert(paper_id, paper);
          canon.touch(paper_id);
          batch.links.push(link);
          report.created += 1;
        }
        Resolution::Matched { paper_id, reason, confidence } => {
          let paper = canon
            .papers
            .get_mut(&paper_id)
            .ok_or(Error::UnknownPaper(paper_id))?;
          merge_into(paper, raw, registry);
          canon.touch(paper_id);
          debug!(raw_id = raw.raw_id, %paper_id, %reason, confidence, "linked");
          batch.links.push(SourceLink {
            raw_id: raw.raw_id,
            paper_id,
            source: raw.source,
            confidence_score: confidence,
            match_reason: reason,
            linked_at: now,
          });
          report.linked += 1;
        }
        Resolution::Ambiguous { candidates, best_similarity } => {
          let err = CoreError::AmbiguousMatch {
            raw_id:     raw.raw_id,
            candidates: candidates.clone(),
          };
          warn!(best_similarity, "{err}");
          for id in &candidates {
            if let Some(paper) = canon.papers.get_mut(id) {
              paper.quality_flag = paper.quality_flag.refine(QualityFlag::Ambiguous);
            }
            canon.touch(*id);
          }
          batch.conflicts.push(MatchConflict {
            raw_id: raw.raw_id,
            candidates,
            best_similarity,
            recorded_at: now,
          });
          report.ambiguous += 1;
        }
      }
    }

    batch.papers = canon.take_dirty();
    if !batch.is_empty() {
      store.commit_structuring(batch).await.map_err(store_err)?;
    }
    report.batches += 1;
    info!(batch = report.batches, records = raws.len(), cursor, "structuring batch committed");
  }

  let papers = store.load_papers().await.map_err(store_err)?;
  let links = store.all_links().await.map_err(store_err)?;
  report.fingerprint = structuring_fingerprint(&papers, &links);
  info!(
    processed = report.processed,
    created = report.created,
    linked = report.linked,
    ambiguous = report.ambiguous,
    skipped = report.skipped_empty_title,
    fingerprint = %report.fingerprint,
    "structuring finished"
  );
  Ok(report)
}

// ─── Conflict resolution ─────────────────────────────────────────────────────

/// An operator's decision on a parked conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictDecision {
  /// The record describes this paper.
  Attach(Uuid),
  /// The record describes a paper of its own.
  Distinct,
}

/// Settle the conflict parked for `raw_id` and return the link written.
///
/// The candidates keep their `ambiguous` flag; the refinement rule never
/// clears it.
pub async fn resolve_conflict<S>(
  store: &S,
  registry: &dyn VenueRegistry,
  raw_id: i64,
  decision: ConflictDecision,
) -> Result<SourceLink>
where
  S: CanonicalStore + RawFeed,
{
  let conflicts = store.conflicts().await.map_err(store_err)?;
  if !conflicts.iter().any(|c| c.raw_id == raw_id) {
    return Err(Error::NoConflict(raw_id));
  }
  let raw = store
    .get_raw(raw_id)
    .await
    .map_err(store_err)?
    .ok_or(Error::UnknownRawRecord(raw_id))?;
  let now = Utc::now();

  let (paper, link) = match decision {
    ConflictDecision::Attach(paper_id) => {
      let mut paper = store
        .get_paper(paper_id)
        .await
        .map_err(store_err)?
        .ok_or(Error::UnknownPaper(paper_id))?;
      merge_into(&mut paper, &raw, registry);
      let link = SourceLink {
        raw_id,
        paper_id,
        source: raw.source,
        confidence_score: MatchReason::OperatorResolved.base_confidence(),
        match_reason: MatchReason::OperatorResolved,
        linked_at: now,
      };
      (paper, link)
    }
    ConflictDecision::Distinct => {
      let title = normalize_title(&raw.title);
      found_paper(&raw, title, registry, now)
    }
  };

  info!(raw_id, paper_id = %link.paper_id, reason = %link.match_reason, "conflict resolved");
  store
    .commit_structuring(StructuringBatch {
      papers:             vec![paper],
      links:              vec![link.clone()],
      conflicts:          Vec::new(),
      resolved_conflicts: vec![raw_id],
    })
    .await
    .map_err(store_err)?;
  Ok(link)
}

#[cfg(test)]
mod tests {
  use papertrend_core::{paper::Domain, record::NewRawRecord};

  use super::*;
  use crate::venue::PatternRegistry;

  fn raw(source: Source, id: &str, title: &str, raw_id: i64) -> RawRecord {
    NewRawRecord::new(source, id, title, Utc::now()).into_record(raw_id)
  }

  #[test]
  fn founding_sets_provenance_and_venue() {
    let registry = PatternRegistry::builtin().unwrap();
    let mut rec = raw(Source::Arxiv, "2401.00001v2", "Sparse Mixtures", 7);
    rec.comments = Some("Accepted at ICLR 2024".into());
    rec.categories = vec!["cs.LG".into(), "cs.LG".into()];

    let (paper, link) = found_paper(&rec, "sparse mixtures".into(), &registry, Utc::now());
    assert_eq!(paper.paper_id, CanonicalPaper::id_for(Source::Arxiv, "2401.00001v2"));
    assert_eq!(paper.arxiv_id.as_deref(), Some("2401.00001"));
    assert_eq!(paper.venue.as_deref(), Some("ICLR"));
    assert_eq!(paper.venue_source, Some(Source::Arxiv));
    assert_eq!(paper.quality_flag, QualityFlag::Accepted);
    assert_eq!(paper.domain, Some(Domain::ML));
    assert_eq!(paper.categories, ["cs.LG"]);
    assert_eq!(paper.origin_raw_id, 7);
    assert_eq!(link.match_reason, MatchReason::Origin);
    assert_eq!(link.confidence_score, 1.0);
  }

  #[test]
  fn merge_fills_but_never_downgrades() {
    let registry = PatternRegistry::builtin().unwrap();
    let mut rec = raw(Source::OpenReview, "or1", "Sparse Mixtures", 1);
    rec.venue_raw = Some("ICLR 2024".into());
    let (mut paper, _) = found_paper(&rec, "sparse mixtures".into(), &registry, Utc::now());

    let mut arxiv = raw(Source::Arxiv, "2401.1", "Sparse Mixtures (preprint)", 2);
    arxiv.abstract_text = "We route tokens.".into();
    arxiv.comments = Some("Submitted to NeurIPS".into());
    arxiv.categories = vec!["cs.CL".into()];
    merge_into(&mut paper, &arxiv, &registry);

    assert_eq!(paper.display_title, "Sparse Mixtures");
    assert_eq!(paper.abstract_text, "We route tokens.");
    assert_eq!(paper.venue.as_deref(), Some("ICLR"));
    assert_eq!(paper.venue_source, Some(Source::OpenReview));
    assert_eq!(paper.quality_flag, QualityFlag::Accepted);
    assert_eq!(paper.primary_source, Source::OpenReview);
    assert_eq!(paper.categories, ["cs.CL"]);
    assert_eq!(paper.arxiv_id.as_deref(), Some("2401.1"));
  }

  #[test]
  fn higher_priority_source_overrides() {
    let registry = PatternRegistry::builtin().unwrap();
    let mut rec = raw(Source::Arxiv, "2401.1", "Sparse mixtures", 1);
    rec.comments = Some("NeurIPS 2023 workshop".into());
    let (mut paper, _) = found_paper(&rec, "sparse mixtures".into(), &registry, Utc::now());
    assert_eq!(paper.venue.as_deref(), Some("NeurIPS"));

    let mut or = raw(Source::OpenReview, "or1", "Sparse Mixtures of Experts", 2);
    or.venue_raw = Some("ICLR 2024 Oral".into());
    merge_into(&mut paper, &or, &registry);

    assert_eq!(paper.display_title, "Sparse Mixtures of Experts");
    assert_eq!(paper.canonical_title, "sparse mixtures of experts");
    assert_eq!(paper.venue.as_deref(), Some("ICLR"));
    assert_eq!(paper.venue_source, Some(Source::OpenReview));
    assert_eq!(paper.primary_source, Source::OpenReview);
  }
}
