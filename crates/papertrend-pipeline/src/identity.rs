//! Identity resolution: which canonical paper, if any, a raw record
//! describes.
//!
//! Match priority, first hit wins:
//!
//! 1. exact DOI
//! 2. exact source-native id (arXiv)
//! 3. exact external-anchor id (OpenAlex)
//! 4. exact normalised title + year
//! 5. fuzzy normalised title (normalised Levenshtein ≥ threshold), year
//!    within ±1
//!
//! Exact-key ties prefer the candidate whose primary source has the higher
//! priority, then the earliest founding record. Several fuzzy candidates are
//! never auto-merged.

use std::collections::{BTreeMap, HashMap};

use papertrend_core::{
  paper::{CanonicalPaper, MatchReason},
  record::RawRecord,
};
use uuid::Uuid;

use crate::normalize::{normalize_arxiv_id, normalize_doi, normalize_openalex_id};

/// Outcome of [`resolve_identity`].
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
  /// No existing paper matches; the record founds a new one.
  New,
  Matched {
    paper_id:   Uuid,
    reason:     MatchReason,
    confidence: f64,
  },
  /// Several fuzzy candidates cleared the threshold.
  Ambiguous {
    candidates:      Vec<Uuid>,
    best_similarity: f64,
  },
}

/// Match keys of one indexed paper.
#[derive(Debug, Clone)]
struct Entry {
  title:         String,
  year:          Option<i32>,
  doi:           Option<String>,
  arxiv_id:      Option<String>,
  openalex_id:   Option<String>,
  priority:      u8,
  origin_raw_id: i64,
}

impl Entry {
  fn of(paper: &CanonicalPaper) -> Self {
    Self {
      title:         paper.canonical_title.clone(),
      year:          paper.year,
      doi:           paper.doi.as_deref().and_then(normalize_doi),
      arxiv_id:      paper.arxiv_id.as_deref().and_then(normalize_arxiv_id),
      openalex_id:   paper.openalex_id.as_deref().and_then(normalize_openalex_id),
      priority:      paper.primary_source.priority(),
      origin_raw_id: paper.origin_raw_id,
    }
  }
}

/// In-memory lookup tables over the canonical set.
#[derive(Debug, Default)]
pub struct IdentityIndex {
  entries:       HashMap<Uuid, Entry>,
  by_doi:        HashMap<String, Vec<Uuid>>,
  by_arxiv:      HashMap<String, Vec<Uuid>>,
  by_openalex:   HashMap<String, Vec<Uuid>>,
  by_title_year: HashMap<(String, i32), Vec<Uuid>>,
  by_year:       BTreeMap<i32, Vec<Uuid>>,
}

fn add_key<K: std::hash::Hash + Eq>(map: &mut HashMap<K, Vec<Uuid>>, key: K, id: Uuid) {
  map.entry(key).or_default().push(id);
}

fn remove_key<K: std::hash::Hash + Eq>(map: &mut HashMap<K, Vec<Uuid>>, key: &K, id: Uuid) {
  if let Some(ids) = map.get_mut(key) {
    ids.retain(|x| *x != id);
    if ids.is_empty() {
      map.remove(key);
    }
  }
}

impl IdentityIndex {
  pub fn build<'a>(papers: impl IntoIterator<Item = &'a CanonicalPaper>) -> Self {
    let mut index = Self::default();
    for paper in papers {
      index.upsert(paper);
    }
    index
  }

  pub fn len(&self) -> usize { self.entries.len() }

  pub fn is_empty(&self) -> bool { self.entries.is_empty() }

  /// Index `paper`, replacing any keys a previous version registered.
  pub fn upsert(&mut self, paper: &CanonicalPaper) {
    let id = paper.paper_id;
    if let Some(old) = self.entries.remove(&id) {
      if let Some(doi) = &old.doi {
        remove_key(&mut self.by_doi, doi, id);
      }
      if let Some(arxiv) = &old.arxiv_id {
        remove_key(&mut self.by_arxiv, arxiv, id);
      }
      if let Some(openalex) = &old.openalex_id {
        remove_key(&mut self.by_openalex, openalex, id);
      }
      if let Some(year) = old.year {
        remove_key(&mut self.by_title_year, &(old.title.clone(), year), id);
        if let Some(ids) = self.by_year.get_mut(&year) {
          ids.retain(|x| *x != id);
        }
      }
    }

    let entry = Entry::of(paper);
    if let Some(doi) = &entry.doi {
      add_key(&mut self.by_doi, doi.clone(), id);
    }
    if let Some(arxiv) = &entry.arxiv_id {
      add_key(&mut self.by_arxiv, arxiv.clone(), id);
    }
    if let Some(openalex) = &entry.openalex_id {
      add_key(&mut self.by_openalex, openalex.clone(), id);
    }
    if let Some(year) = entry.year {
      add_key(&mut self.by_title_year, (entry.title.clone(), year), id);
      self.by_year.entry(year).or_default().push(id);
    }
    self.entries.insert(id, entry);
  }

  /// Best exact-key candidate: highest source priority, then earliest
  /// founding record.
  fn pick(&self, ids: Option<&Vec<Uuid>>) -> Option<Uuid> {
    ids?
      .iter()
      .filter_map(|id| self.entries.get(id).map(|e| (id, e)))
      .min_by(|(_, a), (_, b)| {
        b.priority
          .cmp(&a.priority)
          .then_with(|| a.origin_raw_id.cmp(&b.origin_raw_id))
      })
      .map(|(id, _)| *id)
  }

  fn candidate_order(&self, ids: &mut [Uuid]) {
    ids.sort_by(|a, b| {
      let (ea, eb) = (&self.entries[a], &self.entries[b]);
      eb.priority
        .cmp(&ea.priority)
        .then_with(|| ea.origin_raw_id.cmp(&eb.origin_raw_id))
    });
  }
}

/// Decide which canonical paper `raw` belongs to.
///
/// `canonical_title` is `normalize_title(&raw.title)`, already checked to be
/// non-empty.
pub fn resolve_identity(
  raw: &RawRecord,
  canonical_title: &str,
  index: &IdentityIndex,
  fuzzy_threshold: f64,
) -> Resolution {
  let exact = |paper_id: Uuid, reason: MatchReason| Resolution::Matched {
    paper_id,
    reason,
    confidence: reason.base_confidence(),
  };

  if let Some(doi) = raw.doi.as_deref().and_then(normalize_doi)
    && let Some(id) = index.pick(index.by_doi.get(&doi))
  {
    return exact(id, MatchReason::Doi);
  }
  if let Some(arxiv) = raw.native_arxiv_id().and_then(normalize_arxiv_id)
    && let Some(id) = index.pick(index.by_arxiv.get(&arxiv))
  {
    return exact(id, MatchReason::SourceNativeId);
  }
  if let Some(openalex) = raw.native_openalex_id().and_then(normalize_openalex_id)
    && let Some(id) = index.pick(index.by_openalex.get(&openalex))
  {
    return exact(id, MatchReason::ExternalAnchorId);
  }

  let Some(year) = raw.year else {
    return Resolution::New;
  };
  if let Some(id) =
    index.pick(index.by_title_year.get(&(canonical_title.to_owned(), year)))
  {
    return exact(id, MatchReason::ExactTitleYear);
  }

  let mut hits: Vec<(Uuid, f64)> = Vec::new();
  for (_, ids) in index.by_year.range(year.saturating_sub(1)..=year.saturating_add(1)) {
    for id in ids {
      let Some(entry) = index.entries.get(id) else { continue };
      let similarity = strsim::normalized_levenshtein(canonical_title, &entry.title);
      if similarity >= fuzzy_threshold {
        hits.push((*id, similarity));
      }
    }
  }

  match hits.as_slice() {
    [] => Resolution::New,
    [(paper_id, similarity)] => Resolution::Matched {
      paper_id:   *paper_id,
      reason:     MatchReason::FuzzyTitle,
      confidence: *similarity,
    },
    _ => {
      let best_similarity = hits.iter().map(|(_, s)| *s).fold(0.0, f64::max);
      let mut candidates: Vec<Uuid> = hits.into_iter().map(|(id, _)| id).collect();
      index.candidate_order(&mut candidates);
      Resolution::Ambiguous { candidates, best_similarity }
    }
  }
}
