//! Canonical papers and their provenance links.
//!
//! A canonical paper is the deduplicated view of one or more raw records.
//! Each contributing raw record is tied to it by an append-only
//! [`SourceLink`]. Field refinement is monotonic: a field is filled from
//! empty, or overridden by a strictly higher-priority source, never reset.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

use crate::record::Source;

/// Namespace for deriving paper ids from founding raw-record keys.
pub const PAPER_NAMESPACE: Uuid =
  Uuid::from_u128(0x6d1f_3c2a_9b4e_4f7a_8c0d_5e2b_1a9f_7c31);

// ─── Flags & tags ────────────────────────────────────────────────────────────

/// Editorial quality of a canonical paper.
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Default,
  Serialize,
  Deserialize,
  Display,
  EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum QualityFlag {
  Accepted,
  #[default]
  Unknown,
  /// Involved in an unresolved fuzzy-match conflict.
  Ambiguous,
  /// Excluded from aggregation (e.g. withdrawn).
  Filtered,
}

impl QualityFlag {
  /// Merge an incoming flag into the current one without downgrading.
  ///
  /// `unknown` may be promoted to anything; `accepted` only yields to the
  /// sticky `ambiguous`/`filtered` markers; those never change.
  pub fn refine(self, incoming: Self) -> Self {
    match (self, incoming) {
      (Self::Ambiguous | Self::Filtered, _) => self,
      (Self::Unknown, other) => other,
      (Self::Accepted, Self::Ambiguous | Self::Filtered) => incoming,
      (Self::Accepted, _) => self,
    }
  }

  /// Whether papers with this flag feed the trend cache.
  pub fn is_aggregated(self) -> bool { !matches!(self, Self::Filtered) }
}

/// Coarse research area.
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Hash,
  Serialize,
  Deserialize,
  Display,
  EnumString,
)]
pub enum Domain {
  CV,
  NLP,
  ML,
  RL,
  AI,
}

/// Why a raw record was linked to a canonical paper.
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Hash,
  Serialize,
  Deserialize,
  Display,
  EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum MatchReason {
  /// The record founded the paper.
  Origin,
  Doi,
  SourceNativeId,
  ExternalAnchorId,
  ExactTitleYear,
  FuzzyTitle,
  /// Linked by an operator while resolving a [`MatchConflict`].
  OperatorResolved,
}

impl MatchReason {
  /// Confidence assigned to exact matches; fuzzy links carry their
  /// similarity ratio instead.
  pub fn base_confidence(self) -> f64 {
    match self {
      Self::Origin | Self::Doi | Self::SourceNativeId => 1.0,
      Self::OperatorResolved => 1.0,
      Self::ExternalAnchorId => 0.98,
      Self::ExactTitleYear => 0.95,
      Self::FuzzyTitle => 0.92,
    }
  }
}

// ─── Venue ───────────────────────────────────────────────────────────────────

/// A venue as described by the external registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Venue {
  pub canonical_name: String,
  pub full_name:      Option<String>,
  pub domain:         Option<Domain>,
  /// Registry-specific tier, e.g. a CCF rank.
  pub tier:           Option<String>,
  pub first_year:     Option<i32>,
  pub last_year:      Option<i32>,
}

// ─── CanonicalPaper ──────────────────────────────────────────────────────────

/// The deduplicated representation of a paper.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalPaper {
  /// UUIDv5 of the founding record key; stable across rebuilds.
  pub paper_id:        Uuid,
  /// Normalized title used for matching.
  pub canonical_title: String,
  pub display_title:   String,
  #[serde(rename = "abstract")]
  pub abstract_text:   String,
  pub authors:         Vec<String>,
  pub year:            Option<i32>,
  /// Canonical venue name; `None` means unknown.
  pub venue:           Option<String>,
  /// The source whose lookup set `venue`.
  pub venue_source:    Option<Source>,
  pub domain:          Option<Domain>,
  pub quality_flag:    QualityFlag,
  pub categories:      Vec<String>,
  pub doi:             Option<String>,
  pub arxiv_id:        Option<String>,
  pub openalex_id:     Option<String>,
  pub published_at:    Option<String>,
  /// `retrieved_at` of the founding record; the change-detection timestamp.
  pub first_seen_at:   DateTime<Utc>,
  /// Highest-priority source linked so far.
  pub primary_source:  Source,
  /// `raw_id` of the founding record; the final tie-break.
  pub origin_raw_id:   i64,
}

impl CanonicalPaper {
  pub fn id_for(source: Source, source_id: &str) -> Uuid {
    Uuid::new_v5(&PAPER_NAMESPACE, format!("{source}:{source_id}").as_bytes())
  }

  /// Text fed to keyword extraction: `"{title}. {abstract}"`.
  pub fn extraction_text(&self) -> String {
    if self.abstract_text.is_empty() {
      self.display_title.clone()
    } else {
      format!("{}. {}", self.display_title, self.abstract_text)
    }
  }
}

// ─── SourceLink ──────────────────────────────────────────────────────────────

/// Append-only join from a raw record to its canonical paper.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceLink {
  pub raw_id:           i64,
  pub paper_id:         Uuid,
  pub source:           Source,
  pub confidence_score: f64,
  pub match_reason:     MatchReason,
  pub linked_at:        DateTime<Utc>,
}

// ─── MatchConflict ───────────────────────────────────────────────────────────

/// A raw record whose fuzzy match was ambiguous, awaiting resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchConflict {
  pub raw_id:          i64,
  /// Candidate paper ids, in tie-break order.
  pub candidates:      Vec<Uuid>,
  pub best_similarity: f64,
  pub recorded_at:     DateTime<Utc>,
}

// ─── PaperKeyword ────────────────────────────────────────────────────────────

/// How a persisted keyword was obtained.
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Hash,
  Serialize,
  Deserialize,
  Display,
  EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum KeywordMethod {
  /// Returned by the extraction capability and persisted for reuse.
  Extracted,
}

/// A keyword stored against a canonical paper.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaperKeyword {
  pub paper_id: Uuid,
  pub keyword:  String,
  pub method:   KeywordMethod,
  pub score:    f64,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn quality_refinement_never_downgrades() {
    use QualityFlag::*;
    assert_eq!(Unknown.refine(Accepted), Accepted);
    assert_eq!(Accepted.refine(Unknown), Accepted);
    assert_eq!(Accepted.refine(Ambiguous), Ambiguous);
    assert_eq!(Ambiguous.refine(Accepted), Ambiguous);
    assert_eq!(Filtered.refine(Accepted), Filtered);
  }

  #[test]
  fn paper_ids_are_stable() {
    let a = CanonicalPaper::id_for(Source::Arxiv, "2401.00001");
    let b = CanonicalPaper::id_for(Source::Arxiv, "2401.00001");
    let c = CanonicalPaper::id_for(Source::OpenReview, "2401.00001");
    assert_eq!(a, b);
    assert_ne!(a, c);
  }
}
