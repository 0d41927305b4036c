//! Pluggable capabilities supplied by external collaborators: keyword
//! extraction and venue lookup.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

use crate::{
  Result,
  paper::Venue,
  record::Source,
};

// ─── Keyword extraction ──────────────────────────────────────────────────────

/// Which tier of the keyword chain served a paper. Declared in priority
/// order.
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Hash,
  PartialOrd,
  Ord,
  Serialize,
  Deserialize,
  Display,
  EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum KeywordTier {
  Stored,
  Extracted,
  Frequency,
}

/// A candidate keyword with its provider-specific score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredTerm {
  pub term:  String,
  pub score: f64,
}

impl ScoredTerm {
  pub fn new(term: impl Into<String>, score: f64) -> Self {
    Self { term: term.into(), score }
  }
}

/// Everything a provider may look at for one paper.
#[derive(Debug, Clone, Copy)]
pub struct ExtractionInput<'a> {
  pub paper_id: Uuid,
  /// `"{title}. {abstract}"`.
  pub text:     &'a str,
  /// Keywords previously persisted for this paper.
  pub stored:   &'a [String],
}

/// One tier of the keyword chain.
///
/// Returning an empty list passes the paper to the next tier. Returning
/// [`crate::Error::ExtractionUnavailable`] does the same but marks the run
/// as degraded.
#[async_trait]
pub trait KeywordProvider: Send + Sync {
  fn tier(&self) -> KeywordTier;

  async fn extract(&self, input: ExtractionInput<'_>) -> Result<Vec<ScoredTerm>>;
}

// ─── Venue registry ──────────────────────────────────────────────────────────

/// Canonical venue lookup.
pub trait VenueRegistry: Send + Sync {
  /// Resolve a raw venue string as reported by `source`. `None` means
  /// unknown.
  fn lookup(&self, raw_venue: &str, source: Source) -> Option<Venue>;

  /// Every venue the registry can resolve to.
  fn list_known_venues(&self) -> Vec<Venue>;
}
