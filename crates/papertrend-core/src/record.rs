//! Raw records: the immutable input feed.
//!
//! A raw record is a paper exactly as one source reported it. Records are
//! appended once by the ingestion collaborator and never updated or deleted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

// ─── Source ──────────────────────────────────────────────────────────────────

/// The data source a raw record was scraped from.
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
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Source {
  /// Conference-authority source; venue and acceptance are authoritative.
  OpenReview,
  /// Structured-metadata anchor.
  OpenAlex,
  /// Semantic Scholar enrichment.
  #[serde(rename = "s2")]
  #[strum(serialize = "s2")]
  SemanticScholar,
  /// Preprint server.
  Arxiv,
}

impl Source {
  /// Priority used when two sources disagree about a field. Higher wins.
  pub fn priority(self) -> u8 {
    match self {
      Self::OpenReview => 4,
      Self::OpenAlex => 3,
      Self::SemanticScholar => 2,
      Self::Arxiv => 1,
    }
  }
}

// ─── RawRecord ───────────────────────────────────────────────────────────────

/// A persisted raw record. `(source, source_id)` is unique.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRecord {
  /// Store-assigned insertion sequence; the structuring iteration order.
  pub raw_id:        i64,
  pub source:        Source,
  pub source_id:     String,
  pub title:         String,
  #[serde(rename = "abstract")]
  pub abstract_text: String,
  pub authors:       Vec<String>,
  pub year:          Option<i32>,
  /// Venue string exactly as the source reported it.
  pub venue_raw:     Option<String>,
  pub categories:    Vec<String>,
  pub doi:           Option<String>,
  pub arxiv_id:      Option<String>,
  pub openalex_id:   Option<String>,
  /// Free-text author comments (arXiv), e.g. "Accepted at ICLR 2024".
  pub comments:      Option<String>,
  pub journal_ref:   Option<String>,
  pub retrieved_at:  DateTime<Utc>,
  /// Publication timestamp as reported; parsed only when bucketing.
  pub published_at:  Option<String>,
}

impl RawRecord {
  /// The arXiv identifier, falling back to `source_id` for arXiv records.
  pub fn native_arxiv_id(&self) -> Option<&str> {
    match (&self.arxiv_id, self.source) {
      (Some(id), _) => Some(id.as_str()),
      (None, Source::Arxiv) => Some(self.source_id.as_str()),
      _ => None,
    }
  }

  /// The OpenAlex identifier, falling back to `source_id` for OpenAlex
  /// records.
  pub fn native_openalex_id(&self) -> Option<&str> {
    match (&self.openalex_id, self.source) {
      (Some(id), _) => Some(id.as_str()),
      (None, Source::OpenAlex) => Some(self.source_id.as_str()),
      _ => None,
    }
  }
}

// ─── NewRawRecord ────────────────────────────────────────────────────────────

/// Input to [`crate::store::RawFeed::append`]. `raw_id` is assigned by the
/// store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewRawRecord {
  pub source:        Source,
  pub source_id:     String,
  pub title:         String,
  #[serde(rename = "abstract", default)]
  pub abstract_text: String,
  #[serde(default)]
  pub authors:       Vec<String>,
  #[serde(default)]
  pub year:          Option<i32>,
  #[serde(default)]
  pub venue_raw:     Option<String>,
  #[serde(default)]
  pub categories:    Vec<String>,
  #[serde(default)]
  pub doi:           Option<String>,
  #[serde(default)]
  pub arxiv_id:      Option<String>,
  #[serde(default)]
  pub openalex_id:   Option<String>,
  #[serde(default)]
  pub comments:      Option<String>,
  #[serde(default)]
  pub journal_ref:   Option<String>,
  pub retrieved_at:  DateTime<Utc>,
  #[serde(default)]
  pub published_at:  Option<String>,
}

impl NewRawRecord {
  /// Convenience constructor with all optional fields empty.
  pub fn new(
    source: Source,
    source_id: impl Into<String>,
    title: impl Into<String>,
    retrieved_at: DateTime<Utc>,
  ) -> Self {
    Self {
      source,
      source_id: source_id.into(),
      title: title.into(),
      abstract_text: String::new(),
      authors: Vec::new(),
      year: None,
      venue_raw: None,
      categories: Vec::new(),
      doi: None,
      arxiv_id: None,
      openalex_id: None,
      comments: None,
      journal_ref: None,
      retrieved_at,
      published_at: None,
    }
  }

  pub fn into_record(self, raw_id: i64) -> RawRecord {
    RawRecord {
      raw_id,
      source: self.source,
      source_id: self.source_id,
      title: self.title,
      abstract_text: self.abstract_text,
      authors: self.authors,
      year: self.year,
      venue_raw: self.venue_raw,
      categories: self.categories,
      doi: self.doi,
      arxiv_id: self.arxiv_id,
      openalex_id: self.openalex_id,
      comments: self.comments,
      journal_ref: self.journal_ref,
      retrieved_at: self.retrieved_at,
      published_at: self.published_at,
    }
  }
}
