//! Encoding and decoding helpers between Rust domain types and the plain-text
//! representations stored in SQLite columns.
//!
//! Timestamps are stored as fixed-width RFC 3339 UTC strings (microsecond
//! precision, `Z` suffix) so that lexical order equals chronological order
//! and `MAX()` works on them. Lists are stored as compact JSON. UUIDs are
//! stored as hyphenated lowercase strings. Enums use their strum string
//! forms.

use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use papertrend_core::{
  paper::{CanonicalPaper, MatchConflict, SourceLink},
  record::RawRecord,
  run::RunRecord,
  trend::{
    BucketSummary, EmergingRecord, KeywordCount, Scope, ScopeKey, ScopeSummary,
  },
};
use uuid::Uuid;

use crate::{Error, Result};

// ─── Uuid ─────────────────────────────────────────────────────────────────────

pub fn encode_uuid(id: Uuid) -> String { id.hyphenated().to_string() }

pub fn decode_uuid(s: &str) -> Result<Uuid> { Ok(Uuid::parse_str(s)?) }

// ─── DateTime<Utc> ────────────────────────────────────────────────────────────

pub fn encode_dt(dt: DateTime<Utc>) -> String {
  dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::DateParse(e.to_string()))
}

// ─── Enums ───────────────────────────────────────────────────────────────────

pub fn decode_enum<T: FromStr>(column: &'static str, s: &str) -> Result<T> {
  T::from_str(s).map_err(|_| Error::UnknownValue { column, value: s.to_owned() })
}

pub fn decode_scope(scope: &str, scope_id: String) -> Result<ScopeKey> {
  Ok(ScopeKey { scope: decode_enum::<Scope>("scope", scope)?, scope_id })
}

// ─── JSON lists ──────────────────────────────────────────────────────────────

pub fn encode_list<T: serde::Serialize>(items: &[T]) -> Result<String> {
  Ok(serde_json::to_string(items)?)
}

pub fn decode_list<T: serde::de::DeserializeOwned>(s: &str) -> Result<Vec<T>> {
  Ok(serde_json::from_str(s)?)
}

// ─── Row types ───────────────────────────────────────────────────────────────

pub const RAW_RECORD_COLUMNS: &str = "raw_id, source, source_id, title, \
   abstract, authors, year, venue_raw, categories, doi, arxiv_id, \
   openalex_id, comments, journal_ref, retrieved_at, published_at";

/// Raw strings read directly from a `raw_records` row.
pub struct RawRecordRow {
  pub raw_id:        i64,
  pub source:        String,
  pub source_id:     String,
  pub title:         String,
  pub abstract_text: String,
  pub authors:       String,
  pub year:          Option<i32>,
  pub venue_raw:     Option<String>,
  pub categories:    String,
  pub doi:           Option<String>,
  pub arxiv_id:      Option<String>,
  pub openalex_id:   Option<String>,
  pub comments:      Option<String>,
  pub journal_ref:   Option<String>,
  pub retrieved_at:  String,
  pub published_at:  Option<String>,
}

impl RawRecordRow {
  /// Reads the columns listed in [`RAW_RECORD_COLUMNS`], in order.
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      raw_id:        row.get(0)?,
      source:        row.get(1)?,
      source_id:     row.get(2)?,
      title:         row.get(3)?,
      abstract_text: row.get(4)?,
      authors:       row.get(5)?,
      year:          row.get(6)?,
      venue_raw:     row.get(7)?,
      categories:    row.get(8)?,
      doi:           row.get(9)?,
      arxiv_id:      row.get(10)?,
      openalex_id:   row.get(11)?,
      comments:      row.get(12)?,
      journal_ref:   row.get(13)?,
      retrieved_at:  row.get(14)?,
      published_at:  row.get(15)?,
    })
  }

  pub fn into_record(self) -> Result<RawRecord> {
    Ok(RawRecord {
      raw_id:        self.raw_id,
      source:        decode_enum("source", &self.source)?,
      source_id:     self.source_id,
      title:         self.title,
      abstract_text: self.abstract_text,
      authors:       decode_list(&self.authors)?,
      year:          self.year,
      venue_raw:     self.venue_raw,
      categories:    decode_list(&self.categories)?,
      doi:           self.doi,
      arxiv_id:      self.arxiv_id,
      openalex_id:   self.openalex_id,
      comments:      self.comments,
      journal_ref:   self.journal_ref,
      retrieved_at:  decode_dt(&self.retrieved_at)?,
      published_at:  self.published_at,
    })
  }
}

pub const PAPER_COLUMNS: &str = "paper_id, canonical_title, display_title, \
   abstract, authors, year, venue, venue_source, domain, quality_flag, \
   categories, doi, arxiv_id, openalex_id, published_at, first_seen_at, \
   primary_source, origin_raw_id";

/// Raw strings read directly from a `papers` row.
pub struct RawPaper {
  pub paper_id:        String,
  pub canonical_title: String,
  pub display_title:   String,
  pub abstract_text:   String,
  pub authors:         String,
  pub year:            Option<i32>,
  pub venue:           Option<String>,
  pub venue_source:    Option<String>,
  pub domain:          Option<String>,
  pub quality_flag:    String,
  pub categories:      String,
  pub doi:             Option<String>,
  pub arxiv_id:        Option<String>,
  pub openalex_id:     Option<String>,
  pub published_at:    Option<String>,
  pub first_seen_at:   String,
  pub primary_source:  String,
  pub origin_raw_id:   i64,
}

impl RawPaper {
  /// Reads the columns listed in [`PAPER_COLUMNS`], in order.
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      paper_id:        row.get(0)?,
      canonical_title: row.get(1)?,
      display_title:   row.get(2)?,
      abstract_text:   row.get(3)?,
      authors:         row.get(4)?,
      year:            row.get(5)?,
      venue:           row.get(6)?,
      venue_source:    row.get(7)?,
      domain:          row.get(8)?,
      quality_flag:    row.get(9)?,
      categories:      row.get(10)?,
      doi:             row.get(11)?,
      arxiv_id:        row.get(12)?,
      openalex_id:     row.get(13)?,
      published_at:    row.get(14)?,
      first_seen_at:   row.get(15)?,
      primary_source:  row.get(16)?,
      origin_raw_id:   row.get(17)?,
    })
  }

  pub fn into_paper(self) -> Result<CanonicalPaper> {
    Ok(CanonicalPaper {
      paper_id:        decode_uuid(&self.paper_id)?,
      canonical_title: self.canonical_title,
      display_title:   self.display_title,
      abstract_text:   self.abstract_text,
      authors:         decode_list(&self.authors)?,
      year:            self.year,
      venue:           self.venue,
      venue_source:    self
        .venue_source
        .as_deref()
        .map(|s| decode_enum("venue_source", s))
        .transpose()?,
      domain:          self
        .domain
        .as_deref()
        .map(|s| decode_enum("domain", s))
        .transpose()?,
      quality_flag:    decode_enum("quality_flag", &self.quality_flag)?,
      categories:      decode_list(&self.categories)?,
      doi:             self.doi,
      arxiv_id:        self.arxiv_id,
      openalex_id:     self.openalex_id,
      published_at:    self.published_at,
      first_seen_at:   decode_dt(&self.first_seen_at)?,
      primary_source:  decode_enum("primary_source", &self.primary_source)?,
      origin_raw_id:   self.origin_raw_id,
    })
  }
}

pub const LINK_COLUMNS: &str =
  "raw_id, paper_id, source, confidence_score, match_reason, linked_at";

/// Raw strings read directly from a `source_links` row.
pub struct RawLink {
  pub raw_id:           i64,
  pub paper_id:         String,
  pub source:           String,
  pub confidence_score: f64,
  pub match_reason:     String,
  pub linked_at:        String,
}

impl RawLink {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      raw_id:           row.get(0)?,
      paper_id:         row.get(1)?,
      source:           row.get(2)?,
      confidence_score: row.get(3)?,
      match_reason:     row.get(4)?,
      linked_at:        row.get(5)?,
    })
  }

  pub fn into_link(self) -> Result<SourceLink> {
    Ok(SourceLink {
      raw_id:           self.raw_id,
      paper_id:         decode_uuid(&self.paper_id)?,
      source:           decode_enum("source", &self.source)?,
      confidence_score: self.confidence_score,
      match_reason:     decode_enum("match_reason", &self.match_reason)?,
      linked_at:        decode_dt(&self.linked_at)?,
    })
  }
}

/// Raw strings read directly from a `match_conflicts` row.
pub struct RawConflict {
  pub raw_id:          i64,
  pub candidates:      String,
  pub best_similarity: f64,
  pub recorded_at:     String,
}

impl RawConflict {
  pub fn into_conflict(self) -> Result<MatchConflict> {
    Ok(MatchConflict {
      raw_id:          self.raw_id,
      candidates:      decode_list(&self.candidates)?,
      best_similarity: self.best_similarity,
      recorded_at:     decode_dt(&self.recorded_at)?,
    })
  }
}

/// Raw strings read directly from a `bucket_summaries` row.
pub struct RawBucketSummary {
  pub scope:        String,
  pub scope_id:     String,
  pub granularity:  String,
  pub bucket:       String,
  pub paper_count:  i64,
  pub top_keywords: String,
  pub updated_at:   String,
}

impl RawBucketSummary {
  pub fn into_summary(self) -> Result<BucketSummary> {
    Ok(BucketSummary {
      scope:        decode_scope(&self.scope, self.scope_id)?,
      granularity:  decode_enum("granularity", &self.granularity)?,
      bucket:       self.bucket,
      paper_count:  self.paper_count.max(0) as u64,
      top_keywords: decode_list::<KeywordCount>(&self.top_keywords)?,
      updated_at:   decode_dt(&self.updated_at)?,
    })
  }
}

/// Raw strings read directly from a `scope_summaries` row.
pub struct RawScopeSummary {
  pub scope:        String,
  pub scope_id:     String,
  pub paper_count:  i64,
  pub top_keywords: String,
  pub updated_at:   String,
}

impl RawScopeSummary {
  pub fn into_summary(self) -> Result<ScopeSummary> {
    Ok(ScopeSummary {
      scope:        decode_scope(&self.scope, self.scope_id)?,
      paper_count:  self.paper_count.max(0) as u64,
      top_keywords: decode_list::<KeywordCount>(&self.top_keywords)?,
      updated_at:   decode_dt(&self.updated_at)?,
    })
  }
}

/// Raw strings read directly from an `emerging_records` row.
pub struct RawEmerging {
  pub scope:          String,
  pub scope_id:       String,
  pub keyword:        String,
  pub granularity:    String,
  /// `None` encodes unbounded growth.
  pub growth_rate:    Option<f64>,
  pub recent_count:   i64,
  pub previous_count: i64,
  pub first_seen:     String,
  pub trend:          String,
  pub updated_at:     String,
}

impl RawEmerging {
  pub fn into_record(self) -> Result<EmergingRecord> {
    Ok(EmergingRecord {
      scope:          decode_scope(&self.scope, self.scope_id)?,
      keyword:        self.keyword,
      granularity:    decode_enum("granularity", &self.granularity)?,
      growth_rate:    self.growth_rate.unwrap_or(f64::INFINITY),
      recent_count:   self.recent_count.max(0) as u64,
      previous_count: self.previous_count.max(0) as u64,
      first_seen:     self.first_seen,
      trend:          decode_enum("trend", &self.trend)?,
      updated_at:     decode_dt(&self.updated_at)?,
    })
  }
}

pub const RUN_COLUMNS: &str = "run_id, started_at, finished_at, status, \
   degraded, degraded_papers, timestamp_fallbacks, bucket_format_errors, \
   papers_processed, note";

/// Raw strings read directly from a `run_log` row.
pub struct RawRun {
  pub run_id:               String,
  pub started_at:           String,
  pub finished_at:          String,
  pub status:               String,
  pub degraded:             bool,
  pub degraded_papers:      i64,
  pub timestamp_fallbacks:  i64,
  pub bucket_format_errors: i64,
  pub papers_processed:     i64,
  pub note:                 Option<String>,
}

impl RawRun {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      run_id:               row.get(0)?,
      started_at:           row.get(1)?,
      finished_at:          row.get(2)?,
      status:               row.get(3)?,
      degraded:             row.get(4)?,
      degraded_papers:      row.get(5)?,
      timestamp_fallbacks:  row.get(6)?,
      bucket_format_errors: row.get(7)?,
      papers_processed:     row.get(8)?,
      note:                 row.get(9)?,
    })
  }

  pub fn into_run(self) -> Result<RunRecord> {
    Ok(RunRecord {
      run_id:               decode_uuid(&self.run_id)?,
      started_at:           decode_dt(&self.started_at)?,
      finished_at:          decode_dt(&self.finished_at)?,
      status:               decode_enum("status", &self.status)?,
      degraded:             self.degraded,
      degraded_papers:      self.degraded_papers.max(0) as u64,
      timestamp_fallbacks:  self.timestamp_fallbacks.max(0) as u64,
      bucket_format_errors: self.bucket_format_errors.max(0) as u64,
      papers_processed:     self.papers_processed.max(0) as u64,
      note:                 self.note,
    })
  }
}
