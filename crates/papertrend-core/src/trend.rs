//! Trend cache types: scopes, time buckets, cache entries, and emerging
//! keyword records.
//!
//! Everything here is derived data. It can be rebuilt from the canonical
//! store at any time.

use std::fmt;

use chrono::{DateTime, Datelike, Months, NaiveDate, Utc, Weekday};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};

use crate::{Error, Result};

// ─── Scope ───────────────────────────────────────────────────────────────────

/// The population a trend is computed over.
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
pub enum Scope {
  Global,
  Venue,
  Category,
}

/// A concrete scope instance, e.g. `venue:ICLR` or `category:cs.LG`.
#[derive(
  Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct ScopeKey {
  pub scope:    Scope,
  pub scope_id: String,
}

impl ScopeKey {
  /// `scope_id` used for the single global scope.
  pub const GLOBAL_ID: &'static str = "all";

  pub fn global() -> Self {
    Self { scope: Scope::Global, scope_id: Self::GLOBAL_ID.to_owned() }
  }

  pub fn venue(name: impl Into<String>) -> Self {
    Self { scope: Scope::Venue, scope_id: name.into() }
  }

  pub fn category(name: impl Into<String>) -> Self {
    Self { scope: Scope::Category, scope_id: name.into() }
  }
}

impl fmt::Display for ScopeKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}:{}", self.scope, self.scope_id)
  }
}

// ─── Granularity ─────────────────────────────────────────────────────────────

/// Width of a time bucket.
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
  EnumIter,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Granularity {
  Day,
  Week,
  Month,
  Year,
}

impl Granularity {
  /// The bucket label containing `date`.
  ///
  /// Day `YYYY-MM-DD`, week ISO-8601 `YYYY-Www`, month `YYYY-MM`, year
  /// `YYYY`.
  pub fn label(self, date: NaiveDate) -> String {
    match self {
      Self::Day => date.format("%Y-%m-%d").to_string(),
      Self::Week => {
        let iso = date.iso_week();
        format!("{:04}-W{:02}", iso.year(), iso.week())
      }
      Self::Month => date.format("%Y-%m").to_string(),
      Self::Year => format!("{:04}", date.year()),
    }
  }

  /// First calendar day of the bucket named by `label`.
  pub fn bucket_start(self, label: &str) -> Result<NaiveDate> {
    let invalid = || Error::InvalidBucketLabel {
      granularity: self,
      label:       label.to_owned(),
    };
    let date = match self {
      Self::Day => NaiveDate::parse_from_str(label, "%Y-%m-%d").ok(),
      Self::Week => {
        let (year, week) = label.split_once("-W").ok_or_else(invalid)?;
        let year: i32 = year.parse().map_err(|_| invalid())?;
        let week: u32 = week.parse().map_err(|_| invalid())?;
        NaiveDate::from_isoywd_opt(year, week, Weekday::Mon)
      }
      Self::Month => {
        NaiveDate::parse_from_str(&format!("{label}-01"), "%Y-%m-%d").ok()
      }
      Self::Year => label
        .parse::<i32>()
        .ok()
        .filter(|_| label.len() == 4)
        .and_then(|y| NaiveDate::from_ymd_opt(y, 1, 1)),
    };
    date.ok_or_else(invalid)
  }

  /// Move `date` by `n` buckets (negative = backwards).
  pub fn shift(self, date: NaiveDate, n: i32) -> Option<NaiveDate> {
    let months = |m: i32| {
      if m >= 0 {
        date.checked_add_months(Months::new(m as u32))
      } else {
        date.checked_sub_months(Months::new(m.unsigned_abs()))
      }
    };
    match self {
      Self::Day => date.checked_add_signed(chrono::Duration::days(n.into())),
      Self::Week => {
        date.checked_add_signed(chrono::Duration::weeks(n.into()))
      }
      Self::Month => months(n),
      Self::Year => months(n.checked_mul(12)?),
    }
  }

  /// Label of the `parent` bucket containing the bucket `label`, if `self`
  /// nests inside `parent` without straddling it.
  pub fn parent_label(self, label: &str, parent: Self) -> Result<Option<String>> {
    let nests = matches!(
      (self, parent),
      (Self::Day, Self::Week | Self::Month | Self::Year)
        | (Self::Month, Self::Year)
    );
    if !nests {
      return Ok(None);
    }
    Ok(Some(parent.label(self.bucket_start(label)?)))
  }
}

// ─── Cache entries ───────────────────────────────────────────────────────────

/// `(scope, keyword, granularity, bucket) → count`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrendCacheEntry {
  pub scope:       ScopeKey,
  pub keyword:     String,
  pub granularity: Granularity,
  pub bucket:      String,
  pub count:       u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeywordCount {
  pub keyword: String,
  pub count:   u64,
}

/// Rank keyword counts by count descending, ties alphabetically ascending,
/// keeping at most `limit` entries. Zero counts are dropped.
pub fn rank_keywords<I>(counts: I, limit: usize) -> Vec<KeywordCount>
where
  I: IntoIterator<Item = (String, u64)>,
{
  let mut ranked: Vec<KeywordCount> = counts
    .into_iter()
    .filter(|(_, count)| *count > 0)
    .map(|(keyword, count)| KeywordCount { keyword, count })
    .collect();
  ranked.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.keyword.cmp(&b.keyword)));
  ranked.truncate(limit);
  ranked
}

/// Per-bucket materialised summary for dashboard reads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BucketSummary {
  pub scope:        ScopeKey,
  pub granularity:  Granularity,
  pub bucket:       String,
  pub paper_count:  u64,
  pub top_keywords: Vec<KeywordCount>,
  pub updated_at:   DateTime<Utc>,
}

/// Per-scope materialised summary. `paper_count` includes papers that could
/// not be bucketed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScopeSummary {
  pub scope:        ScopeKey,
  pub paper_count:  u64,
  pub top_keywords: Vec<KeywordCount>,
  pub updated_at:   DateTime<Utc>,
}

// ─── Emerging topics ─────────────────────────────────────────────────────────

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
pub enum Trend {
  Rising,
  Stable,
  Declining,
}

/// Growth classification of one keyword within one scope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmergingRecord {
  pub scope:          ScopeKey,
  pub keyword:        String,
  pub granularity:    Granularity,
  /// `recent / max(ε, previous)`; `+∞` when the keyword is new.
  #[serde(with = "growth_rate")]
  pub growth_rate:    f64,
  pub recent_count:   u64,
  pub previous_count: u64,
  /// Earliest bucket the keyword was ever observed in for this scope.
  pub first_seen:     String,
  pub trend:          Trend,
  pub updated_at:     DateTime<Utc>,
}

/// JSON has no infinity; unbounded growth is written as `"inf"`.
pub mod growth_rate {
  use serde::{Deserialize, Deserializer, Serializer, de::Error as _};

  pub fn serialize<S: Serializer>(v: &f64, s: S) -> Result<S::Ok, S::Error> {
    if v.is_infinite() { s.serialize_str("inf") } else { s.serialize_f64(*v) }
  }

  pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<f64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
      Num(f64),
      Str(String),
    }
    match Raw::deserialize(d)? {
      Raw::Num(v) => Ok(v),
      Raw::Str(s) if s == "inf" => Ok(f64::INFINITY),
      Raw::Str(s) => Err(D::Error::custom(format!("invalid growth rate {s:?}"))),
    }
  }
}
