//! Keyword providers, the validity filter, and the tiered chain.
//!
//! The chain asks each [`KeywordProvider`] in priority order and takes the
//! first non-empty, post-filter result:
//!
//! 1. [`StoredKeywords`]: keywords persisted by an earlier run.
//! 2. [`HttpExtractor`]: the external extraction service.
//! 3. [`FrequencyFallback`]: word frequencies over the paper text.
//!
//! A provider error never fails the paper; it marks the outcome degraded and
//! the chain moves on.

use std::{
  collections::{BTreeMap, HashMap, HashSet},
  time::Duration,
};

use async_trait::async_trait;
use papertrend_core::{
  Error as CoreError,
  capability::{ExtractionInput, KeywordProvider, KeywordTier, ScoredTerm},
};
use serde::Serialize;
use tracing::{debug, warn};

use crate::{PipelineConfig, Result};

// ─── Word lists ──────────────────────────────────────────────────────────────

/// Low-information words common to paper prose.
const BANNED: &[&str] = &[
  "method", "methods", "approach", "approaches", "technique", "techniques",
  "result", "results", "performance", "paper", "papers", "study", "studies",
  "novel", "new", "proposed", "propose", "present", "presents",
  "introduction", "conclusion", "abstract", "work", "works", "research",
  "analysis", "experiment", "experiments", "evaluation", "evaluations",
  "model", "models", "network", "networks", "system", "systems", "algorithm",
  "algorithms", "framework", "frameworks", "data", "dataset", "datasets",
  "benchmark", "benchmarks", "training", "testing", "learning", "task",
  "tasks", "based", "using", "via", "improved", "better", "best",
  "efficient", "effective", "simple", "complex", "large", "small", "high",
  "low", "state", "art", "end", "end to end", "show", "shows",
  "demonstrate", "demonstrates", "achieve", "achieves", "outperform",
  "outperforms", "improve", "improves",
];

const STOPWORDS: &[&str] = &[
  "a", "an", "the", "and", "or", "but", "if", "then", "else", "when", "at",
  "by", "for", "with", "about", "against", "between", "into", "through",
  "during", "before", "after", "above", "below", "to", "from", "up", "down",
  "in", "out", "on", "off", "over", "under", "again", "further", "once",
  "here", "there", "all", "each", "few", "more", "most", "other", "some",
  "such", "no", "nor", "not", "only", "own", "same", "so", "than", "too",
  "very", "can", "will", "just", "should", "now", "also", "however", "thus",
  "therefore", "hence", "although", "whereas", "while", "since", "because",
  "as", "is", "are", "was", "were", "be", "been", "being", "have", "has",
  "had", "having", "do", "does", "did", "doing", "would", "could", "might",
  "may", "must", "shall", "i", "you", "he", "she", "it", "we", "they",
  "what", "which", "who", "whom", "this", "that", "these", "those", "am",
  "our", "their", "its", "one", "two", "both", "how", "where", "why",
];

/// Words that are frequent in ML papers but say nothing about the topic.
const DOMAIN_NOISE: &[&str] = &[
  "experimental", "ablation", "ablations", "comparison", "comparisons",
  "baseline", "baselines", "samples", "sample", "examples", "example",
  "accuracy", "loss", "metrics", "metric", "score", "scores", "table",
  "figure", "figures", "tables", "problem", "problems", "solution",
  "solutions", "challenge", "challenges", "issue", "issues", "application",
  "applications",
];

const SYNONYMS: &[(&str, &str)] = &[
  ("llm", "large language model"),
  ("llms", "large language model"),
  ("large language models", "large language model"),
  ("diffusion models", "diffusion model"),
  ("diffusion based", "diffusion model"),
  ("transformers", "transformer"),
  ("vision transformers", "vision transformer"),
  ("vit", "vision transformer"),
  ("vits", "vision transformer"),
  ("gan", "generative adversarial network"),
  ("gans", "generative adversarial network"),
  ("generative adversarial networks", "generative adversarial network"),
  ("cnn", "convolutional neural network"),
  ("cnns", "convolutional neural network"),
  ("convolutional neural networks", "convolutional neural network"),
  ("rnn", "recurrent neural network"),
  ("rnns", "recurrent neural network"),
  ("recurrent neural networks", "recurrent neural network"),
  ("lstm", "long short term memory"),
  ("lstms", "long short term memory"),
  ("rl", "reinforcement learning"),
  ("drl", "deep reinforcement learning"),
  ("self supervised", "self supervised learning"),
  ("self supervision", "self supervised learning"),
  ("contrastive", "contrastive learning"),
  ("nlp", "natural language processing"),
  ("cv", "computer vision"),
  ("ml", "machine learning"),
  ("dl", "deep learning"),
  ("ai", "artificial intelligence"),
];

const MIN_LEN: usize = 3;
const MAX_LEN: usize = 60;
const NEAR_DUPLICATE: f64 = 0.85;

// ─── KeywordFilter ───────────────────────────────────────────────────────────

/// Normalises, validates, folds synonyms, and deduplicates candidate
/// keywords.
#[derive(Debug, Clone)]
pub struct KeywordFilter {
  rejected: HashSet<&'static str>,
  synonyms: HashMap<&'static str, &'static str>,
}

impl Default for KeywordFilter {
  fn default() -> Self {
    Self {
      rejected: BANNED
        .iter()
        .chain(STOPWORDS)
        .chain(DOMAIN_NOISE)
        .copied()
        .collect(),
      synonyms: SYNONYMS.iter().copied().collect(),
    }
  }
}

impl KeywordFilter {
  /// Lowercase, map `-`/`_`/`/` to spaces, trim surrounding punctuation,
  /// collapse whitespace.
  pub fn normalize(&self, raw: &str) -> Option<String> {
    let lowered: String = raw
      .trim()
      .to_lowercase()
      .chars()
      .map(|c| if matches!(c, '-' | '_' | '/') { ' ' } else { c })
      .collect();
    let trimmed = lowered
      .trim_end_matches([',', ';', ':', '.', '!', '?', '\'', '"', ')', ']'])
      .trim_start_matches(['(', '[', '\'', '"']);
    let collapsed = trimmed.split_whitespace().collect::<Vec<_>>().join(" ");
    (!collapsed.is_empty()).then_some(collapsed)
  }

  /// Canonical spelling of a normalised keyword.
  pub fn canonical<'a>(&self, keyword: &'a str) -> &'a str {
    self.synonyms.get(keyword).copied().unwrap_or(keyword)
  }

  /// Whether a normalised keyword may enter the cache.
  pub fn is_valid(&self, keyword: &str) -> bool {
    let len = keyword.chars().count();
    if !(MIN_LEN..=MAX_LEN).contains(&len) {
      return false;
    }
    if !keyword.starts_with(|c: char| c.is_alphabetic()) {
      return false;
    }
    if self.rejected.contains(keyword) {
      return false;
    }
    let digits = keyword.chars().filter(char::is_ascii_digit).count();
    if digits * 2 > len {
      return false;
    }
    !["http", "www", ".com", ".org", "@"]
      .iter()
      .any(|p| keyword.contains(p))
  }

  /// Run candidates through the whole filter and keep the best `limit`.
  ///
  /// Output is ordered by score descending, then alphabetically, with
  /// near-duplicates (plural forms, small edits) folded into the
  /// higher-scoring spelling.
  pub fn process(&self, terms: &[ScoredTerm], limit: usize) -> Vec<ScoredTerm> {
    let mut best: HashMap<String, f64> = HashMap::new();
    for term in terms {
      let Some(normalized) = self.normalize(&term.term) else { continue };
      let keyword = self.canonical(&normalized);
      if !self.is_valid(keyword) {
        continue;
      }
      let slot = best.entry(keyword.to_owned()).or_insert(term.score);
      if term.score > *slot {
        *slot = term.score;
      }
    }

    let mut ranked: Vec<(String, f64)> = best.into_iter().collect();
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

    let mut kept: Vec<ScoredTerm> = Vec::new();
    for (keyword, score) in ranked {
      if kept.len() == limit {
        break;
      }
      if kept.iter().any(|k| near_duplicate(&keyword, &k.term)) {
        continue;
      }
      kept.push(ScoredTerm::new(keyword, score));
    }
    kept
  }
}

fn near_duplicate(a: &str, b: &str) -> bool {
  a.trim_end_matches('s') == b
    || b.trim_end_matches('s') == a
    || strsim::normalized_levenshtein(a, b) >= NEAR_DUPLICATE
}

// ─── Providers ───────────────────────────────────────────────────────────────

/// Tier 1: keywords an earlier run persisted for the paper.
#[derive(Debug, Default)]
pub struct StoredKeywords;

#[async_trait]
impl KeywordProvider for StoredKeywords {
  fn tier(&self) -> KeywordTier { KeywordTier::Stored }

  async fn extract(&self, input: ExtractionInput<'_>) -> papertrend_core::Result<Vec<ScoredTerm>> {
    let n = input.stored.len();
    Ok(
      input
        .stored
        .iter()
        .enumerate()
        .map(|(i, k)| ScoredTerm::new(k.clone(), (n - i) as f64))
        .collect(),
    )
  }
}

#[derive(Serialize)]
struct ExtractRequest<'a> {
  text: &'a str,
}

/// Tier 2: the external extraction service.
///
/// POSTs `{"text": …}` and expects `[{"term": …, "score": …}]`. Every
/// failure, including a missing URL, surfaces as
/// [`CoreError::ExtractionUnavailable`].
#[derive(Debug, Clone)]
pub struct HttpExtractor {
  client: reqwest::Client,
  url:    Option<String>,
}

impl HttpExtractor {
  pub fn new(url: Option<String>, timeout: Duration) -> Result<Self> {
    let client = reqwest::Client::builder().timeout(timeout).build()?;
    Ok(Self { client, url })
  }
}

#[async_trait]
impl KeywordProvider for HttpExtractor {
  fn tier(&self) -> KeywordTier { KeywordTier::Extracted }

  async fn extract(&self, input: ExtractionInput<'_>) -> papertrend_core::Result<Vec<ScoredTerm>> {
    let unavailable = |e: String| CoreError::ExtractionUnavailable(e);
    let Some(url) = &self.url else {
      return Err(unavailable("no extractor url configured".into()));
    };

    let resp = self
      .client
      .post(url)
      .json(&ExtractRequest { text: input.text })
      .send()
      .await
      .map_err(|e| unavailable(e.to_string()))?;
    if !resp.status().is_success() {
      return Err(unavailable(format!("extractor returned {}", resp.status())));
    }
    resp
      .json::<Vec<ScoredTerm>>()
      .await
      .map_err(|e| unavailable(format!("malformed extractor response: {e}")))
  }
}

/// Tier 3: word frequencies over the paper text.
///
/// Scores are occurrence counts of alphabetic-initial words; the filter
/// does the rest.
#[derive(Debug, Default)]
pub struct FrequencyFallback;

impl FrequencyFallback {
  pub fn count_words(text: &str) -> Vec<ScoredTerm> {
    let mut counts: BTreeMap<String, u64> = BTreeMap::new();
    for word in text.split(|c: char| !(c.is_alphanumeric() || c == '-')) {
      let word = word.trim_matches('-');
      if word.starts_with(|c: char| c.is_alphabetic()) {
        *counts.entry(word.to_lowercase()).or_default() += 1;
      }
    }
    counts
      .into_iter()
      .map(|(term, count)| ScoredTerm::new(term, count as f64))
      .collect()
  }
}

#[async_trait]
impl KeywordProvider for FrequencyFallback {
  fn tier(&self) -> KeywordTier { KeywordTier::Frequency }

  async fn extract(&self, input: ExtractionInput<'_>) -> papertrend_core::Result<Vec<ScoredTerm>> {
    Ok(Self::count_words(input.text))
  }
}

// ─── KeywordChain ────────────────────────────────────────────────────────────

/// Keywords chosen for one paper.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct KeywordOutcome {
  /// Filtered terms with their provider scores, best first.
  pub terms:    Vec<ScoredTerm>,
  /// The tier that served the paper; `None` if every tier came back empty.
  pub tier:     Option<KeywordTier>,
  /// Some tier failed before one succeeded.
  pub degraded: bool,
}

impl KeywordOutcome {
  pub fn keywords(&self) -> Vec<String> {
    self.terms.iter().map(|t| t.term.clone()).collect()
  }
}

/// Ordered providers plus the shared filter.
pub struct KeywordChain {
  providers: Vec<Box<dyn KeywordProvider>>,
  filter:    KeywordFilter,
  limit:     usize,
}

impl KeywordChain {
  pub fn new(providers: Vec<Box<dyn KeywordProvider>>, limit: usize) -> Self {
    Self { providers, filter: KeywordFilter::default(), limit }
  }

  /// Stored → HTTP extractor → frequency fallback, as configured.
  pub fn from_config(config: &PipelineConfig) -> Result<Self> {
    let extractor = HttpExtractor::new(
      config.extractor_url.clone(),
      Duration::from_secs(config.extractor_timeout_secs),
    )?;
    Ok(Self::new(
      vec![
        Box::new(StoredKeywords),
        Box::new(extractor),
        Box::new(FrequencyFallback),
      ],
      config.keywords_per_paper,
    ))
  }

  pub fn filter(&self) -> &KeywordFilter { &self.filter }

  pub async fn keywords_for(&self, input: ExtractionInput<'_>) -> KeywordOutcome {
    let mut degraded = false;
    for provider in &self.providers {
      match provider.extract(input).await {
        Ok(terms) => {
          let terms = self.filter.process(&terms, self.limit);
          if !terms.is_empty() {
            debug!(paper_id = %input.paper_id, tier = %provider.tier(), n = terms.len(), "keywords");
            return KeywordOutcome { terms, tier: Some(provider.tier()), degraded };
          }
        }
        Err(e) => {
          warn!(paper_id = %input.paper_id, tier = %provider.tier(), error = %e, "keyword tier failed");
          degraded = true;
        }
      }
    }
    KeywordOutcome { terms: Vec::new(), tier: None, degraded }
  }
}
