//! Venue resolution, domain classification, and quality flags.
//!
//! [`PatternRegistry`] is the built-in [`VenueRegistry`]: a regex table over
//! the major ML / CV / NLP / AI venues. Any other registry can be plugged
//! into the structuring engine in its place.

use papertrend_core::{
  capability::VenueRegistry,
  paper::{Domain, QualityFlag, Venue},
  record::{RawRecord, Source},
};
use regex::{Regex, RegexBuilder};

use crate::Result;

// ─── Pattern table ───────────────────────────────────────────────────────────

struct VenueDef {
  name:      &'static str,
  full_name: &'static str,
  domain:    Domain,
  patterns:  &'static [&'static str],
  /// Patterns are matched case-sensitively (short acronyms that collide
  /// with common words).
  exact:     bool,
}

/// Checked in order; the first venue with a matching pattern wins.
const VENUES: &[VenueDef] = &[
  VenueDef {
    name:      "ICML",
    full_name: "International Conference on Machine Learning",
    domain:    Domain::ML,
    patterns:  &[r"\bICML\b", r"International Conference on Machine Learning"],
    exact:     false,
  },
  VenueDef {
    name:      "NeurIPS",
    full_name: "Conference on Neural Information Processing Systems",
    domain:    Domain::ML,
    patterns:  &[r"\bNeurIPS\b", r"\bNIPS\b", r"Neural Information Processing"],
    exact:     false,
  },
  VenueDef {
    name:      "ICLR",
    full_name: "International Conference on Learning Representations",
    domain:    Domain::ML,
    patterns:  &[
      r"\bICLR\b",
      r"International Conference on Learning Representations",
    ],
    exact:     false,
  },
  VenueDef {
    name:      "CVPR",
    full_name: "Conference on Computer Vision and Pattern Recognition",
    domain:    Domain::CV,
    patterns:  &[r"\bCVPR\b", r"Computer Vision and Pattern Recognition"],
    exact:     false,
  },
  VenueDef {
    name:      "ICCV",
    full_name: "International Conference on Computer Vision",
    domain:    Domain::CV,
    patterns:  &[r"\bICCV\b", r"International Conference on Computer Vision"],
    exact:     false,
  },
  VenueDef {
    name:      "ECCV",
    full_name: "European Conference on Computer Vision",
    domain:    Domain::CV,
    patterns:  &[r"\bECCV\b", r"European Conference on Computer Vision"],
    exact:     false,
  },
  VenueDef {
    name:      "ACL",
    full_name: "Annual Meeting of the Association for Computational Linguistics",
    domain:    Domain::NLP,
    patterns:  &[
      r"\bACL\s*20\d{2}\b",
      r"Annual Meeting of the Association for Computational Linguistics",
    ],
    exact:     false,
  },
  VenueDef {
    name:      "EMNLP",
    full_name: "Conference on Empirical Methods in Natural Language Processing",
    domain:    Domain::NLP,
    patterns:  &[r"\bEMNLP\b", r"Empirical Methods in Natural Language Processing"],
    exact:     false,
  },
  VenueDef {
    name:      "NAACL",
    full_name: "North American Chapter of the ACL",
    domain:    Domain::NLP,
    patterns:  &[r"\bNAACL\b", r"North American.*ACL"],
    exact:     false,
  },
  VenueDef {
    name:      "AAAI",
    full_name: "AAAI Conference on Artificial Intelligence",
    domain:    Domain::AI,
    patterns:  &[r"\bAAAI\b", r"AAAI Conference on Artificial Intelligence"],
    exact:     false,
  },
  VenueDef {
    name:      "IJCAI",
    full_name: "International Joint Conference on Artificial Intelligence",
    domain:    Domain::AI,
    patterns:  &[
      r"\bIJCAI\b",
      r"International Joint Conference on Artificial Intelligence",
    ],
    exact:     false,
  },
  VenueDef {
    name:      "CoRL",
    full_name: "Conference on Robot Learning",
    domain:    Domain::RL,
    patterns:  &[r"\bCoRL\b", r"Conference on Robot Learning"],
    exact:     false,
  },
  VenueDef {
    name:      "AISTATS",
    full_name: "International Conference on Artificial Intelligence and Statistics",
    domain:    Domain::ML,
    patterns:  &[r"\bAISTATS\b", r"Artificial Intelligence and Statistics"],
    exact:     false,
  },
  VenueDef {
    name:      "COLM",
    full_name: "Conference on Language Modeling",
    domain:    Domain::NLP,
    patterns:  &[r"\bCOLM\b", r"Conference on Language Modeling"],
    exact:     false,
  },
  VenueDef {
    name:      "LoG",
    full_name: "Learning on Graphs Conference",
    domain:    Domain::ML,
    patterns:  &[r"\bLoG\s*20\d{2}\b", r"Learning on Graphs"],
    exact:     true,
  },
];

// ─── PatternRegistry ─────────────────────────────────────────────────────────

struct CompiledVenue {
  venue:    Venue,
  patterns: Vec<Regex>,
}

/// Regex-backed venue registry.
pub struct PatternRegistry {
  venues: Vec<CompiledVenue>,
}

impl PatternRegistry {
  /// Compile the built-in venue table.
  pub fn builtin() -> Result<Self> {
    let venues = VENUES
      .iter()
      .map(|def| {
        let patterns = def
          .patterns
          .iter()
          .map(|p| RegexBuilder::new(p).case_insensitive(!def.exact).build())
          .collect::<Result<Vec<_>, _>>()?;
        Ok(CompiledVenue {
          venue: Venue {
            canonical_name: def.name.to_owned(),
            full_name:      Some(def.full_name.to_owned()),
            domain:         Some(def.domain),
            tier:           None,
            first_year:     None,
            last_year:      None,
          },
          patterns,
        })
      })
      .collect::<Result<Vec<_>>>()?;
    Ok(Self { venues })
  }
}

impl VenueRegistry for PatternRegistry {
  fn lookup(&self, raw_venue: &str, _source: Source) -> Option<Venue> {
    self
      .venues
      .iter()
      .find(|v| v.patterns.iter().any(|re| re.is_match(raw_venue)))
      .map(|v| v.venue.clone())
  }

  fn list_known_venues(&self) -> Vec<Venue> {
    self.venues.iter().map(|v| v.venue.clone()).collect()
  }
}

// ─── Resolution ──────────────────────────────────────────────────────────────

/// Resolve the canonical venue of `raw` by consulting `venue_raw`, then
/// `journal_ref`, then `comments`.
pub fn resolve_venue(raw: &RawRecord, registry: &dyn VenueRegistry) -> Option<Venue> {
  [&raw.venue_raw, &raw.journal_ref, &raw.comments]
    .into_iter()
    .filter_map(|field| field.as_deref())
    .filter(|text| !text.trim().is_empty())
    .find_map(|text| registry.lookup(text, raw.source))
}

/// Substrings that vote for a domain. Categories are checked first, then
/// title and abstract.
const DOMAIN_HINTS: &[(Domain, &[&str])] = &[
  (Domain::CV, &["cs.cv", "computer vision", "image", "video", "visual"]),
  (Domain::NLP, &["cs.cl", "natural language", "nlp", "text", "language model"]),
  (Domain::ML, &["cs.lg", "stat.ml", "machine learning", "deep learning"]),
  (Domain::RL, &["cs.ai", "reinforcement learning", "robot", "control"]),
  (Domain::AI, &["artificial intelligence", "neural network"]),
];

/// Coarse research area of `raw`.
///
/// The first domain with a hint among the categories wins outright.
/// Otherwise title and abstract are scored by the number of distinct hints
/// they contain; the highest score wins, earlier domains on ties.
pub fn classify_domain(raw: &RawRecord) -> Option<Domain> {
  if !raw.categories.is_empty() {
    let categories = raw.categories.join(" ").to_lowercase();
    if let Some((domain, _)) = DOMAIN_HINTS
      .iter()
      .find(|(_, hints)| hints.iter().any(|h| categories.contains(h)))
    {
      return Some(*domain);
    }
  }

  let text = format!("{} {}", raw.title, raw.abstract_text).to_lowercase();
  let mut best: Option<(Domain, usize)> = None;
  for (domain, hints) in DOMAIN_HINTS {
    let score = hints.iter().filter(|h| text.contains(*h)).count();
    if score > 0 && best.is_none_or(|(_, top)| score > top) {
      best = Some((*domain, score));
    }
  }
  best.map(|(domain, _)| domain)
}

/// Editorial flag implied by one raw record.
pub fn detect_quality(raw: &RawRecord, venue_detected: bool) -> QualityFlag {
  let comments = raw.comments.as_deref().unwrap_or("").to_lowercase();
  if comments.contains("withdrawn") {
    QualityFlag::Filtered
  } else if raw.source == Source::OpenReview {
    QualityFlag::Accepted
  } else if venue_detected && comments.contains("accepted") {
    QualityFlag::Accepted
  } else {
    QualityFlag::Unknown
  }
}

#[cfg(test)]
mod tests {
  use chrono::Utc;
  use papertrend_core::record::NewRawRecord;

  use super::*;

  fn raw(source: Source) -> RawRecord {
    NewRawRecord::new(source, "x", "A Title", Utc::now()).into_record(1)
  }

  fn registry() -> PatternRegistry { PatternRegistry::builtin().unwrap() }

  #[test]
  fn builtin_table_compiles() {
    let names: Vec<_> = registry()
      .list_known_venues()
      .into_iter()
      .map(|v| v.canonical_name)
      .collect();
    assert_eq!(names.len(), 15);
    assert!(names.contains(&"NeurIPS".to_owned()));
    assert!(names.contains(&"LoG".to_owned()));
  }

  #[test]
  fn lookup_matches_acronyms_and_full_names() {
    let r = registry();
    let name = |s: &str| r.lookup(s, Source::Arxiv).map(|v| v.canonical_name);
    assert_eq!(name("Accepted at ICLR 2024").as_deref(), Some("ICLR"));
    assert_eq!(name("nips 2017").as_deref(), Some("NeurIPS"));
    assert_eq!(
      name("Proceedings of the European Conference on Computer Vision").as_deref(),
      Some("ECCV")
    );
    assert_eq!(name("ACL 2023 main").as_deref(), Some("ACL"));
    assert_eq!(name("an oracle ACL entry"), None);
    assert_eq!(name("LoG 2023").as_deref(), Some("LoG"));
    assert_eq!(name("log 2023 data"), None);
    assert_eq!(name("Workshop on something"), None);
  }

  #[test]
  fn venue_fields_are_checked_in_order() {
    let r = registry();
    let mut rec = raw(Source::Arxiv);
    rec.comments = Some("Accepted to CVPR 2024".into());
    rec.journal_ref = Some("ICML 2023".into());
    assert_eq!(resolve_venue(&rec, &r).map(|v| v.canonical_name).as_deref(), Some("ICML"));

    rec.venue_raw = Some("NeurIPS 2023 Poster".into());
    assert_eq!(
      resolve_venue(&rec, &r).map(|v| v.canonical_name).as_deref(),
      Some("NeurIPS")
    );

    let bare = raw(Source::Arxiv);
    assert_eq!(resolve_venue(&bare, &r), None);
  }

  #[test]
  fn domain_prefers_categories() {
    let mut rec = raw(Source::Arxiv);
    rec.categories = vec!["cs.CL".into(), "cs.LG".into()];
    rec.title = "Image segmentation with video".into();
    assert_eq!(classify_domain(&rec), Some(Domain::NLP));

    rec.categories = vec!["cs.AI".into()];
    assert_eq!(classify_domain(&rec), Some(Domain::RL));
  }

  #[test]
  fn domain_scores_text_hits() {
    let mut rec = raw(Source::OpenAlex);
    rec.title = "A language model for text".into();
    rec.abstract_text = "We use deep learning on video.".into();
    // NLP: "text", "language model" = 2; CV: "video" = 1; ML: 1.
    assert_eq!(classify_domain(&rec), Some(Domain::NLP));

    rec.title = "Untitled".into();
    rec.abstract_text = String::new();
    assert_eq!(classify_domain(&rec), None);
  }

  #[test]
  fn quality_flags() {
    let openreview = raw(Source::OpenReview);
    assert_eq!(detect_quality(&openreview, true), QualityFlag::Accepted);

    let mut arxiv = raw(Source::Arxiv);
    arxiv.comments = Some("Accepted at ICLR 2024".into());
    assert_eq!(detect_quality(&arxiv, true), QualityFlag::Accepted);
    assert_eq!(detect_quality(&arxiv, false), QualityFlag::Unknown);

    arxiv.comments = Some("This paper has been withdrawn".into());
    assert_eq!(detect_quality(&arxiv, true), QualityFlag::Filtered);
  }
}
