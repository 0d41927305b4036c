//! Content fingerprint of the canonical store.
//!
//! A SHA-256 over every paper's identity-relevant fields and every source
//! link, sorted by key. Two structuring passes over the same raw feed must
//! produce the same fingerprint; a rerun over an unchanged feed must not
//! move it.

use papertrend_core::paper::{CanonicalPaper, SourceLink};
use sha2::{Digest, Sha256};

/// Field separator; never appears in normalised text.
const SEP: &[u8] = &[0x1f];

fn feed(hasher: &mut Sha256, field: Option<&str>) {
  hasher.update(field.unwrap_or("").as_bytes());
  hasher.update(SEP);
}

/// Fingerprint of `papers` and `links`, independent of their order.
///
/// `linked_at` is excluded: it records when a link was written, not what it
/// says.
pub fn structuring_fingerprint(papers: &[CanonicalPaper], links: &[SourceLink]) -> String {
  let mut papers: Vec<&CanonicalPaper> = papers.iter().collect();
  papers.sort_by_key(|p| p.paper_id);
  let mut links: Vec<&SourceLink> = links.iter().collect();
  links.sort_by_key(|l| l.raw_id);

  let mut hasher = Sha256::new();
  for paper in papers {
    hasher.update(paper.paper_id.as_bytes());
    feed(&mut hasher, Some(&paper.canonical_title));
    feed(&mut hasher, paper.year.map(|y| y.to_string()).as_deref());
    feed(&mut hasher, paper.venue.as_deref());
    feed(&mut hasher, paper.domain.map(|d| d.to_string()).as_deref());
    feed(&mut hasher, Some(&paper.quality_flag.to_string()));
    feed(&mut hasher, paper.doi.as_deref());
    feed(&mut hasher, paper.arxiv_id.as_deref());
    feed(&mut hasher, paper.openalex_id.as_deref());
    feed(&mut hasher, Some(&paper.categories.join(",")));
    feed(&mut hasher, Some(&paper.primary_source.to_string()));
  }
  for link in links {
    hasher.update(link.raw_id.to_le_bytes());
    hasher.update(link.paper_id.as_bytes());
    feed(&mut hasher, Some(&link.match_reason.to_string()));
    hasher.update(link.confidence_score.to_le_bytes());
  }
  hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
  use chrono::{TimeZone, Utc};
  use papertrend_core::{
    paper::{MatchReason, QualityFlag},
    record::Source,
  };

  use super::*;

  fn make_paper(id: &str, raw_id: i64) -> CanonicalPaper {
    CanonicalPaper {
      paper_id:        CanonicalPaper::id_for(Source::Arxiv, id),
      canonical_title: format!("paper {id}"),
      display_title:   format!("Paper {id}"),
      abstract_text:   String::new(),
      authors:         vec![],
      year:            Some(2024),
      venue:           None,
      venue_source:    None,
      domain:          None,
      quality_flag:    QualityFlag::Unknown,
      categories:      vec!["cs.LG".into()],
      doi:             None,
      arxiv_id:        Some(id.into()),
      openalex_id:     None,
      published_at:    None,
      first_seen_at:   Utc.timestamp_opt(0, 0).unwrap(),
      primary_source:  Source::Arxiv,
      origin_raw_id:   raw_id,
    }
  }

  fn make_link(paper: &CanonicalPaper, raw_id: i64, at_secs: i64) -> SourceLink {
    SourceLink {
      raw_id,
      paper_id: paper.paper_id,
      source: Source::Arxiv,
      confidence_score: 1.0,
      match_reason: MatchReason::Origin,
      linked_at: Utc.timestamp_opt(at_secs, 0).unwrap(),
    }
  }

  #[test]
  fn order_independent() {
    let a = make_paper("a", 1);
    let b = make_paper("b", 2);
    let la = make_link(&a, 1, 0);
    let lb = make_link(&b, 2, 0);

    let f1 = structuring_fingerprint(&[a.clone(), b.clone()], &[la.clone(), lb.clone()]);
    let f2 = structuring_fingerprint(&[b, a], &[lb, la]);
    assert_eq!(f1, f2);
    assert_eq!(f1.len(), 64);
  }

  #[test]
  fn link_time_is_ignored() {
    let a = make_paper("a", 1);
    let f1 = structuring_fingerprint(&[a.clone()], &[make_link(&a, 1, 0)]);
    let f2 = structuring_fingerprint(&[a.clone()], &[make_link(&a, 1, 999)]);
    assert_eq!(f1, f2);
  }

  #[test]
  fn content_changes_move_the_fingerprint() {
    let a = make_paper("a", 1);
    let mut venued = a.clone();
    venued.venue = Some("ICLR".into());
    let links = [make_link(&a, 1, 0)];
    assert_ne!(
      structuring_fingerprint(&[a], &links),
      structuring_fingerprint(&[venued], &links)
    );
  }

  #[test]
  fn empty_store_has_a_fingerprint() {
    assert_eq!(structuring_fingerprint(&[], &[]).len(), 64);
  }
}
