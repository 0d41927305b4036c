//! Pure normalisation of titles and identifiers used for matching.

/// Lowercase, replace every non-alphanumeric character with a space, and
/// collapse runs of whitespace.
pub fn normalize_title(raw: &str) -> String {
  let spaced: String = raw
    .chars()
    .flat_map(char::to_lowercase)
    .map(|c| if c.is_alphanumeric() { c } else { ' ' })
    .collect();
  spaced.split_whitespace().collect::<Vec<_>>().join(" ")
}

const DOI_PREFIXES: [&str; 5] = [
  "https://doi.org/",
  "http://doi.org/",
  "https://dx.doi.org/",
  "http://dx.doi.org/",
  "doi:",
];

/// Canonical DOI form: lowercase, resolver and `doi:` prefixes removed.
pub fn normalize_doi(raw: &str) -> Option<String> {
  let mut doi = raw.trim().to_lowercase();
  for prefix in DOI_PREFIXES {
    if let Some(rest) = doi.strip_prefix(prefix) {
      doi = rest.trim().to_owned();
      break;
    }
  }
  (!doi.is_empty()).then_some(doi)
}

/// Canonical arXiv id: `arXiv:` prefix and trailing `vN` version removed.
pub fn normalize_arxiv_id(raw: &str) -> Option<String> {
  let trimmed = raw.trim();
  let id = match trimmed.get(..6) {
    Some(head) if head.eq_ignore_ascii_case("arxiv:") => &trimmed[6..],
    _ => trimmed,
  };
  let id = match id.rfind('v') {
    Some(pos)
      if pos > 0
        && pos + 1 < id.len()
        && id[pos + 1..].bytes().all(|b| b.is_ascii_digit())
        && id[..pos].ends_with(|c: char| c.is_ascii_digit()) =>
    {
      &id[..pos]
    }
    _ => id,
  };
  let id = id.trim().to_lowercase();
  (!id.is_empty()).then_some(id)
}

/// Canonical OpenAlex work id: the bare `W…` key, without the URL prefix.
pub fn normalize_openalex_id(raw: &str) -> Option<String> {
  let trimmed = raw.trim();
  let id = trimmed.rsplit('/').next().unwrap_or(trimmed).trim().to_uppercase();
  (!id.is_empty()).then_some(id)
}
