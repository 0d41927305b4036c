//! JSON-lines import into the raw feed.
//!
//! Each non-blank line is one [`NewRawRecord`]. Records whose
//! `(source, source_id)` already exist are counted and skipped.

use std::path::Path;

use papertrend_core::{record::NewRawRecord, store::RawFeed};
use serde::Serialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tracing::{debug, info};

use crate::{Error, Result, error::store_err};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ImportReport {
  pub read:       u64,
  pub appended:   u64,
  pub duplicates: u64,
}

/// Append every record in `reader` to `feed`.
///
/// Stops at the first malformed line; records before it stay appended.
pub async fn import_lines<F, R>(feed: &F, reader: R) -> Result<ImportReport>
where
  F: RawFeed,
  R: AsyncBufRead + Unpin,
{
  let mut report = ImportReport::default();
  let mut lines = reader.lines();
  let mut line_no = 0;

  while let Some(line) = lines.next_line().await? {
    line_no += 1;
    if line.trim().is_empty() {
      continue;
    }
    let record: NewRawRecord = serde_json::from_str(&line)
      .map_err(|source| Error::Import { line: line_no, source })?;
    report.read += 1;
    let key = format!("{}:{}", record.source, record.source_id);
    match feed.append(record).await.map_err(store_err)? {
      Some(stored) => {
        debug!(raw_id = stored.raw_id, %key, "appended");
        report.appended += 1;
      }
      None => {
        debug!(%key, "duplicate");
        report.duplicates += 1;
      }
    }
  }
  Ok(report)
}

/// Import a JSON-lines file.
pub async fn import_file<F: RawFeed>(feed: &F, path: &Path) -> Result<ImportReport> {
  let file = tokio::fs::File::open(path).await?;
  let report = import_lines(feed, BufReader::new(file)).await?;
  info!(
    path = %path.display(),
    read = report.read,
    appended = report.appended,
    duplicates = report.duplicates,
    "import finished"
  );
  Ok(report)
}
