//! Error type for the pipeline.

use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum Error {
  #[error(transparent)]
  Core(#[from] papertrend_core::Error),

  #[error("store error: {0}")]
  Store(#[source] Box<dyn std::error::Error + Send + Sync>),

  #[error("invalid venue pattern: {0}")]
  Pattern(#[from] regex::Error),

  #[error("http client error: {0}")]
  Http(#[from] reqwest::Error),

  #[error("raw record {0} does not exist")]
  UnknownRawRecord(i64),

  #[error("paper {0} does not exist")]
  UnknownPaper(Uuid),

  #[error("raw record {0} has no open match conflict")]
  NoConflict(i64),

  #[error("line {line}: {source}")]
  Import {
    line:   usize,
    #[source]
    source: serde_json::Error,
  },

  #[error("io error: {0}")]
  Io(#[from] std::io::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Box a backend error into [`Error::Store`].
pub(crate) fn store_err<E>(e: E) -> Error
where
  E: std::error::Error + Send + Sync + 'static,
{
  Error::Store(Box::new(e))
}
