//! Error types for `cohort-core`.
//!
//! These are the failures the engine reports to its callers. Storage
//! backends have their own error types; they reach callers boxed inside
//! [`Error::Storage`].

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  /// Bad input: unknown or malformed slug, out-of-range percent, invalid
  /// expiration, bad report period.
  #[error("{0}")]
  Validation(String),

  #[error("segment {0:?} already exists")]
  Conflict(String),

  #[error("segment {0:?} does not exist")]
  NotFound(String),

  /// A history query matched nothing, so there is no report to export.
  #[error("no data available")]
  NoData,

  #[error("storage error: {0}")]
  Storage(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl Error {
  /// Box a backend error into [`Error::Storage`].
  pub fn storage<E>(e: E) -> Self
  where
    E: std::error::Error + Send + Sync + 'static,
  {
    Self::Storage(Box::new(e))
  }

  pub fn validation(msg: impl Into<String>) -> Self {
    Self::Validation(msg.into())
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
