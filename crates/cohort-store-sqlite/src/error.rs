//! Error type for `cohort-store-sqlite`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("database error: {0}")]
  Database(#[from] tokio_rusqlite::Error),

  #[error("uuid parse error: {0}")]
  Uuid(#[from] uuid::Error),

  #[error("date/time parse error: {0}")]
  DateParse(String),

  /// A history row holds an operation string this build does not know.
  #[error("unknown history operation: {0:?}")]
  UnknownOperation(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
