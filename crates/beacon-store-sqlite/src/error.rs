//! Error type for `beacon-store-sqlite`.

use beacon_core::StateError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  /// An update could not be evaluated against the stored record.
  #[error("core error: {0}")]
  Core(#[from] beacon_core::Error),

  #[error("database error: {0}")]
  Database(#[from] tokio_rusqlite::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl From<Error> for beacon_core::Error {
  fn from(err: Error) -> Self {
    match err {
      Error::Core(inner) => inner,
      Error::Database(db) => StateError::Store(Box::new(db)).into(),
    }
  }
}
