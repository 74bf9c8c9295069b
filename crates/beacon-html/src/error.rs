//! Error types for the beacon-html parser and injector.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
  #[error("unterminated {what} starting at byte {offset}")]
  Unterminated { what: &'static str, offset: usize },

  #[error("elements nested deeper than {max} levels")]
  TooDeep { max: usize },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
