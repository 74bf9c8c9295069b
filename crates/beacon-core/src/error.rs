//! Error types for `beacon-core`.

use std::time::Duration;

use thiserror::Error;

/// Failures of the PII codec. Decoding always fails closed: no variant
/// carries partially decoded data.
#[derive(Debug, Error)]
pub enum CodecError {
  #[error("no usable key: {0}")]
  KeyMissing(String),

  #[error("payload of {len} bytes exceeds the {max}-byte limit for this key")]
  PayloadTooLarge { len: usize, max: usize },

  #[error("encoding failed: {0}")]
  EncodeFailed(String),

  #[error("decoding failed: {0}")]
  DecodeFailed(String),

  #[error("codec timed out after {after:?}")]
  Timeout { after: Duration },

  #[error("codec task did not complete: {0}")]
  Interrupted(String),
}

/// Failures while reading or advancing an engagement record.
#[derive(Debug, Error)]
pub enum StateError {
  /// A serve hit arrived for an email that was never prepared.
  #[error("no engagement record for email {0}; serve before append")]
  ServeBeforeAppend(String),

  #[error("field {field:?} holds an unreadable value {value:?}")]
  CorruptRecord { field: String, value: String },

  #[error("store error: {0}")]
  Store(#[source] Box<dyn std::error::Error + Send + Sync>),

  #[error("store timed out after {after:?}")]
  Timeout { after: Duration },
}

#[derive(Debug, Error)]
pub enum Error {
  #[error("invalid request: {0}")]
  Validation(String),

  #[error("codec error: {0}")]
  Codec(#[from] CodecError),

  /// The pixel could not be injected; carries the caller's HTML unchanged.
  #[error("html error: {0}")]
  Parse(#[from] beacon_html::InjectError),

  #[error("state error: {0}")]
  State(#[from] StateError),

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
}

impl Error {
  /// Whether the caller may retry the same operation unchanged.
  pub fn is_retryable(&self) -> bool {
    matches!(
      self,
      Self::Codec(CodecError::Timeout { .. } | CodecError::Interrupted(_))
        | Self::State(StateError::Store(_) | StateError::Timeout { .. })
    )
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn only_transient_failures_are_retryable() {
    let after = Duration::from_millis(5);
    assert!(Error::from(StateError::Timeout { after }).is_retryable());
    assert!(Error::from(CodecError::Timeout { after }).is_retryable());
    assert!(
      Error::from(StateError::Store(Box::new(std::io::Error::other("down"))))
        .is_retryable()
    );

    assert!(!Error::Validation("x".into()).is_retryable());
    assert!(!Error::from(StateError::ServeBeforeAppend("e".into())).is_retryable());
    assert!(!Error::from(CodecError::DecodeFailed("bad".into())).is_retryable());
    let parse = beacon_html::InjectError {
      original: "<p".into(),
      source:   beacon_html::Error::TooDeep { max: 1 },
    };
    assert!(!Error::from(parse).is_retryable());
  }
}
