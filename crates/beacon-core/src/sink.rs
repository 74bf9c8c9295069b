//! Operational error reporting.
//!
//! Errors the serve path swallows (the client always gets its pixel) still
//! need to reach an operator. The tracker hands them to an [`ErrorSink`].

use std::sync::{Mutex, PoisonError};

use crate::Error;

/// Receives errors that are not surfaced to the caller.
pub trait ErrorSink: Send + Sync {
  /// `operation` names what failed, e.g. `"serve"`.
  fn report(&self, operation: &'static str, error: &Error);
}

/// Reports through `tracing`: retryable errors at `WARN`, the rest at `ERROR`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl ErrorSink for TracingSink {
  fn report(&self, operation: &'static str, error: &Error) {
    if error.is_retryable() {
      tracing::warn!(operation, retryable = true, "{error}");
    } else {
      tracing::error!(operation, retryable = false, "{error}");
    }
  }
}

/// Keeps every report in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
  reports: Mutex<Vec<(&'static str, String)>>,
}

impl MemorySink {
  pub fn new() -> Self { Self::default() }

  /// `(operation, message)` pairs in report order.
  pub fn reports(&self) -> Vec<(&'static str, String)> {
    self.reports.lock().unwrap_or_else(PoisonError::into_inner).clone()
  }
}

impl ErrorSink for MemorySink {
  fn report(&self, operation: &'static str, error: &Error) {
    self
      .reports
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .push((operation, error.to_string()));
  }
}
