//! The `EngagementStore` trait and an in-memory backend.
//!
//! The trait is implemented by storage backends (e.g. `beacon-store-sqlite`).
//! The tracker depends on this abstraction, not on any concrete backend.

use std::{
  collections::HashMap,
  future::Future,
  sync::{Mutex, PoisonError},
};

use crate::record::{FieldMap, Update};

// ─── Trait ───────────────────────────────────────────────────────────────────

/// Field-map storage for engagement records, keyed by email id.
///
/// All methods return `Send` futures so the trait can be used in multi-threaded
/// async runtimes (e.g. tokio with `axum`).
pub trait EngagementStore: Send + Sync {
  /// Backend failures; convertible so the tracker can classify them.
  type Error: std::error::Error + Send + Sync + 'static + Into<crate::Error>;

  /// All fields of a record, or `None` if it does not exist.
  fn read(
    &self,
    email_id: String,
  ) -> impl Future<Output = Result<Option<FieldMap>, Self::Error>> + Send + '_;

  /// Apply `update` atomically and return the resulting record.
  ///
  /// The update is evaluated with [`Update::changes`] against the stored
  /// record inside one atomic step: fields the update does not name are left
  /// alone, and no reader observes a partially applied update. Returns
  /// `None`, writing nothing, when the update requires an existing record and
  /// there is none.
  fn apply(
    &self,
    email_id: String,
    update: Update,
  ) -> impl Future<Output = Result<Option<FieldMap>, Self::Error>> + Send + '_;
}

// ─── In-memory backend ───────────────────────────────────────────────────────

/// A process-local store. Records live as long as the value does.
#[derive(Debug, Default)]
pub struct MemoryStore {
  records: Mutex<HashMap<String, FieldMap>>,
}

impl MemoryStore {
  pub fn new() -> Self { Self::default() }

  pub fn len(&self) -> usize {
    self.records.lock().unwrap_or_else(PoisonError::into_inner).len()
  }

  pub fn is_empty(&self) -> bool { self.len() == 0 }
}

impl EngagementStore for MemoryStore {
  type Error = crate::Error;

  async fn read(&self, email_id: String) -> crate::Result<Option<FieldMap>> {
    let records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
    Ok(records.get(&email_id).cloned())
  }

  async fn apply(
    &self,
    email_id: String,
    update: Update,
  ) -> crate::Result<Option<FieldMap>> {
    let mut records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
    let Some(changes) = update.changes(records.get(&email_id))? else {
      return Ok(None);
    };
    let record = records.entry(email_id).or_default();
    record.extend(changes);
    Ok(Some(record.clone()))
  }
}
