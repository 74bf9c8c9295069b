//! [`SqliteStore`], the SQLite implementation of [`EngagementStore`].

use std::path::Path;

use chrono::Utc;
use rusqlite::{Connection, TransactionBehavior};

use beacon_core::{
  record::{FieldMap, Update},
  store::EngagementStore,
};

use crate::{Result, schema::SCHEMA};

// ─── Store ───────────────────────────────────────────────────────────────────

/// An engagement store backed by a single SQLite file.
///
/// Cloning is cheap; the inner connection is reference-counted.
#[derive(Clone)]
pub struct SqliteStore {
  conn: tokio_rusqlite::Connection,
}

impl SqliteStore {
  /// Open (or create) a store at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  /// Open a private in-memory store.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  async fn init_schema(&self) -> Result<()> {
    self
      .conn
      .call(|conn| {
        conn.execute_batch(SCHEMA)?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  /// Number of distinct records.
  pub async fn count(&self) -> Result<usize> {
    let count = self
      .conn
      .call(|conn| {
        let n: i64 = conn.query_row(
          "SELECT COUNT(DISTINCT email_id) FROM engagement_fields",
          [],
          |r| r.get(0),
        )?;
        Ok(n)
      })
      .await?;
    Ok(usize::try_from(count).unwrap_or_default())
  }
}

fn load_fields(conn: &Connection, email_id: &str) -> rusqlite::Result<Option<FieldMap>> {
  let mut stmt =
    conn.prepare_cached("SELECT field, value FROM engagement_fields WHERE email_id = ?1")?;
  let fields = stmt
    .query_map(rusqlite::params![email_id], |r| Ok((r.get(0)?, r.get(1)?)))?
    .collect::<rusqlite::Result<FieldMap>>()?;
  Ok((!fields.is_empty()).then_some(fields))
}

// ─── EngagementStore impl ────────────────────────────────────────────────────

impl EngagementStore for SqliteStore {
  type Error = crate::Error;

  async fn read(&self, email_id: String) -> Result<Option<FieldMap>> {
    let fields = self
      .conn
      .call(move |conn| Ok(load_fields(conn, &email_id)?))
      .await?;
    Ok(fields)
  }

  async fn apply(&self, email_id: String, update: Update) -> Result<Option<FieldMap>> {
    let now = Utc::now().to_rfc3339();

    // Read, evaluate and write in one IMMEDIATE transaction. Evaluation
    // failures come back as the inner `Result`.
    let outcome = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let current = load_fields(&tx, &email_id)?;

        let changes = match update.changes(current.as_ref()) {
          Ok(Some(changes)) => changes,
          Ok(None) => return Ok(Ok(None)),
          Err(err) => return Ok(Err(err)),
        };

        {
          let mut upsert = tx.prepare_cached(
            "INSERT INTO engagement_fields (email_id, field, value, updated_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT (email_id, field)
             DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
          )?;
          for (field, value) in &changes {
            upsert.execute(rusqlite::params![email_id, field, value, now])?;
          }
        }

        let mut next = current.unwrap_or_default();
        next.extend(changes);
        tx.commit()?;
        Ok(Ok(Some(next)))
      })
      .await??;

    if outcome.is_none() {
      tracing::debug!("update refused: record does not exist");
    }
    Ok(outcome)
  }
}
