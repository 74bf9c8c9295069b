//! SQL schema for the Beacon SQLite store.
//!
//! Executed once at connection startup. Future migrations will be gated on
//! `PRAGMA user_version`.

/// Full schema DDL; idempotent thanks to `CREATE TABLE IF NOT EXISTS`.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;

-- One row per (record, field). A record exists while it has any row.
-- Rows are only inserted or updated, never deleted.
CREATE TABLE IF NOT EXISTS engagement_fields (
    email_id    TEXT NOT NULL,
    field       TEXT NOT NULL,   -- 'open_count' | 'current_status' | 'history:...'
    value       TEXT NOT NULL,
    updated_at  TEXT NOT NULL,   -- ISO 8601 UTC; server-assigned
    PRIMARY KEY (email_id, field)
) WITHOUT ROWID;

PRAGMA user_version = 1;
";
