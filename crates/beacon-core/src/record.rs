//! Engagement records and the field operations that mutate them.
//!
//! A record is a flat map of field name → string value, the shape shared key
//! value stores expose. Writes are expressed as [`FieldOp`]s rather than
//! final values so a backend can apply them against the stored state inside
//! one atomic step, which keeps concurrent increments from being lost.

use std::{collections::BTreeMap, fmt, str::FromStr};

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Result, StateError};

pub type FieldMap = BTreeMap<String, String>;

// ─── Field names ─────────────────────────────────────────────────────────────

pub const OPEN_COUNT: &str = "open_count";
pub const APPEND_COUNT: &str = "append_count";
pub const CURRENT_STATUS: &str = "current_status";
/// Prefix of every history field; the rest is `<action>_<timestamp>_<id>`.
pub const HISTORY_PREFIX: &str = "history:";

// ─── Action / Status ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
  /// A pixel was embedded into an outbound message.
  Append,
  /// A pixel was fetched by a mail client.
  Serve,
}

impl Action {
  pub fn as_str(self) -> &'static str {
    match self {
      Self::Append => "append",
      Self::Serve => "serve",
    }
  }
}

impl fmt::Display for Action {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Engagement status, ordered: a record's status only ever moves up.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize,
  Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Status {
  #[default]
  Untracked,
  Attached,
  Opened,
  /// Set by a collaborator outside this crate; never lowered.
  Responded,
}

impl Status {
  pub fn as_str(self) -> &'static str {
    match self {
      Self::Untracked => "untracked",
      Self::Attached => "attached",
      Self::Opened => "opened",
      Self::Responded => "responded",
    }
  }
}

impl fmt::Display for Status {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for Status {
  type Err = String;

  fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
    match s {
      "untracked" => Ok(Self::Untracked),
      "attached" => Ok(Self::Attached),
      "opened" => Ok(Self::Opened),
      "responded" => Ok(Self::Responded),
      other => Err(format!("unknown status: {other:?}")),
    }
  }
}

// ─── Event snapshot ──────────────────────────────────────────────────────────

/// Who fetched a tracking URL, as far as the request reveals.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientInfo {
  pub user_agent: Option<String>,
  pub client_ip:  Option<String>,
}

/// One entry of a record's history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngagementEvent {
  /// Distinguishes events recorded within the same clock tick.
  #[serde(default = "Uuid::new_v4")]
  pub id:         Uuid,
  pub action:     Action,
  pub timestamp:  DateTime<Utc>,
  pub user_agent: Option<String>,
  pub client_ip:  Option<String>,
  /// The rendered message, for append events.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub html:       Option<String>,
}

impl EngagementEvent {
  pub fn new(action: Action, client: ClientInfo, html: Option<String>) -> Self {
    Self {
      id: Uuid::new_v4(),
      action,
      timestamp: Utc::now(),
      user_agent: client.user_agent,
      client_ip: client.client_ip,
      html,
    }
  }

  /// `history:<action>_<timestamp>_<id>`, with the timestamp in RFC 3339
  /// UTC at fixed nanosecond precision so keys of one action sort
  /// chronologically.
  pub fn history_field(&self) -> String {
    format!(
      "{HISTORY_PREFIX}{}_{}_{}",
      self.action,
      self.timestamp.to_rfc3339_opts(SecondsFormat::Nanos, true),
      self.id.simple()
    )
  }
}

// ─── Field operations ────────────────────────────────────────────────────────

/// A single server-side field update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldOp {
  /// Overwrite the field.
  Set(String),
  /// Write the field only if it does not exist yet.
  SetIfAbsent(String),
  /// Add to a decimal counter; an absent field counts as zero.
  Increment(u64),
  /// Raise a status field to at least the given status.
  RaiseStatus(Status),
}

impl FieldOp {
  /// The value to store given the field's `current` value, or `None` if the
  /// field stays as it is.
  pub fn evaluate(&self, field: &str, current: Option<&str>) -> Result<Option<String>> {
    let corrupt = |value: &str| StateError::CorruptRecord {
      field: field.to_owned(),
      value: value.to_owned(),
    };

    Ok(match self {
      Self::Set(value) => Some(value.clone()),
      Self::SetIfAbsent(value) => current.is_none().then(|| value.clone()),
      Self::Increment(by) => {
        let count = match current {
          Some(raw) => raw.parse::<u64>().map_err(|_| corrupt(raw))?,
          None => 0,
        };
        Some(count.saturating_add(*by).to_string())
      }
      Self::RaiseStatus(target) => {
        let status = match current {
          Some(raw) => raw.parse::<Status>().map_err(|_| corrupt(raw))?,
          None => Status::Untracked,
        };
        (*target > status).then(|| target.as_str().to_owned())
      }
    })
  }
}

/// A set of field operations applied to one record as a single atomic step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Update {
  /// When set, the update is refused (and nothing is written) if the record
  /// does not exist.
  pub require_existing: bool,
  pub ops:              Vec<(String, FieldOp)>,
}

impl Update {
  /// Compute the fields to write against `current`.
  ///
  /// Returns `None` when the update requires an existing record and there is
  /// none. Backends call this inside their atomic section.
  pub fn changes(&self, current: Option<&FieldMap>) -> Result<Option<FieldMap>> {
    if self.require_existing && current.is_none_or(FieldMap::is_empty) {
      return Ok(None);
    }

    let mut changes = FieldMap::new();
    for (field, op) in &self.ops {
      let existing = changes
        .get(field)
        .or_else(|| current.and_then(|c| c.get(field)))
        .map(String::as_str);
      if let Some(value) = op.evaluate(field, existing)? {
        changes.insert(field.clone(), value);
      }
    }
    Ok(Some(changes))
  }

  /// Apply to `current`, returning the complete next record.
  pub fn apply_to(&self, current: Option<&FieldMap>) -> Result<Option<FieldMap>> {
    let Some(changes) = self.changes(current)? else {
      return Ok(None);
    };
    let mut next = current.cloned().unwrap_or_default();
    next.extend(changes);
    Ok(Some(next))
  }
}

// ─── Typed view ──────────────────────────────────────────────────────────────

/// A parsed engagement record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngagementRecord {
  pub email_id:     String,
  pub status:       Status,
  pub open_count:   u64,
  pub append_count: u64,
  /// Keyed by `<action>_<timestamp>` (without the field prefix).
  pub history:      BTreeMap<String, EngagementEvent>,
}

impl EngagementRecord {
  pub fn from_fields(email_id: &str, fields: &FieldMap) -> Result<Self> {
    let corrupt = |field: &str, value: &str| StateError::CorruptRecord {
      field: field.to_owned(),
      value: value.to_owned(),
    };
    let count = |field: &str| -> Result<u64> {
      match fields.get(field) {
        Some(raw) => Ok(raw.parse().map_err(|_| corrupt(field, raw))?),
        None => Ok(0),
      }
    };

    let status = match fields.get(CURRENT_STATUS) {
      Some(raw) => raw.parse().map_err(|_| corrupt(CURRENT_STATUS, raw))?,
      None => Status::Untracked,
    };

    let mut history = BTreeMap::new();
    for (field, raw) in fields {
      if let Some(key) = field.strip_prefix(HISTORY_PREFIX) {
        let event = serde_json::from_str(raw).map_err(|_| corrupt(field, raw))?;
        history.insert(key.to_owned(), event);
      }
    }

    Ok(Self {
      email_id: email_id.to_owned(),
      status,
      open_count: count(OPEN_COUNT)?,
      append_count: count(APPEND_COUNT)?,
      history,
    })
  }

  /// History events ordered by time (ties broken by key).
  pub fn timeline(&self) -> Vec<&EngagementEvent> {
    let mut events: Vec<&EngagementEvent> = self.history.values().collect();
    events.sort_by_key(|e| e.timestamp);
    events
  }
}
