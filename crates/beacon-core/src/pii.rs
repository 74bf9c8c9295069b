//! The PII payload carried inside a tracking reference.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Error, Result};

/// Sender/recipient identity for one outbound message.
///
/// Serialized as compact JSON and encrypted into the `tr` query parameter.
/// The message body is never part of it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pii {
  pub sender_id:    String,
  pub sender_email: String,
  pub recv_email:   String,
  /// Assigned once, when the message is first prepared; the primary key of
  /// its engagement record from then on.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub email_id:     Option<String>,
}

impl Pii {
  pub fn new(
    sender_id: impl Into<String>,
    sender_email: impl Into<String>,
    recv_email: impl Into<String>,
  ) -> Self {
    Self {
      sender_id:    sender_id.into(),
      sender_email: sender_email.into(),
      recv_email:   recv_email.into(),
      email_id:     None,
    }
  }

  /// Reject records with an empty required field.
  pub fn validate(&self) -> Result<()> {
    let required = [
      ("sender_id", &self.sender_id),
      ("sender_email", &self.sender_email),
      ("recv_email", &self.recv_email),
    ];
    for (name, value) in required {
      if value.trim().is_empty() {
        return Err(Error::Validation(format!("missing required field `{name}`")));
      }
    }
    Ok(())
  }

  /// The email id, if one has been assigned. An empty string counts as
  /// unassigned.
  pub fn email_id(&self) -> Option<&str> {
    self.email_id.as_deref().filter(|id| !id.is_empty())
  }

  /// Assign a fresh email id unless one is already present, and return it.
  pub fn assign_email_id(&mut self) -> &str {
    if self.email_id().is_none() {
      self.email_id = Some(Uuid::new_v4().hyphenated().to_string());
    }
    self.email_id.as_deref().unwrap_or_default()
  }
}
