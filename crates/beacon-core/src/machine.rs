//! The engagement state machine.
//!
//! | current            | action | next       | effects                               |
//! |--------------------|--------|------------|---------------------------------------|
//! | absent / untracked | append | attached   | append_count = 1, open_count = 0      |
//! | any tracked        | append | unchanged  | append_count += 1                     |
//! | absent / untracked | serve  | error      | nothing written                       |
//! | attached           | serve  | opened     | open_count += 1                       |
//! | opened / responded | serve  | unchanged  | open_count += 1                       |
//!
//! Every accepted action also adds one history entry. Transitions are
//! expressed as an [`Update`] so stores can evaluate them atomically;
//! [`next`] evaluates the same update in memory.

use crate::{
  Result, StateError,
  record::{
    APPEND_COUNT, Action, CURRENT_STATUS, EngagementEvent, FieldMap, FieldOp, OPEN_COUNT,
    Status, Update,
  },
};

/// The update that records `event`.
pub fn plan(event: &EngagementEvent) -> Result<Update> {
  let snapshot = FieldOp::SetIfAbsent(serde_json::to_string(event)?);
  let history = (event.history_field(), snapshot);

  let update = match event.action {
    Action::Append => Update {
      require_existing: false,
      ops:              vec![
        (APPEND_COUNT.to_owned(), FieldOp::Increment(1)),
        (OPEN_COUNT.to_owned(), FieldOp::SetIfAbsent("0".to_owned())),
        (CURRENT_STATUS.to_owned(), FieldOp::RaiseStatus(Status::Attached)),
        history,
      ],
    },
    Action::Serve => Update {
      require_existing: true,
      ops:              vec![
        (OPEN_COUNT.to_owned(), FieldOp::Increment(1)),
        (CURRENT_STATUS.to_owned(), FieldOp::RaiseStatus(Status::Opened)),
        history,
      ],
    },
  };
  Ok(update)
}

/// The record that results from applying `event` to `current`.
///
/// A serve against an absent record is [`StateError::ServeBeforeAppend`].
pub fn next(
  email_id: &str,
  current: Option<&FieldMap>,
  event: &EngagementEvent,
) -> Result<FieldMap> {
  plan(event)?
    .apply_to(current)?
    .ok_or_else(|| StateError::ServeBeforeAppend(email_id.to_owned()).into())
}
