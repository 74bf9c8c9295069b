//! Integration tests for `SqliteStore` against SQLite databases.

use std::sync::Arc;

use beacon_core::{
  Error as CoreError, StateError,
  machine,
  record::{
    Action, CURRENT_STATUS, ClientInfo, EngagementEvent, EngagementRecord, FieldOp,
    OPEN_COUNT, Status, Update,
  },
  store::EngagementStore,
};

use crate::{Error, SqliteStore};

async fn store() -> SqliteStore {
  SqliteStore::open_in_memory()
    .await
    .expect("in-memory store")
}

fn event(action: Action) -> EngagementEvent {
  EngagementEvent::new(action, ClientInfo::default(), None)
}

async fn record(s: &SqliteStore, email_id: &str) -> EngagementRecord {
  let fields = s.read(email_id.to_owned()).await.unwrap().expect("record exists");
  EngagementRecord::from_fields(email_id, &fields).unwrap()
}

// ─── Reads ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn read_missing_returns_none() {
  let s = store().await;
  assert_eq!(s.read("nope".into()).await.unwrap(), None);
  assert_eq!(s.count().await.unwrap(), 0);
}

// ─── Transitions ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn append_creates_attached_record() {
  let s = store().await;
  let update = machine::plan(&event(Action::Append)).unwrap();
  let returned = s.apply("e1".into(), update).await.unwrap().unwrap();

  let r = record(&s, "e1").await;
  assert_eq!(r.status, Status::Attached);
  assert_eq!((r.append_count, r.open_count), (1, 0));
  assert_eq!(r.history.len(), 1);
  assert_eq!(s.read("e1".into()).await.unwrap().unwrap(), returned);
}

#[tokio::test]
async fn serve_without_record_writes_nothing() {
  let s = store().await;
  let update = machine::plan(&event(Action::Serve)).unwrap();
  assert_eq!(s.apply("e1".into(), update).await.unwrap(), None);
  assert_eq!(s.count().await.unwrap(), 0);
}

#[tokio::test]
async fn serve_after_append_opens() {
  let s = store().await;
  s.apply("e1".into(), machine::plan(&event(Action::Append)).unwrap())
    .await
    .unwrap();
  s.apply("e1".into(), machine::plan(&event(Action::Serve)).unwrap())
    .await
    .unwrap();

  let r = record(&s, "e1").await;
  assert_eq!(r.status, Status::Opened);
  assert_eq!(r.open_count, 1);
  assert_eq!(r.timeline().last().unwrap().action, Action::Serve);
}

#[tokio::test]
async fn unrelated_fields_are_untouched() {
  let s = store().await;
  s.apply("e1".into(), machine::plan(&event(Action::Append)).unwrap())
    .await
    .unwrap();
  s.apply(
    "e1".into(),
    Update {
      require_existing: true,
      ops:              vec![("crm_ref".into(), FieldOp::Set("x-9".into()))],
    },
  )
  .await
  .unwrap();
  s.apply("e1".into(), machine::plan(&event(Action::Serve)).unwrap())
    .await
    .unwrap();

  let fields = s.read("e1".into()).await.unwrap().unwrap();
  assert_eq!(fields["crm_ref"], "x-9");
  assert_eq!(fields[OPEN_COUNT], "1");
}

#[tokio::test]
async fn externally_set_responded_survives_serves() {
  let s = store().await;
  s.apply("e1".into(), machine::plan(&event(Action::Append)).unwrap())
    .await
    .unwrap();
  s.apply(
    "e1".into(),
    Update {
      require_existing: true,
      ops:              vec![(CURRENT_STATUS.into(), FieldOp::Set("responded".into()))],
    },
  )
  .await
  .unwrap();
  s.apply("e1".into(), machine::plan(&event(Action::Serve)).unwrap())
    .await
    .unwrap();

  assert_eq!(record(&s, "e1").await.status, Status::Responded);
}

#[tokio::test]
async fn corrupt_record_is_a_core_error_and_rolls_back() {
  let s = store().await;
  s.apply("e1".into(), machine::plan(&event(Action::Append)).unwrap())
    .await
    .unwrap();
  s.apply(
    "e1".into(),
    Update {
      require_existing: true,
      ops:              vec![(OPEN_COUNT.into(), FieldOp::Set("lots".into()))],
    },
  )
  .await
  .unwrap();
  let before = s.read("e1".into()).await.unwrap();

  let err = s
    .apply("e1".into(), machine::plan(&event(Action::Serve)).unwrap())
    .await
    .unwrap_err();
  assert!(matches!(
    &err,
    Error::Core(CoreError::State(StateError::CorruptRecord { field, .. })) if field == OPEN_COUNT
  ));
  assert!(matches!(
    CoreError::from(err),
    CoreError::State(StateError::CorruptRecord { .. })
  ));
  assert_eq!(s.read("e1".into()).await.unwrap(), before);
}

// ─── Concurrency ─────────────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_serves_each_increment_once() {
  let s = Arc::new(store().await);
  s.apply("e1".into(), machine::plan(&event(Action::Append)).unwrap())
    .await
    .unwrap();

  // Every hit lands in the same clock tick.
  let tick = event(Action::Serve).timestamp;
  let tasks: Vec<_> = (0..32)
    .map(|_| {
      let s = Arc::clone(&s);
      let mut serve = event(Action::Serve);
      serve.timestamp = tick;
      tokio::spawn(async move {
        s.apply("e1".into(), machine::plan(&serve).unwrap()).await
      })
    })
    .collect();
  for task in tasks {
    task.await.unwrap().unwrap().unwrap();
  }

  let r = record(&s, "e1").await;
  assert_eq!(r.open_count, 32);
  assert_eq!(r.history.len(), 33);
}

// ─── Persistence ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn records_survive_reopen() {
  let dir = tempfile::tempdir().unwrap();
  let path = dir.path().join("beacon.db");

  {
    let s = SqliteStore::open(&path).await.unwrap();
    s.apply("e1".into(), machine::plan(&event(Action::Append)).unwrap())
      .await
      .unwrap();
  }

  let s = SqliteStore::open(&path).await.unwrap();
  assert_eq!(record(&s, "e1").await.append_count, 1);
  assert_eq!(s.count().await.unwrap(), 1);
}
