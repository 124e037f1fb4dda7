//! Integration tests for session lifecycle and dual-mode persistence

use batchtrail::{
    Counter, Criteria, InMemoryStore, Session, SessionKind, Status, TimeSpec, Tracker,
    TrailConfig, TrailError, TransactionKind,
};
use chrono::{TimeZone, Utc};
use serde_json::json;
use std::sync::Arc;

fn tracker_with_store() -> (Tracker, Arc<InMemoryStore>) {
    let store = Arc::new(InMemoryStore::new());
    let tracker = Tracker::new(store.clone(), TrailConfig::default()).unwrap();
    (tracker, store)
}

#[tokio::test]
async fn test_commit_twice_fails_without_second_record() {
    let (tracker, store) = tracker_with_store();
    let mut session = Session::new(&tracker, SessionKind::Upload, "U1");

    let id = session.commit().await.unwrap();
    let err = session.commit().await.unwrap_err();

    match err {
        TrailError::AlreadyCommitted { entity, id: reported } => {
            assert_eq!(entity, "Session");
            assert_eq!(reported, id.as_str());
        }
        other => panic!("unexpected error: {:?}", other),
    }
    assert_eq!(store.record_count("sessions").await, 1);
}

#[tokio::test]
async fn test_committed_record_shape() {
    let (tracker, store) = tracker_with_store();
    let mut session = Session::create(&tracker, "upload", "U1").unwrap();
    let id = session.commit().await.unwrap();

    let stored = batchtrail::DocumentStore::find_one(store.as_ref(), "sessions", &id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored["_id"], json!(id.as_str()));
    assert_eq!(stored["type"], json!("upload"));
    assert_eq!(stored["principal"], json!("U1"));
    assert_eq!(stored["status"], json!("executing"));
    assert_eq!(stored["processed"], json!(0));
    assert!(stored.contains_key("start"));
    assert!(!stored.contains_key("end"));
}

#[tokio::test]
async fn test_two_handles_see_each_others_writes() {
    let (tracker, _store) = tracker_with_store();
    let mut writer = Session::new(&tracker, SessionKind::Update, "U1");
    let id = writer.commit().await.unwrap();
    let mut reader = Session::load(&tracker, &id).await.unwrap().unwrap();

    writer.set_status(Status::Warning).await.unwrap();
    writer.increment(Counter::Rejected, 2).await.unwrap();

    // The cached mirror lags until an extern read refreshes it.
    assert_eq!(reader.cached_status(), Status::Executing);
    assert_eq!(reader.status().await.unwrap(), Status::Warning);
    assert_eq!(reader.cached_counters().rejected, 2);

    // Increments from both handles land in the store.
    reader.increment(Counter::Rejected, 1).await.unwrap();
    assert_eq!(writer.increment(Counter::Rejected, 1).await.unwrap(), 4);
    assert_eq!(writer.counters().await.unwrap().rejected, 4);
}

#[tokio::test]
async fn test_explicit_and_store_clock_times() {
    let (tracker, _store) = tracker_with_store();
    let mut session = Session::new(&tracker, SessionKind::Upload, "U1");
    session.commit().await.unwrap();

    let at = Utc.with_ymd_and_hms(2026, 5, 4, 12, 0, 0).unwrap();
    session.set_start(TimeSpec::At(at)).await.unwrap();
    let end = session.set_end(TimeSpec::Now).await.unwrap();

    let reloaded = Session::load(&tracker, session.id().unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(reloaded.start(), at);
    assert_eq!(reloaded.cached_end(), Some(end));
}

#[tokio::test]
async fn test_new_transaction_requires_committed_session() {
    let (tracker, _store) = tracker_with_store();
    let session = Session::new(&tracker, SessionKind::Upload, "U1");
    let err = session
        .new_transaction(TransactionKind::Prepare, None)
        .await
        .unwrap_err();
    assert!(matches!(err, TrailError::NotCommitted("Session")));
}

#[tokio::test]
async fn test_transactions_lists_direct_children_only() {
    let (tracker, _store) = tracker_with_store();
    let mut session = Session::new(&tracker, SessionKind::Upload, "U1");
    session.commit().await.unwrap();

    let prepare = session
        .new_transaction(TransactionKind::Prepare, None)
        .await
        .unwrap();
    let load = session
        .new_transaction(TransactionKind::DataLoad, None)
        .await
        .unwrap();
    session
        .new_transaction(TransactionKind::Record, Some(&load))
        .await
        .unwrap();

    let direct = session.transactions().await.unwrap();
    let kinds: Vec<_> = direct.iter().map(|t| t.kind()).collect();
    assert_eq!(kinds, vec![TransactionKind::Prepare, TransactionKind::DataLoad]);
    assert_eq!(direct[0].id(), prepare.id());
}

#[tokio::test]
async fn test_working_areas_are_named_and_recorded() {
    let (tracker, store) = tracker_with_store();
    let mut session = Session::new(&tracker, SessionKind::Upload, "U1");
    let id = session.commit().await.unwrap();

    let name = session.open_working_area("rows").await.unwrap();
    assert_eq!(name, format!("trail_tmp_{}_rows", id));
    assert!(store.working_areas().await.contains(&name));

    let mut other = Session::load(&tracker, &id).await.unwrap().unwrap();
    assert_eq!(other.working_areas().await.unwrap(), vec![name.clone()]);

    let dropped = other.drop_working_areas().await.unwrap();
    assert_eq!(dropped, vec![name]);
    assert!(store.working_areas().await.is_empty());
    assert!(session.working_areas().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_finish_sets_terminal_status_and_end() {
    let (tracker, store) = tracker_with_store();
    let mut session = Session::new(&tracker, SessionKind::Update, "U1");
    session.commit().await.unwrap();
    session.finish(Status::Failed).await.unwrap();

    let failed = batchtrail::DocumentStore::find_all(
        store.as_ref(),
        "sessions",
        &Criteria::eq("status", "failed"),
    )
    .await
    .unwrap();
    assert_eq!(failed.len(), 1);
    assert!(failed[0].contains_key("end"));
}

#[tokio::test]
async fn test_custom_collections() {
    let store = Arc::new(InMemoryStore::new());
    let config = TrailConfig::new()
        .session_collection("upload_runs")
        .transaction_collection("upload_steps");
    let tracker = Tracker::new(store.clone(), config).unwrap();

    let mut session = Session::new(&tracker, SessionKind::Upload, "U1");
    session.commit().await.unwrap();
    session
        .new_transaction(TransactionKind::Prepare, None)
        .await
        .unwrap();

    assert_eq!(store.record_count("upload_runs").await, 1);
    assert_eq!(store.record_count("upload_steps").await, 1);
    assert_eq!(store.record_count("sessions").await, 0);
}
