//! Integration tests for cascading deletes

use batchtrail::{
    Criteria, DocumentStore, InMemoryStore, Session, SessionKind, Tracker, TrailConfig,
    TransactionKind,
};
use std::sync::Arc;

fn tracker_with_store() -> (Tracker, Arc<InMemoryStore>) {
    let store = Arc::new(InMemoryStore::new());
    let tracker = Tracker::new(store.clone(), TrailConfig::default()).unwrap();
    (tracker, store)
}

#[tokio::test]
async fn test_session_delete_removes_whole_tree() {
    let (tracker, store) = tracker_with_store();
    let mut session = Session::new(&tracker, SessionKind::Upload, "U1");
    session.commit().await.unwrap();
    session.open_working_area("rows").await.unwrap();
    session.open_working_area("index").await.unwrap();

    // Three levels deep, several branches.
    let prepare = session
        .new_transaction(TransactionKind::Prepare, None)
        .await
        .unwrap();
    let load = session
        .new_transaction(TransactionKind::DataLoad, None)
        .await
        .unwrap();
    let validation = load.new_child(TransactionKind::Validation).await.unwrap();
    for _ in 0..3 {
        validation.new_child(TransactionKind::Record).await.unwrap();
    }
    prepare.new_child(TransactionKind::Cleanup).await.unwrap();

    // Unrelated session survives.
    let mut bystander = Session::new(&tracker, SessionKind::Update, "U2");
    bystander.commit().await.unwrap();
    bystander
        .new_transaction(TransactionKind::Update, None)
        .await
        .unwrap();
    bystander.open_working_area("rows").await.unwrap();

    let report = session.delete().await.unwrap();

    assert_eq!(report.sessions_deleted, 1);
    assert_eq!(report.transactions_deleted, 7);
    assert_eq!(report.working_areas_dropped.len(), 2);
    assert_eq!(store.record_count("sessions").await, 1);
    assert_eq!(store.record_count("transactions").await, 1);
    assert_eq!(store.working_areas().await.len(), 1);

    let id = session.id().unwrap();
    let leftovers = store
        .find_all("transactions", &Criteria::eq("session", id.as_str()))
        .await
        .unwrap();
    assert!(leftovers.is_empty());
    assert!(Session::load(&tracker, id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_delete_is_noop_for_missing_or_uncommitted() {
    let (tracker, store) = tracker_with_store();

    let local = Session::new(&tracker, SessionKind::Upload, "U1");
    assert_eq!(local.delete().await.unwrap().sessions_deleted, 0);

    let mut session = Session::new(&tracker, SessionKind::Upload, "U1");
    session.commit().await.unwrap();
    session.delete().await.unwrap();
    let again = session.delete().await.unwrap();
    assert_eq!(again.sessions_deleted, 0);
    assert_eq!(again.transactions_deleted, 0);
    assert_eq!(store.record_count("sessions").await, 0);
}

#[tokio::test]
async fn test_transaction_delete_removes_subtree_only() {
    let (tracker, store) = tracker_with_store();
    let mut session = Session::new(&tracker, SessionKind::Upload, "U1");
    session.commit().await.unwrap();

    let keep = session
        .new_transaction(TransactionKind::Prepare, None)
        .await
        .unwrap();
    let load = session
        .new_transaction(TransactionKind::DataLoad, None)
        .await
        .unwrap();
    let child = load.new_child(TransactionKind::Insert).await.unwrap();
    child.new_child(TransactionKind::Record).await.unwrap();

    let report = load.delete().await.unwrap();
    assert_eq!(report.transactions_deleted, 3);
    assert_eq!(report.sessions_deleted, 0);
    assert_eq!(store.record_count("transactions").await, 1);

    let remaining = session.transactions().await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].id(), keep.id());
}

#[tokio::test]
async fn test_foreign_parent_cannot_escape_session_delete() {
    let (tracker, store) = tracker_with_store();
    let mut first = Session::new(&tracker, SessionKind::Upload, "U1");
    first.commit().await.unwrap();
    let mut second = Session::new(&tracker, SessionKind::Update, "U2");
    second.commit().await.unwrap();

    let ours = first
        .new_transaction(TransactionKind::DataLoad, None)
        .await
        .unwrap();
    let theirs = second
        .new_transaction(TransactionKind::DataLoad, None)
        .await
        .unwrap();
    first
        .new_transaction(TransactionKind::Insert, Some(&ours))
        .await
        .unwrap();
    assert!(
        first
            .new_transaction(TransactionKind::Insert, Some(&theirs))
            .await
            .is_err()
    );

    let report = first.delete().await.unwrap();
    assert_eq!(report.transactions_deleted, 2);
    let left = store
        .find_all("transactions", &Criteria::all())
        .await
        .unwrap();
    assert_eq!(left.len(), 1);
}
