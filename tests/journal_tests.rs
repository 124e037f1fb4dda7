//! Integration tests for sessions spanning several process lifetimes

use batchtrail::{
    Counter, Criteria, DocumentStore, DurabilityMode, JournalConfig, LogEntry, Session,
    SessionKind, Status, Tracker, TrailConfig, Transaction, TransactionKind,
};
use tempfile::TempDir;

fn journaled_config(dir: &TempDir) -> TrailConfig {
    TrailConfig::new().journal(JournalConfig::new(dir.path()).durability(DurabilityMode::Sync))
}

#[tokio::test]
async fn test_session_resumes_after_reopen() {
    let temp_dir = TempDir::new().unwrap();

    let (session_id, step_id) = {
        let tracker = Tracker::open(journaled_config(&temp_dir)).await.unwrap();
        let mut session = Session::new(&tracker, SessionKind::Upload, "U1");
        let session_id = session.commit().await.unwrap();
        session.open_working_area("rows").await.unwrap();
        session.increment(Counter::Processed, 120).await.unwrap();

        let mut step = session
            .new_transaction(TransactionKind::DataLoad, None)
            .await
            .unwrap();
        step.append_log(LogEntry::new(Status::Warning).message("truncated value"))
            .await
            .unwrap();
        (session_id, step.id().cloned().unwrap())
    };

    // Second process picks the session up where the first left it.
    let tracker = Tracker::open(journaled_config(&temp_dir)).await.unwrap();
    let mut session = Session::load(&tracker, &session_id).await.unwrap().unwrap();
    assert_eq!(session.status().await.unwrap(), Status::Executing);
    assert_eq!(session.cached_counters().processed, 120);
    assert_eq!(session.cached_working_areas().len(), 1);

    let mut step = Transaction::load(&tracker, &step_id).await.unwrap().unwrap();
    assert_eq!(step.status().await.unwrap(), Status::Warning);
    assert_eq!(step.cached_log().len(), 1);

    step.append_log(LogEntry::new(Status::Error)).await.unwrap();
    let report = session.delete().await.unwrap();
    assert_eq!(report.transactions_deleted, 1);
    assert_eq!(report.working_areas_dropped.len(), 1);
    drop(tracker);

    let tracker = Tracker::open(journaled_config(&temp_dir)).await.unwrap();
    assert!(Session::load(&tracker, &session_id).await.unwrap().is_none());
    assert!(Transaction::load(&tracker, &step_id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_checkpointed_journal_recovers() {
    let temp_dir = TempDir::new().unwrap();
    let config = TrailConfig::new().journal(
        JournalConfig::new(temp_dir.path())
            .durability(DurabilityMode::Sync)
            .checkpoint_every(4),
    );

    let session_id = {
        let tracker = Tracker::open(config.clone()).await.unwrap();
        let mut session = Session::new(&tracker, SessionKind::Update, "U1");
        let id = session.commit().await.unwrap();
        for _ in 0..10 {
            session.increment(Counter::Validated, 1).await.unwrap();
        }
        session.finish(Status::Ok).await.unwrap();
        id
    };

    let tracker = Tracker::open(config).await.unwrap();
    let mut session = Session::load(&tracker, &session_id).await.unwrap().unwrap();
    assert_eq!(session.status().await.unwrap(), Status::Ok);
    assert_eq!(session.cached_counters().validated, 10);
    assert!(session.cached_end().is_some());
}

#[tokio::test]
async fn test_open_from_json_file() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("trail.json");
    let data_dir = temp_dir.path().join("data");
    let json = format!(
        r#"{{"session_collection": "runs", "journal": {{"data_dir": {:?}, "durability": "sync"}}}}"#,
        data_dir.to_string_lossy()
    );
    std::fs::write(&config_path, json).unwrap();

    let tracker = batchtrail::open(&config_path).await.unwrap();
    assert_eq!(tracker.session_collection(), "runs");

    let mut session = Session::new(&tracker, SessionKind::Upload, "U1");
    session.commit().await.unwrap();
    assert!(data_dir.join("batchtrail.wal").exists());
}

#[tokio::test]
async fn test_commit_survives_failed_checkpoint() {
    let temp_dir = TempDir::new().unwrap();
    let journal = JournalConfig::new(temp_dir.path())
        .durability(DurabilityMode::Sync)
        .checkpoint_every(1);
    let snapshot_path = journal.snapshot_path();
    let config = TrailConfig::new().journal(journal);

    let tracker = Tracker::open(config.clone()).await.unwrap();
    std::fs::create_dir_all(&snapshot_path).unwrap();

    let mut session = Session::new(&tracker, SessionKind::Upload, "U1");
    let id = session.commit().await.unwrap();
    assert!(session.commit().await.is_err());
    session.finish(Status::Ok).await.unwrap();

    let stored = tracker
        .store()
        .find_all(tracker.session_collection(), &Criteria::all())
        .await
        .unwrap();
    assert_eq!(stored.len(), 1);

    drop(tracker);
    std::fs::remove_dir(&snapshot_path).unwrap();
    let tracker = Tracker::open(config).await.unwrap();
    let mut reloaded = Session::load(&tracker, &id).await.unwrap().unwrap();
    assert_eq!(reloaded.status().await.unwrap(), Status::Ok);
}
