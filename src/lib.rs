// ============================================================================
// batchtrail Library
// ============================================================================
//
// Session and transaction tracking for long-running batch uploads and
// updates over a document store.
//
// ============================================================================

pub mod batch;
pub mod config;
pub mod core;
pub mod prelude;
pub mod store;
pub mod tracking;

// Re-export main types for convenience
pub use crate::core::{
    Counter, Counters, Document, PrincipalRef, RecordId, Result, SessionKind, Status, TagRef,
    TimeSpec, Timestamp, TrailError, TransactionKind,
};
pub use config::{DurabilityMode, JournalConfig, TrailConfig};
pub use store::{Criteria, DocumentStore, FieldPatch, InMemoryStore, JournaledStore};
pub use tracking::{
    CascadeReport, LogEntry, Owner, Session, SessionGuard, Tracker, Transaction,
    TransactionBuilder, mark_abandoned,
};
pub use batch::{BatchDriver, BatchReport};

/// Open a tracker from a JSON configuration file.
///
/// # Examples
///
/// ```no_run
/// # async fn demo() -> batchtrail::Result<()> {
/// use batchtrail::{Session, SessionKind, Status, LogEntry, TransactionKind};
///
/// let tracker = batchtrail::open("trail.json").await?;
/// let mut session = Session::new(&tracker, SessionKind::Upload, "U1");
/// session.commit().await?;
///
/// let mut step = session.new_transaction(TransactionKind::Prepare, None).await?;
/// step.append_log(LogEntry::new(Status::Warning).message("missing optional field")).await?;
/// session.finish(Status::Ok).await?;
/// # Ok(())
/// # }
/// ```
pub async fn open(config_path: impl AsRef<std::path::Path>) -> Result<Tracker> {
    let config = TrailConfig::load(config_path)?;
    Tracker::open(config).await
}
