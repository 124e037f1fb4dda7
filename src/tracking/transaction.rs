use super::cascade::{self, CascadeReport};
use super::fields;
use super::lifecycle::Lifecycle;
use super::log::LogEntry;
use super::mode::{Mode, RecordRef};
use super::record::{TransactionRecord, decode, encode, to_value};
use super::session::Session;
use super::Tracker;
use crate::core::{
    Counter, Counters, RecordId, Result, Status, TimeSpec, Timestamp, TrailError, TransactionKind,
};
use crate::store::{Criteria, document_id};
use chrono::Utc;
use std::collections::HashSet;
use tracing::{Instrument, Level, event, info_span};

const ENTITY: &str = "Transaction";

/// What a transaction hangs off: its session, or a parent transaction.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Owner {
    Session(RecordId),
    Parent(RecordId),
}

impl Owner {
    pub fn id(&self) -> &RecordId {
        match self {
            Owner::Session(id) | Owner::Parent(id) => id,
        }
    }

    fn from_record(record: &TransactionRecord) -> Result<Self> {
        match (&record.session, &record.parent) {
            (Some(session), None) => Ok(Owner::Session(session.clone())),
            (None, Some(parent)) => Ok(Owner::Parent(parent.clone())),
            _ => Err(TrailError::corrupt(
                record.id.as_ref().map(|id| id.as_str()).unwrap_or("?"),
                "a transaction needs exactly one of session or parent",
            )),
        }
    }
}

// ============================================================================
// Builder
// ============================================================================

/// Staged construction of a transaction.
///
/// Exactly one owner must be given. An owner passed in is remembered even if
/// it has no identity yet, so `build()` can tell a missing owner from an
/// uncommitted one.
#[derive(Debug)]
pub struct TransactionBuilder {
    tracker: Tracker,
    kind: TransactionKind,
    session: Option<Option<RecordId>>,
    parent: Option<Option<RecordId>>,
    collection_alias: Option<String>,
    record_ref: Option<String>,
}

impl TransactionBuilder {
    pub fn new(tracker: &Tracker, kind: TransactionKind) -> Self {
        Self {
            tracker: tracker.clone(),
            kind,
            session: None,
            parent: None,
            collection_alias: None,
            record_ref: None,
        }
    }

    pub fn session(mut self, session: &Session) -> Self {
        self.session = Some(session.id().cloned());
        self
    }

    pub fn parent(mut self, parent: &Transaction) -> Self {
        self.parent = Some(parent.id().cloned());
        self
    }

    pub fn collection_alias(mut self, alias: impl Into<String>) -> Self {
        self.collection_alias = Some(alias.into());
        self
    }

    /// Reference to the data record a per-record transaction is about.
    pub fn record_ref(mut self, record: impl Into<String>) -> Self {
        self.record_ref = Some(record.into());
        self
    }

    pub fn build(self) -> Result<Transaction> {
        let owner = match (self.session, self.parent) {
            (None, None) => return Err(TrailError::MissingOwner),
            (Some(_), Some(_)) => return Err(TrailError::AmbiguousOwner),
            (Some(None), None) => return Err(TrailError::NotCommitted("Session")),
            (None, Some(None)) => return Err(TrailError::NotCommitted(ENTITY)),
            (Some(Some(session)), None) => Owner::Session(session),
            (None, Some(Some(parent))) => Owner::Parent(parent),
        };

        Ok(Transaction {
            tracker: self.tracker,
            mode: Mode::Uncommitted,
            kind: self.kind,
            owner,
            collection_alias: self.collection_alias,
            record_ref: self.record_ref,
            lifecycle: Lifecycle::begin(Utc::now()),
            log: Vec::new(),
        })
    }
}

// ============================================================================
// Transaction
// ============================================================================

/// One step of a batch run, with an append-only log.
///
/// Appending a log entry ratchets the status up to the entry's status when
/// the entry is more severe; nothing in this type ever lowers it except an
/// explicit `set_status`.
#[derive(Debug, Clone)]
pub struct Transaction {
    tracker: Tracker,
    mode: Mode,
    kind: TransactionKind,
    owner: Owner,
    collection_alias: Option<String>,
    record_ref: Option<String>,
    lifecycle: Lifecycle,
    log: Vec<LogEntry>,
}

impl Transaction {
    pub fn builder(tracker: &Tracker, kind: TransactionKind) -> TransactionBuilder {
        TransactionBuilder::new(tracker, kind)
    }

    pub async fn load(tracker: &Tracker, id: &RecordId) -> Result<Option<Self>> {
        let found = tracker
            .store()
            .find_one(tracker.transaction_collection(), id)
            .await?;
        match found {
            Some(document) => Ok(Some(Self::from_record(tracker, id.clone(), decode(document)?)?)),
            None => Ok(None),
        }
    }

    pub(crate) async fn load_all(tracker: &Tracker, criteria: &Criteria) -> Result<Vec<Self>> {
        let documents = tracker
            .store()
            .find_all(tracker.transaction_collection(), criteria)
            .await?;
        let mut loaded = Vec::with_capacity(documents.len());
        for document in documents {
            let id = document_id(&document)
                .ok_or_else(|| TrailError::corrupt("?", "stored transaction has no id"))?;
            loaded.push(Self::from_record(tracker, id, decode(document)?)?);
        }
        Ok(loaded)
    }

    fn from_record(tracker: &Tracker, id: RecordId, record: TransactionRecord) -> Result<Self> {
        let owner = Owner::from_record(&record)?;
        Ok(Self {
            mode: Mode::Committed(RecordRef::new(
                tracker.store().clone(),
                tracker.transaction_collection(),
                id,
            )),
            tracker: tracker.clone(),
            kind: record.kind,
            owner,
            collection_alias: record.collection_alias,
            record_ref: record.record_ref,
            lifecycle: Lifecycle {
                start: record.start,
                end: record.end,
                status: record.status,
                counters: record.counters,
            },
            log: record.log,
        })
    }

    fn to_record(&self) -> TransactionRecord {
        let (session, parent) = match &self.owner {
            Owner::Session(id) => (Some(id.clone()), None),
            Owner::Parent(id) => (None, Some(id.clone())),
        };
        TransactionRecord {
            id: None,
            kind: self.kind,
            session,
            parent,
            start: self.lifecycle.start,
            end: self.lifecycle.end,
            status: self.lifecycle.status,
            collection_alias: self.collection_alias.clone(),
            record_ref: self.record_ref.clone(),
            log: self.log.clone(),
            counters: self.lifecycle.counters,
        }
    }

    pub async fn commit(&mut self) -> Result<RecordId> {
        if let Some(id) = self.mode.id() {
            return Err(TrailError::AlreadyCommitted {
                entity: ENTITY,
                id: id.to_string(),
            });
        }

        let span = info_span!("transaction.commit", kind = %self.kind, owner = %self.owner.id());
        async {
            let document = encode(&self.to_record())?;
            let id = self
                .tracker
                .store()
                .insert(self.tracker.transaction_collection(), document)
                .await?;
            self.mode = Mode::Committed(RecordRef::new(
                self.tracker.store().clone(),
                self.tracker.transaction_collection(),
                id.clone(),
            ));
            event!(Level::DEBUG, transaction = %id, "transaction committed");
            Ok(id)
        }
        .instrument(span)
        .await
    }

    async fn fetch_record(&self) -> Result<Option<TransactionRecord>> {
        match self.mode.record() {
            Some(record) => Ok(Some(decode(record.fetch().await?)?)),
            None => Ok(None),
        }
    }

    /// Re-read the stored record and refresh every store-owned field.
    pub async fn refresh(&mut self) -> Result<()> {
        if let Some(stored) = self.fetch_record().await? {
            self.owner = Owner::from_record(&stored)?;
            self.lifecycle.status = stored.status;
            self.lifecycle.end = stored.end;
            self.lifecycle.counters = stored.counters;
            self.log = stored.log;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Memory-authoritative fields
    // ------------------------------------------------------------------

    pub fn id(&self) -> Option<&RecordId> {
        self.mode.id()
    }

    pub fn is_committed(&self) -> bool {
        self.mode.is_committed()
    }

    pub fn kind(&self) -> TransactionKind {
        self.kind
    }

    pub fn start(&self) -> Timestamp {
        self.lifecycle.start
    }

    pub fn collection_alias(&self) -> Option<&str> {
        self.collection_alias.as_deref()
    }

    pub fn record_ref(&self) -> Option<&str> {
        self.record_ref.as_deref()
    }

    pub fn tracker(&self) -> &Tracker {
        &self.tracker
    }

    // ------------------------------------------------------------------
    // Store-authoritative fields
    // ------------------------------------------------------------------

    pub async fn owner(&mut self) -> Result<Owner> {
        self.refresh().await?;
        Ok(self.owner.clone())
    }

    pub async fn status(&mut self) -> Result<Status> {
        self.refresh().await?;
        Ok(self.lifecycle.status)
    }

    pub async fn end(&mut self) -> Result<Option<Timestamp>> {
        self.refresh().await?;
        Ok(self.lifecycle.end)
    }

    pub async fn log(&mut self) -> Result<Vec<LogEntry>> {
        self.refresh().await?;
        Ok(self.log.clone())
    }

    pub async fn counters(&mut self) -> Result<Counters> {
        self.refresh().await?;
        Ok(self.lifecycle.counters)
    }

    pub fn cached_owner(&self) -> &Owner {
        &self.owner
    }

    pub fn cached_status(&self) -> Status {
        self.lifecycle.status
    }

    pub fn cached_end(&self) -> Option<Timestamp> {
        self.lifecycle.end
    }

    pub fn cached_log(&self) -> &[LogEntry] {
        &self.log
    }

    pub fn cached_counters(&self) -> Counters {
        self.lifecycle.counters
    }

    pub async fn set_start(&mut self, time: TimeSpec) -> Result<Timestamp> {
        self.lifecycle.set_start(&self.tracker, &self.mode, time).await
    }

    pub async fn set_end(&mut self, time: TimeSpec) -> Result<Timestamp> {
        self.lifecycle.set_end(&self.tracker, &self.mode, time).await
    }

    pub async fn set_status(&mut self, status: Status) -> Result<()> {
        self.lifecycle.set_status(&self.mode, status).await
    }

    pub async fn finish(&mut self, status: Status) -> Result<Timestamp> {
        self.lifecycle.finish(&self.tracker, &self.mode, status).await
    }

    pub async fn increment(&mut self, counter: Counter, delta: i64) -> Result<u64> {
        self.lifecycle.increment(&self.mode, counter, delta).await
    }

    // ------------------------------------------------------------------
    // Log
    // ------------------------------------------------------------------

    /// Append one entry and ratchet the status; returns the resulting status.
    ///
    /// When committed this is one atomic array append followed by a re-read
    /// of the stored status. The status write that may follow is not atomic
    /// with that read: a concurrent writer can interleave, and the last
    /// write wins.
    pub async fn append_log(&mut self, entry: LogEntry) -> Result<Status> {
        let Some(record) = self.mode.record() else {
            if entry.status.outranks(self.lifecycle.status) {
                self.lifecycle.status = entry.status;
            }
            self.log.push(entry);
            return Ok(self.lifecycle.status);
        };

        record.append(fields::LOG, to_value(&entry)?).await?;
        let stored: TransactionRecord = decode(record.fetch().await?)?;
        let status = if entry.status.outranks(stored.status) {
            record.set(fields::STATUS, to_value(&entry.status)?).await?;
            event!(
                Level::DEBUG,
                transaction = %record.id(),
                from = %stored.status,
                to = %entry.status,
                "status raised by log entry"
            );
            entry.status
        } else {
            stored.status
        };

        self.lifecycle.status = status;
        self.log = stored.log;
        Ok(status)
    }

    // ------------------------------------------------------------------
    // Tree
    // ------------------------------------------------------------------

    /// Ancestor transactions, nearest first, each re-read from the store.
    ///
    /// The walk ends at the first ancestor owned by a session; a transaction
    /// owned directly by a session has an empty chain.
    pub async fn parent_chain(&self) -> Result<Vec<Transaction>> {
        let mut seen: HashSet<RecordId> = self.id().cloned().into_iter().collect();
        let mut chain = Vec::new();
        let mut next = self.owner.clone();

        while let Owner::Parent(parent_id) = next {
            if !seen.insert(parent_id.clone()) {
                return Err(TrailError::corrupt(
                    parent_id.as_str(),
                    "transaction ancestry contains a cycle",
                ));
            }
            let parent = Transaction::load(&self.tracker, &parent_id)
                .await?
                .ok_or_else(|| {
                    TrailError::not_found(self.tracker.transaction_collection(), parent_id.as_str())
                })?;
            next = parent.owner.clone();
            chain.push(parent);
        }
        Ok(chain)
    }

    /// Mark this transaction and every ancestor as failed with `status`.
    ///
    /// Only the failing outcomes `failed` and `exception` are accepted.
    /// Status and `end` are written in one patch per transaction. Stops at
    /// the session boundary: the owning session is never modified. Returns
    /// the ids of the ancestors that were updated.
    pub async fn propagate_failure(&mut self, status: Status) -> Result<Vec<RecordId>> {
        if !status.is_failure() {
            return Err(TrailError::invalid("failure status", status.as_str()));
        }

        let span = info_span!("transaction.propagate_failure", transaction = ?self.id(), %status);
        async {
            let chain = self.parent_chain().await?;
            let now = self.tracker.now().await?;

            self.lifecycle
                .finish_at(&self.tracker, &self.mode, status, TimeSpec::At(now))
                .await?;

            let mut updated = Vec::with_capacity(chain.len());
            for mut ancestor in chain {
                ancestor
                    .lifecycle
                    .finish_at(&ancestor.tracker, &ancestor.mode, status, TimeSpec::At(now))
                    .await?;
                updated.extend(ancestor.id().cloned());
            }
            event!(Level::WARN, ancestors = updated.len(), "failure propagated");
            Ok(updated)
        }
        .instrument(span)
        .await
    }

    /// Create and commit a transaction owned by this one.
    pub async fn new_child(&self, kind: TransactionKind) -> Result<Transaction> {
        self.mode.require(ENTITY)?;
        let mut child = TransactionBuilder::new(&self.tracker, kind)
            .parent(self)
            .build()?;
        child.commit().await?;
        Ok(child)
    }

    /// Transactions owned directly by this one, in creation order.
    pub async fn children(&self) -> Result<Vec<Transaction>> {
        let Some(id) = self.id() else {
            return Ok(Vec::new());
        };
        Transaction::load_all(&self.tracker, &Criteria::eq(fields::PARENT, id.as_str())).await
    }

    /// The session at the top of this transaction's tree.
    pub async fn root_session(&self) -> Result<Option<Session>> {
        match self.root_session_id().await? {
            Some(id) => Session::load(&self.tracker, &id).await,
            None => Ok(None),
        }
    }

    pub(crate) async fn root_session_id(&self) -> Result<Option<RecordId>> {
        let chain = self.parent_chain().await?;
        let top = chain.last().map(|t| &t.owner).unwrap_or(&self.owner);
        match top {
            Owner::Session(id) => Ok(Some(id.clone())),
            Owner::Parent(_) => Ok(None),
        }
    }

    /// Delete this transaction and its whole subtree.
    pub async fn delete(&self) -> Result<CascadeReport> {
        let Some(id) = self.id() else {
            return Ok(CascadeReport::default());
        };
        let span = info_span!("transaction.delete", transaction = %id);
        async {
            let mut doomed = cascade::transaction_descendants(&self.tracker, id).await?;
            doomed.push(id.clone());
            let transactions_deleted = cascade::delete_transactions(&self.tracker, &doomed).await?;
            event!(Level::DEBUG, transactions_deleted, "transaction subtree deleted");
            Ok(CascadeReport {
                transactions_deleted,
                ..CascadeReport::default()
            })
        }
        .instrument(span)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::SessionKind;

    #[test]
    fn test_builder_owner_rules() {
        tokio_test::block_on(async {
            let tracker = Tracker::in_memory();
            let mut session = Session::new(&tracker, SessionKind::Upload, "U1");

            let err = Transaction::builder(&tracker, TransactionKind::Prepare)
                .build()
                .unwrap_err();
            assert!(matches!(err, TrailError::MissingOwner));

            let err = Transaction::builder(&tracker, TransactionKind::Prepare)
                .session(&session)
                .build()
                .unwrap_err();
            assert!(matches!(err, TrailError::NotCommitted("Session")));

            session.commit().await.unwrap();
            let parent = session
                .new_transaction(TransactionKind::Prepare, None)
                .await
                .unwrap();

            let err = Transaction::builder(&tracker, TransactionKind::Insert)
                .session(&session)
                .parent(&parent)
                .build()
                .unwrap_err();
            assert!(matches!(err, TrailError::AmbiguousOwner));

            let child = Transaction::builder(&tracker, TransactionKind::Record)
                .parent(&parent)
                .record_ref("row-17")
                .build()
                .unwrap();
            assert_eq!(child.cached_owner(), &Owner::Parent(parent.id().cloned().unwrap()));
            assert_eq!(child.record_ref(), Some("row-17"));
        });
    }

    #[test]
    fn test_uncommitted_log_ratchets_locally() {
        tokio_test::block_on(async {
            let tracker = Tracker::in_memory();
            let mut session = Session::new(&tracker, SessionKind::Upload, "U1");
            session.commit().await.unwrap();
            let mut txn = Transaction::builder(&tracker, TransactionKind::Validation)
                .session(&session)
                .build()
                .unwrap();

            assert_eq!(txn.append_log(LogEntry::new(Status::Error)).await.unwrap(), Status::Error);
            assert_eq!(txn.append_log(LogEntry::new(Status::Message)).await.unwrap(), Status::Error);
            assert_eq!(txn.cached_log().len(), 2);

            txn.commit().await.unwrap();
            let mut reloaded = Transaction::load(&tracker, txn.id().unwrap()).await.unwrap().unwrap();
            assert_eq!(reloaded.status().await.unwrap(), Status::Error);
            assert_eq!(reloaded.log().await.unwrap().len(), 2);
        });
    }

    #[test]
    fn test_propagate_requires_failure_status() {
        tokio_test::block_on(async {
            let tracker = Tracker::in_memory();
            let mut session = Session::new(&tracker, SessionKind::Upload, "U1");
            session.commit().await.unwrap();
            let mut txn = session
                .new_transaction(TransactionKind::Insert, None)
                .await
                .unwrap();
            for status in [Status::Warning, Status::Error, Status::Fatal, Status::Ok] {
                let err = txn.propagate_failure(status).await.unwrap_err();
                assert!(err.is_construction());
            }
            assert_eq!(txn.status().await.unwrap(), Status::Executing);
            assert!(txn.end().await.unwrap().is_none());
        });
    }

    #[test]
    fn test_new_child_requires_commit() {
        tokio_test::block_on(async {
            let tracker = Tracker::in_memory();
            let mut session = Session::new(&tracker, SessionKind::Upload, "U1");
            session.commit().await.unwrap();
            let txn = Transaction::builder(&tracker, TransactionKind::Insert)
                .session(&session)
                .build()
                .unwrap();
            assert!(txn.new_child(TransactionKind::Record).await.unwrap_err().is_precondition());
        });
    }
}
