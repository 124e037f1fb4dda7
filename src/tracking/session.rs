use super::cascade::{self, CascadeReport};
use super::fields;
use super::lifecycle::Lifecycle;
use super::mode::{Mode, RecordRef};
use super::record::{SessionRecord, decode, encode, to_value};
use super::transaction::{Transaction, TransactionBuilder};
use super::Tracker;
use crate::core::{
    Counter, Counters, PrincipalRef, RecordId, Result, SessionKind, Status, TimeSpec, Timestamp,
    TrailError, TransactionKind,
};
use crate::store::Criteria;
use chrono::Utc;
use tracing::{Instrument, Level, event, info_span};

const ENTITY: &str = "Session";

/// One batch run: an upload or update started by a principal.
///
/// Before `commit()` the session is a plain in-memory value. After it, the
/// store holds the authoritative status, end, working areas and counters;
/// reading them re-fetches the record and the `cached_*` accessors return
/// whatever this handle saw last.
#[derive(Debug, Clone)]
pub struct Session {
    tracker: Tracker,
    mode: Mode,
    kind: SessionKind,
    principal: PrincipalRef,
    lifecycle: Lifecycle,
    working_areas: Vec<String>,
}

impl Session {
    /// Typed constructor; `start` is the local clock, status `executing`.
    pub fn new(tracker: &Tracker, kind: SessionKind, principal: impl Into<PrincipalRef>) -> Self {
        Self {
            tracker: tracker.clone(),
            mode: Mode::Uncommitted,
            kind,
            principal: principal.into(),
            lifecycle: Lifecycle::begin(Utc::now()),
            working_areas: Vec::new(),
        }
    }

    /// Construct from a type name such as `"upload"`.
    pub fn create(tracker: &Tracker, kind: &str, principal: impl Into<PrincipalRef>) -> Result<Self> {
        Ok(Self::new(tracker, kind.parse()?, principal))
    }

    /// Attach to a committed session, e.g. one started by another process.
    pub async fn load(tracker: &Tracker, id: &RecordId) -> Result<Option<Self>> {
        let found = tracker
            .store()
            .find_one(tracker.session_collection(), id)
            .await?;
        let Some(document) = found else {
            return Ok(None);
        };
        let record: SessionRecord = decode(document)?;
        Ok(Some(Self::from_record(tracker, id.clone(), record)))
    }

    fn from_record(tracker: &Tracker, id: RecordId, record: SessionRecord) -> Self {
        let mode = Mode::Committed(RecordRef::new(
            tracker.store().clone(),
            tracker.session_collection(),
            id,
        ));
        Self {
            tracker: tracker.clone(),
            mode,
            kind: record.kind,
            principal: record.principal,
            lifecycle: Lifecycle {
                start: record.start,
                end: record.end,
                status: record.status,
                counters: record.counters,
            },
            working_areas: record.working_areas,
        }
    }

    /// Insert the record and switch to store-authoritative mode.
    pub async fn commit(&mut self) -> Result<RecordId> {
        if let Some(id) = self.mode.id() {
            return Err(TrailError::AlreadyCommitted {
                entity: ENTITY,
                id: id.to_string(),
            });
        }

        let span = info_span!("session.commit", kind = %self.kind, principal = self.principal.as_str());
        async {
            let document = encode(&self.to_record())?;
            let id = self
                .tracker
                .store()
                .insert(self.tracker.session_collection(), document)
                .await?;
            self.mode = Mode::Committed(RecordRef::new(
                self.tracker.store().clone(),
                self.tracker.session_collection(),
                id.clone(),
            ));
            event!(Level::DEBUG, session = %id, "session committed");
            Ok(id)
        }
        .instrument(span)
        .await
    }

    fn to_record(&self) -> SessionRecord {
        SessionRecord {
            id: None,
            kind: self.kind,
            principal: self.principal.clone(),
            start: self.lifecycle.start,
            end: self.lifecycle.end,
            status: self.lifecycle.status,
            working_areas: self.working_areas.clone(),
            counters: self.lifecycle.counters,
        }
    }

    /// Re-read the stored record and refresh every store-owned field.
    pub async fn refresh(&mut self) -> Result<()> {
        let Some(record) = self.mode.record() else {
            return Ok(());
        };
        let stored: SessionRecord = decode(record.fetch().await?)?;
        self.lifecycle.status = stored.status;
        self.lifecycle.end = stored.end;
        self.lifecycle.counters = stored.counters;
        self.working_areas = stored.working_areas;
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

    pub fn kind(&self) -> SessionKind {
        self.kind
    }

    pub fn principal(&self) -> &PrincipalRef {
        &self.principal
    }

    pub fn start(&self) -> Timestamp {
        self.lifecycle.start
    }

    pub fn tracker(&self) -> &Tracker {
        &self.tracker
    }

    // ------------------------------------------------------------------
    // Store-authoritative fields
    // ------------------------------------------------------------------

    pub async fn status(&mut self) -> Result<Status> {
        self.refresh().await?;
        Ok(self.lifecycle.status)
    }

    pub async fn end(&mut self) -> Result<Option<Timestamp>> {
        self.refresh().await?;
        Ok(self.lifecycle.end)
    }

    pub async fn working_areas(&mut self) -> Result<Vec<String>> {
        self.refresh().await?;
        Ok(self.working_areas.clone())
    }

    pub async fn counters(&mut self) -> Result<Counters> {
        self.refresh().await?;
        Ok(self.lifecycle.counters)
    }

    pub fn cached_status(&self) -> Status {
        self.lifecycle.status
    }

    pub fn cached_end(&self) -> Option<Timestamp> {
        self.lifecycle.end
    }

    pub fn cached_working_areas(&self) -> &[String] {
        &self.working_areas
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

    /// Terminal status plus `end = now`.
    pub async fn finish(&mut self, status: Status) -> Result<Timestamp> {
        event!(Level::DEBUG, session = ?self.id(), %status, "finishing session");
        self.lifecycle.finish(&self.tracker, &self.mode, status).await
    }

    pub async fn increment(&mut self, counter: Counter, delta: i64) -> Result<u64> {
        self.lifecycle.increment(&self.mode, counter, delta).await
    }

    // ------------------------------------------------------------------
    // Working areas
    // ------------------------------------------------------------------

    /// Create a staging area for this session and record its name.
    pub async fn open_working_area(&mut self, label: &str) -> Result<String> {
        let record = self.mode.require(ENTITY)?;
        let name = self.tracker.working_area_name(record.id(), label);
        self.tracker.store().create_working_area(&name).await?;
        record.append(fields::WORKING_AREAS, to_value(&name)?).await?;
        self.working_areas.push(name.clone());
        Ok(name)
    }

    /// Drop every recorded staging area and clear the list. Returns the
    /// names that still existed.
    pub async fn drop_working_areas(&mut self) -> Result<Vec<String>> {
        if !self.is_committed() {
            self.working_areas.clear();
            return Ok(Vec::new());
        }
        let listed = self.working_areas().await?;
        let mut dropped = Vec::new();
        for name in listed {
            if self.tracker.store().drop_working_area(&name).await? {
                dropped.push(name);
            }
        }
        self.mode.require(ENTITY)?.unset(fields::WORKING_AREAS).await?;
        self.working_areas.clear();
        Ok(dropped)
    }

    // ------------------------------------------------------------------
    // Transactions
    // ------------------------------------------------------------------

    /// Create and commit a transaction owned by this session, or by
    /// `parent` when one is given. `parent` must sit in this session's tree.
    pub async fn new_transaction(
        &self,
        kind: TransactionKind,
        parent: Option<&Transaction>,
    ) -> Result<Transaction> {
        let record = self.mode.require(ENTITY)?;
        let builder = TransactionBuilder::new(&self.tracker, kind);
        let builder = match parent {
            Some(parent) => builder.parent(parent),
            None => builder.session(self),
        };
        let mut transaction = builder.build()?;
        if let Some(parent) = parent {
            if parent.root_session_id().await?.as_ref() != Some(record.id()) {
                return Err(TrailError::ForeignParent {
                    parent: parent.id().map(|id| id.to_string()).unwrap_or_default(),
                    session: record.id().to_string(),
                });
            }
        }
        transaction.commit().await?;
        Ok(transaction)
    }

    /// Transactions owned directly by this session, in creation order.
    pub async fn transactions(&self) -> Result<Vec<Transaction>> {
        let Some(id) = self.id() else {
            return Ok(Vec::new());
        };
        let criteria = Criteria::eq(fields::SESSION, id.as_str());
        Transaction::load_all(&self.tracker, &criteria).await
    }

    /// Delete this session, every transaction under it and its staging areas.
    ///
    /// A no-op for uncommitted sessions and for sessions already gone from
    /// the store.
    pub async fn delete(&self) -> Result<CascadeReport> {
        let Some(record) = self.mode.record() else {
            return Ok(CascadeReport::default());
        };
        let id = record.id().clone();
        let span = info_span!("session.delete", session = %id);
        async {
            let stored = match record.fetch().await {
                Ok(document) => decode::<SessionRecord>(document)?,
                Err(err) if err.is_not_found() => return Ok(CascadeReport::default()),
                Err(err) => return Err(err),
            };

            let descendants = cascade::session_descendants(&self.tracker, &id).await?;
            let transactions_deleted =
                cascade::delete_transactions(&self.tracker, &descendants).await?;

            let mut working_areas_dropped = Vec::new();
            for name in stored.working_areas {
                if self.tracker.store().drop_working_area(&name).await? {
                    working_areas_dropped.push(name);
                }
            }

            let sessions_deleted = self
                .tracker
                .store()
                .delete(self.tracker.session_collection(), &Criteria::by_id(&id))
                .await?;

            event!(
                Level::INFO,
                transactions_deleted,
                working_areas = working_areas_dropped.len(),
                "session deleted"
            );
            Ok(CascadeReport {
                sessions_deleted,
                transactions_deleted,
                working_areas_dropped,
            })
        }
        .instrument(span)
        .await
    }
}
