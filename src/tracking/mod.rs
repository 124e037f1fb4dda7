// ============================================================================
// Session / Transaction Tracking
// ============================================================================
//
// A Session is one batch run. Transactions are the steps inside it, owned
// either by the Session or by another Transaction. Both start life in
// memory; `commit()` inserts the record once and from then on every change
// is a single-field store operation keyed by the record id.
//
// ============================================================================

pub mod cascade;
pub mod fields;
pub mod guard;
pub mod lifecycle;
pub mod log;
pub mod mode;
pub mod record;
pub mod session;
pub mod transaction;

pub use self::cascade::CascadeReport;
pub use self::guard::{SessionGuard, mark_abandoned};
pub use self::lifecycle::Lifecycle;
pub use self::log::LogEntry;
pub use self::session::Session;
pub use self::transaction::{Owner, Transaction, TransactionBuilder};

use crate::config::TrailConfig;
use crate::core::{RecordId, Result, TimeSpec, Timestamp};
use crate::store::{DocumentStore, InMemoryStore, JournaledStore};
use std::fmt;
use std::sync::Arc;

/// Shared context of every tracked object: the store and the configuration.
///
/// Cloning is cheap; all clones talk to the same store.
#[derive(Clone)]
pub struct Tracker {
    store: Arc<dyn DocumentStore>,
    config: Arc<TrailConfig>,
}

impl Tracker {
    pub fn new(store: Arc<dyn DocumentStore>, config: TrailConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            store,
            config: Arc::new(config),
        })
    }

    /// Tracker over a fresh `InMemoryStore` with default settings.
    pub fn in_memory() -> Self {
        Self {
            store: Arc::new(InMemoryStore::new()),
            config: Arc::new(TrailConfig::default()),
        }
    }

    /// Build the store the configuration asks for.
    ///
    /// With a journal section the store is a `JournaledStore` recovered from
    /// its data directory, otherwise a plain `InMemoryStore`.
    pub async fn open(config: TrailConfig) -> Result<Self> {
        config.validate()?;
        let store: Arc<dyn DocumentStore> = match &config.journal {
            Some(journal) => Arc::new(JournaledStore::open(journal).await?),
            None => Arc::new(InMemoryStore::new()),
        };
        Self::new(store, config)
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    pub fn config(&self) -> &TrailConfig {
        &self.config
    }

    pub fn session_collection(&self) -> &str {
        &self.config.session_collection
    }

    pub fn transaction_collection(&self) -> &str {
        &self.config.transaction_collection
    }

    /// Current time according to the store.
    pub async fn now(&self) -> Result<Timestamp> {
        self.store.current_timestamp().await
    }

    pub(crate) async fn resolve(&self, time: TimeSpec) -> Result<Timestamp> {
        match time {
            TimeSpec::Now => self.now().await,
            TimeSpec::At(at) => Ok(at),
        }
    }

    pub(crate) fn working_area_name(&self, session_id: &RecordId, label: &str) -> String {
        format!("{}{}_{}", self.config.working_area_prefix, session_id, label)
    }
}

impl fmt::Debug for Tracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tracker")
            .field("sessions", &self.config.session_collection)
            .field("transactions", &self.config.transaction_collection)
            .finish()
    }
}
