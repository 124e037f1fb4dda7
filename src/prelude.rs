//! Common imports for code that drives batch runs.
//!
//! ```
//! use batchtrail::prelude::*;
//! ```

pub use crate::batch::{BatchDriver, BatchReport};
pub use crate::config::{DurabilityMode, JournalConfig, TrailConfig};
pub use crate::core::{
    Counter, Counters, RecordId, Result, SessionKind, Status, TimeSpec, TrailError,
    TransactionKind,
};
pub use crate::store::DocumentStore;
pub use crate::tracking::{LogEntry, Owner, Session, SessionGuard, Tracker, Transaction};
