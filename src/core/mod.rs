pub mod error;
pub mod types;

pub use error::{Result, TrailError};
pub use types::{
    Counter, Counters, Document, PrincipalRef, RecordId, SessionKind, Status, TagRef, TimeSpec,
    Timestamp, TransactionKind,
};
