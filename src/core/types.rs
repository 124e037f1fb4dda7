use super::{Result, TrailError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub type Timestamp = DateTime<Utc>;

/// A stored record: a flat JSON object keyed by field name.
pub type Document = serde_json::Map<String, serde_json::Value>;

/// Store-assigned permanent identifier of a record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(String);

impl RecordId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RecordId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Opaque reference to the user that started a session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PrincipalRef(String);

impl PrincipalRef {
    pub fn new(principal: impl Into<String>) -> Self {
        Self(principal.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for PrincipalRef {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Opaque reference to a field/schema descriptor in the external dictionary.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TagRef(String);

impl TagRef {
    pub fn new(tag: impl Into<String>) -> Self {
        Self(tag.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Either the store's current time or an explicit instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeSpec {
    Now,
    At(Timestamp),
}

impl From<Timestamp> for TimeSpec {
    fn from(value: Timestamp) -> Self {
        Self::At(value)
    }
}

// ============================================================================
// Status
// ============================================================================

/// Status of a session, transaction or log entry.
///
/// Variants are declared in severity order, so the derived `Ord` is the
/// severity ordering:
/// ```text
/// executing < ok < message < warning < error < fatal < exception < failed
/// ```
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    #[default]
    Executing,
    Ok,
    Message,
    Warning,
    Error,
    Fatal,
    Exception,
    Failed,
}

impl Status {
    pub const ALL: [Status; 8] = [
        Status::Executing,
        Status::Ok,
        Status::Message,
        Status::Warning,
        Status::Error,
        Status::Fatal,
        Status::Exception,
        Status::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Executing => "executing",
            Status::Ok => "ok",
            Status::Message => "message",
            Status::Warning => "warning",
            Status::Error => "error",
            Status::Fatal => "fatal",
            Status::Exception => "exception",
            Status::Failed => "failed",
        }
    }

    /// One of the three outcomes that end a run.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Status::Ok | Status::Failed | Status::Exception)
    }

    /// A terminal outcome other than `ok`.
    pub fn is_failure(&self) -> bool {
        self.is_terminal() && *self != Status::Ok
    }

    /// True when `self` would raise a container currently at `current`.
    pub fn outranks(&self, current: Status) -> bool {
        *self > current
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Status {
    type Err = TrailError;

    fn from_str(s: &str) -> Result<Self> {
        Status::ALL
            .iter()
            .copied()
            .find(|status| status.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| TrailError::invalid("status", s))
    }
}

// ============================================================================
// Kinds
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionKind {
    Upload,
    Update,
}

impl SessionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionKind::Upload => "upload",
            SessionKind::Update => "update",
        }
    }
}

impl fmt::Display for SessionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionKind {
    type Err = TrailError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "upload" => Ok(SessionKind::Upload),
            "update" => Ok(SessionKind::Update),
            _ => Err(TrailError::invalid("session type", s)),
        }
    }
}

/// Kind of step a transaction records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    Prepare,
    DataLoad,
    Validation,
    Insert,
    Update,
    Record,
    Cleanup,
}

impl TransactionKind {
    pub const ALL: [TransactionKind; 7] = [
        TransactionKind::Prepare,
        TransactionKind::DataLoad,
        TransactionKind::Validation,
        TransactionKind::Insert,
        TransactionKind::Update,
        TransactionKind::Record,
        TransactionKind::Cleanup,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionKind::Prepare => "prepare",
            TransactionKind::DataLoad => "data_load",
            TransactionKind::Validation => "validation",
            TransactionKind::Insert => "insert",
            TransactionKind::Update => "update",
            TransactionKind::Record => "record",
            TransactionKind::Cleanup => "cleanup",
        }
    }
}

impl fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionKind {
    type Err = TrailError;

    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        TransactionKind::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str() == normalized)
            .ok_or_else(|| TrailError::invalid("transaction type", s))
    }
}

// ============================================================================
// Counters
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Counter {
    Processed,
    Validated,
    Rejected,
    Skipped,
}

impl Counter {
    /// Name of the top-level numeric field holding this counter.
    pub fn field(&self) -> &'static str {
        match self {
            Counter::Processed => "processed",
            Counter::Validated => "validated",
            Counter::Rejected => "rejected",
            Counter::Skipped => "skipped",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counters {
    #[serde(default)]
    pub processed: u64,
    #[serde(default)]
    pub validated: u64,
    #[serde(default)]
    pub rejected: u64,
    #[serde(default)]
    pub skipped: u64,
}

impl Counters {
    pub fn get(&self, counter: Counter) -> u64 {
        match counter {
            Counter::Processed => self.processed,
            Counter::Validated => self.validated,
            Counter::Rejected => self.rejected,
            Counter::Skipped => self.skipped,
        }
    }

    pub fn set(&mut self, counter: Counter, value: u64) {
        match counter {
            Counter::Processed => self.processed = value,
            Counter::Validated => self.validated = value,
            Counter::Rejected => self.rejected = value,
            Counter::Skipped => self.skipped = value,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_ordering() {
        for pair in Status::ALL.windows(2) {
            assert!(pair[0] < pair[1], "{} should rank below {}", pair[0], pair[1]);
        }
        assert_eq!(Status::ALL.iter().max(), Some(&Status::Failed));
        assert!(Status::Error.outranks(Status::Warning));
        assert!(!Status::Warning.outranks(Status::Warning));
    }

    #[test]
    fn test_status_parse() {
        assert_eq!("warning".parse::<Status>().unwrap(), Status::Warning);
        assert_eq!(" Exception ".parse::<Status>().unwrap(), Status::Exception);
        let err = "catastrophic".parse::<Status>().unwrap_err();
        assert!(err.is_construction());
    }

    #[test]
    fn test_terminal_and_failure_sets() {
        let terminal: Vec<_> = Status::ALL.iter().filter(|s| s.is_terminal()).collect();
        assert_eq!(terminal, vec![&Status::Ok, &Status::Exception, &Status::Failed]);
        let failures: Vec<_> = Status::ALL.iter().filter(|s| s.is_failure()).collect();
        assert_eq!(failures, vec![&Status::Exception, &Status::Failed]);
        assert!(!Status::Error.is_failure());
        assert!(!Status::Fatal.is_failure());
    }

    #[test]
    fn test_kind_parse() {
        assert_eq!("upload".parse::<SessionKind>().unwrap(), SessionKind::Upload);
        assert!("download".parse::<SessionKind>().is_err());
        assert_eq!(
            "data-load".parse::<TransactionKind>().unwrap(),
            TransactionKind::DataLoad
        );
        assert_eq!(
            "data_load".parse::<TransactionKind>().unwrap(),
            TransactionKind::DataLoad
        );
        assert!("teardown".parse::<TransactionKind>().is_err());
    }

    #[test]
    fn test_status_serde_uses_lowercase_names() {
        let json = serde_json::to_value(Status::Exception).unwrap();
        assert_eq!(json, serde_json::json!("exception"));
        let back: Status = serde_json::from_value(serde_json::json!("ok")).unwrap();
        assert_eq!(back, Status::Ok);
    }

    #[test]
    fn test_counters_accessors() {
        let mut counters = Counters::default();
        counters.set(Counter::Rejected, 4);
        assert_eq!(counters.get(Counter::Rejected), 4);
        assert_eq!(counters.get(Counter::Processed), 0);
    }
}
