// ============================================================================
// Document Store Interface
// ============================================================================
//
// The tracking engine never saves whole documents after commit. Everything
// it needs from storage is expressed as single-record, single-field atomic
// operations keyed by a store-assigned identifier.
//
// ============================================================================

pub mod criteria;
pub mod journal;
pub mod memory;

pub use criteria::{Clause, Criteria};
pub use journal::{JournalEntry, JournaledStore};
pub use memory::{InMemoryStore, StoreSnapshot};

use crate::core::{Document, RecordId, Result, Timestamp};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Name of the identifier field every stored document carries.
pub const ID_FIELD: &str = "_id";

/// Named field replacements; `None` removes the field.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FieldPatch(BTreeMap<String, Option<Value>>);

impl FieldPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, field: impl Into<String>, value: Value) -> Self {
        self.0.insert(field.into(), Some(value));
        self
    }

    pub fn remove(mut self, field: impl Into<String>) -> Self {
        self.0.insert(field.into(), None);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Option<Value>)> {
        self.0.iter()
    }

    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }
}

/// Storage backend consumed by the tracking engine.
///
/// Implementations must make each field operation atomic with respect to
/// other operations on the same record. No multi-record atomicity is assumed.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Insert a new record and return its permanent identifier.
    async fn insert(&self, collection: &str, record: Document) -> Result<RecordId>;

    /// Replace or remove named fields of one record.
    async fn replace_fields(&self, collection: &str, id: &RecordId, patch: FieldPatch)
    -> Result<()>;

    /// Append one value to an array field, creating the array if absent.
    async fn append_to_array(
        &self,
        collection: &str,
        id: &RecordId,
        field: &str,
        value: Value,
    ) -> Result<()>;

    /// Add `delta` to a numeric field (absent counts as zero); returns the new value.
    async fn increment_field(
        &self,
        collection: &str,
        id: &RecordId,
        field: &str,
        delta: i64,
    ) -> Result<i64>;

    async fn find_one(&self, collection: &str, id: &RecordId) -> Result<Option<Document>>;

    /// All records matching `criteria`, in insertion order.
    async fn find_all(&self, collection: &str, criteria: &Criteria) -> Result<Vec<Document>>;

    /// Delete every record matching `criteria`; returns how many were removed.
    async fn delete(&self, collection: &str, criteria: &Criteria) -> Result<u64>;

    async fn current_timestamp(&self) -> Result<Timestamp>;

    async fn create_working_area(&self, name: &str) -> Result<()>;

    /// Drop a staging area; returns `false` if it did not exist.
    async fn drop_working_area(&self, name: &str) -> Result<bool>;

    async fn working_area_exists(&self, name: &str) -> Result<bool>;
}

/// Read the identifier of a stored document.
pub fn document_id(document: &Document) -> Option<RecordId> {
    document
        .get(ID_FIELD)
        .and_then(Value::as_str)
        .map(RecordId::from)
}
