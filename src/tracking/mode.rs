use crate::core::{Document, RecordId, Result, TrailError};
use crate::store::{DocumentStore, FieldPatch};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tracing::{Level, event};

/// Where the authoritative copy of a tracked object lives.
///
/// Chosen once, at commit. `Uncommitted` objects are plain structs; every
/// accessor of a `Committed` object goes through its `RecordRef`.
#[derive(Debug, Clone, Default)]
pub enum Mode {
    #[default]
    Uncommitted,
    Committed(RecordRef),
}

impl Mode {
    pub fn record(&self) -> Option<&RecordRef> {
        match self {
            Mode::Uncommitted => None,
            Mode::Committed(record) => Some(record),
        }
    }

    pub fn id(&self) -> Option<&RecordId> {
        self.record().map(RecordRef::id)
    }

    pub fn is_committed(&self) -> bool {
        matches!(self, Mode::Committed(_))
    }

    /// The record handle, or `NotCommitted` naming `entity`.
    pub fn require(&self, entity: &'static str) -> Result<&RecordRef> {
        self.record().ok_or(TrailError::NotCommitted(entity))
    }
}

/// Handle on one stored record: field-level operations keyed by id.
#[derive(Clone)]
pub struct RecordRef {
    store: Arc<dyn DocumentStore>,
    collection: String,
    id: RecordId,
}

impl RecordRef {
    pub fn new(store: Arc<dyn DocumentStore>, collection: &str, id: RecordId) -> Self {
        Self {
            store,
            collection: collection.to_string(),
            id,
        }
    }

    pub fn id(&self) -> &RecordId {
        &self.id
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub async fn set(&self, field: &str, value: Value) -> Result<()> {
        event!(Level::DEBUG, record = %self.id, field, "replace field");
        self.patch(FieldPatch::new().set(field, value)).await
    }

    pub async fn unset(&self, field: &str) -> Result<()> {
        event!(Level::DEBUG, record = %self.id, field, "remove field");
        self.patch(FieldPatch::new().remove(field)).await
    }

    pub async fn patch(&self, patch: FieldPatch) -> Result<()> {
        self.store
            .replace_fields(&self.collection, &self.id, patch)
            .await
    }

    pub async fn append(&self, field: &str, value: Value) -> Result<()> {
        event!(Level::DEBUG, record = %self.id, field, "append to array");
        self.store
            .append_to_array(&self.collection, &self.id, field, value)
            .await
    }

    pub async fn increment(&self, field: &str, delta: i64) -> Result<i64> {
        event!(Level::DEBUG, record = %self.id, field, delta, "increment field");
        self.store
            .increment_field(&self.collection, &self.id, field, delta)
            .await
    }

    /// Current stored content; `NotFound` once the record is gone.
    pub async fn fetch(&self) -> Result<Document> {
        self.store
            .find_one(&self.collection, &self.id)
            .await?
            .ok_or_else(|| TrailError::not_found(self.collection.as_str(), self.id.as_str()))
    }
}

impl fmt::Debug for RecordRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordRef")
            .field("collection", &self.collection)
            .field("id", &self.id)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;
    use serde_json::json;

    #[test]
    fn test_require_on_uncommitted() {
        let mode = Mode::Uncommitted;
        assert!(!mode.is_committed());
        assert!(mode.id().is_none());
        assert!(matches!(
            mode.require("Session"),
            Err(TrailError::NotCommitted("Session"))
        ));
    }

    #[test]
    fn test_record_ref_field_ops() {
        tokio_test::block_on(async {
            let store: Arc<dyn DocumentStore> = Arc::new(InMemoryStore::new());
            let id = store.insert("t", Document::new()).await.unwrap();
            let record = RecordRef::new(store.clone(), "t", id);

            record.set("status", json!("ok")).await.unwrap();
            record.append("log", json!(1)).await.unwrap();
            assert_eq!(record.increment("processed", 2).await.unwrap(), 2);
            record.unset("status").await.unwrap();

            let doc = record.fetch().await.unwrap();
            assert!(!doc.contains_key("status"));
            assert_eq!(doc["log"], json!([1]));

            let mode = Mode::Committed(record);
            assert!(mode.is_committed());
            assert!(mode.require("Session").is_ok());
        });
    }

    #[test]
    fn test_fetch_missing_record() {
        tokio_test::block_on(async {
            let store: Arc<dyn DocumentStore> = Arc::new(InMemoryStore::new());
            let record = RecordRef::new(store, "t", RecordId::from("gone"));
            assert!(record.fetch().await.unwrap_err().is_not_found());
        });
    }
}
