use super::{Criteria, DocumentStore, FieldPatch, ID_FIELD};
use crate::core::{Document, RecordId, Result, Timestamp, TrailError};
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use tokio::sync::RwLock;
use uuid::Uuid;

/// Records of one collection, kept in insertion order.
#[derive(Debug, Default)]
struct Collection {
    next_seq: u64,
    records: BTreeMap<u64, Document>,
    index: HashMap<RecordId, u64>,
}

impl Collection {
    fn insert(&mut self, id: RecordId, record: Document) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.records.insert(seq, record);
        self.index.insert(id, seq);
    }

    fn get(&self, id: &RecordId) -> Option<&Document> {
        self.index.get(id).and_then(|seq| self.records.get(seq))
    }

    fn get_mut(&mut self, id: &RecordId) -> Option<&mut Document> {
        let seq = self.index.get(id)?;
        self.records.get_mut(seq)
    }
}

/// Serializable image of a whole store, used for checkpoints.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreSnapshot {
    pub version: u32,
    pub collections: BTreeMap<String, Vec<Document>>,
    pub working_areas: Vec<String>,
}

impl StoreSnapshot {
    pub fn record_count(&self) -> usize {
        self.collections.values().map(Vec::len).sum()
    }
}

/// Process-local document store.
///
/// Each collection lives behind one `RwLock`, so every field operation is
/// atomic with respect to the others.
pub struct InMemoryStore {
    collections: RwLock<HashMap<String, Collection>>,
    working_areas: RwLock<BTreeSet<String>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            collections: RwLock::new(HashMap::new()),
            working_areas: RwLock::new(BTreeSet::new()),
        }
    }

    pub fn generate_id() -> RecordId {
        RecordId::new(Uuid::new_v4().to_string())
    }

    /// Insert under a caller-chosen identifier. Used when replaying a journal.
    pub async fn insert_with_id(
        &self,
        collection: &str,
        id: RecordId,
        mut record: Document,
    ) -> Result<()> {
        let mut collections = self.collections.write().await;
        let target = collections.entry(collection.to_string()).or_default();
        if target.index.contains_key(&id) {
            return Err(TrailError::storage(format!(
                "Duplicate id '{}' in '{}'",
                id, collection
            )));
        }
        record.insert(ID_FIELD.to_string(), Value::String(id.as_str().to_string()));
        target.insert(id, record);
        Ok(())
    }

    /// Restore a record's earlier content in place, keeping its position.
    pub(crate) async fn put_back(&self, collection: &str, id: &RecordId, record: Document) {
        let mut collections = self.collections.write().await;
        if let Some(slot) = collections.get_mut(collection).and_then(|c| c.get_mut(id)) {
            *slot = record;
        }
    }

    pub async fn record_count(&self, collection: &str) -> usize {
        let collections = self.collections.read().await;
        collections
            .get(collection)
            .map(|c| c.records.len())
            .unwrap_or(0)
    }

    pub async fn working_areas(&self) -> Vec<String> {
        self.working_areas.read().await.iter().cloned().collect()
    }

    /// Copy out every collection and working area.
    pub async fn export(&self) -> StoreSnapshot {
        let collections = self.collections.read().await;
        let areas = self.working_areas.read().await;
        StoreSnapshot {
            version: 1,
            collections: collections
                .iter()
                .map(|(name, c)| (name.clone(), c.records.values().cloned().collect()))
                .collect(),
            working_areas: areas.iter().cloned().collect(),
        }
    }

    /// Replace the whole content with a snapshot.
    pub async fn restore(&self, snapshot: StoreSnapshot) -> Result<()> {
        let mut rebuilt = HashMap::new();
        for (name, records) in snapshot.collections {
            let mut collection = Collection::default();
            for record in records {
                let id = super::document_id(&record).ok_or_else(|| {
                    TrailError::corrupt("?", format!("snapshot record in '{}' has no id", name))
                })?;
                collection.insert(id, record);
            }
            rebuilt.insert(name, collection);
        }

        *self.collections.write().await = rebuilt;
        *self.working_areas.write().await = snapshot.working_areas.into_iter().collect();
        Ok(())
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn missing(collection: &str, id: &RecordId) -> TrailError {
    TrailError::not_found(collection, id.as_str())
}

#[async_trait]
impl DocumentStore for InMemoryStore {
    async fn insert(&self, collection: &str, record: Document) -> Result<RecordId> {
        let id = Self::generate_id();
        self.insert_with_id(collection, id.clone(), record).await?;
        Ok(id)
    }

    async fn replace_fields(
        &self,
        collection: &str,
        id: &RecordId,
        patch: FieldPatch,
    ) -> Result<()> {
        if patch.fields().any(|field| field == ID_FIELD) {
            return Err(TrailError::storage("The id field cannot be replaced"));
        }

        let mut collections = self.collections.write().await;
        let record = collections
            .get_mut(collection)
            .and_then(|c| c.get_mut(id))
            .ok_or_else(|| missing(collection, id))?;

        for (field, value) in patch.iter() {
            match value {
                Some(value) => {
                    record.insert(field.clone(), value.clone());
                }
                None => {
                    record.remove(field);
                }
            }
        }
        Ok(())
    }

    async fn append_to_array(
        &self,
        collection: &str,
        id: &RecordId,
        field: &str,
        value: Value,
    ) -> Result<()> {
        let mut collections = self.collections.write().await;
        let record = collections
            .get_mut(collection)
            .and_then(|c| c.get_mut(id))
            .ok_or_else(|| missing(collection, id))?;

        match record
            .entry(field.to_string())
            .or_insert_with(|| Value::Array(Vec::new()))
        {
            Value::Array(items) => {
                items.push(value);
                Ok(())
            }
            other => Err(TrailError::storage(format!(
                "Field '{}' of '{}' is not an array (found {})",
                field, id, other
            ))),
        }
    }

    async fn increment_field(
        &self,
        collection: &str,
        id: &RecordId,
        field: &str,
        delta: i64,
    ) -> Result<i64> {
        let mut collections = self.collections.write().await;
        let record = collections
            .get_mut(collection)
            .and_then(|c| c.get_mut(id))
            .ok_or_else(|| missing(collection, id))?;

        let current = match record.get(field) {
            None | Some(Value::Null) => 0,
            Some(value) => value.as_i64().ok_or_else(|| {
                TrailError::storage(format!(
                    "Field '{}' of '{}' is not an integer (found {})",
                    field, id, value
                ))
            })?,
        };
        let next = current
            .checked_add(delta)
            .ok_or_else(|| TrailError::storage(format!("Field '{}' overflowed", field)))?;
        record.insert(field.to_string(), Value::from(next));
        Ok(next)
    }

    async fn find_one(&self, collection: &str, id: &RecordId) -> Result<Option<Document>> {
        let collections = self.collections.read().await;
        Ok(collections
            .get(collection)
            .and_then(|c| c.get(id))
            .cloned())
    }

    async fn find_all(&self, collection: &str, criteria: &Criteria) -> Result<Vec<Document>> {
        let collections = self.collections.read().await;
        Ok(collections
            .get(collection)
            .map(|c| {
                c.records
                    .values()
                    .filter(|record| criteria.matches(record))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn delete(&self, collection: &str, criteria: &Criteria) -> Result<u64> {
        let mut collections = self.collections.write().await;
        let Some(target) = collections.get_mut(collection) else {
            return Ok(0);
        };

        let doomed: HashSet<u64> = target
            .records
            .iter()
            .filter(|(_, record)| criteria.matches(record))
            .map(|(seq, _)| *seq)
            .collect();

        for seq in &doomed {
            target.records.remove(seq);
        }
        target.index.retain(|_, seq| !doomed.contains(seq));
        Ok(doomed.len() as u64)
    }

    async fn current_timestamp(&self) -> Result<Timestamp> {
        Ok(Utc::now())
    }

    async fn create_working_area(&self, name: &str) -> Result<()> {
        let mut areas = self.working_areas.write().await;
        if !areas.insert(name.to_string()) {
            return Err(TrailError::storage(format!(
                "Working area '{}' already exists",
                name
            )));
        }
        Ok(())
    }

    async fn drop_working_area(&self, name: &str) -> Result<bool> {
        Ok(self.working_areas.write().await.remove(name))
    }

    async fn working_area_exists(&self, name: &str) -> Result<bool> {
        Ok(self.working_areas.read().await.contains(name))
    }
}
