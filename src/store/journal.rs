//! Write-ahead journal and snapshots for a durable document store

use super::memory::{InMemoryStore, StoreSnapshot};
use super::{Criteria, DocumentStore, FieldPatch};
use crate::config::{DurabilityMode, JournalConfig};
use crate::core::{Document, RecordId, Result, Timestamp, TrailError};
use async_trait::async_trait;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tokio::sync::Mutex;

// ============================================================================
// Journal Entry Types
// ============================================================================

/// One store mutation, as written to the journal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum JournalEntry {
    Insert {
        collection: String,
        id: RecordId,
        record: Document,
    },
    ReplaceFields {
        collection: String,
        id: RecordId,
        patch: FieldPatch,
    },
    Append {
        collection: String,
        id: RecordId,
        field: String,
        value: Value,
    },
    Increment {
        collection: String,
        id: RecordId,
        field: String,
        delta: i64,
    },
    Delete {
        collection: String,
        ids: Vec<RecordId>,
    },
    CreateWorkingArea(String),
    DropWorkingArea(String),
}

impl JournalEntry {
    async fn apply(self, store: &InMemoryStore) -> Result<()> {
        match self {
            JournalEntry::Insert { collection, id, record } => {
                store.insert_with_id(&collection, id, record).await
            }
            JournalEntry::ReplaceFields { collection, id, patch } => {
                store.replace_fields(&collection, &id, patch).await
            }
            JournalEntry::Append { collection, id, field, value } => {
                store.append_to_array(&collection, &id, &field, value).await
            }
            JournalEntry::Increment { collection, id, field, delta } => {
                store.increment_field(&collection, &id, &field, delta).await.map(|_| ())
            }
            JournalEntry::Delete { collection, ids } => {
                store.delete(&collection, &Criteria::by_ids(&ids)).await.map(|_| ())
            }
            JournalEntry::CreateWorkingArea(name) => store.create_working_area(&name).await,
            JournalEntry::DropWorkingArea(name) => store.drop_working_area(&name).await.map(|_| ()),
        }
    }
}

// ============================================================================
// Journal Files
// ============================================================================

struct JournalWriter {
    path: PathBuf,
    file: Option<BufWriter<File>>,
    durability: DurabilityMode,
    entries_since_checkpoint: usize,
}

impl JournalWriter {
    fn open(path: &Path, durability: DurabilityMode) -> Result<Self> {
        let file = if durability != DurabilityMode::None {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            Some(BufWriter::new(file))
        } else {
            None
        };

        Ok(Self {
            path: path.to_path_buf(),
            file,
            durability,
            entries_since_checkpoint: 0,
        })
    }

    fn append(&mut self, entry: &JournalEntry) -> Result<()> {
        let Some(file) = self.file.as_mut() else {
            return Ok(());
        };
        let serialized = rmp_serde::to_vec(entry)?;
        let len = u32::try_from(serialized.len())
            .map_err(|_| TrailError::storage("journal entry exceeds 4 GiB"))?;
        let mut frame = Vec::with_capacity(4 + serialized.len());
        frame.extend_from_slice(&len.to_le_bytes());
        frame.extend_from_slice(&serialized);

        let committed = file.get_ref().metadata()?.len();
        if let Err(err) = write_frame(file, &frame, self.durability) {
            self.discard_tail(committed);
            return Err(err.into());
        }
        self.entries_since_checkpoint += 1;
        Ok(())
    }

    /// Cut the file back to its last complete entry after a failed write,
    /// dropping whatever is still buffered.
    fn discard_tail(&mut self, committed: u64) {
        let Some(writer) = self.file.take() else {
            return;
        };
        let (file, _) = writer.into_parts();
        if let Err(err) = file.set_len(committed) {
            warn!("Could not trim failed write from {}: {}", self.path.display(), err);
        }
        self.file = Some(BufWriter::new(file));
    }

    fn truncate(&mut self) -> Result<()> {
        let Some(file) = self.file.as_mut() else {
            return Ok(());
        };
        file.flush()?;
        file.get_ref().set_len(0)?;
        if self.durability == DurabilityMode::Sync {
            file.get_ref().sync_all()?;
        }
        self.entries_since_checkpoint = 0;
        Ok(())
    }
}

fn write_frame(
    file: &mut BufWriter<File>,
    frame: &[u8],
    durability: DurabilityMode,
) -> std::io::Result<()> {
    file.write_all(frame)?;
    file.flush()?;
    if durability == DurabilityMode::Sync {
        file.get_ref().sync_all()?;
    }
    Ok(())
}

/// Read every complete entry. A torn tail left by a crash mid-write is dropped.
fn read_journal(path: &Path) -> Result<Vec<JournalEntry>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let mut reader = BufReader::new(File::open(path)?);
    let mut entries = Vec::new();
    loop {
        let mut len_bytes = [0u8; 4];
        match reader.read_exact(&mut len_bytes) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e.into()),
        }
        let len = u32::from_le_bytes(len_bytes) as usize;
        let mut data = vec![0u8; len];
        match reader.read_exact(&mut data) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
                warn!("Dropping torn journal tail in {}", path.display());
                break;
            }
            Err(e) => return Err(e.into()),
        }
        entries.push(rmp_serde::from_slice(&data)?);
    }
    Ok(entries)
}

fn write_snapshot(path: &Path, snapshot: &StoreSnapshot) -> Result<()> {
    let dir = path
        .parent()
        .ok_or_else(|| TrailError::Config(format!("snapshot path {} has no parent", path.display())))?;
    fs::create_dir_all(dir)?;
    let mut temp = NamedTempFile::new_in(dir)?;
    let serialized = rmp_serde::to_vec(snapshot)?;
    temp.write_all(&serialized)?;
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|e| TrailError::from(e.error))?;
    Ok(())
}

fn read_snapshot(path: &Path) -> Result<Option<StoreSnapshot>> {
    if !path.exists() {
        return Ok(None);
    }
    let mut data = Vec::new();
    File::open(path)?.read_to_end(&mut data)?;
    Ok(Some(rmp_serde::from_slice(&data)?))
}

// ============================================================================
// Journaled Store
// ============================================================================

/// Document store whose content survives process restarts.
///
/// Every mutation runs under the journal lock, so journal order always
/// matches apply order. A mutation is applied to the in-memory image and
/// then journaled; if the journal refuses the entry the image is put back
/// and the error returned. Deletes are journaled before they are applied.
/// Opening the store loads the latest snapshot and replays the journal on
/// top of it.
pub struct JournaledStore {
    inner: InMemoryStore,
    journal: Mutex<JournalWriter>,
    snapshot_path: PathBuf,
    checkpoint_every: usize,
}

impl JournaledStore {
    pub async fn open(config: &JournalConfig) -> Result<Self> {
        let journal_path = config.journal_path();
        let snapshot_path = config.snapshot_path();
        let inner = InMemoryStore::new();

        if config.durability != DurabilityMode::None {
            if let Some(snapshot) = read_snapshot(&snapshot_path)? {
                debug!("Loaded snapshot with {} records", snapshot.record_count());
                inner.restore(snapshot).await?;
            }
            let entries = read_journal(&journal_path)?;
            let replayed = entries.len();
            for entry in entries {
                if let Err(err) = entry.apply(&inner).await {
                    warn!("Skipping journal entry that no longer applies: {}", err);
                }
            }
            debug!("Replayed {} journal entries", replayed);
        }

        let journal = JournalWriter::open(&journal_path, config.durability)?;
        Ok(Self {
            inner,
            journal: Mutex::new(journal),
            snapshot_path,
            checkpoint_every: config.checkpoint_every.max(1),
        })
    }

    /// Write a snapshot of the current content and empty the journal.
    pub async fn checkpoint(&self) -> Result<()> {
        let mut journal = self.journal.lock().await;
        self.checkpoint_locked(&mut journal).await
    }

    async fn checkpoint_locked(&self, journal: &mut JournalWriter) -> Result<()> {
        if journal.durability == DurabilityMode::None {
            return Ok(());
        }
        let snapshot = self.inner.export().await;
        write_snapshot(&self.snapshot_path, &snapshot)?;
        journal.truncate()?;
        debug!("Checkpoint written with {} records", snapshot.record_count());
        Ok(())
    }

    pub async fn entries_since_checkpoint(&self) -> usize {
        self.journal.lock().await.entries_since_checkpoint
    }

    /// Checkpoint once the journal is long enough. The mutation that got
    /// here is already durable, so a failed checkpoint only logs and is
    /// tried again after the next entry.
    async fn maybe_checkpoint(&self, journal: &mut JournalWriter) {
        if journal.entries_since_checkpoint < self.checkpoint_every {
            return;
        }
        if let Err(err) = self.checkpoint_locked(journal).await {
            warn!(
                "Checkpoint failed, {} entries stay in the journal: {}",
                journal.entries_since_checkpoint, err
            );
        }
    }

    /// Journal a field mutation already applied to `id`, restoring `before`
    /// when the journal refuses it.
    async fn commit_field_change(
        &self,
        journal: &mut JournalWriter,
        entry: JournalEntry,
        collection: &str,
        id: &RecordId,
        before: Option<Document>,
    ) -> Result<()> {
        if let Err(err) = journal.append(&entry) {
            if let Some(before) = before {
                self.inner.put_back(collection, id, before).await;
            }
            return Err(err);
        }
        self.maybe_checkpoint(journal).await;
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for JournaledStore {
    async fn insert(&self, collection: &str, record: Document) -> Result<RecordId> {
        let mut journal = self.journal.lock().await;
        let id = InMemoryStore::generate_id();
        self.inner
            .insert_with_id(collection, id.clone(), record.clone())
            .await?;
        let entry = JournalEntry::Insert {
            collection: collection.to_string(),
            id: id.clone(),
            record,
        };
        if let Err(err) = journal.append(&entry) {
            if let Err(undo) = self.inner.delete(collection, &Criteria::by_id(&id)).await {
                warn!("Could not undo unjournaled insert of {}: {}", id, undo);
            }
            return Err(err);
        }
        self.maybe_checkpoint(&mut journal).await;
        Ok(id)
    }

    async fn replace_fields(
        &self,
        collection: &str,
        id: &RecordId,
        patch: FieldPatch,
    ) -> Result<()> {
        let mut journal = self.journal.lock().await;
        let before = self.inner.find_one(collection, id).await?;
        self.inner.replace_fields(collection, id, patch.clone()).await?;
        let entry = JournalEntry::ReplaceFields {
            collection: collection.to_string(),
            id: id.clone(),
            patch,
        };
        self.commit_field_change(&mut journal, entry, collection, id, before)
            .await
    }

    async fn append_to_array(
        &self,
        collection: &str,
        id: &RecordId,
        field: &str,
        value: Value,
    ) -> Result<()> {
        let mut journal = self.journal.lock().await;
        let before = self.inner.find_one(collection, id).await?;
        self.inner
            .append_to_array(collection, id, field, value.clone())
            .await?;
        let entry = JournalEntry::Append {
            collection: collection.to_string(),
            id: id.clone(),
            field: field.to_string(),
            value,
        };
        self.commit_field_change(&mut journal, entry, collection, id, before)
            .await
    }

    async fn increment_field(
        &self,
        collection: &str,
        id: &RecordId,
        field: &str,
        delta: i64,
    ) -> Result<i64> {
        let mut journal = self.journal.lock().await;
        let before = self.inner.find_one(collection, id).await?;
        let next = self.inner.increment_field(collection, id, field, delta).await?;
        let entry = JournalEntry::Increment {
            collection: collection.to_string(),
            id: id.clone(),
            field: field.to_string(),
            delta,
        };
        self.commit_field_change(&mut journal, entry, collection, id, before)
            .await?;
        Ok(next)
    }

    async fn find_one(&self, collection: &str, id: &RecordId) -> Result<Option<Document>> {
        self.inner.find_one(collection, id).await
    }

    async fn find_all(&self, collection: &str, criteria: &Criteria) -> Result<Vec<Document>> {
        self.inner.find_all(collection, criteria).await
    }

    async fn delete(&self, collection: &str, criteria: &Criteria) -> Result<u64> {
        let mut journal = self.journal.lock().await;
        // Journal the concrete ids so replay does not depend on field values.
        let ids: Vec<RecordId> = self
            .inner
            .find_all(collection, criteria)
            .await?
            .iter()
            .filter_map(super::document_id)
            .collect();
        if ids.is_empty() {
            return Ok(0);
        }
        journal.append(&JournalEntry::Delete {
            collection: collection.to_string(),
            ids: ids.clone(),
        })?;
        let removed = self.inner.delete(collection, &Criteria::by_ids(&ids)).await?;
        self.maybe_checkpoint(&mut journal).await;
        Ok(removed)
    }

    async fn current_timestamp(&self) -> Result<Timestamp> {
        self.inner.current_timestamp().await
    }

    async fn create_working_area(&self, name: &str) -> Result<()> {
        let mut journal = self.journal.lock().await;
        self.inner.create_working_area(name).await?;
        if let Err(err) = journal.append(&JournalEntry::CreateWorkingArea(name.to_string())) {
            if let Err(undo) = self.inner.drop_working_area(name).await {
                warn!("Could not undo unjournaled working area {}: {}", name, undo);
            }
            return Err(err);
        }
        self.maybe_checkpoint(&mut journal).await;
        Ok(())
    }

    async fn drop_working_area(&self, name: &str) -> Result<bool> {
        let mut journal = self.journal.lock().await;
        let existed = self.inner.drop_working_area(name).await?;
        if existed {
            if let Err(err) = journal.append(&JournalEntry::DropWorkingArea(name.to_string())) {
                if let Err(undo) = self.inner.create_working_area(name).await {
                    warn!("Could not restore working area {}: {}", name, undo);
                }
                return Err(err);
            }
            self.maybe_checkpoint(&mut journal).await;
        }
        Ok(existed)
    }

    async fn working_area_exists(&self, name: &str) -> Result<bool> {
        self.inner.working_area_exists(name).await
    }
}
