use crate::core::{Result, TrailError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// How eagerly journal writes reach the disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DurabilityMode {
    /// Flush and fsync after every entry.
    Sync,
    /// Flush to the OS after every entry, no fsync.
    #[default]
    Async,
    /// Keep everything in memory; no files are written.
    None,
}

/// Settings of the write-ahead journal behind `JournaledStore`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JournalConfig {
    /// Directory holding the journal and snapshot files.
    pub data_dir: PathBuf,

    pub durability: DurabilityMode,

    /// Write a snapshot and truncate the journal after this many entries.
    pub checkpoint_every: usize,
}

impl JournalConfig {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Self::default()
        }
    }

    pub fn durability(mut self, durability: DurabilityMode) -> Self {
        self.durability = durability;
        self
    }

    pub fn checkpoint_every(mut self, entries: usize) -> Self {
        self.checkpoint_every = entries;
        self
    }

    pub fn journal_path(&self) -> PathBuf {
        self.data_dir.join("batchtrail.wal")
    }

    pub fn snapshot_path(&self) -> PathBuf {
        self.data_dir.join("batchtrail.snapshot")
    }
}

impl Default for JournalConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("batchtrail-data"),
            durability: DurabilityMode::default(),
            checkpoint_every: 1000,
        }
    }
}

/// Tracking engine configuration
///
/// Built with chained setters or deserialized from JSON; every field has a
/// default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrailConfig {
    /// Collection holding session records
    pub session_collection: String,

    /// Collection holding transaction records
    pub transaction_collection: String,

    /// Prefix of staging area names opened for a session
    pub working_area_prefix: String,

    /// Wall-clock limit for one batch run; `None` runs unbounded
    #[serde(with = "optional_secs")]
    pub batch_time_limit: Option<Duration>,

    /// Durable journal; `None` keeps the store purely in memory
    pub journal: Option<JournalConfig>,
}

impl TrailConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn session_collection(mut self, name: &str) -> Self {
        self.session_collection = name.to_string();
        self
    }

    pub fn transaction_collection(mut self, name: &str) -> Self {
        self.transaction_collection = name.to_string();
        self
    }

    pub fn working_area_prefix(mut self, prefix: &str) -> Self {
        self.working_area_prefix = prefix.to_string();
        self
    }

    pub fn batch_time_limit(mut self, limit: Duration) -> Self {
        self.batch_time_limit = Some(limit);
        self
    }

    pub fn journal(mut self, journal: JournalConfig) -> Self {
        self.journal = Some(journal);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.session_collection.trim().is_empty() {
            return Err(TrailError::Config("session collection name is empty".into()));
        }
        if self.transaction_collection.trim().is_empty() {
            return Err(TrailError::Config(
                "transaction collection name is empty".into(),
            ));
        }
        if self.session_collection == self.transaction_collection {
            return Err(TrailError::Config(format!(
                "sessions and transactions share the collection '{}'",
                self.session_collection
            )));
        }
        if let Some(journal) = &self.journal {
            if journal.checkpoint_every == 0 {
                return Err(TrailError::Config("checkpoint_every must be positive".into()));
            }
        }
        Ok(())
    }

    /// Parse and validate a JSON configuration document.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: TrailConfig = serde_json::from_str(json)
            .map_err(|e| TrailError::Config(format!("invalid configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&json)
    }
}

impl Default for TrailConfig {
    fn default() -> Self {
        Self {
            session_collection: "sessions".to_string(),
            transaction_collection: "transactions".to_string(),
            working_area_prefix: "trail_tmp_".to_string(),
            batch_time_limit: None,
            journal: None,
        }
    }
}

mod optional_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => s.serialize_some(&d.as_secs_f64()),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        let secs = Option::<f64>::deserialize(d)?;
        match secs {
            Some(secs) if secs.is_finite() && secs >= 0.0 => Ok(Some(Duration::from_secs_f64(secs))),
            Some(secs) => Err(serde::de::Error::custom(format!(
                "invalid time limit: {} seconds",
                secs
            ))),
            None => Ok(None),
        }
    }
}
