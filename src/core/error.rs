use thiserror::Error;

#[derive(Error, Debug)]
pub enum TrailError {
    #[error("Invalid {kind} value: '{value}'")]
    InvalidValue { kind: &'static str, value: String },

    #[error("Transaction has no owner: exactly one of session or parent is required")]
    MissingOwner,

    #[error("Transaction owner is ambiguous: both a session and a parent transaction were given")]
    AmbiguousOwner,

    #[error("Transaction '{parent}' does not belong to session '{session}'")]
    ForeignParent { parent: String, session: String },

    #[error("{0} is not committed")]
    NotCommitted(&'static str),

    #[error("{entity} '{id}' is already committed")]
    AlreadyCommitted { entity: &'static str, id: String },

    #[error("Record '{id}' not found in '{collection}'")]
    NotFound { collection: String, id: String },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Corrupt record '{id}': {reason}")]
    CorruptRecord { id: String, reason: String },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, TrailError>;

impl TrailError {
    pub fn invalid(kind: &'static str, value: impl Into<String>) -> Self {
        Self::InvalidValue {
            kind,
            value: value.into(),
        }
    }

    pub fn not_found(collection: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            collection: collection.into(),
            id: id.into(),
        }
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage(message.into())
    }

    pub fn corrupt(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::CorruptRecord {
            id: id.into(),
            reason: reason.into(),
        }
    }

    /// Invalid enum values and owner problems, raised before anything is written.
    pub fn is_construction(&self) -> bool {
        matches!(
            self,
            Self::InvalidValue { .. }
                | Self::MissingOwner
                | Self::AmbiguousOwner
                | Self::ForeignParent { .. }
        )
    }

    /// Operations attempted in the wrong lifecycle phase.
    pub fn is_precondition(&self) -> bool {
        matches!(self, Self::NotCommitted(_) | Self::AlreadyCommitted { .. })
    }

    /// Failures reported by the underlying store or its persistence files.
    pub fn is_storage(&self) -> bool {
        matches!(
            self,
            Self::NotFound { .. }
                | Self::Storage(_)
                | Self::CorruptRecord { .. }
                | Self::Serialization(_)
                | Self::Io(_)
        )
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

impl From<serde_json::Error> for TrailError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(format!("JSON: {}", err))
    }
}

impl From<rmp_serde::encode::Error> for TrailError {
    fn from(err: rmp_serde::encode::Error) -> Self {
        Self::Serialization(format!("MessagePack encode: {}", err))
    }
}

impl From<rmp_serde::decode::Error> for TrailError {
    fn from(err: rmp_serde::decode::Error) -> Self {
        Self::Serialization(format!("MessagePack decode: {}", err))
    }
}

impl From<std::io::Error> for TrailError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(format!("{} (kind: {:?})", err, err.kind()))
    }
}
