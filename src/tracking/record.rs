//! Persisted shapes of session and transaction records.

use super::log::LogEntry;
use crate::core::{
    Counters, Document, PrincipalRef, RecordId, Result, SessionKind, Status, Timestamp,
    TrailError, TransactionKind,
};
use crate::store::document_id;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    #[serde(rename = "_id", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<RecordId>,
    #[serde(rename = "type")]
    pub kind: SessionKind,
    pub principal: PrincipalRef,
    pub start: Timestamp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<Timestamp>,
    pub status: Status,
    #[serde(default)]
    pub working_areas: Vec<String>,
    #[serde(flatten)]
    pub counters: Counters,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionRecord {
    #[serde(rename = "_id", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<RecordId>,
    #[serde(rename = "type")]
    pub kind: TransactionKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session: Option<RecordId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<RecordId>,
    pub start: Timestamp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<Timestamp>,
    pub status: Status,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collection_alias: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record_ref: Option<String>,
    #[serde(default)]
    pub log: Vec<LogEntry>,
    #[serde(flatten)]
    pub counters: Counters,
}

pub fn encode<T: Serialize>(record: &T) -> Result<Document> {
    match serde_json::to_value(record)? {
        Value::Object(document) => Ok(document),
        other => Err(TrailError::Serialization(format!(
            "record encoded as {} instead of an object",
            other
        ))),
    }
}

/// Decode a stored document, reporting shape problems against its id.
pub fn decode<T: DeserializeOwned>(document: Document) -> Result<T> {
    let id = document_id(&document)
        .map(|id| id.as_str().to_string())
        .unwrap_or_else(|| "?".to_string());
    serde_json::from_value(Value::Object(document))
        .map_err(|err| TrailError::corrupt(id, err.to_string()))
}

pub fn to_value<T: Serialize>(value: &T) -> Result<Value> {
    Ok(serde_json::to_value(value)?)
}
