use crate::core::{Status, TagRef};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// One entry of a transaction log.
///
/// Only `status` is required. The entry's status feeds the owning
/// transaction's ratchet when appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub status: Status,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    /// A recorded `null` stays `Some(Value::Null)`; only an absent value is `None`.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "present_value"
    )]
    pub value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<TagRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_resource: Option<String>,
}

impl LogEntry {
    pub fn new(status: Status) -> Self {
        Self {
            status,
            alias: None,
            field: None,
            value: None,
            message: None,
            tag: None,
            error_type: None,
            error_code: None,
            error_resource: None,
        }
    }

    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Collection alias the entry refers to.
    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    pub fn field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }

    /// Offending or recorded value, any JSON.
    pub fn value(mut self, value: impl Into<Value>) -> Self {
        self.value = Some(value.into());
        self
    }

    pub fn tag(mut self, tag: TagRef) -> Self {
        self.tag = Some(tag);
        self
    }

    pub fn error_type(mut self, error_type: impl Into<String>) -> Self {
        self.error_type = Some(error_type.into());
        self
    }

    pub fn error_code(mut self, code: impl Into<String>) -> Self {
        self.error_code = Some(code.into());
        self
    }

    pub fn error_resource(mut self, resource: impl Into<String>) -> Self {
        self.error_resource = Some(resource.into());
        self
    }
}

fn present_value<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_minimal_entry_serializes_status_only() {
        let entry = LogEntry::new(Status::Message);
        assert_eq!(serde_json::to_value(&entry).unwrap(), json!({"status": "message"}));
    }

    #[test]
    fn test_full_entry_roundtrip() {
        let entry = LogEntry::new(Status::Error)
            .alias("samples")
            .field("depth")
            .value(json!(-3.5))
            .message("bad value")
            .tag(TagRef::new("tag:depth"))
            .error_type("range")
            .error_code("E042")
            .error_resource("row 17");

        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["tag"], json!("tag:depth"));
        assert_eq!(json["value"], json!(-3.5));
        let back: LogEntry = serde_json::from_value(json).unwrap();
        assert_eq!(back, entry);
    }

    #[test]
    fn test_null_value_survives_roundtrip() {
        let entry = LogEntry::new(Status::Warning).field("depth").value(Value::Null);
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json, json!({"status": "warning", "field": "depth", "value": null}));

        let back: LogEntry = serde_json::from_value(json).unwrap();
        assert_eq!(back.value, Some(Value::Null));
        assert_eq!(back, entry);

        let absent: LogEntry = serde_json::from_value(json!({"status": "ok"})).unwrap();
        assert_eq!(absent.value, None);
    }

    #[test]
    fn test_unknown_status_is_rejected() {
        let parsed = serde_json::from_value::<LogEntry>(json!({"status": "catastrophic"}));
        assert!(parsed.is_err());
    }
}
