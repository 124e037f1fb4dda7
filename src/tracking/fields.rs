//! Field names of persisted session and transaction records.

pub const TYPE: &str = "type";
pub const PRINCIPAL: &str = "principal";
pub const START: &str = "start";
pub const END: &str = "end";
pub const STATUS: &str = "status";
pub const WORKING_AREAS: &str = "working_areas";

// Transaction owner, exactly one is present.
pub const SESSION: &str = "session";
pub const PARENT: &str = "parent";

pub const COLLECTION_ALIAS: &str = "collection_alias";
pub const RECORD_REF: &str = "record_ref";
pub const LOG: &str = "log";
