//! Log record shapes and the pure record → (collection, document) routing.

use crate::util::{iso8601, timestamp_aware};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::collections::BTreeMap;
use tracing::Level;

/// Default base collection for application logs
pub const DEFAULT_COLLECTION: &str = "logs";

/// Prefix of the collection that receives request records
pub const REQUEST_COLLECTION_PREFIX: &str = "request_";

/// One application log entry, or a pre-serialized request record when
/// `is_request` is set
#[derive(Debug, Clone)]
pub struct LogRecord {
    pub timestamp: DateTime<Utc>,
    pub level: Level,
    pub message: String,
    pub module: Option<String>,
    pub function: Option<String>,
    pub line: Option<u32>,
    pub extra: Map<String, Value>,
    pub is_request: bool,
}

impl LogRecord {
    pub fn new(level: Level, message: impl Into<String>) -> Self {
        Self {
            timestamp: timestamp_aware(),
            level,
            message: message.into(),
            module: None,
            function: None,
            line: None,
            extra: Map::new(),
            is_request: false,
        }
    }

    /// Wrap a captured request so it is routed to the request collection
    pub fn request(record: &RequestLogRecord) -> Result<Self, serde_json::Error> {
        let mut log = Self::new(Level::INFO, serde_json::to_string(record)?);
        log.is_request = true;
        Ok(log)
    }

    pub fn with_location(
        mut self,
        module: impl Into<String>,
        function: impl Into<String>,
        line: u32,
    ) -> Self {
        self.module = Some(module.into());
        self.function = Some(function.into());
        self.line = Some(line);
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }
}

/// Captured HTTP exchange, stored as-is in the request collection
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RequestLogRecord {
    pub url: String,
    pub method: String,
    pub path_params: BTreeMap<String, String>,
    pub request_body: Option<Value>,
    pub query_params: BTreeMap<String, String>,
    pub request_headers: BTreeMap<String, String>,
    pub client_host: Option<String>,
    pub status_code: u16,
    pub response_headers: BTreeMap<String, String>,
    pub response_body: String,
}

/// Collection a record is written to, for a given base collection
pub fn collection_for(record: &LogRecord, base_collection: &str) -> String {
    if record.is_request {
        format!("{}{}", REQUEST_COLLECTION_PREFIX, base_collection)
    } else {
        base_collection.to_string()
    }
}

/// Map a record to the collection and document it is persisted as.
///
/// Request records carry their document in `message` and are inserted
/// verbatim; everything else gets the application log shape.
pub fn route_record(
    record: &LogRecord,
    base_collection: &str,
) -> Result<(String, Value), serde_json::Error> {
    let collection = collection_for(record, base_collection);

    let document = if record.is_request {
        serde_json::from_str(&record.message)?
    } else {
        json!({
            "timestamp": iso8601(&record.timestamp),
            "level": record.level.to_string(),
            "message": record.message,
            "module": record.module,
            "function": record.function,
            "line": record.line,
            "extra": record.extra,
        })
    };

    Ok((collection, document))
}
