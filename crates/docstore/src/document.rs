//! Stored documents and timestamp encoding.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{Result, StoreError};
use crate::path::DocumentPath;

/// Document body: a JSON object.
pub type Fields = serde_json::Map<String, Value>;

/// A document together with its store-assigned metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub path: DocumentPath,
    pub fields: Fields,
    pub create_time: DateTime<Utc>,
    pub update_time: DateTime<Utc>,
}

impl Document {
    pub fn id(&self) -> &str {
        self.path.id()
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.fields.get(field).and_then(Value::as_str)
    }

    /// Deserialize the body into a typed model.
    pub fn to_model<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(Value::Object(self.fields.clone())).map_err(|e| {
            StoreError::corrupt(self.path.as_str(), format!("unexpected shape: {}", e))
        })
    }
}

/// Encode a timestamp the way the store writes server timestamps.
///
/// Fixed precision and a `Z` suffix keep the encoding lexically ordered.
pub fn timestamp_value(ts: DateTime<Utc>) -> Value {
    Value::String(ts.to_rfc3339_opts(SecondsFormat::Millis, true))
}

/// Decode a timestamp written by [`timestamp_value`] (or any RFC 3339 string).
pub fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    value
        .as_str()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|ts| ts.with_timezone(&Utc))
}

/// Serialize a model into a document body.
pub fn to_fields<T: serde::Serialize>(model: &T) -> Result<Fields> {
    match serde_json::to_value(model)? {
        Value::Object(fields) => Ok(fields),
        other => Err(StoreError::corrupt(
            "<model>",
            format!("expected a JSON object, got {}", other),
        )),
    }
}
