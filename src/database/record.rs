use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, SecondsFormat, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::config::SchemaConfig;

/// Errors that can occur converting values into records
#[derive(Debug, thiserror::Error)]
pub enum RecordError {
    #[error("Invalid JSON format: {0}")]
    InvalidJson(String),
    #[error(transparent)]
    Serde(#[from] serde_json::Error),
}

/// A dynamic record: one stored row or document as a JSON object.
///
/// Backends hand records back and forth in physical field names; the
/// repository sees logical names once the backend's field mapping has been
/// applied.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record {
    fields: Map<String, Value>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_map(fields: Map<String, Value>) -> Self {
        Self { fields }
    }

    pub fn from_json(json: Value) -> Result<Self, RecordError> {
        match json {
            Value::Object(fields) => Ok(Self { fields }),
            Value::Null => Ok(Self::new()),
            _ => Err(RecordError::InvalidJson("Expected JSON object".to_string())),
        }
    }

    /// Serialize any entity into a record
    pub fn from_serializable<T: Serialize + ?Sized>(value: &T) -> Result<Self, RecordError> {
        Self::from_json(serde_json::to_value(value)?)
    }

    /// Deserialize the record into an entity type
    pub fn into_typed<T: DeserializeOwned>(self) -> Result<T, serde_json::Error> {
        serde_json::from_value(Value::Object(self.fields))
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.fields.contains_key(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.fields.remove(key)
    }

    /// Set field only if it's currently absent or null
    pub fn set_if_empty(&mut self, key: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        let key = key.into();
        match self.fields.get(&key) {
            None | Some(Value::Null) => {
                self.fields.insert(key, value.into());
            }
            Some(_) => {}
        }
        self
    }

    /// Overwrite fields with the values of a patch
    pub fn apply_patch(&mut self, patch: &Map<String, Value>) -> &mut Self {
        for (key, value) in patch {
            self.fields.insert(key.clone(), value.clone());
        }
        self
    }

    /// Keep only the listed fields
    pub fn project(mut self, fields: &[String]) -> Self {
        self.fields.retain(|k, _| fields.iter().any(|f| f == k));
        self
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    pub fn into_map(self) -> Map<String, Value> {
        self.fields
    }

    pub fn to_json(&self) -> Value {
        Value::Object(self.fields.clone())
    }

    // ========================================
    // System field accessors
    // ========================================

    pub fn id(&self, schema: &SchemaConfig) -> Option<&Value> {
        self.get(&schema.id_column).filter(|v| !v.is_null())
    }

    pub fn created_at(&self, schema: &SchemaConfig) -> Option<DateTime<Utc>> {
        self.timestamp(&schema.created_column)
    }

    pub fn updated_at(&self, schema: &SchemaConfig) -> Option<DateTime<Utc>> {
        self.timestamp(&schema.updated_column)
    }

    pub fn deleted_at(&self, schema: &SchemaConfig) -> Option<DateTime<Utc>> {
        self.timestamp(&schema.deleted_column)
    }

    /// Soft-deleted means the deletion timestamp is present and not null
    pub fn is_deleted(&self, schema: &SchemaConfig) -> bool {
        self.get(&schema.deleted_column).map_or(false, |v| !v.is_null())
    }

    pub fn timestamp(&self, key: &str) -> Option<DateTime<Utc>> {
        self.get_str(key)
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc))
    }
}

/// Timestamps are stored as RFC 3339 UTC strings with microsecond precision,
/// so that string order equals chronological order.
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

static LAST_STAMP_MICROS: AtomicI64 = AtomicI64::new(i64::MIN);

/// Current time, strictly later than any stamp this process handed out before.
pub fn now_timestamp() -> String {
    let now = Utc::now().timestamp_micros();
    let next = |last: i64| now.max(last.saturating_add(1));
    let last = LAST_STAMP_MICROS
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| Some(next(last)))
        .unwrap_or_else(|last| last);
    let stamp = DateTime::from_timestamp_micros(next(last)).unwrap_or_else(Utc::now);
    format_timestamp(stamp)
}

impl From<Map<String, Value>> for Record {
    fn from(fields: Map<String, Value>) -> Self {
        Self::from_map(fields)
    }
}

impl From<Record> for Value {
    fn from(record: Record) -> Self {
        Value::Object(record.fields)
    }
}

impl std::fmt::Display for Record {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Record(fields: {})", self.fields.len())
    }
}
