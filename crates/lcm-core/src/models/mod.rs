pub mod application;
pub mod document;
pub mod faq;
pub mod project;

pub use application::{
    Application, ApplicationInsert, ApplicationPatch, ApplicationStatus, NewApplication,
};
pub use document::{Document, DocumentPatch, NewDocument};
pub use faq::{Faq, FaqPatch, NewFaq};
pub use project::{NewProject, Project, ProjectPatch};

use crate::error::SyncError;
use crate::service::OrderBy;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// Identity of a remote record, assigned by the service at creation
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RecordKey {
    Int(i64),
    Text(String),
}

impl RecordKey {
    /// Read the `id` column of a raw row
    pub fn from_row(row: &Value) -> Option<Self> {
        row.get("id").and_then(Self::from_value)
    }

    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => n.as_i64().map(RecordKey::Int),
            Value::String(s) => Some(RecordKey::Text(s.clone())),
            _ => None,
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            RecordKey::Int(n) => Value::from(*n),
            RecordKey::Text(s) => Value::String(s.clone()),
        }
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordKey::Int(n) => write!(f, "{n}"),
            RecordKey::Text(s) => f.write_str(s),
        }
    }
}

impl FromStr for RecordKey {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.parse::<i64>() {
            Ok(n) => RecordKey::Int(n),
            Err(_) => RecordKey::Text(s.to_string()),
        })
    }
}

impl From<i64> for RecordKey {
    fn from(n: i64) -> Self {
        RecordKey::Int(n)
    }
}

impl From<&str> for RecordKey {
    fn from(s: &str) -> Self {
        RecordKey::Text(s.to_string())
    }
}

impl From<uuid::Uuid> for RecordKey {
    fn from(id: uuid::Uuid) -> Self {
        RecordKey::Text(id.to_string())
    }
}

/// Checks a field set before it is sent to the service
pub trait Validate {
    fn validate(&self) -> Result<(), SyncError>;
}

/// A record type mirrored from one remote collection
pub trait Entity: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Name of the remote table
    const COLLECTION: &'static str;

    /// Field set accepted by `insert`
    type New: Serialize + Validate + Send + Sync;

    /// Partial field set accepted by `update`
    type Patch: Serialize + Validate + Send + Sync;

    fn key(&self) -> RecordKey;

    /// Order in which the collection is fetched
    fn sort_order() -> Vec<OrderBy> {
        vec![OrderBy::desc("created_at")]
    }
}

/// Read an array column that may be `null` as an empty list
pub(crate) fn null_as_empty<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}

pub(crate) fn require(field: &str, value: &str) -> Result<(), SyncError> {
    if value.trim().is_empty() {
        return Err(SyncError::validation(format!("{field} is required")));
    }
    Ok(())
}

pub(crate) fn require_if_set(field: &str, value: Option<&String>) -> Result<(), SyncError> {
    match value {
        Some(v) => require(field, v),
        None => Ok(()),
    }
}

/// Patches must change at least one field
pub(crate) fn require_changes<P: Serialize>(patch: &P) -> Result<(), SyncError> {
    let value = serde_json::to_value(patch)?;
    match value.as_object() {
        Some(fields) if !fields.is_empty() => Ok(()),
        _ => Err(SyncError::validation("update contains no fields")),
    }
}
