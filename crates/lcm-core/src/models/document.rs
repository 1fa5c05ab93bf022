use super::{require, require_changes, require_if_set, Entity, RecordKey, Validate};
use crate::error::SyncError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A downloadable resource listed on the documentation page
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub title: String,
    pub description: String,
    pub category: String,
    /// Shared drive link to the file
    pub drive_url: String,
    pub file_type: String,
    /// Human readable size, e.g. "2.4 MB"
    pub file_size: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewDocument {
    pub title: String,
    pub description: String,
    pub category: String,
    pub drive_url: String,
    pub file_type: String,
    pub file_size: String,
}

impl Validate for NewDocument {
    fn validate(&self) -> Result<(), SyncError> {
        require("title", &self.title)?;
        require("description", &self.description)?;
        require("category", &self.category)?;
        require("drive_url", &self.drive_url)?;
        require("file_type", &self.file_type)?;
        require("file_size", &self.file_size)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DocumentPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub drive_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_size: Option<String>,
}

impl Validate for DocumentPatch {
    fn validate(&self) -> Result<(), SyncError> {
        require_changes(self)?;
        require_if_set("title", self.title.as_ref())?;
        require_if_set("category", self.category.as_ref())?;
        require_if_set("drive_url", self.drive_url.as_ref())
    }
}

impl Entity for Document {
    const COLLECTION: &'static str = "documents";
    type New = NewDocument;
    type Patch = DocumentPatch;

    fn key(&self) -> RecordKey {
        RecordKey::from(self.id)
    }
}
