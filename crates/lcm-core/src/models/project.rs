use super::{
    null_as_empty, require, require_changes, require_if_set, Entity, RecordKey, Validate,
};
use crate::error::SyncError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A portfolio project shown on the use-cases page
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub id: i64,
    pub created_at: DateTime<Utc>,
    pub title: String,
    pub category: String,
    pub description: String,
    /// Cover image URL
    pub image: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewProject {
    pub title: String,
    pub category: String,
    pub description: String,
    pub image: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl NewProject {
    /// Add a tag unless it is blank or already present
    pub fn add_tag(&mut self, tag: &str) -> bool {
        let tag = tag.trim();
        if tag.is_empty() || self.tags.iter().any(|t| t == tag) {
            return false;
        }
        self.tags.push(tag.to_string());
        true
    }
}

impl Validate for NewProject {
    fn validate(&self) -> Result<(), SyncError> {
        require("title", &self.title)?;
        require("category", &self.category)?;
        require("description", &self.description)?;
        require("image", &self.image)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProjectPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
}

impl Validate for ProjectPatch {
    fn validate(&self) -> Result<(), SyncError> {
        require_changes(self)?;
        require_if_set("title", self.title.as_ref())?;
        require_if_set("category", self.category.as_ref())?;
        require_if_set("image", self.image.as_ref())
    }
}

impl Entity for Project {
    const COLLECTION: &'static str = "projects";
    type New = NewProject;
    type Patch = ProjectPatch;

    fn key(&self) -> RecordKey {
        RecordKey::Int(self.id)
    }
}
