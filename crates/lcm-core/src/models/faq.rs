use super::{require, require_changes, require_if_set, Entity, RecordKey, Validate};
use crate::error::SyncError;
use crate::service::OrderBy;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A frequently asked question shown on the FAQ page
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Faq {
    pub id: i64,
    pub created_at: DateTime<Utc>,
    pub question: String,
    pub answer: String,
    pub category: String,
    /// Display rank, ascending. Not unique.
    pub order: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewFaq {
    pub question: String,
    pub answer: String,
    pub category: String,
    pub order: i32,
}

impl Validate for NewFaq {
    fn validate(&self) -> Result<(), SyncError> {
        require("question", &self.question)?;
        require("answer", &self.answer)?;
        require("category", &self.category)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FaqPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub question: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub answer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order: Option<i32>,
}

impl FaqPatch {
    pub fn order(order: i32) -> Self {
        Self {
            order: Some(order),
            ..Default::default()
        }
    }
}

impl Validate for FaqPatch {
    fn validate(&self) -> Result<(), SyncError> {
        require_changes(self)?;
        require_if_set("question", self.question.as_ref())?;
        require_if_set("answer", self.answer.as_ref())?;
        require_if_set("category", self.category.as_ref())
    }
}

impl Entity for Faq {
    const COLLECTION: &'static str = "faqs";
    type New = NewFaq;
    type Patch = FaqPatch;

    fn key(&self) -> RecordKey {
        RecordKey::Int(self.id)
    }

    fn sort_order() -> Vec<OrderBy> {
        vec![OrderBy::asc("order"), OrderBy::desc("created_at")]
    }
}
