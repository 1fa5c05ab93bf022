use crate::models::RecordKey;
use std::fmt;
use thiserror::Error;

/// Failure of a call against the remote data service.
///
/// Snapshots keep the last fetch error around, so this type is `Clone` and
/// carries rendered messages rather than source errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    #[error("network error: {0}")]
    Network(String),

    /// Authentication missing or rejected, or a row-level security denial
    #[error("permission denied: {0}")]
    Permission(String),

    #[error("invalid input: {0}")]
    Validation(String),

    #[error("{collection} record {key} not found")]
    NotFound { collection: String, key: RecordKey },

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("unexpected response: {0}")]
    Decode(String),

    #[error("service error: {0}")]
    Service(String),
}

impl SyncError {
    pub fn validation(message: impl Into<String>) -> Self {
        SyncError::Validation(message.into())
    }

    pub fn not_found(collection: &str, key: &RecordKey) -> Self {
        SyncError::NotFound {
            collection: collection.to_string(),
            key: key.clone(),
        }
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::Decode(err.to_string())
    }
}

/// A resource left behind by a non-atomic two-step workflow.
///
/// Orphans are warnings: the workflow reports them, nothing cleans them up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Orphan {
    /// A stored blob that no record references
    BlobWithoutRecord { bucket: String, key: String },
    /// A record whose attachment blob has already been removed
    RecordWithoutBlob {
        collection: String,
        key: RecordKey,
        storage_key: String,
    },
}

impl fmt::Display for Orphan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Orphan::BlobWithoutRecord { bucket, key } => {
                write!(f, "blob {bucket}/{key} is not referenced by any record")
            }
            Orphan::RecordWithoutBlob {
                collection,
                key,
                storage_key,
            } => write!(
                f,
                "{collection} record {key} references removed blob {storage_key}"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_names_collection_and_key() {
        let err = SyncError::not_found("faqs", &RecordKey::Int(4));
        assert_eq!(err.to_string(), "faqs record 4 not found");
    }

    #[test]
    fn orphan_messages() {
        let blob = Orphan::BlobWithoutRecord {
            bucket: "resumes".into(),
            key: "public/1-abc.pdf".into(),
        };
        assert_eq!(
            blob.to_string(),
            "blob resumes/public/1-abc.pdf is not referenced by any record"
        );
    }
}
