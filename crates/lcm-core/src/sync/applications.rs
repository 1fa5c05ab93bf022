use super::CollectionSync;
use crate::error::{Orphan, SyncError};
use crate::models::{Application, ApplicationPatch, ApplicationStatus, NewApplication, RecordKey};
use crate::workflow::{
    blob_key_from_url, Attachment, RemoveStep, SubmitReceipt, SubmitStep, UploadSettings,
    UploadThenRecord, WorkflowFailure,
};
use tracing::{info, warn};

/// Outcome of a completed application removal
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoveReport {
    pub blob_removed: bool,
    /// Set when the attachment could not be removed
    pub orphan: Option<Orphan>,
}

impl CollectionSync<Application> {
    /// Store the CV, then record the application as pending
    pub async fn submit_application(
        &self,
        fields: NewApplication,
        attachment: Attachment,
        settings: &UploadSettings,
    ) -> Result<SubmitReceipt, WorkflowFailure<SubmitStep>> {
        UploadThenRecord::new(self.service().as_ref(), settings)
            .run(fields, attachment)
            .await
    }

    pub async fn update_status(
        &self,
        key: &RecordKey,
        status: ApplicationStatus,
    ) -> Result<(), SyncError> {
        self.update(key, &ApplicationPatch::status(status)).await
    }

    /// Remove the CV blob, best effort, then the record.
    pub async fn delete_application(
        &self,
        key: &RecordKey,
        cv_url: &str,
        settings: &UploadSettings,
    ) -> Result<RemoveReport, WorkflowFailure<RemoveStep>> {
        let service = self.service();
        let bucket = settings.bucket.as_str();
        let public_prefix = service.public_url(bucket, "");
        let mut completed = Vec::new();

        let storage_key = blob_key_from_url(cv_url, &public_prefix, bucket);
        if storage_key.is_none() {
            warn!(%key, cv_url, "no storage key in attachment url, skipping blob removal");
        }
        completed.push(RemoveStep::DeriveKey);

        let mut blob_removed = false;
        if let Some(storage_key) = &storage_key {
            match service.delete_blob(bucket, storage_key).await {
                Ok(()) => {
                    blob_removed = true;
                    completed.push(RemoveStep::DeleteBlob);
                }
                Err(err) => warn!(bucket, key = %storage_key, "attachment removal failed: {err}"),
            }
        }

        if let Err(error) = self.delete(key).await {
            let orphan = match (&storage_key, blob_removed) {
                (Some(storage_key), true) => Some(Orphan::RecordWithoutBlob {
                    collection: self.collection().to_string(),
                    key: key.clone(),
                    storage_key: storage_key.clone(),
                }),
                _ => None,
            };
            if let Some(orphan) = &orphan {
                warn!("{orphan}");
            }
            return Err(WorkflowFailure {
                failed_at: RemoveStep::DeleteRecord,
                completed,
                error,
                orphan,
            });
        }

        let orphan = match storage_key {
            Some(storage_key) if !blob_removed => {
                let orphan = Orphan::BlobWithoutRecord {
                    bucket: bucket.to_string(),
                    key: storage_key,
                };
                warn!("{orphan}");
                Some(orphan)
            }
            _ => None,
        };
        info!(%key, blob_removed, "application deleted");
        Ok(RemoveReport {
            blob_removed,
            orphan,
        })
    }
}
