//! Multi-step remote workflows that cannot be made atomic.
//!
//! Each workflow records the steps it completed so a failure can say exactly
//! what was left behind. Nothing is rolled back.

use crate::error::{Orphan, SyncError};
use crate::models::{Application, ApplicationInsert, Entity, NewApplication, RecordKey, Validate};
use crate::service::RemoteService;
use chrono::Utc;
use rand::distributions::{Alphanumeric, DistString};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use tracing::{debug, info, warn};

pub const DEFAULT_MAX_ATTACHMENT_BYTES: u64 = 5 * 1024 * 1024;

fn default_max_bytes() -> u64 {
    DEFAULT_MAX_ATTACHMENT_BYTES
}

fn default_allowed_extensions() -> Vec<String> {
    vec!["pdf".to_string(), "doc".to_string(), "docx".to_string()]
}

/// Limits applied to uploaded attachments
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentSettings {
    #[serde(default = "default_max_bytes")]
    pub max_bytes: u64,
    /// Lowercase extensions without the dot
    #[serde(default = "default_allowed_extensions")]
    pub allowed_extensions: Vec<String>,
}

impl Default for AttachmentSettings {
    fn default() -> Self {
        Self {
            max_bytes: default_max_bytes(),
            allowed_extensions: default_allowed_extensions(),
        }
    }
}

/// Where and how application attachments are stored
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadSettings {
    pub bucket: String,
    pub key_prefix: String,
    pub attachments: AttachmentSettings,
}

impl Default for UploadSettings {
    fn default() -> Self {
        Self {
            bucket: "resumes".to_string(),
            key_prefix: "public".to_string(),
            attachments: AttachmentSettings::default(),
        }
    }
}

/// A file picked by the applicant
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub file_name: String,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

impl Attachment {
    /// Content type is guessed from the file name
    pub fn new(file_name: impl Into<String>, bytes: Vec<u8>) -> Self {
        let file_name = file_name.into();
        let content_type = mime_guess::from_path(&file_name)
            .first_raw()
            .map(str::to_string);
        Self {
            file_name,
            content_type,
            bytes,
        }
    }

    pub fn extension(&self) -> Option<String> {
        Path::new(&self.file_name)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase)
    }

    pub fn validate(&self, settings: &AttachmentSettings) -> Result<(), SyncError> {
        if self.bytes.is_empty() {
            return Err(SyncError::validation("attachment is empty"));
        }
        if self.bytes.len() as u64 > settings.max_bytes {
            return Err(SyncError::validation(format!(
                "attachment is {} bytes, the limit is {}",
                self.bytes.len(),
                settings.max_bytes
            )));
        }
        match self.extension() {
            Some(ext) if settings.allowed_extensions.iter().any(|a| a.eq_ignore_ascii_case(&ext)) => {
                Ok(())
            }
            _ => Err(SyncError::validation(format!(
                "{} must be one of: {}",
                self.file_name,
                settings.allowed_extensions.join(", ")
            ))),
        }
    }
}

/// Storage key of the form `{prefix}/{unix millis}-{7 random chars}.{ext}`
pub fn generate_storage_key(prefix: &str, extension: &str) -> String {
    let suffix = Alphanumeric
        .sample_string(&mut rand::thread_rng(), 7)
        .to_ascii_lowercase();
    let name = format!("{}-{}.{}", Utc::now().timestamp_millis(), suffix, extension);
    let prefix = prefix.trim_matches('/');
    if prefix.is_empty() {
        name
    } else {
        format!("{prefix}/{name}")
    }
}

/// Recover the storage key from a public attachment URL.
///
/// Strips the bucket's public URL prefix; URLs from elsewhere fall back to
/// the text after the first `{bucket}/`.
pub fn blob_key_from_url(url: &str, public_prefix: &str, bucket: &str) -> Option<String> {
    let key = match url.strip_prefix(public_prefix) {
        Some(key) => key,
        None => url.split_once(&format!("{bucket}/"))?.1,
    };
    let key = key.split(['?', '#']).next().unwrap_or_default();
    if key.is_empty() {
        None
    } else {
        Some(key.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitStep {
    Validate,
    GenerateKey,
    Upload,
    ResolveUrl,
    InsertRecord,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoveStep {
    DeriveKey,
    DeleteBlob,
    DeleteRecord,
}

impl fmt::Display for SubmitStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SubmitStep::Validate => "validate",
            SubmitStep::GenerateKey => "generate storage key",
            SubmitStep::Upload => "upload attachment",
            SubmitStep::ResolveUrl => "resolve public url",
            SubmitStep::InsertRecord => "insert record",
        })
    }
}

impl fmt::Display for RemoveStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RemoveStep::DeriveKey => "derive storage key",
            RemoveStep::DeleteBlob => "delete attachment",
            RemoveStep::DeleteRecord => "delete record",
        })
    }
}

/// A workflow that stopped part way
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowFailure<S> {
    pub failed_at: S,
    pub completed: Vec<S>,
    pub error: SyncError,
    /// What the completed steps left behind, if anything
    pub orphan: Option<Orphan>,
}

impl<S: fmt::Display> fmt::Display for WorkflowFailure<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failed: {}", self.failed_at, self.error)?;
        if let Some(orphan) = &self.orphan {
            write!(f, " ({orphan})")?;
        }
        Ok(())
    }
}

impl<S: fmt::Debug + fmt::Display> std::error::Error for WorkflowFailure<S> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitReceipt {
    pub key: RecordKey,
    pub cv_url: String,
    pub storage_key: String,
    pub completed: Vec<SubmitStep>,
}

/// Upload an attachment, then insert the record that references it.
///
/// An insert failure leaves the uploaded blob in place and reports it as an
/// orphan.
pub struct UploadThenRecord<'a> {
    service: &'a dyn RemoteService,
    settings: &'a UploadSettings,
    completed: Vec<SubmitStep>,
}

impl<'a> UploadThenRecord<'a> {
    pub fn new(service: &'a dyn RemoteService, settings: &'a UploadSettings) -> Self {
        Self {
            service,
            settings,
            completed: Vec::new(),
        }
    }

    fn fail(
        self,
        step: SubmitStep,
        error: SyncError,
        orphan: Option<Orphan>,
    ) -> WorkflowFailure<SubmitStep> {
        WorkflowFailure {
            failed_at: step,
            completed: self.completed,
            error,
            orphan,
        }
    }

    pub async fn run(
        mut self,
        fields: NewApplication,
        attachment: Attachment,
    ) -> Result<SubmitReceipt, WorkflowFailure<SubmitStep>> {
        let settings = self.settings;
        let service = self.service;
        if let Err(err) = fields
            .validate()
            .and_then(|_| attachment.validate(&settings.attachments))
        {
            return Err(self.fail(SubmitStep::Validate, err, None));
        }
        self.completed.push(SubmitStep::Validate);

        let extension = match attachment.extension() {
            Some(ext) => ext,
            None => {
                let err = SyncError::validation("attachment has no extension");
                return Err(self.fail(SubmitStep::GenerateKey, err, None));
            }
        };
        let storage_key = generate_storage_key(&settings.key_prefix, &extension);
        self.completed.push(SubmitStep::GenerateKey);

        let bucket = settings.bucket.as_str();
        debug!(bucket, key = %storage_key, "uploading attachment");
        if let Err(err) = service
            .upload_blob(
                bucket,
                &storage_key,
                attachment.bytes,
                attachment.content_type.as_deref(),
            )
            .await
        {
            return Err(self.fail(SubmitStep::Upload, err, None));
        }
        self.completed.push(SubmitStep::Upload);

        let cv_url = service.public_url(bucket, &storage_key);
        self.completed.push(SubmitStep::ResolveUrl);

        let insert = ApplicationInsert::pending(fields, cv_url.clone());
        let inserted = match serde_json::to_value(&insert) {
            Ok(payload) => service.insert(Application::COLLECTION, payload).await,
            Err(err) => Err(SyncError::from(err)),
        };
        let key = inserted.and_then(|row| {
            RecordKey::from_row(&row)
                .ok_or_else(|| SyncError::Decode("inserted row has no id".to_string()))
        });
        match key {
            Ok(key) => {
                self.completed.push(SubmitStep::InsertRecord);
                info!(%key, "application submitted");
                Ok(SubmitReceipt {
                    key,
                    cv_url,
                    storage_key,
                    completed: self.completed,
                })
            }
            Err(err) => {
                let orphan = Orphan::BlobWithoutRecord {
                    bucket: bucket.to_string(),
                    key: storage_key,
                };
                warn!("application insert failed, {orphan}: {err}");
                Err(self.fail(SubmitStep::InsertRecord, err, Some(orphan)))
            }
        }
    }
}
