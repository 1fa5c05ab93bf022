use super::{
    null_as_empty, require, require_changes, require_if_set, Entity, RecordKey, Validate,
};
use crate::error::SyncError;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Review status of a job application.
///
/// Any status can be set from any other; the reviewer decides.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApplicationStatus {
    #[default]
    Pending,
    Reviewed,
    Accepted,
    Rejected,
}

impl ApplicationStatus {
    pub const ALL: [ApplicationStatus; 4] = [
        ApplicationStatus::Pending,
        ApplicationStatus::Reviewed,
        ApplicationStatus::Accepted,
        ApplicationStatus::Rejected,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ApplicationStatus::Pending => "pending",
            ApplicationStatus::Reviewed => "reviewed",
            ApplicationStatus::Accepted => "accepted",
            ApplicationStatus::Rejected => "rejected",
        }
    }
}

impl fmt::Display for ApplicationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ApplicationStatus {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| SyncError::validation(format!("unknown application status '{s}'")))
    }
}

/// A job application submitted through the career form
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Application {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    /// National identity number
    pub nik: String,
    pub full_name: String,
    pub email: String,
    pub phone: String,
    pub education: String,
    pub birth_date: NaiveDate,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub positions: Vec<String>,
    /// Public URL of the uploaded CV
    pub cv_url: String,
    #[serde(default)]
    pub status: ApplicationStatus,
}

/// Applicant-supplied fields of the career form
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewApplication {
    pub nik: String,
    pub full_name: String,
    pub email: String,
    pub phone: String,
    pub education: String,
    pub birth_date: NaiveDate,
    pub positions: Vec<String>,
}

impl Validate for NewApplication {
    fn validate(&self) -> Result<(), SyncError> {
        require("nik", &self.nik)?;
        require("full_name", &self.full_name)?;
        require("email", &self.email)?;
        require("phone", &self.phone)?;
        require("education", &self.education)?;
        if self.positions.iter().all(|p| p.trim().is_empty()) {
            return Err(SyncError::validation("select at least one position"));
        }
        Ok(())
    }
}

/// Row inserted for an application once its CV is stored
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApplicationInsert {
    #[serde(flatten)]
    pub fields: NewApplication,
    pub cv_url: String,
    pub status: ApplicationStatus,
}

impl ApplicationInsert {
    /// New applications always start out pending
    pub fn pending(fields: NewApplication, cv_url: String) -> Self {
        Self {
            fields,
            cv_url,
            status: ApplicationStatus::Pending,
        }
    }
}

impl Validate for ApplicationInsert {
    fn validate(&self) -> Result<(), SyncError> {
        self.fields.validate()?;
        require("cv_url", &self.cv_url)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ApplicationPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<ApplicationStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
}

impl ApplicationPatch {
    pub fn status(status: ApplicationStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }
}

impl Validate for ApplicationPatch {
    fn validate(&self) -> Result<(), SyncError> {
        require_changes(self)?;
        require_if_set("full_name", self.full_name.as_ref())?;
        require_if_set("email", self.email.as_ref())?;
        require_if_set("phone", self.phone.as_ref())
    }
}

impl Entity for Application {
    const COLLECTION: &'static str = "applications";
    type New = ApplicationInsert;
    type Patch = ApplicationPatch;

    fn key(&self) -> RecordKey {
        RecordKey::from(self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn form() -> NewApplication {
        NewApplication {
            nik: "3201010101900001".into(),
            full_name: "Dewi Lestari".into(),
            email: "dewi@example.com".into(),
            phone: "+62 812 0000 0000".into(),
            education: "S1 Informatika".into(),
            birth_date: NaiveDate::from_ymd_opt(1995, 4, 12).unwrap(),
            positions: vec!["software-development".into()],
        }
    }

    #[test]
    fn decodes_service_row() {
        let row = json!({
            "id": "0b6c3f7e-2f1d-4d55-9d0e-6c1c0b9a8e11",
            "created_at": "2025-02-01T08:30:00.123456+00:00",
            "nik": "3201",
            "full_name": "Dewi",
            "email": "dewi@example.com",
            "phone": "0812",
            "education": "S1",
            "birth_date": "1995-04-12",
            "positions": ["multimedia"],
            "cv_url": "https://x.supabase.co/storage/v1/object/public/resumes/public/1-a.pdf",
            "status": "reviewed"
        });
        let app: Application = serde_json::from_value(row).unwrap();
        assert_eq!(app.status, ApplicationStatus::Reviewed);
        assert_eq!(app.positions, vec!["multimedia".to_string()]);
        assert_eq!(
            app.key(),
            RecordKey::Text("0b6c3f7e-2f1d-4d55-9d0e-6c1c0b9a8e11".into())
        );
    }

    #[test]
    fn null_positions_read_as_empty() {
        let row = json!({
            "id": "5f0c2a4e-0000-4000-8000-000000000000",
            "created_at": "2025-02-01T08:30:00Z",
            "nik": "3201",
            "full_name": "Dewi",
            "email": "dewi@example.com",
            "phone": "0812",
            "education": "S1",
            "birth_date": "1995-04-12",
            "positions": null,
            "cv_url": "https://x.supabase.co/storage/v1/object/public/resumes/public/1-a.pdf",
            "status": "pending"
        });
        let app: Application = serde_json::from_value(row).unwrap();
        assert!(app.positions.is_empty());
    }

    #[test]
    fn insert_payload_is_flat_and_pending() {
        let insert = ApplicationInsert::pending(form(), "https://cdn/cv.pdf".into());
        let value = serde_json::to_value(&insert).unwrap();
        assert_eq!(value["status"], json!("pending"));
        assert_eq!(value["full_name"], json!("Dewi Lestari"));
        assert_eq!(value["birth_date"], json!("1995-04-12"));
        assert!(value.get("fields").is_none());
    }

    #[test]
    fn form_requires_a_position() {
        let mut fields = form();
        fields.positions.clear();
        assert!(matches!(fields.validate(), Err(SyncError::Validation(_))));

        let mut fields = form();
        fields.email = "  ".into();
        assert_eq!(
            fields.validate(),
            Err(SyncError::Validation("email is required".into()))
        );
    }

    #[test]
    fn status_parses_case_insensitively() {
        assert_eq!(
            "Accepted".parse::<ApplicationStatus>().unwrap(),
            ApplicationStatus::Accepted
        );
        assert!("archived".parse::<ApplicationStatus>().is_err());
    }

    #[test]
    fn empty_patch_is_rejected() {
        assert!(ApplicationPatch::default().validate().is_err());
        assert!(ApplicationPatch::status(ApplicationStatus::Rejected)
            .validate()
            .is_ok());
    }
}
