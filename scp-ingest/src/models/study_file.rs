//! Uploaded study file record

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::file_type::{FileType, ParseStatus};

/// An uploaded study file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StudyFile {
    pub id: Uuid,
    pub study_id: Uuid,
    pub name: String,
    pub upload_file_name: String,
    pub file_type: FileType,
    pub parse_status: ParseStatus,
    pub bundle_id: Option<Uuid>,
    pub queued_for_deletion: bool,
    /// Object path inside the study bucket
    pub bucket_location: String,
    pub upload_file_size: i64,
    /// Metadata file follows the canonical metadata convention
    pub use_metadata_convention: bool,
    /// Matrix holds raw (non-normalized) counts
    pub raw_counts: bool,
    /// Cell names present in an expression matrix
    pub matrix_cells: Vec<String>,
    pub analysis_name: Option<String>,
    pub visualization_name: Option<String>,
    /// When this process set `parsing` (local, advisory)
    pub parse_claimed_at: Option<DateTime<Utc>>,
    /// Remote job that the batch service accepted for this file
    pub remote_job_name: Option<String>,
    pub remote_confirmed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// What is known about an in-flight parse
///
/// `parsing` is set eagerly before the batch service has seen the job, so a
/// file can be locally claimed without any remote job existing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseClaim {
    /// Not parsing
    Unclaimed,
    /// Marked `parsing` here; no confirmation from the batch service yet
    Local { claimed_at: DateTime<Utc> },
    /// Batch service accepted the job
    Confirmed {
        job_name: String,
        confirmed_at: DateTime<Utc>,
    },
}

impl StudyFile {
    pub fn new(study_id: Uuid, upload_file_name: impl Into<String>, file_type: FileType) -> Self {
        let upload_file_name = upload_file_name.into();
        Self {
            id: Uuid::new_v4(),
            study_id,
            name: upload_file_name.clone(),
            bucket_location: upload_file_name.clone(),
            upload_file_name,
            file_type,
            parse_status: ParseStatus::Uploaded,
            bundle_id: None,
            queued_for_deletion: false,
            upload_file_size: 0,
            use_metadata_convention: false,
            raw_counts: false,
            matrix_cells: Vec::new(),
            analysis_name: None,
            visualization_name: None,
            parse_claimed_at: None,
            remote_job_name: None,
            remote_confirmed_at: None,
            created_at: Utc::now(),
        }
    }

    pub fn is_parsing(&self) -> bool {
        self.parse_status == ParseStatus::Parsing
    }

    pub fn is_parsed(&self) -> bool {
        self.parse_status == ParseStatus::Parsed
    }

    /// Whole-file storage URL
    pub fn gs_url(&self, bucket_id: &str) -> String {
        format!("gs://{}/{}", bucket_id, self.bucket_location)
    }

    pub fn parse_claim(&self) -> ParseClaim {
        if !self.is_parsing() {
            return ParseClaim::Unclaimed;
        }
        match (&self.remote_job_name, self.remote_confirmed_at, self.parse_claimed_at) {
            (Some(job_name), Some(confirmed_at), _) => ParseClaim::Confirmed {
                job_name: job_name.clone(),
                confirmed_at,
            },
            (_, _, Some(claimed_at)) => ParseClaim::Local { claimed_at },
            // parsing set outside this process; treat as claimed at creation
            _ => ParseClaim::Local {
                claimed_at: self.created_at,
            },
        }
    }
}
