//! Remote and local job descriptions

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use super::study::Requester;
use crate::params::{IngestParameters, ParameterObject};

/// Entry point of the remote ingest pipeline
pub const PIPELINE_COMMAND: [&str; 2] = ["python", "ingest_pipeline.py"];

/// Remote pipeline action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobAction {
    IngestCluster,
    IngestExpression,
    IngestCellMetadata,
    IngestCoordinateLabels,
    IngestAnnData,
    IngestDifferentialExpression,
    DifferentialExpression,
}

impl JobAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobAction::IngestCluster => "ingest_cluster",
            JobAction::IngestExpression => "ingest_expression",
            JobAction::IngestCellMetadata => "ingest_cell_metadata",
            JobAction::IngestCoordinateLabels => "ingest_subsample",
            JobAction::IngestAnnData => "ingest_anndata",
            JobAction::IngestDifferentialExpression => "ingest_differential_expression",
            JobAction::DifferentialExpression => "differential_expression",
        }
    }

    /// Whether submitting this action puts the primary file in `parsing`
    ///
    /// DE computation reads a parsed matrix; it never claims it.
    pub fn claims_file(&self) -> bool {
        !matches!(self, JobAction::DifferentialExpression)
    }
}

impl fmt::Display for JobAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Remote job state as reported by the batch service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    Queued,
    Scheduled,
    Running,
    Succeeded,
    Failed,
    DeletionInProgress,
    Cancelled,
}

/// States in which a job still occupies its command line
pub const RUNNING_STATES: &[JobState] = &[JobState::Queued, JobState::Scheduled, JobState::Running];

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Queued => "QUEUED",
            JobState::Scheduled => "SCHEDULED",
            JobState::Running => "RUNNING",
            JobState::Succeeded => "SUCCEEDED",
            JobState::Failed => "FAILED",
            JobState::DeletionInProgress => "DELETION_IN_PROGRESS",
            JobState::Cancelled => "CANCELLED",
        }
    }

    pub fn is_running(&self) -> bool {
        RUNNING_STATES.contains(self)
    }
}

/// A job known to the batch service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteJob {
    pub name: String,
    pub state: JobState,
    pub command: Vec<String>,
}

/// A validated unit of remote work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestJob {
    pub study_id: Uuid,
    pub study_accession: String,
    /// File the job is keyed to (claimed as `parsing` when the action claims files)
    pub study_file_id: Uuid,
    pub requester: Requester,
    pub action: JobAction,
    pub params: IngestParameters,
    pub machine_type: String,
    pub reparse: bool,
    /// Keep partially ingested data when the remote job fails
    pub persist_on_fail: bool,
    /// Files marked `parsing` for this job; confirmed when it is accepted
    #[serde(default)]
    pub claimed_file_ids: Vec<Uuid>,
}

impl IngestJob {
    /// Canonical command line
    ///
    /// Independent of the requester so that identical work requested by two
    /// users compares equal when deduplicating.
    pub fn command(&self) -> Vec<String> {
        let mut command: Vec<String> = PIPELINE_COMMAND.iter().map(|s| s.to_string()).collect();
        command.push("--study-id".to_string());
        command.push(self.study_id.to_string());
        command.push("--study-file-id".to_string());
        command.push(self.study_file_id.to_string());
        command.push(self.action.as_str().to_string());
        command.extend(self.params.to_options_array());
        command
    }

    /// Labels attached to the remote job
    pub fn labels(&self) -> Vec<(String, String)> {
        vec![
            ("study_accession".to_string(), self.study_accession.to_lowercase()),
            ("action".to_string(), self.action.as_str().to_string()),
            ("user_id".to_string(), self.requester.metrics_uuid.to_string()),
            ("reparse".to_string(), self.reparse.to_string()),
            ("persist_on_fail".to_string(), self.persist_on_fail.to_string()),
        ]
    }
}

/// In-application background work
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "task", rename_all = "snake_case")]
pub enum LocalTask {
    /// Copy an uploaded file to the study bucket
    PushToRemote { study_id: Uuid, study_file_id: Uuid },
    /// Load a gene list's precomputed scores
    InitializePrecomputedScores { study_id: Uuid, study_file_id: Uuid },
    /// Extract an analysis output (infercnv, ideogram) for visualization
    ExtractAnalysisOutput {
        study_id: Uuid,
        study_file_id: Uuid,
        analysis_name: String,
        /// Display name for the extracted visualization
        visualization_name: Option<String>,
    },
}

impl LocalTask {
    pub fn name(&self) -> &'static str {
        match self {
            LocalTask::PushToRemote { .. } => "push_to_remote",
            LocalTask::InitializePrecomputedScores { .. } => "initialize_precomputed_scores",
            LocalTask::ExtractAnalysisOutput { .. } => "extract_analysis_output",
        }
    }

    /// Whether the task is the parse of its file (as opposed to a preparation step)
    pub fn claims_file(&self) -> bool {
        !matches!(self, LocalTask::PushToRemote { .. })
    }

    pub fn study_id(&self) -> Uuid {
        match self {
            LocalTask::PushToRemote { study_id, .. }
            | LocalTask::InitializePrecomputedScores { study_id, .. }
            | LocalTask::ExtractAnalysisOutput { study_id, .. } => *study_id,
        }
    }

    pub fn study_file_id(&self) -> Uuid {
        match self {
            LocalTask::PushToRemote { study_file_id, .. }
            | LocalTask::InitializePrecomputedScores { study_file_id, .. }
            | LocalTask::ExtractAnalysisOutput { study_file_id, .. } => *study_file_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::ClusterIngestParameters;

    fn cluster_job(requester: Requester) -> IngestJob {
        IngestJob {
            study_id: Uuid::nil(),
            study_accession: "SCP1".to_string(),
            study_file_id: Uuid::nil(),
            requester,
            action: JobAction::IngestCluster,
            params: IngestParameters::Cluster(ClusterIngestParameters {
                cluster_file: "gs://bucket/cluster.tsv".to_string(),
                name: "UMAP".to_string(),
            }),
            machine_type: "n2d-highmem-8".to_string(),
            reparse: false,
            persist_on_fail: false,
            claimed_file_ids: vec![Uuid::nil()],
        }
    }

    #[test]
    fn test_command_is_requester_independent() {
        let a = cluster_job(Requester::new("a@example.com"));
        let b = cluster_job(Requester::new("b@example.com"));
        assert_eq!(a.command(), b.command());
        assert_ne!(a.labels(), b.labels());
        assert_eq!(a.command()[6], "ingest_cluster");
        assert_eq!(a.command().last().map(String::as_str), Some("UMAP"));
    }

    #[test]
    fn test_running_states() {
        assert!(JobState::Scheduled.is_running());
        assert!(!JobState::Succeeded.is_running());
        assert!(!JobAction::DifferentialExpression.claims_file());
        assert!(JobAction::IngestAnnData.claims_file());
    }
}
