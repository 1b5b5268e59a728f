//! Batch-compute service client
//!
//! The batch service runs ingest pipelines remotely. The orchestrator only
//! submits jobs and lists them by state to detect duplicates; job outcomes
//! arrive through other channels.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{IngestError, Result};
use crate::models::{IngestJob, JobState, RemoteJob};

const USER_AGENT: &str = concat!("scp-ingest/", env!("CARGO_PKG_VERSION"));

/// Port to the remote batch service
#[async_trait]
pub trait BatchClient: Send + Sync {
    /// Jobs in one of `states` whose command line equals `command` exactly
    async fn find_matching_jobs(&self, command: &[String], states: &[JobState]) -> Result<Vec<RemoteJob>>;

    /// Submit a job; returns the accepted remote job
    async fn submit(&self, job: &IngestJob) -> Result<RemoteJob>;
}

#[derive(Debug, Serialize)]
struct SubmitRequest<'a> {
    command: Vec<String>,
    labels: Vec<(String, String)>,
    machine_type: &'a str,
}

#[derive(Debug, Deserialize)]
struct ListResponse {
    #[serde(default)]
    jobs: Vec<RemoteJob>,
}

/// JSON-over-HTTP batch client
///
/// * `GET {endpoint}/jobs?state=...` lists jobs
/// * `POST {endpoint}/jobs` submits one
pub struct HttpBatchClient {
    http_client: reqwest::Client,
    endpoint: String,
}

impl HttpBatchClient {
    pub fn new(endpoint: impl Into<String>, timeout_secs: u64) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| IngestError::Batch(e.to_string()))?;

        Ok(Self {
            http_client,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn from_config(config: &scp_common::config::BatchConfig) -> Result<Self> {
        Self::new(config.endpoint.clone(), config.request_timeout_secs)
    }

    fn jobs_url(&self) -> String {
        format!("{}/jobs", self.endpoint)
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let error_text = response.text().await.unwrap_or_default();
        Err(IngestError::Batch(format!("HTTP {}: {}", status.as_u16(), error_text)))
    }
}

#[async_trait]
impl BatchClient for HttpBatchClient {
    async fn find_matching_jobs(&self, command: &[String], states: &[JobState]) -> Result<Vec<RemoteJob>> {
        let query: Vec<(&str, &str)> = states.iter().map(|s| ("state", s.as_str())).collect();

        let response = self
            .http_client
            .get(self.jobs_url())
            .query(&query)
            .send()
            .await
            .map_err(|e| IngestError::Batch(e.to_string()))?;
        let listed: ListResponse = Self::check(response)
            .await?
            .json()
            .await
            .map_err(|e| IngestError::Batch(format!("Malformed job list: {}", e)))?;

        let matching: Vec<RemoteJob> = listed
            .jobs
            .into_iter()
            .filter(|job| states.contains(&job.state) && job.command == command)
            .collect();

        tracing::debug!(matches = matching.len(), "Queried batch service for matching jobs");
        Ok(matching)
    }

    async fn submit(&self, job: &IngestJob) -> Result<RemoteJob> {
        let request = SubmitRequest {
            command: job.command(),
            labels: job.labels(),
            machine_type: &job.machine_type,
        };

        let response = self
            .http_client
            .post(self.jobs_url())
            .json(&request)
            .send()
            .await
            .map_err(|e| IngestError::Batch(e.to_string()))?;
        let accepted: RemoteJob = Self::check(response)
            .await?
            .json()
            .await
            .map_err(|e| IngestError::Batch(format!("Malformed submit response: {}", e)))?;

        tracing::info!(
            job_name = %accepted.name,
            action = %job.action,
            file_id = %job.study_file_id,
            "Batch job accepted"
        );
        Ok(accepted)
    }
}
