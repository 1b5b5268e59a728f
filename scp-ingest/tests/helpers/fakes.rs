//! Recording fakes for the submission and batch service ports

use async_trait::async_trait;
use scp_common::events::EventBus;
use sqlx::SqlitePool;
use std::sync::{Arc, Mutex};

use scp_ingest::error::{IngestError, Result};
use scp_ingest::models::{IngestJob, JobAction, JobState, LocalTask, RemoteJob};
use scp_ingest::services::{BatchClient, DispatchRouter, JobSubmitter};

pub const TEST_MACHINE_TYPE: &str = "n2d-highmem-8";

/// Records jobs and local tasks instead of running them
#[derive(Default)]
pub struct RecordingSubmitter {
    jobs: Mutex<Vec<IngestJob>>,
    local_tasks: Mutex<Vec<LocalTask>>,
}

impl RecordingSubmitter {
    pub fn jobs(&self) -> Vec<IngestJob> {
        self.jobs.lock().unwrap().clone()
    }

    pub fn jobs_for(&self, action: JobAction) -> Vec<IngestJob> {
        self.jobs().into_iter().filter(|j| j.action == action).collect()
    }

    pub fn local_tasks(&self) -> Vec<LocalTask> {
        self.local_tasks.lock().unwrap().clone()
    }
}

#[async_trait]
impl JobSubmitter for RecordingSubmitter {
    async fn submit(&self, job: IngestJob) -> Result<()> {
        self.jobs.lock().unwrap().push(job);
        Ok(())
    }

    async fn enqueue_local(&self, task: LocalTask) -> Result<()> {
        self.local_tasks.lock().unwrap().push(task);
        Ok(())
    }
}

/// In-memory batch service
///
/// Reports the jobs registered with `add_job` and records submissions.
/// A failing client rejects every submission; a rejecting client only those
/// for one action.
#[derive(Default)]
pub struct FakeBatchClient {
    jobs: Mutex<Vec<RemoteJob>>,
    submitted: Mutex<Vec<IngestJob>>,
    fail_submissions: bool,
    reject_action: Option<JobAction>,
}

impl FakeBatchClient {
    pub fn failing() -> Self {
        Self {
            fail_submissions: true,
            ..Self::default()
        }
    }

    pub fn rejecting(action: JobAction) -> Self {
        Self {
            reject_action: Some(action),
            ..Self::default()
        }
    }

    pub fn add_job(&self, command: Vec<String>, state: JobState) {
        let mut jobs = self.jobs.lock().unwrap();
        let name = format!("existing-{}", jobs.len() + 1);
        jobs.push(RemoteJob { name, state, command });
    }

    pub fn submitted(&self) -> Vec<IngestJob> {
        self.submitted.lock().unwrap().clone()
    }
}

#[async_trait]
impl BatchClient for FakeBatchClient {
    async fn find_matching_jobs(&self, command: &[String], states: &[JobState]) -> Result<Vec<RemoteJob>> {
        Ok(self
            .jobs
            .lock()
            .unwrap()
            .iter()
            .filter(|j| states.contains(&j.state) && j.command.as_slice() == command)
            .cloned()
            .collect())
    }

    async fn submit(&self, job: &IngestJob) -> Result<RemoteJob> {
        if self.fail_submissions || self.reject_action == Some(job.action) {
            return Err(IngestError::Batch("HTTP 503: service unavailable".to_string()));
        }
        let mut submitted = self.submitted.lock().unwrap();
        submitted.push(job.clone());
        Ok(RemoteJob {
            name: format!("job-{}", submitted.len()),
            state: JobState::Queued,
            command: job.command(),
        })
    }
}

/// Router over `pool` whose submissions are recorded
pub fn create_test_router(pool: &SqlitePool) -> (Arc<DispatchRouter>, Arc<RecordingSubmitter>, EventBus) {
    let submitter = Arc::new(RecordingSubmitter::default());
    let event_bus = EventBus::new(100);
    let router = Arc::new(DispatchRouter::new(
        pool.clone(),
        submitter.clone(),
        event_bus.clone(),
        TEST_MACHINE_TYPE,
        1000,
    ));
    (router, submitter, event_bus)
}
