//! Job submission facade
//!
//! Dispatch hands validated jobs to a [`JobSubmitter`] and returns without
//! waiting on the batch service. [`QueuedSubmitter`] forwards work to a tokio
//! worker that talks to the [`BatchClient`], records confirmations and
//! reports outcomes on the event bus.

use async_trait::async_trait;
use chrono::Utc;
use scp_common::events::{EventBus, IngestEvent};
use sqlx::SqlitePool;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::batch_client::BatchClient;
use crate::db;
use crate::error::{IngestError, Result};
use crate::models::{IngestJob, LocalTask};

/// Port for asynchronous job execution
#[async_trait]
pub trait JobSubmitter: Send + Sync {
    /// Enqueue remote execution of a validated job
    async fn submit(&self, job: IngestJob) -> Result<()>;

    /// Enqueue an in-application background task
    async fn enqueue_local(&self, task: LocalTask) -> Result<()>;
}

#[derive(Debug)]
enum Submission {
    Remote(Box<IngestJob>),
    Local(LocalTask),
}

/// Channel-backed submitter drained by a single worker task
///
/// The worker stops once every clone of the submitter is dropped and the
/// queue is empty.
#[derive(Clone)]
pub struct QueuedSubmitter {
    tx: mpsc::UnboundedSender<Submission>,
}

impl QueuedSubmitter {
    /// Spawn the worker; returns the submitter and the worker handle
    pub fn spawn(
        batch_client: Arc<dyn BatchClient>,
        db: SqlitePool,
        event_bus: EventBus,
        max_lock_wait_ms: u64,
    ) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let worker = SubmissionWorker {
            batch_client,
            db,
            event_bus,
            max_lock_wait_ms,
        };
        let handle = tokio::spawn(worker.run(rx));
        (Self { tx }, handle)
    }

    fn send(&self, submission: Submission) -> Result<()> {
        self.tx
            .send(submission)
            .map_err(|_| IngestError::QueueClosed("submission worker stopped".to_string()))
    }
}

#[async_trait]
impl JobSubmitter for QueuedSubmitter {
    async fn submit(&self, job: IngestJob) -> Result<()> {
        tracing::debug!(file_id = %job.study_file_id, action = %job.action, "Queueing batch job");
        self.send(Submission::Remote(Box::new(job)))
    }

    async fn enqueue_local(&self, task: LocalTask) -> Result<()> {
        tracing::debug!(file_id = %task.study_file_id(), task = task.name(), "Queueing local task");
        self.send(Submission::Local(task))
    }
}

struct SubmissionWorker {
    batch_client: Arc<dyn BatchClient>,
    db: SqlitePool,
    event_bus: EventBus,
    max_lock_wait_ms: u64,
}

impl SubmissionWorker {
    async fn run(self, mut rx: mpsc::UnboundedReceiver<Submission>) {
        tracing::debug!("Submission worker started");
        while let Some(submission) = rx.recv().await {
            match submission {
                Submission::Remote(job) => self.submit_remote(*job).await,
                Submission::Local(task) => self.queue_local(task).await,
            }
        }
        tracing::debug!("Submission worker stopped");
    }

    async fn submit_remote(&self, job: IngestJob) {
        match self.batch_client.submit(&job).await {
            Ok(remote) => {
                for file_id in &job.claimed_file_ids {
                    self.confirm(file_id, &remote.name).await;
                }
                self.event_bus.emit_lossy(IngestEvent::JobSubmitted {
                    study_file_id: job.study_file_id,
                    action: job.action.as_str().to_string(),
                    job_name: remote.name,
                    timestamp: Utc::now(),
                });
            }
            Err(e) => {
                // The local parse claim stays until the reconcile sweep releases it
                tracing::error!(
                    file_id = %job.study_file_id,
                    action = %job.action,
                    error = %e,
                    "Batch submission failed"
                );
                self.event_bus.emit_lossy(IngestEvent::JobSubmissionFailed {
                    study_file_id: job.study_file_id,
                    action: job.action.as_str().to_string(),
                    error: e.to_string(),
                    timestamp: Utc::now(),
                });
            }
        }
    }

    async fn queue_local(&self, task: LocalTask) {
        if task.claims_file() {
            let job_name = format!("local-{}", task.name());
            self.confirm(&task.study_file_id(), &job_name).await;
        }
        tracing::info!(file_id = %task.study_file_id(), task = task.name(), "Local task queued");
        self.event_bus.emit_lossy(IngestEvent::LocalTaskQueued {
            task: task.name().to_string(),
            study_id: task.study_id(),
            study_file_id: task.study_file_id(),
            timestamp: Utc::now(),
        });
    }

    async fn confirm(&self, file_id: &uuid::Uuid, job_name: &str) {
        match db::files::confirm_remote_job(&self.db, *file_id, job_name, Utc::now(), self.max_lock_wait_ms).await {
            Ok(true) => {
                tracing::debug!(file_id = %file_id, job_name, "Parse claim confirmed");
            }
            Ok(false) => {
                tracing::warn!(file_id = %file_id, job_name, "File no longer parsing; claim not confirmed");
            }
            Err(e) => {
                tracing::error!(file_id = %file_id, job_name, error = %e, "Failed to record job confirmation");
            }
        }
    }
}
