//! Event types and broadcast bus
//!
//! The bus is the notification sink for the orchestrator: share-update
//! notices, telemetry, submission outcomes and queued local tasks. Emission
//! is fire-and-forget; nothing in the orchestrator awaits or retries a
//! notification.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Orchestrator event types
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum IngestEvent {
    /// Study collaborators should be told about new files
    ShareUpdate {
        study_id: Uuid,
        accession: String,
        changes: Vec<String>,
        requester: String,
        timestamp: DateTime<Utc>,
    },

    /// Usage telemetry (e.g. non-convention metadata uploads)
    Telemetry {
        name: String,
        properties: serde_json::Value,
        requester: String,
        timestamp: DateTime<Utc>,
    },

    /// Batch service accepted a job
    JobSubmitted {
        study_file_id: Uuid,
        action: String,
        job_name: String,
        timestamp: DateTime<Utc>,
    },

    /// Batch service rejected or could not be reached
    ///
    /// The file keeps its local `parsing` claim until the reconcile sweep
    /// releases it.
    JobSubmissionFailed {
        study_file_id: Uuid,
        action: String,
        error: String,
        timestamp: DateTime<Utc>,
    },

    /// In-application background task handed to downstream workers
    LocalTaskQueued {
        task: String,
        study_id: Uuid,
        study_file_id: Uuid,
        timestamp: DateTime<Utc>,
    },

    /// A stale, never-confirmed parse claim was released
    ParseClaimReleased {
        study_file_id: Uuid,
        claimed_at: DateTime<Utc>,
        timestamp: DateTime<Utc>,
    },
}

impl IngestEvent {
    /// Short label for log lines
    pub fn kind(&self) -> &'static str {
        match self {
            IngestEvent::ShareUpdate { .. } => "share_update",
            IngestEvent::Telemetry { .. } => "telemetry",
            IngestEvent::JobSubmitted { .. } => "job_submitted",
            IngestEvent::JobSubmissionFailed { .. } => "job_submission_failed",
            IngestEvent::LocalTaskQueued { .. } => "local_task_queued",
            IngestEvent::ParseClaimReleased { .. } => "parse_claim_released",
        }
    }
}

/// Broadcast bus for [`IngestEvent`]s
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<IngestEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    ///
    /// Events beyond `capacity` that slow subscribers have not received are
    /// dropped for those subscribers.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<IngestEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Err` if no subscribers are listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: IngestEvent,
    ) -> Result<usize, broadcast::error::SendError<IngestEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: IngestEvent) {
        let kind = event.kind();
        if self.tx.send(event).is_err() {
            tracing::trace!(kind, "No subscribers for event");
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
