//! scp-ingest library interface
//!
//! Orchestrates ingest of uploaded study files: bundle resolution, dispatch
//! of type-specific ingest jobs, and differential expression eligibility
//! with dedup against the batch service.

pub mod db;
pub mod error;
pub mod models;
pub mod params;
pub mod services;
pub mod utils;

pub use crate::error::{IngestError, Result};

use scp_common::config::IngestConfig;
use scp_common::events::EventBus;
use sqlx::SqlitePool;
use std::sync::Arc;
use tokio::task::JoinHandle;

use services::{BatchClient, DeEngine, DispatchRouter, JobSubmitter, QueuedSubmitter};

/// Running orchestrator: router, DE engine and the submission worker
pub struct IngestServices {
    pub router: Arc<DispatchRouter>,
    pub de_engine: DeEngine,
    worker: JoinHandle<()>,
}

impl IngestServices {
    /// Wire services over `db` and spawn the submission worker
    pub fn start(
        db: SqlitePool,
        event_bus: EventBus,
        config: &IngestConfig,
        batch_client: Arc<dyn BatchClient>,
    ) -> Result<Self> {
        let (submitter, worker) = QueuedSubmitter::spawn(
            Arc::clone(&batch_client),
            db.clone(),
            event_bus.clone(),
            config.database.max_lock_wait_ms,
        );
        let submitter: Arc<dyn JobSubmitter> = Arc::new(submitter);

        let router = Arc::new(DispatchRouter::new(
            db.clone(),
            submitter,
            event_bus,
            config.batch.machine_type.clone(),
            config.database.max_lock_wait_ms,
        ));
        let de_engine = DeEngine::new(
            db,
            Arc::clone(&router),
            batch_client,
            config.differential_expression.clone(),
            config.batch.machine_type.clone(),
        )?;

        Ok(Self {
            router,
            de_engine,
            worker,
        })
    }

    /// Stop accepting work and wait for queued submissions to drain
    pub async fn shutdown(self) {
        let Self {
            router,
            de_engine,
            worker,
        } = self;
        drop(de_engine);
        drop(router);
        if let Err(e) = worker.await {
            tracing::error!(error = %e, "Submission worker panicked");
        }
    }
}
