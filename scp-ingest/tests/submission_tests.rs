//! Submission worker and parse-claim reconciliation tests

mod helpers;

use std::sync::Arc;

use chrono::{Duration, Utc};
use helpers::{create_test_db, reload, seed_file, seed_study, FakeBatchClient};
use scp_common::events::{EventBus, IngestEvent};
use scp_ingest::db;
use scp_ingest::models::{FileType, JobAction, ParseClaim, ParseStatus, Requester, StudyFile};
use scp_ingest::services::{reconcile_stranded_claims, DispatchOptions, DispatchRouter, QueuedSubmitter};
use scp_ingest::IngestError;
use sqlx::SqlitePool;
use tokio::task::JoinHandle;

const MAX_LOCK_WAIT_MS: u64 = 1000;

fn queued_router(pool: &SqlitePool, batch: Arc<FakeBatchClient>, events: &EventBus) -> (DispatchRouter, JoinHandle<()>) {
    let (submitter, worker) = QueuedSubmitter::spawn(batch, pool.clone(), events.clone(), MAX_LOCK_WAIT_MS);
    let router = DispatchRouter::new(
        pool.clone(),
        Arc::new(submitter),
        events.clone(),
        "n2d-highmem-8",
        MAX_LOCK_WAIT_MS,
    );
    (router, worker)
}

/// Drop the router's submitter and wait for the worker to drain
async fn drain(router: DispatchRouter, worker: JoinHandle<()>) {
    drop(router);
    worker.await.unwrap();
}

fn drain_events(rx: &mut tokio::sync::broadcast::Receiver<IngestEvent>) -> Vec<IngestEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

/// Move a file's claim into the past
async fn age_claim(pool: &SqlitePool, file: &StudyFile, hours: i64) {
    let mut stored = reload(pool, file).await;
    stored.parse_claimed_at = Some(Utc::now() - Duration::hours(hours));
    db::files::save_study_file(pool, &stored).await.unwrap();
}

/// TC-SU-001: Accepted jobs confirm the parse claim
///
/// **Type:** Integration | **Priority:** P0
#[tokio::test]
async fn test_submitted_job_confirms_claim() {
    // Given: a router backed by the queued submitter
    let pool = create_test_db().await;
    let study = seed_study(&pool, "SCP200").await;
    let events = EventBus::new(100);
    let mut rx = events.subscribe();
    let batch = Arc::new(FakeBatchClient::default());
    let (router, worker) = queued_router(&pool, batch.clone(), &events);
    let file = seed_file(&pool, &study, "expression.tsv", FileType::ExpressionMatrix).await;

    // When: dispatched and the worker drains
    let result = router
        .dispatch(&file, &study, &Requester::new("user@example.com"), &DispatchOptions::default())
        .await
        .unwrap();
    assert!(result.is_accepted());
    drain(router, worker).await;

    // Then: the batch service saw the job and the claim is confirmed
    assert_eq!(batch.submitted().len(), 1);
    let stored = reload(&pool, &file).await;
    assert_eq!(stored.parse_status, ParseStatus::Parsing);
    assert!(matches!(stored.parse_claim(), ParseClaim::Confirmed { job_name, .. } if job_name == "job-1"));

    let submitted: Vec<_> = drain_events(&mut rx)
        .into_iter()
        .filter(|e| matches!(e, IngestEvent::JobSubmitted { .. }))
        .collect();
    assert_eq!(submitted.len(), 1);
}

/// TC-SU-002: Bundle members share the parent's confirmation
///
/// **Type:** Integration | **Priority:** P1
#[tokio::test]
async fn test_bundle_members_confirmed_together() {
    let pool = create_test_db().await;
    let study = seed_study(&pool, "SCP201").await;
    let events = EventBus::new(100);
    let mut rx = events.subscribe();
    let batch = Arc::new(FakeBatchClient::default());
    let (router, worker) = queued_router(&pool, batch.clone(), &events);

    let matrix = seed_file(&pool, &study, "matrix.mtx", FileType::MmCoordinateMatrix).await;
    let genes = seed_file(&pool, &study, "genes.tsv", FileType::TenXGenes).await;
    let barcodes = seed_file(&pool, &study, "barcodes.tsv", FileType::TenXBarcodes).await;
    router.resolver().stage_child(&genes, matrix.id).await.unwrap();
    router.resolver().stage_child(&barcodes, matrix.id).await.unwrap();

    let result = router
        .dispatch(&matrix, &study, &Requester::new("user@example.com"), &DispatchOptions::default())
        .await
        .unwrap();
    assert!(result.is_accepted());
    drain(router, worker).await;

    for file in [&matrix, &genes, &barcodes] {
        assert!(matches!(reload(&pool, file).await.parse_claim(), ParseClaim::Confirmed { .. }));
    }

    // Push-to-remote is queued locally and never confirms a claim on its own
    let local: Vec<_> = drain_events(&mut rx)
        .into_iter()
        .filter_map(|e| match e {
            IngestEvent::LocalTaskQueued { task, .. } => Some(task),
            _ => None,
        })
        .collect();
    assert_eq!(local, vec!["push_to_remote".to_string()]);

    // Nothing to release: every member is confirmed
    let released = reconcile_stranded_claims(&pool, &events, Duration::zero(), MAX_LOCK_WAIT_MS)
        .await
        .unwrap();
    assert!(released.is_empty());
}

/// TC-SU-003: Rejected submissions leave an unconfirmed claim for the sweep
///
/// **Type:** Integration | **Priority:** P0
#[tokio::test]
async fn test_failed_submission_is_released_by_reconcile() {
    // Given: a batch service that rejects every job
    let pool = create_test_db().await;
    let study = seed_study(&pool, "SCP202").await;
    let events = EventBus::new(100);
    let mut rx = events.subscribe();
    let batch = Arc::new(FakeBatchClient::failing());
    let (router, worker) = queued_router(&pool, batch, &events);
    let file = seed_file(&pool, &study, "metadata.tsv", FileType::Metadata).await;

    // When: dispatched
    let result = router
        .dispatch(&file, &study, &Requester::new("user@example.com"), &DispatchOptions::default())
        .await
        .unwrap();
    assert!(result.is_accepted());
    drain(router, worker).await;

    // Then: failure reported, claim still local
    assert!(drain_events(&mut rx)
        .iter()
        .any(|e| matches!(e, IngestEvent::JobSubmissionFailed { error, .. } if error.contains("503"))));
    let stored = reload(&pool, &file).await;
    assert!(matches!(stored.parse_claim(), ParseClaim::Local { .. }));

    // When: the claim goes stale and the sweep runs
    age_claim(&pool, &file, 2).await;
    let released = reconcile_stranded_claims(&pool, &events, Duration::hours(1), MAX_LOCK_WAIT_MS)
        .await
        .unwrap();

    // Then: the file can be dispatched again
    assert_eq!(released, vec![file.id]);
    let stored = reload(&pool, &file).await;
    assert_eq!(stored.parse_status, ParseStatus::Uploaded);
    assert!(stored.parse_claimed_at.is_none());
    assert!(drain_events(&mut rx)
        .iter()
        .any(|e| matches!(e, IngestEvent::ParseClaimReleased { study_file_id, .. } if *study_file_id == file.id)));
}

/// TC-SU-004: A stopped worker surfaces as an error after the claim
///
/// **Type:** Integration | **Priority:** P1
#[tokio::test]
async fn test_stopped_worker_strands_claim() {
    let pool = create_test_db().await;
    let study = seed_study(&pool, "SCP203").await;
    let events = EventBus::new(100);
    let (router, worker) = queued_router(&pool, Arc::new(FakeBatchClient::default()), &events);
    worker.abort();
    assert!(worker.await.unwrap_err().is_cancelled());

    let file = seed_file(&pool, &study, "umap.tsv", FileType::Cluster).await;
    let err = router
        .dispatch(&file, &study, &Requester::new("user@example.com"), &DispatchOptions::default())
        .await
        .unwrap_err();

    assert!(matches!(err, IngestError::QueueClosed(_)));
    assert!(matches!(reload(&pool, &file).await.parse_claim(), ParseClaim::Local { .. }));
}

/// TC-SU-005: Reconcile leaves fresh and confirmed claims alone
///
/// **Type:** Integration | **Priority:** P0
#[tokio::test]
async fn test_reconcile_only_releases_stale_unconfirmed() {
    let pool = create_test_db().await;
    let study = seed_study(&pool, "SCP204").await;
    let events = EventBus::new(100);

    let stale = seed_file(&pool, &study, "stale.tsv", FileType::Cluster).await;
    let fresh = seed_file(&pool, &study, "fresh.tsv", FileType::Cluster).await;
    let confirmed = seed_file(&pool, &study, "confirmed.tsv", FileType::Cluster).await;
    db::files::mark_parsing(&pool, &[stale.id, fresh.id, confirmed.id], Utc::now(), MAX_LOCK_WAIT_MS)
        .await
        .unwrap();
    age_claim(&pool, &stale, 3).await;
    age_claim(&pool, &confirmed, 3).await;
    assert!(db::files::confirm_remote_job(&pool, confirmed.id, "job-7", Utc::now(), MAX_LOCK_WAIT_MS)
        .await
        .unwrap());

    let released = reconcile_stranded_claims(&pool, &events, Duration::hours(1), MAX_LOCK_WAIT_MS)
        .await
        .unwrap();

    assert_eq!(released, vec![stale.id]);
    assert_eq!(reload(&pool, &fresh).await.parse_status, ParseStatus::Parsing);
    assert_eq!(reload(&pool, &confirmed).await.parse_status, ParseStatus::Parsing);
}

/// TC-SU-006: A rejected chained labels job is not confirmed by its cluster's job
///
/// **Type:** Integration | **Priority:** P0
#[tokio::test]
async fn test_rejected_chained_job_stays_releasable() {
    // Given: a cluster with staged coordinate labels, and a batch service
    // that rejects coordinate label jobs
    let pool = create_test_db().await;
    let study = seed_study(&pool, "SCP205").await;
    let events = EventBus::new(100);
    let batch = Arc::new(FakeBatchClient::rejecting(JobAction::IngestCoordinateLabels));
    let (router, worker) = queued_router(&pool, batch.clone(), &events);

    let mut cluster = StudyFile::new(study.id, "umap.tsv", FileType::Cluster);
    cluster.name = "UMAP".to_string();
    db::files::save_study_file(&pool, &cluster).await.unwrap();
    let labels = seed_file(&pool, &study, "labels.tsv", FileType::CoordinateLabels).await;
    router.resolver().stage_child(&labels, cluster.id).await.unwrap();

    // When: the cluster is dispatched and the worker drains
    let result = router
        .dispatch(&cluster, &study, &Requester::new("user@example.com"), &DispatchOptions::default())
        .await
        .unwrap();
    assert!(result.is_accepted());
    drain(router, worker).await;

    // Then: only the cluster job was accepted and confirmed
    assert_eq!(batch.submitted().len(), 1);
    assert!(matches!(
        reload(&pool, &cluster).await.parse_claim(),
        ParseClaim::Confirmed { job_name, .. } if job_name == "job-1"
    ));
    let stored = reload(&pool, &labels).await;
    assert!(matches!(stored.parse_claim(), ParseClaim::Local { .. }));
    assert!(stored.remote_job_name.is_none());

    // And: the sweep returns the labels file for another attempt
    age_claim(&pool, &labels, 48).await;
    let released = reconcile_stranded_claims(&pool, &events, Duration::hours(1), MAX_LOCK_WAIT_MS)
        .await
        .unwrap();
    assert_eq!(released, vec![labels.id]);
    assert_eq!(reload(&pool, &labels).await.parse_status, ParseStatus::Uploaded);
}
