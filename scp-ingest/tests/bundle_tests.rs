//! Bundle resolution tests
//!
//! Companion files reach the orchestrator in any order; whichever member is
//! resolved last completes the bundle.

mod helpers;

use helpers::{create_test_db, reload, seed_file, seed_study};
use scp_ingest::db;
use scp_ingest::models::{FileType, StudyFile};
use scp_ingest::services::BundleResolver;

/// TC-BU-001: Parent resolved before its children are staged
///
/// **Type:** Integration | **Priority:** P0
#[tokio::test]
async fn test_parent_first_then_children() {
    // Given: a sparse matrix with no staged companions
    let pool = create_test_db().await;
    let study = seed_study(&pool, "SCP1").await;
    let resolver = BundleResolver::new(pool.clone());
    let matrix = seed_file(&pool, &study, "matrix.mtx", FileType::MmCoordinateMatrix).await;

    // When: the parent resolves alone
    // Then: no bundle exists yet
    assert!(resolver.resolve(&matrix).await.unwrap().is_none());

    // When: both companions are staged and resolved
    let genes = seed_file(&pool, &study, "genes.tsv", FileType::TenXGenes).await;
    let barcodes = seed_file(&pool, &study, "barcodes.tsv", FileType::TenXBarcodes).await;
    resolver.stage_child(&genes, matrix.id).await.unwrap();
    resolver.stage_child(&barcodes, matrix.id).await.unwrap();

    let partial = resolver.resolve(&genes).await.unwrap().unwrap();
    assert_eq!(partial.missing_types(), vec![FileType::TenXBarcodes]);

    let bundle = resolver.resolve(&barcodes).await.unwrap().unwrap();

    // Then: one bundle keyed to the matrix holds both companions
    assert!(bundle.is_complete());
    assert_eq!(bundle.id, partial.id);
    assert_eq!(bundle.parent.id, matrix.id);
    assert_eq!(reload(&pool, &matrix).await.bundle_id, Some(bundle.id));
}

/// TC-BU-002: Children staged before the parent exists
///
/// **Type:** Integration | **Priority:** P0
#[tokio::test]
async fn test_children_first_then_parent() {
    // Given: companions staged against a matrix not yet saved
    let pool = create_test_db().await;
    let study = seed_study(&pool, "SCP2").await;
    let resolver = BundleResolver::new(pool.clone());
    let matrix = StudyFile::new(study.id, "matrix.mtx", FileType::MmCoordinateMatrix);
    let genes = seed_file(&pool, &study, "genes.tsv", FileType::TenXGenes).await;
    let barcodes = seed_file(&pool, &study, "barcodes.tsv", FileType::TenXBarcodes).await;
    resolver.stage_child(&genes, matrix.id).await.unwrap();
    resolver.stage_child(&barcodes, matrix.id).await.unwrap();

    // When: a child resolves before the parent upload completes
    // Then: nothing to attach to
    assert!(resolver.resolve(&genes).await.unwrap().is_none());

    // When: the parent arrives and resolves
    db::files::save_study_file(&pool, &matrix).await.unwrap();
    let bundle = resolver.resolve(&matrix).await.unwrap().unwrap();

    // Then: the parent sweeps both staged children in
    assert!(bundle.is_complete());
    let mut child_ids: Vec<_> = bundle.children.iter().map(|f| f.id).collect();
    child_ids.sort();
    let mut expected = vec![genes.id, barcodes.id];
    expected.sort();
    assert_eq!(child_ids, expected);

    // And: children resolved afterwards see the same bundle
    let again = resolver.resolve(&reload(&pool, &genes).await).await.unwrap().unwrap();
    assert_eq!(again.id, bundle.id);
}

/// TC-BU-003: Companions queued for deletion are not attached
///
/// **Type:** Integration | **Priority:** P1
#[tokio::test]
async fn test_deleted_child_is_ignored() {
    let pool = create_test_db().await;
    let study = seed_study(&pool, "SCP3").await;
    let resolver = BundleResolver::new(pool.clone());
    let bam = seed_file(&pool, &study, "reads.bam", FileType::Bam).await;

    let mut index = StudyFile::new(study.id, "reads.bam.bai", FileType::BamIndex);
    index.queued_for_deletion = true;
    db::files::save_study_file(&pool, &index).await.unwrap();
    resolver.stage_child(&index, bam.id).await.unwrap();

    assert!(resolver.resolve(&bam).await.unwrap().is_none());
    assert!(resolver.resolve(&index).await.unwrap().is_none());
}

/// TC-BU-004: A staged parent in another study is never attached
///
/// **Type:** Integration | **Priority:** P1
#[tokio::test]
async fn test_cross_study_parent_rejected() {
    let pool = create_test_db().await;
    let study = seed_study(&pool, "SCP4").await;
    let other = seed_study(&pool, "SCP5").await;
    let resolver = BundleResolver::new(pool.clone());

    let cluster = seed_file(&pool, &other, "umap.tsv", FileType::Cluster).await;
    let labels = seed_file(&pool, &study, "labels.tsv", FileType::CoordinateLabels).await;
    resolver.stage_child(&labels, cluster.id).await.unwrap();

    assert!(resolver.resolve(&labels).await.unwrap().is_none());
}

/// TC-BU-005: Only bundle child types can be staged
///
/// **Type:** Unit | **Priority:** P2
#[tokio::test]
async fn test_stage_rejects_non_child_type() {
    let pool = create_test_db().await;
    let study = seed_study(&pool, "SCP6").await;
    let resolver = BundleResolver::new(pool.clone());
    let metadata = seed_file(&pool, &study, "metadata.tsv", FileType::Metadata).await;

    let result = resolver.stage_child(&metadata, uuid::Uuid::new_v4()).await;
    assert!(result.is_err());
}

/// TC-BU-006: A parent never sweeps in a child from another study
///
/// **Type:** Integration | **Priority:** P1
#[tokio::test]
async fn test_parent_ignores_cross_study_child() {
    // Given: a BAM index in one study staged against a BAM in another
    let pool = create_test_db().await;
    let study = seed_study(&pool, "SCP7").await;
    let other = seed_study(&pool, "SCP8").await;
    let resolver = BundleResolver::new(pool.clone());
    let bam = seed_file(&pool, &study, "reads.bam", FileType::Bam).await;
    let index = seed_file(&pool, &other, "reads.bam.bai", FileType::BamIndex).await;
    resolver.stage_child(&index, bam.id).await.unwrap();

    // When: the parent resolves
    // Then: no bundle, and the child stays unattached
    assert!(resolver.resolve(&bam).await.unwrap().is_none());
    assert!(reload(&pool, &index).await.bundle_id.is_none());
}
