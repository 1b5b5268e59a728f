//! Database Test Utilities
//!
//! In-memory database and seeding helpers

use sqlx::SqlitePool;
use std::collections::BTreeMap;

use scp_ingest::db;
use scp_ingest::models::{Annotation, AnnotationType, ClusterGroup, FileType, Study, StudyFile};

pub const TEST_BUCKET: &str = "fc-test-bucket";

pub const CELLS: [&str; 6] = ["c1", "c2", "c3", "c4", "c5", "c6"];

/// Fresh in-memory database with all tables
pub async fn create_test_db() -> SqlitePool {
    db::init_memory_pool().await.unwrap()
}

pub async fn seed_study(pool: &SqlitePool, accession: &str) -> Study {
    let study = Study::new(accession, format!("{} study", accession), TEST_BUCKET);
    db::studies::save_study(pool, &study).await.unwrap();
    study
}

/// Uploaded file of `file_type`
pub async fn seed_file(pool: &SqlitePool, study: &Study, name: &str, file_type: FileType) -> StudyFile {
    let file = StudyFile::new(study.id, name, file_type);
    db::files::save_study_file(pool, &file).await.unwrap();
    file
}

/// Stored state of `file`
pub async fn reload(pool: &SqlitePool, file: &StudyFile) -> StudyFile {
    db::files::load_study_file(pool, file.id).await.unwrap().unwrap()
}

/// Cell-to-label map over [`CELLS`], in order
pub fn labels(values: &[&str]) -> BTreeMap<String, String> {
    CELLS
        .iter()
        .zip(values.iter())
        .map(|(cell, value)| (cell.to_string(), value.to_string()))
        .collect()
}

/// Study ready for differential expression
pub struct DeFixture {
    pub study: Study,
    pub cluster_file: StudyFile,
    pub cluster: ClusterGroup,
    pub metadata_file: StudyFile,
    pub matrix: StudyFile,
}

/// One clustering over [`CELLS`], a metadata file and a dense raw counts
/// matrix; study-scope `cell_type__ontology_label` splits the cells A/B
pub async fn seed_de_study(pool: &SqlitePool, accession: &str) -> DeFixture {
    let study = seed_study(pool, accession).await;
    let cells: Vec<String> = CELLS.iter().map(|c| c.to_string()).collect();

    let mut cluster_file = StudyFile::new(study.id, "umap.tsv", FileType::Cluster);
    cluster_file.name = "UMAP".to_string();
    cluster_file.parse_status = scp_ingest::models::ParseStatus::Parsed;
    db::files::save_study_file(pool, &cluster_file).await.unwrap();
    let cluster = ClusterGroup::new(study.id, cluster_file.id, "UMAP", cells.clone());
    db::annotations::save_cluster_group(pool, &cluster).await.unwrap();

    let metadata_file = seed_file(pool, &study, "metadata.tsv", FileType::Metadata).await;

    let mut matrix = StudyFile::new(study.id, "raw.tsv", FileType::ExpressionMatrix);
    matrix.raw_counts = true;
    matrix.matrix_cells = cells;
    db::files::save_study_file(pool, &matrix).await.unwrap();

    let annotation = Annotation::new(
        study.id,
        None,
        "cell_type__ontology_label",
        AnnotationType::Group,
        labels(&["A", "A", "A", "B", "B", "B"]),
    );
    db::annotations::save_annotation(pool, &annotation).await.unwrap();

    DeFixture {
        study,
        cluster_file,
        cluster,
        metadata_file,
        matrix,
    }
}
