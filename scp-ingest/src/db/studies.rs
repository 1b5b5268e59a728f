//! Study persistence

use scp_common::Result;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use super::{from_json, parse_optional_uuid, parse_uuid, to_json};
use crate::models::{DefaultAnnotation, Study};

const STUDY_COLUMNS: &str = "id, accession, name, bucket_id, queued_for_deletion, detached, \
     share_count, default_cluster_id, default_annotation, viz_override_annotations";

/// Insert or update a study
pub async fn save_study(pool: &SqlitePool, study: &Study) -> Result<()> {
    let viz_overrides = to_json(&study.viz_override_annotations)?;

    sqlx::query(
        r#"
        INSERT INTO studies (
            id, accession, name, bucket_id, queued_for_deletion, detached,
            share_count, default_cluster_id, default_annotation, viz_override_annotations
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(id) DO UPDATE SET
            accession = excluded.accession,
            name = excluded.name,
            bucket_id = excluded.bucket_id,
            queued_for_deletion = excluded.queued_for_deletion,
            detached = excluded.detached,
            share_count = excluded.share_count,
            default_cluster_id = excluded.default_cluster_id,
            default_annotation = excluded.default_annotation,
            viz_override_annotations = excluded.viz_override_annotations
        "#,
    )
    .bind(study.id.to_string())
    .bind(&study.accession)
    .bind(&study.name)
    .bind(&study.bucket_id)
    .bind(study.queued_for_deletion)
    .bind(study.detached)
    .bind(study.share_count)
    .bind(study.default_cluster_id.map(|id| id.to_string()))
    .bind(study.default_annotation.as_ref().map(DefaultAnnotation::encode))
    .bind(viz_overrides)
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn load_study(pool: &SqlitePool, study_id: Uuid) -> Result<Option<Study>> {
    let row = sqlx::query(&format!("SELECT {} FROM studies WHERE id = ?", STUDY_COLUMNS))
        .bind(study_id.to_string())
        .fetch_optional(pool)
        .await?;

    row.map(|r| study_from_row(&r)).transpose()
}

pub async fn find_study_by_accession(pool: &SqlitePool, accession: &str) -> Result<Option<Study>> {
    let row = sqlx::query(&format!(
        "SELECT {} FROM studies WHERE accession = ?",
        STUDY_COLUMNS
    ))
    .bind(accession)
    .fetch_optional(pool)
    .await?;

    row.map(|r| study_from_row(&r)).transpose()
}

/// Accessions of studies not queued for deletion, in accession order
pub async fn list_live_accessions(pool: &SqlitePool) -> Result<Vec<String>> {
    let accessions = sqlx::query_scalar(
        "SELECT accession FROM studies WHERE queued_for_deletion = 0 ORDER BY accession",
    )
    .fetch_all(pool)
    .await?;

    Ok(accessions)
}

fn study_from_row(row: &SqliteRow) -> Result<Study> {
    let id: String = row.get("id");
    let default_annotation: Option<String> = row.get("default_annotation");
    let viz_overrides: String = row.get("viz_override_annotations");

    Ok(Study {
        id: parse_uuid(&id, "studies.id")?,
        accession: row.get("accession"),
        name: row.get("name"),
        bucket_id: row.get("bucket_id"),
        queued_for_deletion: row.get("queued_for_deletion"),
        detached: row.get("detached"),
        share_count: row.get("share_count"),
        default_cluster_id: parse_optional_uuid(row.get("default_cluster_id"), "default_cluster_id")?,
        default_annotation: default_annotation.as_deref().and_then(DefaultAnnotation::parse),
        viz_override_annotations: from_json(&viz_overrides)?,
    })
}
