//! Cluster group and annotation persistence

use scp_common::{Error, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use super::{from_json, parse_optional_uuid, parse_uuid, to_json};
use crate::models::{Annotation, AnnotationScope, AnnotationType, ClusterGroup};

pub async fn save_cluster_group(pool: &SqlitePool, cluster: &ClusterGroup) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO cluster_groups (id, study_id, study_file_id, name, cells)
        VALUES (?, ?, ?, ?, ?)
        ON CONFLICT(id) DO UPDATE SET
            name = excluded.name,
            cells = excluded.cells
        "#,
    )
    .bind(cluster.id.to_string())
    .bind(cluster.study_id.to_string())
    .bind(cluster.study_file_id.to_string())
    .bind(&cluster.name)
    .bind(to_json(&cluster.cells)?)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn load_cluster_group(pool: &SqlitePool, cluster_id: Uuid) -> Result<Option<ClusterGroup>> {
    let row = sqlx::query("SELECT id, study_id, study_file_id, name, cells FROM cluster_groups WHERE id = ?")
        .bind(cluster_id.to_string())
        .fetch_optional(pool)
        .await?;

    row.map(|r| cluster_from_row(&r)).transpose()
}

/// Clusterings of a study in name order
///
/// Clusterings whose cluster file is queued for deletion are left out.
pub async fn list_cluster_groups(pool: &SqlitePool, study_id: Uuid) -> Result<Vec<ClusterGroup>> {
    let rows = sqlx::query(
        r#"
        SELECT c.id, c.study_id, c.study_file_id, c.name, c.cells
        FROM cluster_groups c
        JOIN study_files f ON f.id = c.study_file_id
        WHERE c.study_id = ? AND f.queued_for_deletion = 0
        ORDER BY c.name
        "#,
    )
    .bind(study_id.to_string())
    .fetch_all(pool)
    .await?;

    rows.iter().map(cluster_from_row).collect()
}

pub async fn save_annotation(pool: &SqlitePool, annotation: &Annotation) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO annotations (id, study_id, cluster_group_id, name, annotation_type, cell_values)
        VALUES (?, ?, ?, ?, ?, ?)
        ON CONFLICT(id) DO UPDATE SET
            name = excluded.name,
            annotation_type = excluded.annotation_type,
            cell_values = excluded.cell_values
        "#,
    )
    .bind(annotation.id.to_string())
    .bind(annotation.study_id.to_string())
    .bind(annotation.cluster_group_id.map(|id| id.to_string()))
    .bind(&annotation.name)
    .bind(annotation.annotation_type.as_str())
    .bind(to_json(&annotation.cell_values)?)
    .execute(pool)
    .await?;
    Ok(())
}

/// Study-wide (cell metadata) annotations
pub async fn list_study_annotations(pool: &SqlitePool, study_id: Uuid) -> Result<Vec<Annotation>> {
    let rows = sqlx::query(
        "SELECT id, study_id, cluster_group_id, name, annotation_type, cell_values FROM annotations WHERE study_id = ? AND cluster_group_id IS NULL ORDER BY name",
    )
    .bind(study_id.to_string())
    .fetch_all(pool)
    .await?;

    rows.iter().map(annotation_from_row).collect()
}

/// Annotations defined by one clustering
pub async fn list_cluster_annotations(pool: &SqlitePool, cluster_id: Uuid) -> Result<Vec<Annotation>> {
    let rows = sqlx::query(
        "SELECT id, study_id, cluster_group_id, name, annotation_type, cell_values FROM annotations WHERE cluster_group_id = ? ORDER BY name",
    )
    .bind(cluster_id.to_string())
    .fetch_all(pool)
    .await?;

    rows.iter().map(annotation_from_row).collect()
}

/// Look up an annotation by name in the given scope
///
/// Cluster-scoped lookups search the annotations of `cluster`.
pub async fn find_annotation(
    pool: &SqlitePool,
    study_id: Uuid,
    cluster: &ClusterGroup,
    name: &str,
    scope: AnnotationScope,
) -> Result<Option<Annotation>> {
    let annotations = match scope {
        AnnotationScope::Study => list_study_annotations(pool, study_id).await?,
        AnnotationScope::Cluster => list_cluster_annotations(pool, cluster.id).await?,
    };
    Ok(annotations.into_iter().find(|a| a.name == name))
}

fn cluster_from_row(row: &SqliteRow) -> Result<ClusterGroup> {
    let id: String = row.get("id");
    let study_id: String = row.get("study_id");
    let study_file_id: String = row.get("study_file_id");
    let cells: String = row.get("cells");

    Ok(ClusterGroup {
        id: parse_uuid(&id, "cluster_groups.id")?,
        study_id: parse_uuid(&study_id, "cluster_groups.study_id")?,
        study_file_id: parse_uuid(&study_file_id, "cluster_groups.study_file_id")?,
        name: row.get("name"),
        cells: from_json(&cells)?,
    })
}

fn annotation_from_row(row: &SqliteRow) -> Result<Annotation> {
    let id: String = row.get("id");
    let study_id: String = row.get("study_id");
    let annotation_type: String = row.get("annotation_type");
    let cell_values: String = row.get("cell_values");

    Ok(Annotation {
        id: parse_uuid(&id, "annotations.id")?,
        study_id: parse_uuid(&study_id, "annotations.study_id")?,
        cluster_group_id: parse_optional_uuid(row.get("cluster_group_id"), "cluster_group_id")?,
        name: row.get("name"),
        annotation_type: AnnotationType::parse(&annotation_type).ok_or_else(|| {
            Error::Internal(format!("Unknown annotation type: {}", annotation_type))
        })?,
        cell_values: from_json(&cell_values)?,
    })
}
