//! Differential expression result persistence
//!
//! Results are written by completed remote jobs. This crate only reads them,
//! except that an author DE upload purges the automated ones.

use scp_common::{Error, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use super::{from_json, parse_uuid, to_json};
use crate::models::{AnnotationScope, DifferentialExpressionResult};

const RESULT_COLUMNS: &str = "id, study_id, cluster_group_id, cluster_name, annotation_name, \
     annotation_scope, is_author_de, one_vs_rest_comparisons, pairwise_comparisons";

pub async fn save_de_result(pool: &SqlitePool, result: &DifferentialExpressionResult) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO de_results (
            id, study_id, cluster_group_id, cluster_name, annotation_name,
            annotation_scope, is_author_de, one_vs_rest_comparisons, pairwise_comparisons
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(id) DO UPDATE SET
            one_vs_rest_comparisons = excluded.one_vs_rest_comparisons,
            pairwise_comparisons = excluded.pairwise_comparisons
        "#,
    )
    .bind(result.id.to_string())
    .bind(result.study_id.to_string())
    .bind(result.cluster_group_id.to_string())
    .bind(&result.cluster_name)
    .bind(&result.annotation_name)
    .bind(result.annotation_scope.as_str())
    .bind(result.is_author_de)
    .bind(to_json(&result.one_vs_rest_comparisons)?)
    .bind(to_json(&result.pairwise_comparisons)?)
    .execute(pool)
    .await?;
    Ok(())
}

/// Result for a (study, cluster, annotation name, scope) key
pub async fn find_de_result(
    pool: &SqlitePool,
    study_id: Uuid,
    cluster_group_id: Uuid,
    annotation_name: &str,
    annotation_scope: AnnotationScope,
) -> Result<Option<DifferentialExpressionResult>> {
    let row = sqlx::query(&format!(
        "SELECT {} FROM de_results WHERE study_id = ? AND cluster_group_id = ? AND annotation_name = ? AND annotation_scope = ?",
        RESULT_COLUMNS
    ))
    .bind(study_id.to_string())
    .bind(cluster_group_id.to_string())
    .bind(annotation_name)
    .bind(annotation_scope.as_str())
    .fetch_optional(pool)
    .await?;

    row.map(|r| result_from_row(&r)).transpose()
}

pub async fn list_de_results(pool: &SqlitePool, study_id: Uuid) -> Result<Vec<DifferentialExpressionResult>> {
    let rows = sqlx::query(&format!(
        "SELECT {} FROM de_results WHERE study_id = ? ORDER BY cluster_name, annotation_name",
        RESULT_COLUMNS
    ))
    .bind(study_id.to_string())
    .fetch_all(pool)
    .await?;

    rows.iter().map(result_from_row).collect()
}

pub async fn study_has_author_de(pool: &SqlitePool, study_id: Uuid) -> Result<bool> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM de_results WHERE study_id = ? AND is_author_de = 1")
        .bind(study_id.to_string())
        .fetch_one(pool)
        .await?;
    Ok(count > 0)
}

/// Delete computed results, keeping author uploads. Returns rows removed.
pub async fn delete_automated_de_results(pool: &SqlitePool, study_id: Uuid) -> Result<u64> {
    let result = sqlx::query("DELETE FROM de_results WHERE study_id = ? AND is_author_de = 0")
        .bind(study_id.to_string())
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

fn result_from_row(row: &SqliteRow) -> Result<DifferentialExpressionResult> {
    let id: String = row.get("id");
    let study_id: String = row.get("study_id");
    let cluster_group_id: String = row.get("cluster_group_id");
    let scope: String = row.get("annotation_scope");
    let one_vs_rest: String = row.get("one_vs_rest_comparisons");
    let pairwise: String = row.get("pairwise_comparisons");

    Ok(DifferentialExpressionResult {
        id: parse_uuid(&id, "de_results.id")?,
        study_id: parse_uuid(&study_id, "de_results.study_id")?,
        cluster_group_id: parse_uuid(&cluster_group_id, "de_results.cluster_group_id")?,
        cluster_name: row.get("cluster_name"),
        annotation_name: row.get("annotation_name"),
        annotation_scope: AnnotationScope::parse(&scope)
            .ok_or_else(|| Error::Internal(format!("Unknown annotation scope: {}", scope)))?,
        is_author_de: row.get("is_author_de"),
        one_vs_rest_comparisons: from_json(&one_vs_rest)?,
        pairwise_comparisons: from_json(&pairwise)?,
    })
}
