//! Study file persistence
//!
//! Status writes issued while dispatching go through `retry_on_lock`; the
//! reads never retry.

use chrono::{DateTime, Utc};
use scp_common::{Error, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use super::{
    from_json, parse_optional_timestamp, parse_optional_uuid, parse_timestamp, parse_uuid, to_json,
};
use crate::models::{FileType, ParseStatus, StudyFile};
use crate::utils::retry_on_lock;

const FILE_COLUMNS: &str = "id, study_id, name, upload_file_name, file_type, parse_status, \
     bundle_id, queued_for_deletion, bucket_location, upload_file_size, use_metadata_convention, \
     raw_counts, matrix_cells, analysis_name, visualization_name, parse_claimed_at, \
     remote_job_name, remote_confirmed_at, created_at";

/// Insert or update a study file
pub async fn save_study_file(pool: &SqlitePool, file: &StudyFile) -> Result<()> {
    let matrix_cells = to_json(&file.matrix_cells)?;

    sqlx::query(
        r#"
        INSERT INTO study_files (
            id, study_id, name, upload_file_name, file_type, parse_status,
            bundle_id, queued_for_deletion, bucket_location, upload_file_size,
            use_metadata_convention, raw_counts, matrix_cells, analysis_name,
            visualization_name, parse_claimed_at, remote_job_name, remote_confirmed_at,
            created_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(id) DO UPDATE SET
            name = excluded.name,
            upload_file_name = excluded.upload_file_name,
            file_type = excluded.file_type,
            parse_status = excluded.parse_status,
            bundle_id = excluded.bundle_id,
            queued_for_deletion = excluded.queued_for_deletion,
            bucket_location = excluded.bucket_location,
            upload_file_size = excluded.upload_file_size,
            use_metadata_convention = excluded.use_metadata_convention,
            raw_counts = excluded.raw_counts,
            matrix_cells = excluded.matrix_cells,
            analysis_name = excluded.analysis_name,
            visualization_name = excluded.visualization_name,
            parse_claimed_at = excluded.parse_claimed_at,
            remote_job_name = excluded.remote_job_name,
            remote_confirmed_at = excluded.remote_confirmed_at
        "#,
    )
    .bind(file.id.to_string())
    .bind(file.study_id.to_string())
    .bind(&file.name)
    .bind(&file.upload_file_name)
    .bind(file.file_type.as_str())
    .bind(file.parse_status.as_str())
    .bind(file.bundle_id.map(|id| id.to_string()))
    .bind(file.queued_for_deletion)
    .bind(&file.bucket_location)
    .bind(file.upload_file_size)
    .bind(file.use_metadata_convention)
    .bind(file.raw_counts)
    .bind(matrix_cells)
    .bind(&file.analysis_name)
    .bind(&file.visualization_name)
    .bind(file.parse_claimed_at.map(|dt| dt.to_rfc3339()))
    .bind(&file.remote_job_name)
    .bind(file.remote_confirmed_at.map(|dt| dt.to_rfc3339()))
    .bind(file.created_at.to_rfc3339())
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn load_study_file(pool: &SqlitePool, file_id: Uuid) -> Result<Option<StudyFile>> {
    let row = sqlx::query(&format!("SELECT {} FROM study_files WHERE id = ?", FILE_COLUMNS))
        .bind(file_id.to_string())
        .fetch_optional(pool)
        .await?;

    row.map(|r| file_from_row(&r)).transpose()
}

/// Live (not queued for deletion) files of a study, oldest first
pub async fn list_study_files(pool: &SqlitePool, study_id: Uuid) -> Result<Vec<StudyFile>> {
    let rows = sqlx::query(&format!(
        "SELECT {} FROM study_files WHERE study_id = ? AND queued_for_deletion = 0 ORDER BY created_at",
        FILE_COLUMNS
    ))
    .bind(study_id.to_string())
    .fetch_all(pool)
    .await?;

    rows.iter().map(file_from_row).collect()
}

/// Live files of one type in a study, oldest first
pub async fn list_files_of_type(
    pool: &SqlitePool,
    study_id: Uuid,
    file_type: FileType,
) -> Result<Vec<StudyFile>> {
    let rows = sqlx::query(&format!(
        "SELECT {} FROM study_files WHERE study_id = ? AND file_type = ? AND queued_for_deletion = 0 ORDER BY created_at",
        FILE_COLUMNS
    ))
    .bind(study_id.to_string())
    .bind(file_type.as_str())
    .fetch_all(pool)
    .await?;

    rows.iter().map(file_from_row).collect()
}

/// All files attached to a bundle, oldest first
pub async fn list_bundle_files(pool: &SqlitePool, bundle_id: Uuid) -> Result<Vec<StudyFile>> {
    let rows = sqlx::query(&format!(
        "SELECT {} FROM study_files WHERE bundle_id = ? ORDER BY created_at",
        FILE_COLUMNS
    ))
    .bind(bundle_id.to_string())
    .fetch_all(pool)
    .await?;

    rows.iter().map(file_from_row).collect()
}

pub async fn set_bundle_id(pool: &SqlitePool, file_id: Uuid, bundle_id: Uuid) -> Result<()> {
    sqlx::query("UPDATE study_files SET bundle_id = ? WHERE id = ?")
        .bind(bundle_id.to_string())
        .bind(file_id.to_string())
        .execute(pool)
        .await?;
    Ok(())
}

/// Claim files for parsing
///
/// Sets `parsing` with a fresh local claim and clears any earlier remote
/// confirmation. One statement per file; no transaction.
pub async fn mark_parsing(
    pool: &SqlitePool,
    file_ids: &[Uuid],
    claimed_at: DateTime<Utc>,
    max_wait_ms: u64,
) -> Result<()> {
    let claimed_at = claimed_at.to_rfc3339();
    for file_id in file_ids {
        let file_id = file_id.to_string();
        retry_on_lock("mark_parsing", max_wait_ms, || async {
            sqlx::query(
                r#"
                UPDATE study_files
                SET parse_status = ?, parse_claimed_at = ?,
                    remote_job_name = NULL, remote_confirmed_at = NULL
                WHERE id = ?
                "#,
            )
            .bind(ParseStatus::Parsing.as_str())
            .bind(&claimed_at)
            .bind(&file_id)
            .execute(pool)
            .await
            .map(|_| ())
            .map_err(Error::from)
        })
        .await?;
    }
    Ok(())
}

/// Record that an executor accepted a job that claimed `file_id`
///
/// A file no longer parsing is left alone.
pub async fn confirm_remote_job(
    pool: &SqlitePool,
    file_id: Uuid,
    job_name: &str,
    confirmed_at: DateTime<Utc>,
    max_wait_ms: u64,
) -> Result<bool> {
    let file_id = file_id.to_string();
    let confirmed_at = confirmed_at.to_rfc3339();
    let result = retry_on_lock("confirm_remote_job", max_wait_ms, || async {
        sqlx::query(
            r#"
            UPDATE study_files
            SET remote_job_name = ?, remote_confirmed_at = ?
            WHERE id = ? AND parse_status = ?
            "#,
        )
        .bind(job_name)
        .bind(&confirmed_at)
        .bind(&file_id)
        .bind(ParseStatus::Parsing.as_str())
        .execute(pool)
        .await
        .map_err(Error::from)
    })
    .await?;
    Ok(result.rows_affected() > 0)
}

/// Parsing files never confirmed by the batch service, claimed before `cutoff`
pub async fn list_unconfirmed_claims(
    pool: &SqlitePool,
    cutoff: DateTime<Utc>,
) -> Result<Vec<StudyFile>> {
    let rows = sqlx::query(&format!(
        "SELECT {} FROM study_files WHERE parse_status = ? AND remote_confirmed_at IS NULL ORDER BY created_at",
        FILE_COLUMNS
    ))
    .bind(ParseStatus::Parsing.as_str())
    .fetch_all(pool)
    .await?;

    // RFC 3339 strings with differing offsets do not sort lexically; compare parsed values
    let files = rows
        .iter()
        .map(file_from_row)
        .collect::<Result<Vec<_>>>()?
        .into_iter()
        .filter(|f| f.parse_claimed_at.unwrap_or(f.created_at) < cutoff)
        .collect();
    Ok(files)
}

/// Return an unconfirmed parsing file to `uploaded`
///
/// No-op (returns false) when the claim was confirmed or released meanwhile.
pub async fn release_claim(pool: &SqlitePool, file_id: Uuid, max_wait_ms: u64) -> Result<bool> {
    let file_id = file_id.to_string();
    let result = retry_on_lock("release_claim", max_wait_ms, || async {
        sqlx::query(
            r#"
            UPDATE study_files
            SET parse_status = ?, parse_claimed_at = NULL
            WHERE id = ? AND parse_status = ? AND remote_confirmed_at IS NULL
            "#,
        )
        .bind(ParseStatus::Uploaded.as_str())
        .bind(&file_id)
        .bind(ParseStatus::Parsing.as_str())
        .execute(pool)
        .await
        .map_err(Error::from)
    })
    .await?;
    Ok(result.rows_affected() > 0)
}

fn file_from_row(row: &SqliteRow) -> Result<StudyFile> {
    let id: String = row.get("id");
    let study_id: String = row.get("study_id");
    let file_type: String = row.get("file_type");
    let parse_status: String = row.get("parse_status");
    let matrix_cells: String = row.get("matrix_cells");
    let created_at: String = row.get("created_at");

    Ok(StudyFile {
        id: parse_uuid(&id, "study_files.id")?,
        study_id: parse_uuid(&study_id, "study_files.study_id")?,
        name: row.get("name"),
        upload_file_name: row.get("upload_file_name"),
        file_type: file_type.parse()?,
        parse_status: parse_status.parse()?,
        bundle_id: parse_optional_uuid(row.get("bundle_id"), "bundle_id")?,
        queued_for_deletion: row.get("queued_for_deletion"),
        bucket_location: row.get("bucket_location"),
        upload_file_size: row.get("upload_file_size"),
        use_metadata_convention: row.get("use_metadata_convention"),
        raw_counts: row.get("raw_counts"),
        matrix_cells: from_json(&matrix_cells)?,
        analysis_name: row.get("analysis_name"),
        visualization_name: row.get("visualization_name"),
        parse_claimed_at: parse_optional_timestamp(row.get("parse_claimed_at"), "parse_claimed_at")?,
        remote_job_name: row.get("remote_job_name"),
        remote_confirmed_at: parse_optional_timestamp(
            row.get("remote_confirmed_at"),
            "remote_confirmed_at",
        )?,
        created_at: parse_timestamp(&created_at, "created_at")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_memory_pool;
    use chrono::Duration;

    #[tokio::test]
    async fn test_save_and_load_round_trip_preserves_claim_fields() {
        let pool = init_memory_pool().await.unwrap();
        let mut file = StudyFile::new(Uuid::new_v4(), "raw.mtx", FileType::MmCoordinateMatrix);
        file.matrix_cells = vec!["A".to_string(), "B".to_string()];
        file.raw_counts = true;
        save_study_file(&pool, &file).await.unwrap();

        let loaded = load_study_file(&pool, file.id).await.unwrap().unwrap();
        assert_eq!(loaded.file_type, FileType::MmCoordinateMatrix);
        assert_eq!(loaded.matrix_cells, file.matrix_cells);
        assert!(loaded.raw_counts);
        assert!(loaded.parse_claimed_at.is_none());
    }

    #[tokio::test]
    async fn test_mark_parsing_then_confirm() {
        let pool = init_memory_pool().await.unwrap();
        let file = StudyFile::new(Uuid::new_v4(), "cluster.tsv", FileType::Cluster);
        save_study_file(&pool, &file).await.unwrap();

        mark_parsing(&pool, &[file.id], Utc::now(), 1000).await.unwrap();
        let claimed = load_study_file(&pool, file.id).await.unwrap().unwrap();
        assert!(claimed.is_parsing());
        assert!(claimed.parse_claimed_at.is_some());

        assert!(confirm_remote_job(&pool, file.id, "job-1", Utc::now(), 1000).await.unwrap());
        let confirmed = load_study_file(&pool, file.id).await.unwrap().unwrap();
        assert_eq!(confirmed.remote_job_name.as_deref(), Some("job-1"));

        // confirmed claims cannot be released
        assert!(!release_claim(&pool, file.id, 1000).await.unwrap());
    }

    #[tokio::test]
    async fn test_unconfirmed_claims_respect_cutoff() {
        let pool = init_memory_pool().await.unwrap();
        let file = StudyFile::new(Uuid::new_v4(), "meta.txt", FileType::Metadata);
        save_study_file(&pool, &file).await.unwrap();
        mark_parsing(&pool, &[file.id], Utc::now() - Duration::hours(3), 1000)
            .await
            .unwrap();

        let stale = list_unconfirmed_claims(&pool, Utc::now() - Duration::hours(1)).await.unwrap();
        assert_eq!(stale.len(), 1);
        let fresh = list_unconfirmed_claims(&pool, Utc::now() - Duration::hours(4)).await.unwrap();
        assert!(fresh.is_empty());

        assert!(release_claim(&pool, file.id, 1000).await.unwrap());
        let released = load_study_file(&pool, file.id).await.unwrap().unwrap();
        assert_eq!(released.parse_status, ParseStatus::Uploaded);
        assert!(released.parse_claimed_at.is_none());
    }
}
