//! Database access for scp-ingest
//!
//! SQLite through `sqlx`. UUIDs are stored as TEXT, timestamps as RFC 3339
//! TEXT and list/map columns as JSON TEXT.

pub mod annotations;
pub mod anndata;
pub mod bundles;
pub mod de_results;
pub mod files;
pub mod studies;

use chrono::{DateTime, Utc};
use scp_common::{Error, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use std::path::Path;
use uuid::Uuid;

/// Initialize database connection pool
///
/// Creates the database file and its parent directory when missing.
pub async fn init_database_pool(db_path: &Path) -> Result<SqlitePool> {
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    tracing::debug!("Connecting to database: {}", db_url);

    let pool = SqlitePool::connect(&db_url).await?;
    init_tables(&pool).await?;

    Ok(pool)
}

/// Single-connection in-memory database with all tables created
///
/// Every query shares the one connection, so the database lives as long as
/// the pool.
pub async fn init_memory_pool() -> Result<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await?;
    init_tables(&pool).await?;
    Ok(pool)
}

/// Create ingest tables if they don't exist
pub async fn init_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS studies (
            id TEXT PRIMARY KEY,
            accession TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL,
            bucket_id TEXT NOT NULL,
            queued_for_deletion INTEGER NOT NULL DEFAULT 0,
            detached INTEGER NOT NULL DEFAULT 0,
            share_count INTEGER NOT NULL DEFAULT 0,
            default_cluster_id TEXT,
            default_annotation TEXT,
            viz_override_annotations TEXT NOT NULL DEFAULT '[]'
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS study_files (
            id TEXT PRIMARY KEY,
            study_id TEXT NOT NULL,
            name TEXT NOT NULL,
            upload_file_name TEXT NOT NULL,
            file_type TEXT NOT NULL,
            parse_status TEXT NOT NULL,
            bundle_id TEXT,
            queued_for_deletion INTEGER NOT NULL DEFAULT 0,
            bucket_location TEXT NOT NULL,
            upload_file_size INTEGER NOT NULL DEFAULT 0,
            use_metadata_convention INTEGER NOT NULL DEFAULT 0,
            raw_counts INTEGER NOT NULL DEFAULT 0,
            matrix_cells TEXT NOT NULL DEFAULT '[]',
            analysis_name TEXT,
            visualization_name TEXT,
            parse_claimed_at TEXT,
            remote_job_name TEXT,
            remote_confirmed_at TEXT,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS bundle_staging (
            child_file_id TEXT PRIMARY KEY,
            parent_type TEXT NOT NULL,
            staging_key TEXT NOT NULL,
            parent_file_id TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS bundles (
            id TEXT PRIMARY KEY,
            study_id TEXT NOT NULL,
            parent_file_id TEXT NOT NULL UNIQUE,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS cluster_groups (
            id TEXT PRIMARY KEY,
            study_id TEXT NOT NULL,
            study_file_id TEXT NOT NULL,
            name TEXT NOT NULL,
            cells TEXT NOT NULL DEFAULT '[]'
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS annotations (
            id TEXT PRIMARY KEY,
            study_id TEXT NOT NULL,
            cluster_group_id TEXT,
            name TEXT NOT NULL,
            annotation_type TEXT NOT NULL,
            cell_values TEXT NOT NULL DEFAULT '{}'
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS de_results (
            id TEXT PRIMARY KEY,
            study_id TEXT NOT NULL,
            cluster_group_id TEXT NOT NULL,
            cluster_name TEXT NOT NULL,
            annotation_name TEXT NOT NULL,
            annotation_scope TEXT NOT NULL,
            is_author_de INTEGER NOT NULL DEFAULT 0,
            one_vs_rest_comparisons TEXT NOT NULL DEFAULT '[]',
            pairwise_comparisons TEXT NOT NULL DEFAULT '{}'
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS anndata_info (
            study_file_id TEXT PRIMARY KEY,
            reference_file INTEGER NOT NULL DEFAULT 0,
            obsm_keys TEXT NOT NULL DEFAULT '[]',
            raw_location TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    tracing::info!("Database tables initialized");

    Ok(())
}

pub(crate) fn parse_uuid(value: &str, column: &str) -> Result<Uuid> {
    Uuid::parse_str(value)
        .map_err(|e| Error::Internal(format!("Failed to parse {}: {}", column, e)))
}

pub(crate) fn parse_optional_uuid(value: Option<String>, column: &str) -> Result<Option<Uuid>> {
    value.map(|v| parse_uuid(&v, column)).transpose()
}

pub(crate) fn parse_timestamp(value: &str, column: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::Internal(format!("Failed to parse {}: {}", column, e)))
}

pub(crate) fn parse_optional_timestamp(
    value: Option<String>,
    column: &str,
) -> Result<Option<DateTime<Utc>>> {
    value.map(|v| parse_timestamp(&v, column)).transpose()
}

pub(crate) fn to_json<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    Ok(serde_json::to_string(value)?)
}

pub(crate) fn from_json<T: DeserializeOwned>(value: &str) -> Result<T> {
    Ok(serde_json::from_str(value)?)
}
