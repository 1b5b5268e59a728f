//! Bundle and staged association persistence

use chrono::Utc;
use scp_common::{Error, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use super::files::{list_bundle_files, load_study_file, set_bundle_id};
use super::parse_uuid;
use crate::models::{Bundle, StagedAssociation};

/// Record (or replace) the parent a child file was uploaded against
pub async fn stage_association(pool: &SqlitePool, association: &StagedAssociation) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO bundle_staging (child_file_id, parent_type, staging_key, parent_file_id)
        VALUES (?, ?, ?, ?)
        ON CONFLICT(child_file_id) DO UPDATE SET
            parent_type = excluded.parent_type,
            staging_key = excluded.staging_key,
            parent_file_id = excluded.parent_file_id
        "#,
    )
    .bind(association.child_file_id.to_string())
    .bind(association.parent_type.as_str())
    .bind(association.staging_key.as_str())
    .bind(association.parent_file_id.to_string())
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn load_staged_association(
    pool: &SqlitePool,
    child_file_id: Uuid,
) -> Result<Option<StagedAssociation>> {
    let row = sqlx::query(
        "SELECT child_file_id, parent_type, staging_key, parent_file_id FROM bundle_staging WHERE child_file_id = ?",
    )
    .bind(child_file_id.to_string())
    .fetch_optional(pool)
    .await?;

    row.map(|r| association_from_row(&r)).transpose()
}

/// Associations naming `parent_file_id` as their parent
pub async fn list_staged_children(
    pool: &SqlitePool,
    parent_file_id: Uuid,
) -> Result<Vec<StagedAssociation>> {
    let rows = sqlx::query(
        "SELECT child_file_id, parent_type, staging_key, parent_file_id FROM bundle_staging WHERE parent_file_id = ?",
    )
    .bind(parent_file_id.to_string())
    .fetch_all(pool)
    .await?;

    rows.iter().map(association_from_row).collect()
}

/// Id of the parent's bundle, creating it when absent
///
/// `parent_file_id` is unique, so concurrent callers converge on one row.
pub async fn get_or_create_bundle(
    pool: &SqlitePool,
    study_id: Uuid,
    parent_file_id: Uuid,
) -> Result<Uuid> {
    sqlx::query(
        "INSERT OR IGNORE INTO bundles (id, study_id, parent_file_id, created_at) VALUES (?, ?, ?, ?)",
    )
    .bind(Uuid::new_v4().to_string())
    .bind(study_id.to_string())
    .bind(parent_file_id.to_string())
    .bind(Utc::now().to_rfc3339())
    .execute(pool)
    .await?;

    let id: String = sqlx::query_scalar("SELECT id FROM bundles WHERE parent_file_id = ?")
        .bind(parent_file_id.to_string())
        .fetch_one(pool)
        .await?;
    let bundle_id = parse_uuid(&id, "bundles.id")?;

    set_bundle_id(pool, parent_file_id, bundle_id).await?;
    Ok(bundle_id)
}

/// Load a bundle with its parent and every attached child
pub async fn load_bundle(pool: &SqlitePool, bundle_id: Uuid) -> Result<Option<Bundle>> {
    let row = sqlx::query("SELECT id, study_id, parent_file_id FROM bundles WHERE id = ?")
        .bind(bundle_id.to_string())
        .fetch_optional(pool)
        .await?;

    let Some(row) = row else {
        return Ok(None);
    };
    let study_id: String = row.get("study_id");
    let parent_file_id: String = row.get("parent_file_id");
    let parent_file_id = parse_uuid(&parent_file_id, "bundles.parent_file_id")?;

    let parent = load_study_file(pool, parent_file_id).await?.ok_or_else(|| {
        Error::NotFound(format!("Bundle {} parent file {}", bundle_id, parent_file_id))
    })?;
    let children = list_bundle_files(pool, bundle_id)
        .await?
        .into_iter()
        .filter(|f| f.id != parent_file_id)
        .collect();

    Ok(Some(Bundle {
        id: bundle_id,
        study_id: parse_uuid(&study_id, "bundles.study_id")?,
        parent,
        children,
    }))
}

fn association_from_row(row: &SqliteRow) -> Result<StagedAssociation> {
    let child: String = row.get("child_file_id");
    let parent_type: String = row.get("parent_type");
    let staging_key: String = row.get("staging_key");
    let parent: String = row.get("parent_file_id");

    Ok(StagedAssociation {
        child_file_id: parse_uuid(&child, "bundle_staging.child_file_id")?,
        parent_type: parent_type.parse()?,
        staging_key: staging_key.parse()?,
        parent_file_id: parse_uuid(&parent, "bundle_staging.parent_file_id")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::files::save_study_file;
    use crate::db::init_memory_pool;
    use crate::models::{FileType, StudyFile};

    #[tokio::test]
    async fn test_get_or_create_is_unique_per_parent() {
        let pool = init_memory_pool().await.unwrap();
        let study_id = Uuid::new_v4();
        let parent = StudyFile::new(study_id, "reads.bam", FileType::Bam);
        save_study_file(&pool, &parent).await.unwrap();

        let first = get_or_create_bundle(&pool, study_id, parent.id).await.unwrap();
        let second = get_or_create_bundle(&pool, study_id, parent.id).await.unwrap();
        assert_eq!(first, second);

        let bundle = load_bundle(&pool, first).await.unwrap().unwrap();
        assert_eq!(bundle.parent.id, parent.id);
        assert_eq!(bundle.parent.bundle_id, Some(first));
        assert!(bundle.children.is_empty());
    }
}
