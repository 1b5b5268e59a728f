//! AnnData sidecar persistence

use scp_common::Result;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use super::{from_json, to_json};
use crate::models::AnnDataInfo;

pub async fn save_anndata_info(pool: &SqlitePool, info: &AnnDataInfo) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO anndata_info (study_file_id, reference_file, obsm_keys, raw_location)
        VALUES (?, ?, ?, ?)
        ON CONFLICT(study_file_id) DO UPDATE SET
            reference_file = excluded.reference_file,
            obsm_keys = excluded.obsm_keys,
            raw_location = excluded.raw_location
        "#,
    )
    .bind(info.study_file_id.to_string())
    .bind(info.reference_file)
    .bind(to_json(&info.obsm_keys)?)
    .bind(&info.raw_location)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn load_anndata_info(pool: &SqlitePool, study_file_id: Uuid) -> Result<Option<AnnDataInfo>> {
    let row = sqlx::query(
        "SELECT reference_file, obsm_keys, raw_location FROM anndata_info WHERE study_file_id = ?",
    )
    .bind(study_file_id.to_string())
    .fetch_optional(pool)
    .await?;

    match row {
        Some(row) => {
            let obsm_keys: String = row.get("obsm_keys");
            Ok(Some(AnnDataInfo {
                study_file_id,
                reference_file: row.get("reference_file"),
                obsm_keys: from_json(&obsm_keys)?,
                raw_location: row.get("raw_location"),
            }))
        }
        None => Ok(None),
    }
}

/// Load the sidecar, creating a default one when the upload has none
pub async fn ensure_anndata_info(pool: &SqlitePool, study_file_id: Uuid) -> Result<AnnDataInfo> {
    if let Some(info) = load_anndata_info(pool, study_file_id).await? {
        return Ok(info);
    }
    let info = AnnDataInfo::new(study_file_id);
    save_anndata_info(pool, &info).await?;
    tracing::debug!(file_id = %study_file_id, "Created default AnnData info");
    Ok(info)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_memory_pool;
    use crate::models::DEFAULT_OBSM_KEY;

    #[tokio::test]
    async fn test_ensure_creates_default_once() {
        let pool = init_memory_pool().await.unwrap();
        let file_id = Uuid::new_v4();

        let created = ensure_anndata_info(&pool, file_id).await.unwrap();
        assert_eq!(created.obsm_keys, vec![DEFAULT_OBSM_KEY.to_string()]);

        let mut edited = created.clone();
        edited.raw_location = Some(".raw".to_string());
        save_anndata_info(&pool, &edited).await.unwrap();

        let again = ensure_anndata_info(&pool, file_id).await.unwrap();
        assert_eq!(again, edited);
    }
}
