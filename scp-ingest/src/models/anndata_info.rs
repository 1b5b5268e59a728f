//! AnnData sidecar

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// obsm key extracted when an AnnData upload does not name any
pub const DEFAULT_OBSM_KEY: &str = "X_umap";

/// Extraction settings recorded alongside an AnnData upload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnnDataInfo {
    pub study_file_id: Uuid,
    /// Reference-only uploads are stored but never extracted
    pub reference_file: bool,
    pub obsm_keys: Vec<String>,
    /// `.raw` or a layer name holding raw counts
    pub raw_location: Option<String>,
}

impl AnnDataInfo {
    pub fn new(study_file_id: Uuid) -> Self {
        Self {
            study_file_id,
            reference_file: false,
            obsm_keys: vec![DEFAULT_OBSM_KEY.to_string()],
            raw_location: None,
        }
    }

    pub fn has_raw_counts(&self) -> bool {
        self.raw_location
            .as_deref()
            .is_some_and(|l| !l.trim().is_empty())
    }
}
