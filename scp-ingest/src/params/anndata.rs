//! AnnData extraction parameters

use serde::{Deserialize, Serialize};

use super::{Errors, ParameterObject, Tokens};

/// Data that can be extracted from an AnnData container
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnnDataExtract {
    Cluster,
    Metadata,
    ProcessedExpression,
    RawCounts,
}

impl AnnDataExtract {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnnDataExtract::Cluster => "cluster",
            AnnDataExtract::Metadata => "metadata",
            AnnDataExtract::ProcessedExpression => "processed_expression",
            AnnDataExtract::RawCounts => "raw_counts",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnDataIngestParameters {
    pub anndata_file: String,
    pub extract: Vec<AnnDataExtract>,
    pub obsm_keys: Vec<String>,
    /// Where raw counts live inside the container (`.raw` or a layer name)
    pub raw_location: Option<String>,
    pub file_size: i64,
}

impl AnnDataIngestParameters {
    /// Re-extract one clustering from a single obsm key
    pub fn clustering(anndata_file: String, obsm_key: String, file_size: i64) -> Self {
        Self {
            anndata_file,
            extract: vec![AnnDataExtract::Cluster],
            obsm_keys: vec![obsm_key],
            raw_location: None,
            file_size,
        }
    }

    /// Extract only the raw counts matrix
    pub fn raw_counts(anndata_file: String, raw_location: Option<String>, file_size: i64) -> Self {
        Self {
            anndata_file,
            extract: vec![AnnDataExtract::RawCounts],
            obsm_keys: Vec::new(),
            raw_location,
            file_size,
        }
    }

    /// Extract every clustering, the metadata, processed expression and raw
    /// counts when their location is known
    pub fn full(
        anndata_file: String,
        obsm_keys: Vec<String>,
        raw_location: Option<String>,
        file_size: i64,
    ) -> Self {
        let mut extract = vec![
            AnnDataExtract::Cluster,
            AnnDataExtract::Metadata,
            AnnDataExtract::ProcessedExpression,
        ];
        if raw_location.is_some() {
            extract.push(AnnDataExtract::RawCounts);
        }
        Self {
            anndata_file,
            extract,
            obsm_keys,
            raw_location,
            file_size,
        }
    }

    pub fn extracts(&self, what: AnnDataExtract) -> bool {
        self.extract.contains(&what)
    }
}

impl ParameterObject for AnnDataIngestParameters {
    fn to_options_array(&self) -> Vec<String> {
        let extract: Vec<String> = self.extract.iter().map(|e| e.as_str().to_string()).collect();
        Tokens::new()
            .value("--anndata-file", &self.anndata_file)
            .list("--extract", &extract)
            .list("--obsm-keys", &self.obsm_keys)
            .optional("--raw-location", self.raw_location.as_ref())
            .value("--file-size", self.file_size)
            .build()
    }

    fn validate(&self) -> Vec<String> {
        let mut errors = Errors::new();
        errors.gs_url("anndata_file", &self.anndata_file);
        errors.check(!self.extract.is_empty(), "extract can't be blank");
        if self.extracts(AnnDataExtract::Cluster) {
            errors.check(
                !self.obsm_keys.is_empty(),
                "obsm_keys can't be blank when extracting clusterings",
            );
        }
        if self.extracts(AnnDataExtract::RawCounts) {
            errors.check(
                self.raw_location.as_deref().is_some_and(|l| !l.trim().is_empty()),
                "raw_location can't be blank when extracting raw counts",
            );
        }
        errors.check(self.file_size >= 0, "file_size must be non-negative");
        errors.into_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FILE: &str = "gs://bucket/data.h5ad";

    #[test]
    fn test_three_shapes_select_different_fields() {
        let clustering = AnnDataIngestParameters::clustering(FILE.to_string(), "X_umap".to_string(), 10);
        assert_eq!(clustering.extract, vec![AnnDataExtract::Cluster]);
        assert!(clustering.raw_location.is_none());
        assert!(clustering.is_valid());

        let raw = AnnDataIngestParameters::raw_counts(FILE.to_string(), Some(".raw".to_string()), 10);
        assert_eq!(raw.extract, vec![AnnDataExtract::RawCounts]);
        assert!(raw.obsm_keys.is_empty());
        assert!(raw.is_valid());

        let full = AnnDataIngestParameters::full(
            FILE.to_string(),
            vec!["X_umap".to_string(), "X_tsne".to_string()],
            None,
            10,
        );
        assert!(full.extracts(AnnDataExtract::ProcessedExpression));
        assert!(!full.extracts(AnnDataExtract::RawCounts));
        assert!(full.is_valid());
    }

    #[test]
    fn test_raw_counts_without_location_is_invalid() {
        let raw = AnnDataIngestParameters::raw_counts(FILE.to_string(), None, 10);
        assert_eq!(
            raw.validate(),
            vec!["raw_location can't be blank when extracting raw counts".to_string()]
        );
    }

    #[test]
    fn test_options_array() {
        let params = AnnDataIngestParameters::clustering(FILE.to_string(), "X_umap".to_string(), 2048);
        assert_eq!(
            params.to_options_array(),
            vec![
                "--anndata-file",
                FILE,
                "--extract",
                r#"["cluster"]"#,
                "--obsm-keys",
                r#"["X_umap"]"#,
                "--file-size",
                "2048",
            ]
        );
    }
}
