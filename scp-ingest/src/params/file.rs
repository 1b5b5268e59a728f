//! Parameters for whole-file ingest actions

use serde::{Deserialize, Serialize};

use super::differential_expression::MatrixFileType;
use super::{Errors, ParameterObject, Tokens};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterIngestParameters {
    pub cluster_file: String,
    pub name: String,
}

impl ParameterObject for ClusterIngestParameters {
    fn to_options_array(&self) -> Vec<String> {
        Tokens::new()
            .value("--cluster-file", &self.cluster_file)
            .value("--name", &self.name)
            .build()
    }

    fn validate(&self) -> Vec<String> {
        let mut errors = Errors::new();
        errors.gs_url("cluster_file", &self.cluster_file);
        errors.present("name", &self.name);
        errors.into_vec()
    }
}

/// Dense or sparse expression matrix
///
/// Sparse (`mtx`) matrices carry their genes and barcodes companion files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpressionIngestParameters {
    pub matrix_file: String,
    pub matrix_file_type: MatrixFileType,
    pub gene_file: Option<String>,
    pub barcode_file: Option<String>,
}

impl ParameterObject for ExpressionIngestParameters {
    fn to_options_array(&self) -> Vec<String> {
        Tokens::new()
            .value("--matrix-file", &self.matrix_file)
            .value("--matrix-file-type", self.matrix_file_type.as_str())
            .optional("--gene-file", self.gene_file.as_ref())
            .optional("--barcode-file", self.barcode_file.as_ref())
            .build()
    }

    fn validate(&self) -> Vec<String> {
        let mut errors = Errors::new();
        errors.gs_url("matrix_file", &self.matrix_file);
        match self.matrix_file_type {
            MatrixFileType::Mtx => {
                errors.gs_url("gene_file", self.gene_file.as_deref().unwrap_or_default());
                errors.gs_url("barcode_file", self.barcode_file.as_deref().unwrap_or_default());
            }
            MatrixFileType::Dense => {
                errors.check(
                    self.gene_file.is_none() && self.barcode_file.is_none(),
                    "dense matrices do not take gene or barcode files",
                );
            }
            MatrixFileType::H5ad => {
                errors.check(false, "h5ad matrices are ingested through the AnnData action");
            }
        }
        errors.into_vec()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CellMetadataIngestParameters {
    pub cell_metadata_file: String,
    pub study_accession: String,
    /// Validate against the canonical metadata convention
    pub validate_convention: bool,
}

impl ParameterObject for CellMetadataIngestParameters {
    fn to_options_array(&self) -> Vec<String> {
        Tokens::new()
            .value("--cell-metadata-file", &self.cell_metadata_file)
            .value("--study-accession", &self.study_accession)
            .flag("--validate-convention", self.validate_convention)
            .build()
    }

    fn validate(&self) -> Vec<String> {
        let mut errors = Errors::new();
        errors.gs_url("cell_metadata_file", &self.cell_metadata_file);
        errors.present("study_accession", &self.study_accession);
        errors.into_vec()
    }
}

/// Text labels positioned in a clustering's coordinate space
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoordinateLabelIngestParameters {
    pub coordinate_file: String,
    pub cluster_file: String,
    pub cluster_name: String,
}

impl ParameterObject for CoordinateLabelIngestParameters {
    fn to_options_array(&self) -> Vec<String> {
        Tokens::new()
            .value("--coordinate-file", &self.coordinate_file)
            .value("--cluster-file", &self.cluster_file)
            .value("--cluster-name", &self.cluster_name)
            .build()
    }

    fn validate(&self) -> Vec<String> {
        let mut errors = Errors::new();
        errors.gs_url("coordinate_file", &self.coordinate_file);
        errors.gs_url("cluster_file", &self.cluster_file);
        errors.present("cluster_name", &self.cluster_name);
        errors.into_vec()
    }
}

/// Author-uploaded differential expression table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthorDeIngestParameters {
    pub differential_expression_file: String,
    pub study_accession: String,
}

impl ParameterObject for AuthorDeIngestParameters {
    fn to_options_array(&self) -> Vec<String> {
        Tokens::new()
            .value("--differential-expression-file", &self.differential_expression_file)
            .value("--study-accession", &self.study_accession)
            .build()
    }

    fn validate(&self) -> Vec<String> {
        let mut errors = Errors::new();
        errors.gs_url("differential_expression_file", &self.differential_expression_file);
        errors.present("study_accession", &self.study_accession);
        errors.into_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sparse_matrix_requires_companions() {
        let mut params = ExpressionIngestParameters {
            matrix_file: "gs://bucket/matrix.mtx".to_string(),
            matrix_file_type: MatrixFileType::Mtx,
            gene_file: Some("gs://bucket/genes.tsv".to_string()),
            barcode_file: None,
        };
        assert_eq!(params.validate(), vec!["barcode_file can't be blank".to_string()]);

        params.barcode_file = Some("gs://bucket/barcodes.tsv".to_string());
        assert!(params.is_valid());
        assert_eq!(
            params.to_options_array(),
            vec![
                "--matrix-file",
                "gs://bucket/matrix.mtx",
                "--matrix-file-type",
                "mtx",
                "--gene-file",
                "gs://bucket/genes.tsv",
                "--barcode-file",
                "gs://bucket/barcodes.tsv",
            ]
        );
    }

    #[test]
    fn test_dense_matrix_rejects_companions() {
        let params = ExpressionIngestParameters {
            matrix_file: "gs://bucket/dense.txt".to_string(),
            matrix_file_type: MatrixFileType::Dense,
            gene_file: Some("gs://bucket/genes.tsv".to_string()),
            barcode_file: None,
        };
        assert!(!params.is_valid());
    }

    #[test]
    fn test_metadata_convention_flag() {
        let params = CellMetadataIngestParameters {
            cell_metadata_file: "gs://bucket/metadata.txt".to_string(),
            study_accession: "SCP12".to_string(),
            validate_convention: false,
        };
        assert!(!params
            .to_options_array()
            .contains(&"--validate-convention".to_string()));
    }
}
