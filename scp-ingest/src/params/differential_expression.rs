//! Differential expression job parameters

use serde::{Deserialize, Serialize};

use crate::models::AnnotationScope;

use super::{Errors, ParameterObject, Tokens};

/// Storage format of the raw counts matrix
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatrixFileType {
    Dense,
    Mtx,
    H5ad,
}

impl MatrixFileType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatrixFileType::Dense => "dense",
            MatrixFileType::Mtx => "mtx",
            MatrixFileType::H5ad => "h5ad",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeType {
    /// Each label against all other cells
    Rest,
    /// Two named groups against each other
    Pairwise,
}

impl DeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeType::Rest => "rest",
            DeType::Pairwise => "pairwise",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DifferentialExpressionParameters {
    pub annotation_name: String,
    pub annotation_scope: AnnotationScope,
    pub de_type: DeType,
    pub group1: Option<String>,
    pub group2: Option<String>,
    pub annotation_file: String,
    pub cluster_file: String,
    pub cluster_name: String,
    pub matrix_file_path: String,
    pub matrix_file_type: MatrixFileType,
    pub gene_file: Option<String>,
    pub barcode_file: Option<String>,
    /// Byte size hint for h5ad matrices
    pub file_size: Option<i64>,
    pub raw_location: Option<String>,
    pub machine_type: String,
}

impl ParameterObject for DifferentialExpressionParameters {
    fn to_options_array(&self) -> Vec<String> {
        Tokens::new()
            .value("--annotation-name", &self.annotation_name)
            .value("--annotation-scope", self.annotation_scope.as_str())
            .value("--de-type", self.de_type.as_str())
            .optional("--group1", self.group1.as_ref())
            .optional("--group2", self.group2.as_ref())
            .value("--annotation-file", &self.annotation_file)
            .value("--cluster-file", &self.cluster_file)
            .value("--cluster-name", &self.cluster_name)
            .value("--matrix-file-path", &self.matrix_file_path)
            .value("--matrix-file-type", self.matrix_file_type.as_str())
            .optional("--gene-file", self.gene_file.as_ref())
            .optional("--barcode-file", self.barcode_file.as_ref())
            .optional("--file-size", self.file_size)
            .optional("--raw-location", self.raw_location.as_ref())
            .build()
    }

    fn validate(&self) -> Vec<String> {
        let mut errors = Errors::new();
        errors.present("annotation_name", &self.annotation_name);
        errors.gs_url("annotation_file", &self.annotation_file);
        errors.gs_url("cluster_file", &self.cluster_file);
        errors.present("cluster_name", &self.cluster_name);
        errors.gs_url("matrix_file_path", &self.matrix_file_path);
        errors.present("machine_type", &self.machine_type);

        match self.de_type {
            DeType::Pairwise => {
                errors.present("group1", self.group1.as_deref().unwrap_or_default());
                errors.present("group2", self.group2.as_deref().unwrap_or_default());
                errors.check(
                    self.group1.is_none() || self.group1 != self.group2,
                    "group1 and group2 must differ",
                );
            }
            DeType::Rest => {
                errors.check(
                    self.group1.is_none() && self.group2.is_none(),
                    "groups are only allowed for pairwise comparisons",
                );
            }
        }

        match self.matrix_file_type {
            MatrixFileType::Mtx => {
                errors.gs_url("gene_file", self.gene_file.as_deref().unwrap_or_default());
                errors.gs_url("barcode_file", self.barcode_file.as_deref().unwrap_or_default());
            }
            MatrixFileType::H5ad => {
                errors.check(
                    self.file_size.is_some_and(|s| s > 0),
                    "file_size must be positive for h5ad matrices",
                );
                errors.present("raw_location", self.raw_location.as_deref().unwrap_or_default());
            }
            MatrixFileType::Dense => {}
        }
        errors.into_vec()
    }
}
