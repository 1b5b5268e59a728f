//! Job parameter objects
//!
//! Each job action carries a typed parameter object. Parameter objects
//! render to an ordered list of CLI-style tokens (the remote command line,
//! also used to detect duplicate running jobs) and report validation errors
//! as human-readable messages.

pub mod anndata;
pub mod differential_expression;
pub mod file;

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

pub use anndata::{AnnDataExtract, AnnDataIngestParameters};
pub use differential_expression::{DeType, DifferentialExpressionParameters, MatrixFileType};
pub use file::{
    AuthorDeIngestParameters, CellMetadataIngestParameters, ClusterIngestParameters,
    CoordinateLabelIngestParameters, ExpressionIngestParameters,
};

/// Contract shared by all parameter objects
pub trait ParameterObject {
    /// Ordered `--flag value` tokens
    fn to_options_array(&self) -> Vec<String>;

    /// Validation errors; empty when the object is valid
    fn validate(&self) -> Vec<String>;

    fn is_valid(&self) -> bool {
        self.validate().is_empty()
    }
}

/// Parameters for any job this orchestrator submits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IngestParameters {
    Cluster(ClusterIngestParameters),
    Expression(ExpressionIngestParameters),
    CellMetadata(CellMetadataIngestParameters),
    CoordinateLabels(CoordinateLabelIngestParameters),
    AnnData(AnnDataIngestParameters),
    AuthorDifferentialExpression(AuthorDeIngestParameters),
    DifferentialExpression(DifferentialExpressionParameters),
}

impl IngestParameters {
    fn inner(&self) -> &dyn ParameterObject {
        match self {
            IngestParameters::Cluster(p) => p,
            IngestParameters::Expression(p) => p,
            IngestParameters::CellMetadata(p) => p,
            IngestParameters::CoordinateLabels(p) => p,
            IngestParameters::AnnData(p) => p,
            IngestParameters::AuthorDifferentialExpression(p) => p,
            IngestParameters::DifferentialExpression(p) => p,
        }
    }
}

impl ParameterObject for IngestParameters {
    fn to_options_array(&self) -> Vec<String> {
        self.inner().to_options_array()
    }

    fn validate(&self) -> Vec<String> {
        self.inner().validate()
    }
}

/// Whether `value` is a `gs://bucket/path` URL
pub fn is_gs_url(value: &str) -> bool {
    static GS_URL: OnceLock<Option<Regex>> = OnceLock::new();
    GS_URL
        .get_or_init(|| Regex::new(r"^gs://[A-Za-z0-9_.\-]+/.+").ok())
        .as_ref()
        .is_some_and(|re| re.is_match(value))
}

/// Ordered token builder shared by parameter objects
#[derive(Debug, Default)]
pub(crate) struct Tokens(Vec<String>);

impl Tokens {
    pub(crate) fn new() -> Self {
        Self(Vec::new())
    }

    pub(crate) fn value(mut self, flag: &str, value: impl ToString) -> Self {
        self.0.push(flag.to_string());
        self.0.push(value.to_string());
        self
    }

    pub(crate) fn optional(self, flag: &str, value: Option<impl ToString>) -> Self {
        match value {
            Some(v) => self.value(flag, v),
            None => self,
        }
    }

    /// List values are passed as a JSON array in a single token
    pub(crate) fn list(self, flag: &str, values: &[String]) -> Self {
        if values.is_empty() {
            return self;
        }
        let json = serde_json::Value::from(values.to_vec()).to_string();
        self.value(flag, json)
    }

    pub(crate) fn flag(mut self, flag: &str, enabled: bool) -> Self {
        if enabled {
            self.0.push(flag.to_string());
        }
        self
    }

    pub(crate) fn build(self) -> Vec<String> {
        self.0
    }
}

/// Collects validation messages
#[derive(Debug, Default)]
pub(crate) struct Errors(Vec<String>);

impl Errors {
    pub(crate) fn new() -> Self {
        Self(Vec::new())
    }

    pub(crate) fn present(&mut self, field: &str, value: &str) {
        if value.trim().is_empty() {
            self.0.push(format!("{} can't be blank", field));
        }
    }

    pub(crate) fn gs_url(&mut self, field: &str, value: &str) {
        if value.trim().is_empty() {
            self.0.push(format!("{} can't be blank", field));
        } else if !is_gs_url(value) {
            self.0.push(format!("{} is not a valid gs:// URL: {}", field, value));
        }
    }

    pub(crate) fn check(&mut self, ok: bool, message: impl Into<String>) {
        if !ok {
            self.0.push(message.into());
        }
    }

    pub(crate) fn into_vec(self) -> Vec<String> {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gs_url_format() {
        assert!(is_gs_url("gs://fc-abc-123/cluster.tsv"));
        assert!(is_gs_url("gs://bucket/nested/path/matrix.mtx.gz"));
        assert!(!is_gs_url("https://storage.googleapis.com/bucket/file"));
        assert!(!is_gs_url("gs://bucket/"));
        assert!(!is_gs_url(""));
    }

    #[test]
    fn test_token_builder_ordering() {
        let tokens = Tokens::new()
            .value("--name", "UMAP")
            .optional("--gene-file", None::<String>)
            .list("--obsm-keys", &["X_umap".to_string(), "X_tsne".to_string()])
            .flag("--skip", false)
            .flag("--validate-convention", true)
            .build();
        assert_eq!(
            tokens,
            vec![
                "--name",
                "UMAP",
                "--obsm-keys",
                r#"["X_umap","X_tsne"]"#,
                "--validate-convention"
            ]
        );
    }

    #[test]
    fn test_enum_delegates_validation() {
        let params = IngestParameters::Cluster(ClusterIngestParameters {
            cluster_file: "not-a-url".to_string(),
            name: "UMAP".to_string(),
        });
        assert!(!params.is_valid());
        assert_eq!(params.validate().len(), 1);
    }
}
