//! Study file types and parse status

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Closed set of study file types
///
/// Serialized with the display names stored in the database
/// (e.g. `"MM Coordinate Matrix"`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum FileType {
    #[serde(rename = "Cluster")]
    Cluster,
    #[serde(rename = "Expression Matrix")]
    ExpressionMatrix,
    #[serde(rename = "MM Coordinate Matrix")]
    MmCoordinateMatrix,
    #[serde(rename = "10X Genes File")]
    TenXGenes,
    #[serde(rename = "10X Barcodes File")]
    TenXBarcodes,
    #[serde(rename = "Coordinate Labels")]
    CoordinateLabels,
    #[serde(rename = "Metadata")]
    Metadata,
    #[serde(rename = "Gene List")]
    GeneList,
    #[serde(rename = "AnnData")]
    AnnData,
    #[serde(rename = "Differential Expression")]
    DifferentialExpression,
    #[serde(rename = "Analysis Output")]
    AnalysisOutput,
    #[serde(rename = "BAM")]
    Bam,
    #[serde(rename = "BAM Index")]
    BamIndex,
    #[serde(rename = "BED")]
    Bed,
    #[serde(rename = "Tab Index")]
    TabIndex,
    #[serde(rename = "Seurat")]
    Seurat,
    #[serde(rename = "Documentation")]
    Documentation,
    #[serde(rename = "Other")]
    Other,
}

impl FileType {
    pub const ALL: [FileType; 18] = [
        FileType::Cluster,
        FileType::ExpressionMatrix,
        FileType::MmCoordinateMatrix,
        FileType::TenXGenes,
        FileType::TenXBarcodes,
        FileType::CoordinateLabels,
        FileType::Metadata,
        FileType::GeneList,
        FileType::AnnData,
        FileType::DifferentialExpression,
        FileType::AnalysisOutput,
        FileType::Bam,
        FileType::BamIndex,
        FileType::Bed,
        FileType::TabIndex,
        FileType::Seurat,
        FileType::Documentation,
        FileType::Other,
    ];

    /// Name as stored and shown to users
    pub fn as_str(&self) -> &'static str {
        match self {
            FileType::Cluster => "Cluster",
            FileType::ExpressionMatrix => "Expression Matrix",
            FileType::MmCoordinateMatrix => "MM Coordinate Matrix",
            FileType::TenXGenes => "10X Genes File",
            FileType::TenXBarcodes => "10X Barcodes File",
            FileType::CoordinateLabels => "Coordinate Labels",
            FileType::Metadata => "Metadata",
            FileType::GeneList => "Gene List",
            FileType::AnnData => "AnnData",
            FileType::DifferentialExpression => "Differential Expression",
            FileType::AnalysisOutput => "Analysis Output",
            FileType::Bam => "BAM",
            FileType::BamIndex => "BAM Index",
            FileType::Bed => "BED",
            FileType::TabIndex => "Tab Index",
            FileType::Seurat => "Seurat",
            FileType::Documentation => "Documentation",
            FileType::Other => "Other",
        }
    }

    /// Whether files of this type can be dispatched for parsing
    pub fn is_parseable(&self) -> bool {
        matches!(
            self,
            FileType::Cluster
                | FileType::ExpressionMatrix
                | FileType::MmCoordinateMatrix
                | FileType::TenXGenes
                | FileType::TenXBarcodes
                | FileType::CoordinateLabels
                | FileType::Metadata
                | FileType::GeneList
                | FileType::AnnData
                | FileType::DifferentialExpression
                | FileType::AnalysisOutput
        )
    }

    /// Matrix formats that can serve as a raw counts source
    pub fn is_expression_matrix(&self) -> bool {
        matches!(
            self,
            FileType::ExpressionMatrix | FileType::MmCoordinateMatrix | FileType::AnnData
        )
    }
}

impl fmt::Display for FileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FileType {
    type Err = scp_common::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        FileType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| scp_common::Error::InvalidInput(format!("Unknown file type: {}", s)))
    }
}

/// Parse lifecycle of a study file
///
/// `new → uploading → uploaded → parsing → {parsed, failed}`; `parsing` may
/// be re-entered from `parsed` or `failed` on reparse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParseStatus {
    New,
    Uploading,
    Uploaded,
    Parsing,
    Parsed,
    Failed,
}

impl ParseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParseStatus::New => "new",
            ParseStatus::Uploading => "uploading",
            ParseStatus::Uploaded => "uploaded",
            ParseStatus::Parsing => "parsing",
            ParseStatus::Parsed => "parsed",
            ParseStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for ParseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ParseStatus {
    type Err = scp_common::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "new" => Ok(ParseStatus::New),
            "uploading" => Ok(ParseStatus::Uploading),
            "uploaded" => Ok(ParseStatus::Uploaded),
            "parsing" => Ok(ParseStatus::Parsing),
            "parsed" => Ok(ParseStatus::Parsed),
            "failed" => Ok(ParseStatus::Failed),
            other => Err(scp_common::Error::InvalidInput(format!(
                "Unknown parse status: {}",
                other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_type_names_round_trip() {
        for file_type in FileType::ALL {
            assert_eq!(file_type.as_str().parse::<FileType>().unwrap(), file_type);
        }
        assert!("Spreadsheet".parse::<FileType>().is_err());
    }

    #[test]
    fn test_serde_uses_display_names() {
        let json = serde_json::to_string(&FileType::TenXBarcodes).unwrap();
        assert_eq!(json, "\"10X Barcodes File\"");
    }

    #[test]
    fn test_parseable_types() {
        assert!(FileType::Cluster.is_parseable());
        assert!(FileType::TenXGenes.is_parseable());
        assert!(!FileType::Bam.is_parseable());
        assert!(!FileType::BamIndex.is_parseable());
        assert!(!FileType::Documentation.is_parseable());
    }
}
