//! Multi-file bundles
//!
//! A bundle groups a parent file with the companion files it needs before it
//! can be parsed (a sparse matrix with its genes and barcodes files, a BAM
//! with its index). Companions may be uploaded before or after the parent, so
//! a child records the parent it belongs to in a staged association until the
//! bundle itself exists.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::file_type::FileType;
use super::study_file::StudyFile;

/// Key under which a child names its parent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StagingKey {
    BamId,
    MatrixId,
    ClusterFileId,
    BedId,
}

impl StagingKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            StagingKey::BamId => "bam_id",
            StagingKey::MatrixId => "matrix_id",
            StagingKey::ClusterFileId => "cluster_file_id",
            StagingKey::BedId => "bed_id",
        }
    }
}

impl fmt::Display for StagingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StagingKey {
    type Err = scp_common::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "bam_id" => Ok(StagingKey::BamId),
            "matrix_id" => Ok(StagingKey::MatrixId),
            "cluster_file_id" => Ok(StagingKey::ClusterFileId),
            "bed_id" => Ok(StagingKey::BedId),
            other => Err(scp_common::Error::InvalidInput(format!(
                "Unknown staging key: {}",
                other
            ))),
        }
    }
}

/// Which child types a parent type requires
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BundleRequirement {
    pub parent: FileType,
    pub children: &'static [FileType],
    pub staging_key: StagingKey,
}

pub const BUNDLE_REQUIREMENTS: &[BundleRequirement] = &[
    BundleRequirement {
        parent: FileType::Bam,
        children: &[FileType::BamIndex],
        staging_key: StagingKey::BamId,
    },
    BundleRequirement {
        parent: FileType::MmCoordinateMatrix,
        children: &[FileType::TenXGenes, FileType::TenXBarcodes],
        staging_key: StagingKey::MatrixId,
    },
    BundleRequirement {
        parent: FileType::Cluster,
        children: &[FileType::CoordinateLabels],
        staging_key: StagingKey::ClusterFileId,
    },
    BundleRequirement {
        parent: FileType::Bed,
        children: &[FileType::TabIndex],
        staging_key: StagingKey::BedId,
    },
];

impl BundleRequirement {
    /// Requirement where `file_type` is the parent
    pub fn for_parent(file_type: FileType) -> Option<&'static BundleRequirement> {
        BUNDLE_REQUIREMENTS.iter().find(|r| r.parent == file_type)
    }

    /// Requirement where `file_type` is an allowed child
    pub fn for_child(file_type: FileType) -> Option<&'static BundleRequirement> {
        BUNDLE_REQUIREMENTS
            .iter()
            .find(|r| r.children.contains(&file_type))
    }

    /// Requirement that `file_type` participates in, as parent or child
    pub fn involving(file_type: FileType) -> Option<&'static BundleRequirement> {
        Self::for_parent(file_type).or_else(|| Self::for_child(file_type))
    }

    pub fn allows_child(&self, file_type: FileType) -> bool {
        self.children.contains(&file_type)
    }

    /// Human-readable list of required companion types
    pub fn describe(&self) -> String {
        let children: Vec<&str> = self.children.iter().map(|t| t.as_str()).collect();
        format!("{} requires {}", self.parent, children.join(", "))
    }
}

/// A child's declared parent, recorded before the bundle exists
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StagedAssociation {
    pub child_file_id: Uuid,
    pub parent_type: FileType,
    pub staging_key: StagingKey,
    pub parent_file_id: Uuid,
}

impl StagedAssociation {
    /// Build an association for `child`, validated against the requirement table
    pub fn for_child(child: &StudyFile, parent_file_id: Uuid) -> scp_common::Result<Self> {
        let requirement = BundleRequirement::for_child(child.file_type).ok_or_else(|| {
            scp_common::Error::InvalidInput(format!(
                "{} files cannot be bundled with a parent",
                child.file_type
            ))
        })?;
        Ok(Self {
            child_file_id: child.id,
            parent_type: requirement.parent,
            staging_key: requirement.staging_key,
            parent_file_id,
        })
    }
}

/// A resolved bundle: parent plus attached children
#[derive(Debug, Clone)]
pub struct Bundle {
    pub id: Uuid,
    pub study_id: Uuid,
    pub parent: StudyFile,
    pub children: Vec<StudyFile>,
}

impl Bundle {
    pub fn requirement(&self) -> Option<&'static BundleRequirement> {
        BundleRequirement::for_parent(self.parent.file_type)
    }

    /// Children not queued for deletion
    pub fn live_children(&self) -> impl Iterator<Item = &StudyFile> {
        self.children.iter().filter(|f| !f.queued_for_deletion)
    }

    /// Required child types with no live member
    pub fn missing_types(&self) -> Vec<FileType> {
        match self.requirement() {
            Some(requirement) => requirement
                .children
                .iter()
                .copied()
                .filter(|t| !self.live_children().any(|f| f.file_type == *t))
                .collect(),
            None => Vec::new(),
        }
    }

    /// Complete once every required child type is present and the parent is live
    pub fn is_complete(&self) -> bool {
        !self.parent.queued_for_deletion && self.requirement().is_some() && self.missing_types().is_empty()
    }

    /// Parent followed by live children
    pub fn members(&self) -> Vec<&StudyFile> {
        std::iter::once(&self.parent)
            .chain(self.live_children())
            .collect()
    }

    pub fn children_of_type(&self, file_type: FileType) -> Vec<&StudyFile> {
        self.live_children()
            .filter(|f| f.file_type == file_type)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bundle_with(parent: FileType, children: &[FileType]) -> Bundle {
        let study_id = Uuid::new_v4();
        let parent = StudyFile::new(study_id, "parent", parent);
        Bundle {
            id: Uuid::new_v4(),
            study_id,
            children: children
                .iter()
                .map(|t| StudyFile::new(study_id, format!("{}", t), *t))
                .collect(),
            parent,
        }
    }

    #[test]
    fn test_requirement_lookup_both_directions() {
        let req = BundleRequirement::for_parent(FileType::MmCoordinateMatrix).unwrap();
        assert_eq!(req.staging_key, StagingKey::MatrixId);
        assert!(req.allows_child(FileType::TenXGenes));

        let req = BundleRequirement::for_child(FileType::BamIndex).unwrap();
        assert_eq!(req.parent, FileType::Bam);

        assert!(BundleRequirement::involving(FileType::Metadata).is_none());
        assert_eq!(
            BundleRequirement::involving(FileType::TabIndex).unwrap().parent,
            FileType::Bed
        );
    }

    #[test]
    fn test_completeness_requires_every_child_type() {
        let partial = bundle_with(FileType::MmCoordinateMatrix, &[FileType::TenXGenes]);
        assert!(!partial.is_complete());
        assert_eq!(partial.missing_types(), vec![FileType::TenXBarcodes]);

        let full = bundle_with(
            FileType::MmCoordinateMatrix,
            &[FileType::TenXGenes, FileType::TenXBarcodes],
        );
        assert!(full.is_complete());
        assert_eq!(full.members().len(), 3);
    }

    #[test]
    fn test_queued_children_do_not_count() {
        let mut bundle = bundle_with(
            FileType::MmCoordinateMatrix,
            &[FileType::TenXGenes, FileType::TenXBarcodes],
        );
        bundle.children[1].queued_for_deletion = true;
        assert!(!bundle.is_complete());
        assert_eq!(bundle.members().len(), 2);
    }

    #[test]
    fn test_staged_association_rejects_non_child_types() {
        let study_id = Uuid::new_v4();
        let metadata = StudyFile::new(study_id, "meta.txt", FileType::Metadata);
        assert!(StagedAssociation::for_child(&metadata, Uuid::new_v4()).is_err());

        let labels = StudyFile::new(study_id, "labels.txt", FileType::CoordinateLabels);
        let assoc = StagedAssociation::for_child(&labels, Uuid::new_v4()).unwrap();
        assert_eq!(assoc.parent_type, FileType::Cluster);
        assert_eq!(assoc.staging_key, StagingKey::ClusterFileId);
    }
}
