//! Clusterings, annotations and annotation candidates

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use uuid::Uuid;

/// Where an annotation is defined
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnnotationScope {
    /// Study-wide cell metadata
    Study,
    /// Defined inside one cluster file
    Cluster,
}

impl AnnotationScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnnotationScope::Study => "study",
            AnnotationScope::Cluster => "cluster",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "study" => Some(AnnotationScope::Study),
            "cluster" => Some(AnnotationScope::Cluster),
            _ => None,
        }
    }
}

impl fmt::Display for AnnotationScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnnotationType {
    Group,
    Numeric,
}

impl AnnotationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnnotationType::Group => "group",
            AnnotationType::Numeric => "numeric",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "group" => Some(AnnotationType::Group),
            "numeric" => Some(AnnotationType::Numeric),
            _ => None,
        }
    }
}

/// A clustering parsed from a cluster file (or an AnnData obsm key)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterGroup {
    pub id: Uuid,
    pub study_id: Uuid,
    pub study_file_id: Uuid,
    pub name: String,
    pub cells: Vec<String>,
}

impl ClusterGroup {
    pub fn new(study_id: Uuid, study_file_id: Uuid, name: impl Into<String>, cells: Vec<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            study_id,
            study_file_id,
            name: name.into(),
            cells,
        }
    }
}

/// A per-cell annotation, either study-wide metadata or cluster-scoped
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Annotation {
    pub id: Uuid,
    pub study_id: Uuid,
    /// Set for cluster-scoped annotations
    pub cluster_group_id: Option<Uuid>,
    pub name: String,
    pub annotation_type: AnnotationType,
    /// Cell name to label
    pub cell_values: BTreeMap<String, String>,
}

impl Annotation {
    pub fn new(
        study_id: Uuid,
        cluster_group_id: Option<Uuid>,
        name: impl Into<String>,
        annotation_type: AnnotationType,
        cell_values: BTreeMap<String, String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            study_id,
            cluster_group_id,
            name: name.into(),
            annotation_type,
            cell_values,
        }
    }

    pub fn scope(&self) -> AnnotationScope {
        if self.cluster_group_id.is_some() {
            AnnotationScope::Cluster
        } else {
            AnnotationScope::Study
        }
    }

    pub fn is_group(&self) -> bool {
        self.annotation_type == AnnotationType::Group
    }

    /// Distinct labels across all cells
    pub fn values(&self) -> BTreeSet<&str> {
        self.cell_values.values().map(String::as_str).collect()
    }

    /// Distinct labels among the given cells
    pub fn values_for_cells<'a>(&'a self, cells: &[String]) -> BTreeSet<&'a str> {
        cells
            .iter()
            .filter_map(|cell| self.cell_values.get(cell))
            .map(String::as_str)
            .collect()
    }

    /// Number of the given cells carrying `label`
    pub fn count_cells_with(&self, cells: &[String], label: &str) -> usize {
        cells
            .iter()
            .filter(|cell| self.cell_values.get(*cell).map(String::as_str) == Some(label))
            .count()
    }

    /// Group annotations are drawable when their cardinality is within the threshold
    ///
    /// `overridden` lifts the threshold for annotations a study has explicitly allowed.
    pub fn can_visualize(&self, threshold: usize, overridden: bool) -> bool {
        if !self.is_group() {
            return true;
        }
        let cardinality = self.values().len();
        cardinality > 0 && (overridden || cardinality <= threshold)
    }
}

/// An annotation considered for differential expression
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AnnotationCandidate {
    pub name: String,
    pub scope: AnnotationScope,
    pub cluster_group_id: Option<Uuid>,
}

impl AnnotationCandidate {
    pub fn study(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            scope: AnnotationScope::Study,
            cluster_group_id: None,
        }
    }

    pub fn cluster(name: impl Into<String>, cluster_group_id: Uuid) -> Self {
        Self {
            name: name.into(),
            scope: AnnotationScope::Cluster,
            cluster_group_id: Some(cluster_group_id),
        }
    }

    /// `name--group--scope` form used in logs and result keys
    pub fn identifier(&self) -> String {
        format!("{}--group--{}", self.name, self.scope)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn annotation(pairs: &[(&str, &str)]) -> Annotation {
        Annotation::new(
            Uuid::new_v4(),
            None,
            "cell_type",
            AnnotationType::Group,
            pairs
                .iter()
                .map(|(c, v)| (c.to_string(), v.to_string()))
                .collect(),
        )
    }

    #[test]
    fn test_values_restricted_to_cells() {
        let annot = annotation(&[("A", "T cell"), ("B", "B cell"), ("C", "T cell")]);
        assert_eq!(annot.values().len(), 2);

        let cells = vec!["A".to_string(), "C".to_string()];
        assert_eq!(annot.values_for_cells(&cells).len(), 1);
        assert_eq!(annot.count_cells_with(&cells, "T cell"), 2);
        assert_eq!(annot.count_cells_with(&cells, "B cell"), 0);
    }

    #[test]
    fn test_can_visualize_threshold_and_override() {
        let pairs: Vec<(String, String)> = (0..5).map(|i| (format!("c{}", i), format!("v{}", i))).collect();
        let refs: Vec<(&str, &str)> = pairs.iter().map(|(c, v)| (c.as_str(), v.as_str())).collect();
        let annot = annotation(&refs);

        assert!(annot.can_visualize(5, false));
        assert!(!annot.can_visualize(4, false));
        assert!(annot.can_visualize(4, true));
    }

    #[test]
    fn test_candidate_identifier() {
        let candidate = AnnotationCandidate::cluster("louvain", Uuid::new_v4());
        assert_eq!(candidate.identifier(), "louvain--group--cluster");
    }
}
