//! Differential expression results

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use super::annotation::AnnotationScope;

/// Output of a completed differential expression job
///
/// Keyed by (study, cluster, annotation name, annotation scope). Results are
/// either author-uploaded or computed automatically; author results take
/// precedence and suppress automated backfills for the whole study.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DifferentialExpressionResult {
    pub id: Uuid,
    pub study_id: Uuid,
    pub cluster_group_id: Uuid,
    pub cluster_name: String,
    pub annotation_name: String,
    pub annotation_scope: AnnotationScope,
    pub is_author_de: bool,
    /// Labels with a one-vs-rest comparison
    pub one_vs_rest_comparisons: Vec<String>,
    /// Group A to the groups it was compared against
    pub pairwise_comparisons: BTreeMap<String, Vec<String>>,
}

impl DifferentialExpressionResult {
    pub fn new(
        study_id: Uuid,
        cluster_group_id: Uuid,
        cluster_name: impl Into<String>,
        annotation_name: impl Into<String>,
        annotation_scope: AnnotationScope,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            study_id,
            cluster_group_id,
            cluster_name: cluster_name.into(),
            annotation_name: annotation_name.into(),
            annotation_scope,
            is_author_de: false,
            one_vs_rest_comparisons: Vec::new(),
            pairwise_comparisons: BTreeMap::new(),
        }
    }

    /// Whether any one-vs-rest comparison was computed
    pub fn has_one_vs_rest(&self) -> bool {
        !self.one_vs_rest_comparisons.is_empty()
    }

    /// Whether `group_a` vs `group_b` was computed, in either order
    pub fn has_pairwise_comparison(&self, group_a: &str, group_b: &str) -> bool {
        let contains = |a: &str, b: &str| {
            self.pairwise_comparisons
                .get(a)
                .is_some_and(|others| others.iter().any(|o| o == b))
        };
        contains(group_a, group_b) || contains(group_b, group_a)
    }
}
