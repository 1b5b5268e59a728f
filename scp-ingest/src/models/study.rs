//! Study and requester models

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::annotation::AnnotationScope;

/// A study: the owner of uploaded files, clusterings and analysis results
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Study {
    pub id: Uuid,
    pub accession: String,
    pub name: String,
    /// Storage bucket holding the study's files
    pub bucket_id: String,
    pub queued_for_deletion: bool,
    /// Bucket no longer reachable; no jobs may be launched
    pub detached: bool,
    /// Number of collaborators the study is shared with
    pub share_count: i64,
    pub default_cluster_id: Option<Uuid>,
    pub default_annotation: Option<DefaultAnnotation>,
    /// Annotation names allowed to be visualized regardless of cardinality
    pub viz_override_annotations: Vec<String>,
}

impl Study {
    pub fn new(accession: impl Into<String>, name: impl Into<String>, bucket_id: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            accession: accession.into(),
            name: name.into(),
            bucket_id: bucket_id.into(),
            queued_for_deletion: false,
            detached: false,
            share_count: 0,
            default_cluster_id: None,
            default_annotation: None,
            viz_override_annotations: Vec::new(),
        }
    }

    pub fn has_collaborators(&self) -> bool {
        self.share_count > 0
    }

    /// Whether jobs may be launched for this study
    pub fn is_active(&self) -> bool {
        !self.queued_for_deletion && !self.detached
    }

    pub fn overrides_viz_limit(&self, annotation_name: &str) -> bool {
        self.viz_override_annotations.iter().any(|n| n == annotation_name)
    }
}

/// Default annotation selection, stored as `name--type--scope`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DefaultAnnotation {
    pub name: String,
    pub annotation_type: String,
    pub scope: AnnotationScope,
}

impl DefaultAnnotation {
    pub fn parse(value: &str) -> Option<Self> {
        let mut parts = value.split("--");
        let name = parts.next()?.to_string();
        let annotation_type = parts.next()?.to_string();
        let scope = AnnotationScope::parse(parts.next()?)?;
        if name.is_empty() || parts.next().is_some() {
            return None;
        }
        Some(Self {
            name,
            annotation_type,
            scope,
        })
    }

    pub fn encode(&self) -> String {
        format!("{}--{}--{}", self.name, self.annotation_type, self.scope.as_str())
    }
}

/// The user on whose behalf a job is dispatched
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Requester {
    pub email: String,
    /// Opaque identifier forwarded to job telemetry
    pub metrics_uuid: Uuid,
}

impl Requester {
    pub fn new(email: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            metrics_uuid: Uuid::new_v4(),
        }
    }
}
