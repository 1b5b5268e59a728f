//! Data models for study file ingest

pub mod annotation;
pub mod anndata_info;
pub mod bundle;
pub mod de_result;
pub mod file_type;
pub mod job;
pub mod study;
pub mod study_file;

pub use annotation::{Annotation, AnnotationCandidate, AnnotationScope, AnnotationType, ClusterGroup};
pub use anndata_info::{AnnDataInfo, DEFAULT_OBSM_KEY};
pub use bundle::{Bundle, BundleRequirement, StagedAssociation, StagingKey, BUNDLE_REQUIREMENTS};
pub use de_result::DifferentialExpressionResult;
pub use file_type::{FileType, ParseStatus};
pub use job::{IngestJob, JobAction, JobState, LocalTask, RemoteJob, RUNNING_STATES};
pub use study::{DefaultAnnotation, Requester, Study};
pub use study_file::{ParseClaim, StudyFile};
