//! Static dispatch table
//!
//! One route per parseable file type. Dispatch runs the stages in order:
//! pre-step, precondition, delivery (to the route target), chain, post-step.

use crate::models::{FileType, JobAction};

/// Work done before the precondition is checked
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreStep {
    None,
    /// Queue a copy of the upload to the study bucket
    PushToRemote,
    /// Create the AnnData sidecar when absent
    EnsureAnnDataInfo,
    /// Remove computed DE results before an author upload replaces them
    PurgeAutomatedDe,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Precondition {
    None,
    /// Every required companion type is present
    CompleteBundle,
    /// Complete bundle whose parent has finished parsing
    CompleteBundleWithParsedParent,
}

/// File the job is keyed to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    SelfFile,
    BundleParent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalTaskKind {
    PrecomputedScores,
    AnalysisOutput,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Remote(JobAction),
    Local(LocalTaskKind),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Chain {
    None,
    /// Ingest the cluster's bundled coordinate labels
    CoordinateLabels,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostStep {
    None,
    /// Report metadata uploads that skip the metadata convention
    ConventionTelemetry,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Route {
    pub file_type: FileType,
    pub pre_step: PreStep,
    pub precondition: Precondition,
    pub target: Target,
    /// Claim every bundle member, not just the dispatched file
    pub mark_bundle: bool,
    pub delivery: Delivery,
    pub chain: Chain,
    pub post_step: PostStep,
}

impl Route {
    const fn remote(file_type: FileType, action: JobAction) -> Self {
        Self {
            file_type,
            pre_step: PreStep::None,
            precondition: Precondition::None,
            target: Target::SelfFile,
            mark_bundle: false,
            delivery: Delivery::Remote(action),
            chain: Chain::None,
            post_step: PostStep::None,
        }
    }

    const fn local(file_type: FileType, kind: LocalTaskKind) -> Self {
        Self {
            delivery: Delivery::Local(kind),
            ..Self::remote(file_type, JobAction::IngestCluster)
        }
    }

    const fn pre_step(self, pre_step: PreStep) -> Self {
        Self { pre_step, ..self }
    }

    const fn precondition(self, precondition: Precondition) -> Self {
        Self { precondition, ..self }
    }

    const fn bundle_parent(self) -> Self {
        Self {
            target: Target::BundleParent,
            ..self
        }
    }

    const fn mark_bundle(self) -> Self {
        Self {
            mark_bundle: true,
            ..self
        }
    }

    const fn chain(self, chain: Chain) -> Self {
        Self { chain, ..self }
    }

    const fn post_step(self, post_step: PostStep) -> Self {
        Self { post_step, ..self }
    }
}

pub const ROUTES: &[Route] = &[
    Route::remote(FileType::Cluster, JobAction::IngestCluster).chain(Chain::CoordinateLabels),
    Route::remote(FileType::CoordinateLabels, JobAction::IngestCoordinateLabels)
        .precondition(Precondition::CompleteBundleWithParsedParent),
    Route::remote(FileType::ExpressionMatrix, JobAction::IngestExpression),
    Route::remote(FileType::MmCoordinateMatrix, JobAction::IngestExpression)
        .pre_step(PreStep::PushToRemote)
        .precondition(Precondition::CompleteBundle)
        .mark_bundle(),
    Route::remote(FileType::TenXGenes, JobAction::IngestExpression)
        .pre_step(PreStep::PushToRemote)
        .precondition(Precondition::CompleteBundle)
        .bundle_parent()
        .mark_bundle(),
    Route::remote(FileType::TenXBarcodes, JobAction::IngestExpression)
        .pre_step(PreStep::PushToRemote)
        .precondition(Precondition::CompleteBundle)
        .bundle_parent()
        .mark_bundle(),
    Route::remote(FileType::Metadata, JobAction::IngestCellMetadata)
        .post_step(PostStep::ConventionTelemetry),
    Route::remote(FileType::AnnData, JobAction::IngestAnnData).pre_step(PreStep::EnsureAnnDataInfo),
    Route::remote(FileType::DifferentialExpression, JobAction::IngestDifferentialExpression)
        .pre_step(PreStep::PurgeAutomatedDe),
    Route::local(FileType::GeneList, LocalTaskKind::PrecomputedScores),
    Route::local(FileType::AnalysisOutput, LocalTaskKind::AnalysisOutput),
];

pub fn route_for(file_type: FileType) -> Option<&'static Route> {
    ROUTES.iter().find(|r| r.file_type == file_type)
}
