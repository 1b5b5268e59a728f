//! Dispatch router
//!
//! Turns an uploaded file into ingest work. Each parseable file type has a
//! static [`Route`]; dispatch resolves the file's bundle, runs the route's
//! stages and hands the resulting job to the [`JobSubmitter`].
//!
//! Conditions the caller can act on are reported as [`DispatchStatus`]
//! codes, never as errors:
//! - 422: the file type is not parseable, or the file is queued for deletion
//! - 405: the file is already parsing
//! - 412: a required bundle is incomplete (or its parent has not parsed)
//!
//! Reference AnnData files and analysis outputs without an extractor are
//! accepted with nothing to run.

pub mod routes;

use chrono::Utc;
use scp_common::events::{EventBus, IngestEvent};
use serde_json::json;
use sqlx::SqlitePool;
use std::sync::Arc;
use uuid::Uuid;

use super::bundle_resolver::BundleResolver;
use super::submission::JobSubmitter;
use crate::db;
use crate::error::{IngestError, Result};
use crate::models::{
    AnnDataInfo, Bundle, BundleRequirement, FileType, IngestJob, JobAction, LocalTask, Requester,
    Study, StudyFile,
};
use crate::params::{
    AnnDataIngestParameters, AuthorDeIngestParameters, CellMetadataIngestParameters,
    ClusterIngestParameters, CoordinateLabelIngestParameters, ExpressionIngestParameters,
    IngestParameters, MatrixFileType, ParameterObject,
};
pub use routes::{route_for, Chain, Delivery, LocalTaskKind, PostStep, PreStep, Precondition, Route, Target, ROUTES};

/// Analysis outputs that have an in-application extractor
pub const EXTRACTABLE_ANALYSES: &[&str] = &["infercnv", "ideogram"];

/// Telemetry event for metadata uploaded without the metadata convention
pub const NON_COMPLIANT_METADATA_EVENT: &str = "file-upload:metadata:non-compliant";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchOptions {
    /// Re-ingest a file that has already been parsed
    pub reparse: bool,
    /// Keep partially ingested data when the remote job fails
    pub persist_on_fail: bool,
    /// AnnData: re-extract a single clustering
    pub obsm_key: Option<String>,
    /// AnnData: extract raw counts only
    pub raw_counts_only: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchStatus {
    Accepted,
    MethodNotAllowed,
    PreconditionFailed,
    UnprocessableEntity,
}

impl DispatchStatus {
    /// HTTP-style status code
    pub fn code(&self) -> u16 {
        match self {
            DispatchStatus::Accepted => 204,
            DispatchStatus::MethodNotAllowed => 405,
            DispatchStatus::PreconditionFailed => 412,
            DispatchStatus::UnprocessableEntity => 422,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchResult {
    pub status: DispatchStatus,
    pub error: Option<String>,
}

impl DispatchResult {
    pub fn accepted() -> Self {
        Self {
            status: DispatchStatus::Accepted,
            error: None,
        }
    }

    fn rejected(status: DispatchStatus, error: impl Into<String>) -> Self {
        Self {
            status,
            error: Some(error.into()),
        }
    }

    pub fn is_accepted(&self) -> bool {
        self.status == DispatchStatus::Accepted
    }

    pub fn code(&self) -> u16 {
        self.status.code()
    }
}

/// Work produced by a route's delivery stage
enum Work {
    Remote(IngestJob),
    Local(LocalTask),
    /// Accepted with nothing to run
    Nothing,
}

pub struct DispatchRouter {
    db: SqlitePool,
    submitter: Arc<dyn JobSubmitter>,
    event_bus: EventBus,
    resolver: BundleResolver,
    machine_type: String,
    max_lock_wait_ms: u64,
}

impl DispatchRouter {
    pub fn new(
        db: SqlitePool,
        submitter: Arc<dyn JobSubmitter>,
        event_bus: EventBus,
        machine_type: impl Into<String>,
        max_lock_wait_ms: u64,
    ) -> Self {
        Self {
            resolver: BundleResolver::new(db.clone()),
            db,
            submitter,
            event_bus,
            machine_type: machine_type.into(),
            max_lock_wait_ms,
        }
    }

    pub fn resolver(&self) -> &BundleResolver {
        &self.resolver
    }

    /// Dispatch `file` for parsing
    ///
    /// The stored file record is authoritative; `file` only identifies it.
    pub async fn dispatch(
        &self,
        file: &StudyFile,
        study: &Study,
        requester: &Requester,
        options: &DispatchOptions,
    ) -> Result<DispatchResult> {
        let file = db::files::load_study_file(&self.db, file.id)
            .await?
            .ok_or_else(|| scp_common::Error::NotFound(format!("Study file {}", file.id)))?;

        if !file.file_type.is_parseable() {
            return Ok(DispatchResult::rejected(
                DispatchStatus::UnprocessableEntity,
                format!("{} files cannot be parsed", file.file_type),
            ));
        }
        if file.queued_for_deletion {
            return Ok(DispatchResult::rejected(
                DispatchStatus::UnprocessableEntity,
                format!("{} is queued for deletion", file.upload_file_name),
            ));
        }
        if file.is_parsing() {
            return Ok(DispatchResult::rejected(
                DispatchStatus::MethodNotAllowed,
                format!("{} is already parsing", file.upload_file_name),
            ));
        }

        let bundle = self.resolver.resolve(&file).await?;

        let Some(route) = route_for(file.file_type) else {
            return Ok(DispatchResult::rejected(
                DispatchStatus::UnprocessableEntity,
                format!("No dispatch route for {} files", file.file_type),
            ));
        };

        let anndata_info = self.run_pre_step(route.pre_step, &file, study).await?;

        if let Some(failure) = check_precondition(route.precondition, &file, bundle.as_ref()) {
            tracing::info!(
                file_id = %file.id,
                file_type = %file.file_type,
                reason = %failure,
                "Dispatch precondition not met"
            );
            return Ok(DispatchResult::rejected(DispatchStatus::PreconditionFailed, failure));
        }

        let target = match (route.target, bundle.as_ref()) {
            (Target::BundleParent, Some(bundle)) => &bundle.parent,
            _ => &file,
        };

        let work = match route.delivery {
            Delivery::Remote(JobAction::IngestAnnData) if anndata_info.as_ref().is_some_and(|i| i.reference_file) => {
                Work::Nothing
            }
            Delivery::Remote(action) => {
                let params = build_params(action, target, study, bundle.as_ref(), anndata_info.as_ref(), options)?;
                Work::Remote(self.job(study, target, requester, action, params, options))
            }
            Delivery::Local(kind) => match local_task(kind, &file) {
                Some(task) => Work::Local(task),
                None => Work::Nothing,
            },
        };

        if let Work::Nothing = work {
            tracing::info!(
                file_id = %file.id,
                file_type = %file.file_type,
                analysis_name = file.analysis_name.as_deref().unwrap_or(""),
                "Nothing to ingest for file; accepted without a job"
            );
            return Ok(DispatchResult::accepted());
        }

        // Claim before submitting so the worker's confirmation lands on a parsing file
        let mut claimed = vec![file.id];
        if route.mark_bundle {
            if let Some(bundle) = bundle.as_ref() {
                claimed = bundle.members().iter().map(|f| f.id).collect();
                if !claimed.contains(&file.id) {
                    claimed.push(file.id);
                }
            }
        }
        self.mark_parsing(&claimed).await;

        match work {
            Work::Remote(mut job) => {
                job.claimed_file_ids = claimed;
                self.submit_job(job).await?
            }
            Work::Local(task) => self.submitter.enqueue_local(task).await?,
            Work::Nothing => {}
        }

        if route.chain == Chain::CoordinateLabels {
            self.chain_coordinate_labels(&file, study, requester, bundle.as_ref(), options)
                .await?;
        }

        if route.post_step == PostStep::ConventionTelemetry && !file.use_metadata_convention {
            self.event_bus.emit_lossy(IngestEvent::Telemetry {
                name: NON_COMPLIANT_METADATA_EVENT.to_string(),
                properties: json!({
                    "studyAccession": study.accession,
                    "fileName": file.upload_file_name,
                }),
                requester: requester.email.clone(),
                timestamp: Utc::now(),
            });
        }

        if study.has_collaborators() {
            self.event_bus.emit_lossy(IngestEvent::ShareUpdate {
                study_id: study.id,
                accession: study.accession.clone(),
                changes: vec![format!("{} ({}) is parsing", file.upload_file_name, file.file_type)],
                requester: requester.email.clone(),
                timestamp: Utc::now(),
            });
        }

        tracing::info!(
            file_id = %file.id,
            file_type = %file.file_type,
            accession = %study.accession,
            "File dispatched"
        );
        Ok(DispatchResult::accepted())
    }

    /// Validate a job's parameters and hand it to the submitter
    pub async fn submit_job(&self, job: IngestJob) -> Result<()> {
        let errors = job.params.validate();
        if !errors.is_empty() {
            return Err(IngestError::Validation(errors));
        }
        tracing::debug!(
            file_id = %job.study_file_id,
            action = %job.action,
            command = ?job.command(),
            "Submitting job"
        );
        self.submitter.submit(job).await
    }

    fn job(
        &self,
        study: &Study,
        target: &StudyFile,
        requester: &Requester,
        action: JobAction,
        params: IngestParameters,
        options: &DispatchOptions,
    ) -> IngestJob {
        IngestJob {
            study_id: study.id,
            study_accession: study.accession.clone(),
            study_file_id: target.id,
            requester: requester.clone(),
            action,
            params,
            machine_type: self.machine_type.clone(),
            reparse: options.reparse,
            persist_on_fail: options.persist_on_fail,
            claimed_file_ids: if action.claims_file() { vec![target.id] } else { Vec::new() },
        }
    }

    async fn run_pre_step(
        &self,
        pre_step: PreStep,
        file: &StudyFile,
        study: &Study,
    ) -> Result<Option<AnnDataInfo>> {
        match pre_step {
            PreStep::None => Ok(None),
            PreStep::PushToRemote => {
                self.submitter
                    .enqueue_local(LocalTask::PushToRemote {
                        study_id: study.id,
                        study_file_id: file.id,
                    })
                    .await?;
                Ok(None)
            }
            PreStep::EnsureAnnDataInfo => {
                Ok(Some(db::anndata::ensure_anndata_info(&self.db, file.id).await?))
            }
            PreStep::PurgeAutomatedDe => {
                let removed = db::de_results::delete_automated_de_results(&self.db, study.id).await?;
                tracing::info!(
                    accession = %study.accession,
                    removed,
                    "Removed automated DE results ahead of author upload"
                );
                Ok(None)
            }
        }
    }

    async fn chain_coordinate_labels(
        &self,
        cluster_file: &StudyFile,
        study: &Study,
        requester: &Requester,
        bundle: Option<&Bundle>,
        options: &DispatchOptions,
    ) -> Result<()> {
        let Some(bundle) = bundle.filter(|b| b.is_complete()) else {
            return Ok(());
        };

        for labels in bundle.children_of_type(FileType::CoordinateLabels) {
            let params = IngestParameters::CoordinateLabels(CoordinateLabelIngestParameters {
                coordinate_file: labels.gs_url(&study.bucket_id),
                cluster_file: cluster_file.gs_url(&study.bucket_id),
                cluster_name: cluster_file.name.clone(),
            });
            let job = self.job(study, labels, requester, JobAction::IngestCoordinateLabels, params, options);

            self.mark_parsing(&[labels.id]).await;
            self.submit_job(job).await?;
            tracing::info!(
                file_id = %labels.id,
                cluster_file_id = %cluster_file.id,
                "Chained coordinate labels ingest"
            );
        }
        Ok(())
    }

    /// Best effort; a failed claim is logged and dispatch continues
    async fn mark_parsing(&self, file_ids: &[Uuid]) {
        if let Err(e) = db::files::mark_parsing(&self.db, file_ids, Utc::now(), self.max_lock_wait_ms).await {
            tracing::warn!(files = file_ids.len(), error = %e, "Failed to mark files as parsing");
        }
    }
}

/// `None` when the precondition holds, else the 412 message
fn check_precondition(precondition: Precondition, file: &StudyFile, bundle: Option<&Bundle>) -> Option<String> {
    match precondition {
        Precondition::None => None,
        Precondition::CompleteBundle => incomplete_bundle_message(file, bundle),
        Precondition::CompleteBundleWithParsedParent => {
            incomplete_bundle_message(file, bundle).or_else(|| match bundle {
                Some(bundle) if !bundle.parent.is_parsed() => Some(format!(
                    "{} {} has not finished parsing",
                    bundle.parent.file_type, bundle.parent.upload_file_name
                )),
                _ => None,
            })
        }
    }
}

fn incomplete_bundle_message(file: &StudyFile, bundle: Option<&Bundle>) -> Option<String> {
    let requirement = BundleRequirement::involving(file.file_type)?;
    let missing: Vec<FileType> = match bundle {
        Some(bundle) if bundle.is_complete() => return None,
        Some(bundle) if bundle.parent.queued_for_deletion => vec![requirement.parent],
        Some(bundle) => bundle.missing_types(),
        None if file.file_type == requirement.parent => requirement.children.to_vec(),
        None => std::iter::once(requirement.parent)
            .chain(requirement.children.iter().copied().filter(|t| *t != file.file_type))
            .collect(),
    };
    let missing: Vec<&str> = missing.iter().map(|t| t.as_str()).collect();
    Some(format!("{}; missing {}", requirement.describe(), missing.join(", ")))
}

fn local_task(kind: LocalTaskKind, file: &StudyFile) -> Option<LocalTask> {
    match kind {
        LocalTaskKind::PrecomputedScores => Some(LocalTask::InitializePrecomputedScores {
            study_id: file.study_id,
            study_file_id: file.id,
        }),
        LocalTaskKind::AnalysisOutput => {
            let analysis_name = file
                .analysis_name
                .as_deref()
                .filter(|name| EXTRACTABLE_ANALYSES.contains(name))?;
            Some(LocalTask::ExtractAnalysisOutput {
                study_id: file.study_id,
                study_file_id: file.id,
                analysis_name: analysis_name.to_string(),
                visualization_name: file.visualization_name.clone(),
            })
        }
    }
}

/// Parameter object for `action` keyed to `target`
fn build_params(
    action: JobAction,
    target: &StudyFile,
    study: &Study,
    bundle: Option<&Bundle>,
    anndata_info: Option<&AnnDataInfo>,
    options: &DispatchOptions,
) -> Result<IngestParameters> {
    let bucket = study.bucket_id.as_str();
    let companion_url = |file_type: FileType| {
        bundle
            .and_then(|b| b.children_of_type(file_type).first().map(|f| f.gs_url(bucket)))
    };

    let params = match action {
        JobAction::IngestCluster => IngestParameters::Cluster(ClusterIngestParameters {
            cluster_file: target.gs_url(bucket),
            name: target.name.clone(),
        }),
        JobAction::IngestCoordinateLabels => {
            let parent = bundle
                .map(|b| &b.parent)
                .ok_or_else(|| IngestError::validation("coordinate labels have no cluster file"))?;
            IngestParameters::CoordinateLabels(CoordinateLabelIngestParameters {
                coordinate_file: target.gs_url(bucket),
                cluster_file: parent.gs_url(bucket),
                cluster_name: parent.name.clone(),
            })
        }
        JobAction::IngestExpression => {
            let (matrix_file_type, gene_file, barcode_file) = match target.file_type {
                FileType::MmCoordinateMatrix => (
                    MatrixFileType::Mtx,
                    companion_url(FileType::TenXGenes),
                    companion_url(FileType::TenXBarcodes),
                ),
                _ => (MatrixFileType::Dense, None, None),
            };
            IngestParameters::Expression(ExpressionIngestParameters {
                matrix_file: target.gs_url(bucket),
                matrix_file_type,
                gene_file,
                barcode_file,
            })
        }
        JobAction::IngestCellMetadata => IngestParameters::CellMetadata(CellMetadataIngestParameters {
            cell_metadata_file: target.gs_url(bucket),
            study_accession: study.accession.clone(),
            validate_convention: target.use_metadata_convention,
        }),
        JobAction::IngestAnnData => {
            let default_info;
            let info = match anndata_info {
                Some(info) => info,
                None => {
                    default_info = AnnDataInfo::new(target.id);
                    &default_info
                }
            };
            let file = target.gs_url(bucket);
            let size = target.upload_file_size;
            // A blank location is unknown
            let raw_location = info.raw_location.clone().filter(|_| info.has_raw_counts());
            IngestParameters::AnnData(if let Some(key) = options.obsm_key.as_ref() {
                AnnDataIngestParameters::clustering(file, key.clone(), size)
            } else if options.raw_counts_only {
                AnnDataIngestParameters::raw_counts(file, raw_location, size)
            } else {
                AnnDataIngestParameters::full(file, info.obsm_keys.clone(), raw_location, size)
            })
        }
        JobAction::IngestDifferentialExpression => {
            IngestParameters::AuthorDifferentialExpression(AuthorDeIngestParameters {
                differential_expression_file: target.gs_url(bucket),
                study_accession: study.accession.clone(),
            })
        }
        JobAction::DifferentialExpression => {
            return Err(IngestError::validation(
                "differential expression jobs are not dispatched from uploads",
            ))
        }
    };

    let errors = params.validate();
    if errors.is_empty() {
        Ok(params)
    } else {
        Err(IngestError::Validation(errors))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bundle(parent: FileType, children: &[FileType]) -> Bundle {
        let study_id = Uuid::new_v4();
        Bundle {
            id: Uuid::new_v4(),
            study_id,
            parent: StudyFile::new(study_id, "parent", parent),
            children: children
                .iter()
                .map(|t| StudyFile::new(study_id, t.as_str(), *t))
                .collect(),
        }
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(DispatchStatus::Accepted.code(), 204);
        assert_eq!(DispatchStatus::MethodNotAllowed.code(), 405);
        assert_eq!(DispatchStatus::PreconditionFailed.code(), 412);
        assert_eq!(DispatchStatus::UnprocessableEntity.code(), 422);
    }

    #[test]
    fn test_incomplete_bundle_message_names_missing_types() {
        let matrix = StudyFile::new(Uuid::new_v4(), "matrix.mtx", FileType::MmCoordinateMatrix);
        let message = incomplete_bundle_message(&matrix, None).unwrap();
        assert_eq!(
            message,
            "MM Coordinate Matrix requires 10X Genes File, 10X Barcodes File; missing 10X Genes File, 10X Barcodes File"
        );

        let partial = bundle(FileType::MmCoordinateMatrix, &[FileType::TenXGenes]);
        let message = incomplete_bundle_message(&partial.parent, Some(&partial)).unwrap();
        assert!(message.ends_with("missing 10X Barcodes File"));
    }

    #[test]
    fn test_coordinate_labels_need_parsed_parent() {
        let mut complete = bundle(FileType::Cluster, &[FileType::CoordinateLabels]);
        let labels = complete.children[0].clone();
        let failure = check_precondition(Precondition::CompleteBundleWithParsedParent, &labels, Some(&complete));
        assert!(failure.unwrap().contains("has not finished parsing"));

        complete.parent.parse_status = crate::models::ParseStatus::Parsed;
        assert!(check_precondition(Precondition::CompleteBundleWithParsedParent, &labels, Some(&complete)).is_none());
    }

    #[test]
    fn test_only_known_analyses_are_extracted() {
        let mut output = StudyFile::new(Uuid::new_v4(), "cnv.txt", FileType::AnalysisOutput);
        output.analysis_name = Some("infercnv".to_string());
        assert!(local_task(LocalTaskKind::AnalysisOutput, &output).is_some());

        output.analysis_name = Some("custom".to_string());
        assert!(local_task(LocalTaskKind::AnalysisOutput, &output).is_none());
    }
}
