//! Differential expression eligibility and dedup
//!
//! Decides which (clustering, annotation) pairs get an automated DE job,
//! validates requests against existing results, and skips work already
//! running on the batch service.
//!
//! The dedup check and the submission are not atomic: two callers racing on
//! the same request can both see no running job and both submit. The batch
//! service tolerates the duplicate; nothing here prevents it.

use regex::{Regex, RegexBuilder};
use scp_common::config::DeConfig;
use sqlx::SqlitePool;
use std::collections::BTreeMap;
use std::sync::Arc;

use super::batch_client::BatchClient;
use super::dispatch::DispatchRouter;
use crate::db;
use crate::error::{IngestError, Result};
use crate::models::{
    Annotation, AnnotationCandidate, AnnotationScope, ClusterGroup, FileType, IngestJob, JobAction,
    Requester, Study, StudyFile, RUNNING_STATES,
};
use crate::params::{
    DeType, DifferentialExpressionParameters, IngestParameters, MatrixFileType, ParameterObject,
};

/// Annotation name preferred over its free-text counterpart
const ONTOLOGY_LABEL_SUFFIX: &str = "__ontology_label";

/// Storage prefix for files extracted from AnnData uploads
const ANNDATA_FRAGMENT_PREFIX: &str = "_scp_internal/anndata_ingest";

/// One DE computation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeRequest {
    pub annotation_name: String,
    pub annotation_scope: AnnotationScope,
    pub de_type: DeType,
    pub group1: Option<String>,
    pub group2: Option<String>,
}

impl DeRequest {
    pub fn one_vs_rest(annotation_name: impl Into<String>, annotation_scope: AnnotationScope) -> Self {
        Self {
            annotation_name: annotation_name.into(),
            annotation_scope,
            de_type: DeType::Rest,
            group1: None,
            group2: None,
        }
    }

    pub fn pairwise(
        annotation_name: impl Into<String>,
        annotation_scope: AnnotationScope,
        group1: impl Into<String>,
        group2: impl Into<String>,
    ) -> Self {
        Self {
            annotation_name: annotation_name.into(),
            annotation_scope,
            de_type: DeType::Pairwise,
            group1: Some(group1.into()),
            group2: Some(group2.into()),
        }
    }

    pub fn is_pairwise(&self) -> bool {
        self.de_type == DeType::Pairwise
    }

    fn from_candidate(candidate: &AnnotationCandidate) -> Self {
        Self::one_vs_rest(candidate.name.clone(), candidate.scope)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeOptions {
    /// Skip annotations that already have a one-vs-rest result
    pub skip_existing: bool,
    /// Validate and dedup, but do not submit
    pub dry_run: bool,
    /// Overrides the configured machine type
    pub machine_type: Option<String>,
    /// Defaults to the configured service requester
    pub requester: Option<Requester>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackfillSummary {
    /// Accession to jobs submitted
    pub per_study: BTreeMap<String, usize>,
    /// Accessions not processed (author DE present, missing, or invalid)
    pub skipped: Vec<String>,
    pub total_jobs: usize,
}

pub struct DeEngine {
    db: SqlitePool,
    router: Arc<DispatchRouter>,
    batch_client: Arc<dyn BatchClient>,
    config: DeConfig,
    machine_type: String,
    cell_type_re: Regex,
    clustering_re: Regex,
    exclude_re: Regex,
}

fn case_insensitive(pattern: &str) -> scp_common::Result<Regex> {
    RegexBuilder::new(pattern)
        .case_insensitive(true)
        .build()
        .map_err(|e| scp_common::Error::Config(format!("Invalid annotation pattern {}: {}", pattern, e)))
}

impl DeEngine {
    pub fn new(
        db: SqlitePool,
        router: Arc<DispatchRouter>,
        batch_client: Arc<dyn BatchClient>,
        config: DeConfig,
        machine_type: impl Into<String>,
    ) -> Result<Self> {
        Ok(Self {
            cell_type_re: case_insensitive(&config.cell_type_pattern)?,
            clustering_re: case_insensitive(&config.clustering_pattern)?,
            exclude_re: case_insensitive(&config.exclude_pattern)?,
            db,
            router,
            batch_client,
            config,
            machine_type: machine_type.into(),
        })
    }

    /// Run DE on the study's default clustering and annotation
    pub async fn run_on_default(&self, accession: &str, options: &DeOptions) -> Result<bool> {
        let study = self.load_active_study(accession).await?;

        let cluster_id = study
            .default_cluster_id
            .ok_or_else(|| IngestError::validation(format!("{} has no default cluster", accession)))?;
        let cluster = db::annotations::load_cluster_group(&self.db, cluster_id)
            .await?
            .ok_or_else(|| IngestError::validation(format!("{} default cluster not found", accession)))?;
        let annotation = study
            .default_annotation
            .clone()
            .ok_or_else(|| IngestError::validation(format!("{} has no default annotation", accession)))?;

        let request = DeRequest::one_vs_rest(annotation.name, annotation.scope);
        let requester = self.requester(options);
        self.run_job(&cluster, &study, &requester, &request, options).await
    }

    /// Run DE for every eligible annotation on every applicable clustering
    ///
    /// A request that fails validation is logged and skipped. Returns the
    /// number of jobs submitted.
    pub async fn run_on_all(&self, accession: &str, options: &DeOptions) -> Result<usize> {
        let study = self.load_active_study(accession).await?;
        let requester = self.requester(options);
        let clusters = db::annotations::list_cluster_groups(&self.db, study.id).await?;
        let eligible = self.find_eligible_annotations(&study, options.skip_existing).await?;

        let mut submitted = 0;
        for candidate in &eligible {
            let request = DeRequest::from_candidate(candidate);
            let targets: Vec<&ClusterGroup> = match candidate.scope {
                AnnotationScope::Cluster => clusters
                    .iter()
                    .filter(|c| Some(c.id) == candidate.cluster_group_id)
                    .collect(),
                AnnotationScope::Study => clusters.iter().collect(),
            };

            for cluster in targets {
                match self.run_job(cluster, &study, &requester, &request, options).await {
                    Ok(true) => submitted += 1,
                    Ok(false) => {}
                    Err(IngestError::Validation(errors)) => {
                        tracing::warn!(
                            accession,
                            cluster = %cluster.name,
                            annotation = %candidate.identifier(),
                            errors = ?errors,
                            "Skipping invalid DE request"
                        );
                    }
                    Err(e) => return Err(e),
                }
            }
        }

        tracing::info!(accession, jobs = submitted, "DE run on all eligible annotations complete");
        Ok(submitted)
    }

    /// Run DE across many studies
    ///
    /// Defaults to every study not queued for deletion. Studies with
    /// author-uploaded results are skipped; a study that fails validation is
    /// logged and skipped. Studies are processed one at a time.
    pub async fn backfill(&self, accessions: Option<Vec<String>>, options: &DeOptions) -> Result<BackfillSummary> {
        let accessions = match accessions {
            Some(accessions) => accessions,
            None => db::studies::list_live_accessions(&self.db).await?,
        };
        let options = DeOptions {
            skip_existing: true,
            ..options.clone()
        };

        let mut summary = BackfillSummary::default();
        for accession in accessions {
            let Some(study) = db::studies::find_study_by_accession(&self.db, &accession).await? else {
                tracing::warn!(accession = %accession, "Study not found; skipping backfill");
                summary.skipped.push(accession);
                continue;
            };
            if db::de_results::study_has_author_de(&self.db, study.id).await? {
                tracing::info!(accession = %accession, "Study has author DE results; skipping backfill");
                summary.skipped.push(accession);
                continue;
            }

            match self.run_on_all(&accession, &options).await {
                Ok(jobs) => {
                    summary.total_jobs += jobs;
                    summary.per_study.insert(accession, jobs);
                }
                Err(IngestError::Validation(errors)) => {
                    tracing::warn!(accession = %accession, errors = ?errors, "Backfill skipped invalid study");
                    summary.skipped.push(accession);
                }
                Err(e) => return Err(e),
            }
        }

        tracing::info!(
            studies = summary.per_study.len(),
            skipped = summary.skipped.len(),
            total_jobs = summary.total_jobs,
            "DE backfill complete"
        );
        Ok(summary)
    }

    /// Validate, dedup and submit one DE job
    ///
    /// **Algorithm:**
    /// 1. Assemble parameters (raw matrix, cluster and annotation files)
    /// 2. Validate the annotation and parameters
    /// 3. Skip (`false`) when a running job has the same command line
    /// 4. Submit through the dispatch router (skipped on dry run)
    pub async fn run_job(
        &self,
        cluster: &ClusterGroup,
        study: &Study,
        requester: &Requester,
        request: &DeRequest,
        options: &DeOptions,
    ) -> Result<bool> {
        let params = self.build_params(cluster, study, request, options).await?;
        let job = IngestJob {
            study_id: study.id,
            study_accession: study.accession.clone(),
            study_file_id: cluster.study_file_id,
            requester: requester.clone(),
            action: JobAction::DifferentialExpression,
            params: IngestParameters::DifferentialExpression(params),
            machine_type: options.machine_type.clone().unwrap_or_else(|| self.machine_type.clone()),
            reparse: false,
            persist_on_fail: false,
            claimed_file_ids: Vec::new(),
        };

        self.validate_annotation(study, cluster, request).await?;
        let errors = job.params.validate();
        if !errors.is_empty() {
            return Err(IngestError::Validation(errors));
        }

        let command = job.command();
        let running = self.batch_client.find_matching_jobs(&command, RUNNING_STATES).await?;
        if let Some(existing) = running.first() {
            tracing::info!(
                accession = %study.accession,
                cluster = %cluster.name,
                annotation = %request.annotation_name,
                job_name = %existing.name,
                "Matching DE job already running; skipping"
            );
            return Ok(false);
        }

        if options.dry_run {
            tracing::info!(
                accession = %study.accession,
                cluster = %cluster.name,
                annotation = %request.annotation_name,
                command = ?command,
                "Dry run: would submit DE job"
            );
            return Ok(true);
        }

        self.router.submit_job(job).await?;
        tracing::info!(
            accession = %study.accession,
            cluster = %cluster.name,
            annotation = %request.annotation_name,
            de_type = request.de_type.as_str(),
            "DE job submitted"
        );
        Ok(true)
    }

    /// Annotations eligible for automated DE in `study`
    ///
    /// A name qualifies when it looks like a cell type or a clustering result
    /// and is not excluded; it must be a group annotation the study can
    /// visualize. `cell_type` is dropped when `cell_type__ontology_label` is
    /// also eligible.
    pub async fn find_eligible_annotations(
        &self,
        study: &Study,
        skip_existing: bool,
    ) -> Result<Vec<AnnotationCandidate>> {
        let mut candidates = Vec::new();

        let study_annotations = db::annotations::list_study_annotations(&self.db, study.id).await?;
        let existing = if skip_existing {
            db::de_results::list_de_results(&self.db, study.id).await?
        } else {
            Vec::new()
        };

        for annotation in study_annotations.iter().filter(|a| self.is_eligible(study, a)) {
            let has_result = existing.iter().any(|r| {
                r.annotation_name == annotation.name
                    && r.annotation_scope == AnnotationScope::Study
                    && r.has_one_vs_rest()
            });
            if !has_result {
                candidates.push(AnnotationCandidate::study(annotation.name.clone()));
            }
        }

        for cluster in db::annotations::list_cluster_groups(&self.db, study.id).await? {
            let annotations = db::annotations::list_cluster_annotations(&self.db, cluster.id).await?;
            for annotation in annotations.iter().filter(|a| self.is_eligible(study, a)) {
                let has_result = existing.iter().any(|r| {
                    r.cluster_group_id == cluster.id
                        && r.annotation_name == annotation.name
                        && r.annotation_scope == AnnotationScope::Cluster
                        && r.has_one_vs_rest()
                });
                if !has_result {
                    candidates.push(AnnotationCandidate::cluster(annotation.name.clone(), cluster.id));
                }
            }
        }

        Ok(prefer_ontology_labels(candidates))
    }

    /// Reject requests that would duplicate a result or cannot produce one
    pub async fn validate_annotation(&self, study: &Study, cluster: &ClusterGroup, request: &DeRequest) -> Result<()> {
        let identifier = format!("{}--group--{}", request.annotation_name, request.annotation_scope);

        let existing = db::de_results::find_de_result(
            &self.db,
            study.id,
            cluster.id,
            &request.annotation_name,
            request.annotation_scope,
        )
        .await?;
        if let Some(existing) = existing {
            match (&request.group1, &request.group2) {
                (Some(a), Some(b)) if request.is_pairwise() => {
                    if existing.has_pairwise_comparison(a, b) {
                        return Err(IngestError::validation(format!(
                            "{} already has a {} vs {} comparison for {}",
                            identifier, a, b, cluster.name
                        )));
                    }
                }
                _ => {
                    if existing.has_one_vs_rest() {
                        return Err(IngestError::validation(format!(
                            "{} already has DE results for {}",
                            identifier, cluster.name
                        )));
                    }
                }
            }
        }

        let annotation = db::annotations::find_annotation(
            &self.db,
            study.id,
            cluster,
            &request.annotation_name,
            request.annotation_scope,
        )
        .await?
        .ok_or_else(|| IngestError::validation(format!("{} is not present", identifier)))?;

        if !annotation.is_group() {
            return Err(IngestError::validation(format!("{} is not a group annotation", identifier)));
        }
        if !self.can_visualize(study, &annotation) {
            return Err(IngestError::validation(format!("{} cannot be visualized", identifier)));
        }

        if request.is_pairwise() {
            for group in [&request.group1, &request.group2].into_iter().flatten() {
                let cells = annotation.count_cells_with(&cluster.cells, group);
                if cells < 2 {
                    return Err(IngestError::validation(format!(
                        "{} group {} has {} cells in {}; at least 2 are required",
                        identifier, group, cells, cluster.name
                    )));
                }
            }
        } else {
            let labels = annotation.values_for_cells(&cluster.cells);
            if labels.len() < 2 {
                return Err(IngestError::validation(format!(
                    "{} has {} distinct labels in {}; at least 2 are required",
                    identifier,
                    labels.len(),
                    cluster.name
                )));
            }
        }
        Ok(())
    }

    fn is_eligible(&self, study: &Study, annotation: &Annotation) -> bool {
        let name = annotation.name.as_str();
        let matches = self.cell_type_re.is_match(name) || self.clustering_re.is_match(name);
        matches && !self.exclude_re.is_match(name) && annotation.is_group() && self.can_visualize(study, annotation)
    }

    fn can_visualize(&self, study: &Study, annotation: &Annotation) -> bool {
        annotation.can_visualize(
            self.config.visualization_threshold,
            study.overrides_viz_limit(&annotation.name),
        )
    }

    fn requester(&self, options: &DeOptions) -> Requester {
        options
            .requester
            .clone()
            .unwrap_or_else(|| Requester::new(self.config.service_requester.clone()))
    }

    async fn load_active_study(&self, accession: &str) -> Result<Study> {
        let study = db::studies::find_study_by_accession(&self.db, accession)
            .await?
            .ok_or_else(|| IngestError::validation(format!("study {} does not exist", accession)))?;
        if study.queued_for_deletion {
            return Err(IngestError::validation(format!("study {} is queued for deletion", accession)));
        }
        if study.detached {
            return Err(IngestError::validation(format!("study {} is detached", accession)));
        }
        Ok(study)
    }

    async fn build_params(
        &self,
        cluster: &ClusterGroup,
        study: &Study,
        request: &DeRequest,
        options: &DeOptions,
    ) -> Result<DifferentialExpressionParameters> {
        let bucket = study.bucket_id.as_str();
        let matrix = self.raw_matrix_for(study, cluster).await?;
        let cluster_file = db::files::load_study_file(&self.db, cluster.study_file_id)
            .await?
            .ok_or_else(|| IngestError::validation(format!("cluster file for {} not found", cluster.name)))?;
        if cluster_file.queued_for_deletion {
            return Err(IngestError::validation(format!(
                "cluster file for {} is queued for deletion",
                cluster.name
            )));
        }

        let (cluster_url, annotation_url) = if cluster_file.file_type == FileType::AnnData {
            let prefix = format!("gs://{}/{}/{}", bucket, ANNDATA_FRAGMENT_PREFIX, cluster_file.id);
            (
                format!("{}/h5ad_frag.cluster.{}.tsv.gz", prefix, cluster.name),
                match request.annotation_scope {
                    AnnotationScope::Study => format!("{}/h5ad_frag.metadata.tsv.gz", prefix),
                    AnnotationScope::Cluster => format!("{}/h5ad_frag.cluster.{}.tsv.gz", prefix, cluster.name),
                },
            )
        } else {
            let annotation_url = match request.annotation_scope {
                AnnotationScope::Cluster => cluster_file.gs_url(bucket),
                AnnotationScope::Study => db::files::list_files_of_type(&self.db, study.id, FileType::Metadata)
                    .await?
                    .first()
                    .map(|f| f.gs_url(bucket))
                    .ok_or_else(|| IngestError::validation(format!("study {} has no metadata file", study.accession)))?,
            };
            (cluster_file.gs_url(bucket), annotation_url)
        };

        let mut params = DifferentialExpressionParameters {
            annotation_name: request.annotation_name.clone(),
            annotation_scope: request.annotation_scope,
            de_type: request.de_type,
            group1: request.group1.clone(),
            group2: request.group2.clone(),
            annotation_file: annotation_url,
            cluster_file: cluster_url,
            cluster_name: cluster.name.clone(),
            matrix_file_path: matrix.gs_url(bucket),
            matrix_file_type: MatrixFileType::Dense,
            gene_file: None,
            barcode_file: None,
            file_size: None,
            raw_location: None,
            machine_type: options.machine_type.clone().unwrap_or_else(|| self.machine_type.clone()),
        };

        match matrix.file_type {
            FileType::MmCoordinateMatrix => {
                params.matrix_file_type = MatrixFileType::Mtx;
                if let Some(bundle_id) = matrix.bundle_id {
                    if let Some(bundle) = db::bundles::load_bundle(&self.db, bundle_id).await? {
                        let url = |t: FileType| bundle.children_of_type(t).first().map(|f| f.gs_url(bucket));
                        params.gene_file = url(FileType::TenXGenes);
                        params.barcode_file = url(FileType::TenXBarcodes);
                    }
                }
            }
            FileType::AnnData => {
                params.matrix_file_type = MatrixFileType::H5ad;
                params.file_size = Some(matrix.upload_file_size);
                params.raw_location = db::anndata::load_anndata_info(&self.db, matrix.id)
                    .await?
                    .and_then(|info| info.raw_location);
            }
            _ => {}
        }
        Ok(params)
    }

    /// First raw counts matrix whose cells cover every cell of `cluster`
    async fn raw_matrix_for(&self, study: &Study, cluster: &ClusterGroup) -> Result<StudyFile> {
        let files = db::files::list_study_files(&self.db, study.id).await?;
        files
            .into_iter()
            .filter(|f| f.file_type.is_expression_matrix() && f.raw_counts)
            .find(|f| cluster.cells.iter().all(|cell| f.matrix_cells.contains(cell)))
            .ok_or_else(|| {
                IngestError::validation(format!(
                    "no raw counts matrix in {} covers the cells of {}",
                    study.accession, cluster.name
                ))
            })
    }
}

/// Drop study-scope `X` when `X__ontology_label` is also a candidate
fn prefer_ontology_labels(candidates: Vec<AnnotationCandidate>) -> Vec<AnnotationCandidate> {
    let ontology_bases: Vec<String> = candidates
        .iter()
        .filter(|c| c.scope == AnnotationScope::Study)
        .filter_map(|c| c.name.strip_suffix(ONTOLOGY_LABEL_SUFFIX).map(str::to_string))
        .collect();

    candidates
        .into_iter()
        .filter(|c| !(c.scope == AnnotationScope::Study && ontology_bases.contains(&c.name)))
        .collect()
}
