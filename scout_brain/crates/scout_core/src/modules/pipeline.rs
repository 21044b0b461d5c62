use crate::modules::advisor::{Advisor, AdvisorError};
use crate::modules::catalog::{Catalog, CatalogError, Tone3000Catalog};
use crate::modules::cleaner::sanitize_line;
use crate::modules::config::{normalize_model_id, PipelineConfig};
use crate::modules::downloader::{write_rig_files, DownloadManager};
use crate::modules::gemini::{GeminiClient, JsonModel};
use crate::modules::journal::RunJournal;
use crate::modules::pool::{amp_queries, CandidatePool, PoolBuilder, PoolOutcome};
use crate::modules::resolver::ModelResolver;
use crate::modules::selection::SelectionEngine;
use scout_protocol::{
    DownloadRecord, DownloadStatus, ErrorKind, GearType, RequestAnalysis, RunCounts, RunError,
    RunResult, Secret, Selection, SelectionMode, Stage, ToneRequest,
};
use thiserror::Error;
use tracing::{error, info};

pub const MAX_TONES_RANGE: std::ops::RangeInclusive<u8> = 1..=5;
pub const MAX_RESULTS_RANGE: std::ops::RangeInclusive<u8> = 5..=25;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("invalid request: {0}")]
    Validation(String),
    #[error(transparent)]
    Catalog(#[from] CatalogError),
    #[error(transparent)]
    Advisor(#[from] AdvisorError),
    #[error("no candidates: {0}")]
    NoCandidates(String),
    #[error("download failed: {0}")]
    DownloadFailure(String),
}

impl PipelineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::Validation(_) => ErrorKind::ValidationError,
            PipelineError::Catalog(CatalogError::Auth(_)) => ErrorKind::CatalogAuthError,
            PipelineError::Catalog(_) => ErrorKind::CatalogUnavailable,
            PipelineError::Advisor(AdvisorError::Transport(_)) => ErrorKind::AiTransportError,
            PipelineError::Advisor(AdvisorError::Malformed(_)) => ErrorKind::AiMalformedResponse,
            PipelineError::Advisor(AdvisorError::EmptyDecision(_)) => ErrorKind::AiEmptyDecision,
            PipelineError::NoCandidates(_) => ErrorKind::NoCandidates,
            PipelineError::DownloadFailure(_) => ErrorKind::DownloadFailure,
        }
    }
}

/// Forward moves follow the fixed stage order; any live stage may fail.
pub fn transition_allowed(from: Stage, to: Stage) -> bool {
    use Stage::*;
    match (from, to) {
        (Done | Failed, _) => false,
        (_, Failed) => true,
        (Idle, AnalyzingRequest)
        | (AnalyzingRequest, BuildingPool)
        | (BuildingPool, Selecting)
        | (Selecting, ResolvingModels)
        | (ResolvingModels, Downloading)
        | (Downloading, Done) => true,
        _ => false,
    }
}

fn stage_label(stage: Stage) -> &'static str {
    match stage {
        Stage::Idle => "idle",
        Stage::AnalyzingRequest => "analyzing request",
        Stage::BuildingPool => "building candidate pool",
        Stage::Selecting => "selecting profiles",
        Stage::ResolvingModels => "resolving model files",
        Stage::Downloading => "downloading",
        Stage::Done => "done",
        Stage::Failed => "failed",
    }
}

/// A request that passed validation.
#[derive(Debug, Clone)]
pub struct ValidRequest {
    pub text: String,
    pub model: String,
    pub max_tones: usize,
    pub max_results: usize,
    pub catalog_key: Secret,
    pub ai_key: Secret,
}

fn present(secret: &Option<Secret>) -> Option<Secret> {
    secret.as_ref().filter(|s| !s.is_blank()).cloned()
}

/// Rejects out-of-range values instead of clamping them.
pub fn validate(request: &ToneRequest) -> Result<ValidRequest, PipelineError> {
    let text = sanitize_line(&request.request);
    if text.is_empty() {
        return Err(PipelineError::Validation("request text is empty".to_string()));
    }
    if !MAX_TONES_RANGE.contains(&request.max_tones) {
        return Err(PipelineError::Validation(format!(
            "max_tones must be between {} and {}, got {}",
            MAX_TONES_RANGE.start(),
            MAX_TONES_RANGE.end(),
            request.max_tones
        )));
    }
    if !MAX_RESULTS_RANGE.contains(&request.max_results) {
        return Err(PipelineError::Validation(format!(
            "max_results must be between {} and {}, got {}",
            MAX_RESULTS_RANGE.start(),
            MAX_RESULTS_RANGE.end(),
            request.max_results
        )));
    }
    if request.output_dir.as_os_str().is_empty() {
        return Err(PipelineError::Validation("output directory is empty".to_string()));
    }
    let model =
        normalize_model_id(request.ai_model.as_deref()).map_err(PipelineError::Validation)?;
    let catalog_key = present(&request.credentials.catalog_api_key).ok_or_else(|| {
        PipelineError::Validation("missing Tone3000 API key".to_string())
    })?;
    let ai_key = present(&request.credentials.ai_api_key)
        .ok_or_else(|| PipelineError::Validation("missing Gemini API key".to_string()))?;

    Ok(ValidRequest {
        text,
        model,
        max_tones: request.max_tones as usize,
        max_results: request.max_results as usize,
        catalog_key,
        ai_key,
    })
}

#[derive(Default)]
struct Partial {
    analysis: Option<RequestAnalysis>,
    pool_size: usize,
    selection: Option<Selection>,
    downloads: Vec<DownloadRecord>,
}

struct Run {
    stage: Stage,
    journal: RunJournal,
    partial: Partial,
}

impl Run {
    fn new() -> Self {
        Self {
            stage: Stage::Idle,
            journal: RunJournal::new(),
            partial: Partial::default(),
        }
    }

    fn enter(&mut self, next: Stage) {
        if !transition_allowed(self.stage, next) {
            error!(from = ?self.stage, to = ?next, "illegal stage transition");
            return;
        }
        self.stage = next;
        self.journal.log(format!("Stage: {}", stage_label(next)));
    }
}

fn failed_before_start(request: &ToneRequest, model: String, err: PipelineError) -> RunResult {
    let message = err.to_string();
    error!(kind = ?err.kind(), %message, "run rejected");
    RunResult {
        success: false,
        request: request.request.clone(),
        ai_model: model,
        analysis: None,
        pool_size: 0,
        selection: None,
        downloads: Vec::new(),
        counts: RunCounts::default(),
        ai_steps: Vec::new(),
        output_dir: request.output_dir.clone(),
        error: Some(RunError {
            kind: err.kind(),
            message,
            stage: Stage::Idle,
        }),
        logs: vec![format!("Error: {err}")],
    }
}

/// One run against injected catalog and model collaborators.
pub struct Pipeline<'a> {
    catalog: &'a dyn Catalog,
    model: &'a dyn JsonModel,
    config: PipelineConfig,
}

impl<'a> Pipeline<'a> {
    pub fn new(catalog: &'a dyn Catalog, model: &'a dyn JsonModel, config: PipelineConfig) -> Self {
        Self {
            catalog,
            model,
            config,
        }
    }

    /// Always yields exactly one RunResult; failures are folded into it.
    pub async fn run(&self, request: &ToneRequest) -> RunResult {
        let valid = match validate(request) {
            Ok(v) => v,
            Err(e) => {
                let model = request.ai_model.clone().unwrap_or_default();
                return failed_before_start(request, model, e);
            }
        };

        let mut run = Run::new();
        let outcome = self.drive(&valid, request.mode, &request.output_dir, &mut run).await;

        let (failure, failed_at) = match outcome {
            Ok(()) => (None, None),
            Err(e) => (Some(e), Some(run.stage)),
        };
        if let Some(e) = failure.as_ref() {
            run.journal.log(format!("Error: {e}"));
            error!(kind = ?e.kind(), error = %e, "run failed");
        }
        if failure.is_some() {
            run.enter(Stage::Failed);
        }

        let Run {
            journal, partial, ..
        } = run;
        let counts = RunCounts::from_records(&partial.downloads);
        let (logs, ai_steps) = journal.into_parts();
        RunResult {
            success: failure.is_none(),
            request: valid.text,
            ai_model: valid.model,
            analysis: partial.analysis,
            pool_size: partial.pool_size,
            selection: partial.selection,
            downloads: partial.downloads,
            counts,
            ai_steps,
            output_dir: request.output_dir.clone(),
            error: failure.map(|e| RunError {
                kind: e.kind(),
                message: e.to_string(),
                stage: failed_at.unwrap_or(Stage::Idle),
            }),
            logs,
        }
    }

    async fn drive(
        &self,
        req: &ValidRequest,
        mode: SelectionMode,
        output_dir: &std::path::Path,
        run: &mut Run,
    ) -> Result<(), PipelineError> {
        let advisor = Advisor::new(self.model, self.config.ai_reprompts);
        run.journal.log(format!(
            "Request: \"{}\" (model {}, max tones {}, max results {}, mode {:?})",
            req.text, req.model, req.max_tones, req.max_results, mode
        ));

        run.enter(Stage::AnalyzingRequest);
        let analysis = match advisor.analyze_request(&req.text).await {
            Ok(a) => a,
            Err(e) => {
                run.journal
                    .step("Request analysis", vec![format!("Analysis failed: {e}")]);
                return Err(e.into());
            }
        };
        run.journal.step("Request analysis", analysis_details(&analysis));
        run.partial.analysis = Some(analysis.clone());

        run.enter(Stage::BuildingPool);
        let pool = self
            .build_pool(req, mode, &analysis, &mut run.journal)
            .await?;
        run.partial.pool_size = pool.len();
        run.journal
            .log(format!("Candidate pool: {} profile(s)", pool.len()));

        run.enter(Stage::Selecting);
        let engine = SelectionEngine::new(
            self.catalog,
            &advisor,
            self.config.search_page_size,
            req.max_results,
        );
        let selection = match mode {
            SelectionMode::Simple => {
                engine
                    .select_profiles(&pool, req.max_tones, &req.text, &mut run.journal)
                    .await?
            }
            SelectionMode::Rig => {
                engine
                    .select_rigs(&pool, req.max_tones, &req.text, &analysis, &mut run.journal)
                    .await?
            }
        };
        run.partial.selection = Some(selection.clone());

        run.enter(Stage::ResolvingModels);
        let resolver = ModelResolver::new(
            self.catalog,
            &advisor,
            self.config.max_models_per_profile,
            self.config.download_workers,
        );
        let resolved = resolver
            .resolve(&selection, &req.text, &mut run.journal)
            .await?;

        run.enter(Stage::Downloading);
        let manager =
            DownloadManager::new(self.catalog, output_dir, self.config.download_workers);
        let records = manager.download(&resolved, &mut run.journal).await;
        write_rig_files(output_dir, &selection, &records, &mut run.journal).await;
        run.partial.downloads = records;

        let counts = RunCounts::from_records(&run.partial.downloads);
        run.journal.step(
            "Download summary",
            vec![
                format!("Selected profiles: {}", selection.len()),
                format!("Attempted files: {}", counts.attempted),
                format!("Downloaded: {}", counts.downloaded),
                format!("Skipped (already present): {}", counts.skipped),
                format!("Failed: {}", counts.failed),
                format!("Output directory: {}", output_dir.display()),
            ],
        );

        let usable = run
            .partial
            .downloads
            .iter()
            .any(|r| r.status != DownloadStatus::Failed);
        if !usable {
            let message = if counts.attempted == 0 {
                "no model files were available for the selected profiles".to_string()
            } else {
                format!("all {} attempted files failed", counts.attempted)
            };
            return Err(PipelineError::DownloadFailure(message));
        }

        run.enter(Stage::Done);
        info!(
            downloaded = counts.downloaded,
            skipped = counts.skipped,
            failed = counts.failed,
            "run complete"
        );
        Ok(())
    }

    async fn build_pool(
        &self,
        req: &ValidRequest,
        mode: SelectionMode,
        analysis: &RequestAnalysis,
        journal: &mut RunJournal,
    ) -> Result<CandidatePool, PipelineError> {
        let page = self.config.search_page_size;
        let outcome = match mode {
            SelectionMode::Simple => {
                PoolBuilder::new(self.catalog, req.max_results, page)
                    .gear(analysis.gear)
                    .build(&analysis.search_queries, &analysis.fallback_queries)
                    .await?
            }
            SelectionMode::Rig => {
                let (primary, fallback) = amp_queries(analysis, &req.text);
                let strict = PoolBuilder::new(self.catalog, req.max_results, page)
                    .gear(Some(GearType::Amp))
                    .build(&primary, &fallback)
                    .await;
                match strict {
                    Ok(outcome) if !outcome.pool.is_empty() => outcome,
                    Ok(outcome) => {
                        for note in outcome.notes {
                            journal.log(note);
                        }
                        journal.log("No amp results with the gear filter; retrying without it");
                        self.relaxed_amp_pool(req, &primary, &fallback).await?
                    }
                    Err(CatalogError::Unavailable(msg)) => {
                        journal.log(format!(
                            "Amp search with the gear filter failed ({msg}); retrying without it"
                        ));
                        self.relaxed_amp_pool(req, &primary, &fallback).await?
                    }
                    Err(e) => return Err(e.into()),
                }
            }
        };
        for note in outcome.notes {
            journal.log(note);
        }
        Ok(outcome.pool)
    }

    /// Unfiltered search that keeps only amp captures.
    async fn relaxed_amp_pool(
        &self,
        req: &ValidRequest,
        primary: &[String],
        fallback: &[String],
    ) -> Result<PoolOutcome, CatalogError> {
        PoolBuilder::new(self.catalog, req.max_results, self.config.search_page_size)
            .only(|p| p.gear == GearType::Amp)
            .build(primary, fallback)
            .await
    }
}

fn analysis_details(a: &RequestAnalysis) -> Vec<String> {
    let mut details = vec![
        format!("Summary: {}", a.description),
        format!(
            "Gear: {}",
            a.gear.map(|g| g.as_str()).unwrap_or("any")
        ),
    ];
    if a.explanation_steps.is_empty() {
        details.push(format!("Search queries: {}", a.search_queries.join(", ")));
        if !a.fallback_queries.is_empty() {
            details.push(format!("Fallback queries: {}", a.fallback_queries.join(", ")));
        }
    } else {
        details.extend(a.explanation_steps.iter().cloned());
    }
    details
}

/// Entry point for hosts: validates, connects the real clients, runs once.
pub async fn run_download(request: ToneRequest) -> RunResult {
    let valid = match validate(&request) {
        Ok(v) => v,
        Err(e) => {
            let model = request.ai_model.clone().unwrap_or_default();
            return failed_before_start(&request, model, e);
        }
    };
    let config = match PipelineConfig::from_env() {
        Ok(c) => c,
        Err(e) => {
            return failed_before_start(&request, valid.model, PipelineError::Validation(e.to_string()))
        }
    };

    let catalog = match Tone3000Catalog::connect(&config, &valid.catalog_key).await {
        Ok(c) => c,
        Err(e) => return failed_before_start(&request, valid.model, e.into()),
    };
    let gemini = match GeminiClient::new(&config, &valid.model, valid.ai_key.clone()) {
        Ok(g) => g,
        Err(e) => {
            return failed_before_start(
                &request,
                valid.model,
                AdvisorError::Transport(e).into(),
            )
        }
    };

    let mut result = Pipeline::new(&catalog, &gemini, config).run(&request).await;
    result.logs.insert(0, "Tone3000 session authenticated".to_string());
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use scout_protocol::Credentials;

    fn request() -> ToneRequest {
        let mut r = ToneRequest::new("warm vintage crunch", "out");
        r.credentials = Credentials {
            catalog_api_key: Some(Secret::new("t3k")),
            ai_api_key: Some(Secret::new("gk")),
        };
        r
    }

    #[test]
    fn stage_machine() {
        assert!(transition_allowed(Stage::Idle, Stage::AnalyzingRequest));
        assert!(transition_allowed(Stage::Downloading, Stage::Done));
        assert!(transition_allowed(Stage::BuildingPool, Stage::Failed));
        assert!(!transition_allowed(Stage::Idle, Stage::Selecting));
        assert!(!transition_allowed(Stage::Done, Stage::Failed));
        assert!(!transition_allowed(Stage::Failed, Stage::Idle));
    }

    #[test]
    fn validation_rejects_out_of_range() {
        let mut r = request();
        r.max_tones = 0;
        assert!(matches!(validate(&r), Err(PipelineError::Validation(_))));
        let mut r = request();
        r.max_results = 30;
        assert!(matches!(validate(&r), Err(PipelineError::Validation(_))));
        let mut r = request();
        r.request = " \n ".to_string();
        assert!(matches!(validate(&r), Err(PipelineError::Validation(_))));
        let mut r = request();
        r.ai_model = Some("bad model!".to_string());
        assert!(matches!(validate(&r), Err(PipelineError::Validation(_))));
    }

    #[test]
    fn validation_requires_both_keys() {
        let mut r = request();
        r.credentials.ai_api_key = Some(Secret::new("  "));
        let err = validate(&r).unwrap_err();
        assert!(err.to_string().contains("Gemini"));
        let mut r = request();
        r.credentials.catalog_api_key = None;
        assert!(validate(&r).unwrap_err().to_string().contains("Tone3000"));
    }

    #[test]
    fn valid_request_defaults_model() {
        let v = validate(&request()).unwrap();
        assert_eq!(v.model, "gemini-2.5-pro");
        assert_eq!(v.max_tones, 3);
    }

    #[test]
    fn error_kinds_map_one_to_one() {
        assert_eq!(
            PipelineError::from(CatalogError::Auth("x".into())).kind(),
            ErrorKind::CatalogAuthError
        );
        assert_eq!(
            PipelineError::from(CatalogError::Decode("x".into())).kind(),
            ErrorKind::CatalogUnavailable
        );
        assert_eq!(
            PipelineError::from(AdvisorError::EmptyDecision("x".into())).kind(),
            ErrorKind::AiEmptyDecision
        );
    }
}
