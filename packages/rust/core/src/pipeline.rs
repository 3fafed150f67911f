//! End-to-end run: discover → convert → stages → persist.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tracing::{debug, info, instrument, warn};

use redline_convert::{PdfConverter, StrikeOptions};
use redline_discovery::{DocumentStore, StoreOptions};
use redline_shared::{AppConfig, EventKind, Result, RunId, SYSTEM_STAGE};

use crate::context::PipelineContext;
use crate::corpus::CorpusBuilder;
use crate::runner::StageRunner;
use crate::sink::{PersistReport, ResultSink, SinkConfig};
use crate::stage::{RetryPolicy, StageExecutor, StageSpec, default_stages, validate_stages};

/// Where the orchestrator is in a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Preparing,
    /// Executing the stage at `index` (0-based) of the stage list.
    Running { index: usize, stage: String },
    Completed,
    Aborted { reason: String },
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Aborted { .. })
    }
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => f.write_str("idle"),
            Self::Preparing => f.write_str("preparing"),
            Self::Running { index, stage } => write!(f, "running({}: {stage})", index + 1),
            Self::Completed => f.write_str("completed"),
            Self::Aborted { reason } => write!(f, "aborted: {reason}"),
        }
    }
}

/// Outcome of a run. The context is returned whole so callers can inspect
/// everything that happened.
#[derive(Debug)]
pub struct RunReport {
    pub run_id: RunId,
    pub state: RunState,
    pub context: PipelineContext,
    pub persisted: PersistReport,
    pub elapsed: Duration,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        self.state == RunState::Completed
    }
}

/// Progress callback for reporting run status.
pub trait ProgressReporter: Send + Sync {
    /// Called when entering a new phase.
    fn phase(&self, name: &str);
    /// Called after each document is converted (or fails to).
    fn document_converted(&self, name: &str, converted: bool, current: usize, total: usize);
    /// Called before every stage attempt.
    fn stage_attempt(&self, stage: &str, attempt: u32, max_attempts: u32);
    /// Called when the run reaches a terminal state.
    fn done(&self, report: &RunReport);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn phase(&self, _name: &str) {}
    fn document_converted(&self, _name: &str, _converted: bool, _current: usize, _total: usize) {}
    fn stage_attempt(&self, _stage: &str, _attempt: u32, _max_attempts: u32) {}
    fn done(&self, _report: &RunReport) {}
}

/// Drives one run through `Idle → Preparing → Running(i) → Completed | Aborted`.
///
/// Stages run strictly one after another. The first non-retryable failure or
/// exhausted stage aborts the run and skips the rest. Artifacts are
/// persisted on every terminal state.
pub struct Orchestrator {
    store: DocumentStore,
    builder: CorpusBuilder,
    stages: Vec<StageSpec>,
    runner: StageRunner,
    sink: ResultSink,
    state: RunState,
}

impl Orchestrator {
    pub fn new(
        store: DocumentStore,
        builder: CorpusBuilder,
        stages: Vec<StageSpec>,
        policy: RetryPolicy,
        sink: ResultSink,
    ) -> Result<Self> {
        validate_stages(&stages)?;
        Ok(Self {
            store,
            builder,
            stages,
            runner: StageRunner::new(policy),
            sink,
            state: RunState::Idle,
        })
    }

    /// Orchestrator with the PDF converter and the built-in stages.
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let mut builder = CorpusBuilder::new(PdfConverter::new(StrikeOptions::from(config)));
        if config.output.keep_intermediate {
            builder = builder.keep_intermediate(intermediate_dir(&config.output.results_path));
        }
        Self::new(
            DocumentStore::new(StoreOptions::from(config)),
            builder,
            default_stages(),
            RetryPolicy::from(config),
            ResultSink::new(SinkConfig::from(config)),
        )
    }

    pub fn state(&self) -> &RunState {
        &self.state
    }

    pub fn stages(&self) -> &[StageSpec] {
        &self.stages
    }

    fn transition(&mut self, next: RunState) {
        debug!(from = %self.state, to = %next, "state transition");
        self.state = next;
    }

    /// List documents and build the corpus into a fresh context.
    ///
    /// Per-document conversion failures are recorded and skipped over.
    /// Returns `false` when no documents were found.
    pub fn prepare(&mut self, ctx: &mut PipelineContext, progress: &dyn ProgressReporter) -> bool {
        self.transition(RunState::Preparing);
        progress.phase("Listing documents");

        let documents = self.store.list();
        let names: Vec<&str> = documents.iter().map(|d| d.name.as_str()).collect();
        ctx.record(
            SYSTEM_STAGE,
            EventKind::DocumentsListed,
            format!("{} documents found: {names:?}", documents.len()),
        );
        if documents.is_empty() {
            return false;
        }

        progress.phase("Converting documents");
        let total = documents.len();
        for (i, doc) in documents.iter().enumerate() {
            let entry = self.builder.build(doc);
            let (kind, detail) = match &entry.error {
                None => (
                    EventKind::DocumentConverted,
                    format!(
                        "{}: {} paragraphs, {} struck",
                        doc.name, entry.paragraph_count, entry.struck_count
                    ),
                ),
                Some(error) => (EventKind::DocumentFailed, format!("{}: {error}", doc.name)),
            };
            progress.document_converted(&doc.name, entry.converted, i + 1, total);
            ctx.record(SYSTEM_STAGE, kind, detail);
            if let Err(e) = ctx.corpus_mut().insert(entry) {
                warn!(document = %doc.name, error = %e, "skipping duplicate document");
            }
        }

        let converted = ctx.corpus().converted_count();
        ctx.set_documents(documents);
        ctx.record(
            SYSTEM_STAGE,
            EventKind::CorpusReady,
            format!("{converted}/{total} documents converted"),
        );
        true
    }

    /// Execute a full run. Always returns a report; check
    /// [`RunReport::is_success`] for the outcome.
    #[instrument(skip_all, fields(stages = self.stages.len()))]
    pub async fn run(
        mut self,
        executor: &mut dyn StageExecutor,
        progress: &dyn ProgressReporter,
    ) -> RunReport {
        let start = Instant::now();
        let run_id = RunId::new();
        let mut ctx = PipelineContext::new(run_id.clone());
        info!(%run_id, root = %self.store.root().display(), "starting run");

        if self.prepare(&mut ctx, progress) {
            self.run_stages(&mut ctx, executor, progress).await;
        } else {
            self.abort(&mut ctx, "no documents discovered".into());
        }

        if let Err(e) = executor.shutdown() {
            warn!(error = %e, "executor shutdown failed");
        }

        progress.phase("Writing results");
        let persisted = self.sink.persist(&ctx);

        let report = RunReport {
            run_id,
            state: self.state.clone(),
            context: ctx,
            persisted,
            elapsed: start.elapsed(),
        };
        info!(state = %report.state, elapsed = ?report.elapsed, "run finished");
        progress.done(&report);
        report
    }

    async fn run_stages(
        &mut self,
        ctx: &mut PipelineContext,
        executor: &mut dyn StageExecutor,
        progress: &dyn ProgressReporter,
    ) {
        let stages = std::mem::take(&mut self.stages);
        let total = stages.len();

        for (index, stage) in stages.iter().enumerate() {
            self.transition(RunState::Running {
                index,
                stage: stage.name.clone(),
            });
            progress.phase(&format!("Stage {}/{total}: {}", index + 1, stage.name));

            match self.runner.run(stage, ctx, executor, progress).await {
                Ok(outcome) => {
                    debug!(stage = %stage.name, attempts = outcome.attempts, "stage done");
                }
                Err(e) => {
                    self.abort(ctx, e.to_string());
                    break;
                }
            }
        }
        self.stages = stages;

        if !self.state.is_terminal() {
            ctx.record(
                SYSTEM_STAGE,
                EventKind::RunCompleted,
                format!("{total} stages completed"),
            );
            self.transition(RunState::Completed);
        }
    }

    fn abort(&mut self, ctx: &mut PipelineContext, reason: String) {
        ctx.record(SYSTEM_STAGE, EventKind::RunAborted, &reason);
        self.transition(RunState::Aborted { reason });
    }
}

/// Build the corpus for `config` without running any stage.
pub fn build_corpus(config: &AppConfig, progress: &dyn ProgressReporter) -> Result<PipelineContext> {
    let mut orchestrator = Orchestrator::from_config(config)?;
    let mut ctx = PipelineContext::new(RunId::new());
    if !orchestrator.prepare(&mut ctx, progress) {
        ctx.record(SYSTEM_STAGE, EventKind::RunAborted, "no documents discovered");
    }
    Ok(ctx)
}

fn intermediate_dir(results_path: &str) -> PathBuf {
    Path::new(results_path)
        .parent()
        .unwrap_or(Path::new(""))
        .join("intermediate")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::tests::{Scripted, instant_retry};
    use redline_convert::testing::PdfBuilder;
    use redline_shared::Document;
    use serde_json::Value;

    const TRANSIENT: &str = "503 INTERNAL 500: backend unavailable";

    fn orchestrator(root: &Path, out: &Path) -> Orchestrator {
        let store = DocumentStore::new(StoreOptions {
            sort: true,
            ..StoreOptions::new(root)
        });
        Orchestrator::new(
            store,
            CorpusBuilder::new(PdfConverter::default()),
            default_stages(),
            instant_retry(3),
            ResultSink::new(SinkConfig {
                log_path: out.join("logs").join("execution_log.json"),
                results_path: out.join("final_results.json"),
                corpus_path: None,
            }),
        )
        .unwrap()
    }

    fn seed_documents(root: &Path) {
        std::fs::create_dir_all(root).unwrap();
        PdfBuilder::new()
            .paragraph("Resolution 12/2025")
            .paragraph("The water tariff will increase in July 2025.")
            .write_to(&root.join("doc1.pdf"))
            .unwrap();
        PdfBuilder::new()
            .paragraph("Resolution 13/2025")
            .struck_paragraph("Obsolete clause")
            .paragraph("Effective immediately.")
            .write_to(&root.join("doc2.pdf"))
            .unwrap();
    }

    fn stage_names(report: &RunReport) -> Vec<&str> {
        report.context.results().names().collect()
    }

    #[tokio::test]
    async fn documents_with_and_without_strikes() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("documents");
        seed_documents(&root);

        let report = orchestrator(&root, dir.path())
            .run(&mut Scripted::default(), &SilentProgress)
            .await;

        assert!(report.is_success());
        let corpus = report.context.corpus();
        assert_eq!(corpus.len(), 2);

        let doc1 = corpus.get("doc1.pdf").unwrap();
        assert!(doc1.converted);
        assert!(doc1.spans.iter().all(|s| !s.struck));

        let doc2 = corpus.get("doc2.pdf").unwrap();
        let struck: Vec<&str> = doc2
            .spans
            .iter()
            .filter(|s| s.struck)
            .map(|s| s.text.as_str())
            .collect();
        assert_eq!(struck, ["Obsolete clause"]);
        assert_eq!(doc2.spans.iter().filter(|s| !s.struck).count(), 2);
    }

    #[tokio::test]
    async fn missing_root_aborts_and_still_persists() {
        let dir = tempfile::tempdir().unwrap();
        let mut exec = Scripted::default();

        let report = orchestrator(&dir.path().join("absent"), dir.path())
            .run(&mut exec, &SilentProgress)
            .await;

        assert!(!report.is_success());
        assert!(matches!(&report.state, RunState::Aborted { reason } if reason.contains("no documents")));
        assert!(exec.calls.is_empty());
        let last = report.context.log().last().unwrap();
        assert_eq!(last.kind, EventKind::RunAborted);

        let raw = std::fs::read_to_string(dir.path().join("final_results.json")).unwrap();
        assert_eq!(serde_json::from_str::<Value>(&raw).unwrap(), serde_json::json!({}));
        assert!(dir.path().join("logs/execution_log.json").exists());
    }

    #[tokio::test]
    async fn transient_failures_in_second_stage_recover() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("documents");
        seed_documents(&root);
        let mut exec = Scripted::default().fail("spelling_grammar", TRANSIENT, 2);

        let report = orchestrator(&root, dir.path())
            .run(&mut exec, &SilentProgress)
            .await;

        assert!(report.is_success());
        assert_eq!(
            stage_names(&report),
            ["contradiction", "spelling_grammar", "ambiguity", "validation"]
        );
        let ctx = &report.context;
        assert_eq!(ctx.count_events("spelling_grammar", EventKind::AttemptStart), 3);
        assert_eq!(ctx.count_events("contradiction", EventKind::AttemptStart), 1);
        assert_eq!(
            ctx.log().last().map(|e| e.kind),
            Some(EventKind::RunCompleted)
        );
    }

    #[tokio::test]
    async fn exhausted_stage_skips_the_rest() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("documents");
        seed_documents(&root);
        let mut exec = Scripted::default().fail("spelling_grammar", TRANSIENT, 3);

        let report = orchestrator(&root, dir.path())
            .run(&mut exec, &SilentProgress)
            .await;

        assert!(!report.is_success());
        assert_eq!(stage_names(&report), ["contradiction"]);
        let ctx = &report.context;
        assert_eq!(ctx.entries_for("ambiguity").count(), 0);
        assert_eq!(ctx.entries_for("validation").count(), 0);
        assert_eq!(exec.calls, ["contradiction", "spelling_grammar", "spelling_grammar", "spelling_grammar"]);

        let results: Value = serde_json::from_str(
            &std::fs::read_to_string(dir.path().join("final_results.json")).unwrap(),
        )
        .unwrap();
        assert!(results.get("contradiction").is_some());
        assert!(results.get("spelling_grammar").is_none());
    }

    #[tokio::test]
    async fn permanent_failure_aborts_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("documents");
        seed_documents(&root);
        let mut exec = Scripted::default().fail("contradiction", "400 invalid argument", 1);

        let report = orchestrator(&root, dir.path())
            .run(&mut exec, &SilentProgress)
            .await;

        assert!(matches!(report.state, RunState::Aborted { .. }));
        assert!(report.context.results().is_empty());
        assert_eq!(exec.calls.len(), 1);
    }

    #[tokio::test]
    async fn log_is_strictly_stage_ordered() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("documents");
        seed_documents(&root);
        let mut exec = Scripted::default().fail("ambiguity", TRANSIENT, 1);

        let report = orchestrator(&root, dir.path())
            .run(&mut exec, &SilentProgress)
            .await;
        let log = report.context.log();

        let stages = ["contradiction", "spelling_grammar", "ambiguity", "validation"];
        for pair in stages.windows(2) {
            let succeeded = log
                .iter()
                .position(|e| e.stage == pair[0] && e.kind == EventKind::AttemptSucceeded)
                .unwrap();
            let next_first = log.iter().position(|e| e.stage == pair[1]).unwrap();
            assert!(succeeded < next_first, "{} ran before {} settled", pair[1], pair[0]);
        }
    }

    #[tokio::test]
    async fn validation_sees_every_prior_result() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("documents");
        seed_documents(&root);

        let report = orchestrator(&root, dir.path())
            .run(&mut Scripted::default(), &SilentProgress)
            .await;

        let seen = &report.context.result("validation").unwrap()["seen"];
        assert_eq!(
            seen,
            &serde_json::json!(["contradiction", "spelling_grammar", "ambiguity"])
        );
    }

    #[tokio::test]
    async fn unreadable_document_does_not_stop_the_run() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("documents");
        seed_documents(&root);
        std::fs::write(root.join("broken.pdf"), b"not a pdf at all").unwrap();

        let report = orchestrator(&root, dir.path())
            .run(&mut Scripted::default(), &SilentProgress)
            .await;

        assert!(report.is_success());
        let corpus = report.context.corpus();
        assert_eq!(corpus.len(), 3);
        assert_eq!(corpus.converted_count(), 2);
        assert!(!corpus.get("broken.pdf").unwrap().converted);
        assert_eq!(
            report
                .context
                .count_events(SYSTEM_STAGE, EventKind::DocumentFailed),
            1
        );
        let listed: Vec<&Document> = report.context.documents().iter().collect();
        assert_eq!(listed.len(), 3);
    }

    #[test]
    fn intermediate_dir_sits_next_to_results() {
        assert_eq!(
            intermediate_dir("out/final_results.json"),
            PathBuf::from("out/intermediate")
        );
        assert_eq!(intermediate_dir("final_results.json"), PathBuf::from("intermediate"));
    }
}
