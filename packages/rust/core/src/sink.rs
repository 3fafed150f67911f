//! End-of-run persistence.

use std::path::{Path, PathBuf};

use tracing::{debug, info, instrument, warn};

use redline_shared::{AppConfig, RedlineError, Result};

use crate::context::PipelineContext;

/// Where run artifacts go.
#[derive(Debug, Clone)]
pub struct SinkConfig {
    /// Execution log, a JSON array of entries.
    pub log_path: PathBuf,
    /// Stage results, a JSON object keyed by stage name.
    pub results_path: PathBuf,
    /// Normalized corpus, when requested.
    pub corpus_path: Option<PathBuf>,
}

impl From<&AppConfig> for SinkConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            log_path: PathBuf::from(&config.output.log_path),
            results_path: PathBuf::from(&config.output.results_path),
            corpus_path: config.output.corpus_path.as_ref().map(PathBuf::from),
        }
    }
}

/// What [`ResultSink::persist`] managed to write.
#[derive(Debug, Default)]
pub struct PersistReport {
    pub written: Vec<PathBuf>,
    pub failed: Vec<(PathBuf, String)>,
}

impl PersistReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Writes the execution log and stage results. Best-effort: failures are
/// logged and reported, never raised.
#[derive(Debug, Clone)]
pub struct ResultSink {
    config: SinkConfig,
}

impl ResultSink {
    pub fn new(config: SinkConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SinkConfig {
        &self.config
    }

    #[instrument(skip_all, fields(run_id = %ctx.run_id()))]
    pub fn persist(&self, ctx: &PipelineContext) -> PersistReport {
        let mut report = PersistReport::default();

        attempt(&mut report, &self.config.log_path, ctx.log());
        attempt(&mut report, &self.config.results_path, ctx.results());
        if let Some(path) = &self.config.corpus_path {
            attempt(&mut report, path, ctx.corpus());
        }

        info!(
            written = report.written.len(),
            failed = report.failed.len(),
            "run artifacts persisted"
        );
        report
    }
}

fn attempt<T: serde::Serialize + ?Sized>(report: &mut PersistReport, path: &Path, data: &T) {
    match write_json(path, data) {
        Ok(()) => report.written.push(path.to_path_buf()),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "failed to persist run artifact");
            report.failed.push((path.to_path_buf(), e.to_string()));
        }
    }
}

/// Pretty-print `data` to `path`, creating parent directories.
pub(crate) fn write_json<T: serde::Serialize + ?Sized>(path: &Path, data: &T) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| RedlineError::io(parent, e))?;
    }
    let json = serde_json::to_string_pretty(data)
        .map_err(|e| RedlineError::Persistence(format!("JSON serialization failed: {e}")))?;
    std::fs::write(path, json).map_err(|e| RedlineError::io(path, e))?;
    debug!(path = %path.display(), "wrote JSON file");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use redline_shared::{EventKind, RunId};
    use serde_json::{Value, json};

    fn sink(dir: &Path) -> ResultSink {
        ResultSink::new(SinkConfig {
            log_path: dir.join("logs").join("execution_log.json"),
            results_path: dir.join("final_results.json"),
            corpus_path: None,
        })
    }

    #[test]
    fn writes_log_and_results() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = PipelineContext::new(RunId::new());
        ctx.record("ambiguity", EventKind::AttemptStart, "attempt 1/3");
        ctx.store_result("ambiguity", json!({"issues": []}));

        let report = sink(dir.path()).persist(&ctx);
        assert!(report.is_complete());
        assert_eq!(report.written.len(), 2);

        let log: Value = serde_json::from_str(
            &std::fs::read_to_string(dir.path().join("logs/execution_log.json")).unwrap(),
        )
        .unwrap();
        assert_eq!(log[0]["event_kind"], "attempt_start");
        assert_eq!(log[1]["event_kind"], "result_stored");
        assert_eq!(log[0]["stage"], "ambiguity");

        let results: Value = serde_json::from_str(
            &std::fs::read_to_string(dir.path().join("final_results.json")).unwrap(),
        )
        .unwrap();
        assert_eq!(results, json!({"ambiguity": {"issues": []}}));
    }

    #[test]
    fn empty_run_still_writes_results() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = PipelineContext::new(RunId::new());
        sink(dir.path()).persist(&ctx);

        let raw = std::fs::read_to_string(dir.path().join("final_results.json")).unwrap();
        assert_eq!(raw.trim(), "{}");
    }

    #[test]
    fn write_failure_is_reported_not_raised() {
        let dir = tempfile::tempdir().unwrap();
        // A file where a directory is needed.
        let blocker = dir.path().join("blocked");
        std::fs::write(&blocker, "x").unwrap();

        let sink = ResultSink::new(SinkConfig {
            log_path: blocker.join("log.json"),
            results_path: dir.path().join("final_results.json"),
            corpus_path: None,
        });
        let report = sink.persist(&PipelineContext::new(RunId::new()));

        assert!(!report.is_complete());
        assert_eq!(report.failed.len(), 1);
        assert!(dir.path().join("final_results.json").exists());
    }

    #[test]
    fn corpus_is_written_when_configured() {
        let dir = tempfile::tempdir().unwrap();
        let sink = ResultSink::new(SinkConfig {
            corpus_path: Some(dir.path().join("corpus.json")),
            ..sink(dir.path()).config().clone()
        });
        let report = sink.persist(&PipelineContext::new(RunId::new()));
        assert_eq!(report.written.len(), 3);
        assert!(dir.path().join("corpus.json").exists());
    }
}
