//! Run-scoped state shared by every stage.

use chrono::Utc;
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use serde_json::Value;
use tracing::info;

use redline_shared::{Corpus, Document, EventKind, ExecutionLogEntry, RunId};

/// Stage results in execution order, keyed by stage name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StageResults {
    entries: Vec<(String, Value)>,
}

impl StageResults {
    pub fn get(&self, stage: &str) -> Option<&Value> {
        self.entries
            .iter()
            .find(|(name, _)| name == stage)
            .map(|(_, value)| value)
    }

    pub fn contains(&self, stage: &str) -> bool {
        self.get(stage).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Stage names in the order their results were stored.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(name, _)| name.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(name, value)| (name.as_str(), value))
    }

    pub fn last(&self) -> Option<(&str, &Value)> {
        self.entries.last().map(|(name, value)| (name.as_str(), value))
    }

    /// Insert or replace. A replaced result keeps its original position.
    fn insert(&mut self, stage: &str, value: Value) {
        match self.entries.iter_mut().find(|(name, _)| name == stage) {
            Some(slot) => slot.1 = value,
            None => self.entries.push((stage.to_string(), value)),
        }
    }
}

impl Serialize for StageResults {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (name, value) in &self.entries {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

/// Everything one run knows: documents, corpus, stage results and the log.
///
/// Owned by a single orchestrator for the lifetime of one run and passed
/// explicitly to whatever needs it. Stages only ever see `&PipelineContext`.
#[derive(Debug)]
pub struct PipelineContext {
    run_id: RunId,
    documents: Vec<Document>,
    corpus: Corpus,
    results: StageResults,
    log: Vec<ExecutionLogEntry>,
}

impl PipelineContext {
    pub fn new(run_id: RunId) -> Self {
        Self {
            run_id,
            documents: Vec::new(),
            corpus: Corpus::new(),
            results: StageResults::default(),
            log: Vec::new(),
        }
    }

    pub fn run_id(&self) -> &RunId {
        &self.run_id
    }

    pub fn documents(&self) -> &[Document] {
        &self.documents
    }

    pub fn corpus(&self) -> &Corpus {
        &self.corpus
    }

    pub fn results(&self) -> &StageResults {
        &self.results
    }

    pub fn result(&self, stage: &str) -> Option<&Value> {
        self.results.get(stage)
    }

    pub fn log(&self) -> &[ExecutionLogEntry] {
        &self.log
    }

    pub(crate) fn set_documents(&mut self, documents: Vec<Document>) {
        self.documents = documents;
    }

    pub(crate) fn corpus_mut(&mut self) -> &mut Corpus {
        &mut self.corpus
    }

    /// Append a log entry and mirror it to tracing.
    pub fn record(&mut self, stage: &str, kind: EventKind, detail: impl Into<String>) {
        let detail = detail.into();
        info!(run_id = %self.run_id, "[{stage}] {kind} → {detail}");
        self.log.push(ExecutionLogEntry {
            timestamp: Utc::now(),
            stage: stage.to_string(),
            kind,
            detail,
        });
    }

    /// Store a stage's result verbatim and log it.
    pub fn store_result(&mut self, stage: &str, value: Value) {
        self.results.insert(stage, value);
        self.record(stage, EventKind::ResultStored, "result stored");
    }

    /// Log entries belonging to `stage`, in order.
    pub fn entries_for<'a>(&'a self, stage: &'a str) -> impl Iterator<Item = &'a ExecutionLogEntry> {
        self.log.iter().filter(move |e| e.stage == stage)
    }

    /// Number of `kind` events logged for `stage`.
    pub fn count_events(&self, stage: &str, kind: EventKind) -> usize {
        self.entries_for(stage).filter(|e| e.kind == kind).count()
    }
}
