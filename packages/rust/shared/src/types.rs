//! Core domain types for redline runs.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use uuid::Uuid;

use crate::error::{RedlineError, Result};

/// Stage name used for log entries emitted by the orchestrator itself.
pub const SYSTEM_STAGE: &str = "system";

// ---------------------------------------------------------------------------
// RunId
// ---------------------------------------------------------------------------

/// A UUID v7 wrapper for run identifiers (time-sortable).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(pub Uuid);

impl RunId {
    /// Generate a new time-sortable run identifier.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for RunId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

// ---------------------------------------------------------------------------
// Document
// ---------------------------------------------------------------------------

/// A source document discovered at run start. Immutable once listed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    /// File name, used as the document identifier throughout a run.
    pub name: String,
    /// Full path to the source file.
    pub path: PathBuf,
}

impl Document {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
        }
    }

    /// File name without its extension (`doc1.pdf` → `doc1`).
    pub fn stem(&self) -> &str {
        self.name
            .rsplit_once('.')
            .map(|(stem, _)| stem)
            .filter(|stem| !stem.is_empty())
            .unwrap_or(&self.name)
    }
}

// ---------------------------------------------------------------------------
// Span / CorpusEntry / Corpus
// ---------------------------------------------------------------------------

/// Smallest unit of extracted text: one non-empty paragraph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    /// Normalized paragraph text.
    pub text: String,
    /// Whether any run in the paragraph was struck through.
    pub struck: bool,
    /// Identifier of the owning document.
    pub document: String,
    /// Position within the document, starting at 0, in reading order.
    pub ordinal: usize,
}

/// Normalization outcome for one document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorpusEntry {
    /// Identifier of the document this entry describes.
    pub document: String,
    /// Whether conversion succeeded.
    pub converted: bool,
    /// Failure detail when `converted` is false.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Spans in document order.
    pub spans: Vec<Span>,
    /// Number of non-empty paragraphs.
    pub paragraph_count: usize,
    /// Number of paragraphs classified as struck.
    pub struck_count: usize,
    /// SHA-256 of the source bytes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,
    /// Where the intermediate representation was written, if retained.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intermediate_path: Option<PathBuf>,
}

impl CorpusEntry {
    /// Entry for a document whose conversion failed. Carries no spans.
    pub fn failed(document: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            document: document.into(),
            converted: false,
            error: Some(error.into()),
            spans: Vec::new(),
            paragraph_count: 0,
            struck_count: 0,
            content_hash: None,
            intermediate_path: None,
        }
    }

    /// Spans that are not voided.
    pub fn unstruck_spans(&self) -> impl Iterator<Item = &Span> {
        self.spans.iter().filter(|s| !s.struck)
    }
}

/// Per-document normalization results, in document listing order.
///
/// Holds at most one entry per document identifier.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Corpus {
    entries: Vec<CorpusEntry>,
}

impl Corpus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an entry. Fails if the document already has one.
    pub fn insert(&mut self, entry: CorpusEntry) -> Result<()> {
        if self.get(&entry.document).is_some() {
            return Err(RedlineError::validation(format!(
                "duplicate corpus entry for {}",
                entry.document
            )));
        }
        self.entries.push(entry);
        Ok(())
    }

    pub fn get(&self, document: &str) -> Option<&CorpusEntry> {
        self.entries.iter().find(|e| e.document == document)
    }

    pub fn entries(&self) -> &[CorpusEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of documents that converted successfully.
    pub fn converted_count(&self) -> usize {
        self.entries.iter().filter(|e| e.converted).count()
    }
}

impl Serialize for Corpus {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for entry in &self.entries {
            map.serialize_entry(&entry.document, entry)?;
        }
        map.end()
    }
}

// ---------------------------------------------------------------------------
// Execution log
// ---------------------------------------------------------------------------

/// Kind of an execution log event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    DocumentsListed,
    DocumentConverted,
    DocumentFailed,
    CorpusReady,
    AttemptStart,
    AttemptSucceeded,
    AttemptFailed,
    RetryScheduled,
    ResultStored,
    Alert,
    StageExhausted,
    RunCompleted,
    RunAborted,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DocumentsListed => "documents_listed",
            Self::DocumentConverted => "document_converted",
            Self::DocumentFailed => "document_failed",
            Self::CorpusReady => "corpus_ready",
            Self::AttemptStart => "attempt_start",
            Self::AttemptSucceeded => "attempt_succeeded",
            Self::AttemptFailed => "attempt_failed",
            Self::RetryScheduled => "retry_scheduled",
            Self::ResultStored => "result_stored",
            Self::Alert => "alert",
            Self::StageExhausted => "stage_exhausted",
            Self::RunCompleted => "run_completed",
            Self::RunAborted => "run_aborted",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One immutable execution log record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionLogEntry {
    /// When the event was recorded (RFC 3339 when serialized).
    pub timestamp: DateTime<Utc>,
    /// Stage the event belongs to, or [`SYSTEM_STAGE`].
    pub stage: String,
    /// What happened.
    #[serde(rename = "event_kind")]
    pub kind: EventKind,
    /// Free-form detail.
    pub detail: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(doc: &str) -> CorpusEntry {
        CorpusEntry {
            document: doc.into(),
            converted: true,
            error: None,
            spans: vec![Span {
                text: "Article 1".into(),
                struck: false,
                document: doc.into(),
                ordinal: 0,
            }],
            paragraph_count: 1,
            struck_count: 0,
            content_hash: None,
            intermediate_path: None,
        }
    }

    #[test]
    fn run_id_roundtrip() {
        let id = RunId::new();
        let parsed: RunId = id.to_string().parse().expect("parse RunId");
        assert_eq!(id, parsed);
    }

    #[test]
    fn document_stem() {
        assert_eq!(Document::new("doc1.pdf", "/tmp/doc1.pdf").stem(), "doc1");
        assert_eq!(Document::new("a.b.PDF", "/tmp/a.b.PDF").stem(), "a.b");
        assert_eq!(Document::new("noext", "/tmp/noext").stem(), "noext");
    }

    #[test]
    fn corpus_rejects_duplicates() {
        let mut corpus = Corpus::new();
        corpus.insert(entry("doc1.pdf")).expect("first insert");
        assert!(corpus.insert(entry("doc1.pdf")).is_err());
        assert_eq!(corpus.len(), 1);
    }

    #[test]
    fn corpus_serializes_as_ordered_map() {
        let mut corpus = Corpus::new();
        corpus.insert(entry("b.pdf")).unwrap();
        corpus
            .insert(CorpusEntry::failed("a.pdf", "bad xref"))
            .unwrap();

        let json = serde_json::to_string(&corpus).expect("serialize");
        let b_pos = json.find("\"b.pdf\":").unwrap();
        let a_pos = json.find("\"a.pdf\":").unwrap();
        assert!(b_pos < a_pos, "listing order must be preserved: {json}");
        assert!(json.contains(r#""converted":false"#));
        assert!(json.contains(r#""error":"bad xref""#));
        assert_eq!(corpus.converted_count(), 1);
    }

    #[test]
    fn event_kind_serializes_snake_case() {
        let json = serde_json::to_string(&EventKind::AttemptStart).unwrap();
        assert_eq!(json, r#""attempt_start""#);
        assert_eq!(EventKind::RetryScheduled.to_string(), "retry_scheduled");
    }

    #[test]
    fn log_entry_timestamp_is_iso8601() {
        let entry = ExecutionLogEntry {
            timestamp: "2025-07-01T12:00:00Z".parse().unwrap(),
            stage: SYSTEM_STAGE.into(),
            kind: EventKind::CorpusReady,
            detail: "2 documents".into(),
        };
        let json = serde_json::to_string(&entry).unwrap();
        assert!(json.contains(r#""timestamp":"2025-07-01T12:00:00Z""#));
        assert!(json.contains(r#""event_kind":"corpus_ready""#));
    }
}
