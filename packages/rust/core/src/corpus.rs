//! Converted documents → analysis-ready spans.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, instrument, warn};

use redline_convert::{ConvertedDocument, FormatConverter};
use redline_shared::{CorpusEntry, Document, Span};

use crate::sink::write_json;

static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\s+").expect("whitespace regex is valid")
});

/// Collapse whitespace runs to a single space and trim.
pub fn normalize(text: &str) -> String {
    WHITESPACE.replace_all(text.trim(), " ").into_owned()
}

/// Builds one [`CorpusEntry`] per document.
pub struct CorpusBuilder {
    converter: Box<dyn FormatConverter>,
    intermediate_dir: Option<PathBuf>,
}

impl CorpusBuilder {
    pub fn new(converter: impl FormatConverter + 'static) -> Self {
        Self {
            converter: Box::new(converter),
            intermediate_dir: None,
        }
    }

    /// Retain each converted document as `<dir>/<stem>.json`.
    pub fn keep_intermediate(mut self, dir: impl Into<PathBuf>) -> Self {
        self.intermediate_dir = Some(dir.into());
        self
    }

    /// Convert and normalize one document. Never fails: a conversion error
    /// yields an unconverted entry with no spans.
    #[instrument(skip_all, fields(document = %doc.name))]
    pub fn build(&self, doc: &Document) -> CorpusEntry {
        let converted = match self.converter.convert(doc) {
            Ok(converted) => converted,
            Err(e) => {
                warn!(error = %e, "conversion failed");
                return CorpusEntry::failed(&doc.name, e.to_string());
            }
        };

        let intermediate_path = self
            .intermediate_dir
            .as_deref()
            .and_then(|dir| retain(dir, doc, &converted));

        let mut entry = extract(doc, &converted);
        entry.intermediate_path = intermediate_path;
        debug!(
            paragraphs = entry.paragraph_count,
            struck = entry.struck_count,
            "document normalized"
        );
        entry
    }
}

/// Walk paragraphs in order, drop empty ones, and flag a paragraph struck
/// when any of its runs is.
fn extract(doc: &Document, converted: &ConvertedDocument) -> CorpusEntry {
    let spans: Vec<Span> = converted
        .paragraphs
        .iter()
        .filter_map(|p| {
            let text = normalize(&p.text());
            (!text.is_empty()).then(|| (text, p.is_struck()))
        })
        .enumerate()
        .map(|(ordinal, (text, struck))| Span {
            text,
            struck,
            document: doc.name.clone(),
            ordinal,
        })
        .collect();

    CorpusEntry {
        document: doc.name.clone(),
        converted: true,
        error: None,
        paragraph_count: spans.len(),
        struck_count: spans.iter().filter(|s| s.struck).count(),
        spans,
        content_hash: Some(converted.content_hash.clone()),
        intermediate_path: None,
    }
}

fn retain(dir: &Path, doc: &Document, converted: &ConvertedDocument) -> Option<PathBuf> {
    let path = dir.join(format!("{}.json", doc.stem()));
    match write_json(&path, converted) {
        Ok(()) => Some(path),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "failed to retain intermediate document");
            None
        }
    }
}
