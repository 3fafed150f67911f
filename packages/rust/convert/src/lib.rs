//! PDF → paragraph/run conversion with strike-through inference.
//!
//! PDFs carry no character-level "strike" attribute, so struck text is
//! inferred visually: a thin, near-horizontal line whose vertical center
//! falls inside a run's box and which overlaps the run horizontally marks
//! that run as struck. Lines are collected for the whole page before any
//! run is tested, and the first crossing line decides. `StrikeOut`
//! annotations contribute lines the same way.

mod annotations;
mod content;
mod fonts;
mod geometry;
mod layout;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

use std::path::{Path, PathBuf};

use lopdf::content::Content;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, instrument, warn};

use redline_shared::{Document, RedlineError, Result};

pub use geometry::{BBox, StrikeOptions};

use geometry::DrawnLine;
use layout::PlacedRun;

// ---------------------------------------------------------------------------
// Intermediate representation
// ---------------------------------------------------------------------------

/// A contiguous piece of text sharing one strike state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    pub text: String,
    pub strike: bool,
}

/// Runs laid out as one paragraph, in reading order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Paragraph {
    pub runs: Vec<Run>,
}

impl Paragraph {
    /// Concatenated run text.
    pub fn text(&self) -> String {
        self.runs.iter().map(|r| r.text.as_str()).collect()
    }

    /// Whether any run in the paragraph is struck.
    pub fn is_struck(&self) -> bool {
        self.runs.iter().any(|r| r.strike)
    }
}

/// A converted source document: paragraphs → runs → strike flags.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConvertedDocument {
    /// Path of the source file.
    pub source: PathBuf,
    /// Number of pages read.
    pub page_count: usize,
    /// SHA-256 of the source bytes.
    pub content_hash: String,
    /// Paragraphs in document order.
    pub paragraphs: Vec<Paragraph>,
}

// ---------------------------------------------------------------------------
// Converter
// ---------------------------------------------------------------------------

/// Turns a source document into the intermediate paragraph/run model.
pub trait FormatConverter {
    /// Convert one document. Failures are per-document
    /// (`SourceNotFound` or `ConversionFailed`).
    fn convert(&self, doc: &Document) -> Result<ConvertedDocument>;
}

/// PDF converter using visual strike-line inference.
#[derive(Debug, Clone, Default)]
pub struct PdfConverter {
    opts: StrikeOptions,
}

impl PdfConverter {
    pub fn new(opts: StrikeOptions) -> Self {
        Self { opts }
    }

    /// Convert in-memory PDF bytes. `source` is used for error context only.
    #[instrument(skip(self, bytes), fields(source = %source.display(), len = bytes.len()))]
    pub fn convert_bytes(&self, source: &Path, bytes: &[u8]) -> Result<ConvertedDocument> {
        let pdf = lopdf::Document::load_mem(bytes)
            .map_err(|e| RedlineError::conversion(source, format!("invalid PDF: {e}")))?;

        let pages = pdf.get_pages();
        let mut paragraphs = Vec::new();

        for (page_no, page_id) in &pages {
            let raw = pdf.get_page_content(*page_id).map_err(|e| {
                RedlineError::conversion(source, format!("page {page_no}: {e}"))
            })?;
            let ops = Content::decode(&raw).map_err(|e| {
                RedlineError::conversion(source, format!("page {page_no} content: {e}"))
            })?;

            let page = content::interpret(&pdf, page_resources(&pdf, *page_id), &ops.operations)
                .map_err(|e| RedlineError::conversion(source, format!("page {page_no}: {e}")))?;

            let mut lines: Vec<DrawnLine> = page
                .lines
                .into_iter()
                .filter(|l| l.is_strike_candidate(&self.opts))
                .collect();
            lines.extend(annotations::strikeout_lines(&pdf, *page_id));

            let runs: Vec<PlacedRun> = page
                .runs
                .into_iter()
                .map(|run| PlacedRun {
                    struck: geometry::is_struck(&run.bbox, &lines),
                    run,
                })
                .collect();

            let page_paragraphs = layout::paragraphs(runs);
            debug!(
                page = page_no,
                strike_lines = lines.len(),
                paragraphs = page_paragraphs.len(),
                "page converted"
            );
            paragraphs.extend(page_paragraphs);
        }

        if paragraphs.is_empty() {
            warn!(pages = pages.len(), "no text recovered; scanned or image-only PDF?");
        }

        Ok(ConvertedDocument {
            source: source.to_path_buf(),
            page_count: pages.len(),
            content_hash: sha256_hex(bytes),
            paragraphs,
        })
    }
}

impl FormatConverter for PdfConverter {
    fn convert(&self, doc: &Document) -> Result<ConvertedDocument> {
        let bytes = std::fs::read(&doc.path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => RedlineError::SourceNotFound {
                path: doc.path.clone(),
            },
            _ => RedlineError::conversion(&doc.path, e.to_string()),
        })?;
        self.convert_bytes(&doc.path, &bytes)
    }
}

/// The page's `/Resources`, inline or referenced, inherited from the page tree.
fn page_resources(pdf: &lopdf::Document, page_id: lopdf::ObjectId) -> Option<&lopdf::Dictionary> {
    let (inline, ids) = pdf.get_page_resources(page_id).ok()?;
    inline.or_else(|| ids.iter().find_map(|id| pdf.get_dictionary(*id).ok()))
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{PdfBuilder, StrikeMark, identity_font, single_page};
    use lopdf::{Stream, dictionary};

    fn convert(builder: &PdfBuilder) -> ConvertedDocument {
        convert_raw(&builder.build())
    }

    fn convert_raw(bytes: &[u8]) -> ConvertedDocument {
        PdfConverter::default()
            .convert_bytes(Path::new("test.pdf"), bytes)
            .expect("convert")
    }

    fn helvetica(doc: &mut lopdf::Document, encoding: Option<&str>) -> lopdf::ObjectId {
        let mut font = dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica",
        };
        if let Some(encoding) = encoding {
            font.set("Encoding", encoding);
        }
        doc.add_object(font)
    }

    #[test]
    fn plain_document_has_no_struck_runs() {
        let doc = convert(
            &PdfBuilder::new()
                .paragraph("Resolution 12/2025")
                .paragraph("The water tariff will increase in July 2025."),
        );
        assert_eq!(doc.page_count, 1);
        assert_eq!(doc.paragraphs.len(), 2);
        assert_eq!(doc.paragraphs[0].text(), "Resolution 12/2025");
        assert!(doc.paragraphs.iter().all(|p| !p.is_struck()));
    }

    #[test]
    fn stroked_line_strikes_paragraph() {
        let doc = convert(
            &PdfBuilder::new()
                .paragraph("Article 1")
                .struck_paragraph("Obsolete clause")
                .paragraph("Article 2"),
        );
        let flags: Vec<bool> = doc.paragraphs.iter().map(Paragraph::is_struck).collect();
        assert_eq!(flags, vec![false, true, false]);
        assert_eq!(doc.paragraphs[1].text(), "Obsolete clause");
    }

    #[test]
    fn filled_bar_and_annotation_strike() {
        let doc = convert(
            &PdfBuilder::new()
                .marked_paragraph(&["Voided by bar"], StrikeMark::FilledBar)
                .marked_paragraph(&["Voided by review"], StrikeMark::Annotation),
        );
        assert!(doc.paragraphs.iter().all(Paragraph::is_struck));
    }

    #[test]
    fn underline_does_not_strike() {
        let doc = convert(&PdfBuilder::new().marked_paragraph(&["Heading"], StrikeMark::Underline));
        assert_eq!(doc.paragraphs.len(), 1);
        assert!(!doc.paragraphs[0].is_struck());
    }

    #[test]
    fn partial_strike_marks_only_that_run() {
        let doc = convert(&PdfBuilder::new().partially_struck("Keep this", "drop this"));
        assert_eq!(doc.paragraphs.len(), 1);

        let para = &doc.paragraphs[0];
        assert_eq!(para.runs.len(), 2);
        assert!(!para.runs[0].strike);
        assert!(para.runs[1].strike);
        assert!(para.is_struck());
        assert_eq!(para.text(), "Keep this drop this");
    }

    #[test]
    fn multi_line_paragraph_and_pages() {
        let doc = convert(
            &PdfBuilder::new()
                .marked_paragraph(&["The tariff will", "decrease in July."], StrikeMark::None)
                .page_break()
                .paragraph("Second page"),
        );
        assert_eq!(doc.page_count, 2);
        assert_eq!(doc.paragraphs.len(), 2);
        assert_eq!(doc.paragraphs[0].text(), "The tariff will decrease in July.");
        assert_eq!(doc.paragraphs[1].text(), "Second page");
    }

    #[test]
    fn struck_clause_among_evenly_spaced_clauses() {
        let doc = convert(&PdfBuilder::new().lines(&[
            ("1. The tariff applies to all households", StrikeMark::None),
            ("2. Rural surcharges are revoked", StrikeMark::StrokedLine),
            ("3. The levy is collected monthly", StrikeMark::None),
        ]));
        let flags: Vec<bool> = doc.paragraphs.iter().map(Paragraph::is_struck).collect();
        assert_eq!(flags, vec![false, true, false]);
        assert_eq!(doc.paragraphs[1].text(), "2. Rural surcharges are revoked");
    }

    #[test]
    fn strike_inside_form_xobject() {
        let bytes = single_page("q /X1 Do Q", |doc| {
            let font_id = helvetica(doc, None);
            let form_id = doc.add_object(Stream::new(
                dictionary! {
                    "Type" => "XObject",
                    "Subtype" => "Form",
                    "BBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
                    "Resources" => dictionary! { "Font" => dictionary! { "F1" => font_id } },
                },
                b"BT /F1 12 Tf 72 700 Td (Obsolete clause) Tj ET 0.8 w 72 704 m 162 704 l S".to_vec(),
            ));
            dictionary! { "XObject" => dictionary! { "X1" => form_id } }
        });

        let doc = convert_raw(&bytes);
        assert_eq!(doc.paragraphs.len(), 1);
        assert_eq!(doc.paragraphs[0].text(), "Obsolete clause");
        assert!(doc.paragraphs[0].is_struck());
    }

    #[test]
    fn strike_under_flipped_page_matrix() {
        let content = "1 0 0 -1 0 792 cm \
                       BT /F1 12 Tf 1 0 0 -1 72 92 Tm (Obsolete clause) Tj ET \
                       BT /F1 12 Tf 1 0 0 -1 72 152 Tm (Article 2) Tj ET \
                       0.8 w 72 88 m 162 88 l S";
        let bytes = single_page(content, |doc| {
            let font_id = helvetica(doc, None);
            dictionary! { "Font" => dictionary! { "F1" => font_id } }
        });

        let doc = convert_raw(&bytes);
        assert_eq!(doc.paragraphs.len(), 2);
        assert_eq!(doc.paragraphs[0].text(), "Obsolete clause");
        assert!(doc.paragraphs[0].is_struck());
        assert!(!doc.paragraphs[1].is_struck());
    }

    #[test]
    fn win_ansi_text_keeps_typographic_punctuation() {
        let bytes = single_page(r"BT /F1 12 Tf 72 700 Td (\223Art. 5\224 \226 revoked) Tj ET", |doc| {
            let font_id = helvetica(doc, Some("WinAnsiEncoding"));
            dictionary! { "Font" => dictionary! { "F1" => font_id } }
        });

        let doc = convert_raw(&bytes);
        assert_eq!(doc.paragraphs[0].text(), "\u{201C}Art. 5\u{201D} \u{2013} revoked");
    }

    #[test]
    fn identity_h_text_is_decoded_through_to_unicode() {
        let bytes = single_page("BT /F2 12 Tf 72 700 Td <000100020003> Tj ET", |doc| {
            let font_id = identity_font(doc, &[(1, 'A'), (2, 'r'), (3, 't')], 556);
            dictionary! { "Font" => dictionary! { "F2" => font_id } }
        });

        let doc = convert_raw(&bytes);
        assert_eq!(doc.paragraphs[0].text(), "Art");
    }

    #[test]
    fn thick_rule_is_not_a_strike() {
        let opts = StrikeOptions {
            max_line_thickness: 0.5,
            ..Default::default()
        };
        let bytes = PdfBuilder::new().struck_paragraph("Not thin enough").build();

        let doc = PdfConverter::new(opts)
            .convert_bytes(Path::new("t.pdf"), &bytes)
            .unwrap();
        assert!(!doc.paragraphs[0].is_struck());
    }

    #[test]
    fn garbage_bytes_fail_conversion() {
        let err = PdfConverter::default()
            .convert_bytes(Path::new("broken.pdf"), b"not a pdf at all")
            .unwrap_err();
        assert!(matches!(err, RedlineError::ConversionFailed { .. }));
    }

    #[test]
    fn missing_file_is_source_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let doc = Document::new("gone.pdf", dir.path().join("gone.pdf"));
        let err = PdfConverter::default().convert(&doc).unwrap_err();
        assert!(matches!(err, RedlineError::SourceNotFound { .. }));
    }

    #[test]
    fn content_hash_is_stable() {
        let bytes = PdfBuilder::new().paragraph("x").build();
        let a = PdfConverter::default().convert_bytes(Path::new("a.pdf"), &bytes).unwrap();
        let b = PdfConverter::default().convert_bytes(Path::new("b.pdf"), &bytes).unwrap();
        assert_eq!(a.content_hash, b.content_hash);
        assert_eq!(a.content_hash.len(), 64);
    }
}
