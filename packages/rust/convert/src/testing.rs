//! Real PDF fixtures for tests, built with `lopdf`.
//!
//! Text is set in 12pt Helvetica at x = 72. Helvetica carries no `/Widths`
//! here, so each glyph is 6pt wide under the converter's fallback metric.
//! Lines are 14pt apart, paragraphs 30pt.

use std::path::Path;

use lopdf::{Dictionary, Document, Object, ObjectId, Stream, dictionary};

const FONT_SIZE: i64 = 12;
const GLYPH_WIDTH: i64 = FONT_SIZE / 2;
const LEFT: i64 = 72;
const TOP: i64 = 740;
const LINE_STEP: i64 = 14;
const PARAGRAPH_STEP: i64 = 30;

/// How a line is marked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrikeMark {
    None,
    /// A 0.8pt stroked line through the middle of the text.
    StrokedLine,
    /// A 1pt filled rectangle through the middle of the text.
    FilledBar,
    /// A `StrikeOut` annotation over the text.
    Annotation,
    /// A stroked line below the baseline.
    Underline,
}

#[derive(Debug, Clone)]
enum Block {
    /// Lines at [`LINE_STEP`], followed by a paragraph gap.
    Lines(Vec<(String, StrikeMark)>),
    Split { normal: String, struck: String },
}

/// Builder for multi-page PDFs with optionally struck paragraphs.
#[derive(Debug, Clone)]
pub struct PdfBuilder {
    pages: Vec<Vec<Block>>,
}

impl Default for PdfBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl PdfBuilder {
    pub fn new() -> Self {
        Self {
            pages: vec![Vec::new()],
        }
    }

    pub fn paragraph(self, text: &str) -> Self {
        self.marked_paragraph(&[text], StrikeMark::None)
    }

    pub fn struck_paragraph(self, text: &str) -> Self {
        self.marked_paragraph(&[text], StrikeMark::StrokedLine)
    }

    /// A paragraph spanning `lines`, each carrying `mark`.
    pub fn marked_paragraph(self, lines: &[&str], mark: StrikeMark) -> Self {
        let lines: Vec<(&str, StrikeMark)> = lines.iter().map(|l| (*l, mark)).collect();
        self.lines(&lines)
    }

    /// Consecutive lines at normal line spacing, each with its own mark.
    pub fn lines(mut self, lines: &[(&str, StrikeMark)]) -> Self {
        self.current_page().push(Block::Lines(
            lines.iter().map(|(text, mark)| (text.to_string(), *mark)).collect(),
        ));
        self
    }

    /// One line where only the second half is struck.
    pub fn partially_struck(mut self, normal: &str, struck: &str) -> Self {
        self.current_page().push(Block::Split {
            normal: normal.into(),
            struck: struck.into(),
        });
        self
    }

    pub fn page_break(mut self) -> Self {
        self.pages.push(Vec::new());
        self
    }

    fn current_page(&mut self) -> &mut Vec<Block> {
        if self.pages.is_empty() {
            self.pages.push(Vec::new());
        }
        let last = self.pages.len() - 1;
        &mut self.pages[last]
    }

    /// Serialize the PDF.
    pub fn build(&self) -> Vec<u8> {
        let mut doc = Document::with_version("1.5");
        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica",
        });
        let pages_id = doc.new_object_id();

        let mut kids: Vec<Object> = Vec::new();
        for blocks in &self.pages {
            let mut ops = String::new();
            let mut annots: Vec<Object> = Vec::new();
            let mut y = TOP;

            for block in blocks {
                match block {
                    Block::Lines(lines) => {
                        for (line, mark) in lines {
                            show(&mut ops, LEFT, y, line);
                            let width = text_width(line);
                            match mark {
                                StrikeMark::None => {}
                                StrikeMark::StrokedLine => stroke(&mut ops, LEFT, y + 4, width),
                                StrikeMark::FilledBar => {
                                    ops.push_str(&format!("{LEFT} {}.5 {width} 1 re f\n", y + 3));
                                }
                                StrikeMark::Underline => stroke(&mut ops, LEFT, y - 2, width),
                                StrikeMark::Annotation => {
                                    annots.push(doc.add_object(strikeout(LEFT, y, width)).into());
                                }
                            }
                            y -= LINE_STEP;
                        }
                        y -= PARAGRAPH_STEP - LINE_STEP;
                    }
                    Block::Split { normal, struck } => {
                        show(&mut ops, LEFT, y, normal);
                        let x = LEFT + text_width(normal) + GLYPH_WIDTH;
                        show(&mut ops, x, y, struck);
                        stroke(&mut ops, x, y + 4, text_width(struck));
                        y -= PARAGRAPH_STEP;
                    }
                }
            }

            let content_id = doc.add_object(Stream::new(dictionary! {}, ops.into_bytes()));
            let mut page = dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
                "Contents" => content_id,
                "Resources" => dictionary! {
                    "Font" => dictionary! { "F1" => font_id },
                },
            };
            if !annots.is_empty() {
                page.set("Annots", annots);
            }
            kids.push(doc.add_object(page).into());
        }

        finish(doc, pages_id, kids)
    }

    /// Build and write to `path`.
    pub fn write_to(&self, path: &Path) -> std::io::Result<()> {
        std::fs::write(path, self.build())
    }
}

/// A one-page PDF with hand-written `content`.
///
/// `resources` may add font or XObject objects to the document and returns
/// the page's `/Resources` dictionary.
pub fn single_page(content: &str, resources: impl FnOnce(&mut Document) -> Dictionary) -> Vec<u8> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let resources = resources(&mut doc);
    let content_id = doc.add_object(Stream::new(dictionary! {}, content.as_bytes().to_vec()));
    let page_id = doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => pages_id,
        "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
        "Contents" => content_id,
        "Resources" => resources,
    });
    finish(doc, pages_id, vec![page_id.into()])
}

/// A `ToUnicode` CMap mapping two-byte codes to single characters.
pub fn identity_cmap(mappings: &[(u16, char)]) -> Vec<u8> {
    let mut cmap = String::from(
        "/CIDInit /ProcSet findresource begin\n\
         12 dict begin\n\
         begincmap\n\
         /CIDSystemInfo\n\
         << /Registry (Adobe) /Ordering (UCS) /Supplement 0 >> def\n\
         /CMapName /Adobe-Identity-UCS def\n\
         /CMapType 2 def\n\
         1 begincodespacerange\n\
         <0000> <FFFF>\n\
         endcodespacerange\n",
    );
    cmap.push_str(&format!("{} beginbfchar\n", mappings.len()));
    for (code, ch) in mappings {
        cmap.push_str(&format!("<{code:04X}> <{:04X}>\n", u32::from(*ch)));
    }
    cmap.push_str(
        "endbfchar\n\
         endcmap\n\
         CMapName currentdict /CMap defineresource pop\n\
         end\n\
         end\n",
    );
    cmap.into_bytes()
}

/// A Type0 font with `Identity-H` codes, a `ToUnicode` CMap for
/// `mappings` and every CID `cid_width` thousandths of an em wide.
pub fn identity_font(doc: &mut Document, mappings: &[(u16, char)], cid_width: i64) -> ObjectId {
    let cmap_id = doc.add_object(Stream::new(dictionary! {}, identity_cmap(mappings)));
    doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type0",
        "BaseFont" => "Subset",
        "Encoding" => "Identity-H",
        "ToUnicode" => cmap_id,
        "DescendantFonts" => vec![Object::Dictionary(dictionary! {
            "Type" => "Font",
            "Subtype" => "CIDFontType2",
            "BaseFont" => "Subset",
            "DW" => cid_width,
        })],
    })
}

fn finish(mut doc: Document, pages_id: ObjectId, kids: Vec<Object>) -> Vec<u8> {
    let count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut buf = Vec::new();
    doc.save_to(&mut buf).expect("serialize test PDF");
    buf
}

fn text_width(text: &str) -> i64 {
    text.chars().count() as i64 * GLYPH_WIDTH
}

fn show(ops: &mut String, x: i64, y: i64, text: &str) {
    let escaped = text
        .replace('\\', "\\\\")
        .replace('(', "\\(")
        .replace(')', "\\)");
    ops.push_str(&format!(
        "BT /F1 {FONT_SIZE} Tf 1 0 0 1 {x} {y} Tm ({escaped}) Tj ET\n"
    ));
}

fn stroke(ops: &mut String, x: i64, y: i64, width: i64) {
    ops.push_str(&format!("0.8 w {x} {y} m {} {y} l S\n", x + width));
}

fn strikeout(x: i64, y: i64, width: i64) -> Dictionary {
    let x1 = x + width;
    let (top, bottom) = (y + 10, y - 2);
    let nums = |values: &[i64]| -> Vec<Object> { values.iter().map(|&v| v.into()).collect() };
    dictionary! {
        "Type" => "Annot",
        "Subtype" => "StrikeOut",
        "Rect" => nums(&[x, bottom, x1, top]),
        "QuadPoints" => nums(&[x, top, x1, top, x, bottom, x1, bottom]),
    }
}
