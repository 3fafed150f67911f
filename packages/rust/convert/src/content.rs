//! Minimal PDF content-stream interpreter.
//!
//! Tracks just enough graphics and text state to place text runs and
//! drawn marks in user space:
//! - `q`/`Q`/`cm` and `w` for the graphics state
//! - `BT`/`ET`, `Tf`, `Tc`, `Tw`, `Tz`, `TL`, `Td`, `TD`, `Tm`, `T*` for text positioning
//! - `Tj`, `TJ`, `'`, `"` for text showing, decoded through the selected font
//! - `m`, `l`, `re`, `h` and the painting operators for paths
//! - `Do` for form XObjects, interpreted in place under their `/Matrix`

use std::collections::HashMap;
use std::rc::Rc;

use lopdf::content::{Content, Operation};
use lopdf::{Dictionary, Document, Object, ObjectId};
use tracing::{debug, warn};

use crate::fonts::FontDecoder;
use crate::geometry::{BBox, DrawnLine, Matrix};

/// Height of the glyph body above the baseline, in em.
const ASCENT: f64 = 0.8;

/// A `TJ` adjustment at or beyond this (thousandths of an em) reads as a word gap.
const TJ_SPACE_THRESHOLD: f64 = 250.0;

/// Deepest chain of nested form XObjects followed.
const MAX_FORM_DEPTH: usize = 12;

/// One shown string, positioned in user space.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct TextRun {
    pub text: String,
    /// Baseline height of the run's origin.
    pub baseline: f64,
    /// Glyph body box: from the baseline up to the ascent.
    pub bbox: BBox,
    /// Effective font size in user space.
    pub font_size: f64,
}

/// Everything placed on one page.
#[derive(Debug, Clone, Default)]
pub(crate) struct PageContent {
    pub runs: Vec<TextRun>,
    pub lines: Vec<DrawnLine>,
}

#[derive(Clone)]
struct TextState<'a> {
    font: Rc<FontDecoder<'a>>,
    font_size: f64,
    char_spacing: f64,
    word_spacing: f64,
    /// `Tz` as a fraction (1.0 = 100%).
    horizontal_scale: f64,
    leading: f64,
}

#[derive(Clone)]
struct GraphicsState<'a> {
    ctm: Matrix,
    line_width: f64,
    text: TextState<'a>,
}

#[derive(Debug, Clone)]
enum PathItem {
    Segment((f64, f64), (f64, f64)),
    Rect(BBox),
}

/// Interpreter state for a single page.
struct Interpreter<'a> {
    doc: &'a Document,
    /// Resource dictionaries, innermost form last.
    resources: Vec<Option<&'a Dictionary>>,
    /// Form XObjects currently being interpreted.
    forms: Vec<ObjectId>,
    fonts: HashMap<ObjectId, Rc<FontDecoder<'a>>>,
    standard_font: Rc<FontDecoder<'a>>,
    gs: GraphicsState<'a>,
    gs_stack: Vec<GraphicsState<'a>>,
    tm: Matrix,
    tlm: Matrix,
    path: Vec<PathItem>,
    current: Option<(f64, f64)>,
    subpath_start: Option<(f64, f64)>,
    out: PageContent,
}

/// Interpret decoded page operations against the page's resources.
///
/// Fails only when a form XObject the page paints cannot be read.
pub(crate) fn interpret<'a>(
    doc: &'a Document,
    resources: Option<&'a Dictionary>,
    operations: &[Operation],
) -> lopdf::Result<PageContent> {
    let standard_font = Rc::new(FontDecoder::standard());
    let mut interp = Interpreter {
        doc,
        resources: vec![resources],
        forms: Vec::new(),
        fonts: HashMap::new(),
        gs: GraphicsState {
            ctm: Matrix::IDENTITY,
            line_width: 1.0,
            text: TextState {
                font: Rc::clone(&standard_font),
                font_size: 0.0,
                char_spacing: 0.0,
                word_spacing: 0.0,
                horizontal_scale: 1.0,
                leading: 0.0,
            },
        },
        standard_font,
        gs_stack: Vec::new(),
        tm: Matrix::IDENTITY,
        tlm: Matrix::IDENTITY,
        path: Vec::new(),
        current: None,
        subpath_start: None,
        out: PageContent::default(),
    };

    for op in operations {
        interp.step(op)?;
    }

    Ok(interp.out)
}

impl<'a> Interpreter<'a> {
    fn step(&mut self, op: &Operation) -> lopdf::Result<()> {
        let args = &op.operands;
        match op.operator.as_str() {
            // Graphics state
            "q" => self.gs_stack.push(self.gs.clone()),
            "Q" => {
                if let Some(gs) = self.gs_stack.pop() {
                    self.gs = gs;
                }
            }
            "cm" => {
                if let Some(m) = matrix_operand(args) {
                    self.gs.ctm = m.then(&self.gs.ctm);
                }
            }
            "w" => {
                if let Some(w) = num(args, 0) {
                    self.gs.line_width = w;
                }
            }

            // Text objects and state
            "BT" => {
                self.tm = Matrix::IDENTITY;
                self.tlm = Matrix::IDENTITY;
            }
            "ET" => {}
            "Tf" => {
                if let Some(name) = args.first().and_then(|o| o.as_name().ok()) {
                    self.gs.text.font = self.font(name);
                }
                if let Some(size) = num(args, 1) {
                    self.gs.text.font_size = size;
                }
            }
            "Tc" => {
                if let Some(v) = num(args, 0) {
                    self.gs.text.char_spacing = v;
                }
            }
            "Tw" => {
                if let Some(v) = num(args, 0) {
                    self.gs.text.word_spacing = v;
                }
            }
            "Tz" => {
                if let Some(v) = num(args, 0) {
                    self.gs.text.horizontal_scale = v / 100.0;
                }
            }
            "TL" => {
                if let Some(v) = num(args, 0) {
                    self.gs.text.leading = v;
                }
            }
            "Td" => {
                if let (Some(tx), Some(ty)) = (num(args, 0), num(args, 1)) {
                    self.move_line(tx, ty);
                }
            }
            "TD" => {
                if let (Some(tx), Some(ty)) = (num(args, 0), num(args, 1)) {
                    self.gs.text.leading = -ty;
                    self.move_line(tx, ty);
                }
            }
            "Tm" => {
                if let Some(m) = matrix_operand(args) {
                    self.tm = m;
                    self.tlm = m;
                }
            }
            "T*" => self.next_line(),

            // Text showing
            "Tj" => {
                if let Some(Object::String(bytes, _)) = args.first() {
                    self.show(bytes);
                }
            }
            "'" => {
                self.next_line();
                if let Some(Object::String(bytes, _)) = args.first() {
                    self.show(bytes);
                }
            }
            "\"" => {
                if let (Some(aw), Some(ac)) = (num(args, 0), num(args, 1)) {
                    self.gs.text.word_spacing = aw;
                    self.gs.text.char_spacing = ac;
                }
                self.next_line();
                if let Some(Object::String(bytes, _)) = args.get(2) {
                    self.show(bytes);
                }
            }
            "TJ" => {
                if let Some(Object::Array(items)) = args.first() {
                    self.show_array(items);
                }
            }

            // XObjects
            "Do" => {
                if let Some(name) = args.first().and_then(|o| o.as_name().ok()) {
                    self.paint_xobject(name)?;
                }
            }

            // Path construction
            "m" => {
                if let (Some(x), Some(y)) = (num(args, 0), num(args, 1)) {
                    let p = self.gs.ctm.apply(x, y);
                    self.current = Some(p);
                    self.subpath_start = Some(p);
                }
            }
            "l" => {
                if let (Some(x), Some(y)) = (num(args, 0), num(args, 1)) {
                    let p = self.gs.ctm.apply(x, y);
                    if let Some(from) = self.current {
                        self.path.push(PathItem::Segment(from, p));
                    }
                    self.current = Some(p);
                }
            }
            "re" => {
                if let (Some(x), Some(y), Some(w), Some(h)) =
                    (num(args, 0), num(args, 1), num(args, 2), num(args, 3))
                {
                    let ctm = self.gs.ctm;
                    let corners = [
                        ctm.apply(x, y),
                        ctm.apply(x + w, y),
                        ctm.apply(x + w, y + h),
                        ctm.apply(x, y + h),
                    ];
                    self.path.push(PathItem::Rect(BBox::enclosing(&corners)));
                    self.current = Some(corners[0]);
                    self.subpath_start = Some(corners[0]);
                }
            }
            "h" => self.close_subpath(),

            // Path painting
            "S" => self.stroke(),
            "s" => {
                self.close_subpath();
                self.stroke();
            }
            "f" | "F" | "f*" => self.fill(),
            "B" | "B*" => {
                self.fill_and_stroke();
            }
            "b" | "b*" => {
                self.close_subpath();
                self.fill_and_stroke();
            }
            "n" => self.clear_path(),

            _ => {}
        }
        Ok(())
    }

    fn current_resources(&self) -> Option<&'a Dictionary> {
        self.resources.last().copied().flatten()
    }

    /// Entry `name` of the resource category `kind` (`Font`, `XObject`).
    fn resource(&self, kind: &[u8], name: &[u8]) -> Option<&'a Object> {
        let doc = self.doc;
        self.current_resources()
            .and_then(|res| res.get_deref(kind, doc).and_then(Object::as_dict).ok())
            .and_then(|entries| entries.get(name).ok())
    }

    fn font(&mut self, name: &[u8]) -> Rc<FontDecoder<'a>> {
        let doc = self.doc;
        match self.resource(b"Font", name) {
            Some(Object::Reference(id)) => {
                if let Some(font) = self.fonts.get(id) {
                    return Rc::clone(font);
                }
                match doc.get_dictionary(*id) {
                    Ok(dict) => {
                        let font = Rc::new(FontDecoder::load(dict, doc));
                        self.fonts.insert(*id, Rc::clone(&font));
                        font
                    }
                    Err(e) => {
                        warn!(font = %String::from_utf8_lossy(name), error = %e, "font object unreadable, using StandardEncoding");
                        Rc::clone(&self.standard_font)
                    }
                }
            }
            Some(Object::Dictionary(dict)) => Rc::new(FontDecoder::load(dict, doc)),
            _ => {
                warn!(font = %String::from_utf8_lossy(name), "font not in resources, using StandardEncoding");
                Rc::clone(&self.standard_font)
            }
        }
    }

    /// Interpret a form XObject in place. Images and other kinds carry no text.
    fn paint_xobject(&mut self, name: &[u8]) -> lopdf::Result<()> {
        let Some(entry) = self.resource(b"XObject", name) else {
            warn!(xobject = %String::from_utf8_lossy(name), "XObject not in resources, skipped");
            return Ok(());
        };
        let (id, object) = self.doc.dereference(entry)?;
        let stream = object.as_stream()?;
        if stream.dict.get(b"Subtype").and_then(Object::as_name).ok() != Some(b"Form".as_slice()) {
            return Ok(());
        }
        if self.forms.len() >= MAX_FORM_DEPTH || id.is_some_and(|id| self.forms.contains(&id)) {
            warn!(xobject = %String::from_utf8_lossy(name), "form XObject nested too deeply or recursively, skipped");
            return Ok(());
        }

        let content = Content::decode(&stream.get_plain_content()?)?;
        let matrix = stream
            .dict
            .get(b"Matrix")
            .and_then(Object::as_array)
            .ok()
            .and_then(|m| matrix_operand(m))
            .unwrap_or(Matrix::IDENTITY);
        // Forms without their own resources inherit the painter's.
        let resources = stream
            .dict
            .get_deref(b"Resources", self.doc)
            .and_then(Object::as_dict)
            .ok()
            .or(self.current_resources());
        debug!(xobject = %String::from_utf8_lossy(name), ops = content.operations.len(), "painting form");

        let depth = self.gs_stack.len();
        self.gs_stack.push(self.gs.clone());
        self.gs.ctm = matrix.then(&self.gs.ctm);
        self.resources.push(resources);
        if let Some(id) = id {
            self.forms.push(id);
        }

        let result = content.operations.iter().try_for_each(|op| self.step(op));

        if id.is_some() {
            self.forms.pop();
        }
        self.resources.pop();
        self.gs_stack.truncate(depth + 1);
        if let Some(gs) = self.gs_stack.pop() {
            self.gs = gs;
        }
        result
    }

    fn move_line(&mut self, tx: f64, ty: f64) {
        self.tlm = Matrix::translate(tx, ty).then(&self.tlm);
        self.tm = self.tlm;
    }

    fn next_line(&mut self) {
        let leading = self.gs.text.leading;
        self.move_line(0.0, -leading);
    }

    /// Decode `bytes` with the current font: the text and its advance in text space.
    fn measure(&self, bytes: &[u8]) -> (String, f64) {
        let ts = &self.gs.text;
        let mut text = String::new();
        let mut width = 0.0;
        for glyph in ts.font.decode(bytes) {
            let spacing = ts.char_spacing + if glyph.is_space { ts.word_spacing } else { 0.0 };
            width += (glyph.width * ts.font_size + spacing) * ts.horizontal_scale;
            text.push_str(&glyph.text);
        }
        (text, width)
    }

    fn show(&mut self, bytes: &[u8]) {
        let (text, width) = self.measure(bytes);
        self.emit(text, width);
    }

    /// `TJ`: strings interleaved with kerning adjustments, shown as one run.
    /// Large negative adjustments become spaces.
    fn show_array(&mut self, items: &[Object]) {
        let em = self.gs.text.font_size * self.gs.text.horizontal_scale;
        let mut text = String::new();
        let mut width = 0.0;

        for item in items {
            match item {
                Object::String(bytes, _) => {
                    let (piece, advance) = self.measure(bytes);
                    text.push_str(&piece);
                    width += advance;
                }
                other => {
                    if let Some(adjust) = as_number(other) {
                        let shift = -adjust / 1000.0 * em;
                        if text.is_empty() {
                            self.tm = Matrix::translate(shift, 0.0).then(&self.tm);
                        } else {
                            width += shift;
                            if adjust <= -TJ_SPACE_THRESHOLD && !text.ends_with(' ') {
                                text.push(' ');
                            }
                        }
                    }
                }
            }
        }

        self.emit(text, width);
    }

    /// Record a run of `width` text-space units and advance past it.
    fn emit(&mut self, text: String, width: f64) {
        if !text.is_empty() {
            let fs = self.gs.text.font_size;
            let render = self.tm.then(&self.gs.ctm);
            let corners = [
                render.apply(0.0, 0.0),
                render.apply(width, 0.0),
                render.apply(width, ASCENT * fs),
                render.apply(0.0, ASCENT * fs),
            ];
            self.out.runs.push(TextRun {
                text,
                baseline: corners[0].1,
                bbox: BBox::enclosing(&corners),
                font_size: fs * render.scale(),
            });
        }
        self.tm = Matrix::translate(width, 0.0).then(&self.tm);
    }

    fn close_subpath(&mut self) {
        if let (Some(from), Some(start)) = (self.current, self.subpath_start) {
            if from != start {
                self.path.push(PathItem::Segment(from, start));
            }
            self.current = Some(start);
        }
    }

    fn stroke(&mut self) {
        let width = self.gs.line_width * self.gs.ctm.scale();
        for item in &self.path {
            match item {
                PathItem::Segment(p, q) => self.out.lines.push(DrawnLine::segment(*p, *q, width)),
                PathItem::Rect(bbox) => {
                    // A stroked rectangle of near-zero height draws a single line.
                    if bbox.height() <= width {
                        self.out.lines.push(DrawnLine::bar(*bbox));
                    }
                }
            }
        }
        self.clear_path();
    }

    fn fill(&mut self) {
        for item in &self.path {
            if let PathItem::Rect(bbox) = item {
                self.out.lines.push(DrawnLine::bar(*bbox));
            }
        }
        self.clear_path();
    }

    fn fill_and_stroke(&mut self) {
        let path = self.path.clone();
        self.fill();
        self.path = path;
        self.stroke();
    }

    fn clear_path(&mut self) {
        self.path.clear();
        self.current = None;
        self.subpath_start = None;
    }
}

// ---------------------------------------------------------------------------
// Operand helpers
// ---------------------------------------------------------------------------

pub(crate) fn as_number(obj: &Object) -> Option<f64> {
    match obj {
        Object::Integer(i) => Some(*i as f64),
        Object::Real(r) => Some(*r as f64),
        _ => None,
    }
}

fn num(args: &[Object], idx: usize) -> Option<f64> {
    args.get(idx).and_then(as_number)
}

fn matrix_operand(args: &[Object]) -> Option<Matrix> {
    Some(Matrix::new(
        num(args, 0)?,
        num(args, 1)?,
        num(args, 2)?,
        num(args, 3)?,
        num(args, 4)?,
        num(args, 5)?,
    ))
}
