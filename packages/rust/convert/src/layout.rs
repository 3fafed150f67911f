//! Reading-order layout: text runs → lines → paragraphs.
//!
//! Lines close enough to be one block still split into paragraphs when the
//! next line opens a numbered clause, or when the previous line ends a
//! sentence and is either short of the right margin or followed by an
//! indented line.

use std::sync::LazyLock;

use regex::Regex;

use crate::content::TextRun;
use crate::geometry::BBox;
use crate::{Paragraph, Run};

/// Baselines closer than this (in em) belong to the same line.
const SAME_LINE_TOLERANCE: f64 = 0.5;

/// A baseline-to-baseline distance above this (in em) starts a new paragraph.
const PARAGRAPH_GAP: f64 = 1.5;

/// A horizontal gap wider than this (in em) between runs reads as a space.
const WORD_GAP: f64 = 0.2;

/// A sentence-final line ending this far (in em) short of the margin closes its paragraph.
const SHORT_LINE: f64 = 2.0;

/// A line starting this far (in em) right of the previous one is indented.
const INDENT: f64 = 1.0;

/// Article, section and list numbering at the start of a line.
static CLAUSE_START: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^\s*(?:(?:art(?:igo|icle)?\.?|§+|cl[áa]usula|clause|section)\s*\d+[º°]?|\d{1,3}(?:\.\d{1,3})*[.)]|\(?[a-z]\)|[ivx]{1,5}[.)])(?:\s|$)",
    )
    .expect("clause regex is valid")
});

/// A run with its strike classification.
#[derive(Debug, Clone)]
pub(crate) struct PlacedRun {
    pub run: TextRun,
    pub struck: bool,
}

impl PlacedRun {
    fn baseline(&self) -> f64 {
        self.run.baseline
    }

    fn bbox(&self) -> &BBox {
        &self.run.bbox
    }
}

#[derive(Debug)]
struct Line {
    baseline: f64,
    font_size: f64,
    runs: Vec<PlacedRun>,
}

impl Line {
    fn x0(&self) -> f64 {
        self.runs.iter().map(|r| r.bbox().x0).fold(f64::INFINITY, f64::min)
    }

    fn x1(&self) -> f64 {
        self.runs.iter().map(|r| r.bbox().x1).fold(f64::NEG_INFINITY, f64::max)
    }

    fn starts_clause(&self) -> bool {
        self.runs
            .first()
            .is_some_and(|r| CLAUSE_START.is_match(&r.run.text))
    }

    fn ends_sentence(&self) -> bool {
        self.runs
            .last()
            .and_then(|r| r.run.text.trim_end().chars().last())
            .is_some_and(|c| matches!(c, '.' | ':' | ';' | '!' | '?'))
    }
}

/// Whether `next` opens a new paragraph after `prev`.
fn breaks_between(prev: &Line, next: &Line, right_margin: f64) -> bool {
    let em = prev.font_size.max(next.font_size);
    if prev.baseline - next.baseline > PARAGRAPH_GAP * em || next.starts_clause() {
        return true;
    }
    prev.ends_sentence()
        && (prev.x1() < right_margin - SHORT_LINE * em || next.x0() > prev.x0() + INDENT * em)
}

/// Group one page's runs into paragraphs, top to bottom.
pub(crate) fn paragraphs(runs: Vec<PlacedRun>) -> Vec<Paragraph> {
    let lines = group_lines(runs);
    let right_margin = lines.iter().map(Line::x1).fold(f64::NEG_INFINITY, f64::max);

    let mut paragraphs: Vec<Paragraph> = Vec::new();
    let mut current: Vec<Run> = Vec::new();

    for (i, line) in lines.iter().enumerate() {
        if i > 0 && !current.is_empty() && breaks_between(&lines[i - 1], line, right_margin) {
            paragraphs.push(Paragraph {
                runs: std::mem::take(&mut current),
            });
        }

        let mut last_x1: Option<f64> = None;
        for placed in &line.runs {
            let mut text = placed.run.text.clone();
            // Continuation lines join the paragraph with a space.
            let needs_space = match last_x1 {
                Some(x1) => placed.bbox().x0 - x1 > WORD_GAP * line.font_size,
                None => !current.is_empty(),
            };
            let joined_with_space = current
                .last()
                .is_some_and(|r: &Run| r.text.ends_with(char::is_whitespace))
                || text.starts_with(char::is_whitespace);
            if needs_space && !joined_with_space {
                text.insert(0, ' ');
            }
            last_x1 = Some(placed.bbox().x1);
            current.push(Run {
                text,
                strike: placed.struck,
            });
        }
    }

    if !current.is_empty() {
        paragraphs.push(Paragraph { runs: current });
    }

    paragraphs
}

/// Cluster runs by baseline, topmost line first, runs left to right.
fn group_lines(mut runs: Vec<PlacedRun>) -> Vec<Line> {
    runs.retain(|r| !r.run.text.trim().is_empty());
    runs.sort_by(|a, b| b.baseline().total_cmp(&a.baseline()));

    let mut lines: Vec<Line> = Vec::new();
    for placed in runs {
        let size = placed.run.font_size;
        match lines.last_mut() {
            Some(line)
                if (line.baseline - placed.baseline()).abs()
                    <= SAME_LINE_TOLERANCE * line.font_size.max(size) =>
            {
                line.font_size = line.font_size.max(size);
                line.runs.push(placed);
            }
            _ => lines.push(Line {
                baseline: placed.baseline(),
                font_size: size,
                runs: vec![placed],
            }),
        }
    }

    for line in &mut lines {
        line.runs.sort_by(|a, b| a.bbox().x0.total_cmp(&b.bbox().x0));
    }

    lines
}
