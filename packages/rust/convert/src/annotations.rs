//! `StrikeOut` markup annotations.
//!
//! Reviewers often void text with a strike-out annotation instead of drawing
//! on the page. Each annotated quad becomes a horizontal line through its
//! vertical center, so it is tested exactly like a drawn line.

use lopdf::{Dictionary, Document, Object, ObjectId};
use tracing::debug;

use crate::content::as_number;
use crate::geometry::DrawnLine;

/// Horizontal lines contributed by the page's `StrikeOut` annotations.
pub(crate) fn strikeout_lines(doc: &Document, page_id: ObjectId) -> Vec<DrawnLine> {
    let Ok(page) = doc.get_dictionary(page_id) else {
        return Vec::new();
    };
    let Some(Object::Array(annots)) = page.get(b"Annots").ok().map(|o| resolve(doc, o)) else {
        return Vec::new();
    };

    let mut lines = Vec::new();
    for annot in annots {
        let Object::Dictionary(dict) = resolve(doc, annot) else {
            continue;
        };
        if !is_strikeout(dict) {
            continue;
        }

        let before = lines.len();
        match dict.get(b"QuadPoints").ok().map(|o| resolve(doc, o)) {
            Some(Object::Array(points)) => lines.extend(quad_lines(points)),
            _ => lines.extend(rect_line(doc, dict)),
        }
        debug!(page = ?page_id, added = lines.len() - before, "strike-out annotation");
    }

    lines
}

fn is_strikeout(dict: &Dictionary) -> bool {
    matches!(dict.get(b"Subtype"), Ok(Object::Name(name)) if name == b"StrikeOut")
}

/// One line per quadrilateral (8 numbers each).
fn quad_lines(points: &[Object]) -> Vec<DrawnLine> {
    let values: Vec<f64> = points.iter().filter_map(as_number).collect();
    values
        .chunks_exact(8)
        .map(|quad| {
            let xs = [quad[0], quad[2], quad[4], quad[6]];
            let ys = [quad[1], quad[3], quad[5], quad[7]];
            DrawnLine {
                x0: xs.iter().copied().fold(f64::INFINITY, f64::min),
                x1: xs.iter().copied().fold(f64::NEG_INFINITY, f64::max),
                y: ys.iter().sum::<f64>() / 4.0,
                thickness: 0.0,
                slope: 0.0,
            }
        })
        .collect()
}

fn rect_line(doc: &Document, dict: &Dictionary) -> Option<DrawnLine> {
    let Ok(Object::Array(rect)) = dict.get(b"Rect").map(|o| resolve(doc, o)) else {
        return None;
    };
    let v: Vec<f64> = rect.iter().filter_map(as_number).collect();
    if v.len() != 4 {
        return None;
    }
    Some(DrawnLine {
        x0: v[0].min(v[2]),
        x1: v[0].max(v[2]),
        y: (v[1] + v[3]) / 2.0,
        thickness: 0.0,
        slope: 0.0,
    })
}

/// Follow an indirect reference, falling back to the object itself.
fn resolve<'a>(doc: &'a Document, obj: &'a Object) -> &'a Object {
    match obj {
        Object::Reference(id) => doc.get_object(*id).unwrap_or(obj),
        _ => obj,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quad_points_become_centered_lines() {
        let points: Vec<Object> = [72, 710, 162, 710, 72, 698, 162, 698]
            .into_iter()
            .map(Object::Integer)
            .collect();
        let lines = quad_lines(&points);
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].x0, 72.0);
        assert_eq!(lines[0].x1, 162.0);
        assert_eq!(lines[0].y, 704.0);
    }

    #[test]
    fn incomplete_quads_are_ignored() {
        let points: Vec<Object> = [1, 2, 3].into_iter().map(Object::Integer).collect();
        assert!(quad_lines(&points).is_empty());
    }
}
