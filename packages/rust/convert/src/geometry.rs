//! Page geometry: affine matrices, boxes, and strike-line inference.
//!
//! Coordinates are PDF user space (origin bottom-left, y grows upwards).

use redline_shared::AppConfig;

/// Row-vector affine transform `[a b c d e f]`, as used by PDF `cm` and `Tm`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Matrix {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub d: f64,
    pub e: f64,
    pub f: f64,
}

impl Matrix {
    pub const IDENTITY: Self = Self {
        a: 1.0,
        b: 0.0,
        c: 0.0,
        d: 1.0,
        e: 0.0,
        f: 0.0,
    };

    pub fn new(a: f64, b: f64, c: f64, d: f64, e: f64, f: f64) -> Self {
        Self { a, b, c, d, e, f }
    }

    pub fn translate(tx: f64, ty: f64) -> Self {
        Self::new(1.0, 0.0, 0.0, 1.0, tx, ty)
    }

    /// `self × other`: apply `self` first, then `other`.
    pub fn then(&self, other: &Self) -> Self {
        Self {
            a: self.a * other.a + self.b * other.c,
            b: self.a * other.b + self.b * other.d,
            c: self.c * other.a + self.d * other.c,
            d: self.c * other.b + self.d * other.d,
            e: self.e * other.a + self.f * other.c + other.e,
            f: self.e * other.b + self.f * other.d + other.f,
        }
    }

    pub fn apply(&self, x: f64, y: f64) -> (f64, f64) {
        (
            self.a * x + self.c * y + self.e,
            self.b * x + self.d * y + self.f,
        )
    }

    /// Average linear scale factor, used to map line widths into user space.
    pub fn scale(&self) -> f64 {
        (self.a * self.d - self.b * self.c).abs().sqrt()
    }
}

/// Axis-aligned box in user space.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct BBox {
    pub x0: f64,
    pub y0: f64,
    pub x1: f64,
    pub y1: f64,
}

impl BBox {
    /// Smallest box containing all `points`.
    pub(crate) fn enclosing(points: &[(f64, f64)]) -> Self {
        let mut bbox = Self {
            x0: f64::INFINITY,
            y0: f64::INFINITY,
            x1: f64::NEG_INFINITY,
            y1: f64::NEG_INFINITY,
        };
        for &(x, y) in points {
            bbox.x0 = bbox.x0.min(x);
            bbox.y0 = bbox.y0.min(y);
            bbox.x1 = bbox.x1.max(x);
            bbox.y1 = bbox.y1.max(y);
        }
        bbox
    }

    pub fn width(&self) -> f64 {
        self.x1 - self.x0
    }

    pub fn height(&self) -> f64 {
        self.y1 - self.y0
    }
}

/// A drawn mark that could strike through text.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct DrawnLine {
    pub x0: f64,
    pub x1: f64,
    /// Vertical center of the mark.
    pub y: f64,
    /// Stroke width, or bar height for filled rectangles.
    pub thickness: f64,
    /// |dy/dx| of the mark; infinite for vertical marks.
    pub slope: f64,
}

impl DrawnLine {
    /// A stroked segment from `p` to `q` with the given user-space width.
    pub fn segment(p: (f64, f64), q: (f64, f64), width: f64) -> Self {
        let dx = q.0 - p.0;
        let dy = q.1 - p.1;
        let slope = if dx == 0.0 {
            f64::INFINITY
        } else {
            (dy / dx).abs()
        };
        Self {
            x0: p.0.min(q.0),
            x1: p.0.max(q.0),
            y: (p.1 + q.1) / 2.0,
            thickness: width,
            slope,
        }
    }

    /// A filled bar covering `bbox`.
    pub fn bar(bbox: BBox) -> Self {
        Self {
            x0: bbox.x0,
            x1: bbox.x1,
            y: (bbox.y0 + bbox.y1) / 2.0,
            thickness: bbox.height(),
            slope: 0.0,
        }
    }

    /// Whether this mark is thin and near-horizontal enough to be a strike line.
    pub fn is_strike_candidate(&self, opts: &StrikeOptions) -> bool {
        self.x1 > self.x0 && self.thickness <= opts.max_line_thickness && self.slope <= opts.max_slope
    }

    /// Vertical center inside the box and horizontal overlap with it.
    pub fn crosses(&self, bbox: &BBox) -> bool {
        self.y >= bbox.y0 && self.y <= bbox.y1 && self.x0 < bbox.x1 && self.x1 > bbox.x0
    }
}

/// Thresholds for strike-line inference.
#[derive(Debug, Clone, PartialEq)]
pub struct StrikeOptions {
    /// Thickest mark (in points) treated as a line.
    pub max_line_thickness: f64,
    /// Largest |dy/dx| treated as horizontal.
    pub max_slope: f64,
}

impl Default for StrikeOptions {
    fn default() -> Self {
        Self {
            max_line_thickness: 2.0,
            max_slope: 0.1,
        }
    }
}

impl From<&AppConfig> for StrikeOptions {
    fn from(config: &AppConfig) -> Self {
        Self {
            max_line_thickness: config.strike.max_line_thickness,
            max_slope: config.strike.max_slope,
        }
    }
}

/// Whether any candidate line crosses `bbox`. The first match wins.
pub(crate) fn is_struck(bbox: &BBox, lines: &[DrawnLine]) -> bool {
    lines.iter().any(|line| line.crosses(bbox))
}
