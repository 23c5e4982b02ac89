//! Path data parsing and bounding-box computation.
//!
//! Every path's `d` attribute is parsed with `svgtypes`, converted to
//! absolute coordinates, and folded into one document-wide [`BoundingBox`].
//! Curve control points are counted as well as on-curve points, so the box
//! can only be larger than the rendered extent, never smaller.

use crate::document::{format_number, SvgDocument};
use std::fmt::Write;
use tracing::warn;

/// One absolute draw command.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PathSegment {
    MoveTo { x: f64, y: f64 },
    LineTo { x: f64, y: f64 },
    HorizontalLineTo { x: f64 },
    VerticalLineTo { y: f64 },
    CurveTo { x1: f64, y1: f64, x2: f64, y2: f64, x: f64, y: f64 },
    SmoothCurveTo { x2: f64, y2: f64, x: f64, y: f64 },
    Quadratic { x1: f64, y1: f64, x: f64, y: f64 },
    SmoothQuadratic { x: f64, y: f64 },
    ArcTo {
        rx: f64,
        ry: f64,
        x_axis_rotation: f64,
        large_arc: bool,
        sweep: bool,
        x: f64,
        y: f64,
    },
    ClosePath,
}

impl PathSegment {
    /// Shifts every coordinate of the segment. Arc radii are lengths and
    /// stay as they are.
    pub fn translate(&mut self, dx: f64, dy: f64) {
        match self {
            PathSegment::MoveTo { x, y }
            | PathSegment::LineTo { x, y }
            | PathSegment::SmoothQuadratic { x, y }
            | PathSegment::ArcTo { x, y, .. } => {
                *x += dx;
                *y += dy;
            }
            PathSegment::HorizontalLineTo { x } => *x += dx,
            PathSegment::VerticalLineTo { y } => *y += dy,
            PathSegment::CurveTo { x1, y1, x2, y2, x, y } => {
                *x1 += dx;
                *y1 += dy;
                *x2 += dx;
                *y2 += dy;
                *x += dx;
                *y += dy;
            }
            PathSegment::SmoothCurveTo { x2, y2, x, y } => {
                *x2 += dx;
                *y2 += dy;
                *x += dx;
                *y += dy;
            }
            PathSegment::Quadratic { x1, y1, x, y } => {
                *x1 += dx;
                *y1 += dy;
                *x += dx;
                *y += dy;
            }
            PathSegment::ClosePath => {}
        }
    }
}

/// Result of parsing one `d` string.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedPath {
    pub segments: Vec<PathSegment>,
    /// Set when parsing stopped early; `segments` holds the valid prefix.
    pub error: Option<String>,
}

/// Parses path data into absolute segments.
pub fn parse_path_data(data: &str) -> ParsedPath {
    let mut parsed = ParsedPath::default();
    let (mut cx, mut cy) = (0.0, 0.0);
    let (mut sx, mut sy) = (0.0, 0.0);

    for token in svgtypes::PathParser::from(data) {
        let segment = match token {
            Ok(segment) => segment,
            Err(e) => {
                parsed.error = Some(e.to_string());
                break;
            }
        };

        let abs = match segment {
            svgtypes::PathSegment::MoveTo { abs, x, y } => {
                let (x, y) = offset(abs, cx, cy, x, y);
                sx = x;
                sy = y;
                PathSegment::MoveTo { x, y }
            }
            svgtypes::PathSegment::LineTo { abs, x, y } => {
                let (x, y) = offset(abs, cx, cy, x, y);
                PathSegment::LineTo { x, y }
            }
            svgtypes::PathSegment::HorizontalLineTo { abs, x } => PathSegment::HorizontalLineTo {
                x: if abs { x } else { cx + x },
            },
            svgtypes::PathSegment::VerticalLineTo { abs, y } => PathSegment::VerticalLineTo {
                y: if abs { y } else { cy + y },
            },
            svgtypes::PathSegment::CurveTo { abs, x1, y1, x2, y2, x, y } => {
                let (x1, y1) = offset(abs, cx, cy, x1, y1);
                let (x2, y2) = offset(abs, cx, cy, x2, y2);
                let (x, y) = offset(abs, cx, cy, x, y);
                PathSegment::CurveTo { x1, y1, x2, y2, x, y }
            }
            svgtypes::PathSegment::SmoothCurveTo { abs, x2, y2, x, y } => {
                let (x2, y2) = offset(abs, cx, cy, x2, y2);
                let (x, y) = offset(abs, cx, cy, x, y);
                PathSegment::SmoothCurveTo { x2, y2, x, y }
            }
            svgtypes::PathSegment::Quadratic { abs, x1, y1, x, y } => {
                let (x1, y1) = offset(abs, cx, cy, x1, y1);
                let (x, y) = offset(abs, cx, cy, x, y);
                PathSegment::Quadratic { x1, y1, x, y }
            }
            svgtypes::PathSegment::SmoothQuadratic { abs, x, y } => {
                let (x, y) = offset(abs, cx, cy, x, y);
                PathSegment::SmoothQuadratic { x, y }
            }
            svgtypes::PathSegment::EllipticalArc {
                abs,
                rx,
                ry,
                x_axis_rotation,
                large_arc,
                sweep,
                x,
                y,
            } => {
                let (x, y) = offset(abs, cx, cy, x, y);
                PathSegment::ArcTo { rx, ry, x_axis_rotation, large_arc, sweep, x, y }
            }
            svgtypes::PathSegment::ClosePath { .. } => PathSegment::ClosePath,
        };

        match abs {
            PathSegment::MoveTo { x, y }
            | PathSegment::LineTo { x, y }
            | PathSegment::CurveTo { x, y, .. }
            | PathSegment::SmoothCurveTo { x, y, .. }
            | PathSegment::Quadratic { x, y, .. }
            | PathSegment::SmoothQuadratic { x, y }
            | PathSegment::ArcTo { x, y, .. } => {
                cx = x;
                cy = y;
            }
            PathSegment::HorizontalLineTo { x } => cx = x,
            PathSegment::VerticalLineTo { y } => cy = y,
            PathSegment::ClosePath => {
                cx = sx;
                cy = sy;
            }
        }

        parsed.segments.push(abs);
    }

    parsed
}

fn offset(abs: bool, cx: f64, cy: f64, x: f64, y: f64) -> (f64, f64) {
    if abs {
        (x, y)
    } else {
        (cx + x, cy + y)
    }
}

/// Serializes absolute segments, e.g. `M0,0 L80,0 Z`.
pub fn write_path_data(segments: &[PathSegment]) -> String {
    let n = format_number;
    let mut out = String::new();

    for (i, segment) in segments.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        // Writing to a String cannot fail.
        let _ = match *segment {
            PathSegment::MoveTo { x, y } => write!(out, "M{},{}", n(x), n(y)),
            PathSegment::LineTo { x, y } => write!(out, "L{},{}", n(x), n(y)),
            PathSegment::HorizontalLineTo { x } => write!(out, "H{}", n(x)),
            PathSegment::VerticalLineTo { y } => write!(out, "V{}", n(y)),
            PathSegment::CurveTo { x1, y1, x2, y2, x, y } => write!(
                out,
                "C{},{} {},{} {},{}",
                n(x1),
                n(y1),
                n(x2),
                n(y2),
                n(x),
                n(y)
            ),
            PathSegment::SmoothCurveTo { x2, y2, x, y } => {
                write!(out, "S{},{} {},{}", n(x2), n(y2), n(x), n(y))
            }
            PathSegment::Quadratic { x1, y1, x, y } => {
                write!(out, "Q{},{} {},{}", n(x1), n(y1), n(x), n(y))
            }
            PathSegment::SmoothQuadratic { x, y } => write!(out, "T{},{}", n(x), n(y)),
            PathSegment::ArcTo { rx, ry, x_axis_rotation, large_arc, sweep, x, y } => write!(
                out,
                "A{},{} {} {},{} {},{}",
                n(rx),
                n(ry),
                n(x_axis_rotation),
                u8::from(large_arc),
                u8::from(sweep),
                n(x),
                n(y)
            ),
            PathSegment::ClosePath => write!(out, "Z"),
        };
    }

    out
}

/// Axis-aligned bounds of every observed coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum BoundingBox {
    /// No coordinate observed yet.
    #[default]
    Empty,
    Box {
        min_x: f64,
        min_y: f64,
        max_x: f64,
        max_y: f64,
    },
}

impl BoundingBox {
    /// Extends the box to contain `(x, y)`. Non-finite points are ignored.
    pub fn include(&mut self, x: f64, y: f64) {
        if !x.is_finite() || !y.is_finite() {
            return;
        }

        *self = match *self {
            BoundingBox::Empty => BoundingBox::Box {
                min_x: x,
                min_y: y,
                max_x: x,
                max_y: y,
            },
            BoundingBox::Box { min_x, min_y, max_x, max_y } => BoundingBox::Box {
                min_x: min_x.min(x),
                min_y: min_y.min(y),
                max_x: max_x.max(x),
                max_y: max_y.max(y),
            },
        };
    }

    pub fn union(&mut self, other: BoundingBox) {
        if let BoundingBox::Box { min_x, min_y, max_x, max_y } = other {
            self.include(min_x, min_y);
            self.include(max_x, max_y);
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, BoundingBox::Empty)
    }

    pub fn width(&self) -> f64 {
        match *self {
            BoundingBox::Empty => 0.0,
            BoundingBox::Box { min_x, max_x, .. } => max_x - min_x,
        }
    }

    pub fn height(&self) -> f64 {
        match *self {
            BoundingBox::Empty => 0.0,
            BoundingBox::Box { min_y, max_y, .. } => max_y - min_y,
        }
    }
}

/// Folds one path's absolute segments into `bbox`.
pub fn accumulate_bounds(segments: &[PathSegment], bbox: &mut BoundingBox) {
    let (mut cx, mut cy) = (0.0, 0.0);
    let (mut sx, mut sy) = (0.0, 0.0);
    // Last explicit control points, for S/T reflection.
    let mut cubic_ctrl: Option<(f64, f64)> = None;
    let mut quad_ctrl: Option<(f64, f64)> = None;

    for segment in segments {
        let mut next_cubic = None;
        let mut next_quad = None;

        match *segment {
            PathSegment::MoveTo { x, y } => {
                bbox.include(x, y);
                sx = x;
                sy = y;
                cx = x;
                cy = y;
            }
            PathSegment::LineTo { x, y } => {
                bbox.include(x, y);
                cx = x;
                cy = y;
            }
            PathSegment::HorizontalLineTo { x } => {
                bbox.include(x, cy);
                cx = x;
            }
            PathSegment::VerticalLineTo { y } => {
                bbox.include(cx, y);
                cy = y;
            }
            PathSegment::CurveTo { x1, y1, x2, y2, x, y } => {
                bbox.include(x1, y1);
                bbox.include(x2, y2);
                bbox.include(x, y);
                next_cubic = Some((x2, y2));
                cx = x;
                cy = y;
            }
            PathSegment::SmoothCurveTo { x2, y2, x, y } => {
                let (x1, y1) = reflect(cubic_ctrl, cx, cy);
                bbox.include(x1, y1);
                bbox.include(x2, y2);
                bbox.include(x, y);
                next_cubic = Some((x2, y2));
                cx = x;
                cy = y;
            }
            PathSegment::Quadratic { x1, y1, x, y } => {
                bbox.include(x1, y1);
                bbox.include(x, y);
                next_quad = Some((x1, y1));
                cx = x;
                cy = y;
            }
            PathSegment::SmoothQuadratic { x, y } => {
                let (x1, y1) = reflect(quad_ctrl, cx, cy);
                bbox.include(x1, y1);
                bbox.include(x, y);
                next_quad = Some((x1, y1));
                cx = x;
                cy = y;
            }
            PathSegment::ArcTo { rx, ry, x_axis_rotation, large_arc, sweep, x, y } => {
                bbox.union(arc_ellipse_bounds(
                    (cx, cy),
                    (x, y),
                    rx,
                    ry,
                    x_axis_rotation,
                    large_arc,
                    sweep,
                ));
                bbox.include(x, y);
                cx = x;
                cy = y;
            }
            PathSegment::ClosePath => {
                cx = sx;
                cy = sy;
            }
        }

        cubic_ctrl = next_cubic;
        quad_ctrl = next_quad;
    }
}

fn reflect(ctrl: Option<(f64, f64)>, cx: f64, cy: f64) -> (f64, f64) {
    match ctrl {
        Some((px, py)) => (2.0 * cx - px, 2.0 * cy - py),
        None => (cx, cy),
    }
}

/// Bounds of the whole ellipse an arc segment lies on.
///
/// Uses the endpoint-to-center conversion from the SVG implementation notes,
/// including the radius correction for radii too small to span the chord.
fn arc_ellipse_bounds(
    from: (f64, f64),
    to: (f64, f64),
    rx: f64,
    ry: f64,
    x_axis_rotation: f64,
    large_arc: bool,
    sweep: bool,
) -> BoundingBox {
    let mut bbox = BoundingBox::Empty;
    let (x1, y1) = from;
    let (x2, y2) = to;
    let mut rx = rx.abs();
    let mut ry = ry.abs();

    // Degenerate arcs render as straight lines (or nothing).
    if (x1 == x2 && y1 == y2) || rx == 0.0 || ry == 0.0 {
        return bbox;
    }

    let (sin, cos) = x_axis_rotation.to_radians().sin_cos();
    let dx2 = (x1 - x2) / 2.0;
    let dy2 = (y1 - y2) / 2.0;
    let x1p = cos * dx2 + sin * dy2;
    let y1p = -sin * dx2 + cos * dy2;

    let lambda = (x1p * x1p) / (rx * rx) + (y1p * y1p) / (ry * ry);
    if lambda > 1.0 {
        let scale = lambda.sqrt();
        rx *= scale;
        ry *= scale;
    }

    let rx2 = rx * rx;
    let ry2 = ry * ry;
    let num = rx2 * ry2 - rx2 * y1p * y1p - ry2 * x1p * x1p;
    let den = rx2 * y1p * y1p + ry2 * x1p * x1p;
    let sign = if large_arc == sweep { -1.0 } else { 1.0 };
    let coef = if den == 0.0 { 0.0 } else { sign * (num / den).max(0.0).sqrt() };

    let cxp = coef * rx * y1p / ry;
    let cyp = -coef * ry * x1p / rx;
    let center_x = cos * cxp - sin * cyp + (x1 + x2) / 2.0;
    let center_y = sin * cxp + cos * cyp + (y1 + y2) / 2.0;

    let half_w = ((rx * cos).powi(2) + (ry * sin).powi(2)).sqrt();
    let half_h = ((rx * sin).powi(2) + (ry * cos).powi(2)).sqrt();

    bbox.include(center_x - half_w, center_y - half_h);
    bbox.include(center_x + half_w, center_y + half_h);
    bbox
}

/// One indexed `path` element, in document order.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexedPath {
    pub segments: Vec<PathSegment>,
    /// Whether the element had a `d` attribute at all.
    pub has_data: bool,
}

/// Parsed geometry of every path in a document plus the global bounds.
#[derive(Debug, Clone, PartialEq)]
pub struct GeometryIndex {
    pub paths: Vec<IndexedPath>,
    pub bounds: BoundingBox,
}

impl GeometryIndex {
    pub fn build(doc: &SvgDocument) -> Self {
        let mut bounds = BoundingBox::Empty;
        let mut paths = Vec::new();

        for element in doc.paths() {
            let Some(data) = element.attr("d") else {
                paths.push(IndexedPath { segments: Vec::new(), has_data: false });
                continue;
            };

            let parsed = parse_path_data(data);
            if let Some(error) = &parsed.error {
                warn!(
                    error = %error,
                    kept_segments = parsed.segments.len(),
                    "Path data parse stopped early"
                );
            }

            accumulate_bounds(&parsed.segments, &mut bounds);
            paths.push(IndexedPath { segments: parsed.segments, has_data: true });
        }

        Self { paths, bounds }
    }
}
