//! In-process DXF backend built on the `dxf` crate.
//!
//! Drawing coordinates are y-up; SVG is y-down, so every y is negated.
//! Counter-clockwise drawing arcs therefore become `sweep=0` SVG arcs.

use crate::converter::{AttemptRequest, ConversionAdapter};
use crate::document::{format_number, Element, SvgDocument};
use crate::error::AdapterError;
use crate::geometry::{write_path_data, BoundingBox, GeometryIndex, PathSegment};
use crate::process::run_with_timeout;
use dxf::entities::EntityType;
use dxf::{Drawing, Vector};
use serde::Serialize;
use std::f64::consts::{PI, TAU};
use std::path::Path;
use tracing::debug;

/// Spans closer than this to a full turn are drawn as closed curves.
const FULL_TURN_EPSILON: f64 = 1e-9;

/// Sample count for ellipse length estimates.
const ELLIPSE_SAMPLES: usize = 256;

pub struct NativeDxfAdapter;

impl ConversionAdapter for NativeDxfAdapter {
    fn attempt(&self, request: &AttemptRequest) -> Result<SvgDocument, AdapterError> {
        let input = request.input.clone();
        run_with_timeout(request.timeout, move || convert_file(&input))?
    }
}

fn load(path: &Path) -> Result<Drawing, AdapterError> {
    Drawing::load_file(path).map_err(|e| AdapterError::BackendFailed(format!("DXF read error: {e}")))
}

fn convert_file(path: &Path) -> Result<SvgDocument, AdapterError> {
    drawing_to_svg(&load(path)?)
}

/// Builds an SVG document with one path per drawable entity.
pub fn drawing_to_svg(drawing: &Drawing) -> Result<SvgDocument, AdapterError> {
    let mut doc = SvgDocument::new();
    let mut skipped = 0usize;

    for entity in drawing.entities() {
        match entity_segments(&entity.specific) {
            Some(segments) if !segments.is_empty() => {
                let path = Element::new("path")
                    .with_attr("d", write_path_data(&segments))
                    .with_attr("fill", "none")
                    .with_attr("stroke", "black");
                doc.root = doc.root.with_child(path);
            }
            _ => skipped += 1,
        }
    }

    let index = GeometryIndex::build(&doc);
    let BoundingBox::Box { min_x, min_y, max_x, max_y } = index.bounds else {
        return Err(AdapterError::BackendFailed("no drawable entities".to_string()));
    };

    doc.set_view_box(min_x, min_y, max_x - min_x, max_y - min_y);
    doc.root.set_attr("width", format_number(max_x - min_x));
    doc.root.set_attr("height", format_number(max_y - min_y));

    debug!(paths = index.paths.len(), skipped, "Converted drawing in process");
    Ok(doc)
}

fn flip(x: f64, y: f64) -> (f64, f64) {
    (x, -y)
}

fn move_to(x: f64, y: f64) -> PathSegment {
    let (x, y) = flip(x, y);
    PathSegment::MoveTo { x, y }
}

fn line_to(x: f64, y: f64) -> PathSegment {
    let (x, y) = flip(x, y);
    PathSegment::LineTo { x, y }
}

/// Arc in drawing space, counter-clockwise from the current point.
fn arc_to(rx: f64, ry: f64, rotation_deg: f64, span: f64, x: f64, y: f64) -> PathSegment {
    let (x, y) = flip(x, y);
    PathSegment::ArcTo {
        rx,
        ry,
        x_axis_rotation: -rotation_deg,
        large_arc: span > PI,
        sweep: false,
        x,
        y,
    }
}

/// Counter-clockwise span from `start` to `end`, in (0, 2π].
fn ccw_span(start: f64, end: f64) -> f64 {
    let span = (end - start).rem_euclid(TAU);
    if span <= FULL_TURN_EPSILON {
        TAU
    } else {
        span
    }
}

/// True when the entity's extrusion points down the z axis.
///
/// With extrusion `(0, 0, -1)` the object coordinate system has its x axis
/// reversed, so the entity is drawn mirrored in x.
fn is_mirrored(extrusion: &Vector) -> bool {
    extrusion.z < 0.0
}

/// Object coordinates of a planar entity to drawing coordinates.
fn ocs_point(extrusion: &Vector, x: f64, y: f64) -> (f64, f64) {
    if is_mirrored(extrusion) {
        (-x, y)
    } else {
        (x, y)
    }
}

/// Counter-clockwise angle range in drawing coordinates.
///
/// Mirroring maps angle `a` to `PI - a` and turns the sweep clockwise, so
/// the range swaps ends to stay counter-clockwise.
fn ocs_angles(extrusion: &Vector, start: f64, end: f64) -> (f64, f64) {
    if is_mirrored(extrusion) {
        (PI - end, PI - start)
    } else {
        (start, end)
    }
}

fn entity_segments(entity: &EntityType) -> Option<Vec<PathSegment>> {
    let segments = match entity {
        EntityType::Line(line) => vec![move_to(line.p1.x, line.p1.y), line_to(line.p2.x, line.p2.y)],
        EntityType::Circle(circle) => {
            let (cx, cy) = ocs_point(&circle.normal, circle.center.x, circle.center.y);
            ellipse_segments((cx, cy), (circle.radius, 0.0), 1.0, 0.0, TAU)?
        }
        EntityType::Arc(arc) => {
            let (cx, cy) = ocs_point(&arc.normal, arc.center.x, arc.center.y);
            let (start, end) = ocs_angles(
                &arc.normal,
                arc.start_angle.to_radians(),
                arc.end_angle.to_radians(),
            );
            ellipse_segments((cx, cy), (arc.radius, 0.0), 1.0, start, end)?
        }
        EntityType::Ellipse(ellipse) => ellipse_segments(
            (ellipse.center.x, ellipse.center.y),
            (ellipse.major_axis.x, ellipse.major_axis.y),
            ellipse.minor_axis_ratio,
            ellipse.start_parameter,
            ellipse.end_parameter,
        )?,
        EntityType::LwPolyline(poly) => {
            let mirrored = is_mirrored(&poly.extrusion_direction);
            let vertices: Vec<(f64, f64, f64)> = poly
                .vertices
                .iter()
                .map(|v| {
                    if mirrored {
                        (-v.x, v.y, -v.bulge)
                    } else {
                        (v.x, v.y, v.bulge)
                    }
                })
                .collect();
            polyline_segments(&vertices, poly.is_closed())
        }
        EntityType::Polyline(poly) => {
            let vertices: Vec<(f64, f64, f64)> = poly
                .vertices()
                .map(|v| (v.location.x, v.location.y, v.bulge))
                .collect();
            polyline_segments(&vertices, poly.is_closed())
        }
        EntityType::Spline(spline) => {
            let points = if spline.fit_points.len() >= 2 {
                &spline.fit_points
            } else {
                &spline.control_points
            };
            let vertices: Vec<(f64, f64, f64)> = points.iter().map(|p| (p.x, p.y, 0.0)).collect();
            polyline_segments(&vertices, false)
        }
        _ => return None,
    };
    Some(segments)
}

/// Elliptical arc from parameter `start` to `end` (counter-clockwise).
///
/// `major` is the major axis vector; a circle is `(r, 0)` with ratio 1.
fn ellipse_segments(
    center: (f64, f64),
    major: (f64, f64),
    ratio: f64,
    start: f64,
    end: f64,
) -> Option<Vec<PathSegment>> {
    let rx = major.0.hypot(major.1);
    let ry = rx * ratio.abs();
    if rx <= 0.0 || ry <= 0.0 {
        return None;
    }

    let rotation = major.1.atan2(major.0);
    let minor = (-major.1 * ratio, major.0 * ratio);
    let point = |t: f64| {
        (
            center.0 + major.0 * t.cos() + minor.0 * t.sin(),
            center.1 + major.1 * t.cos() + minor.1 * t.sin(),
        )
    };
    let rotation_deg = rotation.to_degrees();
    let span = ccw_span(start, end);

    let (sx, sy) = point(start);
    let mut segments = vec![move_to(sx, sy)];

    if span >= TAU {
        // A single arc command cannot draw a closed curve.
        let (mx, my) = point(start + PI);
        segments.push(arc_to(rx, ry, rotation_deg, PI, mx, my));
        segments.push(arc_to(rx, ry, rotation_deg, PI, sx, sy));
        segments.push(PathSegment::ClosePath);
    } else {
        let (ex, ey) = point(start + span);
        segments.push(arc_to(rx, ry, rotation_deg, span, ex, ey));
    }

    Some(segments)
}

/// Segment between two polyline vertices; a non-zero bulge is a circular arc
/// whose included angle is `4 * atan(bulge)`.
fn bulge_segment(from: (f64, f64), to: (f64, f64), bulge: f64) -> PathSegment {
    let chord = (to.0 - from.0).hypot(to.1 - from.1);
    if bulge == 0.0 || chord == 0.0 {
        return line_to(to.0, to.1);
    }

    let angle = 4.0 * bulge.abs().atan();
    let radius = chord / (2.0 * (angle / 2.0).sin());
    let (x, y) = flip(to.0, to.1);
    PathSegment::ArcTo {
        rx: radius,
        ry: radius,
        x_axis_rotation: 0.0,
        large_arc: angle > PI,
        sweep: bulge < 0.0,
        x,
        y,
    }
}

fn polyline_segments(vertices: &[(f64, f64, f64)], closed: bool) -> Vec<PathSegment> {
    let Some(&(x0, y0, _)) = vertices.first() else {
        return Vec::new();
    };

    let mut segments = vec![move_to(x0, y0)];
    for pair in vertices.windows(2) {
        let (x1, y1, bulge) = pair[0];
        let (x2, y2, _) = pair[1];
        segments.push(bulge_segment((x1, y1), (x2, y2), bulge));
    }

    if closed && vertices.len() > 1 {
        if let Some(&(xl, yl, bulge)) = vertices.last() {
            if bulge != 0.0 {
                segments.push(bulge_segment((xl, yl), (x0, y0), bulge));
            }
        }
        segments.push(PathSegment::ClosePath);
    }
    segments
}

/// Cutting statistics for a drawing: total contour length and the number of
/// contours (each contour needs one piercing).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CutMetrics {
    pub total_length: f64,
    pub piercings: usize,
}

impl CutMetrics {
    pub fn from_file(path: &Path) -> Result<Self, AdapterError> {
        Ok(Self::from_drawing(&load(path)?))
    }

    pub fn from_drawing(drawing: &Drawing) -> Self {
        let mut metrics = Self::default();
        for entity in drawing.entities() {
            if let Some(length) = entity_length(&entity.specific) {
                metrics.total_length += length;
                metrics.piercings += 1;
            }
        }
        metrics
    }
}

fn entity_length(entity: &EntityType) -> Option<f64> {
    let length = match entity {
        EntityType::Line(line) => (line.p2.x - line.p1.x).hypot(line.p2.y - line.p1.y),
        EntityType::Circle(circle) => TAU * circle.radius,
        EntityType::Arc(arc) => {
            arc.radius * ccw_span(arc.start_angle.to_radians(), arc.end_angle.to_radians())
        }
        EntityType::Ellipse(ellipse) => {
            if ellipse.minor_axis_ratio == 0.0
                || ellipse.major_axis.x.hypot(ellipse.major_axis.y) == 0.0
            {
                return None;
            }
            sampled_ellipse_length(
                (ellipse.major_axis.x, ellipse.major_axis.y),
                ellipse.minor_axis_ratio,
                ellipse.start_parameter,
                ellipse.end_parameter,
            )
        }
        EntityType::LwPolyline(poly) => {
            let mirrored = is_mirrored(&poly.extrusion_direction);
            let vertices: Vec<(f64, f64, f64)> = poly
                .vertices
                .iter()
                .map(|v| {
                    if mirrored {
                        (-v.x, v.y, -v.bulge)
                    } else {
                        (v.x, v.y, v.bulge)
                    }
                })
                .collect();
            polyline_length(&vertices, poly.is_closed())
        }
        EntityType::Polyline(poly) => {
            let vertices: Vec<(f64, f64, f64)> = poly
                .vertices()
                .map(|v| (v.location.x, v.location.y, v.bulge))
                .collect();
            polyline_length(&vertices, poly.is_closed())
        }
        EntityType::Spline(spline) => {
            let points = if spline.fit_points.len() >= 2 {
                &spline.fit_points
            } else {
                &spline.control_points
            };
            let vertices: Vec<(f64, f64, f64)> = points.iter().map(|p| (p.x, p.y, 0.0)).collect();
            polyline_length(&vertices, false)
        }
        _ => return None,
    };
    Some(length)
}

fn sampled_ellipse_length(major: (f64, f64), ratio: f64, start: f64, end: f64) -> f64 {
    let minor = (-major.1 * ratio, major.0 * ratio);
    let span = ccw_span(start, end);
    let point = |t: f64| {
        (
            major.0 * t.cos() + minor.0 * t.sin(),
            major.1 * t.cos() + minor.1 * t.sin(),
        )
    };

    let mut length = 0.0;
    let mut previous = point(start);
    for i in 1..=ELLIPSE_SAMPLES {
        let next = point(start + span * i as f64 / ELLIPSE_SAMPLES as f64);
        length += (next.0 - previous.0).hypot(next.1 - previous.1);
        previous = next;
    }
    length
}

fn bulge_length(from: (f64, f64), to: (f64, f64), bulge: f64) -> f64 {
    let chord = (to.0 - from.0).hypot(to.1 - from.1);
    if bulge == 0.0 || chord == 0.0 {
        return chord;
    }
    let angle = 4.0 * bulge.abs().atan();
    let radius = chord / (2.0 * (angle / 2.0).sin());
    radius * angle
}

fn polyline_length(vertices: &[(f64, f64, f64)], closed: bool) -> f64 {
    let mut length: f64 = vertices
        .windows(2)
        .map(|pair| bulge_length((pair[0].0, pair[0].1), (pair[1].0, pair[1].1), pair[0].2))
        .sum();

    if closed && vertices.len() > 1 {
        if let (Some(first), Some(last)) = (vertices.first(), vertices.last()) {
            length += bulge_length((last.0, last.1), (first.0, first.1), last.2);
        }
    }
    length
}
