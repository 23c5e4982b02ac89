//! Moves document geometry into a non-negative, origin-anchored frame.
//!
//! Two strategies exist. [`normalize_coordinates`] rewrites path data using
//! the global bounds from a [`GeometryIndex`]. [`fix_origin`] only looks at
//! the declared viewBox and wraps the content in a translating group.

use crate::document::{format_number, Element, Node, SvgDocument};
use crate::error::PipelineError;
use crate::geometry::{write_path_data, BoundingBox, GeometryIndex};
use std::str::FromStr;
use tracing::debug;

/// Shift applied by a normalization pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Translation {
    pub dx: f64,
    pub dy: f64,
}

impl Translation {
    pub fn is_zero(&self) -> bool {
        self.dx == 0.0 && self.dy == 0.0
    }
}

/// Translates every path by the negated minimum corner of the global bounds
/// and sets `viewBox="0 0 width height"`.
///
/// `index` must have been built from `doc` with no structural change in
/// between. Returns [`PipelineError::NoGeometryFound`] for empty bounds.
pub fn normalize_coordinates(
    doc: &mut SvgDocument,
    index: &GeometryIndex,
) -> Result<Translation, PipelineError> {
    let BoundingBox::Box { min_x, min_y, max_x, max_y } = index.bounds else {
        return Err(PipelineError::NoGeometryFound);
    };

    let shift = Translation { dx: -min_x, dy: -min_y };
    let mut indexed = index.paths.iter();

    doc.for_each_path_mut(|element| {
        let Some(path) = indexed.next() else {
            return;
        };
        if !path.has_data || path.segments.is_empty() {
            return;
        }

        let mut segments = path.segments.clone();
        for segment in &mut segments {
            segment.translate(shift.dx, shift.dy);
        }
        element.set_attr("d", write_path_data(&segments));
    });

    doc.set_view_box(0.0, 0.0, max_x - min_x, max_y - min_y);

    debug!(dx = shift.dx, dy = shift.dy, "Normalized path coordinates");
    Ok(shift)
}

/// Declared frame of a document: its viewBox, or `0 0 width height`.
fn declared_frame(doc: &SvgDocument) -> (f64, f64, f64, f64) {
    if let Some(vb) = doc.view_box() {
        return (vb.x, vb.y, vb.w, vb.h);
    }

    let length = |name: &str| {
        doc.root
            .attr(name)
            .and_then(|v| svgtypes::Length::from_str(v).ok())
            .map(|l| l.number)
            .unwrap_or(0.0)
    };
    (0.0, 0.0, length("width"), length("height"))
}

/// Wraps all content in `<g transform="translate(dx dy)">` when the declared
/// frame starts at a negative coordinate, and re-anchors the viewBox at 0,0.
///
/// Width and height grow by the same factor as the viewBox so the physical
/// scale is kept. Documents already anchored at a non-negative corner are
/// left untouched.
pub fn fix_origin(doc: &mut SvgDocument) -> Translation {
    let (x, y, w, h) = declared_frame(doc);

    if x >= 0.0 && y >= 0.0 {
        return Translation { dx: 0.0, dy: 0.0 };
    }

    let shift = Translation {
        dx: if x < 0.0 { -x } else { 0.0 },
        dy: if y < 0.0 { -y } else { 0.0 },
    };

    let mut group = Element::new("g").with_attr(
        "transform",
        format!("translate({} {})", format_number(shift.dx), format_number(shift.dy)),
    );
    group.children = std::mem::take(&mut doc.root.children);
    doc.root.children.push(Node::Element(group));

    let new_w = w + shift.dx;
    let new_h = h + shift.dy;
    scale_length(&mut doc.root, "width", w, new_w);
    scale_length(&mut doc.root, "height", h, new_h);
    doc.set_view_box(0.0, 0.0, new_w, new_h);

    debug!(dx = shift.dx, dy = shift.dy, "Re-anchored viewBox origin");
    shift
}

fn scale_length(root: &mut Element, name: &str, old: f64, new: f64) {
    let Some(length) = root.attr(name).and_then(|v| svgtypes::Length::from_str(v).ok()) else {
        return;
    };

    let number = if old > 0.0 {
        length.number * new / old
    } else {
        length.number + (new - old)
    };
    root.set_attr(name, format!("{}{}", format_number(number), unit_suffix(length.unit)));
}

fn unit_suffix(unit: svgtypes::LengthUnit) -> &'static str {
    use svgtypes::LengthUnit;
    match unit {
        LengthUnit::None => "",
        LengthUnit::Em => "em",
        LengthUnit::Ex => "ex",
        LengthUnit::Px => "px",
        LengthUnit::In => "in",
        LengthUnit::Cm => "cm",
        LengthUnit::Mm => "mm",
        LengthUnit::Pt => "pt",
        LengthUnit::Pc => "pc",
        LengthUnit::Percent => "%",
    }
}
