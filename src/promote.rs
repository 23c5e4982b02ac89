//! Rewrites basic shapes as equivalent `path` elements.
//!
//! Some backends emit `line`, `circle`, `polyline` and friends instead of
//! paths. Promoting them before indexing keeps their geometry through
//! sanitization, which only retains paths.

use crate::document::{format_number, Element, Node, SvgDocument};
use std::str::FromStr;

/// Geometry attributes consumed by promotion, per shape.
fn shape_attributes(name: &str) -> &'static [&'static str] {
    match name {
        "line" => &["x1", "y1", "x2", "y2"],
        "circle" => &["cx", "cy", "r"],
        "ellipse" => &["cx", "cy", "rx", "ry"],
        "rect" => &["x", "y", "width", "height", "rx", "ry"],
        "polyline" | "polygon" => &["points"],
        _ => &[],
    }
}

/// Promotes every supported shape in the document. Returns how many
/// elements were rewritten.
pub fn promote_primitives(doc: &mut SvgDocument) -> usize {
    promote_children(&mut doc.root)
}

fn promote_children(parent: &mut Element) -> usize {
    let mut promoted = 0;
    for child in &mut parent.children {
        if let Node::Element(el) = child {
            if let Some(data) = shape_path_data(el) {
                let consumed = shape_attributes(&el.name);
                el.attributes.retain(|(name, _)| !consumed.contains(&name.as_str()));
                el.name = "path".to_string();
                el.set_attr("d", data);
                promoted += 1;
            } else {
                promoted += promote_children(el);
            }
        }
    }
    promoted
}

fn number(el: &Element, name: &str) -> f64 {
    el.attr(name)
        .and_then(|v| svgtypes::Length::from_str(v).ok())
        .map(|l| l.number)
        .unwrap_or(0.0)
}

/// Path data equivalent to a basic shape, or `None` for other elements and
/// for shapes that render nothing.
fn shape_path_data(el: &Element) -> Option<String> {
    let n = format_number;
    match el.name.as_str() {
        "line" => {
            let (x1, y1) = (number(el, "x1"), number(el, "y1"));
            let (x2, y2) = (number(el, "x2"), number(el, "y2"));
            Some(format!("M{},{} L{},{}", n(x1), n(y1), n(x2), n(y2)))
        }
        "circle" => {
            let r = number(el, "r");
            ellipse_data(number(el, "cx"), number(el, "cy"), r, r)
        }
        "ellipse" => ellipse_data(
            number(el, "cx"),
            number(el, "cy"),
            number(el, "rx"),
            number(el, "ry"),
        ),
        "rect" => {
            let (x, y) = (number(el, "x"), number(el, "y"));
            let (w, h) = (number(el, "width"), number(el, "height"));
            if w <= 0.0 || h <= 0.0 {
                return None;
            }
            Some(format!(
                "M{},{} H{} V{} H{} Z",
                n(x),
                n(y),
                n(x + w),
                n(y + h),
                n(x)
            ))
        }
        "polyline" | "polygon" => {
            let points: Vec<(f64, f64)> = svgtypes::PointsParser::from(el.attr("points")?).collect();
            let (first, rest) = points.split_first()?;

            let mut data = format!("M{},{}", n(first.0), n(first.1));
            for (x, y) in rest {
                data.push_str(&format!(" L{},{}", n(*x), n(*y)));
            }
            if el.is("polygon") {
                data.push_str(" Z");
            }
            Some(data)
        }
        _ => None,
    }
}

fn ellipse_data(cx: f64, cy: f64, rx: f64, ry: f64) -> Option<String> {
    if rx <= 0.0 || ry <= 0.0 {
        return None;
    }

    let n = format_number;
    Some(format!(
        "M{},{} A{},{} 0 1,0 {},{} A{},{} 0 1,0 {},{} Z",
        n(cx - rx),
        n(cy),
        n(rx),
        n(ry),
        n(cx + rx),
        n(cy),
        n(rx),
        n(ry),
        n(cx - rx),
        n(cy)
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{BoundingBox, GeometryIndex};
    use pretty_assertions::assert_eq;

    #[test]
    fn test_promotes_basic_shapes() {
        let mut doc = SvgDocument::parse(
            r#"<svg xmlns="http://www.w3.org/2000/svg">
                <line x1="0" y1="0" x2="10" y2="5" stroke="red"/>
                <g><circle cx="5" cy="5" r="2"/></g>
                <polygon points="0,0 4,0 4,4"/>
                <polyline points=""/>
                <rect x="1" y="2" width="3" height="4"/>
            </svg>"#,
        )
        .unwrap();

        assert_eq!(promote_primitives(&mut doc), 4);

        let paths = doc.paths();
        assert_eq!(paths.len(), 4);
        assert_eq!(paths[0].attr("d"), Some("M0,0 L10,5"));
        assert_eq!(paths[0].attr("stroke"), Some("red"));
        assert_eq!(paths[0].attr("x1"), None);
        assert_eq!(paths[1].attr("d"), Some("M3,5 A2,2 0 1,0 7,5 A2,2 0 1,0 3,5 Z"));
        assert_eq!(paths[2].attr("d"), Some("M0,0 L4,0 L4,4 Z"));
        assert_eq!(paths[3].attr("d"), Some("M1,2 H4 V6 H1 Z"));
    }

    #[test]
    fn test_promoted_circle_bounds() {
        let mut doc = SvgDocument::parse(
            r#"<svg xmlns="http://www.w3.org/2000/svg"><circle cx="10" cy="10" r="5"/></svg>"#,
        )
        .unwrap();
        promote_primitives(&mut doc);

        assert_eq!(
            GeometryIndex::build(&doc).bounds,
            BoundingBox::Box { min_x: 5.0, min_y: 5.0, max_x: 15.0, max_y: 15.0 }
        );
    }
}
