//! Reduces a document to outline-only path content.

use crate::document::{Element, Node, SvgDocument};
use tracing::debug;

/// Element kinds that survive sanitization below the root.
const ALLOWED_ELEMENTS: &[&str] = &["g", "path"];

pub const DEFAULT_STROKE: &str = "black";

/// Counters from one sanitization run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SanitizeReport {
    pub removed_elements: usize,
    pub removed_containers: usize,
    /// Pruning passes until nothing more was removed.
    pub passes: usize,
    pub styled_paths: usize,
}

/// Removes every element that is neither a path nor a group, with its
/// subtree, and all text.
///
/// Paths inside `defs`, `clipPath`, `marker` and the like go with their
/// container, so geometry measured afterwards is exactly what survives
/// [`sanitize`].
pub fn strip_disallowed(doc: &mut SvgDocument) -> usize {
    remove_disallowed(&mut doc.root)
}

/// Strips everything except paths and the groups holding them, then forces
/// `fill="none"` and the given stroke on every path.
pub fn sanitize(doc: &mut SvgDocument, stroke: &str) -> SanitizeReport {
    let mut report = SanitizeReport {
        removed_elements: remove_disallowed(&mut doc.root),
        ..SanitizeReport::default()
    };

    loop {
        report.passes += 1;
        let removed = prune_empty_containers(&mut doc.root);
        report.removed_containers += removed;
        if removed == 0 {
            break;
        }
    }

    doc.for_each_path_mut(|path| {
        apply_outline_style(path, stroke);
        report.styled_paths += 1;
    });

    debug!(
        removed_elements = report.removed_elements,
        removed_containers = report.removed_containers,
        passes = report.passes,
        paths = report.styled_paths,
        "Sanitized document"
    );
    report
}

/// Drops text nodes and every element whose kind is not allowed.
fn remove_disallowed(parent: &mut Element) -> usize {
    let before = parent.children.len();
    parent.children.retain(|child| match child {
        Node::Element(el) => ALLOWED_ELEMENTS.contains(&el.name.as_str()),
        Node::Text(_) => false,
    });

    let mut removed = before - parent.children.len();
    for child in &mut parent.children {
        if let Node::Element(el) = child {
            removed += remove_disallowed(el);
        }
    }
    removed
}

/// One pruning pass: removes containers without path descendants and
/// childless identified elements. Returns how many were removed.
fn prune_empty_containers(parent: &mut Element) -> usize {
    let mut removed = 0;
    for child in &mut parent.children {
        if let Node::Element(el) = child {
            removed += prune_empty_containers(el);
        }
    }

    let before = parent.children.len();
    parent.children.retain(|child| match child {
        Node::Element(el) if el.is("path") => true,
        Node::Element(el) => {
            let empty_layer = el.attr("id").is_some() && el.children.is_empty();
            el.path_descendants() > 0 && !empty_layer
        }
        Node::Text(_) => true,
    });
    removed + (before - parent.children.len())
}

fn apply_outline_style(path: &mut Element, stroke: &str) {
    path.set_attr("fill", "none");
    path.set_attr("stroke", stroke);

    // Inline style outranks presentation attributes.
    if let Some(style) = path.remove_attr("style") {
        let kept: Vec<&str> = style
            .split(';')
            .map(str::trim)
            .filter(|decl| {
                let property = decl.split(':').next().unwrap_or_default().trim();
                !decl.is_empty() && property != "fill" && property != "stroke"
            })
            .collect();
        if !kept.is_empty() {
            path.set_attr("style", kept.join(";"));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    /// Tag skeleton of an element tree, e.g. `<g><path/></g>`.
    fn skeleton(el: &Element) -> String {
        let inner: String = el.child_elements().map(skeleton).collect();
        if inner.is_empty() {
            format!("<{}/>", el.name)
        } else {
            format!("<{}>{}</{}>", el.name, inner, el.name)
        }
    }

    fn sanitized(text: &str) -> (SvgDocument, SanitizeReport) {
        let mut doc = SvgDocument::parse(text).unwrap();
        let report = sanitize(&mut doc, DEFAULT_STROKE);
        (doc, report)
    }

    #[test]
    fn test_nested_groups_keep_path() {
        let (doc, _) = sanitized(
            r#"<svg xmlns="http://www.w3.org/2000/svg"><g><g><path d="M0,0 L1,1"/></g><rect width="1" height="1"/></g></svg>"#,
        );
        assert_eq!(skeleton(&doc.root), "<svg><g><g><path/></g></g></svg>");
    }

    #[test]
    fn test_group_emptied_by_sibling_removal_is_purged() {
        let (doc, report) = sanitized(
            r#"<svg xmlns="http://www.w3.org/2000/svg">
                <g id="annotations"><g><text>A</text></g><circle r="2"/></g>
                <g><path d="M0,0"/></g>
                <defs><path id="p" d="M0,0"/></defs>
                <style>.a{}</style>
            </svg>"#,
        );

        assert_eq!(skeleton(&doc.root), "<svg><g><path/></g></svg>");
        assert_eq!(report.removed_containers, 2);
        assert!(report.removed_elements >= 4);
    }

    #[test]
    fn test_identified_empty_layer_removed() {
        let (doc, _) = sanitized(
            r#"<svg xmlns="http://www.w3.org/2000/svg"><g id="layer0"/><path id="keep" d="M0,0 L2,2"/></svg>"#,
        );
        assert_eq!(skeleton(&doc.root), "<svg><path/></svg>");
        assert_eq!(doc.paths()[0].attr("id"), Some("keep"));
    }

    #[test]
    fn test_outline_style_forced() {
        let (doc, report) = sanitized(
            r#"<svg xmlns="http://www.w3.org/2000/svg"><path d="M0,0 L1,1" fill="red" stroke="blue" style="fill:red; stroke-width:2; stroke:blue"/></svg>"#,
        );
        let path = doc.paths()[0];

        assert_eq!(path.attr("fill"), Some("none"));
        assert_eq!(path.attr("stroke"), Some("black"));
        assert_eq!(path.attr("style"), Some("stroke-width:2"));
        assert_eq!(report.styled_paths, 1);
    }

    #[test]
    fn test_foreign_elements_removed() {
        let (doc, _) = sanitized(
            r#"<svg xmlns="http://www.w3.org/2000/svg" xmlns:sodipodi="http://sodipodi.sourceforge.net/DTD/sodipodi-0.dtd">
                <sodipodi:namedview id="base"/><metadata/><path d="M0,0"/>
            </svg>"#,
        );
        assert_eq!(skeleton(&doc.root), "<svg><path/></svg>");
    }

    #[test]
    fn test_strip_removes_paths_in_definitions() {
        let mut doc = SvgDocument::parse(
            r#"<svg xmlns="http://www.w3.org/2000/svg"><defs><path d="M-100,-100 L-90,-90"/></defs><clipPath><path d="M0,0"/></clipPath><path d="M10,10 L20,20"/></svg>"#,
        )
        .unwrap();

        assert_eq!(strip_disallowed(&mut doc), 2);
        assert_eq!(doc.paths().len(), 1);
        assert_eq!(sanitize(&mut doc, DEFAULT_STROKE).removed_elements, 0);
    }

    #[test]
    fn test_sanitize_is_idempotent() {
        let (mut doc, _) = sanitized(
            r#"<svg xmlns="http://www.w3.org/2000/svg"><g><path d="M0,0"/><line x1="0" y1="0" x2="1" y2="1"/></g></svg>"#,
        );
        let once = doc.clone();
        let report = sanitize(&mut doc, DEFAULT_STROKE);

        assert_eq!(doc, once);
        assert_eq!(report.removed_elements, 0);
        assert_eq!(report.removed_containers, 0);
        assert_eq!(report.passes, 1);
    }
}
