//! Owned, mutable SVG element tree.
//!
//! Parsing goes through `roxmltree` (read-only) and the result is copied into
//! plain structs so later stages can rewrite attributes and prune children.
//! Serialization uses `xmlwriter`.

use crate::error::DocumentError;
use std::str::FromStr;

pub const SVG_NS: &str = "http://www.w3.org/2000/svg";
const XML_NS: &str = "http://www.w3.org/XML/1998/namespace";

#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Element(Element),
    Text(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Element {
    /// Qualified name; SVG-namespace elements carry no prefix.
    pub name: String,
    pub attributes: Vec<(String, String)>,
    pub children: Vec<Node>,
}

impl Element {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attributes: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn with_attr(mut self, name: &str, value: impl Into<String>) -> Self {
        self.set_attr(name, value);
        self
    }

    pub fn with_child(mut self, child: Element) -> Self {
        self.children.push(Node::Element(child));
        self
    }

    pub fn is(&self, name: &str) -> bool {
        self.name == name
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn set_attr(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        match self.attributes.iter_mut().find(|(n, _)| n == name) {
            Some(slot) => slot.1 = value,
            None => self.attributes.push((name.to_string(), value)),
        }
    }

    pub fn remove_attr(&mut self, name: &str) -> Option<String> {
        let index = self.attributes.iter().position(|(n, _)| n == name)?;
        Some(self.attributes.remove(index).1)
    }

    pub fn child_elements(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(|child| match child {
            Node::Element(el) => Some(el),
            Node::Text(_) => None,
        })
    }

    /// Number of `path` elements anywhere below this element.
    pub fn path_descendants(&self) -> usize {
        self.child_elements()
            .map(|el| usize::from(el.is("path")) + el.path_descendants())
            .sum()
    }

    fn collect_paths<'a>(&'a self, out: &mut Vec<&'a Element>) {
        for child in self.child_elements() {
            if child.is("path") {
                out.push(child);
            }
            child.collect_paths(out);
        }
    }

    fn visit_paths_mut<F: FnMut(&mut Element)>(&mut self, f: &mut F) {
        for child in &mut self.children {
            if let Node::Element(el) = child {
                if el.is("path") {
                    f(el);
                }
                el.visit_paths_mut(f);
            }
        }
    }
}

/// A parsed SVG document; `root` is always the `<svg>` element.
#[derive(Debug, Clone, PartialEq)]
pub struct SvgDocument {
    pub root: Element,
}

impl SvgDocument {
    /// Creates an empty document with the SVG namespace declared.
    pub fn new() -> Self {
        Self {
            root: Element::new("svg").with_attr("xmlns", SVG_NS),
        }
    }

    pub fn parse(text: &str) -> Result<Self, DocumentError> {
        let xml = roxmltree::Document::parse(text)?;
        let root_node = xml.root_element();

        if root_node.tag_name().name() != "svg" {
            return Err(DocumentError::NotSvg(root_node.tag_name().name().to_string()));
        }

        let mut root = convert_element(root_node);

        // Namespace declarations are not attributes in roxmltree; restore
        // the ones in scope at the root so prefixed names stay bound.
        for ns in root_node.namespaces() {
            if ns.uri() == XML_NS {
                continue;
            }
            let name = match ns.name() {
                Some(prefix) => format!("xmlns:{prefix}"),
                None => "xmlns".to_string(),
            };
            root.set_attr(&name, ns.uri());
        }
        if root.attr("xmlns").is_none() {
            root.set_attr("xmlns", SVG_NS);
        }

        Ok(Self { root })
    }

    pub fn to_xml(&self) -> String {
        let opt = xmlwriter::Options {
            indent: xmlwriter::Indent::Spaces(2),
            ..xmlwriter::Options::default()
        };
        let mut xml = xmlwriter::XmlWriter::new(opt);
        xml.write_declaration();
        write_element(&self.root, &mut xml);
        let mut text = xml.end_document();
        text.push('\n');
        text
    }

    pub fn view_box(&self) -> Option<svgtypes::ViewBox> {
        self.root
            .attr("viewBox")
            .and_then(|v| svgtypes::ViewBox::from_str(v).ok())
    }

    pub fn set_view_box(&mut self, x: f64, y: f64, width: f64, height: f64) {
        let value = format!(
            "{} {} {} {}",
            format_number(x),
            format_number(y),
            format_number(width),
            format_number(height)
        );
        self.root.set_attr("viewBox", value);
    }

    /// All `path` elements in document order.
    pub fn paths(&self) -> Vec<&Element> {
        let mut out = Vec::new();
        self.root.collect_paths(&mut out);
        out
    }

    /// Visits every `path` element in document order.
    pub fn for_each_path_mut<F: FnMut(&mut Element)>(&mut self, mut f: F) {
        self.root.visit_paths_mut(&mut f);
    }
}

impl Default for SvgDocument {
    fn default() -> Self {
        Self::new()
    }
}

fn qualified_name(node: roxmltree::Node, namespace: Option<&str>, local: &str) -> String {
    match namespace {
        None | Some(SVG_NS) => local.to_string(),
        Some(XML_NS) => format!("xml:{local}"),
        Some(uri) => match node.lookup_prefix(uri) {
            Some(prefix) if !prefix.is_empty() => format!("{prefix}:{local}"),
            _ => local.to_string(),
        },
    }
}

fn convert_element(node: roxmltree::Node) -> Element {
    let tag = node.tag_name();
    let mut element = Element::new(qualified_name(node, tag.namespace(), tag.name()));

    for attr in node.attributes() {
        let name = qualified_name(node, attr.namespace(), attr.name());
        element.attributes.push((name, attr.value().to_string()));
    }

    for child in node.children() {
        if child.is_element() {
            element.children.push(Node::Element(convert_element(child)));
        } else if child.is_text() {
            let text = child.text().unwrap_or_default();
            if !text.trim().is_empty() {
                element.children.push(Node::Text(text.to_string()));
            }
        }
    }

    element
}

fn write_element(element: &Element, xml: &mut xmlwriter::XmlWriter) {
    xml.start_element(&element.name);
    for (name, value) in &element.attributes {
        xml.write_attribute(name, value);
    }
    for child in &element.children {
        match child {
            Node::Element(el) => write_element(el, xml),
            Node::Text(text) => xml.write_text(text),
        }
    }
    xml.end_element();
}

/// Formats a coordinate with at most six fractional digits.
///
/// Never produces `-0`; the output re-parses to the same value.
pub fn format_number(value: f64) -> String {
    let rounded = (value * 1e6).round() / 1e6;
    if rounded == 0.0 {
        return "0".to_string();
    }
    format!("{rounded}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_query_paths() {
        let doc = SvgDocument::parse(
            r#"<svg xmlns="http://www.w3.org/2000/svg" viewBox="0 0 10 10">
                <g id="layer1"><path d="M0,0 L1,1"/></g>
                <path d="M2,2 L3,3"/>
            </svg>"#,
        )
        .unwrap();

        let paths = doc.paths();
        assert_eq!(paths.len(), 2);
        assert_eq!(paths[0].attr("d"), Some("M0,0 L1,1"));
        assert_eq!(doc.root.path_descendants(), 2);

        let vb = doc.view_box().unwrap();
        assert_eq!((vb.x, vb.y, vb.w, vb.h), (0.0, 0.0, 10.0, 10.0));
    }

    #[test]
    fn test_rejects_non_svg_root() {
        let err = SvgDocument::parse("<html/>").unwrap_err();
        assert!(matches!(err, DocumentError::NotSvg(name) if name == "html"));
    }

    #[test]
    fn test_rejects_malformed_xml() {
        assert!(matches!(
            SvgDocument::parse("<svg><path></svg>"),
            Err(DocumentError::Xml(_))
        ));
    }

    #[test]
    fn test_prefixed_names_survive_round_trip() {
        let text = r#"<svg xmlns="http://www.w3.org/2000/svg" xmlns:inkscape="http://www.inkscape.org/namespaces/inkscape">
            <g inkscape:label="Layer 1"><path d="M0,0"/></g>
        </svg>"#;
        let doc = SvgDocument::parse(text).unwrap();
        let group = doc.root.child_elements().next().unwrap();
        assert_eq!(group.attr("inkscape:label"), Some("Layer 1"));

        let reparsed = SvgDocument::parse(&doc.to_xml()).unwrap();
        assert_eq!(reparsed, doc);
    }

    #[test]
    fn test_set_attr_replaces_existing() {
        let mut el = Element::new("path").with_attr("fill", "red");
        el.set_attr("fill", "none");
        assert_eq!(el.attributes, vec![("fill".to_string(), "none".to_string())]);
        assert_eq!(el.remove_attr("fill"), Some("none".to_string()));
        assert_eq!(el.attr("fill"), None);
    }

    #[test]
    fn test_format_number() {
        assert_eq!(format_number(80.0), "80");
        assert_eq!(format_number(-0.0000001), "0");
        assert_eq!(format_number(1.25), "1.25");
        assert_eq!(format_number(1.0 / 3.0), "0.333333");
        assert_eq!(format_number(-12.5), "-12.5");
    }
}
