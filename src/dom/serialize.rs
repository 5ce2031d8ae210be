//! XHTML serialization of the arena DOM.

use super::{Document, NodeData, NodeId};

const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param", "source",
    "track", "wbr",
];

const SVG_NS: &str = "http://www.w3.org/2000/svg";
const MATHML_NS: &str = "http://www.w3.org/1998/Math/MathML";
const XLINK_NS: &str = "http://www.w3.org/1999/xlink";

/// Escape character data. Characters not allowed in XML 1.0 are dropped.
pub fn escape_text(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            c if is_xml_char(c) => out.push(c),
            _ => {}
        }
    }
    out
}

/// Escape an attribute value for double-quoted output.
pub fn escape_attr(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            c if is_xml_char(c) => out.push(c),
            _ => {}
        }
    }
    out
}

fn is_xml_char(c: char) -> bool {
    matches!(c, '\t' | '\n' | '\r') || (c >= ' ' && c != '\u{FFFE}' && c != '\u{FFFF}')
}

/// html5ever accepts attribute names that are not XML names (`"`, `=`, ...); those are skipped.
fn is_xml_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_alphanumeric() || matches!(c, '_' | '-' | '.' | ':'))
}

impl Document {
    /// Serialize `id` and its subtree as XHTML.
    pub fn outer_xhtml(&self, id: NodeId) -> String {
        let mut out = String::new();
        self.write_node(id, &mut out);
        out
    }

    /// Serialize the children of `id` as XHTML.
    pub fn inner_xhtml(&self, id: NodeId) -> String {
        let mut out = String::new();
        for child in self.children(id) {
            self.write_node(child, &mut out);
        }
        out
    }

    /// Serialized size in bytes, used by chapter splitting.
    pub fn serialized_len(&self, id: NodeId) -> usize {
        self.outer_xhtml(id).len()
    }

    fn write_node(&self, id: NodeId, out: &mut String) {
        match self.data(id) {
            NodeData::Document => {
                for child in self.children(id) {
                    self.write_node(child, out);
                }
            }
            NodeData::Text(t) => out.push_str(&escape_text(t)),
            NodeData::Comment(c) => {
                let body = c.replace("--", "- -");
                out.push_str("<!--");
                out.push_str(body.trim_end_matches('-'));
                out.push_str("-->");
            }
            NodeData::Element { name, attrs } => {
                if !is_xml_name(name) {
                    for child in self.children(id) {
                        self.write_node(child, out);
                    }
                    return;
                }
                out.push('<');
                out.push_str(name);
                let ns = match name.as_str() {
                    "svg" => Some(SVG_NS),
                    "math" => Some(MATHML_NS),
                    _ => None,
                };
                if let Some(ns) = ns {
                    if !attrs.iter().any(|a| a.name == "xmlns") {
                        out.push_str(" xmlns=\"");
                        out.push_str(ns);
                        out.push('"');
                    }
                }
                if name == "svg" && !attrs.iter().any(|a| a.name == "xmlns:xlink") {
                    out.push_str(" xmlns:xlink=\"");
                    out.push_str(XLINK_NS);
                    out.push('"');
                }
                for attr in attrs.iter().filter(|a| is_xml_name(&a.name)) {
                    out.push(' ');
                    out.push_str(&attr.name);
                    out.push_str("=\"");
                    out.push_str(&escape_attr(&attr.value));
                    out.push('"');
                }
                if VOID_ELEMENTS.contains(&name.as_str()) {
                    out.push_str("/>");
                    return;
                }
                out.push('>');
                for child in self.children(id) {
                    self.write_node(child, out);
                }
                out.push_str("</");
                out.push_str(name);
                out.push('>');
            }
        }
    }
}
