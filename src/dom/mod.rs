//! Arena-backed mutable HTML tree.
//!
//! Pages are parsed with `scraper` (html5ever) and copied into a flat arena so the
//! cleaning passes can remove, rename and re-parent nodes in place. Nodes are
//! addressed by [`NodeId`]; parent/child/sibling links are indices into the arena.
//! Detached nodes stay allocated until the document is dropped.

mod serialize;

pub use serialize::{escape_attr, escape_text};

use std::collections::HashMap;

use scraper::Html;

/// Index of a node inside one [`Document`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u32);

/// Element attribute. Names are stored as parsed, with their namespace prefix
/// (`xlink:href`, `xml:lang`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub name: String,
    pub value: String,
}

impl Attribute {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub enum NodeData {
    Document,
    Element { name: String, attrs: Vec<Attribute> },
    Text(String),
    Comment(String),
}

#[derive(Debug, Clone)]
pub struct Node {
    pub data: NodeData,
    parent: Option<NodeId>,
    first_child: Option<NodeId>,
    last_child: Option<NodeId>,
    prev_sibling: Option<NodeId>,
    next_sibling: Option<NodeId>,
}

impl Node {
    fn new(data: NodeData) -> Self {
        Self {
            data,
            parent: None,
            first_child: None,
            last_child: None,
            prev_sibling: None,
            next_sibling: None,
        }
    }
}

/// Arena DOM. Node 0 is always the document root.
#[derive(Debug, Clone)]
pub struct Document {
    nodes: Vec<Node>,
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl Document {
    /// Empty document holding only the root node.
    pub fn new() -> Self {
        Self {
            nodes: vec![Node::new(NodeData::Document)],
        }
    }

    /// Parse an HTML document. html5ever always produces `html`, `head` and `body`.
    pub fn parse(html: &str) -> Self {
        let parsed = Html::parse_document(html);
        let mut doc = Document::new();
        let mut mapped = HashMap::new();
        // descendants() is pre-order, so a parent is always mapped before its children
        for node in parsed.tree.root().descendants() {
            let created = match node.value() {
                scraper::Node::Document | scraper::Node::Fragment => Some(doc.root()),
                scraper::Node::Element(el) => Some(
                    doc.create_element_with(
                        el.name(),
                        el.attrs
                            .iter()
                            .map(|(name, value)| {
                                let name = match &name.prefix {
                                    Some(prefix) => format!("{}:{}", &**prefix, &*name.local),
                                    None => name.local.to_string(),
                                };
                                Attribute::new(name, &**value)
                            })
                            .collect(),
                    ),
                ),
                scraper::Node::Text(text) => Some(doc.create_text(&**text)),
                scraper::Node::Comment(comment) => Some(doc.create_comment(&**comment)),
                _ => None,
            };
            let Some(id) = created else { continue };
            if id != doc.root() {
                if let Some(parent) = node.parent().and_then(|p| mapped.get(&p.id()).copied()) {
                    doc.append(parent, id);
                }
            }
            mapped.insert(node.id(), id);
        }
        doc
    }

    /// Minimal `html/head/body` skeleton.
    pub fn skeleton() -> Self {
        let mut doc = Document::new();
        let html = doc.create_element("html");
        let head = doc.create_element("head");
        let body = doc.create_element("body");
        doc.append(doc.root(), html);
        doc.append(html, head);
        doc.append(html, body);
        doc
    }

    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0 as usize]
    }

    fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.0 as usize]
    }

    pub fn data(&self, id: NodeId) -> &NodeData {
        &self.node(id).data
    }

    fn alloc(&mut self, data: NodeData) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(Node::new(data));
        id
    }

    pub fn create_element(&mut self, name: &str) -> NodeId {
        self.create_element_with(name, Vec::new())
    }

    /// The name is kept as given: the parser already lower-cases HTML names and leaves
    /// SVG ones such as `foreignObject` in camel case.
    pub fn create_element_with(&mut self, name: &str, attrs: Vec<Attribute>) -> NodeId {
        self.alloc(NodeData::Element {
            name: name.to_string(),
            attrs,
        })
    }

    pub fn create_text(&mut self, text: &str) -> NodeId {
        self.alloc(NodeData::Text(text.to_string()))
    }

    pub fn create_comment(&mut self, text: &str) -> NodeId {
        self.alloc(NodeData::Comment(text.to_string()))
    }

    // ---- structure ----

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).parent
    }

    pub fn first_child(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).first_child
    }

    pub fn next_sibling(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).next_sibling
    }

    pub fn has_children(&self, id: NodeId) -> bool {
        self.node(id).first_child.is_some()
    }

    /// Children in order, collected so callers may mutate while iterating.
    pub fn children(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut cur = self.node(id).first_child;
        while let Some(c) = cur {
            out.push(c);
            cur = self.node(c).next_sibling;
        }
        out
    }

    /// All descendants of `id` in document order (pre-order), excluding `id` itself.
    pub fn descendants(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack: Vec<NodeId> = self.children(id).into_iter().rev().collect();
        while let Some(n) = stack.pop() {
            out.push(n);
            stack.extend(self.children(n).into_iter().rev());
        }
        out
    }

    /// Ancestors from the parent upwards.
    pub fn ancestors(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        std::iter::successors(self.parent(id), move |&p| self.parent(p))
    }

    /// True when the node is still reachable from the document root.
    pub fn is_attached(&self, id: NodeId) -> bool {
        id == self.root() || self.ancestors(id).any(|a| a == self.root())
    }

    /// Detach `id` from its parent. The subtree stays intact and can be re-inserted.
    pub fn detach(&mut self, id: NodeId) {
        let (parent, prev, next) = {
            let n = self.node(id);
            (n.parent, n.prev_sibling, n.next_sibling)
        };
        match prev {
            Some(p) => self.node_mut(p).next_sibling = next,
            None => {
                if let Some(par) = parent {
                    self.node_mut(par).first_child = next;
                }
            }
        }
        match next {
            Some(n) => self.node_mut(n).prev_sibling = prev,
            None => {
                if let Some(par) = parent {
                    self.node_mut(par).last_child = prev;
                }
            }
        }
        let n = self.node_mut(id);
        n.parent = None;
        n.prev_sibling = None;
        n.next_sibling = None;
    }

    /// Append `child` as last child of `parent`, detaching it first if needed.
    pub fn append(&mut self, parent: NodeId, child: NodeId) {
        self.detach(child);
        let last = self.node(parent).last_child;
        {
            let c = self.node_mut(child);
            c.parent = Some(parent);
            c.prev_sibling = last;
        }
        match last {
            Some(l) => self.node_mut(l).next_sibling = Some(child),
            None => self.node_mut(parent).first_child = Some(child),
        }
        self.node_mut(parent).last_child = Some(child);
    }

    /// Insert `new` immediately before `sibling`.
    pub fn insert_before(&mut self, sibling: NodeId, new: NodeId) {
        self.detach(new);
        let (parent, prev) = {
            let s = self.node(sibling);
            (s.parent, s.prev_sibling)
        };
        {
            let n = self.node_mut(new);
            n.parent = parent;
            n.prev_sibling = prev;
            n.next_sibling = Some(sibling);
        }
        self.node_mut(sibling).prev_sibling = Some(new);
        match prev {
            Some(p) => self.node_mut(p).next_sibling = Some(new),
            None => {
                if let Some(par) = parent {
                    self.node_mut(par).first_child = Some(new);
                }
            }
        }
    }

    /// Replace the node by its children, keeping their order.
    pub fn unwrap(&mut self, id: NodeId) {
        if self.parent(id).is_none() {
            return;
        }
        for child in self.children(id) {
            self.insert_before(id, child);
        }
        self.detach(id);
    }

    /// Deep-copy a subtree of `src` into this document. The copy is left detached.
    pub fn import(&mut self, src: &Document, node: NodeId) -> NodeId {
        let copy = self.import_shallow(src, node);
        for child in src.children(node) {
            let c = self.import(src, child);
            self.append(copy, c);
        }
        copy
    }

    /// Copy a single node (element with its attributes, or a text/comment node).
    pub fn import_shallow(&mut self, src: &Document, node: NodeId) -> NodeId {
        match src.data(node) {
            NodeData::Document => self.create_element("div"),
            data => self.alloc(data.clone()),
        }
    }

    // ---- elements ----

    pub fn tag(&self, id: NodeId) -> Option<&str> {
        match &self.node(id).data {
            NodeData::Element { name, .. } => Some(name.as_str()),
            _ => None,
        }
    }

    pub fn is_element(&self, id: NodeId) -> bool {
        self.tag(id).is_some()
    }

    pub fn is_tag(&self, id: NodeId, tag: &str) -> bool {
        self.tag(id) == Some(tag)
    }

    pub fn rename(&mut self, id: NodeId, new_name: &str) {
        if let NodeData::Element { name, .. } = &mut self.node_mut(id).data {
            *name = new_name.to_ascii_lowercase();
        }
    }

    pub fn attrs(&self, id: NodeId) -> &[Attribute] {
        match &self.node(id).data {
            NodeData::Element { attrs, .. } => attrs,
            _ => &[],
        }
    }

    pub fn attr(&self, id: NodeId, name: &str) -> Option<&str> {
        self.attrs(id)
            .iter()
            .find(|a| a.name == name)
            .map(|a| a.value.as_str())
    }

    pub fn set_attr(&mut self, id: NodeId, name: &str, value: impl Into<String>) {
        if let NodeData::Element { attrs, .. } = &mut self.node_mut(id).data {
            let value = value.into();
            match attrs.iter_mut().find(|a| a.name == name) {
                Some(a) => a.value = value,
                None => attrs.push(Attribute::new(name, value)),
            }
        }
    }

    pub fn remove_attr(&mut self, id: NodeId, name: &str) -> Option<String> {
        if let NodeData::Element { attrs, .. } = &mut self.node_mut(id).data {
            if let Some(pos) = attrs.iter().position(|a| a.name == name) {
                return Some(attrs.remove(pos).value);
            }
        }
        None
    }

    /// Keep only the attributes for which `keep` returns true.
    pub fn retain_attrs(&mut self, id: NodeId, mut keep: impl FnMut(&Attribute) -> bool) {
        if let NodeData::Element { attrs, .. } = &mut self.node_mut(id).data {
            attrs.retain(|a| keep(a));
        }
    }

    pub fn classes(&self, id: NodeId) -> impl Iterator<Item = &str> {
        self.attr(id, "class").unwrap_or("").split_ascii_whitespace()
    }

    pub fn has_class(&self, id: NodeId, class: &str) -> bool {
        self.classes(id).any(|c| c == class)
    }

    /// Concatenated text of all descendant text nodes.
    pub fn text(&self, id: NodeId) -> String {
        let mut out = String::new();
        if let NodeData::Text(t) = &self.node(id).data {
            out.push_str(t);
        }
        for d in self.descendants(id) {
            if let NodeData::Text(t) = &self.node(d).data {
                out.push_str(t);
            }
        }
        out
    }

    // ---- queries ----

    /// Attached elements in document order.
    pub fn elements(&self) -> Vec<NodeId> {
        self.descendants(self.root())
            .into_iter()
            .filter(|&n| self.is_element(n))
            .collect()
    }

    pub fn elements_by_tag(&self, tag: &str) -> Vec<NodeId> {
        self.descendants(self.root())
            .into_iter()
            .filter(|&n| self.is_tag(n, tag))
            .collect()
    }

    pub fn find_first(&self, mut pred: impl FnMut(NodeId) -> bool) -> Option<NodeId> {
        self.descendants(self.root())
            .into_iter()
            .find(|&n| self.is_element(n) && pred(n))
    }

    /// First element whose id equals `key` or whose class list contains `key`.
    pub fn find_by_id_or_class(&self, key: &str) -> Option<NodeId> {
        self.find_first(|n| self.attr(n, "id") == Some(key) || self.has_class(n, key))
    }

    pub fn html_element(&self) -> Option<NodeId> {
        self.children(self.root())
            .into_iter()
            .find(|&n| self.is_tag(n, "html"))
    }

    pub fn head(&self) -> Option<NodeId> {
        let html = self.html_element()?;
        self.children(html).into_iter().find(|&n| self.is_tag(n, "head"))
    }

    pub fn body(&self) -> Option<NodeId> {
        let html = self.html_element()?;
        self.children(html).into_iter().find(|&n| self.is_tag(n, "body"))
    }

    /// `head`, created (before `body`) when missing.
    pub fn ensure_head(&mut self) -> NodeId {
        if let Some(head) = self.head() {
            return head;
        }
        let html = match self.html_element() {
            Some(h) => h,
            None => {
                let h = self.create_element("html");
                let root = self.root();
                self.append(root, h);
                h
            }
        };
        let head = self.create_element("head");
        match self.children(html).first() {
            Some(&first) => self.insert_before(first, head),
            None => self.append(html, head),
        }
        head
    }

    /// Number of attached elements named `tag`. Used by tests and manifest properties.
    pub fn count_tag(&self, tag: &str) -> usize {
        self.elements_by_tag(tag).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_builds_html_head_body() {
        let doc = Document::parse("<p id=\"a\" class=\"x y\">Hello <b>world</b></p>");
        assert!(doc.head().is_some());
        let body = doc.body().unwrap();
        let p = doc.children(body)[0];
        assert_eq!(doc.tag(p), Some("p"));
        assert_eq!(doc.attr(p, "id"), Some("a"));
        assert!(doc.has_class(p, "y"));
        assert_eq!(doc.text(p), "Hello world");
    }

    #[test]
    fn detach_and_unwrap_keep_sibling_links_consistent() {
        let mut doc = Document::parse("<div><a>1</a><span><i>2</i><i>3</i></span><a>4</a></div>");
        let div = doc.elements_by_tag("div")[0];
        let span = doc.elements_by_tag("span")[0];
        doc.unwrap(span);
        let tags: Vec<_> = doc
            .children(div)
            .into_iter()
            .filter_map(|c| doc.tag(c).map(String::from))
            .collect();
        assert_eq!(tags, vec!["a", "i", "i", "a"]);
        assert_eq!(doc.text(div), "1234");

        let first = doc.children(div)[0];
        doc.detach(first);
        assert_eq!(doc.text(div), "234");
        assert!(!doc.is_attached(first));
        let last = *doc.children(div).last().unwrap();
        doc.insert_before(last, first);
        assert_eq!(doc.text(div), "2314");
    }

    #[test]
    fn find_by_id_or_class_matches_either() {
        let doc = Document::parse(
            "<div class=\"ws-author other\">A</div><span id=\"ws-title\">T</span>",
        );
        let author = doc.find_by_id_or_class("ws-author").unwrap();
        assert_eq!(doc.text(author), "A");
        let title = doc.find_by_id_or_class("ws-title").unwrap();
        assert_eq!(doc.text(title), "T");
        assert!(doc.find_by_id_or_class("ws-year").is_none());
    }

    #[test]
    fn import_copies_subtree_between_documents() {
        let src = Document::parse("<ul><li>a</li><li>b</li></ul>");
        let ul = src.elements_by_tag("ul")[0];
        let mut dst = Document::skeleton();
        let copy = dst.import(&src, ul);
        let body = dst.body().unwrap();
        dst.append(body, copy);
        assert_eq!(dst.count_tag("li"), 2);
        assert_eq!(dst.text(body), "ab");
    }

    #[test]
    fn svg_names_and_prefixed_attributes_survive_parsing() {
        let doc = Document::parse(
            "<svg viewBox=\"0 0 10 10\"><linearGradient id=\"g\"/><clipPath id=\"c\"/>\
             <foreignObject><p>x</p></foreignObject><use xlink:href=\"#g\"/></svg>",
        );
        assert_eq!(doc.count_tag("foreignObject"), 1);
        assert_eq!(doc.count_tag("linearGradient"), 1);
        assert_eq!(doc.count_tag("clipPath"), 1);
        assert_eq!(doc.count_tag("foreignobject"), 0);
        let svg = doc.elements_by_tag("svg")[0];
        assert_eq!(doc.attr(svg, "viewBox"), Some("0 0 10 10"));
        let used = doc.elements_by_tag("use")[0];
        assert_eq!(doc.attr(used, "xlink:href"), Some("#g"));

        let out = doc.outer_xhtml(svg);
        assert!(out.contains("<foreignObject>"), "{out}");
        assert!(out.contains("xlink:href=\"#g\""), "{out}");
        assert!(out.contains("xmlns:xlink=\"http://www.w3.org/1999/xlink\""), "{out}");
    }

    #[test]
    fn attributes_can_be_set_and_removed() {
        let mut doc = Document::parse("<img src=\"x.png\" align=\"left\">");
        let img = doc.elements_by_tag("img")[0];
        assert_eq!(doc.remove_attr(img, "align").as_deref(), Some("left"));
        doc.set_attr(img, "alt", "");
        doc.set_attr(img, "src", "images/x.png");
        assert_eq!(doc.attr(img, "src"), Some("images/x.png"));
        assert_eq!(doc.attr(img, "alt"), Some(""));
        assert!(doc.attr(img, "align").is_none());
    }
}
