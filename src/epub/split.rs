//! Splits oversized chapter documents into several smaller ones.
//!
//! Many e-readers load one content document at a time and choke on very large ones.
//! A body whose serialized size exceeds the threshold is cut between block nodes into
//! roughly equal parts; an oversized wrapper is descended into, and its shallow copy is
//! re-created around the content that continues in the next fragment.

use crate::dom::{Document, NodeId};

pub const DEFAULT_SPLIT_THRESHOLD: usize = 250_000;
pub const DEFAULT_SPLIT_MARGIN: usize = 5_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SplitOptions {
    /// Serialized body size above which a document is split.
    pub threshold: usize,
    /// Added to the per-fragment target so the last fragment does not end up tiny.
    pub margin: usize,
}

impl Default for SplitOptions {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_SPLIT_THRESHOLD,
            margin: DEFAULT_SPLIT_MARGIN,
        }
    }
}

/// Split `doc` when its body is too large. Returns `None` when no split is needed.
pub fn split_document(doc: &Document, options: SplitOptions) -> Option<Vec<Document>> {
    let body = doc.body()?;
    let size = doc.inner_xhtml(body).len();
    if options.threshold == 0 || size <= options.threshold {
        return None;
    }
    let parts = size.div_ceil(options.threshold);
    let target = size / parts + options.margin;

    let mut splitter = Splitter::new(doc, body, target);
    splitter.walk(body);
    let fragments = splitter.finish();
    if fragments.len() < 2 {
        return None;
    }
    Some(fragments)
}

struct Splitter<'a> {
    src: &'a Document,
    src_body: NodeId,
    target: usize,
    done: Vec<Document>,
    current: Document,
    size: usize,
    /// Source wrappers we are currently inside, outermost first.
    open: Vec<NodeId>,
    /// Their copies in `current`, same order.
    copies: Vec<NodeId>,
}

impl<'a> Splitter<'a> {
    fn new(src: &'a Document, src_body: NodeId, target: usize) -> Self {
        let current = Self::skeleton(src, src_body);
        Self {
            src,
            src_body,
            target,
            done: Vec::new(),
            current,
            size: 0,
            open: Vec::new(),
            copies: Vec::new(),
        }
    }

    /// Empty document sharing the source's `html` attributes, `head` and `body` attributes.
    fn skeleton(src: &Document, src_body: NodeId) -> Document {
        let mut doc = Document::new();
        let root = doc.root();
        let html = match src.html_element() {
            Some(h) => doc.import_shallow(src, h),
            None => doc.create_element("html"),
        };
        doc.append(root, html);
        if let Some(head) = src.head() {
            let head = doc.import(src, head);
            doc.append(html, head);
        }
        let body = doc.import_shallow(src, src_body);
        doc.append(html, body);
        doc
    }

    fn insertion_point(&self) -> NodeId {
        match self.copies.last() {
            Some(&c) => c,
            None => self.current.body().unwrap_or_else(|| self.current.root()),
        }
    }

    fn walk(&mut self, parent: NodeId) {
        for child in self.src.children(parent) {
            let len = self.src.serialized_len(child);
            if len > self.target && self.src.is_element(child) && self.src.has_children(child) {
                self.open_wrapper(child);
                self.walk(child);
                self.open.pop();
                self.copies.pop();
                continue;
            }
            if self.size > 0 && self.size + len > self.target {
                self.next_fragment();
            }
            let copy = self.current.import(self.src, child);
            let at = self.insertion_point();
            self.current.append(at, copy);
            self.size += len;
        }
    }

    fn open_wrapper(&mut self, wrapper: NodeId) {
        let copy = self.current.import_shallow(self.src, wrapper);
        let at = self.insertion_point();
        self.current.append(at, copy);
        self.open.push(wrapper);
        self.copies.push(copy);
    }

    /// Close the current fragment and re-open the wrapper chain in a new one.
    ///
    /// Wrappers opened right before the cut hold nothing yet and are dropped from the
    /// finished fragment. Re-created wrappers lose their `id`, which stays with the
    /// fragment where the wrapper starts.
    fn next_fragment(&mut self) {
        for &copy in self.copies.iter().rev() {
            if self.current.has_children(copy) {
                break;
            }
            self.current.detach(copy);
        }
        let fresh = Self::skeleton(self.src, self.src_body);
        let finished = std::mem::replace(&mut self.current, fresh);
        self.done.push(finished);
        self.size = 0;
        self.copies.clear();
        if let Some(body) = self.current.body() {
            self.current.remove_attr(body, "id");
        }
        for i in 0..self.open.len() {
            let wrapper = self.open[i];
            let copy = self.current.import_shallow(self.src, wrapper);
            self.current.remove_attr(copy, "id");
            let at = self.insertion_point();
            self.current.append(at, copy);
            self.copies.push(copy);
        }
    }

    fn finish(mut self) -> Vec<Document> {
        if self.size > 0 || self.done.is_empty() {
            self.done.push(self.current);
        }
        self.done
    }
}
