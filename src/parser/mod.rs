//! Reads one rendered wiki page: bibliographic metadata, chapter links, pictures,
//! proofread page markers, and finally the cleaned content.
//!
//! All extraction must happen before [`PageParser::into_content`], which consumes the
//! parser because cleaning removes the nodes extraction relies on.

mod ids;
mod legacy;
mod pictures;

pub use ids::{clean_id, is_engine_id, sanitize_ids, IdRegistry};
pub use legacy::{append_style, migrate_deprecated};
pub use pictures::{picture_key, PictureKey};

use std::collections::BTreeMap;

use crate::api::{decode_component, normalize_title, Namespaces};
use crate::dom::{Document, NodeData, NodeId};
use crate::model::{Page, Picture};

/// Marks a page that must not be exported.
pub const EXCLUDE_FLAG: &str = "ws-exclude";
/// Container whose links list the chapters of a book.
pub const SUMMARY_CONTAINER: &str = "ws-summary";
/// Hidden block holding the `ws-*` metadata fields.
pub const METADATA_CONTAINER: &str = "ws-data";

/// Classes and ids of nodes that never belong in an export.
const NON_EXPORTED: &[&str] = &[
    "ws-noexport",
    "noprint",
    "mw-editsection",
    "mw-empty-elt",
    "magnify",
    "mwe-math-fallback-image-inline",
    "mwe-math-fallback-image-display",
    "navbox",
    "catlinks",
    "toc",
];

/// Elements dropped with their content.
const DROPPED_ELEMENTS: &[&str] = &[
    "script", "noscript", "iframe", "object", "embed", "form", "input", "button", "template",
];

/// Link classes that never point at a chapter.
const NON_CHAPTER_LINK_CLASSES: &[&str] = &[
    "new",
    "extiw",
    "external",
    "image",
    "mw-file-description",
    "internal",
    "mw-selflink",
];

/// Attributes added by the rendering engine with no meaning in a book.
const ENGINE_ATTRIBUTES: &[&str] = &[
    "about",
    "typeof",
    "property",
    "resource",
    "prefix",
    "data-mw",
    "data-parsoid",
    "data-file-type",
    "data-file-width",
    "data-file-height",
    "data-ve-no-generated-contents",
    "data-mw-deduplicate",
    "decoding",
    "loading",
    "srcset",
    "rev",
    "tabindex",
];

/// Path of an absolute `https://<domain>/...` or `//<domain>/...` URL.
fn strip_host<'a>(path: &'a str, domain: &str) -> Option<&'a str> {
    if domain.is_empty() {
        return None;
    }
    ["https://", "http://", "//"]
        .iter()
        .filter_map(|scheme| path.strip_prefix(scheme)?.strip_prefix(domain))
        .find(|rest| rest.starts_with('/'))
}

/// Extract the page title from an internal link (`./Title`, `/wiki/Title`, or
/// `https://<domain>/wiki/Title` when `domain` is given), without fragment.
pub fn link_title(href: &str, domain: &str) -> Option<String> {
    let path = href.split(['#', '?']).next()?;
    let path = strip_host(path, domain).unwrap_or(path);
    let rest = path
        .strip_prefix("./")
        .or_else(|| path.strip_prefix("/wiki/"))?;
    if rest.is_empty() {
        return None;
    }
    Some(normalize_title(&decode_component(rest)))
}

/// Fragment of a link, percent-decoded.
pub fn link_fragment(href: &str) -> Option<String> {
    href.split_once('#')
        .map(|(_, f)| decode_component(f))
        .filter(|f| !f.is_empty())
}

/// Parser over one fetched page.
#[derive(Debug)]
pub struct PageParser {
    doc: Document,
    /// Host of the wiki the page comes from; absolute links to it count as internal.
    domain: String,
}

impl PageParser {
    pub fn new(mut doc: Document) -> Self {
        // image magnifier ("enlarge") links
        for el in doc.elements() {
            if doc.has_class(el, "magnify") {
                doc.detach(el);
            }
        }
        Self {
            doc,
            domain: String::new(),
        }
    }

    pub fn with_domain(mut self, domain: &str) -> Self {
        self.domain = domain.to_string();
        self
    }

    pub fn parse(html: &str) -> Self {
        Self::new(Document::parse(html))
    }

    pub fn document(&self) -> &Document {
        &self.doc
    }

    /// Trimmed text of the first element whose id or class is `key`, or "".
    pub fn metadata(&self, key: &str) -> String {
        self.doc
            .find_by_id_or_class(key)
            .map(|n| collapse_whitespace(&self.doc.text(n)))
            .unwrap_or_default()
    }

    /// True when an element with id or class `key` exists, even if empty.
    pub fn metadata_is_set(&self, key: &str) -> bool {
        self.doc.find_by_id_or_class(key).is_some()
    }

    /// Chapters linked from the summary container.
    ///
    /// Every accepted title is appended to `page_list`; titles already in it are skipped,
    /// so one list shared across a whole book prevents cycles and duplicates.
    pub fn chapters_list(&self, page_list: &mut Vec<String>, namespaces: &Namespaces) -> Vec<Page> {
        let Some(summary) = self.doc.find_by_id_or_class(SUMMARY_CONTAINER) else {
            return Vec::new();
        };
        self.collect_chapters(self.doc.descendants(summary), page_list, namespaces, |_| true)
    }

    /// Summary chapters, or when the summary yields none, every link to a sub-page of `title`.
    pub fn full_chapters_list(
        &self,
        title: &str,
        page_list: &mut Vec<String>,
        namespaces: &Namespaces,
    ) -> Vec<Page> {
        let chapters = self.chapters_list(page_list, namespaces);
        if !chapters.is_empty() {
            return chapters;
        }
        let prefix = format!("{}/", normalize_title(title));
        let Some(body) = self.doc.body() else {
            return Vec::new();
        };
        self.collect_chapters(self.doc.descendants(body), page_list, namespaces, |t| {
            t.starts_with(&prefix)
        })
    }

    fn collect_chapters(
        &self,
        nodes: Vec<NodeId>,
        page_list: &mut Vec<String>,
        namespaces: &Namespaces,
        accept: impl Fn(&str) -> bool,
    ) -> Vec<Page> {
        let mut chapters = Vec::new();
        for a in nodes {
            if !self.doc.is_tag(a, "a") || !self.is_chapter_link(a) {
                continue;
            }
            let Some(title) = self.doc.attr(a, "href").and_then(|h| link_title(h, &self.domain)) else {
                continue;
            };
            if !accept(&title) || page_list.contains(&title) || namespaces.is_non_content(&title) {
                continue;
            }
            let text = collapse_whitespace(&self.doc.text(a));
            let name = if text.is_empty() {
                title.replace('_', " ")
            } else {
                text
            };
            page_list.push(title.clone());
            chapters.push(Page::new(title, name));
        }
        chapters
    }

    fn is_chapter_link(&self, a: NodeId) -> bool {
        let doc = &self.doc;
        if NON_CHAPTER_LINK_CLASSES.iter().any(|c| doc.has_class(a, c)) {
            return false;
        }
        if let Some(rel) = doc.attr(a, "rel") {
            if rel.contains("mw:ExtLink") || rel.contains("mw:WikiLink/Interwiki") {
                return false;
            }
        }
        let Some(href) = doc.attr(a, "href") else {
            return false;
        };
        if href.contains("action=edit") || href.contains("redlink=1") {
            return false;
        }
        if doc.ancestors(a).any(|p| doc.has_class(p, "mw-editsection")) {
            return false;
        }
        !doc.descendants(a).into_iter().any(|n| doc.is_tag(n, "img"))
    }

    /// Pictures referenced by the page, keyed by [`picture_key`].
    ///
    /// Standalone images are taken first, then images wrapped in links or figures. Each
    /// `img` is stamped with its key in `data-title` so the cleaner can resolve it later.
    pub fn pictures_list(&mut self) -> BTreeMap<String, Picture> {
        let images = self.doc.elements_by_tag("img");
        let wrapped = |doc: &Document, img: NodeId| {
            doc.ancestors(img)
                .any(|p| matches!(doc.tag(p), Some("a" | "figure")))
        };
        let (standalone, in_links): (Vec<NodeId>, Vec<NodeId>) =
            images.into_iter().partition(|&img| !wrapped(&self.doc, img));

        let mut pictures = BTreeMap::new();
        for img in standalone.into_iter().chain(in_links) {
            if NON_EXPORTED.iter().any(|c| self.doc.has_class(img, c)) {
                continue;
            }
            let Some(src) = self.doc.attr(img, "src").map(str::to_string) else {
                continue;
            };
            let Some(key) = picture_key(&src) else {
                continue;
            };
            self.doc.set_attr(img, "data-title", key.title.clone());
            pictures
                .entry(key.title.clone())
                .or_insert_with(|| Picture::new(key.title, key.name, src));
        }
        pictures
    }

    /// Proofread source pages (`Page:` titles) this page transcludes.
    pub fn pages_list(&self) -> Vec<String> {
        let mut pages = Vec::new();
        for el in self.doc.elements() {
            if !self.doc.has_class(el, "ws-pagenum") && !self.doc.has_class(el, "pagenum") {
                continue;
            }
            let title = self
                .doc
                .attr(el, "data-page-name")
                .or_else(|| self.doc.attr(el, "title"))
                .map(normalize_title);
            if let Some(title) = title.filter(|t| !t.is_empty()) {
                if !pages.contains(&title) {
                    pages.push(title);
                }
            }
        }
        pages
    }

    /// Clean the page for inclusion in a book and return the resulting document.
    ///
    /// `title` is the page's own title; links back to it become `#fragment` links and its
    /// ids are registered under it. On the main page the hidden metadata block is removed.
    pub fn into_content(self, title: &str, is_main_page: bool, ids: &mut IdRegistry) -> Document {
        let mut doc = self.doc;
        let domain = self.domain;
        let title = normalize_title(title);

        remove_non_exported(&mut doc, is_main_page);
        strip_engine_markup(&mut doc);
        migrate_deprecated(&mut doc);
        unwrap_dead_links(&mut doc);
        localize_self_links(&mut doc, &title, &domain);
        move_styles_to_head(&mut doc);
        sanitize_ids(&mut doc, &title, ids);
        doc
    }
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn remove_non_exported(doc: &mut Document, is_main_page: bool) {
    for el in doc.elements() {
        if !doc.is_attached(el) {
            continue;
        }
        let tag = doc.tag(el).unwrap_or("");
        let drop = DROPPED_ELEMENTS.contains(&tag)
            || NON_EXPORTED
                .iter()
                .any(|c| doc.has_class(el, c) || doc.attr(el, "id") == Some(c))
            || (is_main_page && doc.attr(el, "id") == Some(METADATA_CONTAINER))
            || doc.attr(el, "style").is_some_and(is_hidden_style) && !doc.has_class(el, "ws-pagenum");
        if drop {
            doc.detach(el);
        }
    }
    for node in doc.descendants(doc.root()) {
        if matches!(doc.data(node), NodeData::Comment(_)) {
            doc.detach(node);
        }
    }
}

fn is_hidden_style(style: &str) -> bool {
    style
        .split(';')
        .filter_map(|d| d.split_once(':'))
        .any(|(k, v)| k.trim().eq_ignore_ascii_case("display") && v.trim().eq_ignore_ascii_case("none"))
}

fn strip_engine_markup(doc: &mut Document) {
    for el in doc.elements() {
        let is_engine_meta = matches!(doc.tag(el), Some("link" | "meta"))
            && doc.ancestors(el).any(|a| doc.is_tag(a, "body"))
            && (doc.attr(el, "rel").is_some_and(|r| {
                r.starts_with("mw:") || r.split_whitespace().any(|t| t == "mw-deduplicated-inline-style")
            })
                || doc.attr(el, "property").is_some_and(|p| p.starts_with("mw:"))
                || doc.attr(el, "typeof").is_some_and(|t| t.starts_with("mw:")));
        if is_engine_meta {
            doc.detach(el);
            continue;
        }
        if doc.is_tag(el, "a") {
            if let Some(rel) = doc.attr(el, "rel") {
                if rel.starts_with("mw:") {
                    doc.remove_attr(el, "rel");
                }
            }
        }
        doc.retain_attrs(el, |a| {
            !ENGINE_ATTRIBUTES.contains(&a.name.as_str()) && !a.name.starts_with("data-mw")
        });
    }
    // head metadata from the renderer is regenerated by the packager
    if let Some(head) = doc.head() {
        for child in doc.children(head) {
            if !doc.is_tag(child, "style") {
                doc.detach(child);
            }
        }
    }
}

/// Links to pages that do not exist ("create page" links) keep only their text.
fn unwrap_dead_links(doc: &mut Document) {
    for a in doc.elements_by_tag("a") {
        let dead = doc.has_class(a, "new")
            || doc
                .attr(a, "href")
                .is_some_and(|h| h.contains("redlink=1") || h.contains("action=edit"));
        if dead {
            doc.unwrap(a);
        }
    }
}

/// `./Title#note` on page `Title` becomes `#note`.
fn localize_self_links(doc: &mut Document, title: &str, domain: &str) {
    for a in doc.elements_by_tag("a") {
        let Some(href) = doc.attr(a, "href") else {
            continue;
        };
        if link_title(href, domain).as_deref() != Some(title) {
            continue;
        }
        if let Some(fragment) = link_fragment(href) {
            doc.set_attr(a, "href", format!("#{fragment}"));
        }
    }
}

fn move_styles_to_head(doc: &mut Document) {
    let Some(body) = doc.body() else { return };
    let styles: Vec<NodeId> = doc
        .descendants(body)
        .into_iter()
        .filter(|&n| doc.is_tag(n, "style"))
        .collect();
    if styles.is_empty() {
        return;
    }
    let head = doc.ensure_head();
    for style in styles {
        doc.append(head, style);
    }
}
