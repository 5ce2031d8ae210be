//! Prepares an assembled book for packaging: encodes file names, splits large chapters,
//! resolves images and rewrites links between the book's documents.

use std::collections::{BTreeMap, HashMap, HashSet};

use tracing::debug;

use crate::api::absolute_url;
use crate::dom::Document;
use crate::model::{Book, Page, Picture};
use crate::parser::{link_fragment, link_title, picture_key};
use crate::session::ExportSession;

use super::split::{split_document, SplitOptions};
use super::EpubVersion;

/// HTML5 block elements missing from XHTML 1.1.
const HTML5_BLOCKS: &[&str] = &[
    "section", "article", "aside", "header", "footer", "nav", "main", "figure", "figcaption",
    "details", "summary",
];
/// HTML5 inline elements missing from XHTML 1.1.
const HTML5_INLINES: &[&str] = &["mark", "time", "bdi", "data", "s", "u", "wbr"];

/// Elements that cannot be packaged.
const MEDIA_ELEMENTS: &[&str] = &["audio", "video", "source", "track", "picture"];

/// Files making up one source page after splitting.
#[derive(Debug, Default)]
struct Fragments {
    files: Vec<(String, HashSet<String>)>,
}

impl Fragments {
    fn file_with_id(&self, id: &str) -> Option<&str> {
        self.files
            .iter()
            .find(|(_, ids)| ids.contains(id))
            .map(|(f, _)| f.as_str())
    }

    fn first(&self) -> Option<&str> {
        self.files.first().map(|(f, _)| f.as_str())
    }
}

/// Result of cleaning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanedBook {
    /// File name (without extension) of the main page.
    pub main: String,
}

pub struct Cleaner<'a> {
    session: &'a mut ExportSession,
    version: EpubVersion,
    split: SplitOptions,
    /// Original title to encoded title.
    titles: HashMap<String, String>,
    /// Encoded title of an original page to its files.
    fragments: HashMap<String, Fragments>,
    /// File name to the encoded title of the page it came from.
    owners: HashMap<String, String>,
    /// Original picture key to encoded key.
    pictures: HashMap<String, String>,
}

impl<'a> Cleaner<'a> {
    pub fn new(session: &'a mut ExportSession, version: EpubVersion, split: SplitOptions) -> Self {
        Self {
            session,
            version,
            split,
            titles: HashMap::new(),
            fragments: HashMap::new(),
            owners: HashMap::new(),
            pictures: HashMap::new(),
        }
    }

    pub fn clean(mut self, book: &mut Book) -> CleanedBook {
        let main = self.session.encode(&book.title);
        self.titles.insert(book.title.clone(), main.clone());
        book.chapters = self.encode_pages(std::mem::take(&mut book.chapters));
        self.encode_pictures(book);

        book.chapters = self.split_pages(std::mem::take(&mut book.chapters));
        self.record(&main, &main, book.content.as_ref());

        let domain = book.domain.clone();
        if let Some(doc) = book.content.as_mut() {
            self.rewrite_document(doc, &main, &domain);
        }
        rewrite_pages(&mut book.chapters, &mut |doc, file| {
            self.rewrite_document(doc, file, &domain)
        });
        debug!(files = self.owners.len(), pictures = book.pictures.len(), "cleaned book");
        CleanedBook { main }
    }

    fn encode_pages(&mut self, pages: Vec<Page>) -> Vec<Page> {
        pages
            .into_iter()
            .map(|mut page| {
                let encoded = self.session.encode(&page.title);
                self.titles.insert(page.title.clone(), encoded.clone());
                page.title = encoded;
                page.chapters = self.encode_pages(std::mem::take(&mut page.chapters));
                page
            })
            .collect()
    }

    fn encode_pictures(&mut self, book: &mut Book) {
        let mut encoded: BTreeMap<String, Picture> = BTreeMap::new();
        for (key, mut picture) in std::mem::take(&mut book.pictures) {
            let new_key = self.session.encode(&key);
            picture.title = new_key.clone();
            self.pictures.insert(key, new_key.clone());
            encoded.insert(new_key, picture);
        }
        book.pictures = encoded;
        if let Some(cover) = self.pictures.get(&book.cover) {
            book.cover = cover.clone();
        }
    }

    fn record(&mut self, page: &str, file: &str, doc: Option<&Document>) {
        let ids: HashSet<String> = doc
            .map(|d| {
                d.elements()
                    .into_iter()
                    .filter_map(|e| d.attr(e, "id").map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();
        self.fragments
            .entry(page.to_string())
            .or_default()
            .files
            .push((file.to_string(), ids));
        self.owners.insert(file.to_string(), page.to_string());
    }

    /// Split oversized pages into sibling fragments. Sub-pages attach to the last fragment.
    fn split_pages(&mut self, pages: Vec<Page>) -> Vec<Page> {
        let mut out = Vec::with_capacity(pages.len());
        for mut page in pages {
            let subpages = self.split_pages(std::mem::take(&mut page.chapters));
            let parts = page
                .content
                .as_ref()
                .and_then(|doc| split_document(doc, self.split));
            let Some(parts) = parts else {
                self.record(&page.title, &page.title, page.content.as_ref());
                page.chapters = subpages;
                out.push(page);
                continue;
            };
            debug!(title = %page.title, parts = parts.len(), "split chapter");
            let count = parts.len();
            let mut subpages = Some(subpages);
            for (i, doc) in parts.into_iter().enumerate() {
                let file = if i == 0 {
                    page.title.clone()
                } else {
                    self.session.encode(&format!("{}_{}", page.title, i))
                };
                self.record(&page.title, &file, Some(&doc));
                let mut fragment = Page::new(file, page.name.clone());
                fragment.content = Some(doc);
                if i + 1 == count {
                    fragment.chapters = subpages.take().unwrap_or_default();
                }
                out.push(fragment);
            }
        }
        out
    }

    fn rewrite_document(&mut self, doc: &mut Document, file: &str, domain: &str) {
        self.rewrite_images(doc);
        self.rewrite_links(doc, file, domain);
        match self.version {
            EpubVersion::Epub3 => add_epub3_semantics(doc),
            EpubVersion::Epub2 => downgrade_to_xhtml11(doc),
        }
    }

    fn rewrite_images(&self, doc: &mut Document) {
        for media in doc.elements() {
            if MEDIA_ELEMENTS.contains(&doc.tag(media).unwrap_or("")) {
                doc.detach(media);
            }
        }
        for img in doc.elements_by_tag("img") {
            if !doc.is_attached(img) {
                continue;
            }
            let key = doc
                .attr(img, "data-title")
                .map(str::to_string)
                .or_else(|| doc.attr(img, "src").and_then(picture_key).map(|k| k.title));
            match key.and_then(|k| self.pictures.get(&k)) {
                Some(encoded) => {
                    doc.set_attr(img, "src", format!("images/{encoded}"));
                    doc.remove_attr(img, "data-title");
                    doc.remove_attr(img, "srcset");
                    if doc.attr(img, "alt").is_none() {
                        doc.set_attr(img, "alt", "");
                    }
                }
                None => doc.detach(img),
            }
        }
    }

    fn rewrite_links(&self, doc: &mut Document, file: &str, domain: &str) {
        let own = self.owners.get(file).and_then(|p| self.fragments.get(p));
        for a in doc.elements_by_tag("a") {
            let Some(href) = doc.attr(a, "href").map(str::to_string) else {
                continue;
            };
            if let Some(fragment) = href.strip_prefix('#') {
                let target = own
                    .and_then(|f| f.file_with_id(fragment))
                    .filter(|target| *target != file);
                if let Some(target) = target {
                    doc.set_attr(a, "href", format!("{target}.xhtml#{fragment}"));
                }
                continue;
            }
            if let Some(title) = link_title(&href, domain) {
                let internal = self
                    .titles
                    .get(&title)
                    .and_then(|encoded| self.fragments.get(encoded));
                let new_href = match internal {
                    Some(fragments) => {
                        let id = link_fragment(&href).map(|f| {
                            self.session
                                .ids
                                .lookup(&title, &f)
                                .map(str::to_string)
                                .unwrap_or(f)
                        });
                        let target = id
                            .as_deref()
                            .and_then(|id| fragments.file_with_id(id))
                            .or_else(|| fragments.first())
                            .unwrap_or(file);
                        match id {
                            Some(id) => format!("{target}.xhtml#{id}"),
                            None => format!("{target}.xhtml"),
                        }
                    }
                    None => match href
                        .strip_prefix("./")
                        .or_else(|| href.strip_prefix("/wiki/"))
                    {
                        Some(rest) => format!("https://{domain}/wiki/{rest}"),
                        None => href.clone(),
                    },
                };
                doc.set_attr(a, "href", new_href);
                continue;
            }
            if href.starts_with('/') {
                doc.set_attr(a, "href", absolute_url(&href, domain));
            }
        }
    }
}

fn rewrite_pages(pages: &mut [Page], f: &mut impl FnMut(&mut Document, &str)) {
    for page in pages {
        if let Some(doc) = page.content.as_mut() {
            f(doc, &page.title);
        }
        rewrite_pages(&mut page.chapters, f);
    }
}

fn add_epub3_semantics(doc: &mut Document) {
    for el in doc.elements() {
        if doc.is_tag(el, "a") && doc.ancestors(el).any(|p| doc.has_class(p, "reference")) {
            doc.set_attr(el, "epub:type", "noteref");
        }
        if doc.is_tag(el, "li")
            && doc
                .parent(el)
                .is_some_and(|p| doc.is_tag(p, "ol") && doc.has_class(p, "references"))
        {
            doc.set_attr(el, "epub:type", "footnote");
        }
    }
}

fn downgrade_to_xhtml11(doc: &mut Document) {
    for el in doc.elements() {
        let tag = doc.tag(el).unwrap_or("").to_string();
        if HTML5_BLOCKS.contains(&tag.as_str()) {
            doc.rename(el, "div");
        } else if HTML5_INLINES.contains(&tag.as_str()) {
            doc.rename(el, "span");
        }
        if let Some(lang) = doc.remove_attr(el, "lang") {
            if doc.attr(el, "xml:lang").is_none() {
                doc.set_attr(el, "xml:lang", lang);
            }
        }
        doc.retain_attrs(el, |a| {
            !a.name.starts_with("data-")
                && !a.name.starts_with("aria-")
                && !matches!(a.name.as_str(), "role" | "hidden" | "epub:type")
        });
    }
    if let Some(head) = doc.head() {
        for style in doc.children(head) {
            if doc.is_tag(style, "style") && doc.attr(style, "type").is_none() {
                doc.set_attr(style, "type", "text/css");
            }
        }
    }
}

/// True when the page has something worth a spine entry.
pub fn has_content(doc: &Document) -> bool {
    let Some(body) = doc.body() else {
        return false;
    };
    doc.children(body)
        .into_iter()
        .any(|n| doc.is_element(n) || !doc.text(n).trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::PageParser;

    fn content(session: &mut ExportSession, title: &str, body: &str) -> Document {
        PageParser::parse(&format!("<html><head></head><body>{body}</body></html>"))
            .into_content(title, false, &mut session.ids)
    }

    fn sample(session: &mut ExportSession) -> Book {
        let mut book = Book::new("Foo", "en", "en.wikisource.org");
        book.name = "Foo".into();
        book.content = Some(content(
            session,
            "Foo",
            "<p><a href=\"./Foo/Bar#note\">see</a> <a href=\"./Elsewhere\">other</a> \
             <img data-title=\"X.jpg\" src=\"//u/a/ab/X.jpg\"/><img src=\"//u/a/ab/Unknown.png\"/></p>",
        ));
        let mut bar = Page::new("Foo/Bar", "Bar");
        bar.content = Some(content(
            session,
            "Foo/Bar",
            "<p id=\"note\">n</p><sup class=\"reference\"><a href=\"#note\">1</a></sup>\
             <ol class=\"references\"><li id=\"cite\">c</li></ol>",
        ));
        book.chapters.push(bar);
        book.pictures
            .insert("X.jpg".into(), Picture::new("X.jpg", "X.jpg", "https://u/a/ab/X.jpg"));
        book.cover = "X.jpg".into();
        book
    }

    #[test]
    fn titles_pictures_and_links_are_rewritten() {
        let mut session = ExportSession::new().unwrap();
        let mut book = sample(&mut session);
        let cleaned = Cleaner::new(&mut session, EpubVersion::Epub3, SplitOptions::default())
            .clean(&mut book);
        assert_eq!(cleaned.main, "c0_Foo");
        assert_eq!(book.title, "Foo");
        assert_eq!(book.chapters[0].title, "c1_Foo_Bar");
        assert_eq!(book.chapters[0].name, "Bar");
        assert_eq!(book.cover, "c2_X.jpg");
        assert!(book.pictures.contains_key("c2_X.jpg"));

        let doc = book.content.as_ref().unwrap();
        let out = doc.inner_xhtml(doc.body().unwrap());
        assert!(out.contains("href=\"c1_Foo_Bar.xhtml#note\""), "{out}");
        assert!(out.contains("href=\"https://en.wikisource.org/wiki/Elsewhere\""), "{out}");
        assert!(out.contains("src=\"images/c2_X.jpg\""), "{out}");
        assert!(!out.contains("Unknown.png"), "{out}");
        assert!(!out.contains("data-title"), "{out}");

        let chapter = book.chapters[0].content.as_ref().unwrap();
        let out = chapter.inner_xhtml(chapter.body().unwrap());
        assert!(out.contains("epub:type=\"noteref\""), "{out}");
        assert!(out.contains("epub:type=\"footnote\""), "{out}");
    }

    #[test]
    fn epub2_output_avoids_html5_markup() {
        let mut session = ExportSession::new().unwrap();
        let mut book = Book::new("Foo", "en", "en.wikisource.org");
        book.content = Some(content(
            &mut session,
            "Foo",
            "<section data-x=\"1\" lang=\"la\"><figure role=\"img\">f</figure><sup class=\"reference\"><a href=\"#a\">1</a></sup></section>",
        ));
        Cleaner::new(&mut session, EpubVersion::Epub2, SplitOptions::default()).clean(&mut book);
        let doc = book.content.as_ref().unwrap();
        let out = doc.inner_xhtml(doc.body().unwrap());
        assert!(!out.contains("<section"), "{out}");
        assert!(!out.contains("<figure"), "{out}");
        assert!(!out.contains("data-x"), "{out}");
        assert!(!out.contains("epub:type"), "{out}");
        assert!(out.contains("xml:lang=\"la\""), "{out}");
    }

    #[test]
    fn links_follow_ids_into_split_fragments() {
        let mut session = ExportSession::new().unwrap();
        let mut book = Book::new("Foo", "en", "en.wikisource.org");
        let mut body = String::from("<p><a href=\"#end\">jump</a></p>");
        for _ in 0..80 {
            body.push_str(&format!("<p>{}</p>", "text ".repeat(30)));
        }
        body.push_str("<p id=\"end\">the end</p>");
        book.content = Some(content(&mut session, "Foo", "<a href=\"./Foo/Long#end\">to end</a>"));
        let mut long = Page::new("Foo/Long", "Long");
        long.content = Some(content(&mut session, "Foo/Long", &body));
        long.chapters.push(Page::new("Foo/Long/Sub", "Sub"));
        book.chapters.push(long);

        let split = SplitOptions {
            threshold: 4_000,
            margin: 0,
        };
        Cleaner::new(&mut session, EpubVersion::Epub3, split).clean(&mut book);

        assert!(book.chapters.len() > 1);
        assert_eq!(book.chapters[0].title, "c1_Foo_Long");
        assert_eq!(book.chapters[1].title, "c3_c1_Foo_Long_1");
        assert!(book.chapters.iter().all(|c| c.name == "Long"));
        let last = book.chapters.last().unwrap();
        assert_eq!(last.chapters.len(), 1);
        assert!(book.chapters[..book.chapters.len() - 1]
            .iter()
            .all(|c| c.chapters.is_empty()));

        let last_file = last.title.clone();
        let first = book.chapters[0].content.as_ref().unwrap();
        let out = first.inner_xhtml(first.body().unwrap());
        assert!(out.contains(&format!("href=\"{last_file}.xhtml#end\"")), "{out}");

        let main = book.content.as_ref().unwrap();
        let out = main.inner_xhtml(main.body().unwrap());
        assert!(out.contains(&format!("href=\"{last_file}.xhtml#end\"")), "{out}");
    }

    #[test]
    fn fragment_names_are_encoded() {
        let mut session = ExportSession::new().unwrap();
        let title = format!("Foo/{}", "Très long titre ".repeat(12));
        let mut book = Book::new("Foo", "en", "en.wikisource.org");
        let mut body = String::new();
        for _ in 0..40 {
            body.push_str(&format!("<p>{}</p>", "text ".repeat(30)));
        }
        let mut long = Page::new(title.clone(), "Long");
        long.content = Some(content(&mut session, &title, &body));
        book.chapters.push(long);

        let split = SplitOptions {
            threshold: 2_000,
            margin: 0,
        };
        Cleaner::new(&mut session, EpubVersion::Epub3, split).clean(&mut book);

        assert!(book.chapters.len() > 2);
        let mut seen = HashSet::new();
        for chapter in &book.chapters {
            let (code, tail) = chapter.title.split_once('_').unwrap();
            assert!(code.starts_with('c') && code[1..].chars().all(|c| c.is_ascii_digit()), "{}", chapter.title);
            assert!(!tail.is_empty() && tail.chars().count() <= 100, "{}", chapter.title);
            assert!(tail.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.'));
            assert!(seen.insert(chapter.title.clone()));
        }
    }

    #[test]
    fn absolute_links_are_resolved_against_the_book() {
        let mut session = ExportSession::new().unwrap();
        let mut book = Book::new("Foo", "en", "en.wikisource.org");
        book.content = Some(content(
            &mut session,
            "Foo",
            "<a href=\"https://en.wikisource.org/wiki/Foo/Bar#note\">in</a>\
             <a href=\"https://en.wikisource.org/wiki/Other\">out</a>\
             <a href=\"https://example.org/page\">ext</a>",
        ));
        let mut bar = Page::new("Foo/Bar", "Bar");
        bar.content = Some(content(&mut session, "Foo/Bar", "<p id=\"note\">n</p>"));
        book.chapters.push(bar);

        Cleaner::new(&mut session, EpubVersion::Epub3, SplitOptions::default()).clean(&mut book);
        let doc = book.content.as_ref().unwrap();
        let out = doc.inner_xhtml(doc.body().unwrap());
        assert!(out.contains("href=\"c1_Foo_Bar.xhtml#note\""), "{out}");
        assert!(out.contains("href=\"https://en.wikisource.org/wiki/Other\""), "{out}");
        assert!(out.contains("href=\"https://example.org/page\""), "{out}");
    }

    #[test]
    fn empty_bodies_have_no_content() {
        let doc = Document::parse("<html><body>  </body></html>");
        assert!(!has_content(&doc));
        let doc = Document::parse("<html><body><p>x</p></body></html>");
        assert!(has_content(&doc));
    }
}
