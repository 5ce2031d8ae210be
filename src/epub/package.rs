//! Package documents: `content.opf`, `toc.ncx` and the EPUB 3 `nav.xhtml`.

use std::path::Path;

use chrono::Utc;

use crate::dom::{escape_attr, escape_text};
use crate::fonts::{font_media_type, FontFamily};
use crate::model::{Book, Page, Picture};

use super::EpubVersion;

pub const TITLE_PAGE: &str = "title.xhtml";
pub const ABOUT_PAGE: &str = "about.xhtml";
pub const STYLESHEET: &str = "main.css";
pub const LOGO: &str = "images/logo.svg";
pub const NCX: &str = "toc.ncx";
pub const NAV: &str = "nav.xhtml";

const RIGHTS: &str = "https://creativecommons.org/licenses/by-sa/4.0/";

/// One manifest entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Item {
    pub id: String,
    pub href: String,
    pub media_type: String,
    pub properties: Vec<&'static str>,
}

impl Item {
    fn new(id: impl Into<String>, href: impl Into<String>, media_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            href: href.into(),
            media_type: media_type.into(),
            properties: Vec::new(),
        }
    }

    fn xhtml(id: impl Into<String>, href: impl Into<String>) -> Self {
        Self::new(id, href, "application/xhtml+xml")
    }
}

/// Table of contents entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NavPoint {
    pub label: String,
    pub href: String,
    pub children: Vec<NavPoint>,
}

/// Manifest, spine and navigation of one book.
#[derive(Debug, Clone)]
pub struct Package {
    pub version: EpubVersion,
    pub items: Vec<Item>,
    /// Manifest ids in reading order.
    pub spine: Vec<String>,
    pub toc: Vec<NavPoint>,
    /// Manifest id of the cover image.
    pub cover: Option<String>,
    /// First page of the text itself.
    pub body_start: String,
}

/// File name of a content page.
pub fn page_href(file: &str) -> String {
    format!("{file}.xhtml")
}

/// MIME type of a picture, from its download or else its extension.
pub fn picture_media_type(picture: &Picture) -> String {
    if !picture.mimetype.is_empty() {
        return picture.mimetype.clone();
    }
    let ext = Path::new(&picture.name)
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    match ext.as_str() {
        "png" => "image/png",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        "webp" => "image/webp",
        _ => "image/jpeg",
    }
    .to_string()
}

impl Package {
    /// Lay out a cleaned book. `main` is the main page file, `None` when it has no content.
    pub fn new(book: &Book, main: Option<&str>, font: Option<&FontFamily>, version: EpubVersion) -> Self {
        let epub3 = version == EpubVersion::Epub3;
        let mut items = vec![
            Item::xhtml("title", TITLE_PAGE),
            Item::xhtml("about", ABOUT_PAGE),
            Item::new("mainstylesheet", STYLESHEET, "text/css"),
            Item::new("logo", LOGO, "image/svg+xml"),
            Item::new("ncx", NCX, "application/x-dtbncx+xml"),
        ];
        if epub3 {
            let mut nav = Item::xhtml("nav", NAV);
            nav.properties.push("nav");
            items.push(nav);
        }

        let mut spine = vec!["title".to_string()];
        let name = display_name(book);
        let mut toc = vec![NavPoint {
            label: name.to_string(),
            href: TITLE_PAGE.to_string(),
            children: Vec::new(),
        }];

        if let Some(main) = main {
            items.push(page_item(main, book.content.as_ref(), epub3));
            spine.push(main.to_string());
            toc.push(NavPoint {
                label: name.to_string(),
                href: page_href(main),
                children: Vec::new(),
            });
        }
        add_pages(&book.chapters, &mut items, &mut spine, &mut toc, epub3);
        spine.push("about".to_string());
        toc.push(NavPoint {
            label: "About".to_string(),
            href: ABOUT_PAGE.to_string(),
            children: Vec::new(),
        });

        let body_start = spine
            .get(1)
            .filter(|id| *id != "about")
            .and_then(|id| items.iter().find(|i| i.id == *id))
            .map(|i| i.href.clone())
            .unwrap_or_else(|| TITLE_PAGE.to_string());

        let mut cover = None;
        for (key, picture) in &book.pictures {
            let mut item = Item::new(key.clone(), format!("images/{key}"), picture_media_type(picture));
            if *key == book.cover {
                if epub3 {
                    item.properties.push("cover-image");
                }
                cover = Some(key.clone());
            }
            items.push(item);
        }

        if let Some(font) = font {
            for (style, path) in &font.files {
                if let Some(href) = font.package_path(*style) {
                    items.push(Item::new(
                        format!("font-{}", style.as_str()),
                        href,
                        font_media_type(path, epub3),
                    ));
                }
            }
        }

        Self {
            version,
            items,
            spine,
            toc,
            cover,
            body_start,
        }
    }

    pub fn opf(&self, book: &Book) -> String {
        let epub3 = self.version == EpubVersion::Epub3;
        let mut metadata = String::new();
        let line = |metadata: &mut String, s: String| {
            metadata.push_str("    ");
            metadata.push_str(&s);
            metadata.push('\n');
        };

        let url = escape_text(&book.url());
        if epub3 {
            line(&mut metadata, format!("<dc:identifier id=\"uid\">{url}</dc:identifier>"));
        } else {
            line(
                &mut metadata,
                format!("<dc:identifier id=\"uid\" opf:scheme=\"URI\">{url}</dc:identifier>"),
            );
        }
        line(&mut metadata, format!("<dc:title>{}</dc:title>", escape_text(display_name(book))));
        line(&mut metadata, format!("<dc:language>{}</dc:language>", escape_text(&book.lang)));

        let people = [
            ("dc:creator", "author", "aut", &book.author),
            ("dc:contributor", "translator", "trl", &book.translator),
            ("dc:contributor", "illustrator", "ill", &book.illustrator),
        ];
        for (element, id, role, value) in people {
            if value.is_empty() {
                continue;
            }
            let value = escape_text(value);
            if epub3 {
                line(&mut metadata, format!("<{element} id=\"{id}\">{value}</{element}>"));
                line(
                    &mut metadata,
                    format!("<meta refines=\"#{id}\" property=\"role\" scheme=\"marc:relators\">{role}</meta>"),
                );
            } else {
                line(&mut metadata, format!("<{element} opf:role=\"{role}\">{value}</{element}>"));
            }
        }
        if !book.publisher.is_empty() {
            line(&mut metadata, format!("<dc:publisher>{}</dc:publisher>", escape_text(&book.publisher)));
        }
        if !book.year.is_empty() {
            line(&mut metadata, format!("<dc:date>{}</dc:date>", escape_text(&book.year)));
        }
        for category in &book.categories {
            line(&mut metadata, format!("<dc:subject>{}</dc:subject>", escape_text(category)));
        }
        let description: Vec<&str> = [book.volume.as_str(), book.progress.as_str()]
            .into_iter()
            .filter(|s| !s.is_empty())
            .collect();
        if !description.is_empty() {
            line(
                &mut metadata,
                format!("<dc:description>{}</dc:description>", escape_text(&description.join("; "))),
            );
        }
        line(&mut metadata, format!("<dc:source>{url}</dc:source>"));
        line(&mut metadata, format!("<dc:rights>{RIGHTS}</dc:rights>"));
        if epub3 {
            let modified = Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
            line(&mut metadata, format!("<meta property=\"dcterms:modified\">{modified}</meta>"));
        }
        if let Some(cover) = &self.cover {
            line(&mut metadata, format!("<meta name=\"cover\" content=\"{}\"/>", escape_attr(cover)));
        }

        let mut manifest = String::new();
        for item in &self.items {
            let properties = if item.properties.is_empty() {
                String::new()
            } else {
                format!(" properties=\"{}\"", item.properties.join(" "))
            };
            manifest.push_str(&format!(
                "    <item id=\"{}\" href=\"{}\" media-type=\"{}\"{}/>\n",
                escape_attr(&item.id),
                escape_attr(&item.href),
                item.media_type,
                properties
            ));
        }

        let mut spine = String::new();
        for id in &self.spine {
            spine.push_str(&format!("    <itemref idref=\"{}\"/>\n", escape_attr(id)));
        }

        let (version, namespaces, guide) = if epub3 {
            ("3.0", "", String::new())
        } else {
            let guide = format!(
                "  <guide>\n    <reference type=\"cover\" title=\"Cover\" href=\"{TITLE_PAGE}\"/>\n    \
                 <reference type=\"title-page\" title=\"Title page\" href=\"{TITLE_PAGE}\"/>\n    \
                 <reference type=\"text\" title=\"Text\" href=\"{}\"/>\n  </guide>\n",
                escape_attr(&self.body_start)
            );
            ("2.0", " xmlns:opf=\"http://www.idpf.org/2007/opf\"", guide)
        };

        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<package xmlns="http://www.idpf.org/2007/opf" version="{version}" unique-identifier="uid" xml:lang="{lang}">
  <metadata xmlns:dc="http://purl.org/dc/elements/1.1/"{namespaces}>
{metadata}  </metadata>
  <manifest>
{manifest}  </manifest>
  <spine toc="ncx">
{spine}  </spine>
{guide}</package>
"#,
            lang = escape_attr(&book.lang),
        )
    }

    pub fn ncx(&self, book: &Book) -> String {
        fn points(toc: &[NavPoint], order: &mut usize, indent: usize, out: &mut String) {
            for point in toc {
                *order += 1;
                let pad = "  ".repeat(indent);
                out.push_str(&format!(
                    "{pad}<navPoint id=\"navpoint-{order}\" playOrder=\"{order}\">\n\
                     {pad}  <navLabel><text>{}</text></navLabel>\n\
                     {pad}  <content src=\"{}\"/>\n",
                    escape_text(&point.label),
                    escape_attr(&point.href)
                ));
                points(&point.children, order, indent + 1, out);
                out.push_str(&format!("{pad}</navPoint>\n"));
            }
        }
        let mut nav_map = String::new();
        points(&self.toc, &mut 0, 2, &mut nav_map);
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<ncx xmlns="http://www.daisy.org/z3986/2005/ncx/" version="2005-1" xml:lang="{lang}">
  <head>
    <meta name="dtb:uid" content="{uid}"/>
    <meta name="dtb:depth" content="{depth}"/>
    <meta name="dtb:totalPageCount" content="0"/>
    <meta name="dtb:maxPageNumber" content="0"/>
  </head>
  <docTitle><text>{title}</text></docTitle>
  <docAuthor><text>{author}</text></docAuthor>
  <navMap>
{nav_map}  </navMap>
</ncx>
"#,
            lang = escape_attr(&book.lang),
            uid = escape_attr(&book.url()),
            depth = depth(&self.toc),
            title = escape_text(display_name(book)),
            author = escape_text(&book.author),
        )
    }

    /// Body of `nav.xhtml`: table of contents and landmarks.
    pub fn nav_body(&self) -> String {
        fn list(toc: &[NavPoint], indent: usize, out: &mut String) {
            let pad = "  ".repeat(indent);
            out.push_str(&format!("{pad}<ol>\n"));
            for point in toc {
                out.push_str(&format!(
                    "{pad}  <li><a href=\"{}\">{}</a>",
                    escape_attr(&point.href),
                    escape_text(&point.label)
                ));
                if !point.children.is_empty() {
                    out.push('\n');
                    list(&point.children, indent + 2, out);
                    out.push_str(&pad);
                    out.push_str("  ");
                }
                out.push_str("</li>\n");
            }
            out.push_str(&format!("{pad}</ol>\n"));
        }
        let mut out = String::from("<nav epub:type=\"toc\" id=\"toc\">\n  <h1>Contents</h1>\n");
        list(&self.toc, 1, &mut out);
        out.push_str("</nav>\n<nav epub:type=\"landmarks\" id=\"landmarks\" hidden=\"hidden\">\n  <ol>\n");
        out.push_str(&format!(
            "    <li><a epub:type=\"toc\" href=\"{NAV}#toc\">Contents</a></li>\n    \
             <li><a epub:type=\"titlepage\" href=\"{TITLE_PAGE}\">Title page</a></li>\n    \
             <li><a epub:type=\"bodymatter\" href=\"{}\">Text</a></li>\n",
            escape_attr(&self.body_start)
        ));
        out.push_str("  </ol>\n</nav>");
        out
    }
}

fn display_name(book: &Book) -> &str {
    if book.name.is_empty() {
        &book.title
    } else {
        &book.name
    }
}

fn depth(toc: &[NavPoint]) -> usize {
    toc.iter().map(|p| 1 + depth(&p.children)).max().unwrap_or(0)
}

fn page_item(file: &str, content: Option<&crate::dom::Document>, epub3: bool) -> Item {
    let mut item = Item::xhtml(file, page_href(file));
    if let (true, Some(doc)) = (epub3, content) {
        if doc.count_tag("svg") > 0 {
            item.properties.push("svg");
        }
        if doc.count_tag("math") > 0 {
            item.properties.push("mathml");
        }
    }
    item
}

fn add_pages(pages: &[Page], items: &mut Vec<Item>, spine: &mut Vec<String>, toc: &mut Vec<NavPoint>, epub3: bool) {
    for page in pages {
        items.push(page_item(&page.title, page.content.as_ref(), epub3));
        spine.push(page.title.clone());
        let mut point = NavPoint {
            label: page.name.clone(),
            href: page_href(&page.title),
            children: Vec::new(),
        };
        add_pages(&page.chapters, items, spine, &mut point.children, epub3);
        toc.push(point);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::Document;

    fn book() -> Book {
        let mut book = Book::new("Foo", "fr", "fr.wikisource.org");
        book.name = "Foo & co".into();
        book.author = "Jules Verne".into();
        book.translator = "Someone".into();
        book.categories = vec!["Romans".into()];
        let mut chapter = Page::new("c1_Foo_I", "I");
        chapter.content = Some(Document::parse("<p>x<svg><rect/></svg></p>"));
        chapter.chapters.push(Page::new("c2_Foo_I_1", "I.1"));
        book.chapters.push(chapter);
        let mut cover = Picture::new("c3_X.jpg", "X.jpg", "https://u/X.jpg");
        cover.mimetype = "image/jpeg".into();
        book.pictures.insert("c3_X.jpg".into(), cover);
        book.cover = "c3_X.jpg".into();
        book
    }

    #[test]
    fn spine_follows_reading_order() {
        let book = book();
        let package = Package::new(&book, Some("c0_Foo"), None, EpubVersion::Epub3);
        assert_eq!(package.spine, ["title", "c0_Foo", "c1_Foo_I", "c2_Foo_I_1", "about"]);
        assert_eq!(package.body_start, "c0_Foo.xhtml");
        for id in &package.spine {
            assert!(package.items.iter().any(|i| &i.id == id), "{id}");
        }
        let chapter = &package.toc[2];
        assert_eq!(chapter.label, "I");
        assert_eq!(chapter.children[0].href, "c2_Foo_I_1.xhtml");
    }

    #[test]
    fn epub3_cover_is_a_cover_image_property() {
        let book = book();
        let package = Package::new(&book, None, None, EpubVersion::Epub3);
        let opf = package.opf(&book);
        assert!(opf.contains(
            "<item id=\"c3_X.jpg\" href=\"images/c3_X.jpg\" media-type=\"image/jpeg\" properties=\"cover-image\"/>"
        ));
        assert!(opf.contains("properties=\"nav\""));
        assert!(opf.contains("properties=\"svg\""));
        assert!(opf.contains("property=\"dcterms:modified\""));
        assert!(opf.contains("scheme=\"marc:relators\">trl</meta>"));
        assert!(opf.contains("<dc:title>Foo &amp; co</dc:title>"));
        assert!(!opf.contains("<guide>"));
    }

    #[test]
    fn epub2_cover_is_a_meta_element() {
        let book = book();
        let package = Package::new(&book, None, None, EpubVersion::Epub2);
        let opf = package.opf(&book);
        assert!(opf.contains("<meta name=\"cover\" content=\"c3_X.jpg\"/>"));
        assert!(!opf.contains("cover-image"));
        assert!(!opf.contains("nav.xhtml"));
        assert!(opf.contains("version=\"2.0\""));
        assert!(opf.contains("<dc:creator opf:role=\"aut\">Jules Verne</dc:creator>"));
        assert!(opf.contains("<reference type=\"text\" title=\"Text\" href=\"c1_Foo_I.xhtml\"/>"));
    }

    #[test]
    fn ncx_nests_sub_pages() {
        let book = book();
        let package = Package::new(&book, Some("c0_Foo"), None, EpubVersion::Epub2);
        let ncx = package.ncx(&book);
        assert!(ncx.contains("<meta name=\"dtb:depth\" content=\"2\"/>"));
        assert_eq!(ncx.matches("<navPoint ").count(), 5);
        assert!(ncx.contains("playOrder=\"5\""));
        let nav = package.nav_body();
        assert!(nav.contains("epub:type=\"landmarks\""));
        assert!(nav.contains("<a href=\"c2_Foo_I_1.xhtml\">I.1</a>"));
    }
}
