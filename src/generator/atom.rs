//! OPDS acquisition feed (Atom) for a list of books, e.g. the members of a category.

use std::io::Cursor;
use std::path::Path;

use chrono::{DateTime, Utc};
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use thiserror::Error;

use crate::model::Book;

use super::FormatTag;

/// Service the acquisition links point at.
pub const DEFAULT_EXPORT_URL: &str = "https://ws-export.wmcloud.org/";

#[derive(Debug, Error)]
pub enum AtomError {
    #[error("Failed to render feed: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("Failed to write feed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Feed is not valid UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
}

/// Feed-level information.
#[derive(Debug, Clone)]
pub struct FeedInfo {
    pub id: String,
    pub title: String,
    pub lang: String,
    pub updated: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct AtomGenerator {
    export_url: String,
}

fn encode(s: &str) -> String {
    utf8_percent_encode(s, NON_ALPHANUMERIC).to_string()
}

impl AtomGenerator {
    pub fn new(export_url: impl Into<String>) -> Self {
        Self {
            export_url: export_url.into(),
        }
    }

    /// Export link for `book` in `format`.
    pub fn export_link(&self, book: &Book, format: FormatTag) -> String {
        let sep = if self.export_url.contains('?') { '&' } else { '?' };
        format!(
            "{}{}format={}&lang={}&page={}",
            self.export_url,
            sep,
            format.as_str(),
            encode(&book.lang),
            encode(&book.title)
        )
    }

    pub fn render(&self, info: &FeedInfo, books: &[Book]) -> Result<String, AtomError> {
        let mut writer = Writer::new_with_indent(Cursor::new(Vec::new()), b' ', 2);
        writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;

        let mut feed = BytesStart::new("feed");
        feed.push_attribute(("xmlns", "http://www.w3.org/2005/Atom"));
        feed.push_attribute(("xmlns:dc", "http://purl.org/dc/terms/"));
        feed.push_attribute(("xmlns:opds", "http://opds-spec.org/2010/catalog"));
        feed.push_attribute(("xml:lang", info.lang.as_str()));
        writer.write_event(Event::Start(feed))?;

        simple(&mut writer, "id", &info.id)?;
        simple(&mut writer, "title", &info.title)?;
        simple(&mut writer, "updated", &info.updated.to_rfc3339())?;
        writer.write_event(Event::Start(BytesStart::new("author")))?;
        simple(&mut writer, "name", "Wikisource")?;
        simple(&mut writer, "uri", &info.id)?;
        writer.write_event(Event::End(BytesEnd::new("author")))?;
        link(
            &mut writer,
            &info.id,
            "self",
            "application/atom+xml;profile=opds-catalog;kind=acquisition",
            None,
        )?;

        for book in books {
            self.entry(&mut writer, book, info.updated)?;
        }

        writer.write_event(Event::End(BytesEnd::new("feed")))?;
        Ok(String::from_utf8(writer.into_inner().into_inner())?)
    }

    fn entry<W: std::io::Write>(
        &self,
        writer: &mut Writer<W>,
        book: &Book,
        updated: DateTime<Utc>,
    ) -> Result<(), AtomError> {
        writer.write_event(Event::Start(BytesStart::new("entry")))?;
        simple(writer, "id", &book.url())?;
        let name = if book.name.is_empty() { &book.title } else { &book.name };
        simple(writer, "title", name)?;
        simple(writer, "updated", &updated.to_rfc3339())?;
        if !book.author.is_empty() {
            writer.write_event(Event::Start(BytesStart::new("author")))?;
            simple(writer, "name", &book.author)?;
            writer.write_event(Event::End(BytesEnd::new("author")))?;
        }
        simple(writer, "dc:language", &book.lang)?;
        if !book.publisher.is_empty() {
            simple(writer, "dc:publisher", &book.publisher)?;
        }
        if !book.year.is_empty() {
            simple(writer, "dc:issued", &book.year)?;
        }
        for category in &book.categories {
            let mut elem = BytesStart::new("category");
            elem.push_attribute(("term", category.as_str()));
            elem.push_attribute(("label", category.as_str()));
            writer.write_event(Event::Empty(elem))?;
        }
        link(writer, &book.url(), "alternate", "text/html", Some("Wikisource"))?;
        for format in [FormatTag::Epub3, FormatTag::Epub2, FormatTag::Mobi, FormatTag::PdfA4] {
            link(
                writer,
                &self.export_link(book, format),
                "http://opds-spec.org/acquisition",
                format.mime_type(),
                Some(format.as_str()),
            )?;
        }
        if let Some(cover) = book.cover_picture() {
            for rel in ["http://opds-spec.org/image", "http://opds-spec.org/image/thumbnail"] {
                let mime = if cover.mimetype.is_empty() { "image/jpeg" } else { cover.mimetype.as_str() };
                link(writer, &cover.url, rel, mime, None)?;
            }
        }
        writer.write_event(Event::End(BytesEnd::new("entry")))?;
        Ok(())
    }

    /// Render and write the feed to `path`.
    pub fn write(&self, info: &FeedInfo, books: &[Book], path: &Path) -> Result<(), AtomError> {
        let xml = self.render(info, books)?;
        std::fs::write(path, xml)?;
        Ok(())
    }
}

fn simple<W: std::io::Write>(writer: &mut Writer<W>, name: &str, value: &str) -> Result<(), AtomError> {
    writer.write_event(Event::Start(BytesStart::new(name)))?;
    writer.write_event(Event::Text(BytesText::new(value)))?;
    writer.write_event(Event::End(BytesEnd::new(name)))?;
    Ok(())
}

fn link<W: std::io::Write>(
    writer: &mut Writer<W>,
    href: &str,
    rel: &str,
    kind: &str,
    title: Option<&str>,
) -> Result<(), AtomError> {
    let mut elem = BytesStart::new("link");
    elem.push_attribute(("href", href));
    elem.push_attribute(("rel", rel));
    elem.push_attribute(("type", kind));
    if let Some(title) = title {
        elem.push_attribute(("title", title));
    }
    writer.write_event(Event::Empty(elem))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Picture;

    fn info() -> FeedInfo {
        FeedInfo {
            id: "https://fr.wikisource.org/wiki/Catégorie:Romans".into(),
            title: "Romans".into(),
            lang: "fr".into(),
            updated: Utc::now(),
        }
    }

    #[test]
    fn entries_carry_acquisition_links() {
        let mut book = Book::new("Le_Tour_du_monde", "fr", "fr.wikisource.org");
        book.name = "Le Tour du monde & co".into();
        book.author = "Jules Verne".into();
        book.categories = vec!["Romans".into()];
        let mut cover = Picture::new("c.jpg", "c.jpg", "https://upload/c.jpg");
        cover.mimetype = "image/jpeg".into();
        book.pictures.insert("c.jpg".into(), cover);
        book.cover = "c.jpg".into();

        let xml = AtomGenerator::new(DEFAULT_EXPORT_URL).render(&info(), &[book]).unwrap();
        assert!(xml.contains("<feed xmlns=\"http://www.w3.org/2005/Atom\""));
        assert!(xml.contains("<title>Le Tour du monde &amp; co</title>"));
        assert!(xml.contains("rel=\"http://opds-spec.org/acquisition\""));
        assert!(xml.contains("format=epub-3&amp;lang=fr&amp;page=Le%5FTour%5Fdu%5Fmonde"));
        assert!(xml.contains("rel=\"http://opds-spec.org/image\""));
        assert!(xml.contains("<category term=\"Romans\""));
    }

    #[test]
    fn empty_listing_is_a_valid_feed() {
        let xml = AtomGenerator::new("https://example.org/export?x=1")
            .render(&info(), &[])
            .unwrap();
        assert!(xml.trim_end().ends_with("</feed>"));
        assert_eq!(xml.matches("<entry>").count(), 0);
    }

    #[test]
    fn export_links_respect_existing_query() {
        let book = Book::new("A", "en", "en.wikisource.org");
        let g = AtomGenerator::new("https://example.org/export?x=1");
        assert_eq!(
            g.export_link(&book, FormatTag::Epub2),
            "https://example.org/export?x=1&format=epub-2&lang=en&page=A"
        );
    }
}
