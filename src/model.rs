//! Book model shared by the provider, the EPUB pipeline and the generators.
//!
//! A [`Book`] is filled by [`BookProvider`](crate::provider::BookProvider) and then
//! rewritten in place by the EPUB cleaner (titles encoded, chapters split).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tempfile::TempPath;

use crate::dom::Document;

/// One wiki page included in the book. Chapters hold their sub-pages.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Page {
    pub title: String,
    /// Display name used in the table of contents.
    pub name: String,
    #[serde(skip)]
    pub content: Option<Document>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub chapters: Vec<Page>,
}

impl Page {
    pub fn new(title: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            name: name.into(),
            content: None,
            chapters: Vec::new(),
        }
    }
}

/// An image referenced by the book.
#[derive(Debug, Serialize)]
pub struct Picture {
    /// Key (unique per rendition), later replaced by its encoded form.
    pub title: String,
    /// Source media file name.
    pub name: String,
    pub url: String,
    pub mimetype: String,
    /// Downloaded file, removed from disk when the picture is dropped.
    #[serde(skip)]
    pub file: Option<TempPath>,
}

impl Picture {
    pub fn new(title: impl Into<String>, name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            name: name.into(),
            url: url.into(),
            mimetype: String::new(),
            file: None,
        }
    }
}

/// Contribution count for one user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Contributor {
    pub name: String,
    pub count: u64,
    pub bot: bool,
}

/// User-chosen export options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookOptions {
    pub images: bool,
    pub credits: bool,
    /// Font family name; must be known to the font registry.
    pub font: Option<String>,
}

impl Default for BookOptions {
    fn default() -> Self {
        Self {
            images: true,
            credits: true,
            font: None,
        }
    }
}

/// A book: the root page plus bibliographic metadata, pictures and credits.
#[derive(Debug, Default, Serialize)]
pub struct Book {
    pub title: String,
    pub name: String,
    pub lang: String,
    /// Host the book was fetched from.
    pub domain: String,
    pub options: BookOptions,
    #[serde(rename = "type", skip_serializing_if = "String::is_empty")]
    pub kind: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub periodical: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub author: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub translator: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub illustrator: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub school: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub publisher: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub year: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub place: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub key: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub progress: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub volume: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub scan: String,
    pub categories: Vec<String>,
    /// Key of the cover picture in `pictures`, empty when there is none.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub cover: String,
    #[serde(skip)]
    pub content: Option<Document>,
    pub chapters: Vec<Page>,
    pub pictures: BTreeMap<String, Picture>,
    pub credits: Vec<Contributor>,
}

impl Book {
    pub fn new(title: impl Into<String>, lang: impl Into<String>, domain: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            lang: lang.into(),
            domain: domain.into(),
            ..Self::default()
        }
    }

    /// The cover picture, if one was resolved.
    pub fn cover_picture(&self) -> Option<&Picture> {
        if self.cover.is_empty() {
            return None;
        }
        self.pictures.get(&self.cover)
    }

    /// All pages depth-first: chapters, each followed by its sub-pages.
    pub fn pages(&self) -> Vec<&Page> {
        fn walk<'a>(pages: &'a [Page], out: &mut Vec<&'a Page>) {
            for page in pages {
                out.push(page);
                walk(&page.chapters, out);
            }
        }
        let mut out = Vec::new();
        walk(&self.chapters, &mut out);
        out
    }

    /// Canonical page URL on the source wiki.
    pub fn url(&self) -> String {
        format!("https://{}/wiki/{}", self.domain, self.title)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    fn sample_book() -> Book {
        let mut book = Book::new("Les_Misérables", "fr", "fr.wikisource.org");
        book.name = "Les Misérables".to_string();
        book.author = "Victor Hugo".to_string();
        let mut tome = Page::new("Les_Misérables/Tome_1", "Tome 1");
        tome.chapters.push(Page::new("Les_Misérables/Tome_1/Livre_1", "Livre 1"));
        book.chapters.push(tome);
        book.chapters.push(Page::new("Les_Misérables/Tome_2", "Tome 2"));
        book
    }

    #[test]
    fn pages_are_listed_depth_first() {
        let book = sample_book();
        let titles: Vec<_> = book.pages().iter().map(|p| p.title.as_str()).collect();
        assert_eq!(
            titles,
            vec![
                "Les_Misérables/Tome_1",
                "Les_Misérables/Tome_1/Livre_1",
                "Les_Misérables/Tome_2"
            ]
        );
    }

    #[test]
    fn book_serializes_metadata_without_empty_fields() -> Result<(), Box<dyn Error>> {
        let book = sample_book();
        let value: serde_json::Value = serde_json::to_value(&book)?;
        assert_eq!(value["name"].as_str(), Some("Les Misérables"));
        assert_eq!(value["author"].as_str(), Some("Victor Hugo"));
        assert!(value.get("translator").is_none());
        assert!(value.get("content").is_none());
        assert_eq!(value["chapters"].as_array().map(Vec::len), Some(2));
        Ok(())
    }

    #[test]
    fn cover_lookup_requires_known_picture() {
        let mut book = sample_book();
        assert!(book.cover_picture().is_none());
        book.cover = "X.jpg".to_string();
        assert!(book.cover_picture().is_none());
        book.pictures
            .insert("X.jpg".to_string(), Picture::new("X.jpg", "X.jpg", "https://x/X.jpg"));
        assert_eq!(book.cover_picture().map(|p| p.name.as_str()), Some("X.jpg"));
    }

    #[test]
    fn default_options_include_images_and_credits() {
        let options = BookOptions::default();
        assert!(options.images && options.credits);
        assert!(options.font.is_none());
    }
}
