//! EPUB writer. Cleans an assembled [`Book`] for packaging and writes it as EPUB 2 or EPUB 3
//! (mimetype, container, OPF, NCX, nav, title/about pages, chapters, images, fonts).

mod cleaner;
mod package;
mod split;
mod templates;

use std::io::{Seek, Write};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, info};
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

use crate::dom::{escape_attr, Document};
use crate::error::ExportError;
use crate::generator::{BookGenerator, FormatTag};
use crate::model::{Book, Page};
use crate::resources::{Assets, LOGO_SVG};
use crate::session::ExportSession;

pub use cleaner::{has_content, CleanedBook, Cleaner};
pub use package::{Item, NavPoint, Package};
pub use split::{split_document, SplitOptions, DEFAULT_SPLIT_MARGIN, DEFAULT_SPLIT_THRESHOLD};

const CONTAINER_XML: &[u8] = b"<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<container version=\"1.0\" xmlns=\"urn:oasis:names:tc:opendocument:xmlns:container\">\n  <rootfiles>\n    <rootfile full-path=\"OPS/content.opf\" media-type=\"application/oebps-package+xml\"/>\n  </rootfiles>\n</container>";

const MIMETYPE: &[u8] = b"application/epub+zip";
const OPS_PREFIX: &str = "OPS/";

/// EPUB format version.
///
/// EPUB 3 gets HTML5 content documents, `nav.xhtml` and semantic footnote markup; EPUB 2 gets
/// XHTML 1.1 documents and a guide. Both carry `toc.ncx`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EpubVersion {
    Epub2,
    #[default]
    Epub3,
}

/// Errors from the EPUB writer.
#[derive(Debug, Error)]
pub enum EpubError {
    #[error("Cannot write EPUB: book title is empty.")]
    EmptyTitle,

    #[error("Cannot write EPUB: {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to create EPUB file: {path}: {source}")]
    CreateFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Missing resource {path}: {source}")]
    MissingResource {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write EPUB archive: {0}")]
    Zip(#[from] zip::result::ZipError),
}

impl From<std::io::Error> for EpubError {
    fn from(e: std::io::Error) -> Self {
        EpubError::Zip(zip::result::ZipError::Io(e))
    }
}

/// Packaging parameters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EpubOptions {
    pub version: EpubVersion,
    pub split: SplitOptions,
}

/// Clean `book` and write it to `path`.
///
/// The archive is written to a temporary file next to `path` and moved into place once
/// complete, so a failed export leaves nothing behind.
pub fn write_epub(
    book: &mut Book,
    session: &mut ExportSession,
    assets: &Assets,
    options: EpubOptions,
    path: &Path,
) -> Result<(), EpubError> {
    validate_book(book)?;
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let staged = tempfile::NamedTempFile::new_in(&dir).map_err(|e| EpubError::CreateFile {
        path: path.to_path_buf(),
        source: e,
    })?;
    let (file, temp_path) = staged.into_parts();
    write_package(book, session, assets, options, file)?;
    temp_path.persist(path).map_err(|e| EpubError::CreateFile {
        path: path.to_path_buf(),
        source: e.error,
    })?;
    info!(path = %path.display(), "wrote EPUB");
    Ok(())
}

/// Clean `book` and write the archive into `writer`.
pub fn write_package<W: Write + Seek>(
    book: &mut Book,
    session: &mut ExportSession,
    assets: &Assets,
    options: EpubOptions,
    writer: W,
) -> Result<W, EpubError> {
    validate_book(book)?;
    let before = book.pictures.len();
    book.pictures.retain(|_, p| p.file.is_some());
    if book.pictures.len() < before {
        debug!(dropped = before - book.pictures.len(), "pictures without data left out");
    }
    if !book.cover.is_empty() && !book.pictures.contains_key(&book.cover) {
        book.cover.clear();
    }

    let cleaned = Cleaner::new(session, options.version, options.split).clean(book);
    let main = book
        .content
        .as_ref()
        .filter(|doc| has_content(doc))
        .map(|_| cleaned.main.as_str());
    let package = Package::new(book, main, assets.font.as_ref(), options.version);

    let mut zip = ZipWriter::new(writer);
    let options_stored = SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Stored)
        .unix_permissions(0o644);
    let options_deflate = SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated)
        .unix_permissions(0o644);

    // mimetype first, uncompressed
    zip.start_file("mimetype", options_stored)?;
    zip.write_all(MIMETYPE)?;

    zip.start_file("META-INF/container.xml", options_deflate)?;
    zip.write_all(CONTAINER_XML)?;

    let put = |zip: &mut ZipWriter<W>, name: &str, data: &[u8]| -> Result<(), EpubError> {
        zip.start_file(format!("{OPS_PREFIX}{name}"), options_deflate)?;
        zip.write_all(data)?;
        Ok(())
    };

    put(&mut zip, "content.opf", package.opf(book).as_bytes())?;
    put(&mut zip, package::NCX, package.ncx(book).as_bytes())?;
    let version = options.version;
    if version == EpubVersion::Epub3 {
        let nav = templates::xhtml_page(version, &book.lang, "Contents", "", "", &package.nav_body());
        put(&mut zip, package::NAV, nav.as_bytes())?;
    }
    put(&mut zip, package::STYLESHEET, assets.css().as_bytes())?;
    put(&mut zip, package::LOGO, LOGO_SVG.as_bytes())?;

    let name = if book.name.is_empty() { book.title.clone() } else { book.name.clone() };
    let title_page = templates::xhtml_page(version, &book.lang, &name, "", "", &templates::title_page_body(book));
    put(&mut zip, package::TITLE_PAGE, title_page.as_bytes())?;

    if let (Some(main), Some(doc)) = (main, book.content.as_ref()) {
        let xhtml = content_page(version, &book.lang, &name, doc);
        put(&mut zip, &package::page_href(main), xhtml.as_bytes())?;
    }
    write_pages(&book.chapters, version, &book.lang, &mut |file: &str, xhtml: String| {
        put(&mut zip, &package::page_href(file), xhtml.as_bytes())
    })?;

    let about = templates::xhtml_page(
        version,
        &book.lang,
        "About",
        "",
        "",
        &templates::about_page_body(&assets.about, &book.credits),
    );
    put(&mut zip, package::ABOUT_PAGE, about.as_bytes())?;

    for (key, picture) in &book.pictures {
        let Some(file) = &picture.file else { continue };
        let data = std::fs::read(file).map_err(|e| EpubError::Io {
            path: file.to_path_buf(),
            source: e,
        })?;
        put(&mut zip, &format!("images/{key}"), &data)?;
    }

    if let Some(font) = &assets.font {
        for (style, source) in &font.files {
            let Some(href) = font.package_path(*style) else { continue };
            let data = std::fs::read(source).map_err(|e| EpubError::MissingResource {
                path: source.clone(),
                source: e,
            })?;
            put(&mut zip, &href, &data)?;
        }
    }

    debug!(items = package.items.len(), spine = package.spine.len(), "packaged EPUB");
    Ok(zip.finish()?)
}

fn validate_book(book: &Book) -> Result<(), EpubError> {
    if book.title.trim().is_empty() {
        return Err(EpubError::EmptyTitle);
    }
    Ok(())
}

fn write_pages(
    pages: &[Page],
    version: EpubVersion,
    lang: &str,
    put: &mut impl FnMut(&str, String) -> Result<(), EpubError>,
) -> Result<(), EpubError> {
    for page in pages {
        let xhtml = match &page.content {
            Some(doc) => content_page(version, lang, &page.name, doc),
            None => templates::xhtml_page(
                version,
                lang,
                &page.name,
                "",
                "",
                &format!("<h2>{}</h2>", crate::dom::escape_text(&page.name)),
            ),
        };
        put(&page.title, xhtml)?;
        write_pages(&page.chapters, version, lang, put)?;
    }
    Ok(())
}

/// Serialize a cleaned page document into a complete content document.
fn content_page(version: EpubVersion, lang: &str, title: &str, doc: &Document) -> String {
    let head = doc.head().map(|h| doc.inner_xhtml(h)).unwrap_or_default();
    let (attrs, body) = match doc.body() {
        Some(b) => {
            let attrs: String = doc
                .attrs(b)
                .iter()
                .filter(|a| !matches!(a.name.as_str(), "lang" | "xml:lang"))
                .map(|a| format!(" {}=\"{}\"", a.name, escape_attr(&a.value)))
                .collect();
            (attrs, doc.inner_xhtml(b))
        }
        None => (String::new(), String::new()),
    };
    templates::xhtml_page(version, lang, title, &head, &attrs, &body)
}

/// [`BookGenerator`] producing EPUB files.
#[derive(Debug, Clone, Copy)]
pub struct EpubGenerator {
    options: EpubOptions,
}

impl EpubGenerator {
    pub fn new(version: EpubVersion, split: SplitOptions) -> Self {
        Self {
            options: EpubOptions { version, split },
        }
    }
}

#[async_trait]
impl BookGenerator for EpubGenerator {
    fn format(&self) -> FormatTag {
        match self.options.version {
            EpubVersion::Epub2 => FormatTag::Epub2,
            EpubVersion::Epub3 => FormatTag::Epub3,
        }
    }

    async fn create(
        &self,
        book: &mut Book,
        session: &mut ExportSession,
        assets: &Assets,
        path: &Path,
    ) -> Result<(), ExportError> {
        write_epub(book, session, assets, self.options, path)?;
        Ok(())
    }
}
