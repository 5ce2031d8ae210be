//! One export from start to finish: resolve the generator and font, assemble the book,
//! load the wiki assets and hand everything to the generator.

use std::path::{Path, PathBuf};

use chrono::Utc;
use deunicode::deunicode;
use tracing::info;

use crate::api::{normalize_title, Fetcher};
use crate::epub::EpubError;
use crate::error::ExportError;
use crate::fonts::{FontFamily, FontRegistry};
use crate::generator::{AtomGenerator, FeedInfo, FormatTag, Generator, GeneratorRegistry};
use crate::model::BookOptions;
use crate::provider::{BookProvider, CreditsSource, ProgressFn, DEFAULT_IMAGE_CONCURRENCY};
use crate::resources::{load_assets, AssetCache};
use crate::session::ExportSession;

/// What to export and where.
#[derive(Debug, Clone)]
pub struct ExportRequest {
    /// Book title, or category name for feeds.
    pub title: String,
    pub format: FormatTag,
    pub options: BookOptions,
    pub output: PathBuf,
}

/// Summary of a finished export.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportOutcome {
    pub path: PathBuf,
    pub title: String,
    /// Chapters for a book, entries for a feed.
    pub items: usize,
}

/// `<sanitized-title>.<ext>`: ASCII letters, digits, `-`, `_` and `.` only.
pub fn output_file_name(title: &str, format: FormatTag) -> String {
    let base: String = deunicode(title.trim())
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let base = base.trim_matches(|c| c == '_' || c == '.');
    let base = if base.is_empty() { "book" } else { base };
    format!("{}.{}", base, format.extension())
}

pub struct Exporter<'a, F: Fetcher + ?Sized> {
    api: &'a F,
    registry: &'a GeneratorRegistry,
    fonts: &'a dyn FontRegistry,
    credits: Option<&'a dyn CreditsSource>,
    asset_cache: AssetCache,
    image_concurrency: usize,
    progress: Option<&'a ProgressFn<'a>>,
}

impl<'a, F: Fetcher + ?Sized> Exporter<'a, F> {
    pub fn new(api: &'a F, registry: &'a GeneratorRegistry, fonts: &'a dyn FontRegistry) -> Self {
        Self {
            api,
            registry,
            fonts,
            credits: None,
            asset_cache: AssetCache::default(),
            image_concurrency: DEFAULT_IMAGE_CONCURRENCY,
            progress: None,
        }
    }

    pub fn with_credits(mut self, credits: &'a dyn CreditsSource) -> Self {
        self.credits = Some(credits);
        self
    }

    pub fn with_asset_cache(mut self, cache: AssetCache) -> Self {
        self.asset_cache = cache;
        self
    }

    pub fn with_image_concurrency(mut self, n: usize) -> Self {
        self.image_concurrency = n.max(1);
        self
    }

    pub fn with_progress(mut self, progress: &'a ProgressFn<'a>) -> Self {
        self.progress = Some(progress);
        self
    }

    fn provider(&self, options: BookOptions) -> BookProvider<'_, F> {
        let mut provider =
            BookProvider::new(self.api, options).with_image_concurrency(self.image_concurrency);
        if let Some(credits) = self.credits {
            provider = provider.with_credits(credits);
        }
        if let Some(progress) = self.progress {
            provider = provider.with_progress(progress);
        }
        provider
    }

    fn resolve_font(&self, name: Option<&str>) -> Result<Option<FontFamily>, ExportError> {
        let Some(name) = name.map(str::trim).filter(|n| !n.is_empty()) else {
            return Ok(None);
        };
        match self.fonts.family(name) {
            Some(family) => Ok(Some(family)),
            None => Err(ExportError::UnknownFont {
                name: name.to_string(),
                available: self.fonts.names().join(", "),
            }),
        }
    }

    fn session() -> Result<ExportSession, ExportError> {
        ExportSession::new().map_err(|e| {
            ExportError::Construction(EpubError::Io {
                path: std::env::temp_dir(),
                source: e,
            })
        })
    }

    pub async fn export(&self, request: &ExportRequest) -> Result<ExportOutcome, ExportError> {
        let font = self.resolve_font(request.options.font.as_deref())?;
        let generator = match self.registry.get(request.format)? {
            Generator::Feed(atom) => {
                return self.export_feed(&atom, &request.title, &request.output).await;
            }
            Generator::Book(generator) => generator,
        };

        let mut session = Self::session()?;
        let mut book = self
            .provider(request.options.clone())
            .get(&request.title, &mut session)
            .await?;
        let assets = load_assets(self.api, &self.asset_cache, font).await;
        let chapters = book.chapters.len();
        let title = book.title.clone();
        generator
            .create(&mut book, &mut session, &assets, &request.output)
            .await?;
        info!(%title, format = %request.format, path = %request.output.display(), "export finished");
        Ok(ExportOutcome {
            path: request.output.clone(),
            title,
            items: chapters,
        })
    }

    /// OPDS feed over the members of `category`.
    pub async fn export_feed(
        &self,
        atom: &AtomGenerator,
        category: &str,
        output: &Path,
    ) -> Result<ExportOutcome, ExportError> {
        let namespaces = self.api.namespaces().await?;
        let name = normalize_title(namespaces.strip_prefix(category.trim()));
        let prefix = namespaces
            .get(14)
            .map(|ns| ns.name.clone())
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| "Category".to_string());

        let members = self.api.category_members(&name).await?;
        let mut session = Self::session()?;
        let options = BookOptions {
            images: false,
            credits: false,
            font: None,
        };
        let books = self
            .provider(options)
            .get_multi(&members, true, &mut session)
            .await?;

        let info = FeedInfo {
            id: format!("https://{}/wiki/{}:{}", self.api.domain(), prefix, name),
            title: name.replace('_', " "),
            lang: self.api.lang().to_string(),
            updated: Utc::now(),
        };
        atom.write(&info, &books, output)?;
        info!(category = %name, entries = books.len(), path = %output.display(), "feed written");
        Ok(ExportOutcome {
            path: output.to_path_buf(),
            title: name,
            items: books.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::testing::FakeWiki;
    use crate::fonts::ConfigFontRegistry;
    use std::io::Read;
    use std::time::Duration;

    fn exporter<'a>(wiki: &'a FakeWiki, registry: &'a GeneratorRegistry, fonts: &'a ConfigFontRegistry) -> Exporter<'a, FakeWiki> {
        Exporter::new(wiki, registry, fonts).with_asset_cache(AssetCache::new(None, Duration::from_secs(1)))
    }

    #[test]
    fn file_names_are_sanitized() {
        assert_eq!(output_file_name("Le Tour du monde", FormatTag::Epub3), "Le_Tour_du_monde.epub");
        assert_eq!(output_file_name("Les Misérables/Tome 1", FormatTag::PdfA4), "Les_Miserables_Tome_1.pdf");
        assert_eq!(output_file_name("  ", FormatTag::Txt), "book.txt");
    }

    #[tokio::test]
    async fn exports_an_epub_end_to_end() -> Result<(), Box<dyn std::error::Error>> {
        let wiki = FakeWiki::new()
            .page(
                "Foo",
                "<div id=\"ws-data\"><span id=\"ws-author\">Jules Verne</span></div>\
                 <div id=\"ws-summary\"><a href=\"./Foo/Bar\">Bar</a></div>",
            )
            .page("Foo/Bar", "<p>Chapter text</p>");
        let registry = GeneratorRegistry::default();
        let fonts = ConfigFontRegistry::default();
        let dir = tempfile::tempdir()?;
        let request = ExportRequest {
            title: "Foo".into(),
            format: FormatTag::Epub3,
            options: BookOptions::default(),
            output: dir.path().join(output_file_name("Foo", FormatTag::Epub3)),
        };
        let outcome = exporter(&wiki, &registry, &fonts).export(&request).await?;
        assert_eq!(outcome.items, 1);

        let mut zip = zip::ZipArchive::new(std::fs::File::open(&outcome.path)?)?;
        let mut opf = String::new();
        zip.by_name("OPS/content.opf")?.read_to_string(&mut opf)?;
        assert!(opf.contains("<dc:creator id=\"author\">Jules Verne</dc:creator>"));
        assert!(opf.contains("href=\"c1_Foo_Bar.xhtml\""));
        Ok(())
    }

    #[tokio::test]
    async fn unknown_font_is_rejected_before_fetching() {
        let wiki = FakeWiki::new();
        let registry = GeneratorRegistry::default();
        let fonts = ConfigFontRegistry::default();
        let request = ExportRequest {
            title: "Foo".into(),
            format: FormatTag::Epub3,
            options: BookOptions {
                font: Some("Comic".into()),
                ..BookOptions::default()
            },
            output: PathBuf::from("unused.epub"),
        };
        let err = exporter(&wiki, &registry, &fonts).export(&request).await.unwrap_err();
        assert!(matches!(err, ExportError::UnknownFont { .. }));
        assert!(wiki.requests().is_empty());
    }

    #[tokio::test]
    async fn missing_book_is_not_found() {
        let wiki = FakeWiki::new();
        let registry = GeneratorRegistry::default();
        let fonts = ConfigFontRegistry::default();
        let request = ExportRequest {
            title: "Nope".into(),
            format: FormatTag::Epub2,
            options: BookOptions::default(),
            output: PathBuf::from("unused.epub"),
        };
        let err = exporter(&wiki, &registry, &fonts).export(&request).await.unwrap_err();
        assert!(matches!(err, ExportError::NotFound { .. }));
    }

    #[tokio::test]
    async fn category_feed_lists_members() -> Result<(), Box<dyn std::error::Error>> {
        let mut wiki = FakeWiki::new()
            .page("A", "<span id=\"ws-title\">Book A</span>")
            .page("B", "<span id=\"ws-title\">Book B</span>");
        wiki.members = vec!["A".into(), "B".into(), "Missing".into()];
        let registry = GeneratorRegistry::default();
        let fonts = ConfigFontRegistry::default();
        let dir = tempfile::tempdir()?;
        let request = ExportRequest {
            title: "Category:Novels".into(),
            format: FormatTag::Atom,
            options: BookOptions::default(),
            output: dir.path().join("novels.atom"),
        };
        let outcome = exporter(&wiki, &registry, &fonts).export(&request).await?;
        assert_eq!(outcome.items, 2);
        assert_eq!(outcome.title, "Novels");
        let xml = std::fs::read_to_string(&outcome.path)?;
        assert!(xml.contains("<title>Book A</title>"));
        assert!(xml.contains("https://en.wikisource.org/wiki/Category:Novels"));
        Ok(())
    }
}
