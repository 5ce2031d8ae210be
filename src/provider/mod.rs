//! Builds a [`Book`] from a title: metadata, chapter tree, pictures and credits.

mod credits;
mod pictures;

pub use credits::{merge_credits, CreditRow, CreditsSource, HttpCreditsSource};
pub use pictures::{
    cover_thumb_param, download_pictures, resolve_cover, split_cover_reference, COVER_WIDTH,
};

use std::collections::BTreeMap;

use futures::future::join_all;
use tracing::{debug, info, warn};

use crate::api::{normalize_title, ApiError, Fetcher, Namespaces};
use crate::model::{Book, BookOptions, Contributor, Page, Picture};
use crate::parser::{PageParser, EXCLUDE_FLAG};
use crate::session::ExportSession;

/// Default number of simultaneous picture downloads.
pub const DEFAULT_IMAGE_CONCURRENCY: usize = 10;

/// Download progress callback: `(done, total)`.
pub type ProgressFn<'a> = dyn Fn(usize, usize) + Send + Sync + 'a;

/// Bibliographic fields read from `ws-*` elements.
const METADATA_FIELDS: &[&str] = &[
    "ws-type",
    "ws-periodical",
    "ws-author",
    "ws-translator",
    "ws-illustrator",
    "ws-school",
    "ws-publisher",
    "ws-year",
    "ws-place",
    "ws-key",
    "ws-progress",
    "ws-volume",
    "ws-scan",
];

fn metadata_field<'b>(book: &'b mut Book, key: &str) -> Option<&'b mut String> {
    Some(match key {
        "ws-type" => &mut book.kind,
        "ws-periodical" => &mut book.periodical,
        "ws-author" => &mut book.author,
        "ws-translator" => &mut book.translator,
        "ws-illustrator" => &mut book.illustrator,
        "ws-school" => &mut book.school,
        "ws-publisher" => &mut book.publisher,
        "ws-year" => &mut book.year,
        "ws-place" => &mut book.place,
        "ws-key" => &mut book.key,
        "ws-progress" => &mut book.progress,
        "ws-volume" => &mut book.volume,
        "ws-scan" => &mut book.scan,
        _ => return None,
    })
}

/// Fetches and assembles books from one wiki.
pub struct BookProvider<'a, F: Fetcher + ?Sized> {
    api: &'a F,
    credits: Option<&'a dyn CreditsSource>,
    options: BookOptions,
    image_concurrency: usize,
    progress: Option<&'a ProgressFn<'a>>,
}

impl<'a, F: Fetcher + ?Sized> BookProvider<'a, F> {
    pub fn new(api: &'a F, options: BookOptions) -> Self {
        Self {
            api,
            credits: None,
            options,
            image_concurrency: DEFAULT_IMAGE_CONCURRENCY,
            progress: None,
        }
    }

    /// Credits are only gathered when a source is set and the options ask for them.
    pub fn with_credits(mut self, source: &'a dyn CreditsSource) -> Self {
        self.credits = Some(source);
        self
    }

    pub fn with_image_concurrency(mut self, n: usize) -> Self {
        self.image_concurrency = n.max(1);
        self
    }

    /// Callback receiving `(done, total)` while pictures download.
    pub fn with_progress(mut self, progress: &'a ProgressFn<'a>) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Full book: metadata, two levels of chapters, pictures (downloaded) and credits.
    pub async fn get(&self, title: &str, session: &mut ExportSession) -> Result<Book, ApiError> {
        let title = normalize_title(title);
        let html = self.api.page_html(&title).await?;
        let namespaces = self.api.namespaces().await?;
        self.assemble(&title, &html, false, &namespaces, session).await
    }

    /// Several books, fetched concurrently. With `metadata_only` no chapters, pictures
    /// (other than cover info) or credits are gathered.
    pub async fn get_multi(
        &self,
        titles: &[String],
        metadata_only: bool,
        session: &mut ExportSession,
    ) -> Result<Vec<Book>, ApiError> {
        let namespaces = self.api.namespaces().await?;
        let titles: Vec<String> = titles.iter().map(|t| normalize_title(t)).collect();
        let pages = join_all(titles.iter().map(|t| self.api.page_html(t))).await;
        let mut books = Vec::with_capacity(titles.len());
        for (title, html) in titles.iter().zip(pages) {
            let html = match html {
                Ok(html) => html,
                Err(ApiError::NotFound { .. }) => {
                    warn!(%title, "skipping missing page");
                    continue;
                }
                Err(e) => return Err(e),
            };
            books.push(
                self.assemble(title, &html, metadata_only, &namespaces, session)
                    .await?,
            );
        }
        Ok(books)
    }

    /// Book metadata from an already fetched page.
    pub async fn get_metadata(
        &self,
        title: &str,
        html: &str,
        session: &mut ExportSession,
    ) -> Result<Book, ApiError> {
        let namespaces = self.api.namespaces().await?;
        self.assemble(&normalize_title(title), html, true, &namespaces, session)
            .await
    }

    /// Resolve a cover reference (`File.jpg`, `Book.djvu/12`) into a picture.
    pub async fn get_cover(&self, reference: &str) -> Option<Picture> {
        match resolve_cover(self.api, reference).await {
            Ok(Some(picture)) => Some(picture),
            Ok(None) => {
                warn!(reference, "cover file not found");
                None
            }
            Err(e) => {
                warn!(reference, error = %e, "could not resolve cover");
                None
            }
        }
    }

    async fn assemble(
        &self,
        title: &str,
        html: &str,
        metadata_only: bool,
        namespaces: &Namespaces,
        session: &mut ExportSession,
    ) -> Result<Book, ApiError> {
        let mut book = Book::new(title, self.api.lang(), self.api.domain());
        book.options = self.options.clone();
        let mut parser = PageParser::parse(html).with_domain(self.api.domain());

        let cover_reference = self.read_metadata(&mut book, &parser, namespaces).await;
        if !cover_reference.is_empty() {
            if let Some(cover) = self.get_cover(&cover_reference).await {
                book.cover = cover.title.clone();
                book.pictures.insert(cover.title.clone(), cover);
            }
        }

        if metadata_only {
            book.categories = self.categories(&[book.title.clone()]).await;
            return Ok(book);
        }

        let mut page_list = vec![book.title.clone()];
        let chapters = parser.full_chapters_list(title, &mut page_list, namespaces);
        let mut source_pages = parser.pages_list();
        if self.options.images {
            merge_pictures(&mut book.pictures, parser.pictures_list());
        }
        book.content = Some(parser.into_content(title, true, &mut session.ids));
        info!(%title, chapters = chapters.len(), "fetched main page");

        book.chapters = self
            .fetch_chapters(chapters, &mut page_list, namespaces, &mut book.pictures, &mut source_pages, session)
            .await?;

        let visited: Vec<String> = std::iter::once(book.title.clone())
            .chain(book.pages().iter().map(|p| p.title.clone()))
            .collect();
        book.categories = self.categories(&visited).await;

        if self.options.credits {
            let mut credited = visited;
            if !book.scan.is_empty() {
                credited.push(format!("{}:{}", namespaces.index_name(), book.scan));
            }
            credited.extend(source_pages);
            book.credits = self.credits(&credited, &book.pictures).await;
        }

        if !self.options.images {
            let cover = book.cover.clone();
            book.pictures.retain(|key, _| *key == cover);
        }
        download_pictures(
            self.api,
            &mut book.pictures,
            session.temp_dir(),
            self.image_concurrency,
            self.progress,
        )
        .await;
        if !book.cover.is_empty() && !book.pictures.contains_key(&book.cover) {
            book.cover.clear();
        }
        Ok(book)
    }

    /// Fill the bibliographic fields. Returns the cover reference.
    async fn read_metadata(&self, book: &mut Book, parser: &PageParser, namespaces: &Namespaces) -> String {
        let external = if parser.metadata_is_set("ws-metadata") {
            let source = normalize_title(&parser.metadata("ws-metadata"));
            match self.api.page_html(&source).await {
                Ok(html) => Some(PageParser::parse(&html).with_domain(self.api.domain())),
                Err(e) => {
                    warn!(%source, error = %e, "metadata page unavailable, using the book page");
                    None
                }
            }
        } else {
            None
        };
        let meta = external.as_ref().unwrap_or(parser);
        for key in METADATA_FIELDS {
            if let Some(field) = metadata_field(book, key) {
                *field = meta.metadata(key);
            }
        }
        let name = meta.metadata("ws-title");
        book.name = if name.is_empty() {
            namespaces.strip_prefix(&book.title).replace('_', " ")
        } else {
            name
        };
        meta.metadata("ws-cover")
    }

    /// Level-1 chapters are fetched together, then their sub-pages together.
    async fn fetch_chapters(
        &self,
        chapters: Vec<Page>,
        page_list: &mut Vec<String>,
        namespaces: &Namespaces,
        pictures: &mut BTreeMap<String, Picture>,
        source_pages: &mut Vec<String>,
        session: &mut ExportSession,
    ) -> Result<Vec<Page>, ApiError> {
        let fetched = join_all(chapters.iter().map(|c| self.api.page_html(&c.title))).await;
        let mut kept = Vec::with_capacity(chapters.len());
        for (mut chapter, html) in chapters.into_iter().zip(fetched) {
            let Some(mut parser) = self.chapter_parser(&chapter.title, html)? else {
                continue;
            };
            chapter.chapters = parser.full_chapters_list(&chapter.title, page_list, namespaces);
            self.absorb(&mut chapter, parser, pictures, source_pages, session);
            kept.push(chapter);
        }

        let stubs: Vec<String> = kept
            .iter()
            .flat_map(|c| c.chapters.iter().map(|s| s.title.clone()))
            .collect();
        if stubs.is_empty() {
            return Ok(kept);
        }
        debug!(count = stubs.len(), "fetching sub-pages");
        let mut fetched = join_all(stubs.iter().map(|t| self.api.page_html(t)))
            .await
            .into_iter();
        for chapter in &mut kept {
            let subpages = std::mem::take(&mut chapter.chapters);
            for mut subpage in subpages {
                let Some(html) = fetched.next() else { break };
                let Some(parser) = self.chapter_parser(&subpage.title, html)? else {
                    continue;
                };
                self.absorb(&mut subpage, parser, pictures, source_pages, session);
                chapter.chapters.push(subpage);
            }
        }
        Ok(kept)
    }

    /// Parse a fetched chapter; `None` for missing or excluded pages.
    fn chapter_parser(&self, title: &str, html: Result<String, ApiError>) -> Result<Option<PageParser>, ApiError> {
        let html = match html {
            Ok(html) => html,
            Err(ApiError::NotFound { .. }) => {
                warn!(%title, "linked page does not exist, skipping");
                return Ok(None);
            }
            Err(e) => return Err(e),
        };
        let parser = PageParser::parse(&html).with_domain(self.api.domain());
        if parser.metadata_is_set(EXCLUDE_FLAG) {
            debug!(%title, "page excluded from export");
            return Ok(None);
        }
        Ok(Some(parser))
    }

    fn absorb(
        &self,
        page: &mut Page,
        mut parser: PageParser,
        pictures: &mut BTreeMap<String, Picture>,
        source_pages: &mut Vec<String>,
        session: &mut ExportSession,
    ) {
        if self.options.images {
            merge_pictures(pictures, parser.pictures_list());
        }
        for p in parser.pages_list() {
            if !source_pages.contains(&p) {
                source_pages.push(p);
            }
        }
        page.content = Some(parser.into_content(&page.title, false, &mut session.ids));
    }

    async fn categories(&self, titles: &[String]) -> Vec<String> {
        match self.api.categories(titles).await {
            Ok(categories) => categories,
            Err(e) => {
                warn!(error = %e, "could not fetch categories");
                Vec::new()
            }
        }
    }

    /// Best effort: failures leave the credits empty.
    async fn credits(&self, pages: &[String], pictures: &BTreeMap<String, Picture>) -> Vec<Contributor> {
        let Some(source) = self.credits else {
            return Vec::new();
        };
        let mut images: Vec<String> = pictures.values().map(|p| p.name.clone()).collect();
        images.sort();
        images.dedup();
        let (page_rows, image_rows) = futures::join!(
            source.page_credits(self.api.lang(), pages),
            source.image_credits(&images)
        );
        let mut rows = Vec::new();
        match page_rows {
            Ok(r) => rows.extend(r),
            Err(e) => warn!(error = %e, "could not fetch page credits"),
        }
        match image_rows {
            Ok(r) => rows.extend(r),
            Err(e) => warn!(error = %e, "could not fetch image credits"),
        }
        merge_credits(rows)
    }
}

fn merge_pictures(into: &mut BTreeMap<String, Picture>, from: BTreeMap<String, Picture>) {
    for (key, picture) in from {
        into.entry(key).or_insert(picture);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::testing::FakeWiki;
    use crate::api::ImageInfo;
    use async_trait::async_trait;

    struct FixedCredits;

    #[async_trait]
    impl CreditsSource for FixedCredits {
        async fn page_credits(&self, _lang: &str, titles: &[String]) -> Result<Vec<CreditRow>, ApiError> {
            Ok(vec![CreditRow {
                name: "Editor".to_string(),
                count: titles.len() as u64,
                bot: false,
            }])
        }

        async fn image_credits(&self, _names: &[String]) -> Result<Vec<CreditRow>, ApiError> {
            Err(ApiError::Malformed {
                url: "credits".to_string(),
                reason: "down".to_string(),
            })
        }
    }

    fn sample_wiki() -> FakeWiki {
        let mut wiki = FakeWiki::new()
            .page(
                "Foo",
                "<div id=\"ws-data\" style=\"display:none\"><span id=\"ws-title\">The Foo</span>\
                 <span id=\"ws-author\">Ann Author</span><span id=\"ws-cover\">Cover.jpg</span></div>\
                 <div id=\"ws-summary\"><a href=\"./Foo/Bar\">Bar</a> <a href=\"./Foo/Skip\">Skip</a>\
                 <a href=\"./Foo/Gone\">Gone</a> <a href=\"./Author:Ann\">Ann</a></div>",
            )
            .page(
                "Foo/Bar",
                "<p>Chapter <a href=\"./Foo/Bar/1\">one</a> <a href=\"./Foo\">up</a></p>\
                 <img src=\"//upload.wikimedia.org/wikipedia/commons/thumb/a/ab/X.jpg/220px-X.jpg\"/>",
            )
            .page("Foo/Bar/1", "<p>Section</p><span class=\"ws-pagenum\" data-page-name=\"Page:Foo.djvu/3\"></span>")
            .page("Foo/Skip", "<span id=\"ws-exclude\"></span><p>hidden</p>");
        wiki.images.insert(
            "Cover.jpg".to_string(),
            ImageInfo {
                url: "https://upload.wikimedia.org/wikipedia/commons/c/c0/Cover.jpg".to_string(),
                mimetype: "image/jpeg".to_string(),
                canonical_name: "Cover.jpg".to_string(),
            },
        );
        wiki.categories = vec!["Novels".to_string()];
        wiki
    }

    #[tokio::test]
    async fn book_with_chapter_and_subpage() {
        let wiki = sample_wiki();
        let credits = FixedCredits;
        let mut session = ExportSession::new().unwrap();
        let provider = BookProvider::new(&wiki, BookOptions::default()).with_credits(&credits);
        let book = provider.get("Foo", &mut session).await.unwrap();

        assert_eq!(book.name, "The Foo");
        assert_eq!(book.author, "Ann Author");
        assert_eq!(book.chapters.len(), 1);
        let chapter = &book.chapters[0];
        assert_eq!(chapter.title, "Foo/Bar");
        assert_eq!(chapter.name, "Bar");
        assert!(chapter.content.is_some());
        assert_eq!(chapter.chapters.len(), 1);
        assert_eq!(chapter.chapters[0].title, "Foo/Bar/1");
        assert_eq!(book.categories, vec!["Novels"]);

        assert_eq!(book.cover, "Cover.jpg");
        assert!(book.pictures.contains_key("220px-X.jpg"));
        assert!(book.pictures.values().all(|p| p.file.is_some()));

        // pages: book, chapter, sub-page, one proofread page
        assert_eq!(book.credits.len(), 1);
        assert_eq!(book.credits[0].count, 4);
    }

    #[tokio::test]
    async fn excluded_and_missing_pages_are_skipped() {
        let wiki = sample_wiki();
        let mut session = ExportSession::new().unwrap();
        let provider = BookProvider::new(&wiki, BookOptions::default());
        let book = provider.get("Foo", &mut session).await.unwrap();
        let titles: Vec<_> = book.pages().iter().map(|p| p.title.clone()).collect();
        assert!(!titles.iter().any(|t| t == "Foo/Skip" || t == "Foo/Gone"));
        assert!(book.credits.is_empty());
    }

    #[tokio::test]
    async fn metadata_only_fetches_no_chapters() {
        let wiki = sample_wiki();
        let mut session = ExportSession::new().unwrap();
        let provider = BookProvider::new(&wiki, BookOptions::default());
        let books = provider
            .get_multi(&["Foo".to_string(), "Missing".to_string()], true, &mut session)
            .await
            .unwrap();
        assert_eq!(books.len(), 1);
        assert!(books[0].chapters.is_empty());
        assert!(books[0].content.is_none());
        assert_eq!(books[0].cover, "Cover.jpg");
        assert_eq!(wiki.requests(), vec!["Foo", "Missing"]);
    }

    #[tokio::test]
    async fn images_disabled_keeps_only_cover() {
        let wiki = sample_wiki();
        let mut session = ExportSession::new().unwrap();
        let options = BookOptions {
            images: false,
            ..BookOptions::default()
        };
        let book = BookProvider::new(&wiki, options)
            .get("Foo", &mut session)
            .await
            .unwrap();
        assert_eq!(book.pictures.keys().collect::<Vec<_>>(), vec!["Cover.jpg"]);
    }

    #[tokio::test]
    async fn missing_book_is_not_found() {
        let wiki = FakeWiki::new();
        let mut session = ExportSession::new().unwrap();
        let err = BookProvider::new(&wiki, BookOptions::default())
            .get("Nope", &mut session)
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::NotFound { .. }));
    }

    #[tokio::test]
    async fn progress_callback_may_borrow_locals() {
        let wiki = sample_wiki();
        let mut session = ExportSession::new().unwrap();
        let calls = parking_lot::Mutex::new(Vec::new());
        let report = |done: usize, total: usize| calls.lock().push((done, total));
        let book = BookProvider::new(&wiki, BookOptions::default())
            .with_progress(&report)
            .get("Foo", &mut session)
            .await
            .unwrap();
        let calls = calls.into_inner();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls.last(), Some(&(2, 2)));
        assert_eq!(book.pictures.len(), 2);
    }

    #[tokio::test]
    async fn absolute_summary_links_and_empty_summary() {
        let wiki = FakeWiki::new()
            .page(
                "Foo",
                "<div id=\"ws-summary\"><a href=\"https://en.wikisource.org/wiki/Foo/Bar\">Bar</a></div>",
            )
            .page("Foo/Bar", "<div id=\"ws-summary\"></div><p><a href=\"./Foo/Bar/1\">1</a></p>")
            .page("Foo/Bar/1", "<p>Section</p>");
        let mut session = ExportSession::new().unwrap();
        let book = BookProvider::new(&wiki, BookOptions::default())
            .get("Foo", &mut session)
            .await
            .unwrap();
        assert_eq!(book.chapters.len(), 1);
        assert_eq!(book.chapters[0].title, "Foo/Bar");
        assert_eq!(book.chapters[0].chapters.len(), 1);
        assert_eq!(book.chapters[0].chapters[0].title, "Foo/Bar/1");
    }

    #[tokio::test]
    async fn metadata_page_overrides_fields() {
        let wiki = FakeWiki::new()
            .page("Vol_1", "<span id=\"ws-metadata\">Series</span><p>text</p>")
            .page("Series", "<span id=\"ws-author\">Series Author</span><span id=\"ws-title\">Series</span>");
        let mut session = ExportSession::new().unwrap();
        let book = BookProvider::new(&wiki, BookOptions::default())
            .get("Vol 1", &mut session)
            .await
            .unwrap();
        assert_eq!(book.author, "Series Author");
        assert_eq!(book.title, "Vol_1");
    }
}
