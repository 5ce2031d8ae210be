//! Access to one Wikisource language edition: page HTML, raw wikitext, site info,
//! categories, image info and media downloads.

mod client;
mod error;

pub use client::{PoliteClient, PoliteClientBuilder};
pub use error::ApiError;

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use reqwest::Url;
use serde::Deserialize;
use tempfile::TempPath;
use tokio::sync::OnceCell;
use tracing::debug;

/// Characters kept verbatim in REST title path segments. `/` must be escaped.
const TITLE_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~')
    .remove(b':')
    .remove(b'(')
    .remove(b')')
    .remove(b',');

/// Titles per `prop=categories` request (API limit for anonymous clients).
const TITLES_PER_QUERY: usize = 50;

/// Host name serving a language edition. `www`, `mul` and the empty code are the multilingual wiki.
pub fn wiki_domain(lang: &str) -> String {
    match lang.trim() {
        "" | "www" | "mul" => "wikisource.org".to_string(),
        lang => format!("{}.wikisource.org", lang.to_ascii_lowercase()),
    }
}

/// Canonical title form: trimmed, spaces as underscores, first letter upper-cased.
pub fn normalize_title(title: &str) -> String {
    let trimmed = title.trim().replace(' ', "_");
    let mut chars = trimmed.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Reduce a MIME type to `type/subtype`, dropping parameters.
pub fn simplify_mimetype(mime: &str) -> String {
    mime.split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase()
}

/// Make a media or page URL absolute: protocol-relative URLs get https, root-relative
/// ones are resolved against `domain`.
pub fn absolute_url(url: &str, domain: &str) -> String {
    if let Some(rest) = url.strip_prefix("//") {
        format!("https://{rest}")
    } else if url.starts_with('/') {
        format!("https://{domain}{url}")
    } else {
        url.to_string()
    }
}

/// One namespace from site info.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Namespace {
    pub id: i32,
    pub name: String,
    pub canonical: Option<String>,
    pub content: bool,
}

/// Namespace table of a wiki, with aliases.
#[derive(Debug, Clone, Default)]
pub struct Namespaces {
    entries: Vec<Namespace>,
    aliases: Vec<(i32, String)>,
}

fn fold_prefix(s: &str) -> String {
    s.trim().replace('_', " ").to_lowercase()
}

impl Namespaces {
    pub fn new(entries: Vec<Namespace>, aliases: Vec<(i32, String)>) -> Self {
        Self { entries, aliases }
    }

    fn lookup(&self, prefix: &str) -> Option<&Namespace> {
        let folded = fold_prefix(prefix);
        if folded.is_empty() {
            return None;
        }
        let by_name = self.entries.iter().find(|ns| {
            fold_prefix(&ns.name) == folded
                || ns.canonical.as_deref().map(fold_prefix).as_deref() == Some(folded.as_str())
        });
        by_name.or_else(|| {
            let id = self
                .aliases
                .iter()
                .find(|(_, alias)| fold_prefix(alias) == folded)
                .map(|(id, _)| *id)?;
            self.entries.iter().find(|ns| ns.id == id)
        })
    }

    /// Split `Prefix:Rest` when `Prefix` is a known namespace.
    pub fn split<'a>(&self, title: &'a str) -> Option<(&Namespace, &'a str)> {
        let (prefix, rest) = title.split_once(':')?;
        self.lookup(prefix).map(|ns| (ns, rest))
    }

    /// True when the title lives in a namespace not flagged as content.
    pub fn is_non_content(&self, title: &str) -> bool {
        matches!(self.split(title), Some((ns, _)) if !ns.content)
    }

    /// Title without its namespace prefix, if any.
    pub fn strip_prefix<'a>(&self, title: &'a str) -> &'a str {
        self.split(title).map(|(_, rest)| rest).unwrap_or(title)
    }

    pub fn get(&self, id: i32) -> Option<&Namespace> {
        self.entries.iter().find(|ns| ns.id == id)
    }

    /// Local name of the scan index namespace, `Index` when the wiki has none.
    pub fn index_name(&self) -> &str {
        self.entries
            .iter()
            .find(|ns| ns.canonical.as_deref() == Some("Index"))
            .map(|ns| ns.name.as_str())
            .unwrap_or("Index")
    }
}

/// Resolved media file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageInfo {
    /// Thumbnail URL when a size or page was requested, otherwise the original.
    pub url: String,
    pub mimetype: String,
    /// File name without namespace prefix.
    pub canonical_name: String,
}

/// A downloaded media file, deleted when dropped.
#[derive(Debug)]
pub struct Download {
    pub path: TempPath,
    pub mimetype: String,
}

/// Everything the book provider needs from a wiki.
#[async_trait]
pub trait Fetcher: Send + Sync {
    fn lang(&self) -> &str;

    fn domain(&self) -> &str;

    /// Rendered (Parsoid) HTML of a page. Missing pages yield [`ApiError::NotFound`].
    async fn page_html(&self, title: &str) -> Result<String, ApiError>;

    /// Raw source of a page, `None` if it does not exist.
    async fn raw_page(&self, title: &str) -> Result<Option<String>, ApiError>;

    async fn namespaces(&self) -> Result<Namespaces, ApiError>;

    /// Visible (non-hidden) categories of the given pages, without prefix, de-duplicated.
    async fn categories(&self, titles: &[String]) -> Result<Vec<String>, ApiError>;

    /// Main-namespace members of a category.
    async fn category_members(&self, category: &str) -> Result<Vec<String>, ApiError>;

    /// Image info for a file, optionally rendered at `width` with a page/size parameter.
    async fn image_info(
        &self,
        file: &str,
        thumb_param: Option<&str>,
        width: u32,
    ) -> Result<Option<ImageInfo>, ApiError>;

    /// Download `url` into a new file inside `dir`.
    async fn download(&self, url: &str, dir: &Path) -> Result<Download, ApiError>;
}

/// [`Fetcher`] backed by the MediaWiki action API and the REST API.
#[derive(Debug, Clone)]
pub struct Api {
    lang: String,
    domain: String,
    client: Arc<PoliteClient>,
    namespaces: Arc<OnceCell<Namespaces>>,
}

impl Api {
    pub fn new(lang: &str, client: Arc<PoliteClient>) -> Self {
        Self::with_domain(lang, &wiki_domain(lang), client)
    }

    /// Override the host, e.g. for a mirror or a test wiki.
    pub fn with_domain(lang: &str, domain: &str, client: Arc<PoliteClient>) -> Self {
        Self {
            lang: lang.to_string(),
            domain: domain.to_string(),
            client,
            namespaces: Arc::new(OnceCell::new()),
        }
    }

    pub fn client(&self) -> &PoliteClient {
        &self.client
    }

    fn action_url(&self, params: &[(&str, &str)]) -> Result<String, ApiError> {
        let base = format!("https://{}/w/api.php", self.domain);
        let mut all: Vec<(&str, &str)> = vec![("format", "json"), ("formatversion", "2")];
        all.extend_from_slice(params);
        Url::parse_with_params(&base, &all)
            .map(|u| u.to_string())
            .map_err(|e| ApiError::InvalidUrl {
                input: base,
                reason: e.to_string(),
            })
    }

    fn not_found(&self, title: &str) -> ApiError {
        ApiError::NotFound {
            title: title.to_string(),
            domain: self.domain.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct QueryResponse<T> {
    query: Option<T>,
    #[serde(rename = "continue")]
    cont: Option<HashMap<String, serde_json::Value>>,
}

#[derive(Debug, Deserialize)]
struct SiteInfoQuery {
    namespaces: HashMap<String, NamespaceEntry>,
    #[serde(default)]
    namespacealiases: Vec<NamespaceAlias>,
}

#[derive(Debug, Deserialize)]
struct NamespaceEntry {
    id: i32,
    name: String,
    #[serde(default)]
    canonical: Option<String>,
    #[serde(default)]
    content: bool,
}

#[derive(Debug, Deserialize)]
struct NamespaceAlias {
    id: i32,
    alias: String,
}

#[derive(Debug, Deserialize)]
struct PagesQuery {
    #[serde(default)]
    pages: Vec<PageEntry>,
}

#[derive(Debug, Deserialize)]
struct PageEntry {
    #[serde(default)]
    invalid: bool,
    #[serde(default)]
    categories: Vec<TitleEntry>,
    #[serde(default)]
    imageinfo: Vec<ImageInfoEntry>,
}

#[derive(Debug, Deserialize)]
struct TitleEntry {
    title: String,
}

#[derive(Debug, Deserialize)]
struct ImageInfoEntry {
    url: Option<String>,
    mime: Option<String>,
    thumburl: Option<String>,
    thumbmime: Option<String>,
    canonicaltitle: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CategoryMembersQuery {
    #[serde(default)]
    categorymembers: Vec<TitleEntry>,
}

fn without_prefix(title: &str) -> &str {
    title.split_once(':').map(|(_, rest)| rest).unwrap_or(title)
}

#[async_trait]
impl Fetcher for Api {
    fn lang(&self) -> &str {
        &self.lang
    }

    fn domain(&self) -> &str {
        &self.domain
    }

    async fn page_html(&self, title: &str) -> Result<String, ApiError> {
        let encoded = utf8_percent_encode(&normalize_title(title), TITLE_SEGMENT).to_string();
        let url = format!("https://{}/api/rest_v1/page/html/{}", self.domain, encoded);
        match self.client.get_text(&url, "page html").await {
            Err(e) if e.status() == Some(404) => Err(self.not_found(title)),
            other => other,
        }
    }

    async fn raw_page(&self, title: &str) -> Result<Option<String>, ApiError> {
        let base = format!("https://{}/w/index.php", self.domain);
        let title = normalize_title(title);
        let url = Url::parse_with_params(&base, &[("title", title.as_str()), ("action", "raw")])
            .map_err(|e| ApiError::InvalidUrl {
                input: base.clone(),
                reason: e.to_string(),
            })?;
        match self.client.get_text(url.as_str(), "raw page").await {
            Ok(body) => Ok(Some(body)),
            Err(e) if e.status() == Some(404) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn namespaces(&self) -> Result<Namespaces, ApiError> {
        let namespaces = self
            .namespaces
            .get_or_try_init(|| async {
                let url = self.action_url(&[
                    ("action", "query"),
                    ("meta", "siteinfo"),
                    ("siprop", "namespaces|namespacealiases"),
                ])?;
                let response: QueryResponse<SiteInfoQuery> =
                    self.client.get_json(&url, "siteinfo").await?;
                let query = response.query.ok_or_else(|| ApiError::Malformed {
                    url: url.clone(),
                    reason: "missing query".to_string(),
                })?;
                let mut entries: Vec<Namespace> = query
                    .namespaces
                    .into_values()
                    .map(|ns| Namespace {
                        id: ns.id,
                        name: ns.name,
                        canonical: ns.canonical,
                        content: ns.content,
                    })
                    .collect();
                entries.sort_by_key(|ns| ns.id);
                let aliases = query
                    .namespacealiases
                    .into_iter()
                    .map(|a| (a.id, a.alias))
                    .collect();
                debug!(count = entries.len(), domain = %self.domain, "loaded namespaces");
                Ok::<_, ApiError>(Namespaces::new(entries, aliases))
            })
            .await?;
        Ok(namespaces.clone())
    }

    async fn categories(&self, titles: &[String]) -> Result<Vec<String>, ApiError> {
        let mut out: Vec<String> = Vec::new();
        for batch in titles.chunks(TITLES_PER_QUERY) {
            let joined = batch.join("|");
            let url = self.action_url(&[
                ("action", "query"),
                ("prop", "categories"),
                ("clshow", "!hidden"),
                ("cllimit", "max"),
                ("titles", &joined),
            ])?;
            let response: QueryResponse<PagesQuery> =
                self.client.get_json(&url, "categories").await?;
            for page in response.query.map(|q| q.pages).unwrap_or_default() {
                for cat in page.categories {
                    let name = without_prefix(&cat.title).to_string();
                    if !out.contains(&name) {
                        out.push(name);
                    }
                }
            }
        }
        Ok(out)
    }

    async fn category_members(&self, category: &str) -> Result<Vec<String>, ApiError> {
        let category = format!("Category:{}", without_prefix(category.trim()));
        let mut members = Vec::new();
        let mut cont: Option<String> = None;
        loop {
            let mut params = vec![
                ("action", "query"),
                ("list", "categorymembers"),
                ("cmtitle", category.as_str()),
                ("cmnamespace", "0"),
                ("cmlimit", "max"),
            ];
            if let Some(c) = cont.as_deref() {
                params.push(("cmcontinue", c));
            }
            let url = self.action_url(&params)?;
            let response: QueryResponse<CategoryMembersQuery> =
                self.client.get_json(&url, "category members").await?;
            members.extend(
                response
                    .query
                    .map(|q| q.categorymembers)
                    .unwrap_or_default()
                    .into_iter()
                    .map(|m| normalize_title(&m.title)),
            );
            cont = response
                .cont
                .and_then(|c| c.get("cmcontinue").and_then(|v| v.as_str()).map(String::from));
            if cont.is_none() {
                break;
            }
        }
        Ok(members)
    }

    async fn image_info(
        &self,
        file: &str,
        thumb_param: Option<&str>,
        width: u32,
    ) -> Result<Option<ImageInfo>, ApiError> {
        let title = format!("File:{}", without_prefix(file.trim()));
        let width = width.to_string();
        let mut params = vec![
            ("action", "query"),
            ("prop", "imageinfo"),
            ("iiprop", "url|mime|canonicaltitle"),
            ("iiurlwidth", width.as_str()),
            ("titles", title.as_str()),
        ];
        if let Some(p) = thumb_param {
            params.push(("iiurlparam", p));
        }
        let url = self.action_url(&params)?;
        let response: QueryResponse<PagesQuery> = self.client.get_json(&url, "imageinfo").await?;
        let Some(page) = response.query.and_then(|q| q.pages.into_iter().next()) else {
            return Ok(None);
        };
        if page.invalid {
            return Ok(None);
        }
        // a missing local page may still resolve to a shared file, which carries imageinfo
        let Some(info) = page.imageinfo.into_iter().next() else {
            return Ok(None);
        };
        let Some(url) = info.thumburl.or(info.url) else {
            return Ok(None);
        };
        let mimetype = info
            .thumbmime
            .or(info.mime)
            .map(|m| simplify_mimetype(&m))
            .unwrap_or_default();
        let canonical_name = info
            .canonicaltitle
            .map(|t| without_prefix(&t).to_string())
            .unwrap_or_else(|| without_prefix(&title).to_string());
        Ok(Some(ImageInfo {
            url: absolute_url(&url, &self.domain),
            mimetype,
            canonical_name,
        }))
    }

    async fn download(&self, url: &str, dir: &Path) -> Result<Download, ApiError> {
        let (bytes, content_type) = self.client.get_bytes(url).await?;
        let path = write_temp(dir, &bytes)?;
        let mimetype = content_type
            .map(|m| simplify_mimetype(&m))
            .unwrap_or_else(|| "application/octet-stream".to_string());
        Ok(Download { path, mimetype })
    }
}

/// Store bytes in a new temporary file under `dir`.
pub(crate) fn write_temp(dir: &Path, bytes: &[u8]) -> Result<TempPath, ApiError> {
    use std::io::Write;
    let io_err = |source| ApiError::Io {
        path: dir.to_path_buf(),
        source,
    };
    let mut file = tempfile::Builder::new()
        .prefix("media-")
        .tempfile_in(dir)
        .map_err(io_err)?;
    file.write_all(bytes).map_err(io_err)?;
    Ok(file.into_temp_path())
}

/// Decode a percent-encoded URL component, lossily.
pub fn decode_component(s: &str) -> String {
    percent_decode_str(s).decode_utf8_lossy().into_owned()
}

/// In-memory wiki used by unit tests across the crate.
#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Debug, Default)]
    pub struct FakeWiki {
        pub pages: HashMap<String, String>,
        pub raw: HashMap<String, String>,
        pub categories: Vec<String>,
        pub members: Vec<String>,
        pub images: HashMap<String, ImageInfo>,
        pub fail_downloads: bool,
        pub requested: Mutex<Vec<String>>,
    }

    impl FakeWiki {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn page(mut self, title: &str, body: &str) -> Self {
            self.pages.insert(
                normalize_title(title),
                format!("<!DOCTYPE html><html><head><title>{title}</title></head><body>{body}</body></html>"),
            );
            self
        }

        pub fn requests(&self) -> Vec<String> {
            self.requested.lock().clone()
        }
    }

    pub fn namespaces() -> Namespaces {
        let ns = |id, name: &str, content| Namespace {
            id,
            name: name.to_string(),
            canonical: Some(name.to_string()),
            content,
        };
        Namespaces::new(
            vec![
                Namespace {
                    id: 0,
                    name: String::new(),
                    canonical: None,
                    content: true,
                },
                ns(2, "User", false),
                ns(4, "Wikisource", false),
                ns(6, "File", false),
                ns(14, "Category", false),
                ns(102, "Author", false),
                ns(104, "Page", false),
                ns(106, "Index", false),
            ],
            vec![(6, "Image".to_string())],
        )
    }

    #[async_trait]
    impl Fetcher for FakeWiki {
        fn lang(&self) -> &str {
            "en"
        }

        fn domain(&self) -> &str {
            "en.wikisource.org"
        }

        async fn page_html(&self, title: &str) -> Result<String, ApiError> {
            let title = normalize_title(title);
            self.requested.lock().push(title.clone());
            self.pages.get(&title).cloned().ok_or(ApiError::NotFound {
                title,
                domain: "en.wikisource.org".to_string(),
            })
        }

        async fn raw_page(&self, title: &str) -> Result<Option<String>, ApiError> {
            Ok(self.raw.get(title).cloned())
        }

        async fn namespaces(&self) -> Result<Namespaces, ApiError> {
            Ok(namespaces())
        }

        async fn categories(&self, _titles: &[String]) -> Result<Vec<String>, ApiError> {
            Ok(self.categories.clone())
        }

        async fn category_members(&self, _category: &str) -> Result<Vec<String>, ApiError> {
            Ok(self.members.clone())
        }

        async fn image_info(
            &self,
            file: &str,
            _thumb_param: Option<&str>,
            _width: u32,
        ) -> Result<Option<ImageInfo>, ApiError> {
            Ok(self.images.get(without_prefix(file)).cloned())
        }

        async fn download(&self, url: &str, dir: &Path) -> Result<Download, ApiError> {
            if self.fail_downloads {
                return Err(ApiError::HttpStatus {
                    status: 503,
                    url: url.to_string(),
                    context: Some("download".to_string()),
                });
            }
            let path = write_temp(dir, url.as_bytes())?;
            let mimetype = if url.ends_with(".png") {
                "image/png"
            } else {
                "image/jpeg"
            };
            Ok(Download {
                path,
                mimetype: mimetype.to_string(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_for_multilingual_codes() {
        assert_eq!(wiki_domain("fr"), "fr.wikisource.org");
        assert_eq!(wiki_domain("www"), "wikisource.org");
        assert_eq!(wiki_domain("mul"), "wikisource.org");
        assert_eq!(wiki_domain(""), "wikisource.org");
    }

    #[test]
    fn titles_are_normalized() {
        assert_eq!(normalize_title(" foo bar/baz "), "Foo_bar/baz");
        assert_eq!(normalize_title("éte"), "Éte");
        assert_eq!(normalize_title(""), "");
    }

    #[test]
    fn namespaces_resolve_names_and_aliases() {
        let ns = testing::namespaces();
        assert!(ns.is_non_content("Author:Victor_Hugo"));
        assert!(ns.is_non_content("image:X.jpg"));
        assert!(ns.is_non_content("Page:Book.djvu/12"));
        assert!(!ns.is_non_content("Les_Misérables"));
        assert!(!ns.is_non_content("Star Wars: A New Hope"));
        assert_eq!(ns.strip_prefix("Author:Victor_Hugo"), "Victor_Hugo");
        assert_eq!(ns.strip_prefix("Plain"), "Plain");
    }

    #[test]
    fn urls_are_made_absolute() {
        assert_eq!(
            absolute_url("//upload.wikimedia.org/a/ab/X.jpg", "en.wikisource.org"),
            "https://upload.wikimedia.org/a/ab/X.jpg"
        );
        assert_eq!(
            absolute_url("/w/index.php?title=X", "fr.wikisource.org"),
            "https://fr.wikisource.org/w/index.php?title=X"
        );
        assert_eq!(absolute_url("https://a.org/x", "b.org"), "https://a.org/x");
    }

    #[test]
    fn mimetypes_are_simplified() {
        assert_eq!(simplify_mimetype("image/JPEG; charset=binary"), "image/jpeg");
    }

    #[test]
    fn siteinfo_response_parses() {
        let json = r#"{"batchcomplete":true,"query":{"namespaces":{
            "0":{"id":0,"case":"first-letter","name":"","subpages":false,"content":true},
            "102":{"id":102,"case":"first-letter","name":"Auteur","canonical":"Author","subpages":false}
        },"namespacealiases":[{"id":6,"alias":"Image"}]}}"#;
        let parsed: QueryResponse<SiteInfoQuery> = serde_json::from_str(json).unwrap();
        let query = parsed.query.unwrap();
        assert_eq!(query.namespaces.len(), 2);
        assert!(query.namespaces["0"].content);
        assert!(!query.namespaces["102"].content);
        assert_eq!(query.namespaces["102"].canonical.as_deref(), Some("Author"));
    }
}
