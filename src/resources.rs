//! Bundled resources and the per-language wiki assets (about page, extra stylesheet).
//!
//! Wiki assets are cached on disk under `<cache dir>/wsexport/<lang>/` and refreshed
//! after the configured TTL. When the wiki cannot be reached a stale copy, then the
//! built-in default, is used.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tracing::{debug, warn};

use crate::api::{ApiError, Fetcher};
use crate::fonts::FontFamily;
use crate::parser::{IdRegistry, PageParser};

pub const MAIN_CSS: &str = include_str!("../resources/main.css");
pub const LOGO_SVG: &str = include_str!("../resources/logo.svg");

/// Wiki page holding the about-page template, rendered.
pub const ABOUT_PAGE: &str = "MediaWiki:Wsexport_about";
/// Wiki page holding extra CSS for exported books.
pub const STYLESHEET_PAGE: &str = "MediaWiki:Epub.css";

const DEFAULT_ASSET_TTL_SECS: u64 = 24 * 60 * 60;

fn default_about(domain: &str) -> String {
    format!(
        "<h2>About this digital edition</h2>\
         <p>This e-book comes from the online library <a href=\"https://{domain}\">Wikisource</a>. \
         This multilingual digital library, built by volunteers, is committed to developing a \
         free accessible collection of publications of every kind.</p>\
         <p>All texts are in the public domain or under a free license. They may be reused \
         for any purpose, including commercial use, under the terms of their licenses.</p>\
         <p>Errors may remain in the text. You can report them or correct them on \
         <a href=\"https://{domain}\">{domain}</a>.</p>"
    )
}

/// Everything the packager needs besides the book itself.
#[derive(Debug, Clone, Default)]
pub struct Assets {
    /// XHTML fragment placed before the credits on the about page.
    pub about: String,
    /// Wiki-provided CSS appended to [`MAIN_CSS`].
    pub stylesheet: String,
    pub font: Option<FontFamily>,
}

impl Assets {
    /// Built-in defaults only, no network access.
    pub fn builtin(domain: &str) -> Self {
        Self {
            about: default_about(domain),
            stylesheet: String::new(),
            font: None,
        }
    }

    /// Full stylesheet written as `main.css`.
    pub fn css(&self) -> String {
        let mut css = String::from(MAIN_CSS);
        if !self.stylesheet.trim().is_empty() {
            css.push('\n');
            css.push_str(&self.stylesheet);
        }
        if let Some(font) = &self.font {
            css.push('\n');
            css.push_str(&font.css());
        }
        css
    }
}

/// Disk cache for wiki assets.
#[derive(Debug, Clone)]
pub struct AssetCache {
    dir: Option<PathBuf>,
    ttl: Duration,
}

impl Default for AssetCache {
    fn default() -> Self {
        Self::new(Self::default_dir(), Duration::from_secs(DEFAULT_ASSET_TTL_SECS))
    }
}

impl AssetCache {
    pub fn new(dir: Option<PathBuf>, ttl: Duration) -> Self {
        Self { dir, ttl }
    }

    /// `<platform cache dir>/wsexport`.
    pub fn default_dir() -> Option<PathBuf> {
        dirs::cache_dir().map(|d| d.join("wsexport"))
    }

    fn path(&self, lang: &str, name: &str) -> Option<PathBuf> {
        let safe: String = name
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '.' { c } else { '_' })
            .collect();
        self.dir.as_ref().map(|d| d.join(lang).join(safe))
    }

    async fn read(path: &Path, max_age: Option<Duration>) -> Option<String> {
        let meta = tokio::fs::metadata(path).await.ok()?;
        if let Some(max_age) = max_age {
            let age = meta
                .modified()
                .ok()
                .and_then(|m| SystemTime::now().duration_since(m).ok())?;
            if age > max_age {
                return None;
            }
        }
        tokio::fs::read_to_string(path).await.ok()
    }

    /// Cached value when fresh, else `fetch`. A failed fetch falls back to a stale copy.
    pub async fn get_or_fetch<Fut>(&self, lang: &str, name: &str, fetch: impl FnOnce() -> Fut) -> Option<String>
    where
        Fut: Future<Output = Result<Option<String>, ApiError>>,
    {
        let path = self.path(lang, name);
        if let Some(path) = &path {
            if let Some(hit) = Self::read(path, Some(self.ttl)).await {
                debug!(path = %path.display(), "asset cache hit");
                return Some(hit);
            }
        }
        match fetch().await {
            Ok(Some(value)) => {
                if let Some(path) = &path {
                    if let Err(e) = store(path, &value).await {
                        warn!(path = %path.display(), error = %e, "could not cache asset");
                    }
                }
                Some(value)
            }
            Ok(None) => None,
            Err(e) => {
                warn!(asset = name, error = %e, "could not fetch asset");
                match &path {
                    Some(path) => Self::read(path, None).await,
                    None => None,
                }
            }
        }
    }
}

async fn store(path: &Path, value: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, value).await
}

/// Load the about template and the extra stylesheet for the wiki behind `api`.
pub async fn load_assets<F: Fetcher + ?Sized>(api: &F, cache: &AssetCache, font: Option<FontFamily>) -> Assets {
    let lang = api.lang().to_string();
    let about = cache
        .get_or_fetch(&lang, ABOUT_PAGE, || async {
            match api.page_html(ABOUT_PAGE).await {
                Ok(html) => Ok(Some(render_about(&html))),
                Err(ApiError::NotFound { .. }) => Ok(None),
                Err(e) => Err(e),
            }
        })
        .await
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| default_about(api.domain()));
    let stylesheet = cache
        .get_or_fetch(&lang, STYLESHEET_PAGE, || api.raw_page(STYLESHEET_PAGE))
        .await
        .unwrap_or_default();
    Assets {
        about,
        stylesheet,
        font,
    }
}

/// Clean a rendered about page down to its body markup.
fn render_about(html: &str) -> String {
    let mut ids = IdRegistry::default();
    let doc = PageParser::parse(html).into_content(ABOUT_PAGE, false, &mut ids);
    doc.body().map(|b| doc.inner_xhtml(b)).unwrap_or_default()
}
