//! Optional config file loading. Search order: ./wsexport.toml, then
//! $XDG_CONFIG_HOME/wsexport/config.toml (or ~/.config/wsexport/config.toml).

use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::fonts::FontFiles;

/// Config file contents. All fields optional; only present keys override defaults.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "snake_case", default)]
pub struct Config {
    /// Default output directory when -o is not set. Paths are relative to CWD.
    pub output_dir: Option<PathBuf>,
    /// HTTP User-Agent header.
    pub user_agent: Option<String>,
    /// Request timeout in seconds.
    pub timeout_secs: Option<u64>,
    pub connect_timeout_secs: Option<u64>,
    /// Number of HTTP attempts for transient failures (default 3).
    pub retry_count: Option<u32>,
    /// Delay in seconds before each retry (e.g. [1, 2]).
    pub retry_backoff_secs: Option<Vec<u64>>,
    /// Lifetime of cached API responses.
    pub cache_ttl_secs: Option<u64>,
    /// Lifetime of the on-disk about page and stylesheet copies.
    pub asset_cache_ttl_secs: Option<u64>,
    /// Picture downloads in flight at once (default 10).
    pub image_concurrency: Option<usize>,
    pub split_threshold_bytes: Option<usize>,
    pub split_margin_bytes: Option<usize>,
    /// Contributor statistics service. Credits are skipped when unset.
    pub credits_endpoint: Option<String>,
    /// External converter for non-EPUB formats (default ebook-convert).
    pub convert_command: Option<String>,
    pub convert_timeout_secs: Option<u64>,
    pub max_concurrent_conversions: Option<usize>,
    /// Wiki host override, e.g. a mirror.
    pub domain: Option<String>,
    /// Base URL of the acquisition links written in feeds.
    pub feed_export_url: Option<String>,
    /// `[fonts.<Family>]` tables.
    pub fonts: BTreeMap<String, FontFiles>,
}

/// Search order: (1) ./wsexport.toml, (2) $XDG_CONFIG_HOME/wsexport/config.toml.
/// Missing file returns Ok(None). Invalid TOML or I/O error reading a present file returns Err.
pub fn load_config() -> Result<Option<Config>, String> {
    let cwd = std::env::current_dir()
        .map_err(|e| format!("Cannot determine current directory: {}", e))?;
    let mut paths = vec![cwd.join("wsexport.toml")];
    if let Some(d) = dirs::config_dir() {
        paths.push(d.join("wsexport").join("config.toml"));
    }
    for path in &paths {
        if path.exists() {
            let s = std::fs::read_to_string(path)
                .map_err(|e| format!("Cannot read config {}: {}", path.display(), e))?;
            let config: Config = toml::from_str(&s)
                .map_err(|e| format!("Invalid config {}: {}", path.display(), e))?;
            return Ok(Some(config));
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_empty_config() {
        let c: Config = toml::from_str("").unwrap();
        assert!(c.output_dir.is_none());
        assert!(c.user_agent.is_none());
        assert!(c.timeout_secs.is_none());
        assert!(c.retry_count.is_none());
        assert!(c.retry_backoff_secs.is_none());
        assert!(c.credits_endpoint.is_none());
        assert!(c.fonts.is_empty());
    }

    #[test]
    fn parse_full_config() {
        let s = r#"
            output_dir = "out"
            user_agent = "Custom/1.0"
            timeout_secs = 60
            connect_timeout_secs = 5
            retry_count = 5
            retry_backoff_secs = [1, 2, 4, 8]
            cache_ttl_secs = 30
            asset_cache_ttl_secs = 3600
            image_concurrency = 4
            split_threshold_bytes = 100000
            split_margin_bytes = 2000
            credits_endpoint = "https://credits.example.org/"
            convert_command = "/opt/calibre/ebook-convert"
            convert_timeout_secs = 300
            max_concurrent_conversions = 1
            domain = "wikisource.example.org"
            feed_export_url = "https://export.example.org/"
        "#;
        let c: Config = toml::from_str(s).unwrap();
        assert_eq!(c.output_dir.as_deref(), Some(std::path::Path::new("out")));
        assert_eq!(c.user_agent.as_deref(), Some("Custom/1.0"));
        assert_eq!(c.timeout_secs, Some(60));
        assert_eq!(c.connect_timeout_secs, Some(5));
        assert_eq!(c.retry_count, Some(5));
        assert_eq!(
            c.retry_backoff_secs.as_deref(),
            Some([1, 2, 4, 8].as_slice())
        );
        assert_eq!(c.image_concurrency, Some(4));
        assert_eq!(c.split_threshold_bytes, Some(100_000));
        assert_eq!(c.convert_timeout_secs, Some(300));
        assert_eq!(c.max_concurrent_conversions, Some(1));
        assert_eq!(c.domain.as_deref(), Some("wikisource.example.org"));
    }

    #[test]
    fn parse_font_tables() {
        let s = r#"
            [fonts.Linux-Libertine]
            regular = "/usr/share/fonts/LinLibertine_R.otf"
            italic = "/usr/share/fonts/LinLibertine_RI.otf"
        "#;
        let c: Config = toml::from_str(s).unwrap();
        let family = &c.fonts["Linux-Libertine"];
        assert_eq!(family.regular, PathBuf::from("/usr/share/fonts/LinLibertine_R.otf"));
        assert!(family.bold.is_none());
        assert!(family.italic.is_some());
    }

    #[test]
    fn font_without_regular_is_rejected() {
        assert!(toml::from_str::<Config>("[fonts.X]\nbold = \"b.ttf\"").is_err());
    }

    #[test]
    fn invalid_toml_errors() {
        assert!(toml::from_str::<Config>("output_dir = [").is_err());
    }
}
