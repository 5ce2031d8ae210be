//! CLI parsing and orchestration. Parses args, builds the client and generators from config
//! and flags, runs one export. Maps errors to exit codes.

use crate::api::{Api, PoliteClient};
use crate::config::{self, Config};
use crate::epub::{SplitOptions, DEFAULT_SPLIT_MARGIN, DEFAULT_SPLIT_THRESHOLD};
use crate::error::ExportError;
use crate::export::{output_file_name, ExportRequest, Exporter};
use crate::fonts::ConfigFontRegistry;
use crate::generator::{
    ConversionLimiter, FormatTag, GeneratorRegistry, GeneratorSettings, DEFAULT_CONVERT_COMMAND,
    DEFAULT_CONVERT_TIMEOUT_SECS, DEFAULT_EXPORT_URL,
};
use crate::model::BookOptions;
use crate::provider::{HttpCreditsSource, DEFAULT_IMAGE_CONCURRENCY};
use crate::resources::AssetCache;
use clap::Parser;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

const DEFAULT_ASSET_CACHE_TTL_SECS: u64 = 24 * 60 * 60;
const DEFAULT_MAX_CONVERSIONS: usize = 2;

/// CLI error carrying exit code and message.
#[derive(Debug, Error)]
pub enum CliRunError {
    #[error("{0}")]
    InvalidInput(String),

    #[error("{}", .0.user_message())]
    Export(#[from] ExportError),
}

impl CliRunError {
    pub fn exit_code(&self) -> i32 {
        match self {
            CliRunError::InvalidInput(_) => 1,
            CliRunError::Export(e) if e.is_user_error() => 1,
            CliRunError::Export(ExportError::Upstream(_)) => 2,
            CliRunError::Export(_) => 3,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "wsexport")]
#[command(about = "Export a Wikisource book to EPUB (or another format through an external converter)")]
#[command(
    after_help = "Config file keys (output_dir, user_agent, timeout_secs, retry_count, credits_endpoint, convert_command, [fonts.<Family>], ...) are read from ./wsexport.toml or the user config dir. CLI flags override config."
)]
pub struct Args {
    /// Title of the book's main page, or of a category with --category.
    pub title: String,

    /// Wikisource language code (en, fr, de, ...). `mul` is the multilingual wiki.
    #[arg(long, default_value = "en")]
    pub lang: String,

    /// Output format: epub, epub-2, epub-3, mobi, pdf-a4, pdf-a5, pdf-a6, pdf-letter, rtf, txt, htmlz, atom.
    #[arg(long, default_value = "epub-3", value_parser = parse_format)]
    pub format: FormatTag,

    /// Output path. Default: <output_dir>/<sanitized-title>.<ext>.
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Leave pictures out.
    #[arg(long)]
    pub no_images: bool,

    /// Include the contributor list on the about page (needs credits_endpoint in config).
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    pub credits: bool,

    /// Embed a font family declared in the config file.
    #[arg(long)]
    pub font: Option<String>,

    /// Treat TITLE as a category and write an OPDS feed of its books.
    #[arg(long)]
    pub category: bool,

    /// Suppress progress output (errors only).
    #[arg(short, long)]
    pub quiet: bool,

    /// Debug logging and the full error chain.
    #[arg(long)]
    pub verbose: bool,

    /// HTTP User-Agent (overrides config).
    #[arg(long)]
    pub user_agent: Option<String>,

    /// Request timeout in seconds (overrides config; default 60).
    #[arg(long)]
    pub timeout: Option<u64>,
}

fn parse_format(s: &str) -> Result<FormatTag, String> {
    FormatTag::parse(s).map_err(|e| e.to_string())
}

/// Ensure output path parent exists.
fn validate_output_path(path: &Path) -> Result<(), CliRunError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            return Err(CliRunError::InvalidInput(format!(
                "Cannot write output: {}: parent directory does not exist.",
                path.display()
            )));
        }
    }
    Ok(())
}

/// Format actually produced: --category always means a feed.
fn effective_format(args: &Args) -> FormatTag {
    if args.category {
        FormatTag::Atom
    } else {
        args.format
    }
}

fn output_path(args: &Args, config: &Config, format: FormatTag) -> PathBuf {
    match &args.output {
        Some(p) => p.clone(),
        None => {
            let dir = config.output_dir.clone().unwrap_or_else(|| PathBuf::from("."));
            dir.join(output_file_name(&args.title, format))
        }
    }
}

fn generator_settings(config: &Config) -> GeneratorSettings {
    GeneratorSettings {
        split: SplitOptions {
            threshold: config.split_threshold_bytes.unwrap_or(DEFAULT_SPLIT_THRESHOLD),
            margin: config.split_margin_bytes.unwrap_or(DEFAULT_SPLIT_MARGIN),
        },
        convert_command: config
            .convert_command
            .clone()
            .unwrap_or_else(|| DEFAULT_CONVERT_COMMAND.to_string()),
        convert_timeout: Duration::from_secs(
            config.convert_timeout_secs.unwrap_or(DEFAULT_CONVERT_TIMEOUT_SECS),
        ),
        limiter: ConversionLimiter::new(
            config.max_concurrent_conversions.unwrap_or(DEFAULT_MAX_CONVERSIONS),
        ),
        export_url: config
            .feed_export_url
            .clone()
            .unwrap_or_else(|| DEFAULT_EXPORT_URL.to_string()),
    }
}

fn build_client(args: &Args, config: &Config) -> Result<PoliteClient, CliRunError> {
    let mut builder = PoliteClient::builder();
    if let Some(ua) = args.user_agent.clone().or_else(|| config.user_agent.clone()) {
        builder = builder.user_agent(ua);
    }
    if let Some(secs) = args.timeout.or(config.timeout_secs) {
        builder = builder.timeout_secs(secs);
    }
    if let Some(secs) = config.connect_timeout_secs {
        builder = builder.connect_timeout_secs(secs);
    }
    if let Some(n) = config.retry_count {
        builder = builder.retry_count(n.max(1));
    }
    if let Some(backoff) = config.retry_backoff_secs.clone() {
        builder = builder.retry_backoff_secs(backoff);
    }
    if let Some(secs) = config.cache_ttl_secs {
        builder = builder.cache_ttl_secs(secs);
    }
    builder
        .build()
        .map_err(|e| CliRunError::InvalidInput(format!("Failed to create HTTP client: {}", e)))
}

fn progress_bar() -> indicatif::ProgressBar {
    let bar = indicatif::ProgressBar::new(0);
    if let Ok(style) = indicatif::ProgressStyle::default_bar()
        .template("{spinner} {msg} [{bar:40}] {pos}/{len} ({elapsed})")
    {
        bar.set_style(
            style
                .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏")
                .progress_chars("█▉▊▋▌▍▎▏ "),
        );
    }
    bar.enable_steady_tick(Duration::from_millis(80));
    bar
}

/// Entry point for the CLI. Returns Ok(()) on success; Err with exit code and message on failure.
pub async fn run(args: &Args) -> Result<(), CliRunError> {
    if args.title.trim().is_empty() {
        return Err(CliRunError::InvalidInput(
            "Expected a page title, e.g. \"Le_Tour_du_monde_en_quatre-vingts_jours\".".to_string(),
        ));
    }
    let config = config::load_config()
        .map_err(CliRunError::InvalidInput)?
        .unwrap_or_default();

    let format = effective_format(args);
    let output = output_path(args, &config, format);
    validate_output_path(&output)?;

    let client = Arc::new(build_client(args, &config)?);
    let api = match &config.domain {
        Some(domain) => Api::with_domain(&args.lang, domain, client.clone()),
        None => Api::new(&args.lang, client.clone()),
    };
    let registry = GeneratorRegistry::new(generator_settings(&config));
    let fonts = ConfigFontRegistry::new(config.fonts.clone());
    let credits = config
        .credits_endpoint
        .as_ref()
        .map(|endpoint| HttpCreditsSource::new(endpoint.clone(), client.clone()));
    let asset_cache = AssetCache::new(
        AssetCache::default_dir(),
        Duration::from_secs(config.asset_cache_ttl_secs.unwrap_or(DEFAULT_ASSET_CACHE_TTL_SECS)),
    );

    let bar: Mutex<Option<indicatif::ProgressBar>> = Mutex::new(None);
    let progress_cb = |done: usize, total: usize| {
        if total == 0 {
            return;
        }
        let mut state = bar.lock();
        let pb = state.get_or_insert_with(progress_bar);
        pb.set_length(total as u64);
        pb.set_position(done as u64);
        pb.set_message(format!("Downloading picture {}/{}", done, total));
    };

    let mut exporter = Exporter::new(&api, &registry, &fonts)
        .with_asset_cache(asset_cache)
        .with_image_concurrency(config.image_concurrency.unwrap_or(DEFAULT_IMAGE_CONCURRENCY));
    if let Some(source) = &credits {
        exporter = exporter.with_credits(source);
    }
    if !args.quiet {
        exporter = exporter.with_progress(&progress_cb);
    }

    let request = ExportRequest {
        title: args.title.clone(),
        format,
        options: BookOptions {
            images: !args.no_images,
            credits: args.credits,
            font: args.font.clone(),
        },
        output,
    };
    let result = exporter.export(&request).await;

    if let Some(pb) = bar.lock().take() {
        pb.disable_steady_tick();
        pb.finish_and_clear();
    }
    let outcome = result?;

    if !args.quiet {
        eprintln!("Wrote {}", outcome.path.display());
    }
    Ok(())
}
