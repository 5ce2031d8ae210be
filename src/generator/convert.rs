//! Formats produced by an external converter (calibre's `ebook-convert`) from an EPUB 3.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info};

use crate::epub::{write_epub, EpubOptions, EpubVersion, SplitOptions};
use crate::error::ExportError;
use crate::model::Book;
use crate::resources::Assets;
use crate::session::ExportSession;

use super::{BookGenerator, FormatTag, GeneratorSettings};

pub const DEFAULT_CONVERT_COMMAND: &str = "ebook-convert";
pub const DEFAULT_CONVERT_TIMEOUT_SECS: u64 = 120;

/// Kept from the converter's stderr in error messages.
const STDERR_TAIL: usize = 2_000;

#[derive(Debug, Error)]
pub enum ConvertError {
    #[error("Could not run converter {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Converter failed ({status}): {stderr}")]
    Failed { status: String, stderr: String },

    #[error("Converter did not finish within {secs} seconds")]
    Timeout { secs: u64 },

    #[error("Could not stage converted file {path}: {source}")]
    Staging {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Conversion limiter closed")]
    LimiterClosed,
}

/// Caps the number of converter processes running at once.
#[derive(Debug, Clone)]
pub struct ConversionLimiter {
    semaphore: Arc<Semaphore>,
    capacity: usize,
}

/// Slot held while a conversion runs; released when dropped.
#[derive(Debug)]
pub struct ConversionPermit {
    _permit: OwnedSemaphorePermit,
}

impl ConversionLimiter {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    pub async fn acquire(&self) -> Result<ConversionPermit, ConvertError> {
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| ConvertError::LimiterClosed)?;
        Ok(ConversionPermit { _permit: permit })
    }

    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Converter options for a format.
fn format_arguments(format: FormatTag) -> Vec<&'static str> {
    let paper = match format {
        FormatTag::PdfA4 => "a4",
        FormatTag::PdfA5 => "a5",
        FormatTag::PdfA6 => "a6",
        FormatTag::PdfLetter => "letter",
        FormatTag::Txt => return vec!["--txt-output-encoding", "utf-8"],
        FormatTag::Mobi => return vec!["--output-profile", "kindle"],
        _ => return Vec::new(),
    };
    vec!["--paper-size", paper, "--pdf-page-numbers", "--preserve-cover-aspect-ratio"]
}

fn tail(s: &str, max: usize) -> String {
    let s = s.trim();
    match s.char_indices().rev().nth(max.saturating_sub(1)) {
        Some((i, _)) => s[i..].to_string(),
        None => s.to_string(),
    }
}

/// Builds an EPUB 3 and converts it with an external program.
#[derive(Debug, Clone)]
pub struct ConvertGenerator {
    format: FormatTag,
    command: String,
    timeout: Duration,
    limiter: ConversionLimiter,
    split: SplitOptions,
}

impl ConvertGenerator {
    pub fn new(format: FormatTag, settings: &GeneratorSettings) -> Self {
        Self {
            format,
            command: settings.convert_command.clone(),
            timeout: settings.convert_timeout,
            limiter: settings.limiter.clone(),
            split: settings.split,
        }
    }

    /// Run the converter on `input`, writing `output`.
    pub async fn convert(&self, input: &Path, output: &Path) -> Result<(), ConvertError> {
        let _permit = self.limiter.acquire().await?;
        let mut command = Command::new(&self.command);
        command
            .arg(input)
            .arg(output)
            .args(format_arguments(self.format))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        debug!(command = %self.command, format = %self.format, "starting converter");

        let result = tokio::time::timeout(self.timeout, command.output())
            .await
            .map_err(|_| ConvertError::Timeout {
                secs: self.timeout.as_secs(),
            })?;
        let out = result.map_err(|e| ConvertError::Spawn {
            command: self.command.clone(),
            source: e,
        })?;
        if !out.status.success() {
            return Err(ConvertError::Failed {
                status: out.status.to_string(),
                stderr: tail(&String::from_utf8_lossy(&out.stderr), STDERR_TAIL),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl BookGenerator for ConvertGenerator {
    fn format(&self) -> FormatTag {
        self.format
    }

    async fn create(
        &self,
        book: &mut Book,
        session: &mut ExportSession,
        assets: &Assets,
        path: &Path,
    ) -> Result<(), ExportError> {
        let staging = |path: PathBuf| move |e: std::io::Error| ConvertError::Staging { path, source: e };

        let epub = tempfile::Builder::new()
            .suffix(".epub")
            .tempfile_in(session.temp_dir())
            .map_err(staging(session.temp_dir().to_path_buf()))?
            .into_temp_path();
        let options = EpubOptions {
            version: EpubVersion::Epub3,
            split: self.split,
        };
        write_epub(book, session, assets, options, &epub)?;

        let dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let staged = tempfile::Builder::new()
            .suffix(&format!(".{}", self.format.extension()))
            .tempfile_in(&dir)
            .map_err(staging(dir.clone()))?
            .into_temp_path();
        self.convert(&epub, &staged).await?;
        staged
            .persist(path)
            .map_err(|e| staging(path.to_path_buf())(e.error))?;
        info!(path = %path.display(), format = %self.format, "converted book");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn generator(command: &str, timeout: Duration) -> ConvertGenerator {
        let settings = GeneratorSettings {
            convert_command: command.to_string(),
            convert_timeout: timeout,
            limiter: ConversionLimiter::new(1),
            ..GeneratorSettings::default()
        };
        ConvertGenerator::new(FormatTag::Txt, &settings)
    }

    #[tokio::test]
    async fn permits_are_released_on_drop() {
        let limiter = ConversionLimiter::new(2);
        let first = limiter.acquire().await.unwrap();
        let _second = limiter.acquire().await.unwrap();
        assert_eq!(limiter.available(), 0);
        drop(first);
        assert_eq!(limiter.available(), 1);
        assert_eq!(limiter.capacity(), 2);
    }

    #[tokio::test]
    async fn missing_converter_is_a_spawn_error() {
        let dir = tempfile::tempdir().unwrap();
        let g = generator("/nonexistent/ebook-convert", Duration::from_secs(5));
        let err = g
            .convert(&dir.path().join("in.epub"), &dir.path().join("out.txt"))
            .await
            .unwrap_err();
        assert!(matches!(err, ConvertError::Spawn { .. }));
        assert_eq!(g.limiter.available(), 1);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn non_zero_exit_is_a_failure() {
        let dir = tempfile::tempdir().unwrap();
        let g = generator("false", Duration::from_secs(5));
        let err = g
            .convert(&dir.path().join("in.epub"), &dir.path().join("out.txt"))
            .await
            .unwrap_err();
        assert!(matches!(err, ConvertError::Failed { .. }));
        assert_eq!(g.limiter.available(), 1);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn slow_converter_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("slow.sh");
        std::fs::write(&script, "#!/bin/sh\nsleep 5\n").unwrap();
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        let g = generator(script.to_str().unwrap(), Duration::from_millis(100));
        let err = g
            .convert(&dir.path().join("in.epub"), &dir.path().join("out.txt"))
            .await
            .unwrap_err();
        assert!(matches!(err, ConvertError::Timeout { .. }));
    }

    #[test]
    fn pdf_formats_set_paper_size() {
        assert_eq!(format_arguments(FormatTag::PdfA5)[1], "a5");
        assert!(format_arguments(FormatTag::Rtf).is_empty());
        assert_eq!(tail("abcdef", 3), "def");
    }
}
