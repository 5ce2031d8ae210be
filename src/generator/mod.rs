//! Output formats and the registry mapping a requested format to its generator.

mod atom;
mod convert;

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::epub::{EpubGenerator, EpubVersion, SplitOptions};
use crate::error::ExportError;
use crate::model::Book;
use crate::resources::Assets;
use crate::session::ExportSession;

pub use atom::{AtomError, AtomGenerator, FeedInfo, DEFAULT_EXPORT_URL};
pub use convert::{
    ConversionLimiter, ConversionPermit, ConvertError, ConvertGenerator, DEFAULT_CONVERT_COMMAND,
    DEFAULT_CONVERT_TIMEOUT_SECS,
};

/// Every supported output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FormatTag {
    Epub2,
    Epub3,
    Mobi,
    PdfA4,
    PdfA5,
    PdfA6,
    PdfLetter,
    Rtf,
    Txt,
    Htmlz,
    Atom,
}

impl FormatTag {
    pub const ALL: [FormatTag; 11] = [
        FormatTag::Epub2,
        FormatTag::Epub3,
        FormatTag::Mobi,
        FormatTag::PdfA4,
        FormatTag::PdfA5,
        FormatTag::PdfA6,
        FormatTag::PdfLetter,
        FormatTag::Rtf,
        FormatTag::Txt,
        FormatTag::Htmlz,
        FormatTag::Atom,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FormatTag::Epub2 => "epub-2",
            FormatTag::Epub3 => "epub-3",
            FormatTag::Mobi => "mobi",
            FormatTag::PdfA4 => "pdf-a4",
            FormatTag::PdfA5 => "pdf-a5",
            FormatTag::PdfA6 => "pdf-a6",
            FormatTag::PdfLetter => "pdf-letter",
            FormatTag::Rtf => "rtf",
            FormatTag::Txt => "txt",
            FormatTag::Htmlz => "htmlz",
            FormatTag::Atom => "atom",
        }
    }

    /// Parse a format name. `epub` means EPUB 3 and `odt` is served as RTF.
    pub fn parse(name: &str) -> Result<Self, GeneratorError> {
        let name = name.trim().to_ascii_lowercase();
        let name = match name.as_str() {
            "epub" => "epub-3",
            "odt" => "rtf",
            other => other,
        };
        Self::ALL
            .into_iter()
            .find(|tag| tag.as_str() == name)
            .ok_or_else(|| GeneratorError::InvalidFormat {
                format: name.to_string(),
                valid: Self::ALL.iter().map(|t| t.as_str()).collect::<Vec<_>>().join(", "),
            })
    }

    pub fn extension(&self) -> &'static str {
        match self {
            FormatTag::Epub2 | FormatTag::Epub3 => "epub",
            FormatTag::Mobi => "mobi",
            FormatTag::PdfA4 | FormatTag::PdfA5 | FormatTag::PdfA6 | FormatTag::PdfLetter => "pdf",
            FormatTag::Rtf => "rtf",
            FormatTag::Txt => "txt",
            FormatTag::Htmlz => "htmlz",
            FormatTag::Atom => "atom",
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            FormatTag::Epub2 | FormatTag::Epub3 => "application/epub+zip",
            FormatTag::Mobi => "application/x-mobipocket-ebook",
            FormatTag::PdfA4 | FormatTag::PdfA5 | FormatTag::PdfA6 | FormatTag::PdfLetter => "application/pdf",
            FormatTag::Rtf => "application/rtf",
            FormatTag::Txt => "text/plain",
            FormatTag::Htmlz => "application/zip",
            FormatTag::Atom => "application/atom+xml;profile=opds-catalog;kind=acquisition",
        }
    }
}

impl fmt::Display for FormatTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FormatTag {
    type Err = GeneratorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[derive(Debug, Error)]
pub enum GeneratorError {
    #[error("Unknown format \"{format}\". Valid formats: {valid}")]
    InvalidFormat { format: String, valid: String },
}

/// Turns an assembled book into a file.
#[async_trait]
pub trait BookGenerator: Send + Sync {
    fn format(&self) -> FormatTag;

    async fn create(
        &self,
        book: &mut Book,
        session: &mut ExportSession,
        assets: &Assets,
        path: &Path,
    ) -> Result<(), ExportError>;
}

/// A generator for one format: books go to a file, listings to a feed.
pub enum Generator {
    Book(Box<dyn BookGenerator>),
    Feed(AtomGenerator),
}

impl fmt::Debug for Generator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Generator::Book(g) => write!(f, "Generator::Book({})", g.format()),
            Generator::Feed(_) => f.write_str("Generator::Feed"),
        }
    }
}

/// Settings shared by every generator the registry builds.
#[derive(Debug, Clone)]
pub struct GeneratorSettings {
    pub split: SplitOptions,
    pub convert_command: String,
    pub convert_timeout: Duration,
    pub limiter: ConversionLimiter,
    pub export_url: String,
}

impl Default for GeneratorSettings {
    fn default() -> Self {
        Self {
            split: SplitOptions::default(),
            convert_command: DEFAULT_CONVERT_COMMAND.to_string(),
            convert_timeout: Duration::from_secs(DEFAULT_CONVERT_TIMEOUT_SECS),
            limiter: ConversionLimiter::new(2),
            export_url: DEFAULT_EXPORT_URL.to_string(),
        }
    }
}

type Factory = fn(FormatTag, &GeneratorSettings) -> Generator;

fn epub_factory(tag: FormatTag, settings: &GeneratorSettings) -> Generator {
    let version = if tag == FormatTag::Epub2 {
        EpubVersion::Epub2
    } else {
        EpubVersion::Epub3
    };
    Generator::Book(Box::new(EpubGenerator::new(version, settings.split)))
}

fn convert_factory(tag: FormatTag, settings: &GeneratorSettings) -> Generator {
    Generator::Book(Box::new(ConvertGenerator::new(tag, settings)))
}

fn atom_factory(_tag: FormatTag, settings: &GeneratorSettings) -> Generator {
    Generator::Feed(AtomGenerator::new(settings.export_url.clone()))
}

/// Maps format tags to generator factories.
#[derive(Debug, Clone)]
pub struct GeneratorRegistry {
    settings: GeneratorSettings,
    factories: BTreeMap<FormatTag, Factory>,
}

impl Default for GeneratorRegistry {
    fn default() -> Self {
        Self::new(GeneratorSettings::default())
    }
}

impl GeneratorRegistry {
    pub fn new(settings: GeneratorSettings) -> Self {
        let mut factories: BTreeMap<FormatTag, Factory> = BTreeMap::new();
        for tag in FormatTag::ALL {
            let factory: Factory = match tag {
                FormatTag::Epub2 | FormatTag::Epub3 => epub_factory,
                FormatTag::Atom => atom_factory,
                _ => convert_factory,
            };
            factories.insert(tag, factory);
        }
        Self { settings, factories }
    }

    pub fn settings(&self) -> &GeneratorSettings {
        &self.settings
    }

    pub fn get(&self, tag: FormatTag) -> Result<Generator, GeneratorError> {
        let factory = self.factories.get(&tag).ok_or_else(|| GeneratorError::InvalidFormat {
            format: tag.as_str().to_string(),
            valid: self.formats().join(", "),
        })?;
        Ok(factory(tag, &self.settings))
    }

    /// Parse `name` and build its generator.
    pub fn for_format(&self, name: &str) -> Result<Generator, GeneratorError> {
        self.get(FormatTag::parse(name)?)
    }

    pub fn formats(&self) -> Vec<&'static str> {
        self.factories.keys().map(|t| t.as_str()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aliases_resolve() {
        assert_eq!(FormatTag::parse("epub").unwrap(), FormatTag::Epub3);
        assert_eq!(FormatTag::parse(" EPUB-2 ").unwrap(), FormatTag::Epub2);
        assert_eq!(FormatTag::parse("odt").unwrap(), FormatTag::Rtf);
        assert_eq!("pdf-letter".parse::<FormatTag>().unwrap(), FormatTag::PdfLetter);
    }

    #[test]
    fn unknown_format_lists_valid_ones() {
        let err = FormatTag::parse("docx").unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("docx"));
        assert!(msg.contains("epub-3"));
        assert!(msg.contains("htmlz"));
    }

    #[test]
    fn registry_builds_a_generator_per_kind() {
        let registry = GeneratorRegistry::default();
        match registry.for_format("epub-2").unwrap() {
            Generator::Book(g) => assert_eq!(g.format(), FormatTag::Epub2),
            other => panic!("unexpected {other:?}"),
        }
        match registry.for_format("odt").unwrap() {
            Generator::Book(g) => assert_eq!(g.format(), FormatTag::Rtf),
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(registry.for_format("atom").unwrap(), Generator::Feed(_)));
        assert!(registry.for_format("doc").is_err());
        assert_eq!(registry.formats().len(), FormatTag::ALL.len());
    }

    #[test]
    fn extensions_and_mime_types() {
        assert_eq!(FormatTag::PdfA5.extension(), "pdf");
        assert_eq!(FormatTag::Epub2.mime_type(), "application/epub+zip");
        assert_eq!(FormatTag::Atom.to_string(), "atom");
    }
}
