//! wsexport: export Wikisource books (main page plus sub-pages) to EPUB 2/3, other
//! formats through an external converter, or an OPDS feed for a category.

pub mod api;
pub mod cli;
pub mod config;
pub mod dom;
pub mod epub;
pub mod error;
pub mod export;
pub mod fonts;
pub mod generator;
pub mod model;
pub mod parser;
pub mod provider;
pub mod resources;
pub mod session;

// Re-exports for CLI and consumers.
pub use api::{Api, ApiError, Fetcher, PoliteClient, PoliteClientBuilder};
pub use epub::{write_epub, EpubError, EpubOptions, EpubVersion};
pub use error::ExportError;
pub use export::{output_file_name, ExportOutcome, ExportRequest, Exporter};
pub use generator::{FormatTag, Generator, GeneratorRegistry, GeneratorSettings};
pub use model::{Book, BookOptions, Page, Picture};
pub use provider::BookProvider;
pub use session::ExportSession;
