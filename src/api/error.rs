//! Error type for the wiki API, the media host and the credits service.

use std::path::PathBuf;

use thiserror::Error;

/// Failure talking to a remote service. Maps to CLI exit code 2 (1 for `NotFound`).
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Invalid URL: {input}: {reason}")]
    InvalidUrl { input: String, reason: String },

    #[error("Network error: could not reach {url}: {source}")]
    Network {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("HTTP {status} when fetching: {url}")]
    HttpStatus {
        status: u16,
        url: String,
        /// What was being fetched (e.g. "page html", "siteinfo").
        context: Option<String>,
    },

    #[error("Failed to read response body from {url}: {source}")]
    BodyRead {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Unexpected response from {url}: {reason}")]
    Malformed { url: String, reason: String },

    #[error("Page \"{title}\" does not exist on {domain}.")]
    NotFound { title: String, domain: String },

    #[error("Could not store downloaded file in {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ApiError {
    pub(crate) fn status(&self) -> Option<u16> {
        match self {
            ApiError::HttpStatus { status, .. } => Some(*status),
            _ => None,
        }
    }
}
